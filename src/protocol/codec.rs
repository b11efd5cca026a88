//! Incremental frame decoding.
//!
//! [`decode`] is a pure function over a byte slice: it either yields one frame
//! together with the number of bytes it consumed, or reports that more input
//! is needed. [`FrameDecoder`] wraps it with a growable buffer so socket reads
//! of any size can be pushed in and complete frames pulled out.
use bytes::{Buf, Bytes, BytesMut};
use log::trace;

use crate::error::{PeerError, Result};

use super::{
    frame::{Frame, FrameKind, HEADER_SIZE, Header, LENGTH_OVERHEAD},
    wire_config,
};

/// Decode one frame from the front of `buf`.
///
/// Returns `Ok(None)` when `buf` does not yet hold a full frame. The length
/// prefix is validated against `max_frame_size` as soon as the header is
/// available, so an oversized frame is rejected before its payload arrives.
pub fn decode(buf: &[u8], max_frame_size: u32) -> Result<Option<(Frame, usize)>> {
    let header = match peek_header(buf, max_frame_size)? {
        Some(header) => header,
        None => return Ok(None),
    };

    let total = 4 + header.length as usize;
    if buf.len() < total {
        return Ok(None);
    }

    let kind = FrameKind::try_from(header.kind)?;
    let payload = Bytes::copy_from_slice(&buf[HEADER_SIZE..total]);
    Ok(Some((Frame::new(kind, header.id, payload), total)))
}

fn peek_header(buf: &[u8], max_frame_size: u32) -> Result<Option<Header>> {
    if buf.len() < HEADER_SIZE {
        return Ok(None);
    }

    let (header, _): (Header, usize) =
        bincode::decode_from_slice(&buf[..HEADER_SIZE], wire_config())?;

    if header.length > max_frame_size {
        return Err(PeerError::FrameTooLarge {
            length: header.length,
            max: max_frame_size,
        });
    }
    if header.length < LENGTH_OVERHEAD {
        return Err(PeerError::ProtocolViolation(format!(
            "length prefix {} is shorter than the frame header",
            header.length
        )));
    }

    Ok(Some(header))
}

/// Buffer accumulating stream bytes until whole frames are available.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_frame_size: u32,
}

impl FrameDecoder {
    pub fn new(max_frame_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
            max_frame_size,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Pop the next complete frame, if one is buffered.
    pub fn decode(&mut self) -> Result<Option<Frame>> {
        let header = match peek_header(&self.buffer, self.max_frame_size)? {
            Some(header) => header,
            None => return Ok(None),
        };

        let total = 4 + header.length as usize;
        if self.buffer.len() < total {
            trace!(
                "buffered {} of {} bytes for next frame",
                self.buffer.len(),
                total
            );
            return Ok(None);
        }

        let kind = FrameKind::try_from(header.kind)?;
        self.buffer.advance(HEADER_SIZE);
        let payload = self.buffer.split_to(total - HEADER_SIZE).freeze();
        Ok(Some(Frame::new(kind, header.id, payload)))
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
