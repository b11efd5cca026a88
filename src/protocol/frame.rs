//! Frame types and encoding.
use std::fmt;

use bincode::{Decode, Encode};
use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{PeerError, Result};

use super::wire_config;

/// Size of the fixed header: 4-byte length, 1-byte kind, 4-byte id.
pub const HEADER_SIZE: usize = 9;

/// Bytes counted by the length prefix before the payload (kind + id).
pub(crate) const LENGTH_OVERHEAD: u32 = 5;

/// Wire discriminant of a [`Frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    Hello = 0x01,
    HelloAck = 0x02,
    Query = 0x03,
    Result = 0x04,
    Error = 0x05,
    Ping = 0x06,
    Pong = 0x07,
}

impl TryFrom<u8> for FrameKind {
    type Error = PeerError;

    fn try_from(value: u8) -> std::result::Result<Self, PeerError> {
        match value {
            0x01 => Ok(FrameKind::Hello),
            0x02 => Ok(FrameKind::HelloAck),
            0x03 => Ok(FrameKind::Query),
            0x04 => Ok(FrameKind::Result),
            0x05 => Ok(FrameKind::Error),
            0x06 => Ok(FrameKind::Ping),
            0x07 => Ok(FrameKind::Pong),
            other => Err(PeerError::UnknownFrameKind(other)),
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Fixed-size frame header as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub(crate) struct Header {
    pub length: u32,
    pub kind: u8,
    pub id: u32,
}

/// One length-prefixed protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    /// Correlation id; 0 is reserved for the handshake.
    pub id: u32,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(kind: FrameKind, id: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            id,
            payload: payload.into(),
        }
    }

    /// A frame without payload, e.g. `Ping`/`Pong`.
    pub fn empty(kind: FrameKind, id: u32) -> Self {
        Self::new(kind, id, Bytes::new())
    }

    /// Payload as UTF-8 text, lossily.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Serialize header and payload into a single contiguous buffer.
    pub fn encode(&self) -> Result<Bytes> {
        let length = u32::try_from(self.payload.len())
            .ok()
            .and_then(|len| len.checked_add(LENGTH_OVERHEAD))
            .ok_or(PeerError::FrameTooLarge {
                length: u32::MAX,
                max: u32::MAX - LENGTH_OVERHEAD,
            })?;

        let header = Header {
            length,
            kind: self.kind as u8,
            id: self.id,
        };

        let mut head = [0u8; HEADER_SIZE];
        bincode::encode_into_slice(header, &mut head, wire_config())?;

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        buf.put_slice(&head);
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_big_endian() {
        let frame = Frame::new(FrameKind::Query, 0x0102_0304, &b"abc"[..]);
        let bytes = frame.encode().unwrap();

        assert_eq!(
            &bytes[..],
            &[0, 0, 0, 8, 0x03, 0x01, 0x02, 0x03, 0x04, b'a', b'b', b'c']
        );
    }

    #[test]
    fn empty_ping_is_header_only() {
        let bytes = Frame::empty(FrameKind::Ping, 7).encode().unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(&bytes[..5], &[0, 0, 0, 5, 0x06]);
    }

    #[test]
    fn kind_from_byte() {
        for kind in [
            FrameKind::Hello,
            FrameKind::HelloAck,
            FrameKind::Query,
            FrameKind::Result,
            FrameKind::Error,
            FrameKind::Ping,
            FrameKind::Pong,
        ] {
            assert_eq!(FrameKind::try_from(kind as u8).unwrap(), kind);
        }

        assert!(matches!(
            FrameKind::try_from(0x00),
            Err(PeerError::UnknownFrameKind(0x00))
        ));
        assert!(matches!(
            FrameKind::try_from(0xff),
            Err(PeerError::UnknownFrameKind(0xff))
        ));
    }

    #[test]
    fn payload_text_is_lossy() {
        let frame = Frame::new(FrameKind::Error, 1, vec![b'o', b'k', 0xff]);
        assert_eq!(frame.payload_text(), "ok\u{fffd}");
    }
}
