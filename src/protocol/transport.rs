use std::{
    io::{self, ErrorKind, Read, Write},
    net::TcpStream,
    time::Instant,
};

use log::trace;

use crate::error::{PeerError, Result};

use super::{DEFAULT_MAX_FRAME_SIZE, Frame, FrameDecoder};

const READ_CHUNK: usize = 8 * 1024;

/// Blocking frame reader/writer over a bidirectional byte stream.
pub struct FrameTransport<T: Read + Write> {
    stream: T,
    decoder: FrameDecoder,
    scratch: Box<[u8]>,
}

impl<T: Read + Write> FrameTransport<T> {
    pub fn new(stream: T) -> Self {
        Self::with_max_frame_size(stream, DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(stream: T, max_frame_size: u32) -> Self {
        Self {
            stream,
            decoder: FrameDecoder::new(max_frame_size),
            scratch: vec![0u8; READ_CHUNK].into_boxed_slice(),
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.stream
    }

    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let bytes = frame.encode()?;
        self.stream.write_all(&bytes)?;
        self.stream.flush()?;
        trace!("wrote {} frame id={}", frame.kind, frame.id);
        Ok(())
    }

    /// Block until a whole frame is available.
    ///
    /// Returns `Ok(None)` on a clean end of stream between frames. A stream
    /// that ends in the middle of a frame is reported as `ConnectionLost`.
    pub fn read_frame(&mut self) -> Result<Option<Frame>> {
        self.read_frame_with(|_| Ok(()))
    }

    fn read_frame_with(
        &mut self,
        mut before_read: impl FnMut(&T) -> io::Result<()>,
    ) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.decoder.decode()? {
                trace!("read {} frame id={}", frame.kind, frame.id);
                return Ok(Some(frame));
            }

            before_read(&self.stream)?;
            let n = match self.stream.read(&mut self.scratch) {
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };

            if n == 0 {
                return if self.decoder.is_empty() {
                    Ok(None)
                } else {
                    Err(PeerError::ConnectionLost)
                };
            }
            self.decoder.push(&self.scratch[..n]);
        }
    }
}

impl FrameTransport<TcpStream> {
    /// Read one frame, giving up once `deadline` passes.
    ///
    /// The bound covers the whole frame, however the peer paces its bytes.
    /// The socket read timeout is left at whatever the last read needed.
    pub fn read_frame_before(&mut self, deadline: Instant) -> Result<Option<Frame>> {
        self.read_frame_with(|stream| {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(io::Error::new(ErrorKind::TimedOut, "read deadline elapsed"));
            }
            stream.set_read_timeout(Some(remaining))
        })
    }
}

/// True for the error kinds a socket read timeout produces.
pub(crate) fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}
