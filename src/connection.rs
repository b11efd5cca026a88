//! A single transport link to a peer.
//!
//! The [`Connection`] owns exactly one TCP socket and walks it through the
//! handshake:
//!
//! ```text
//! Disconnected -> Connecting -> Handshaking -> Ready
//!                                   |            |
//!                                   v            v
//!                                 Failed      Closing -> Closed
//! ```
//!
//! Any transport or decode error moves the connection to `Failed`; an
//! explicit [`Connection::close`] moves it through `Closing` to `Closed`. Both
//! paths shut the socket down immediately so no descriptor outlives the
//! connection's usefulness.
//!
//! Once `Ready`, the read half is handed to a
//! [`Dispatcher`](crate::Dispatcher) through [`Connection::take_reader`];
//! writes stay here, serialized behind a mutex so concurrent senders never
//! interleave frame bytes.
use std::{
    net::{Shutdown, TcpStream},
    sync::Mutex,
    time::{Duration, Instant},
};

use log::{debug, info, warn};

use crate::{
    address::PeerAddress,
    config::ClientConfig,
    error::{PeerError, Result},
    lock,
    protocol::{Frame, FrameKind, FrameTransport, PROTOCOL_VERSION, is_timeout},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Handshaking,
    Ready,
    Closing,
    Closed,
    Failed,
}

pub type FrameReader = FrameTransport<TcpStream>;

pub struct Connection {
    peer: PeerAddress,
    config: ClientConfig,
    state: Mutex<ConnectionState>,
    last_activity: Mutex<Instant>,
    writer: Mutex<Option<TcpStream>>,
    reader: Mutex<Option<FrameReader>>,
    failure: Mutex<Option<String>>,
}

impl Connection {
    pub fn new(peer: PeerAddress, config: ClientConfig) -> Self {
        Self {
            peer,
            config,
            state: Mutex::new(ConnectionState::Disconnected),
            last_activity: Mutex::new(Instant::now()),
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            failure: Mutex::new(None),
        }
    }

    /// Connect and complete the handshake.
    ///
    /// Only valid from `Disconnected`. On any failure the connection ends up
    /// `Failed` with its socket released.
    pub fn open(&self) -> Result<()> {
        {
            let mut state = lock(&self.state);
            if *state != ConnectionState::Disconnected {
                return Err(PeerError::NotReady(*state));
            }
            *state = ConnectionState::Connecting;
        }
        debug!("connecting to {}", self.peer);

        let res = self.connect().and_then(|stream| self.handshake(stream));
        match res {
            Ok(()) => {
                self.set_state(ConnectionState::Ready);
                self.touch();
                info!("connection to {} ready", self.peer);
                Ok(())
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    fn connect(&self) -> Result<TcpStream> {
        let addrs = self.peer.resolve()?;
        let mut last_err = None;

        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.config.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) if is_timeout(&e) => {
                    last_err = Some(PeerError::ConnectTimeout(self.peer.to_string()))
                }
                Err(e) => last_err = Some(e.into()),
            }
        }

        Err(last_err.unwrap_or_else(|| {
            PeerError::Transport(std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                format!("{} resolved to no addresses", self.peer),
            ))
        }))
    }

    fn handshake(&self, stream: TcpStream) -> Result<()> {
        let deadline = Instant::now() + self.config.handshake_timeout;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(self.config.write_timeout))?;

        let mut reader =
            FrameTransport::with_max_frame_size(stream.try_clone()?, self.config.max_frame_size);
        *lock(&self.writer) = Some(stream);
        self.set_state(ConnectionState::Handshaking);

        self.write(&Frame::new(FrameKind::Hello, 0, PROTOCOL_VERSION.as_bytes()))?;

        // a hang-up is a transport failure, not a refusal
        let frame = match reader.read_frame_before(deadline) {
            Ok(Some(frame)) => frame,
            Ok(None) => return Err(PeerError::ConnectionLost),
            Err(PeerError::Transport(e)) if is_timeout(&e) => {
                return Err(PeerError::HandshakeFailed(format!(
                    "no HelloAck within {:?}",
                    self.config.handshake_timeout
                )));
            }
            Err(e) => return Err(e),
        };

        match frame.kind {
            FrameKind::HelloAck if frame.id == 0 => {
                if frame.payload != PROTOCOL_VERSION.as_bytes() {
                    return Err(PeerError::HandshakeFailed(format!(
                        "incompatible protocol version '{}'",
                        frame.payload_text()
                    )));
                }
            }
            FrameKind::Error => return Err(PeerError::HandshakeFailed(frame.payload_text())),
            kind => {
                return Err(PeerError::HandshakeFailed(format!(
                    "expected HelloAck, got {kind} id={}",
                    frame.id
                )));
            }
        }

        reader.get_ref().set_read_timeout(None)?;
        *lock(&self.reader) = Some(reader);
        Ok(())
    }

    /// Send a frame on a `Ready` connection.
    pub fn send(&self, frame: &Frame) -> Result<()> {
        let state = self.state();
        if state != ConnectionState::Ready {
            return Err(PeerError::NotReady(state));
        }
        self.write(frame)
    }

    fn write(&self, frame: &Frame) -> Result<()> {
        let bytes = frame.encode()?;

        let res = {
            let mut writer = lock(&self.writer);
            let stream = writer.as_mut().ok_or(PeerError::ConnectionLost)?;
            std::io::Write::write_all(stream, &bytes)
        };

        match res {
            Ok(()) => {
                self.touch();
                Ok(())
            }
            Err(e) => {
                let err = PeerError::Transport(e);
                self.fail(&err);
                Err(err)
            }
        }
    }

    /// Hand the read half to the single reader of this connection.
    pub fn take_reader(&self) -> Option<FrameReader> {
        lock(&self.reader).take()
    }

    /// Move to `Failed` and release the socket.
    ///
    /// No-op once the connection is closing, closed or already failed.
    pub fn fail(&self, reason: &PeerError) {
        {
            let mut state = lock(&self.state);
            match *state {
                ConnectionState::Closing | ConnectionState::Closed | ConnectionState::Failed => {
                    return;
                }
                _ => *state = ConnectionState::Failed,
            }
        }

        warn!("connection to {} failed: {reason}", self.peer);
        *lock(&self.failure) = Some(reason.to_string());
        self.release();
    }

    /// Close the connection. Idempotent.
    pub fn close(&self) {
        let previous = {
            let mut state = lock(&self.state);
            let previous = *state;
            if !matches!(previous, ConnectionState::Closed | ConnectionState::Failed) {
                *state = ConnectionState::Closing;
            }
            previous
        };

        match previous {
            ConnectionState::Closed => return,
            ConnectionState::Failed => {
                self.release();
                return;
            }
            _ => self.release(),
        }
        self.set_state(ConnectionState::Closed);
        info!("connection to {} closed", self.peer);
    }

    fn release(&self) {
        if let Some(stream) = lock(&self.writer).take() {
            // also unblocks the reader, which shares the socket
            let _ = stream.shutdown(Shutdown::Both);
        }
        lock(&self.reader).take();
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = lock(&self.state);
        debug!("{}: {:?} -> {:?}", self.peer, *state, next);
        *state = next;
    }

    pub(crate) fn touch(&self) {
        *lock(&self.last_activity) = Instant::now();
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    pub fn peer(&self) -> &PeerAddress {
        &self.peer
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Time since the last frame was sent or received.
    pub fn idle_for(&self) -> Duration {
        lock(&self.last_activity).elapsed()
    }

    /// Reason the connection moved to `Failed`, if it did.
    pub fn failure(&self) -> Option<String> {
        lock(&self.failure).clone()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.release();
    }
}
