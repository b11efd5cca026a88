//! Error types shared by every layer of the peer client.
use std::{io, time::Duration};

use thiserror::Error;

use crate::connection::ConnectionState;

/// Errors surfaced by the codec, connection, dispatcher and client.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("invalid peer address '{0}', expected host:port")]
    InvalidAddress(String),

    #[error("timed out connecting to {0}")]
    ConnectTimeout(String),

    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("frame of {length} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge { length: u32, max: u32 },

    #[error("unknown frame kind 0x{0:02x}")]
    UnknownFrameKind(u8),

    #[error("connection not ready (state: {0:?})")]
    NotReady(ConnectionState),

    #[error("connection lost")]
    ConnectionLost,

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// An `Error` frame sent by the peer in reply to a request.
    #[error("peer error: {0}")]
    Remote(String),
}

impl PeerError {
    /// Transport-class failures that a fresh connection may cure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PeerError::ConnectionLost
                | PeerError::Timeout(_)
                | PeerError::ConnectTimeout(_)
                | PeerError::Transport(_)
                | PeerError::NotReady(_)
        )
    }
}

impl From<bincode::error::EncodeError> for PeerError {
    fn from(value: bincode::error::EncodeError) -> Self {
        PeerError::ProtocolViolation(format!("failed to encode frame header: {value}"))
    }
}

impl From<bincode::error::DecodeError> for PeerError {
    fn from(value: bincode::error::DecodeError) -> Self {
        PeerError::ProtocolViolation(format!("failed to decode frame header: {value}"))
    }
}

pub type Result<T> = std::result::Result<T, PeerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_class_errors_are_retryable() {
        assert!(PeerError::ConnectionLost.is_retryable());
        assert!(PeerError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(PeerError::ConnectTimeout("a:1".into()).is_retryable());
        assert!(PeerError::Transport(io::ErrorKind::ConnectionRefused.into()).is_retryable());
    }

    #[test]
    fn application_errors_are_not_retryable() {
        assert!(!PeerError::InvalidAddress("x".into()).is_retryable());
        assert!(!PeerError::Remote("no index".into()).is_retryable());
        assert!(!PeerError::HandshakeFailed("version".into()).is_retryable());
        assert!(!PeerError::UnknownFrameKind(9).is_retryable());
    }

    #[test]
    fn frame_too_large_message() {
        let err = PeerError::FrameTooLarge {
            length: 2_000_000,
            max: 1_048_576,
        };
        assert_eq!(
            err.to_string(),
            "frame of 2000000 bytes exceeds maximum of 1048576 bytes"
        );
    }
}
