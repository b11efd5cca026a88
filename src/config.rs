//! Client tuning knobs.
use std::time::Duration;

use crate::protocol::DEFAULT_MAX_FRAME_SIZE;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(30);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeouts and limits applied to every connection a [`PeerClient`](crate::PeerClient) opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Upper bound on the transport-level connect.
    pub connect_timeout: Duration,
    /// Upper bound on the Hello/HelloAck exchange.
    pub handshake_timeout: Duration,
    /// Default per-request timeout.
    pub request_timeout: Duration,
    /// Cached connections idle for longer than this are replaced.
    pub keep_alive: Duration,
    /// Socket write timeout.
    pub write_timeout: Duration,
    /// Largest accepted `kind + id + payload` length.
    pub max_frame_size: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            keep_alive: DEFAULT_KEEP_ALIVE,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.handshake_timeout, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.keep_alive, Duration::from_secs(30));
        assert_eq!(config.max_frame_size, 1024 * 1024);
    }
}
