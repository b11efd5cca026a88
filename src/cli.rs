//! CLI utilities for the PURE peer client.
//!
//! The `pure_client` binary is a thin shell around [`PeerClient`](crate::PeerClient):
//! it parses `<host:port> <query text>`, prints the result as JSON on
//! standard output and reports failures on standard error with an exit code
//! identifying the failure class.
//!
//! | code | meaning           |
//! |------|-------------------|
//! | 0    | success           |
//! | 1    | any other failure |
//! | 2    | invalid address   |
//! | 3    | connect timeout   |
//! | 4    | request timeout   |
//! | 5    | connection lost   |
use std::time::Duration;

use clap::Parser;

use crate::{
    config::{
        ClientConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_KEEP_ALIVE,
        DEFAULT_REQUEST_TIMEOUT,
    },
    error::PeerError,
    protocol::DEFAULT_MAX_FRAME_SIZE,
    search::SearchResult,
};

pub const EXIT_OK: i32 = 0;
pub const EXIT_OTHER: i32 = 1;
pub const EXIT_INVALID_ADDRESS: i32 = 2;
pub const EXIT_CONNECT_TIMEOUT: i32 = 3;
pub const EXIT_TIMEOUT: i32 = 4;
pub const EXIT_CONNECTION_LOST: i32 = 5;

#[derive(Debug, Parser)]
#[command(version, about = "Query a PURE peer", long_about = None)]
pub struct Cli {
    /// Peer to contact, as host:port
    pub address: String,

    /// Search text to send
    #[arg(required_unless_present = "ping")]
    pub query: Option<String>,

    /// Ping the peer instead of querying it
    #[arg(long)]
    pub ping: bool,

    /// Transport connect timeout in milliseconds
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT.as_millis() as u64)]
    pub connect_timeout_ms: u64,

    /// Handshake timeout in milliseconds
    #[arg(long, default_value_t = DEFAULT_HANDSHAKE_TIMEOUT.as_millis() as u64)]
    pub handshake_timeout_ms: u64,

    /// Per-request timeout in milliseconds
    #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT.as_millis() as u64)]
    pub request_timeout_ms: u64,

    /// Keep-alive window for cached connections in seconds
    #[arg(long, default_value_t = DEFAULT_KEEP_ALIVE.as_secs())]
    pub keep_alive_secs: u64,

    /// Largest accepted frame in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_SIZE)]
    pub max_frame_size: u32,
}

impl Cli {
    pub fn config(&self) -> ClientConfig {
        ClientConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            max_frame_size: self.max_frame_size,
            ..ClientConfig::default()
        }
    }
}

/// Process exit code for a failed invocation.
pub fn exit_code(err: &PeerError) -> i32 {
    match err {
        PeerError::InvalidAddress(_) => EXIT_INVALID_ADDRESS,
        PeerError::ConnectTimeout(_) => EXIT_CONNECT_TIMEOUT,
        PeerError::Timeout(_) => EXIT_TIMEOUT,
        PeerError::ConnectionLost => EXIT_CONNECTION_LOST,
        _ => EXIT_OTHER,
    }
}

/// Short name of the error class, printed ahead of the message.
pub fn error_kind(err: &PeerError) -> &'static str {
    match err {
        PeerError::InvalidAddress(_) => "InvalidAddress",
        PeerError::ConnectTimeout(_) => "ConnectTimeout",
        PeerError::Transport(_) => "TransportError",
        PeerError::HandshakeFailed(_) => "HandshakeFailed",
        PeerError::FrameTooLarge { .. } => "FrameTooLarge",
        PeerError::UnknownFrameKind(_) => "UnknownFrameKind",
        PeerError::NotReady(_) => "NotReady",
        PeerError::ConnectionLost => "ConnectionLost",
        PeerError::Timeout(_) => "Timeout",
        PeerError::ProtocolViolation(_) => "ProtocolViolation",
        PeerError::Remote(_) => "RemoteError",
    }
}

/// Render a result as two-space indented JSON.
pub fn render(result: &SearchResult) -> String {
    serde_json::to_string_pretty(result).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::Hit;

    #[test]
    fn parses_address_and_query() {
        let cli = Cli::try_parse_from(["pure_client", "127.0.0.1:9000", "cats"]).unwrap();
        assert_eq!(cli.address, "127.0.0.1:9000");
        assert_eq!(cli.query.as_deref(), Some("cats"));
        assert!(!cli.ping);
        assert_eq!(cli.config(), ClientConfig::default());
    }

    #[test]
    fn query_required_unless_ping() {
        assert!(Cli::try_parse_from(["pure_client", "127.0.0.1:9000"]).is_err());

        let cli = Cli::try_parse_from(["pure_client", "127.0.0.1:9000", "--ping"]).unwrap();
        assert!(cli.ping);
        assert!(cli.query.is_none());
    }

    #[test]
    fn timeouts_from_flags() {
        let cli = Cli::try_parse_from([
            "pure_client",
            "peer:1",
            "dogs",
            "--request-timeout-ms",
            "250",
            "--keep-alive-secs",
            "2",
        ])
        .unwrap();

        let config = cli.config();
        assert_eq!(config.request_timeout, Duration::from_millis(250));
        assert_eq!(config.keep_alive, Duration::from_secs(2));
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
    }

    #[test]
    fn exit_codes_by_error_class() {
        let cases = vec![
            (PeerError::InvalidAddress("x".into()), 2),
            (PeerError::ConnectTimeout("x:1".into()), 3),
            (PeerError::Timeout(Duration::from_secs(1)), 4),
            (PeerError::ConnectionLost, 5),
            (PeerError::Remote("nope".into()), 1),
            (PeerError::HandshakeFailed("nope".into()), 1),
        ];

        for (err, code) in cases {
            assert_eq!(exit_code(&err), code, "{err}");
        }
    }

    #[test]
    fn renders_pretty_json() {
        let result = SearchResult {
            hits: vec![Hit::new("http://a", "A", "s")],
        };

        assert_eq!(
            render(&result),
            "{\n  \"hits\": [\n    {\n      \"url\": \"http://a\",\n      \"title\": \"A\",\n      \"snippet\": \"s\"\n    }\n  ]\n}"
        );
    }
}
