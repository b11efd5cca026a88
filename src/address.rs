//! Peer addressing.
//!
//! A [`PeerAddress`] is the immutable `host:port` pair a caller hands to the
//! client. Parsing is purely syntactic: no name resolution happens until a
//! connection is opened, so a malformed address never touches the network.
//!
//! # Example
//! ```rust
//! use pure::PeerAddress;
//!
//! let addr: PeerAddress = "127.0.0.1:9000".parse().unwrap();
//! assert_eq!(addr.host(), "127.0.0.1");
//! assert_eq!(addr.port(), 9000);
//!
//! assert!("not-an-address".parse::<PeerAddress>().is_err());
//! ```
use std::{
    fmt,
    io,
    net::{SocketAddr, ToSocketAddrs},
    str::FromStr,
};

use crate::error::PeerError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddress {
    host: String,
    port: u16,
}

impl PeerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Resolve to every socket address the host name maps to.
    pub fn resolve(&self) -> io::Result<Vec<SocketAddr>> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map(|addrs| addrs.collect())
    }
}

impl FromStr for PeerAddress {
    type Err = PeerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PeerError::InvalidAddress(s.to_string());

        let (host, port) = s.trim().rsplit_once(':').ok_or_else(invalid)?;

        let host = match host.strip_prefix('[') {
            Some(inner) => inner.strip_suffix(']').ok_or_else(invalid)?,
            // a bare ':' in the host means an unbracketed IPv6 literal
            None if host.contains(':') => return Err(invalid()),
            None => host,
        };

        if host.is_empty() || host.contains(char::is_whitespace) {
            return Err(invalid());
        }

        let port = port.parse::<u16>().map_err(|_| invalid())?;
        if port == 0 {
            return Err(invalid());
        }

        Ok(PeerAddress::new(host, port))
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_port() {
        let addr: PeerAddress = "localhost:9000".parse().unwrap();
        assert_eq!(addr, PeerAddress::new("localhost", 9000));
        assert_eq!(addr.to_string(), "localhost:9000");
    }

    #[test]
    fn parses_bracketed_ipv6() {
        let addr: PeerAddress = "[::1]:8080".parse().unwrap();
        assert_eq!(addr.host(), "::1");
        assert_eq!(addr.port(), 8080);
        assert_eq!(addr.to_string(), "[::1]:8080");
    }

    #[test]
    fn rejects_malformed_input() {
        let inputs = vec![
            "not-an-address",
            "",
            ":9000",
            "host:",
            "host:port",
            "host:70000",
            "host:0",
            "::1:9000",
            "[::1:9000",
            "two words:80",
        ];

        for input in inputs {
            let res = input.parse::<PeerAddress>();
            assert!(
                matches!(res, Err(PeerError::InvalidAddress(_))),
                "'{input}' should be rejected"
            );
        }
    }

    #[test]
    fn resolves_loopback() {
        let addr = PeerAddress::new("127.0.0.1", 4000);
        let resolved = addr.resolve().unwrap();
        assert_eq!(resolved, vec!["127.0.0.1:4000".parse().unwrap()]);
    }
}
