//! # pure
//!
//! Client for the PURE peer protocol: connect to a peer at `host:port`,
//! complete the Hello/HelloAck handshake, issue search queries over a
//! multiplexed, length-prefixed frame protocol and get back structured
//! [`SearchResult`]s. The crate also ships the responder side
//! ([`protocol::PeerServer`]) answering queries from a [`SearchBackend`].
//!
//! Layers, leaves first:
//!
//! - [`protocol`]: frame format, incremental decoder, blocking transport.
//! - [`Connection`]: one socket, handshake and lifecycle state.
//! - [`Dispatcher`]: correlation ids, timeouts and the per-connection reader.
//! - [`PeerClient`]: connection cache and the single bounded retry.
//! - [`cli`]: argument model and exit codes of the `pure_client` binary.
pub mod address;
pub mod cli;
pub mod client;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod search;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use address::PeerAddress;
pub use client::PeerClient;
pub use config::ClientConfig;
pub use connection::{Connection, ConnectionState};
pub use dispatcher::Dispatcher;
pub use error::PeerError;
pub use search::{Hit, HttpBackend, LocalIndex, SearchBackend, SearchError, SearchResult};

/// Lock a mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
