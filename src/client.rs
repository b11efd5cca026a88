//! Public entry point for talking to peers.
//!
//! [`PeerClient`] caches at most one connection per [`PeerAddress`]. A cached
//! connection is reused while it is `Ready` and has been idle for less than
//! the keep-alive window; otherwise it is closed and replaced.
//!
//! Lookup-or-open happens under a per-address lock, so concurrent callers
//! targeting the same peer share a single connection while callers for
//! different peers never wait on each other's handshakes.
//!
//! The client is the only layer that retries: a transport-class failure
//! (see [`PeerError::is_retryable`]) drops the connection from the cache and
//! the operation is attempted once more on a fresh one. A dropped connection
//! stays open for requests already in flight on it.
//!
//! # Example
//! ```rust,no_run
//! use pure::{ClientConfig, PeerClient};
//!
//! let client = PeerClient::new(ClientConfig::default());
//! let result = client.query("127.0.0.1:9000", "cats").unwrap();
//! for hit in result.hits {
//!     println!("{} - {}", hit.title, hit.url);
//! }
//! client.shutdown();
//! ```
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use log::{debug, info, warn};

use crate::{
    address::PeerAddress,
    config::ClientConfig,
    dispatcher::Dispatcher,
    error::{PeerError, Result},
    lock,
    search::SearchResult,
};

/// Number of extra attempts after a transport-class failure.
pub const MAX_RETRIES: usize = 1;

type Link = Arc<Dispatcher>;
type LinkSlot = Arc<Mutex<Option<Link>>>;

pub struct PeerClient {
    config: ClientConfig,
    links: Mutex<HashMap<PeerAddress, LinkSlot>>,
    shut_down: AtomicBool,
}

impl PeerClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            links: Mutex::new(HashMap::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Query `address` with the configured request timeout.
    pub fn query(&self, address: &str, text: &str) -> Result<SearchResult> {
        self.query_with_timeout(address, text, self.config.request_timeout)
    }

    pub fn query_with_timeout(
        &self,
        address: &str,
        text: &str,
        timeout: Duration,
    ) -> Result<SearchResult> {
        let peer: PeerAddress = address.parse()?;
        self.with_retry(&peer, |link| link.request(text, timeout))
    }

    /// Round-trip a `Ping` to `address`.
    pub fn ping(&self, address: &str) -> Result<Duration> {
        let peer: PeerAddress = address.parse()?;
        let timeout = self.config.request_timeout;
        self.with_retry(&peer, |link| link.ping(timeout))
    }

    fn with_retry<T>(&self, peer: &PeerAddress, op: impl Fn(&Dispatcher) -> Result<T>) -> Result<T> {
        let mut attempt = 0;
        loop {
            let res = self.link(peer).and_then(|link| {
                let res = op(link.as_ref());
                if matches!(&res, Err(e) if e.is_retryable()) {
                    self.evict(peer, &link);
                }
                res
            });

            match res {
                Err(e) if e.is_retryable() && attempt < MAX_RETRIES => {
                    attempt += 1;
                    warn!("{peer}: {e}; retrying on a fresh connection ({attempt}/{MAX_RETRIES})");
                }
                res => return res,
            }
        }
    }

    /// Cached connection for `peer`, opening one if needed.
    fn link(&self, peer: &PeerAddress) -> Result<Link> {
        loop {
            if self.shut_down.load(Ordering::Acquire) {
                return Err(PeerError::ConnectionLost);
            }

            let slot = {
                let mut links = lock(&self.links);
                Arc::clone(links.entry(peer.clone()).or_default())
            };

            let mut guard = lock(&slot);
            if !self.is_cached(peer, &slot) {
                // emptied and forgotten while we waited
                continue;
            }

            if let Some(existing) = guard.as_ref() {
                if self.is_reusable(existing) {
                    return Ok(Arc::clone(existing));
                }
                debug!(
                    "replacing connection to {peer} ({:?}, idle {:?})",
                    existing.connection().state(),
                    existing.connection().idle_for()
                );
                if let Some(stale) = guard.take() {
                    stale.close();
                }
            }

            let link = match Dispatcher::open(peer.clone(), &self.config) {
                Ok(dispatcher) => Arc::new(dispatcher),
                Err(e) => {
                    self.forget(peer, &slot);
                    return Err(e);
                }
            };

            // shutdown skips slots that are mid-open
            if self.shut_down.load(Ordering::Acquire) {
                link.close();
                return Err(PeerError::ConnectionLost);
            }

            *guard = Some(Arc::clone(&link));
            return Ok(link);
        }
    }

    fn is_reusable(&self, link: &Dispatcher) -> bool {
        link.connection().is_ready() && link.connection().idle_for() < self.config.keep_alive
    }

    fn is_cached(&self, peer: &PeerAddress, slot: &LinkSlot) -> bool {
        lock(&self.links)
            .get(peer)
            .is_some_and(|cached| Arc::ptr_eq(cached, slot))
    }

    /// Remove the map entry for `peer` if it is still `slot`.
    ///
    /// Callers hold the slot lock and have left the slot empty.
    fn forget(&self, peer: &PeerAddress, slot: &LinkSlot) {
        let mut links = lock(&self.links);
        if links.get(peer).is_some_and(|cached| Arc::ptr_eq(cached, slot)) {
            links.remove(peer);
        }
    }

    /// Drop `link` from the cache if it is still the cached connection.
    ///
    /// The link is not closed: other requests may still be waiting on it, and
    /// it closes once the last of them lets go.
    fn evict(&self, peer: &PeerAddress, link: &Link) {
        let slot = lock(&self.links).get(peer).cloned();
        if let Some(slot) = slot {
            let mut guard = lock(&slot);
            if guard.as_ref().is_some_and(|cached| Arc::ptr_eq(cached, link)) {
                guard.take();
                self.forget(peer, &slot);
            }
        }
    }

    /// Close cached connections that are idle past keep-alive or no longer ready.
    pub fn evict_idle(&self) -> usize {
        let slots: Vec<(PeerAddress, LinkSlot)> = lock(&self.links)
            .iter()
            .map(|(peer, slot)| (peer.clone(), Arc::clone(slot)))
            .collect();

        let mut evicted = 0;
        for (peer, slot) in slots {
            let mut guard = lock(&slot);
            let stale = guard.as_ref().is_some_and(|link| !self.is_reusable(link));
            if stale {
                if let Some(link) = guard.take() {
                    debug!("evicting idle connection to {peer}");
                    self.forget(&peer, &slot);
                    link.close();
                    evicted += 1;
                }
            }
        }
        evicted
    }

    /// Number of cached connections currently `Ready`.
    pub fn ready_connections(&self) -> usize {
        let slots: Vec<LinkSlot> = lock(&self.links).values().cloned().collect();
        slots
            .iter()
            .filter(|slot| {
                lock(slot)
                    .as_ref()
                    .is_some_and(|link| link.connection().is_ready())
            })
            .count()
    }

    /// Close every cached connection and refuse new ones.
    ///
    /// In-flight requests fail with `ConnectionLost`.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
        let slots: Vec<(PeerAddress, LinkSlot)> = lock(&self.links).drain().collect();
        if slots.is_empty() {
            return;
        }

        info!("closing {} cached connection(s)", slots.len());
        for (peer, slot) in slots {
            // close without waiting for an in-progress open on this slot
            let link = match slot.try_lock() {
                Ok(mut guard) => guard.take(),
                Err(_) => None,
            };
            if let Some(link) = link {
                debug!("closing connection to {peer}");
                link.close();
            }
        }
    }
}

impl Default for PeerClient {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl Drop for PeerClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_address_fails_without_network() {
        let client = PeerClient::default();
        assert!(matches!(
            client.query("not-an-address", "cats"),
            Err(PeerError::InvalidAddress(_))
        ));
        assert!(matches!(
            client.ping("host:notaport"),
            Err(PeerError::InvalidAddress(_))
        ));
        assert!(lock(&client.links).is_empty());
    }

    #[test]
    fn shutdown_on_empty_client() {
        let client = PeerClient::default();
        client.shutdown();
        assert_eq!(client.ready_connections(), 0);
        assert_eq!(client.evict_idle(), 0);
    }

    #[test]
    fn failed_open_leaves_no_entry() {
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let client = PeerClient::new(ClientConfig {
            connect_timeout: Duration::from_millis(500),
            ..ClientConfig::default()
        });

        assert!(client.query(&addr.to_string(), "cats").is_err());
        assert!(lock(&client.links).is_empty());
    }

    #[test]
    fn no_connections_after_shutdown() {
        let client = PeerClient::default();
        client.shutdown();
        assert!(matches!(
            client.query("127.0.0.1:9", "cats"),
            Err(PeerError::ConnectionLost)
        ));
        assert!(lock(&client.links).is_empty());
    }
}
