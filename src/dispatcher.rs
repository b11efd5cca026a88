//! Request/response correlation over a single connection.
//!
//! A [`Dispatcher`] owns the read side of a `Ready` [`Connection`]. It runs
//! one reader thread per connection that classifies every incoming frame:
//!
//! - `Ping` is answered with a `Pong` carrying the same id.
//! - `Result`, `Error` and `Pong` fulfil the pending request with that id, or
//!   are logged and dropped when nobody waits for the id any more.
//! - `Hello`, `HelloAck` and `Query` are protocol violations and fail the
//!   connection.
//!
//! Callers block in [`Dispatcher::request`] on a one-slot channel until the
//! reader fulfils their entry or the timeout elapses. Whoever removes an
//! entry from the pending table first owns its resolution, which keeps
//! every request resolved exactly once.
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        mpsc::{self, Receiver, RecvTimeoutError, SyncSender},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{debug, trace, warn};

use crate::{
    address::PeerAddress,
    config::ClientConfig,
    connection::{Connection, FrameReader},
    error::{PeerError, Result},
    lock,
    protocol::{Frame, FrameKind},
    search::{QueryPayload, SearchResult},
};

type Slot = SyncSender<Result<Frame>>;

struct PendingRequest {
    issued_at: Instant,
    deadline: Instant,
    slot: Slot,
}

struct PendingInner {
    next_id: u32,
    entries: HashMap<u32, PendingRequest>,
    closed: bool,
}

/// In-flight requests of one connection, keyed by correlation id.
pub(crate) struct PendingTable {
    inner: Mutex<PendingInner>,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(PendingInner {
                next_id: 1,
                entries: HashMap::new(),
                closed: false,
            }),
        }
    }

    /// Allocate an id not currently pending and register a slot for it.
    pub(crate) fn register(&self, timeout: Duration) -> Result<(u32, Receiver<Result<Frame>>)> {
        let mut inner = lock(&self.inner);
        if inner.closed {
            return Err(PeerError::ConnectionLost);
        }

        let id = loop {
            let candidate = inner.next_id;
            inner.next_id = inner.next_id.wrapping_add(1);
            // 0 belongs to the handshake
            if candidate != 0 && !inner.entries.contains_key(&candidate) {
                break candidate;
            }
        };

        let (slot, rx) = mpsc::sync_channel(1);
        let issued_at = Instant::now();
        inner.entries.insert(
            id,
            PendingRequest {
                issued_at,
                deadline: issued_at + timeout,
                slot,
            },
        );
        Ok((id, rx))
    }

    /// Resolve the entry for `id`. Returns false if nothing was pending.
    pub(crate) fn fulfill(&self, id: u32, result: Result<Frame>) -> bool {
        let entry = lock(&self.inner).entries.remove(&id);
        match entry {
            Some(request) => {
                trace!(
                    "request {id} resolved after {:?}",
                    request.issued_at.elapsed()
                );
                // the caller may have given up between removal and send
                let _ = request.slot.send(result);
                true
            }
            None => false,
        }
    }

    /// Drop the entry for `id` without resolving it.
    pub(crate) fn cancel(&self, id: u32) -> bool {
        lock(&self.inner).entries.remove(&id).is_some()
    }

    /// Fail every pending request and refuse new ones.
    pub(crate) fn fail_all(&self) {
        let drained: Vec<(u32, PendingRequest)> = {
            let mut inner = lock(&self.inner);
            inner.closed = true;
            inner.entries.drain().collect()
        };

        let now = Instant::now();
        for (id, request) in drained {
            debug!(
                "failing pending request {id} ({:?} before its deadline)",
                request.deadline.saturating_duration_since(now)
            );
            let _ = request.slot.send(Err(PeerError::ConnectionLost));
        }
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.inner).entries.len()
    }
}

/// Multiplexes requests over one [`Connection`].
pub struct Dispatcher {
    connection: Arc<Connection>,
    pending: Arc<PendingTable>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Open a connection to `peer` and start dispatching on it.
    pub fn open(peer: PeerAddress, config: &ClientConfig) -> Result<Self> {
        let connection = Connection::new(peer, config.clone());
        connection.open()?;
        Self::start(connection)
    }

    /// Take over the read side of a `Ready` connection.
    pub fn start(connection: Connection) -> Result<Self> {
        if !connection.is_ready() {
            return Err(PeerError::NotReady(connection.state()));
        }
        let reader = connection
            .take_reader()
            .ok_or(PeerError::NotReady(connection.state()))?;

        let connection = Arc::new(connection);
        let pending = Arc::new(PendingTable::new());

        let handle = {
            let connection = Arc::clone(&connection);
            let pending = Arc::clone(&pending);
            thread::Builder::new()
                .name(format!("pure-reader-{}", connection.peer()))
                .spawn(move || read_loop(connection, reader, pending))?
        };

        Ok(Self {
            connection,
            pending,
            reader: Mutex::new(Some(handle)),
        })
    }

    /// Send `text` as a `Query` and wait for its result.
    ///
    /// On timeout the request is forgotten locally; the connection stays
    /// usable and a late reply is discarded.
    pub fn request(&self, text: &str, timeout: Duration) -> Result<SearchResult> {
        let payload = serde_json::to_vec(&QueryPayload {
            q: text.to_string(),
        })
        .map_err(|e| PeerError::ProtocolViolation(format!("unencodable query: {e}")))?;

        let frame = self.call(FrameKind::Query, payload, timeout)?;
        match frame.kind {
            FrameKind::Result => serde_json::from_slice(&frame.payload).map_err(|e| {
                PeerError::ProtocolViolation(format!("malformed result payload: {e}"))
            }),
            FrameKind::Error => Err(PeerError::Remote(frame.payload_text())),
            kind => Err(PeerError::ProtocolViolation(format!(
                "unexpected {kind} in reply to query"
            ))),
        }
    }

    /// Round-trip a `Ping`, returning the time until its `Pong`.
    pub fn ping(&self, timeout: Duration) -> Result<Duration> {
        let started = Instant::now();
        let frame = self.call(FrameKind::Ping, Vec::new(), timeout)?;
        match frame.kind {
            FrameKind::Pong => Ok(started.elapsed()),
            FrameKind::Error => Err(PeerError::Remote(frame.payload_text())),
            kind => Err(PeerError::ProtocolViolation(format!(
                "unexpected {kind} in reply to ping"
            ))),
        }
    }

    fn call(&self, kind: FrameKind, payload: Vec<u8>, timeout: Duration) -> Result<Frame> {
        let (id, rx) = self.pending.register(timeout)?;

        if let Err(e) = self.connection.send(&Frame::new(kind, id, payload)) {
            self.pending.cancel(id);
            return Err(e);
        }
        trace!("sent {kind} id={id} to {}", self.connection.peer());

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                if self.pending.cancel(id) {
                    debug!("request {id} to {} timed out", self.connection.peer());
                    Err(PeerError::Timeout(timeout))
                } else {
                    // resolved concurrently; the slot already holds the outcome
                    rx.recv().unwrap_or(Err(PeerError::ConnectionLost))
                }
            }
            Err(RecvTimeoutError::Disconnected) => Err(PeerError::ConnectionLost),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Close the connection and wait for the reader to exit.
    pub fn close(&self) {
        self.connection.close();
        self.pending.fail_all();
        if let Some(handle) = lock(&self.reader).take() {
            if handle.join().is_err() {
                warn!("reader for {} panicked", self.connection.peer());
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.close();
    }
}

fn read_loop(connection: Arc<Connection>, mut reader: FrameReader, pending: Arc<PendingTable>) {
    let reason = loop {
        match reader.read_frame() {
            Ok(Some(frame)) => {
                connection.touch();
                if let Err(e) = route(&connection, &pending, frame) {
                    break e;
                }
            }
            Ok(None) => break PeerError::ConnectionLost,
            Err(e) => break e,
        }
    };

    connection.fail(&reason);
    pending.fail_all();
    debug!("reader for {} exited: {reason}", connection.peer());
}

fn route(connection: &Connection, pending: &PendingTable, frame: Frame) -> Result<()> {
    match frame.kind {
        FrameKind::Ping => connection.send(&Frame::empty(FrameKind::Pong, frame.id)),
        FrameKind::Result | FrameKind::Error | FrameKind::Pong => {
            let id = frame.id;
            let kind = frame.kind;
            if !pending.fulfill(id, Ok(frame)) {
                warn!(
                    "discarding {kind} id={id} from {}: no pending request",
                    connection.peer()
                );
            }
            Ok(())
        }
        kind @ (FrameKind::Hello | FrameKind::HelloAck | FrameKind::Query) => {
            Err(PeerError::ProtocolViolation(format!(
                "unexpected {kind} id={} on an established connection",
                frame.id
            )))
        }
    }
}
