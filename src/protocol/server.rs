use std::{
    io::{Read, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    sync::Arc,
    time::{Duration, Instant},
};

use log::{debug, info, warn};

use crate::{
    error::{PeerError, Result},
    search::{QueryPayload, SearchBackend},
};

use super::{
    DEFAULT_MAX_FRAME_SIZE, Frame, FrameKind, FrameTransport, PROTOCOL_VERSION, ThreadPool,
    is_timeout,
};

/// Time a client gets to send its Hello.
pub const DEFAULT_HELLO_TIMEOUT: Duration = Duration::from_secs(5);

/// Silence after which an established connection is dropped. Slightly above
/// the client keep-alive so reusable connections are left alone.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(35);

#[derive(Debug, Clone, Copy)]
struct Limits {
    hello: Duration,
    idle: Duration,
}

/// Answers the peer protocol on behalf of a [`SearchBackend`].
///
/// Each connection occupies a pool worker, so connections that stay silent
/// are dropped: before the Hello after the hello timeout, afterwards once
/// idle for the idle timeout.
pub struct PeerServer {
    listener: TcpListener,
    backend: Arc<dyn SearchBackend>,
    pool: ThreadPool,
    limits: Limits,
}

impl PeerServer {
    pub fn bind(address: SocketAddr, backend: Arc<dyn SearchBackend>, workers: usize) -> Result<Self> {
        let listener = TcpListener::bind(address)?;
        Ok(Self {
            listener,
            backend,
            pool: ThreadPool::new(workers)?,
            limits: Limits {
                hello: DEFAULT_HELLO_TIMEOUT,
                idle: DEFAULT_IDLE_TIMEOUT,
            },
        })
    }

    /// Override how long silent connections may hold a worker.
    pub fn with_timeouts(mut self, hello: Duration, idle: Duration) -> Self {
        self.limits = Limits { hello, idle };
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the listener fails.
    pub fn serve(self) -> Result<()> {
        info!(
            "listening at {} with {} workers",
            self.local_addr()?,
            self.pool.size()
        );

        for stream in self.listener.incoming() {
            match stream {
                Ok(stream) => {
                    let backend = Arc::clone(&self.backend);
                    let limits = self.limits;
                    self.pool.execute(move || {
                        let peer = stream
                            .peer_addr()
                            .map(|a| a.to_string())
                            .unwrap_or_else(|_| "unknown".to_string());
                        match handle_connection(stream, backend.as_ref(), limits) {
                            Ok(()) => debug!("connection from {peer} finished"),
                            Err(e) => warn!("connection from {peer} ended: {e}"),
                        }
                    });
                }
                Err(e) => warn!("broken connection: {e:?}"),
            }
        }
        Ok(())
    }
}

fn handle_connection(stream: TcpStream, backend: &dyn SearchBackend, limits: Limits) -> Result<()> {
    stream.set_nodelay(true)?;
    let mut transport = FrameTransport::with_max_frame_size(stream, DEFAULT_MAX_FRAME_SIZE);

    let opening = match transport.read_frame_before(Instant::now() + limits.hello) {
        Ok(Some(frame)) => frame,
        Ok(None) => return Ok(()),
        Err(PeerError::Transport(e)) if is_timeout(&e) => {
            debug!("no hello within {:?}, dropping client", limits.hello);
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    if !accept_hello(&mut transport, opening)? {
        return Ok(());
    }

    // zero disables the idle limit
    let idle = Some(limits.idle).filter(|idle| !idle.is_zero());
    transport.get_ref().set_read_timeout(idle)?;

    loop {
        let frame = match transport.read_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(PeerError::Transport(e)) if is_timeout(&e) => {
                debug!("closing connection idle for {:?}", limits.idle);
                break;
            }
            Err(e) => return Err(e),
        };
        debug!("received {} id={}", frame.kind, frame.id);

        let reply = match frame.kind {
            FrameKind::Ping => Frame::empty(FrameKind::Pong, frame.id),
            FrameKind::Query => answer_query(&frame, backend),
            FrameKind::Hello => {
                transport.write_frame(&Frame::new(
                    FrameKind::Error,
                    frame.id,
                    "duplicate hello",
                ))?;
                return Err(PeerError::ProtocolViolation(
                    "hello on an established connection".to_string(),
                ));
            }
            kind @ (FrameKind::HelloAck | FrameKind::Result | FrameKind::Error | FrameKind::Pong) => {
                warn!("ignoring unsolicited {kind} id={}", frame.id);
                continue;
            }
        };

        transport.write_frame(&reply)?;
    }

    Ok(())
}

/// Answer the opening frame. Returns false if the client was turned away.
fn accept_hello<T: Read + Write>(transport: &mut FrameTransport<T>, frame: Frame) -> Result<bool> {
    let refusal = match frame.kind {
        FrameKind::Hello if frame.payload == PROTOCOL_VERSION.as_bytes() => None,
        FrameKind::Hello => Some(format!(
            "incompatible protocol version '{}', expected '{PROTOCOL_VERSION}'",
            frame.payload_text()
        )),
        kind => Some(format!("malformed handshake: expected Hello, got {kind}")),
    };

    match refusal {
        None => {
            transport.write_frame(&Frame::new(FrameKind::HelloAck, 0, PROTOCOL_VERSION))?;
            Ok(true)
        }
        Some(reason) => {
            warn!("refusing client: {reason}");
            transport.write_frame(&Frame::new(FrameKind::Error, frame.id, reason))?;
            Ok(false)
        }
    }
}

fn answer_query(frame: &Frame, backend: &dyn SearchBackend) -> Frame {
    let query: QueryPayload = match serde_json::from_slice(&frame.payload) {
        Ok(query) => query,
        Err(e) => {
            return Frame::new(
                FrameKind::Error,
                frame.id,
                format!("malformed query payload: {e}"),
            );
        }
    };

    let result = backend
        .search(&query.q)
        .map_err(|e| e.to_string())
        .and_then(|result| serde_json::to_vec(&result).map_err(|e| e.to_string()));

    match result {
        Ok(payload) => Frame::new(FrameKind::Result, frame.id, payload),
        Err(reason) => {
            warn!("query '{}' failed: {reason}", query.q);
            Frame::new(FrameKind::Error, frame.id, reason)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Seek, SeekFrom};

    use super::*;
    use crate::search::{LocalIndex, SearchError, SearchResult};

    struct Broken;

    impl SearchBackend for Broken {
        fn search(&self, _text: &str) -> std::result::Result<SearchResult, SearchError> {
            Err(SearchError::NotJson("backend offline".to_string()))
        }
    }

    /// Answer `opening` and return the single reply frame written.
    fn reply_to(opening: Frame) -> (bool, Frame) {
        let mut transport = FrameTransport::new(Cursor::new(Vec::new()));
        let accepted = accept_hello(&mut transport, opening).unwrap();

        let mut written = transport.get_ref().clone();
        written.seek(SeekFrom::Start(0)).unwrap();
        let reply = FrameTransport::new(written).read_frame().unwrap().unwrap();
        (accepted, reply)
    }

    #[test]
    fn hello_is_acknowledged() {
        let (accepted, reply) = reply_to(Frame::new(FrameKind::Hello, 0, PROTOCOL_VERSION));
        assert!(accepted);
        assert_eq!(reply.kind, FrameKind::HelloAck);
        assert_eq!(reply.id, 0);
        assert_eq!(reply.payload_text(), PROTOCOL_VERSION);
    }

    #[test]
    fn wrong_version_is_refused() {
        let (accepted, reply) = reply_to(Frame::new(FrameKind::Hello, 0, "pure/0"));
        assert!(!accepted);
        assert_eq!(reply.kind, FrameKind::Error);
        assert!(reply.payload_text().contains("incompatible protocol version"));
    }

    #[test]
    fn non_hello_opening_is_refused() {
        let (accepted, reply) = reply_to(Frame::empty(FrameKind::Ping, 1));
        assert!(!accepted);
        assert_eq!(reply.kind, FrameKind::Error);
        assert_eq!(reply.id, 1);
    }

    #[test]
    fn query_is_answered_from_backend() {
        let frame = Frame::new(FrameKind::Query, 7, r#"{"q":"cats"}"#);
        let reply = answer_query(&frame, &LocalIndex);

        assert_eq!(reply.kind, FrameKind::Result);
        assert_eq!(reply.id, 7);
        let result: SearchResult = serde_json::from_slice(&reply.payload).unwrap();
        assert_eq!(result.hits[0].title, "Local result for cats");
    }

    #[test]
    fn backend_failure_becomes_error_frame() {
        let frame = Frame::new(FrameKind::Query, 8, r#"{"q":"cats"}"#);
        let reply = answer_query(&frame, &Broken);

        assert_eq!(reply.kind, FrameKind::Error);
        assert_eq!(reply.id, 8);
        assert_eq!(reply.payload_text(), "backend offline");
    }

    #[test]
    fn malformed_query_becomes_error_frame() {
        let frame = Frame::new(FrameKind::Query, 9, "cats");
        let reply = answer_query(&frame, &LocalIndex);

        assert_eq!(reply.kind, FrameKind::Error);
        assert!(reply.payload_text().starts_with("malformed query payload"));
    }
}
