//! Scripted peers for exercising the client over real sockets.
#![allow(dead_code)]

use std::{
    io::Write,
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use pure::{
    ClientConfig, Hit, LocalIndex, SearchResult,
    protocol::{Frame, FrameKind, FrameTransport, PROTOCOL_VERSION, PeerServer},
    search::QueryPayload,
};

/// One accepted connection, seen from the peer's side.
pub struct PeerSide {
    transport: FrameTransport<TcpStream>,
}

impl PeerSide {
    /// Read the client's Hello and acknowledge it.
    pub fn accept_hello(&mut self) {
        let hello = self.read().expect("client sent no hello");
        assert_eq!(hello.kind, FrameKind::Hello);
        assert_eq!(hello.id, 0);
        assert_eq!(&hello.payload[..], PROTOCOL_VERSION.as_bytes());
        self.write(Frame::new(FrameKind::HelloAck, 0, PROTOCOL_VERSION));
    }

    pub fn read(&mut self) -> Option<Frame> {
        self.transport.read_frame().ok().flatten()
    }

    pub fn write(&mut self, frame: Frame) {
        let _ = self.transport.write_frame(&frame);
    }

    pub fn write_raw(&mut self, bytes: &[u8]) {
        let mut stream = self.transport.get_ref();
        let _ = stream.write_all(bytes);
    }

    /// Answer queries with `result` until the client goes away.
    pub fn serve(&mut self, result: &SearchResult) {
        while let Some(frame) = self.read() {
            match frame.kind {
                FrameKind::Query => self.write(result_frame(frame.id, result)),
                FrameKind::Ping => self.write(Frame::empty(FrameKind::Pong, frame.id)),
                _ => {}
            }
        }
    }
}

pub fn result_frame(id: u32, result: &SearchResult) -> Frame {
    Frame::new(
        FrameKind::Result,
        id,
        serde_json::to_vec(result).expect("result serializes"),
    )
}

pub fn query_text(frame: &Frame) -> String {
    let query: QueryPayload = serde_json::from_slice(&frame.payload).expect("query payload");
    query.q
}

pub fn single_hit() -> SearchResult {
    SearchResult {
        hits: vec![Hit::new("http://a", "A", "s")],
    }
}

/// Listener running `script` once per accepted connection.
pub struct FakePeer {
    addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
}

impl FakePeer {
    pub fn spawn<F>(script: F) -> Self
    where
        F: Fn(usize, PeerSide) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake peer");
        let addr = listener.local_addr().expect("local addr");
        let accepted = Arc::new(AtomicUsize::new(0));
        let script = Arc::new(script);

        {
            let accepted = Arc::clone(&accepted);
            thread::spawn(move || {
                for stream in listener.incoming() {
                    let Ok(stream) = stream else { continue };
                    let index = accepted.fetch_add(1, Ordering::SeqCst);
                    let script = Arc::clone(&script);
                    thread::spawn(move || {
                        script(
                            index,
                            PeerSide {
                                transport: FrameTransport::new(stream),
                            },
                        )
                    });
                }
            });
        }

        Self { addr, accepted }
    }

    /// A peer that acknowledges the handshake and answers every query with `result`.
    pub fn answering(result: SearchResult) -> Self {
        Self::spawn(move |_, mut peer| {
            peer.accept_hello();
            peer.serve(&result);
        })
    }

    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

/// A real responder backed by the local demo index.
pub fn spawn_local_server() -> SocketAddr {
    let server = PeerServer::bind(
        "127.0.0.1:0".parse().expect("socket addr"),
        Arc::new(LocalIndex),
        4,
    )
    .expect("bind peer server");
    run_server(server)
}

/// Local responder with `workers` workers and short silence limits.
pub fn spawn_strict_server(workers: usize, hello: Duration, idle: Duration) -> SocketAddr {
    let server = PeerServer::bind(
        "127.0.0.1:0".parse().expect("socket addr"),
        Arc::new(LocalIndex),
        workers,
    )
    .expect("bind peer server")
    .with_timeouts(hello, idle);
    run_server(server)
}

fn run_server(server: PeerServer) -> SocketAddr {
    let addr = server.local_addr().expect("local addr");
    thread::spawn(move || server.serve());
    addr
}

/// Config with short timeouts so failure paths resolve quickly.
pub fn fast_config() -> ClientConfig {
    ClientConfig {
        connect_timeout: Duration::from_millis(500),
        handshake_timeout: Duration::from_millis(300),
        request_timeout: Duration::from_millis(500),
        ..ClientConfig::default()
    }
}
