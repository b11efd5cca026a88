//! Peer wire protocol.
//!
//! This module defines the framing used between PURE clients and peers, the
//! incremental decoder that turns a byte stream back into frames, a blocking
//! transport over any `Read + Write` stream, and the responder side that
//! answers queries on behalf of a search backend.
//!
//! # Binary Format
//!
//! Every frame is a fixed 9-byte header followed by the payload:
//!
//! ```text
//! [length: u32 BE][kind: u8][id: u32 BE][payload ...]
//! ```
//!
//! `length` counts `kind + id + payload`, so an empty `Ping` carries a
//! length of 5. All integers are big-endian. Frames longer than the
//! configured maximum (1 MiB by default) are rejected as soon as the header
//! is read.
//!
//! # Exchange
//!
//! - The client opens with `Hello{id: 0}` carrying [`PROTOCOL_VERSION`]; the
//!   peer answers `HelloAck{id: 0}` echoing it, or `Error` and closes.
//! - Each `Query` carries a correlation id; the peer answers with a `Result`
//!   or `Error` carrying the same id, in any order.
//! - Either side may send `Ping`; the other answers `Pong` with the same id.
//!
//! Query payloads are `{"q": "<text>"}`, result payloads are
//! `{"hits": [{"url", "title", "snippet"}]}` and error payloads are plain
//! UTF-8 text.
//!
//! # See Also
//!
//! - [`Dispatcher`](crate::Dispatcher): client-side correlation of replies.
mod codec;
mod frame;
mod server;
mod thread;
mod transport;

use bincode::config::{BigEndian, Configuration, Fixint};

use thread::ThreadPool;

pub use codec::{FrameDecoder, decode};
pub use frame::{Frame, FrameKind, HEADER_SIZE};
pub use server::{DEFAULT_HELLO_TIMEOUT, DEFAULT_IDLE_TIMEOUT, PeerServer};
pub use transport::FrameTransport;

pub(crate) use transport::is_timeout;

/// Version string exchanged in `Hello`/`HelloAck`.
pub const PROTOCOL_VERSION: &str = "pure/1";

/// Default upper bound on a frame's length prefix (1 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 1024 * 1024;

fn wire_config() -> Configuration<BigEndian, Fixint> {
    bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
}
