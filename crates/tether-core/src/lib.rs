//! # tether-core
//!
//! Shared library for Tether containing the RPC wire codec, the per-call
//! method interface, the dispatch table, and the resource handle registry.
//!
//! This crate has zero dependencies on OS APIs, threads, or network sockets.
//! The device-side server (`tether-device`) wires it to real sockets and to
//! the native service seams.
//!
//! # Architecture overview (for beginners)
//!
//! Tether lets a remote peer call a fixed set of OS services on an embedded
//! device as if they were local.  Every call travels as one request frame and
//! comes back as exactly one reply frame.
//!
//! This crate (`tether-core`) is the substrate every call flows through:
//!
//! - **`protocol`** – How bytes travel over the network.  Requests carry a
//!   32-byte ASCII method name followed by strictly typed, strictly ordered
//!   parameters; replies carry an outcome, a status code, and zero or more
//!   result buffers.  The streaming telemetry packet layout also lives here.
//!
//! - **`rpc`** – What happens to a decoded request.  The [`DispatchTable`]
//!   finds the handler, the [`MethodInterface`] hands it typed parameters and
//!   result buffers, and the [`HandleRegistry`] remembers every OS handle the
//!   peer can see so they can all be closed when the peer disappears.

pub mod protocol;
pub mod rpc;

// Re-export the most-used types at the crate root so callers can write
// `tether_core::MethodInterface` instead of `tether_core::rpc::method::MethodInterface`.
pub use protocol::codec::{
    decode_hello, decode_reply, decode_request_header, encode_hello, ProtocolError,
    RequestBuilder,
};
pub use protocol::controller::{ControllerPacket, ControllerState};
pub use protocol::messages::{ReplyOutcome, RequestHeader, SessionHello};
pub use rpc::dispatch::{DispatchError, DispatchTable, DispatchTableBuilder, MethodHandler};
pub use rpc::handles::{HandleCloser, HandleKind, HandleRegistry};
pub use rpc::method::{CallOutcome, MethodInterface};
pub use rpc::status::StatusCode;
pub use rpc::subsystem::{ExclusiveSubsystem, Subsystem};
