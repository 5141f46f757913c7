//! Network infrastructure for the device server.
//!
//! # Sub-modules
//!
//! - **`server`** – Accepts the peer's TCP connection, exchanges the session
//!   hello, and runs the request/reply loop, handing each request to the
//!   dispatch table on a blocking worker.  When the connection ends (or the
//!   server shuts down) the session is torn down so no handle or stream
//!   outlives the peer.

pub mod server;
