//! Application layer: what a connection can do on the device.
//!
//! # Sub-modules
//!
//! - **`session`**  – Per-connection state: the handles the peer has opened
//!   and the controller stream it started.  Its `teardown` releases both
//!   when the connection ends.
//!
//! - **`methods`**  – Builds the dispatch table that maps every wire method
//!   name to its handler.
//!
//! - **`handlers`** – The handlers themselves, grouped by the native service
//!   they forward to.  Each one reads its parameters, calls the service
//!   through the seams in `infrastructure::native`, and reports results
//!   through the `MethodInterface`.

pub mod handlers;
pub mod methods;
pub mod session;
