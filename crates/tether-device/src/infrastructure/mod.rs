//! Infrastructure layer for the device server.
//!
//! Contains OS-facing adapters: native service seams, the UDP controller
//! stream, the TCP main channel, and configuration file storage.
//!
//! **Dependency rule**: this layer may depend on `tether_core`, but MUST NOT
//! import from `application`, except for the network server, which hosts
//! sessions.

pub mod native;
pub mod network;
pub mod storage;
pub mod streaming;
