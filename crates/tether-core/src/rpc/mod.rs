//! Call-processing substrate: per-call method interface, dispatch table,
//! resource handle registry, and exclusive subsystem locks.

pub mod dispatch;
pub mod handles;
pub mod method;
pub mod status;
pub mod subsystem;
