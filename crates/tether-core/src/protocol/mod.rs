//! Protocol module containing wire constants, the binary codec, and the
//! streaming telemetry packet.

pub mod codec;
pub mod controller;
pub mod messages;
pub mod sequence;

pub use codec::{ProtocolError, WireReader, WireScalar};
pub use messages::*;
pub use sequence::SequenceCounter;
