//! Controller stream control.

use tether_core::{MethodInterface, StatusCode};
use tracing::{info, warn};

use crate::application::session::Session;

/// `#ArticController`: (re)starts the controller stream.
///
/// Slot 0 is the UDP port (s32) the peer must send its handshake datagram
/// to.  If the port cannot be bound the call finishes with
/// [`StatusCode::STREAM_UNAVAILABLE`] and no buffer.
pub fn start_controller(mi: &mut MethodInterface<'_>, session: &Session) {
    if !mi.finish_input_parameters() {
        return;
    }

    let port = match session.start_streaming() {
        Ok(port) => port,
        Err(e) => {
            warn!(session = %session.id(), error = %e, "controller stream unavailable");
            return mi.finish_good(StatusCode::STREAM_UNAVAILABLE);
        }
    };

    let Some(slot) = mi.reserve_result_buffer(0, 4) else {
        // The peer will never learn the port.
        session.stop_streaming();
        return;
    };
    slot.copy_from_slice(&i32::from(port).to_le_bytes());
    info!(session = %session.id(), port, "controller stream started");
    mi.finish_good(StatusCode::SUCCESS);
}
