//! Method handlers, grouped by native service.
//!
//! Every handler follows the same shape:
//!
//! 1. Read parameters in declaration order.  A failed read has already ended
//!    the call as a protocol error, so the handler just returns.
//! 2. `finish_input_parameters()`.
//! 3. Call the native service.  A failing status is a domain result: finish
//!    good with that status and no buffers.
//! 4. Reserve result buffers in slot order and fill them.  A failed
//!    reservation has already aborted the call; release anything the native
//!    call opened and return.
//! 5. `finish_good(status)`.

pub mod am;
pub mod cfg;
pub mod fs;
pub mod hid;
pub mod process;
pub mod stream;

use tether_core::{MethodInterface, StatusCode};
use tracing::warn;

use crate::infrastructure::native::FsPath;

/// Reads a path buffer parameter.
///
/// A buffer whose size prefix disagrees with its length ends the call as an
/// internal error.  `None` means the call is over.
pub(crate) fn read_path<'a>(mi: &mut MethodInterface<'a>) -> Option<FsPath<'a>> {
    let buf = mi.get_parameter_buffer()?;
    match FsPath::parse(buf) {
        Some(path) => Some(path),
        None => {
            warn!(method = mi.method_name(), len = buf.len(), "malformed path buffer");
            mi.finish_internal_error();
            None
        }
    }
}

/// Converts a peer-supplied size or count; negative values end the call as
/// an internal error.
pub(crate) fn non_negative(mi: &mut MethodInterface<'_>, value: i32) -> Option<usize> {
    match usize::try_from(value) {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(method = mi.method_name(), value, "negative size from peer");
            mi.finish_internal_error();
            None
        }
    }
}

/// Finishes with `bytes` in slot 0, or with the failing status and no buffer.
pub(crate) fn finish_with<B: AsRef<[u8]>>(
    mi: &mut MethodInterface<'_>,
    result: Result<B, StatusCode>,
) {
    match result {
        Ok(bytes) => {
            let bytes = bytes.as_ref();
            let Some(slot) = mi.reserve_result_buffer(0, bytes.len()) else {
                return;
            };
            slot.copy_from_slice(bytes);
            mi.finish_good(StatusCode::SUCCESS);
        }
        Err(status) => mi.finish_good(status),
    }
}

/// Native file and directory handles travel as 32-bit signed parameters.
pub(crate) fn native_handle(value: i32) -> u32 {
    value as u32
}
