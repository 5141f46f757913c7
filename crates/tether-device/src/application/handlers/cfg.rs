//! System configuration handlers.

use tether_core::{MethodInterface, StatusCode};

use super::non_negative;
use crate::application::session::Session;

/// `CFGU_GetConfigInfoBlk2`: slot 0 is `size` bytes of configuration block
/// `block_id`.
pub fn get_config_info_blk2(mi: &mut MethodInterface<'_>, session: &Session) {
    let Some(block_id) = mi.get_parameter::<i32>() else { return };
    let Some(size) = mi.get_parameter::<i32>() else { return };
    if !mi.finish_input_parameters() {
        return;
    }
    let Some(size) = non_negative(mi, size) else { return };

    let read = session.services().config_blocks.with(|cfg| {
        let Some(buf) = mi.reserve_result_buffer(0, size) else {
            return;
        };
        let status = cfg.read_block(block_id as u32, buf);
        if status.is_failure() {
            mi.resize_last_result_buffer(0);
        }
        mi.finish_good(status);
    });
    if let Err(status) = read {
        mi.finish_good(status);
    }
}
