//! Title management handlers.
//!
//! The title-management subsystem is initialised and released around every
//! call, under one lock shared by all sessions.

use tether_core::{MethodInterface, StatusCode};

use super::{finish_with, non_negative};
use crate::application::session::Session;

/// `AM_GetTitleCount`: slot 0 is the number of titles on a media (u32).
pub fn get_title_count(mi: &mut MethodInterface<'_>, session: &Session) {
    let Some(media) = mi.get_parameter::<i8>() else { return };
    if !mi.finish_input_parameters() {
        return;
    }

    let result = session
        .services()
        .titles
        .with(|am| am.title_count(media))
        .and_then(|count| count);
    finish_with(mi, result.map(u32::to_le_bytes));
}

/// `AM_GetTitleList`: slot 0 holds up to `count` title ids (u64 each), shrunk
/// to the number actually listed.
pub fn get_title_list(mi: &mut MethodInterface<'_>, session: &Session) {
    let Some(count) = mi.get_parameter::<i32>() else { return };
    let Some(media) = mi.get_parameter::<i8>() else { return };
    if !mi.finish_input_parameters() {
        return;
    }
    let Some(count) = non_negative(mi, count) else { return };

    // Reserve before taking the subsystem lock so an oversized request is
    // refused without touching the service.
    let Some(buf) = mi.reserve_result_buffer(0, count.saturating_mul(8)) else { return };

    let listed = session
        .services()
        .titles
        .with(|am| am.title_list(media, count))
        .and_then(|list| list);
    match listed {
        Ok(ids) => {
            let mut written = 0;
            for (chunk, id) in buf.chunks_exact_mut(8).zip(&ids) {
                chunk.copy_from_slice(&id.to_le_bytes());
                written += 8;
            }
            mi.resize_last_result_buffer(written);
            mi.finish_good(StatusCode::SUCCESS);
        }
        Err(status) => {
            mi.resize_last_result_buffer(0);
            mi.finish_good(status);
        }
    }
}
