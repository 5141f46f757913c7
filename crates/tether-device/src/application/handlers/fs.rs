//! Filesystem handlers: archives, files, and directories.
//!
//! Archives travel as signed 64-bit parameters and file/directory handles as
//! signed 32-bit parameters; both are reinterpreted bit-for-bit.  Every handle
//! a handler hands to the peer is registered with the session so teardown
//! can close it, and every close unregisters it again, whatever the native
//! close returns.

use tether_core::{HandleKind, MethodInterface, StatusCode};
use tracing::warn;

use super::{finish_with, native_handle, non_negative, read_path};
use crate::application::session::Session;
use crate::infrastructure::native::{FileSystem, DIRECTORY_ENTRY_SIZE};

/// Largest output `FSUSER_ControlArchive` will produce.
pub const CONTROL_ARCHIVE_MAX_OUTPUT: usize = 0x1000;

fn fs(session: &Session) -> &dyn FileSystem {
    session.services().fs.as_ref()
}

fn unsigned64(mi: &mut MethodInterface<'_>, value: i64) -> Option<u64> {
    match u64::try_from(value) {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(method = mi.method_name(), value, "negative size from peer");
            mi.finish_internal_error();
            None
        }
    }
}

// ── Archives ──────────────────────────────────────────────────────────────────

/// `FSUSER_OpenFileDirectly`: opens a file without a separate archive handle.
pub fn open_file_directly(mi: &mut MethodInterface<'_>, session: &Session) {
    let Some(archive_id) = mi.get_parameter::<i32>() else { return };
    let Some(archive_path) = read_path(mi) else { return };
    let Some(file_path) = read_path(mi) else { return };
    let Some(flags) = mi.get_parameter::<i32>() else { return };
    let Some(attributes) = mi.get_parameter::<i32>() else { return };
    if !mi.finish_input_parameters() {
        return;
    }

    let fs = fs(session);
    let handle = match fs.open_file_directly(
        archive_id as u32,
        &archive_path,
        &file_path,
        flags as u32,
        attributes as u32,
    ) {
        Ok(handle) => handle,
        Err(status) => return mi.finish_good(status),
    };

    let Some(slot) = mi.reserve_result_buffer(0, 4) else {
        fs.close_file(handle);
        return;
    };
    slot.copy_from_slice(&handle.to_le_bytes());
    session.handles().register(u64::from(handle), HandleKind::File);
    mi.finish_good(StatusCode::SUCCESS);
}

/// `FSUSER_OpenArchive`
pub fn open_archive(mi: &mut MethodInterface<'_>, session: &Session) {
    let Some(archive_id) = mi.get_parameter::<i32>() else { return };
    let Some(path) = read_path(mi) else { return };
    if !mi.finish_input_parameters() {
        return;
    }

    let fs = fs(session);
    let archive = match fs.open_archive(archive_id as u32, &path) {
        Ok(archive) => archive,
        Err(status) => return mi.finish_good(status),
    };

    let Some(slot) = mi.reserve_result_buffer(0, 8) else {
        fs.close_archive(archive);
        return;
    };
    slot.copy_from_slice(&archive.to_le_bytes());
    session.handles().register(archive, HandleKind::Archive);
    mi.finish_good(StatusCode::SUCCESS);
}

/// `FSUSER_CloseArchive`
pub fn close_archive(mi: &mut MethodInterface<'_>, session: &Session) {
    let Some(archive) = mi.get_parameter::<i64>() else { return };
    if !mi.finish_input_parameters() {
        return;
    }

    let archive = archive as u64;
    let fs = fs(session);
    let status = session
        .handles()
        .close_with(archive, |_| fs.close_archive(archive))
        .unwrap_or_else(|| fs.close_archive(archive));
    mi.finish_good(status);
}

/// `FSUSER_GetFreeBytes`: slot 0 is the free space (u64).
pub fn get_free_bytes(mi: &mut MethodInterface<'_>, session: &Session) {
    let Some(archive) = mi.get_parameter::<i64>() else { return };
    if !mi.finish_input_parameters() {
        return;
    }
    finish_with(mi, fs(session).free_bytes(archive as u64).map(u64::to_le_bytes));
}

/// `FSUSER_ControlArchive`: slot 0 is the action's output, `output_size`
/// bytes long, sent alongside whatever status the action returned.
pub fn control_archive(mi: &mut MethodInterface<'_>, session: &Session) {
    let Some(archive) = mi.get_parameter::<i64>() else { return };
    let Some(action) = mi.get_parameter::<i32>() else { return };
    let Some(input) = mi.get_parameter_buffer() else { return };
    let Some(output_size) = mi.get_parameter::<i32>() else { return };
    if !mi.finish_input_parameters() {
        return;
    }
    let Some(output_size) = non_negative(mi, output_size) else { return };
    if output_size > CONTROL_ARCHIVE_MAX_OUTPUT {
        warn!(output_size, "archive control output too large");
        return mi.finish_internal_error();
    }

    // The input borrows the request body, so the output needs its own buffer.
    let mut output = vec![0u8; output_size];
    let status = fs(session).control_archive(archive as u64, action as u32, input, &mut output);

    let Some(slot) = mi.reserve_result_buffer(0, output_size) else { return };
    slot.copy_from_slice(&output);
    mi.finish_good(status);
}

// ── Files by path ─────────────────────────────────────────────────────────────

/// `FSUSER_OpenFile`: slot 0 is the handle; slot 1 is the file size when the
/// size query succeeds.
pub fn open_file(mi: &mut MethodInterface<'_>, session: &Session) {
    let Some(archive) = mi.get_parameter::<i64>() else { return };
    let Some(path) = read_path(mi) else { return };
    let Some(flags) = mi.get_parameter::<i32>() else { return };
    let Some(attributes) = mi.get_parameter::<i32>() else { return };
    if !mi.finish_input_parameters() {
        return;
    }

    let fs = fs(session);
    let handle = match fs.open_file(archive as u64, &path, flags as u32, attributes as u32) {
        Ok(handle) => handle,
        Err(status) => return mi.finish_good(status),
    };

    let Some(slot) = mi.reserve_result_buffer(0, 4) else {
        fs.close_file(handle);
        return;
    };
    slot.copy_from_slice(&handle.to_le_bytes());

    // The peer always asks for the size next; save it the round trip.
    if let Ok(size) = fs.file_size(handle) {
        let Some(slot) = mi.reserve_result_buffer(1, 8) else {
            fs.close_file(handle);
            return;
        };
        slot.copy_from_slice(&size.to_le_bytes());
    }

    session.handles().register(u64::from(handle), HandleKind::File);
    mi.finish_good(StatusCode::SUCCESS);
}

/// `FSUSER_CreateFile`
pub fn create_file(mi: &mut MethodInterface<'_>, session: &Session) {
    let Some(archive) = mi.get_parameter::<i64>() else { return };
    let Some(path) = read_path(mi) else { return };
    let Some(attributes) = mi.get_parameter::<i32>() else { return };
    let Some(size) = mi.get_parameter::<i64>() else { return };
    if !mi.finish_input_parameters() {
        return;
    }
    let Some(size) = unsigned64(mi, size) else { return };

    let status = fs(session).create_file(archive as u64, &path, attributes as u32, size);
    mi.finish_good(status);
}

/// `FSUSER_DeleteFile`
pub fn delete_file(mi: &mut MethodInterface<'_>, session: &Session) {
    let Some(archive) = mi.get_parameter::<i64>() else { return };
    let Some(path) = read_path(mi) else { return };
    if !mi.finish_input_parameters() {
        return;
    }
    let status = fs(session).delete_file(archive as u64, &path);
    mi.finish_good(status);
}

/// `FSUSER_RenameFile`
pub fn rename_file(mi: &mut MethodInterface<'_>, session: &Session) {
    let Some(src_archive) = mi.get_parameter::<i64>() else { return };
    let Some(src) = read_path(mi) else { return };
    let Some(dst_archive) = mi.get_parameter::<i64>() else { return };
    let Some(dst) = read_path(mi) else { return };
    if !mi.finish_input_parameters() {
        return;
    }
    let status = fs(session).rename_file(src_archive as u64, &src, dst_archive as u64, &dst);
    mi.finish_good(status);
}

// ── Directories by path ───────────────────────────────────────────────────────

/// `FSUSER_OpenDirectory`
pub fn open_directory(mi: &mut MethodInterface<'_>, session: &Session) {
    let Some(archive) = mi.get_parameter::<i64>() else { return };
    let Some(path) = read_path(mi) else { return };
    if !mi.finish_input_parameters() {
        return;
    }

    let fs = fs(session);
    let handle = match fs.open_directory(archive as u64, &path) {
        Ok(handle) => handle,
        Err(status) => return mi.finish_good(status),
    };

    let Some(slot) = mi.reserve_result_buffer(0, 4) else {
        fs.close_directory(handle);
        return;
    };
    slot.copy_from_slice(&handle.to_le_bytes());
    session.handles().register(u64::from(handle), HandleKind::Directory);
    mi.finish_good(StatusCode::SUCCESS);
}

/// `FSUSER_CreateDirectory`
pub fn create_directory(mi: &mut MethodInterface<'_>, session: &Session) {
    let Some(archive) = mi.get_parameter::<i64>() else { return };
    let Some(path) = read_path(mi) else { return };
    let Some(attributes) = mi.get_parameter::<i32>() else { return };
    if !mi.finish_input_parameters() {
        return;
    }
    let status = fs(session).create_directory(archive as u64, &path, attributes as u32);
    mi.finish_good(status);
}

fn delete_directory_with(mi: &mut MethodInterface<'_>, session: &Session, recursive: bool) {
    let Some(archive) = mi.get_parameter::<i64>() else { return };
    let Some(path) = read_path(mi) else { return };
    if !mi.finish_input_parameters() {
        return;
    }
    let status = fs(session).delete_directory(archive as u64, &path, recursive);
    mi.finish_good(status);
}

/// `FSUSER_DeleteDirectory`: fails on a non-empty directory.
pub fn delete_directory(mi: &mut MethodInterface<'_>, session: &Session) {
    delete_directory_with(mi, session, false);
}

/// `FSUSER_DeleteDirectoryRec`
pub fn delete_directory_recursively(mi: &mut MethodInterface<'_>, session: &Session) {
    delete_directory_with(mi, session, true);
}

/// `FSUSER_RenameDirectory`
pub fn rename_directory(mi: &mut MethodInterface<'_>, session: &Session) {
    let Some(src_archive) = mi.get_parameter::<i64>() else { return };
    let Some(src) = read_path(mi) else { return };
    let Some(dst_archive) = mi.get_parameter::<i64>() else { return };
    let Some(dst) = read_path(mi) else { return };
    if !mi.finish_input_parameters() {
        return;
    }
    let status =
        fs(session).rename_directory(src_archive as u64, &src, dst_archive as u64, &dst);
    mi.finish_good(status);
}

// ── Open files ────────────────────────────────────────────────────────────────

/// `FSFILE_Close`
pub fn file_close(mi: &mut MethodInterface<'_>, session: &Session) {
    let Some(handle) = mi.get_parameter::<i32>() else { return };
    if !mi.finish_input_parameters() {
        return;
    }

    let handle = native_handle(handle);
    let fs = fs(session);
    let status = session
        .handles()
        .close_with(u64::from(handle), |_| fs.close_file(handle))
        .unwrap_or_else(|| fs.close_file(handle));
    mi.finish_good(status);
}

/// `FSFILE_Read`: slot 0 holds the bytes actually read.
pub fn file_read(mi: &mut MethodInterface<'_>, session: &Session) {
    let Some(handle) = mi.get_parameter::<i32>() else { return };
    let Some(offset) = mi.get_parameter::<i64>() else { return };
    let Some(size) = mi.get_parameter::<i32>() else { return };
    if !mi.finish_input_parameters() {
        return;
    }
    let Some(size) = non_negative(mi, size) else { return };
    let Some(offset) = unsigned64(mi, offset) else { return };

    let Some(buf) = mi.reserve_result_buffer(0, size) else { return };
    match fs(session).read_file(native_handle(handle), offset, buf) {
        Ok(read) => {
            mi.resize_last_result_buffer(read);
            mi.finish_good(StatusCode::SUCCESS);
        }
        Err(status) => {
            mi.resize_last_result_buffer(0);
            mi.finish_good(status);
        }
    }
}

/// `FSFILE_Write`: slot 0 is the byte count written (u32).  The declared size
/// must equal the data buffer's length.
pub fn file_write(mi: &mut MethodInterface<'_>, session: &Session) {
    let Some(handle) = mi.get_parameter::<i32>() else { return };
    let Some(offset) = mi.get_parameter::<i64>() else { return };
    let Some(size) = mi.get_parameter::<i32>() else { return };
    let Some(flags) = mi.get_parameter::<i32>() else { return };
    let Some(data) = mi.get_parameter_buffer() else { return };
    if !mi.finish_input_parameters() {
        return;
    }
    let Some(size) = non_negative(mi, size) else { return };
    let Some(offset) = unsigned64(mi, offset) else { return };
    if size != data.len() {
        warn!(size, len = data.len(), "write size disagrees with data buffer");
        return mi.finish_internal_error();
    }

    let result = fs(session).write_file(native_handle(handle), offset, data, flags as u32);
    finish_with(mi, result.map(|written| (written as u32).to_le_bytes()));
}

/// `FSFILE_GetSize`
pub fn file_get_size(mi: &mut MethodInterface<'_>, session: &Session) {
    let Some(handle) = mi.get_parameter::<i32>() else { return };
    if !mi.finish_input_parameters() {
        return;
    }
    finish_with(mi, fs(session).file_size(native_handle(handle)).map(u64::to_le_bytes));
}

/// `FSFILE_SetSize`
pub fn file_set_size(mi: &mut MethodInterface<'_>, session: &Session) {
    let Some(handle) = mi.get_parameter::<i32>() else { return };
    let Some(size) = mi.get_parameter::<i64>() else { return };
    if !mi.finish_input_parameters() {
        return;
    }
    let Some(size) = unsigned64(mi, size) else { return };
    let status = fs(session).set_file_size(native_handle(handle), size);
    mi.finish_good(status);
}

/// `FSFILE_GetAttributes`
pub fn file_get_attributes(mi: &mut MethodInterface<'_>, session: &Session) {
    let Some(handle) = mi.get_parameter::<i32>() else { return };
    if !mi.finish_input_parameters() {
        return;
    }
    let result = fs(session).file_attributes(native_handle(handle));
    finish_with(mi, result.map(u32::to_le_bytes));
}

/// `FSFILE_SetAttributes`
pub fn file_set_attributes(mi: &mut MethodInterface<'_>, session: &Session) {
    let Some(handle) = mi.get_parameter::<i32>() else { return };
    let Some(attributes) = mi.get_parameter::<i32>() else { return };
    if !mi.finish_input_parameters() {
        return;
    }
    let status = fs(session).set_file_attributes(native_handle(handle), attributes as u32);
    mi.finish_good(status);
}

/// `FSFILE_Flush`
pub fn file_flush(mi: &mut MethodInterface<'_>, session: &Session) {
    let Some(handle) = mi.get_parameter::<i32>() else { return };
    if !mi.finish_input_parameters() {
        return;
    }
    let status = fs(session).flush_file(native_handle(handle));
    mi.finish_good(status);
}

// ── Open directories ──────────────────────────────────────────────────────────

/// `FSDIR_Read`: slot 0 holds whole 0x228-byte entries, shrunk to the number
/// actually read.
pub fn dir_read(mi: &mut MethodInterface<'_>, session: &Session) {
    let Some(handle) = mi.get_parameter::<i32>() else { return };
    let Some(count) = mi.get_parameter::<i32>() else { return };
    if !mi.finish_input_parameters() {
        return;
    }
    let Some(count) = non_negative(mi, count) else { return };

    let Some(buf) = mi.reserve_result_buffer(0, count.saturating_mul(DIRECTORY_ENTRY_SIZE)) else {
        return;
    };
    match fs(session).read_directory(native_handle(handle), count) {
        Ok(entries) => {
            let mut written = 0;
            for (chunk, entry) in buf.chunks_exact_mut(DIRECTORY_ENTRY_SIZE).zip(&entries) {
                if let Ok(record) = <&mut [u8; DIRECTORY_ENTRY_SIZE]>::try_from(chunk) {
                    entry.encode_into(record);
                    written += 1;
                }
            }
            mi.resize_last_result_buffer(written * DIRECTORY_ENTRY_SIZE);
            mi.finish_good(StatusCode::SUCCESS);
        }
        Err(status) => {
            mi.resize_last_result_buffer(0);
            mi.finish_good(status);
        }
    }
}

/// `FSDIR_Close`
pub fn dir_close(mi: &mut MethodInterface<'_>, session: &Session) {
    let Some(handle) = mi.get_parameter::<i32>() else { return };
    if !mi.finish_input_parameters() {
        return;
    }

    let handle = native_handle(handle);
    let fs = fs(session);
    let status = session
        .handles()
        .close_with(u64::from(handle), |_| fs.close_directory(handle))
        .unwrap_or_else(|| fs.close_directory(handle));
    mi.finish_good(status);
}

// ── Tests ─────────────────────────────────────────────────────────────────────
