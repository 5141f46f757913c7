//! Process information: identity, extended header, code, and ExeFS sections.

use tether_core::{MethodInterface, StatusCode};
use tracing::{error, warn};

use super::{finish_with, non_negative};
use crate::application::session::Session;
use crate::infrastructure::native::{ExeFsSection, FsPath, PathType, ARCHIVE_ROMFS, OPEN_READ};

/// `Process_GetTitleID`: slot 0 is the running title id (u64).
pub fn get_title_id(mi: &mut MethodInterface<'_>, session: &Session) {
    if !mi.finish_input_parameters() {
        return;
    }
    let title_id = session.services().process.title_id();
    finish_with(mi, Ok::<_, StatusCode>(title_id.to_le_bytes()));
}

/// `Process_GetProductInfo`: slot 0 is the 0x14-byte product record.
pub fn get_product_info(mi: &mut MethodInterface<'_>, session: &Session) {
    if !mi.finish_input_parameters() {
        return;
    }
    match session.services().process.product_info() {
        Ok(info) => finish_with(mi, Ok::<_, StatusCode>(info.encode())),
        Err(status) => {
            error!(status = %status, "product info query failed");
            mi.finish_internal_error();
        }
    }
}

/// `Process_GetExheader`: slot 0 is the extended header captured at startup.
pub fn get_exheader(mi: &mut MethodInterface<'_>, session: &Session) {
    if !mi.finish_input_parameters() {
        return;
    }
    match &session.services().program_info {
        Some(info) => finish_with(mi, Ok::<_, StatusCode>(&info[..])),
        None => {
            error!("extended header was never captured");
            mi.finish_internal_error();
        }
    }
}

/// `Process_ReadCode`: slot 0 is `size` bytes of the code segment starting at
/// `offset`.  A range outside the segment is an internal error.
pub fn read_code(mi: &mut MethodInterface<'_>, session: &Session) {
    let Some(offset) = mi.get_parameter::<i32>() else { return };
    let Some(size) = mi.get_parameter::<i32>() else { return };
    if !mi.finish_input_parameters() {
        return;
    }
    let Some(offset) = non_negative(mi, offset) else { return };
    let Some(size) = non_negative(mi, size) else { return };

    let code = match session.services().process.code() {
        Ok(code) => code,
        Err(status) => {
            error!(status = %status, "code segment unavailable");
            return mi.finish_internal_error();
        }
    };
    let Some(bytes) = offset
        .checked_add(size)
        .and_then(|end| code.get(offset..end))
    else {
        warn!(offset, size, len = code.len(), "code read outside the segment");
        return mi.finish_internal_error();
    };
    finish_with(mi, Ok::<_, StatusCode>(bytes));
}

/// `Process_ReadIcon`
pub fn read_icon(mi: &mut MethodInterface<'_>, session: &Session) {
    read_exefs(mi, session, ExeFsSection::Icon);
}

/// `Process_ReadBanner`
pub fn read_banner(mi: &mut MethodInterface<'_>, session: &Session) {
    read_exefs(mi, session, ExeFsSection::Banner);
}

/// `Process_ReadLogo`
pub fn read_logo(mi: &mut MethodInterface<'_>, session: &Session) {
    read_exefs(mi, session, ExeFsSection::Logo);
}

/// Slot 0 is the whole section.  The file is opened directly and closed
/// again before the call finishes, so nothing is registered with the session.
fn read_exefs(mi: &mut MethodInterface<'_>, session: &Session, section: ExeFsSection) {
    if !mi.finish_input_parameters() {
        return;
    }

    let fs = session.services().fs.as_ref();
    let archive_path = FsPath {
        kind: PathType::Empty as u32,
        data: &[0],
    };
    let raw = section.file_path();
    let file_path = FsPath {
        kind: PathType::Binary as u32,
        data: &raw,
    };
    let opened = fs.open_file_directly(ARCHIVE_ROMFS, &archive_path, &file_path, OPEN_READ, 0);
    let handle = match opened {
        Ok(handle) => handle,
        Err(status) => return mi.finish_good(status),
    };

    let size = match fs.file_size(handle) {
        Ok(size) => usize::try_from(size).unwrap_or(usize::MAX),
        Err(status) => {
            fs.close_file(handle);
            return mi.finish_good(status);
        }
    };

    let Some(buf) = mi.reserve_result_buffer(0, size) else {
        fs.close_file(handle);
        return;
    };
    let read = fs.read_file(handle, 0, buf);
    fs.close_file(handle);
    match read {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::handlers::testing::{call, call_with_budget, success};
    use crate::infrastructure::native::memory::{codes, MemoryBackend, MemoryProcess};
    use crate::infrastructure::native::PROGRAM_INFO_SIZE;
    use crate::infrastructure::streaming::StreamingSettings;
    use tether_core::protocol::codec::RequestBuilder;
    use tether_core::CallOutcome;

    fn session_for(backend: &MemoryBackend) -> Session {
        let mut services = backend.services();
        services.capture_program_info().expect("program info");
        Session::new(services, StreamingSettings::default())
    }

    fn session() -> Session {
        session_for(&MemoryBackend::demo())
    }

    #[test]
    fn test_get_title_id_returns_u64() {
        // Arrange
        let session = session();

        // Act
        let outcome = call(&session, RequestBuilder::new(1, "Process_GetTitleID"), get_title_id);

        // Assert
        let (status, buffers) = success(outcome);
        assert_eq!(status, 0);
        assert_eq!(buffers, vec![0x0004_0000_0003_0800u64.to_le_bytes().to_vec()]);
    }

    #[test]
    fn test_get_title_id_rejects_parameters() {
        let request = RequestBuilder::new(1, "Process_GetTitleID").s32(1);

        let outcome = call(&session(), request, get_title_id);

        assert!(matches!(outcome, CallOutcome::ProtocolError(_)));
    }

    #[test]
    fn test_get_product_info_returns_record() {
        let request = RequestBuilder::new(1, "Process_GetProductInfo");

        let outcome = call(&session(), request, get_product_info);

        let (status, buffers) = success(outcome);
        assert_eq!(status, 0);
        assert_eq!(buffers[0].len(), 0x14);
        assert_eq!(&buffers[0][..10], b"CTR-P-TTHR");
    }

    #[test]
    fn test_get_exheader_returns_captured_header() {
        // Arrange
        let session = session();

        // Act
        let outcome = call(&session, RequestBuilder::new(1, "Process_GetExheader"), get_exheader);

        // Assert
        let (status, buffers) = success(outcome);
        assert_eq!(status, 0);
        assert_eq!(buffers[0].len(), PROGRAM_INFO_SIZE);
        assert_eq!(&buffers[0][..6], b"tether");
    }

    #[test]
    fn test_get_exheader_without_capture_is_internal_error() {
        let session = Session::new(MemoryBackend::demo().services(), StreamingSettings::default());

        let outcome = call(&session, RequestBuilder::new(1, "Process_GetExheader"), get_exheader);

        assert_eq!(outcome, CallOutcome::InternalError);
    }

    #[test]
    fn test_read_code_copies_the_requested_range() {
        // Arrange
        let request = RequestBuilder::new(1, "Process_ReadCode").s32(0x10).s32(4);

        // Act
        let outcome = call(&session(), request, read_code);

        // Assert
        let (status, buffers) = success(outcome);
        assert_eq!(status, 0);
        assert_eq!(buffers, vec![vec![0x10, 0x11, 0x12, 0x13]]);
    }

    #[test]
    fn test_read_code_past_the_segment_is_internal_error() {
        let request = RequestBuilder::new(1, "Process_ReadCode").s32(0xFFE).s32(4);

        let outcome = call(&session(), request, read_code);

        assert_eq!(outcome, CallOutcome::InternalError);
    }

    #[test]
    fn test_read_code_negative_offset_is_internal_error() {
        let request = RequestBuilder::new(1, "Process_ReadCode").s32(-1).s32(4);

        let outcome = call(&session(), request, read_code);

        assert_eq!(outcome, CallOutcome::InternalError);
    }

    #[test]
    fn test_read_icon_returns_section_and_closes_file() {
        // Arrange
        let backend = MemoryBackend::demo();
        let session = session_for(&backend);

        // Act
        let outcome = call(&session, RequestBuilder::new(1, "Process_ReadIcon"), read_icon);

        // Assert
        let (status, buffers) = success(outcome);
        assert_eq!(status, 0);
        assert_eq!(buffers, vec![b"SMDH".to_vec()]);
        assert_eq!(backend.fs.open_handle_count(), 0);
        assert_eq!(backend.fs.close_calls(), 1);
    }

    #[test]
    fn test_read_missing_section_forwards_status() {
        // The demo title ships an icon and a banner but no logo.
        let outcome = call(&session(), RequestBuilder::new(1, "Process_ReadLogo"), read_logo);

        assert_eq!(
            outcome,
            CallOutcome::Success {
                status: codes::NOT_FOUND,
                buffers: vec![],
            }
        );
    }

    #[test]
    fn test_read_banner_over_budget_aborts_and_closes_file() {
        // Arrange: the 4-byte banner plus its length prefix needs 8 bytes
        let backend = MemoryBackend::demo();
        let session = session_for(&backend);

        // Act
        let outcome = call_with_budget(
            &session,
            RequestBuilder::new(1, "Process_ReadBanner"),
            read_banner,
            7,
        );

        // Assert
        assert_eq!(outcome, CallOutcome::Aborted);
        assert_eq!(backend.fs.open_handle_count(), 0);
    }

    #[test]
    fn test_capture_uses_the_replaced_process() {
        let mut process = MemoryProcess::new(9);
        process.program_info = Some([0xAB; PROGRAM_INFO_SIZE]);
        let backend = MemoryBackend::demo().with_process(process);

        let request = RequestBuilder::new(1, "Process_GetExheader");

        let outcome = call(&session_for(&backend), request, get_exheader);

        let (_, buffers) = success(outcome);
        assert!(buffers[0].iter().all(|&b| b == 0xAB));
    }
}
