//! The device's method table.

use tether_core::{DispatchError, DispatchTable};

use super::handlers::{am, cfg, fs, hid, process, stream};
use super::session::Session;

/// Builds the dispatch table with every method the device serves.
///
/// # Errors
///
/// Returns [`DispatchError`] if a name is duplicated or cannot be carried on
/// the wire; with the fixed list below that indicates a programming error.
pub fn build_dispatch_table() -> Result<DispatchTable<Session>, DispatchError> {
    let table = DispatchTable::builder()
        .register("Process_GetTitleID", process::get_title_id)?
        .register("Process_GetProductInfo", process::get_product_info)?
        .register("Process_GetExheader", process::get_exheader)?
        .register("Process_ReadCode", process::read_code)?
        .register("Process_ReadIcon", process::read_icon)?
        .register("Process_ReadBanner", process::read_banner)?
        .register("Process_ReadLogo", process::read_logo)?
        // Archives and paths
        .register("FSUSER_OpenFileDirectly", fs::open_file_directly)?
        .register("FSUSER_OpenArchive", fs::open_archive)?
        .register("FSUSER_CloseArchive", fs::close_archive)?
        .register("FSUSER_OpenFile", fs::open_file)?
        .register("FSUSER_CreateFile", fs::create_file)?
        .register("FSUSER_DeleteFile", fs::delete_file)?
        .register("FSUSER_RenameFile", fs::rename_file)?
        .register("FSUSER_OpenDirectory", fs::open_directory)?
        .register("FSUSER_CreateDirectory", fs::create_directory)?
        .register("FSUSER_DeleteDirectory", fs::delete_directory)?
        .register("FSUSER_DeleteDirectoryRec", fs::delete_directory_recursively)?
        .register("FSUSER_RenameDirectory", fs::rename_directory)?
        .register("FSUSER_GetFreeBytes", fs::get_free_bytes)?
        .register("FSUSER_ControlArchive", fs::control_archive)?
        // Open files
        .register("FSFILE_Close", fs::file_close)?
        .register("FSFILE_Read", fs::file_read)?
        .register("FSFILE_Write", fs::file_write)?
        .register("FSFILE_GetSize", fs::file_get_size)?
        .register("FSFILE_SetSize", fs::file_set_size)?
        .register("FSFILE_GetAttributes", fs::file_get_attributes)?
        .register("FSFILE_SetAttributes", fs::file_set_attributes)?
        .register("FSFILE_Flush", fs::file_flush)?
        // Open directories
        .register("FSDIR_Read", fs::dir_read)?
        .register("FSDIR_Close", fs::dir_close)?
        // Titles and configuration
        .register("AM_GetTitleCount", am::get_title_count)?
        .register("AM_GetTitleList", am::get_title_list)?
        .register("CFGU_GetConfigInfoBlk2", cfg::get_config_info_blk2)?
        // Motion sensors
        .register("HIDUSER_EnableAccelerometer", hid::enable_accelerometer)?
        .register("HIDUSER_DisableAccelerometer", hid::disable_accelerometer)?
        .register("HIDUSER_EnableGyroscope", hid::enable_gyroscope)?
        .register("HIDUSER_DisableGyroscope", hid::disable_gyroscope)?
        .register("HIDUSER_GetGyroRawToDpsCoef", hid::get_gyro_raw_to_dps_coef)?
        .register("HIDUSER_GetGyroCalibrateParam", hid::get_gyro_calibrate_param)?
        // Controller stream
        .register("#ArticController", stream::start_controller)?
        .build();
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_builds_with_every_method() {
        // Arrange / Act
        let table = build_dispatch_table().expect("table builds");

        // Assert
        assert_eq!(table.len(), 41);
        for name in [
            "FSUSER_OpenFile",
            "FSUSER_ControlArchive",
            "AM_GetTitleList",
            "Process_GetExheader",
            "Process_ReadLogo",
            "#ArticController",
        ] {
            assert!(table.contains(name), "{name} must be registered");
        }
    }

    #[test]
    fn test_names_are_case_sensitive() {
        let table = build_dispatch_table().unwrap();

        assert!(!table.contains("fsuser_openfile"));
    }
}
