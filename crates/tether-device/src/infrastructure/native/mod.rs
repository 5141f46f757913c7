//! Seams over the device's native OS services.
//!
//! Every native call the handlers make goes through one of these traits.  On
//! the device they are backed by the OS; on a host build and in tests they are
//! backed by the in-memory implementations in [`memory`].
//!
//! All calls are synchronous and return a [`StatusCode`] (or a value / status
//! pair).  A failing status is a domain result that the handlers forward to
//! the peer unchanged.

pub mod memory;

use std::sync::Arc;

use tether_core::protocol::controller::ControllerState;
use tether_core::rpc::subsystem::{ExclusiveSubsystem, Subsystem};
use tether_core::{HandleCloser, HandleKind, StatusCode};

// ── Filesystem ────────────────────────────────────────────────────────────────

/// Size of one encoded directory entry.
pub const DIRECTORY_ENTRY_SIZE: usize = 0x228;

/// Directory attribute bit in [`DirectoryEntry::attributes`].
pub const ATTRIBUTE_DIRECTORY: u32 = 0x01;

const ENTRY_NAME_UNITS: usize = 0x106;
const ENTRY_SHORT_NAME_SIZE: usize = 10;
const ENTRY_SHORT_EXT_SIZE: usize = 4;

/// Path encodings understood by the filesystem service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PathType {
    Invalid = 0,
    Empty = 1,
    Binary = 2,
    Ascii = 3,
    Utf16 = 4,
}

impl TryFrom<u32> for PathType {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, ()> {
        match value {
            0 => Ok(PathType::Invalid),
            1 => Ok(PathType::Empty),
            2 => Ok(PathType::Binary),
            3 => Ok(PathType::Ascii),
            4 => Ok(PathType::Utf16),
            _ => Err(()),
        }
    }
}

/// A filesystem path as sent by the peer, borrowed from the request body.
///
/// On the wire it is a buffer parameter laid out as
/// `[type:4][size:4][data:size]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsPath<'a> {
    pub kind: u32,
    pub data: &'a [u8],
}

impl<'a> FsPath<'a> {
    /// Parses a path buffer.  Returns `None` if the buffer is shorter than
    /// its 8-byte prefix or its size field disagrees with the bytes present.
    pub fn parse(buf: &'a [u8]) -> Option<Self> {
        if buf.len() < 8 {
            return None;
        }
        let (prefix, data) = buf.split_at(8);
        let kind = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
        let size = u32::from_le_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]) as usize;
        (size == data.len()).then_some(Self { kind, data })
    }

    /// Builds the wire form of an ASCII path (NUL-terminated).
    pub fn encode_ascii(path: &str) -> Vec<u8> {
        let mut data = path.as_bytes().to_vec();
        data.push(0);
        Self::encode(PathType::Ascii, &data)
    }

    /// Builds the wire form of an empty path.
    pub fn encode_empty() -> Vec<u8> {
        Self::encode(PathType::Empty, &[0])
    }

    pub fn encode(kind: PathType, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + data.len());
        out.extend_from_slice(&(kind as u32).to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(data);
        out
    }

    pub fn path_type(&self) -> Option<PathType> {
        PathType::try_from(self.kind).ok()
    }

    /// Renders the path as text for lookups and logs.
    pub fn to_text(&self) -> String {
        match self.path_type() {
            Some(PathType::Ascii) => {
                let end = self.data.iter().position(|&b| b == 0).unwrap_or(self.data.len());
                String::from_utf8_lossy(&self.data[..end]).into_owned()
            }
            Some(PathType::Utf16) => {
                let units: Vec<u16> = self
                    .data
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .take_while(|&u| u != 0)
                    .collect();
                String::from_utf16_lossy(&units)
            }
            Some(PathType::Empty) => String::new(),
            _ => self.data.iter().map(|b| format!("{b:02x}")).collect(),
        }
    }
}

/// One entry returned by a directory read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub attributes: u32,
    pub file_size: u64,
}

impl DirectoryEntry {
    pub fn is_directory(&self) -> bool {
        self.attributes & ATTRIBUTE_DIRECTORY != 0
    }

    /// Writes the native 0x228-byte record into `out`.
    ///
    /// ```text
    /// 0x000  name        UTF-16LE, NUL-padded (0x20C bytes)
    /// 0x20C  short name  8.3 stem, NUL-padded (10 bytes)
    /// 0x216  short ext   NUL-padded (4 bytes)
    /// 0x21A  valid       1
    /// 0x21B  reserved    1
    /// 0x21C  attributes  u32
    /// 0x220  file size   u64
    /// ```
    pub fn encode_into(&self, out: &mut [u8; DIRECTORY_ENTRY_SIZE]) {
        out.fill(0);

        let name_bytes = ENTRY_NAME_UNITS * 2;
        for (i, unit) in self.name.encode_utf16().take(ENTRY_NAME_UNITS - 1).enumerate() {
            out[i * 2..i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
        }

        let (stem, ext) = match self.name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !self.is_directory() => (stem, ext),
            _ => (self.name.as_str(), ""),
        };
        let short_name = name_bytes;
        let short_ext = short_name + ENTRY_SHORT_NAME_SIZE;
        copy_short(&mut out[short_name..short_ext], stem, 8);
        copy_short(&mut out[short_ext..short_ext + ENTRY_SHORT_EXT_SIZE], ext, 3);

        let valid = short_ext + ENTRY_SHORT_EXT_SIZE;
        out[valid] = 1;
        let attributes = valid + 2;
        out[attributes..attributes + 4].copy_from_slice(&self.attributes.to_le_bytes());
        out[attributes + 4..attributes + 12].copy_from_slice(&self.file_size.to_le_bytes());
    }
}

fn copy_short(dst: &mut [u8], src: &str, max: usize) {
    let upper = src
        .bytes()
        .filter(|b| b.is_ascii_graphic())
        .map(|b| b.to_ascii_uppercase())
        .take(max);
    for (slot, byte) in dst.iter_mut().zip(upper) {
        *slot = byte;
    }
}

/// Filesystem service: archives, files, and directories.
pub trait FileSystem: Send + Sync {
    fn open_file_directly(
        &self,
        archive_id: u32,
        archive_path: &FsPath<'_>,
        file_path: &FsPath<'_>,
        flags: u32,
        attributes: u32,
    ) -> Result<u32, StatusCode>;
    fn open_archive(&self, archive_id: u32, path: &FsPath<'_>) -> Result<u64, StatusCode>;
    fn close_archive(&self, archive: u64) -> StatusCode;
    fn open_file(
        &self,
        archive: u64,
        path: &FsPath<'_>,
        flags: u32,
        attributes: u32,
    ) -> Result<u32, StatusCode>;
    fn create_file(&self, archive: u64, path: &FsPath<'_>, attributes: u32, size: u64)
        -> StatusCode;
    fn delete_file(&self, archive: u64, path: &FsPath<'_>) -> StatusCode;
    fn rename_file(
        &self,
        src_archive: u64,
        src: &FsPath<'_>,
        dst_archive: u64,
        dst: &FsPath<'_>,
    ) -> StatusCode;
    fn open_directory(&self, archive: u64, path: &FsPath<'_>) -> Result<u32, StatusCode>;
    fn create_directory(&self, archive: u64, path: &FsPath<'_>, attributes: u32) -> StatusCode;
    /// Deletes a directory; `recursive` also removes everything below it.
    fn delete_directory(&self, archive: u64, path: &FsPath<'_>, recursive: bool) -> StatusCode;
    fn rename_directory(
        &self,
        src_archive: u64,
        src: &FsPath<'_>,
        dst_archive: u64,
        dst: &FsPath<'_>,
    ) -> StatusCode;
    fn free_bytes(&self, archive: u64) -> Result<u64, StatusCode>;

    /// Reads into `out` starting at `offset`; returns the bytes produced.
    fn read_file(&self, handle: u32, offset: u64, out: &mut [u8]) -> Result<usize, StatusCode>;
    /// Writes `data` at `offset`; returns the bytes written.
    fn write_file(&self, handle: u32, offset: u64, data: &[u8], flags: u32)
        -> Result<usize, StatusCode>;
    fn file_size(&self, handle: u32) -> Result<u64, StatusCode>;
    fn set_file_size(&self, handle: u32, size: u64) -> StatusCode;
    fn file_attributes(&self, handle: u32) -> Result<u32, StatusCode>;
    fn set_file_attributes(&self, handle: u32, attributes: u32) -> StatusCode;
    fn flush_file(&self, handle: u32) -> StatusCode;
    fn close_file(&self, handle: u32) -> StatusCode;

    /// Returns up to `max_entries` entries following the previous read.
    fn read_directory(&self, handle: u32, max_entries: usize)
        -> Result<Vec<DirectoryEntry>, StatusCode>;
    fn close_directory(&self, handle: u32) -> StatusCode;

    /// Runs an archive-specific action such as committing save data.
    ///
    /// `output` is filled as far as the action produces data; the returned
    /// status is forwarded whether or not it did.
    fn control_archive(
        &self,
        archive: u64,
        action: u32,
        input: &[u8],
        output: &mut [u8],
    ) -> StatusCode;
}

/// Routes [`HandleRegistry::close_all`](tether_core::HandleRegistry::close_all)
/// to the filesystem close matching each handle's kind.
pub struct FileSystemCloser<'a>(pub &'a dyn FileSystem);

impl HandleCloser for FileSystemCloser<'_> {
    fn close(&self, handle: u64, kind: HandleKind) -> StatusCode {
        match kind {
            HandleKind::File => self.0.close_file(handle as u32),
            HandleKind::Directory => self.0.close_directory(handle as u32),
            HandleKind::Archive => self.0.close_archive(handle),
        }
    }
}

// ── Title management and configuration ────────────────────────────────────────

/// Title/content management service.  Must be used inside its
/// [`ExclusiveSubsystem`].
pub trait TitleManager: Subsystem {
    fn title_count(&self, media: i8) -> Result<u32, StatusCode>;
    /// Returns at most `max` title ids installed on `media`.
    fn title_list(&self, media: i8, max: usize) -> Result<Vec<u64>, StatusCode>;
}

/// System configuration blocks.  Must be used inside its
/// [`ExclusiveSubsystem`].
pub trait ConfigBlocks: Subsystem {
    /// Fills `out` with the first `out.len()` bytes of block `block_id`.
    fn read_block(&self, block_id: u32, out: &mut [u8]) -> StatusCode;
}

// ── Input ─────────────────────────────────────────────────────────────────────

/// Calibration of one gyroscope axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AxisCalibration {
    pub zero: i16,
    pub positive: i16,
    pub negative: i16,
}

/// Gyroscope calibration for all three axes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GyroCalibration {
    pub x: AxisCalibration,
    pub y: AxisCalibration,
    pub z: AxisCalibration,
}

impl GyroCalibration {
    pub const ENCODED_SIZE: usize = 18;

    pub fn encode(&self) -> [u8; Self::ENCODED_SIZE] {
        let mut out = [0u8; Self::ENCODED_SIZE];
        let values = [self.x, self.y, self.z]
            .into_iter()
            .flat_map(|a| [a.zero, a.positive, a.negative]);
        for (chunk, v) in out.chunks_exact_mut(2).zip(values) {
            chunk.copy_from_slice(&v.to_le_bytes());
        }
        out
    }
}

/// Human-interface sensor controls.
pub trait HidService: Send + Sync {
    fn enable_accelerometer(&self) -> StatusCode;
    fn disable_accelerometer(&self) -> StatusCode;
    fn enable_gyroscope(&self) -> StatusCode;
    fn disable_gyroscope(&self) -> StatusCode;
    fn gyro_raw_to_dps(&self) -> Result<f32, StatusCode>;
    fn gyro_calibration(&self) -> Result<GyroCalibration, StatusCode>;
}

/// Source of controller samples for the streaming channel.
#[cfg_attr(test, mockall::automock)]
pub trait InputSampler: Send + Sync {
    fn sample(&self) -> ControllerState;
}

// ── Running process ───────────────────────────────────────────────────────────

/// Size of the extended header captured before the first peer is served.
pub const PROGRAM_INFO_SIZE: usize = 0x400;

/// Archive id of the running title's own content.
pub const ARCHIVE_ROMFS: u32 = 0x3;

/// Open flag for read access.
pub const OPEN_READ: u32 = 0x1;

const EXEFS_FILE_TYPE: u32 = 2;
const EXEFS_PATH_SIZE: usize = 0xC;

/// Product code, company code and remaster version of a title.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProductInfo {
    pub product_code: [u8; 0x10],
    pub company_code: [u8; 2],
    pub remaster_version: u16,
}

impl ProductInfo {
    pub const ENCODED_SIZE: usize = 0x14;

    pub fn encode(&self) -> [u8; Self::ENCODED_SIZE] {
        let mut out = [0u8; Self::ENCODED_SIZE];
        out[..0x10].copy_from_slice(&self.product_code);
        out[0x10..0x12].copy_from_slice(&self.company_code);
        out[0x12..].copy_from_slice(&self.remaster_version.to_le_bytes());
        out
    }
}

/// A section of the running title's executable filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExeFsSection {
    Icon,
    Banner,
    Logo,
}

impl ExeFsSection {
    pub fn name(self) -> &'static str {
        match self {
            ExeFsSection::Icon => "icon",
            ExeFsSection::Banner => "banner",
            ExeFsSection::Logo => "logo",
        }
    }

    /// Binary file path selecting this section inside [`ARCHIVE_ROMFS`]: the
    /// ExeFS file type (u32) followed by the NUL-padded section name.
    pub fn file_path(self) -> [u8; EXEFS_PATH_SIZE] {
        let mut path = [0u8; EXEFS_PATH_SIZE];
        path[..4].copy_from_slice(&EXEFS_FILE_TYPE.to_le_bytes());
        let name = self.name().as_bytes();
        path[4..4 + name.len()].copy_from_slice(name);
        path
    }
}

/// Information about the running process.
pub trait ProcessInfo: Send + Sync {
    fn title_id(&self) -> u64;
    fn product_info(&self) -> Result<ProductInfo, StatusCode>;
    /// Extended header of the last application the loader started.
    fn last_program_info(&self) -> Result<[u8; PROGRAM_INFO_SIZE], StatusCode>;
    /// The process's loaded code segment.
    fn code(&self) -> Result<&[u8], StatusCode>;
}

// ── Service bundle ────────────────────────────────────────────────────────────

/// Every native service a session can reach.
///
/// Cloning is cheap; all services are shared.  The exclusive subsystems are
/// shared too, so their locks serialise calls from every session.
#[derive(Clone)]
pub struct Services {
    pub process: Arc<dyn ProcessInfo>,
    pub fs: Arc<dyn FileSystem>,
    pub titles: Arc<ExclusiveSubsystem<dyn TitleManager>>,
    pub config_blocks: Arc<ExclusiveSubsystem<dyn ConfigBlocks>>,
    pub hid: Arc<dyn HidService>,
    pub input: Arc<dyn InputSampler>,
    /// Set by [`Services::capture_program_info`].
    pub program_info: Option<Arc<[u8; PROGRAM_INFO_SIZE]>>,
}

impl Services {
    /// Captures the last launched application's extended header.
    ///
    /// Later launches replace the loader's copy, so this runs once before
    /// the first peer is served.
    pub fn capture_program_info(&mut self) -> Result<(), StatusCode> {
        let info = self.process.last_program_info()?;
        self.program_info = Some(Arc::new(info));
        Ok(())
    }
}
