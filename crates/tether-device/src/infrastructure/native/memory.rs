//! In-memory native services for host builds and tests.
//!
//! These behave like the device services closely enough to exercise every
//! handler: files live in a map keyed by (archive id, path), directories are
//! tracked explicitly, and title lists and configuration blocks are plain
//! tables.  The title and configuration fakes refuse calls made outside their
//! init/exit bracket, so tests catch a handler that skips the subsystem lock.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tether_core::protocol::controller::ControllerState;
use tether_core::rpc::subsystem::{ExclusiveSubsystem, Subsystem};
use tether_core::StatusCode;

use super::{
    ConfigBlocks, DirectoryEntry, ExeFsSection, FileSystem, FsPath, GyroCalibration,
    HidService, InputSampler, PathType, ProcessInfo, ProductInfo, Services, TitleManager,
    ARCHIVE_ROMFS, ATTRIBUTE_DIRECTORY, PROGRAM_INFO_SIZE,
};

/// Native result codes produced by the in-memory services.
pub mod codes {
    use tether_core::StatusCode;

    pub const NOT_FOUND: StatusCode = StatusCode(0xC880_4478_u32 as i32);
    pub const ALREADY_EXISTS: StatusCode = StatusCode(0xC820_44BE_u32 as i32);
    pub const NOT_EMPTY: StatusCode = StatusCode(0xC820_44F0_u32 as i32);
    pub const INVALID_HANDLE: StatusCode = StatusCode(0xD8E0_07F7_u32 as i32);
    pub const INVALID_SIZE: StatusCode = StatusCode(0xD8E0_6FFC_u32 as i32);
    pub const NOT_INITIALIZED: StatusCode = StatusCode(0xD8E0_6FF9_u32 as i32);
    pub const CLOSE_FAILED: StatusCode = StatusCode(0xC880_44A4_u32 as i32);
    pub const UNSUPPORTED: StatusCode = StatusCode(0xE0C0_46EF_u32 as i32);
}

/// Archive action that commits pending save data.
pub const ACTION_COMMIT_SAVE_DATA: u32 = 0;

/// Open flag that creates a missing file.
pub const OPEN_CREATE: u32 = 0x4;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn status_of(result: Result<(), StatusCode>) -> StatusCode {
    result.err().unwrap_or(StatusCode::SUCCESS)
}

// ── Paths ─────────────────────────────────────────────────────────────────────

fn normalize(path: &FsPath<'_>) -> String {
    let text = path.to_text().replace('\\', "/");
    let trimmed = text.trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn parent_of(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rsplit_once('/') {
        Some(("", _)) => Some("/"),
        Some((parent, _)) => Some(parent),
        None => None,
    }
}

fn name_of(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, name)| name)
}

fn is_below(path: &str, dir: &str) -> bool {
    dir == "/" || path.strip_prefix(dir).is_some_and(|rest| rest.starts_with('/'))
}

// ── Filesystem ────────────────────────────────────────────────────────────────

type NodeKey = (u32, String);

#[derive(Debug, Default)]
struct FileNode {
    data: Vec<u8>,
    attributes: u32,
}

#[derive(Debug)]
struct OpenDirectory {
    archive_id: u32,
    path: String,
    position: usize,
}

#[derive(Debug, Default)]
struct FsState {
    next_handle: u32,
    next_archive: u64,
    archives: HashMap<u64, u32>,
    files: BTreeMap<NodeKey, FileNode>,
    dirs: BTreeSet<NodeKey>,
    open_files: HashMap<u32, NodeKey>,
    open_dirs: HashMap<u32, OpenDirectory>,
}

impl FsState {
    fn alloc_handle(&mut self) -> u32 {
        self.next_handle = self.next_handle.wrapping_add(1).max(1);
        self.next_handle
    }

    fn archive_id(&self, archive: u64) -> Result<u32, StatusCode> {
        self.archives.get(&archive).copied().ok_or(codes::INVALID_HANDLE)
    }

    fn dir_exists(&self, archive_id: u32, path: &str) -> bool {
        path == "/" || self.dirs.contains(&(archive_id, path.to_string()))
    }

    fn exists(&self, key: &NodeKey) -> bool {
        self.files.contains_key(key) || self.dir_exists(key.0, &key.1)
    }

    fn parent_exists(&self, archive_id: u32, path: &str) -> bool {
        parent_of(path).is_some_and(|p| self.dir_exists(archive_id, p))
    }

    fn open_file_node(
        &mut self,
        archive_id: u32,
        path: String,
        flags: u32,
        attributes: u32,
    ) -> Result<u32, StatusCode> {
        let key = (archive_id, path);
        if !self.files.contains_key(&key) {
            if flags & OPEN_CREATE == 0 || !self.parent_exists(archive_id, &key.1) {
                return Err(codes::NOT_FOUND);
            }
            self.files.insert(
                key.clone(),
                FileNode {
                    data: Vec::new(),
                    attributes,
                },
            );
        }
        let handle = self.alloc_handle();
        self.open_files.insert(handle, key);
        Ok(handle)
    }

    fn file_mut(&mut self, handle: u32) -> Result<&mut FileNode, StatusCode> {
        let key = self.open_files.get(&handle).ok_or(codes::INVALID_HANDLE)?;
        self.files.get_mut(key).ok_or(codes::NOT_FOUND)
    }

    fn children(&self, archive_id: u32, dir: &str) -> Vec<DirectoryEntry> {
        let dirs = self
            .dirs
            .iter()
            .filter(|(a, p)| *a == archive_id && parent_of(p) == Some(dir))
            .map(|(_, p)| DirectoryEntry {
                name: name_of(p).to_string(),
                attributes: ATTRIBUTE_DIRECTORY,
                file_size: 0,
            });
        let files = self
            .files
            .iter()
            .filter(|((a, p), _)| *a == archive_id && parent_of(p) == Some(dir))
            .map(|((_, p), node)| DirectoryEntry {
                name: name_of(p).to_string(),
                attributes: node.attributes,
                file_size: node.data.len() as u64,
            });
        dirs.chain(files).collect()
    }

    fn resolve(&self, archive: u64, path: &FsPath<'_>) -> Result<NodeKey, StatusCode> {
        Ok((self.archive_id(archive)?, normalize(path)))
    }
}

/// Filesystem kept entirely in memory.
#[derive(Debug)]
pub struct MemoryFileSystem {
    state: Mutex<FsState>,
    capacity: u64,
    fail_closes: AtomicBool,
    close_calls: AtomicUsize,
    commits: AtomicUsize,
}

impl Default for MemoryFileSystem {
    fn default() -> Self {
        Self::new(64 * 1024 * 1024)
    }
}

impl MemoryFileSystem {
    /// Creates an empty filesystem reporting `capacity` bytes of space.
    pub fn new(capacity: u64) -> Self {
        Self {
            state: Mutex::new(FsState::default()),
            capacity,
            fail_closes: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            commits: AtomicUsize::new(0),
        }
    }

    /// Adds a file, creating its parent directories.
    pub fn with_file(self, archive_id: u32, path: &str, data: &[u8]) -> Self {
        {
            let mut state = lock(&self.state);
            let mut dir = parent_of(path);
            while let Some(d) = dir.filter(|d| *d != "/") {
                state.dirs.insert((archive_id, d.to_string()));
                dir = parent_of(d);
            }
            state.files.insert(
                (archive_id, path.to_string()),
                FileNode {
                    data: data.to_vec(),
                    attributes: 0,
                },
            );
        }
        self
    }

    /// Adds a section of the running title's ExeFS, reachable through
    /// [`ARCHIVE_ROMFS`] with [`ExeFsSection::file_path`].
    pub fn with_exefs_section(self, section: ExeFsSection, data: &[u8]) -> Self {
        let raw = section.file_path();
        let path = FsPath {
            kind: PathType::Binary as u32,
            data: &raw,
        };
        let key = normalize(&path);
        self.with_file(ARCHIVE_ROMFS, &key, data)
    }

    /// Number of save-data commits received through `control_archive`.
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Makes every subsequent close report failure (the handle is still released).
    pub fn fail_closes(&self, fail: bool) {
        self.fail_closes.store(fail, Ordering::SeqCst);
    }

    /// Number of close calls of any kind received so far.
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Number of file, directory, and archive handles currently open.
    pub fn open_handle_count(&self) -> usize {
        let state = lock(&self.state);
        state.open_files.len() + state.open_dirs.len() + state.archives.len()
    }

    /// Contents of a file, if present.
    pub fn file_contents(&self, archive_id: u32, path: &str) -> Option<Vec<u8>> {
        lock(&self.state)
            .files
            .get(&(archive_id, path.to_string()))
            .map(|f| f.data.clone())
    }

    fn close_result(&self, released: bool) -> StatusCode {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if !released {
            codes::INVALID_HANDLE
        } else if self.fail_closes.load(Ordering::SeqCst) {
            codes::CLOSE_FAILED
        } else {
            StatusCode::SUCCESS
        }
    }

    fn rename(
        &self,
        src_archive: u64,
        src: &FsPath<'_>,
        dst_archive: u64,
        dst: &FsPath<'_>,
        directory: bool,
    ) -> Result<(), StatusCode> {
        let mut state = lock(&self.state);
        let from = state.resolve(src_archive, src)?;
        let to = state.resolve(dst_archive, dst)?;
        if state.exists(&to) {
            return Err(codes::ALREADY_EXISTS);
        }
        if !state.parent_exists(to.0, &to.1) {
            return Err(codes::NOT_FOUND);
        }

        if !directory {
            let node = state.files.remove(&from).ok_or(codes::NOT_FOUND)?;
            state.files.insert(to, node);
            return Ok(());
        }

        if !state.dirs.remove(&from) {
            return Err(codes::NOT_FOUND);
        }
        let moved = |p: &str| format!("{}{}", to.1, &p[from.1.len()..]);
        let dirs: Vec<NodeKey> = state
            .dirs
            .iter()
            .filter(|(a, p)| *a == from.0 && is_below(p, &from.1))
            .cloned()
            .collect();
        for key in dirs {
            state.dirs.remove(&key);
            state.dirs.insert((to.0, moved(&key.1)));
        }
        let files: Vec<NodeKey> = state
            .files
            .keys()
            .filter(|(a, p)| *a == from.0 && is_below(p, &from.1))
            .cloned()
            .collect();
        for key in files {
            if let Some(node) = state.files.remove(&key) {
                state.files.insert((to.0, moved(&key.1)), node);
            }
        }
        state.dirs.insert(to);
        Ok(())
    }
}

impl FileSystem for MemoryFileSystem {
    fn open_file_directly(
        &self,
        archive_id: u32,
        _archive_path: &FsPath<'_>,
        file_path: &FsPath<'_>,
        flags: u32,
        attributes: u32,
    ) -> Result<u32, StatusCode> {
        lock(&self.state).open_file_node(archive_id, normalize(file_path), flags, attributes)
    }

    fn open_archive(&self, archive_id: u32, _path: &FsPath<'_>) -> Result<u64, StatusCode> {
        let mut state = lock(&self.state);
        state.next_archive += 1;
        let archive = (1u64 << 32) | state.next_archive;
        state.archives.insert(archive, archive_id);
        Ok(archive)
    }

    fn close_archive(&self, archive: u64) -> StatusCode {
        let released = lock(&self.state).archives.remove(&archive).is_some();
        self.close_result(released)
    }

    fn open_file(
        &self,
        archive: u64,
        path: &FsPath<'_>,
        flags: u32,
        attributes: u32,
    ) -> Result<u32, StatusCode> {
        let mut state = lock(&self.state);
        let (archive_id, path) = state.resolve(archive, path)?;
        state.open_file_node(archive_id, path, flags, attributes)
    }

    fn create_file(
        &self,
        archive: u64,
        path: &FsPath<'_>,
        attributes: u32,
        size: u64,
    ) -> StatusCode {
        let mut state = lock(&self.state);
        let result = state.resolve(archive, path).and_then(|key| {
            if state.exists(&key) {
                return Err(codes::ALREADY_EXISTS);
            }
            if !state.parent_exists(key.0, &key.1) {
                return Err(codes::NOT_FOUND);
            }
            let len = usize::try_from(size).map_err(|_| codes::INVALID_SIZE)?;
            state.files.insert(
                key,
                FileNode {
                    data: vec![0; len],
                    attributes,
                },
            );
            Ok(())
        });
        status_of(result)
    }

    fn delete_file(&self, archive: u64, path: &FsPath<'_>) -> StatusCode {
        let mut state = lock(&self.state);
        let result = state.resolve(archive, path).and_then(|key| {
            state.files.remove(&key).map(|_| ()).ok_or(codes::NOT_FOUND)
        });
        status_of(result)
    }

    fn rename_file(
        &self,
        src_archive: u64,
        src: &FsPath<'_>,
        dst_archive: u64,
        dst: &FsPath<'_>,
    ) -> StatusCode {
        status_of(self.rename(src_archive, src, dst_archive, dst, false))
    }

    fn open_directory(&self, archive: u64, path: &FsPath<'_>) -> Result<u32, StatusCode> {
        let mut state = lock(&self.state);
        let (archive_id, path) = state.resolve(archive, path)?;
        if !state.dir_exists(archive_id, &path) {
            return Err(codes::NOT_FOUND);
        }
        let handle = state.alloc_handle();
        state.open_dirs.insert(
            handle,
            OpenDirectory {
                archive_id,
                path,
                position: 0,
            },
        );
        Ok(handle)
    }

    fn create_directory(&self, archive: u64, path: &FsPath<'_>, _attributes: u32) -> StatusCode {
        let mut state = lock(&self.state);
        let result = state.resolve(archive, path).and_then(|key| {
            if state.exists(&key) {
                return Err(codes::ALREADY_EXISTS);
            }
            if !state.parent_exists(key.0, &key.1) {
                return Err(codes::NOT_FOUND);
            }
            state.dirs.insert(key);
            Ok(())
        });
        status_of(result)
    }

    fn delete_directory(&self, archive: u64, path: &FsPath<'_>, recursive: bool) -> StatusCode {
        let mut state = lock(&self.state);
        let result = state.resolve(archive, path).and_then(|(archive_id, dir)| {
            if !state.dirs.contains(&(archive_id, dir.clone())) {
                return Err(codes::NOT_FOUND);
            }
            let has_children = !state.children(archive_id, &dir).is_empty();
            if has_children && !recursive {
                return Err(codes::NOT_EMPTY);
            }
            state
                .dirs
                .retain(|(a, p)| !(*a == archive_id && (p == &dir || is_below(p, &dir))));
            state
                .files
                .retain(|(a, p), _| !(*a == archive_id && is_below(p, &dir)));
            Ok(())
        });
        status_of(result)
    }

    fn rename_directory(
        &self,
        src_archive: u64,
        src: &FsPath<'_>,
        dst_archive: u64,
        dst: &FsPath<'_>,
    ) -> StatusCode {
        status_of(self.rename(src_archive, src, dst_archive, dst, true))
    }

    fn free_bytes(&self, archive: u64) -> Result<u64, StatusCode> {
        let state = lock(&self.state);
        let archive_id = state.archive_id(archive)?;
        let used: u64 = state
            .files
            .iter()
            .filter(|((a, _), _)| *a == archive_id)
            .map(|(_, f)| f.data.len() as u64)
            .sum();
        Ok(self.capacity.saturating_sub(used))
    }

    fn read_file(&self, handle: u32, offset: u64, out: &mut [u8]) -> Result<usize, StatusCode> {
        let mut state = lock(&self.state);
        let file = state.file_mut(handle)?;
        let start = usize::try_from(offset).map_err(|_| codes::INVALID_SIZE)?;
        let available = file.data.get(start..).unwrap_or(&[]);
        let n = available.len().min(out.len());
        out[..n].copy_from_slice(&available[..n]);
        Ok(n)
    }

    fn write_file(
        &self,
        handle: u32,
        offset: u64,
        data: &[u8],
        _flags: u32,
    ) -> Result<usize, StatusCode> {
        let mut state = lock(&self.state);
        let file = state.file_mut(handle)?;
        let start = usize::try_from(offset).map_err(|_| codes::INVALID_SIZE)?;
        let end = start.checked_add(data.len()).ok_or(codes::INVALID_SIZE)?;
        if file.data.len() < end {
            file.data.resize(end, 0);
        }
        file.data[start..end].copy_from_slice(data);
        Ok(data.len())
    }

    fn file_size(&self, handle: u32) -> Result<u64, StatusCode> {
        let mut state = lock(&self.state);
        Ok(state.file_mut(handle)?.data.len() as u64)
    }

    fn set_file_size(&self, handle: u32, size: u64) -> StatusCode {
        let mut state = lock(&self.state);
        let result = state.file_mut(handle).and_then(|file| {
            let len = usize::try_from(size).map_err(|_| codes::INVALID_SIZE)?;
            file.data.resize(len, 0);
            Ok(())
        });
        status_of(result)
    }

    fn file_attributes(&self, handle: u32) -> Result<u32, StatusCode> {
        let mut state = lock(&self.state);
        Ok(state.file_mut(handle)?.attributes)
    }

    fn set_file_attributes(&self, handle: u32, attributes: u32) -> StatusCode {
        let mut state = lock(&self.state);
        let result = state.file_mut(handle).map(|file| file.attributes = attributes);
        status_of(result)
    }

    fn flush_file(&self, handle: u32) -> StatusCode {
        let mut state = lock(&self.state);
        status_of(state.file_mut(handle).map(|_| ()))
    }

    fn close_file(&self, handle: u32) -> StatusCode {
        let released = lock(&self.state).open_files.remove(&handle).is_some();
        self.close_result(released)
    }

    fn read_directory(
        &self,
        handle: u32,
        max_entries: usize,
    ) -> Result<Vec<DirectoryEntry>, StatusCode> {
        let mut state = lock(&self.state);
        let (archive_id, path, position) = {
            let dir = state.open_dirs.get(&handle).ok_or(codes::INVALID_HANDLE)?;
            (dir.archive_id, dir.path.clone(), dir.position)
        };
        let entries: Vec<DirectoryEntry> = state
            .children(archive_id, &path)
            .into_iter()
            .skip(position)
            .take(max_entries)
            .collect();
        if let Some(dir) = state.open_dirs.get_mut(&handle) {
            dir.position += entries.len();
        }
        Ok(entries)
    }

    fn close_directory(&self, handle: u32) -> StatusCode {
        let released = lock(&self.state).open_dirs.remove(&handle).is_some();
        self.close_result(released)
    }

    fn control_archive(
        &self,
        archive: u64,
        action: u32,
        _input: &[u8],
        _output: &mut [u8],
    ) -> StatusCode {
        if let Err(status) = lock(&self.state).archive_id(archive) {
            return status;
        }
        match action {
            ACTION_COMMIT_SAVE_DATA => {
                self.commits.fetch_add(1, Ordering::SeqCst);
                StatusCode::SUCCESS
            }
            _ => codes::UNSUPPORTED,
        }
    }
}

// ── Init/exit bracket ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Bracket {
    active: AtomicBool,
    inits: AtomicUsize,
}

impl Bracket {
    fn enter(&self) -> StatusCode {
        self.active.store(true, Ordering::SeqCst);
        self.inits.fetch_add(1, Ordering::SeqCst);
        StatusCode::SUCCESS
    }

    fn leave(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StatusCode> {
        if self.active.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(codes::NOT_INITIALIZED)
        }
    }
}

// ── Title management ──────────────────────────────────────────────────────────

/// Installed-title table per media type.
#[derive(Debug, Default)]
pub struct MemoryTitles {
    titles: HashMap<i8, Vec<u64>>,
    bracket: Bracket,
}

impl MemoryTitles {
    pub fn with_titles(mut self, media: i8, ids: &[u64]) -> Self {
        self.titles.entry(media).or_default().extend_from_slice(ids);
        self
    }
}

impl Subsystem for MemoryTitles {
    fn name(&self) -> &'static str {
        "am"
    }

    fn init(&self) -> StatusCode {
        self.bracket.enter()
    }

    fn exit(&self) {
        self.bracket.leave();
    }
}

impl TitleManager for MemoryTitles {
    fn title_count(&self, media: i8) -> Result<u32, StatusCode> {
        self.bracket.check()?;
        Ok(self.titles.get(&media).map_or(0, |t| t.len() as u32))
    }

    fn title_list(&self, media: i8, max: usize) -> Result<Vec<u64>, StatusCode> {
        self.bracket.check()?;
        Ok(self
            .titles
            .get(&media)
            .map(|t| t.iter().copied().take(max).collect())
            .unwrap_or_default())
    }
}

// ── Configuration blocks ──────────────────────────────────────────────────────

/// Configuration block table.
#[derive(Debug, Default)]
pub struct MemoryConfigBlocks {
    blocks: HashMap<u32, Vec<u8>>,
    bracket: Bracket,
}

impl MemoryConfigBlocks {
    pub fn with_block(mut self, block_id: u32, data: &[u8]) -> Self {
        self.blocks.insert(block_id, data.to_vec());
        self
    }
}

impl Subsystem for MemoryConfigBlocks {
    fn name(&self) -> &'static str {
        "cfg"
    }

    fn init(&self) -> StatusCode {
        self.bracket.enter()
    }

    fn exit(&self) {
        self.bracket.leave();
    }
}

impl ConfigBlocks for MemoryConfigBlocks {
    fn read_block(&self, block_id: u32, out: &mut [u8]) -> StatusCode {
        if let Err(status) = self.bracket.check() {
            return status;
        }
        match self.blocks.get(&block_id) {
            None => codes::NOT_FOUND,
            Some(block) if block.len() < out.len() => codes::INVALID_SIZE,
            Some(block) => {
                out.copy_from_slice(&block[..out.len()]);
                StatusCode::SUCCESS
            }
        }
    }
}

// ── Input ─────────────────────────────────────────────────────────────────────

/// Sensor switches and calibration data.
#[derive(Debug)]
pub struct MemoryHid {
    accelerometer: AtomicBool,
    gyroscope: AtomicBool,
    raw_to_dps: f32,
    calibration: GyroCalibration,
}

impl Default for MemoryHid {
    fn default() -> Self {
        Self {
            accelerometer: AtomicBool::new(false),
            gyroscope: AtomicBool::new(false),
            raw_to_dps: 14.375,
            calibration: GyroCalibration::default(),
        }
    }
}

impl MemoryHid {
    pub fn accelerometer_enabled(&self) -> bool {
        self.accelerometer.load(Ordering::SeqCst)
    }

    pub fn gyroscope_enabled(&self) -> bool {
        self.gyroscope.load(Ordering::SeqCst)
    }
}

impl HidService for MemoryHid {
    fn enable_accelerometer(&self) -> StatusCode {
        self.accelerometer.store(true, Ordering::SeqCst);
        StatusCode::SUCCESS
    }

    fn disable_accelerometer(&self) -> StatusCode {
        self.accelerometer.store(false, Ordering::SeqCst);
        StatusCode::SUCCESS
    }

    fn enable_gyroscope(&self) -> StatusCode {
        self.gyroscope.store(true, Ordering::SeqCst);
        StatusCode::SUCCESS
    }

    fn disable_gyroscope(&self) -> StatusCode {
        self.gyroscope.store(false, Ordering::SeqCst);
        StatusCode::SUCCESS
    }

    fn gyro_raw_to_dps(&self) -> Result<f32, StatusCode> {
        Ok(self.raw_to_dps)
    }

    fn gyro_calibration(&self) -> Result<GyroCalibration, StatusCode> {
        Ok(self.calibration)
    }
}

/// Controller whose state is set by the test or host shell.
#[derive(Debug, Default)]
pub struct MemoryInput {
    state: Mutex<ControllerState>,
    samples: AtomicU64,
}

impl MemoryInput {
    pub fn set_state(&self, state: ControllerState) {
        *lock(&self.state) = state;
    }

    /// Number of samples taken by the streaming worker.
    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::SeqCst)
    }
}

impl InputSampler for MemoryInput {
    fn sample(&self) -> ControllerState {
        self.samples.fetch_add(1, Ordering::Relaxed);
        *lock(&self.state)
    }
}

/// Fixed process information.
///
/// `program_info` of `None` makes the loader query fail, as it does when the
/// device firmware lacks the call.
#[derive(Debug, Clone)]
pub struct MemoryProcess {
    pub title_id: u64,
    pub product: ProductInfo,
    pub program_info: Option<[u8; PROGRAM_INFO_SIZE]>,
    pub code: Vec<u8>,
}

impl MemoryProcess {
    /// A process with a recognisable product code, an extended header whose
    /// first bytes name the application, and a 4 KiB code segment counting
    /// up from zero.
    pub fn new(title_id: u64) -> Self {
        let mut product_code = [0u8; 0x10];
        product_code[..10].copy_from_slice(b"CTR-P-TTHR");
        let mut program_info = [0u8; PROGRAM_INFO_SIZE];
        program_info[..6].copy_from_slice(b"tether");
        program_info[0x200..0x208].copy_from_slice(&title_id.to_le_bytes());
        Self {
            title_id,
            product: ProductInfo {
                product_code,
                company_code: *b"00",
                remaster_version: 0,
            },
            program_info: Some(program_info),
            code: (0..0x1000u32).map(|i| i as u8).collect(),
        }
    }
}

impl ProcessInfo for MemoryProcess {
    fn title_id(&self) -> u64 {
        self.title_id
    }

    fn product_info(&self) -> Result<ProductInfo, StatusCode> {
        Ok(self.product)
    }

    fn last_program_info(&self) -> Result<[u8; PROGRAM_INFO_SIZE], StatusCode> {
        self.program_info.ok_or(codes::NOT_INITIALIZED)
    }

    fn code(&self) -> Result<&[u8], StatusCode> {
        Ok(&self.code)
    }
}

// ── Bundle ────────────────────────────────────────────────────────────────────

/// A complete set of in-memory services plus handles to the fakes tests poke at.
pub struct MemoryBackend {
    pub fs: Arc<MemoryFileSystem>,
    pub hid: Arc<MemoryHid>,
    pub input: Arc<MemoryInput>,
    services: Services,
}

impl MemoryBackend {
    pub fn new(
        fs: MemoryFileSystem,
        titles: MemoryTitles,
        config_blocks: MemoryConfigBlocks,
        title_id: u64,
    ) -> Self {
        let fs = Arc::new(fs);
        let hid = Arc::new(MemoryHid::default());
        let input = Arc::new(MemoryInput::default());
        let titles: Box<dyn TitleManager> = Box::new(titles);
        let config_blocks: Box<dyn ConfigBlocks> = Box::new(config_blocks);

        let services = Services {
            process: Arc::new(MemoryProcess::new(title_id)),
            fs: Arc::clone(&fs) as Arc<dyn FileSystem>,
            titles: Arc::new(ExclusiveSubsystem::new(titles)),
            config_blocks: Arc::new(ExclusiveSubsystem::new(config_blocks)),
            hid: Arc::clone(&hid) as Arc<dyn HidService>,
            input: Arc::clone(&input) as Arc<dyn InputSampler>,
            program_info: None,
        };
        Self {
            fs,
            hid,
            input,
            services,
        }
    }

    /// Replaces the process information the services report.
    pub fn with_process(mut self, process: MemoryProcess) -> Self {
        self.services.process = Arc::new(process);
        self
    }

    /// A small populated device used by the host build of the server.
    pub fn demo() -> Self {
        let fs = MemoryFileSystem::default()
            .with_file(0x4, "/readme.txt", b"tether host backend\n")
            .with_file(0x4, "/saves/slot0.bin", &[0u8; 256])
            .with_exefs_section(ExeFsSection::Icon, &[0x53, 0x4D, 0x44, 0x48])
            .with_exefs_section(ExeFsSection::Banner, b"CBMD");
        let titles = MemoryTitles::default()
            .with_titles(1, &[0x0004_0000_0003_0800, 0x0004_0000_0008_F800])
            .with_titles(2, &[0x0004_0000_0017_4600]);
        // 0x000A0002: system language, 1 byte (English).
        let config_blocks = MemoryConfigBlocks::default().with_block(0x000A_0002, &[1]);
        Self::new(fs, titles, config_blocks, 0x0004_0000_0003_0800)
    }

    pub fn services(&self) -> Services {
        self.services.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::native::OPEN_READ;

    fn archive(fs: &MemoryFileSystem) -> u64 {
        let empty = FsPath {
            kind: PathType::Empty as u32,
            data: &[0],
        };
        fs.open_archive(0x4, &empty).unwrap()
    }

    fn path(wire: &[u8]) -> FsPath<'_> {
        FsPath::parse(wire).unwrap()
    }

    #[test]
    fn test_path_helpers() {
        assert_eq!(parent_of("/a/b"), Some("/a"));
        assert_eq!(parent_of("/a"), Some("/"));
        assert_eq!(parent_of("/"), None);
        assert_eq!(name_of("/a/b.txt"), "b.txt");
        assert!(is_below("/a/b", "/a"));
        assert!(!is_below("/ab", "/a"));
    }

    #[test]
    fn test_open_missing_file_without_create_fails() {
        // Arrange
        let fs = MemoryFileSystem::default();
        let arch = archive(&fs);
        let wire = FsPath::encode_ascii("/missing");

        // Act
        let result = fs.open_file(arch, &path(&wire), 1, 0);

        // Assert
        assert_eq!(result, Err(codes::NOT_FOUND));
    }

    #[test]
    fn test_write_then_read_back() {
        let fs = MemoryFileSystem::default();
        let arch = archive(&fs);
        let wire = FsPath::encode_ascii("/f.bin");
        let handle = fs.open_file(arch, &path(&wire), 0x7, 0).unwrap();

        fs.write_file(handle, 2, b"xyz", 0).unwrap();
        let mut out = [0u8; 8];
        let n = fs.read_file(handle, 0, &mut out).unwrap();

        assert_eq!(n, 5);
        assert_eq!(&out[..5], &[0, 0, b'x', b'y', b'z']);
    }

    #[test]
    fn test_delete_non_empty_directory_requires_recursive() {
        let fs = MemoryFileSystem::default().with_file(0x4, "/d/f", b"1");
        let arch = archive(&fs);
        let wire = FsPath::encode_ascii("/d");

        assert_eq!(fs.delete_directory(arch, &path(&wire), false), codes::NOT_EMPTY);
        assert_eq!(fs.delete_directory(arch, &path(&wire), true), StatusCode::SUCCESS);
        assert_eq!(fs.file_contents(0x4, "/d/f"), None);
    }

    #[test]
    fn test_rename_directory_moves_children() {
        let fs = MemoryFileSystem::default().with_file(0x4, "/old/f", b"1");
        let arch = archive(&fs);
        let src = FsPath::encode_ascii("/old");
        let dst = FsPath::encode_ascii("/new");

        let status = fs.rename_directory(arch, &path(&src), arch, &path(&dst));

        assert_eq!(status, StatusCode::SUCCESS);
        assert_eq!(fs.file_contents(0x4, "/new/f"), Some(b"1".to_vec()));
    }

    #[test]
    fn test_read_directory_pages_through_entries() {
        let fs = MemoryFileSystem::default()
            .with_file(0x4, "/d/a", b"")
            .with_file(0x4, "/d/b", b"")
            .with_file(0x4, "/d/c", b"");
        let arch = archive(&fs);
        let wire = FsPath::encode_ascii("/d");
        let dir = fs.open_directory(arch, &path(&wire)).unwrap();

        let first = fs.read_directory(dir, 2).unwrap();
        let second = fs.read_directory(dir, 2).unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].name, "c");
    }

    #[test]
    fn test_failing_close_still_releases_handle() {
        let fs = MemoryFileSystem::default();
        let arch = archive(&fs);
        fs.fail_closes(true);

        assert_eq!(fs.close_archive(arch), codes::CLOSE_FAILED);
        assert_eq!(fs.open_handle_count(), 0);
        assert_eq!(fs.close_calls(), 1);
    }

    #[test]
    fn test_exefs_section_opens_through_romfs_binary_path() {
        // Arrange
        let fs = MemoryFileSystem::default().with_exefs_section(ExeFsSection::Logo, b"logo!");
        let raw = ExeFsSection::Logo.file_path();
        let file_path = FsPath {
            kind: PathType::Binary as u32,
            data: &raw,
        };
        let empty = FsPath {
            kind: PathType::Empty as u32,
            data: &[0],
        };

        // Act
        let handle = fs
            .open_file_directly(ARCHIVE_ROMFS, &empty, &file_path, OPEN_READ, 0)
            .unwrap();

        // Assert
        assert_eq!(fs.file_size(handle), Ok(5));
        let missing = ExeFsSection::Icon.file_path();
        let missing = FsPath {
            kind: PathType::Binary as u32,
            data: &missing,
        };
        assert_eq!(
            fs.open_file_directly(ARCHIVE_ROMFS, &empty, &missing, 1, 0),
            Err(codes::NOT_FOUND)
        );
    }

    #[test]
    fn test_control_archive_commits_on_open_archive_only() {
        let fs = MemoryFileSystem::default();
        let arch = archive(&fs);
        let control = |archive, action| fs.control_archive(archive, action, &[], &mut [0u8; 4]);

        assert_eq!(control(arch, ACTION_COMMIT_SAVE_DATA), StatusCode::SUCCESS);
        assert_eq!(control(arch, 7), codes::UNSUPPORTED);
        assert_eq!(control(99, ACTION_COMMIT_SAVE_DATA), codes::INVALID_HANDLE);
        assert_eq!(fs.commits(), 1);
    }

    #[test]
    fn test_process_without_program_info_fails_capture() {
        let mut process = MemoryProcess::new(5);
        process.program_info = None;
        let mut services = MemoryBackend::demo().with_process(process).services();

        assert_eq!(services.capture_program_info(), Err(codes::NOT_INITIALIZED));
        assert!(services.program_info.is_none());
    }

    #[test]
    fn test_titles_refuse_calls_outside_bracket() {
        let titles = MemoryTitles::default().with_titles(1, &[7]);

        assert_eq!(titles.title_count(1), Err(codes::NOT_INITIALIZED));
        titles.init();
        assert_eq!(titles.title_count(1), Ok(1));
        titles.exit();
    }
}
