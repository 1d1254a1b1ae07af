//! Shared playback control block.
//!
//! A small file mapped by both the editing process and the worker. The worker
//! writes its pid, state and the playback position; the editor writes the stop,
//! pause and seek requests. All fields are atomics so either side can poll
//! without locking.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use memmap2::MmapMut;
use tracing::warn;

use crate::alloc::create_unique_file;
use crate::error::{EditError, Result};

/// Position value while no worker is streaming.
pub const NOT_PLAYING: u64 = u64::MAX;
const NO_SEEK: u64 = u64::MAX;
const MAGIC: u32 = u32::from_le_bytes(*b"WFCB");

#[repr(C)]
struct ControlBlock {
    magic: AtomicU32,
    pid: AtomicU32,
    stop: AtomicU32,
    paused: AtomicU32,
    state: AtomicU32,
    _reserved: AtomicU32,
    position: AtomicU64,
    seek: AtomicU64,
}

const BLOCK_BYTES: usize = std::mem::size_of::<ControlBlock>();

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Running,
    Finished,
    Failed,
}

impl WorkerState {
    fn from_raw(raw: u32) -> Self {
        match raw {
            1 => WorkerState::Running,
            2 => WorkerState::Finished,
            3 => WorkerState::Failed,
            _ => WorkerState::Starting,
        }
    }

    fn raw(self) -> u32 {
        match self {
            WorkerState::Starting => 0,
            WorkerState::Running => 1,
            WorkerState::Finished => 2,
            WorkerState::Failed => 3,
        }
    }
}

pub struct SharedControl {
    block: NonNull<ControlBlock>,
    _map: MmapMut,
    path: PathBuf,
    owner: bool,
}

// SAFETY: every field of the block is an atomic and the mapping lives as long
// as the struct.
unsafe impl Send for SharedControl {}
unsafe impl Sync for SharedControl {}

impl SharedControl {
    /// Create a fresh block in `dir`; the file is removed when this handle drops.
    pub fn create(dir: &Path) -> Result<Self> {
        let (file, path) = create_unique_file(dir, "waveforge-ctl", "ctl")?;
        file.set_len(BLOCK_BYTES as u64)
            .map_err(|e| EditError::out_of_resources("size control block", e))?;
        let control = Self::map(&file, path, true)?;
        let b = control.block();
        b.magic.store(MAGIC, Ordering::SeqCst);
        b.position.store(NOT_PLAYING, Ordering::SeqCst);
        b.seek.store(NO_SEEK, Ordering::SeqCst);
        Ok(control)
    }

    /// Attach to a block created by another process.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| EditError::io(path, e))?;
        let len = file.metadata().map_err(|e| EditError::io(path, e))?.len();
        if len < BLOCK_BYTES as u64 {
            return Err(EditError::out_of_resources(
                "attach control block",
                format!("{} is too small", path.display()),
            ));
        }
        let control = Self::map(&file, path.to_path_buf(), false)?;
        if control.block().magic.load(Ordering::SeqCst) != MAGIC {
            return Err(EditError::out_of_resources(
                "attach control block",
                format!("{} is not a control block", path.display()),
            ));
        }
        Ok(control)
    }

    fn map(file: &std::fs::File, path: PathBuf, owner: bool) -> Result<Self> {
        // SAFETY: the file is sized to hold the block before mapping and is
        // only ever accessed through atomics.
        let mut map = unsafe { MmapMut::map_mut(file) }
            .map_err(|e| EditError::out_of_resources("map control block", e))?;
        let block = NonNull::new(map.as_mut_ptr() as *mut ControlBlock).ok_or_else(|| {
            EditError::out_of_resources("map control block", "null mapping")
        })?;
        Ok(Self {
            block,
            _map: map,
            path,
            owner,
        })
    }

    fn block(&self) -> &ControlBlock {
        // SAFETY: page aligned, sized for the block, alive while `self` is.
        unsafe { self.block.as_ref() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn request_stop(&self) {
        self.block().stop.store(1, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.block().stop.load(Ordering::SeqCst) != 0
    }

    pub fn set_paused(&self, paused: bool) {
        self.block().paused.store(paused as u32, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.block().paused.load(Ordering::SeqCst) != 0
    }

    pub fn request_seek(&self, frame: u64) {
        self.block().seek.store(frame, Ordering::SeqCst);
    }

    pub fn take_seek(&self) -> Option<u64> {
        let v = self.block().seek.swap(NO_SEEK, Ordering::SeqCst);
        (v != NO_SEEK).then_some(v)
    }

    /// Current playback frame, `None` when the worker is not streaming.
    pub fn position(&self) -> Option<u64> {
        let v = self.block().position.load(Ordering::SeqCst);
        (v != NOT_PLAYING).then_some(v)
    }

    pub fn set_position(&self, frame: u64) {
        self.block().position.store(frame, Ordering::SeqCst);
    }

    pub fn clear_position(&self) {
        self.block().position.store(NOT_PLAYING, Ordering::SeqCst);
    }

    pub fn set_pid(&self, pid: u32) {
        self.block().pid.store(pid, Ordering::SeqCst);
    }

    pub(crate) fn pid(&self) -> u32 {
        self.block().pid.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_raw(self.block().state.load(Ordering::SeqCst))
    }

    pub fn set_state(&self, state: WorkerState) {
        self.block().state.store(state.raw(), Ordering::SeqCst);
    }
}

impl Drop for SharedControl {
    fn drop(&mut self) {
        if self.owner {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!("control block cleanup failed for {}: {e}", self.path.display());
            }
        }
    }
}
