//! Backing storage for channel sample buffers.
//!
//! Small buffers live on the heap. Buffers at or above the configured threshold
//! are backed by a uniquely named temporary file mapped into memory, so signals
//! larger than physical memory can still be edited. Every open mapping is kept
//! in a process-wide registry until it is released.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use memmap2::MmapMut;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::AllocConfig;
use crate::error::{try_vec, EditError, Result};
use crate::Sample;

const SAMPLE_BYTES: usize = std::mem::size_of::<Sample>();
const MAX_NAME_PROBES: usize = 64;

static NEXT_MAPPING_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_NAME_SEQ: AtomicU64 = AtomicU64::new(1);

fn registry() -> &'static Mutex<HashMap<u64, PathBuf>> {
    static REGISTRY: OnceLock<Mutex<HashMap<u64, PathBuf>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Paths of every mapping currently held by this process.
pub fn open_mappings() -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = registry().lock().values().cloned().collect();
    paths.sort();
    paths
}

/// Create a new file named `<prefix>-<pid>-<seq>-<rand>.<ext>` inside `dir`.
///
/// Candidate names are probed for existence first and then committed with
/// `create_new`, so concurrent callers never end up sharing a file.
pub fn create_unique_file(dir: &Path, prefix: &str, ext: &str) -> Result<(File, PathBuf)> {
    std::fs::create_dir_all(dir)
        .map_err(|e| EditError::out_of_resources(format!("create {}", dir.display()), e))?;
    let pid = std::process::id();
    for _ in 0..MAX_NAME_PROBES {
        let seq = NEXT_NAME_SEQ.fetch_add(1, Ordering::Relaxed);
        let salt: u32 = rand::random();
        let path = dir.join(format!("{prefix}-{pid}-{seq}-{salt:08x}.{ext}"));
        if path.exists() {
            continue;
        }
        match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => return Ok((file, path)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(EditError::out_of_resources(
                    format!("create temp file in {}", dir.display()),
                    e,
                ))
            }
        }
    }
    Err(EditError::out_of_resources(
        format!("create temp file in {}", dir.display()),
        "no free file name after repeated probes",
    ))
}

#[derive(Clone, Debug)]
pub struct Allocator {
    threshold_bytes: usize,
    temp_dir: PathBuf,
}

impl Allocator {
    pub fn new(cfg: &AllocConfig) -> Self {
        Self {
            threshold_bytes: cfg.mmap_threshold_bytes,
            temp_dir: cfg.temp_dir.clone(),
        }
    }

    /// Heap-only allocator, handy for clipboards and tests.
    pub fn heap() -> Self {
        Self {
            threshold_bytes: usize::MAX,
            temp_dir: std::env::temp_dir(),
        }
    }

    pub fn threshold_bytes(&self) -> usize {
        self.threshold_bytes
    }

    /// Zero-filled storage for `byte_size` bytes (rounded down to whole samples).
    pub fn allocate(&self, byte_size: usize) -> Result<SampleBuffer> {
        let len = byte_size / SAMPLE_BYTES;
        if len == 0 || byte_size < self.threshold_bytes {
            let mut v = try_vec(len, "allocate sample buffer")?;
            v.resize(len, 0);
            return Ok(SampleBuffer {
                storage: Storage::Heap(v),
            });
        }
        let region = MappedRegion::create(&self.temp_dir, len)?;
        Ok(SampleBuffer {
            storage: Storage::Mapped(region),
        })
    }

    pub fn allocate_samples(&self, len: usize) -> Result<SampleBuffer> {
        let bytes = len
            .checked_mul(SAMPLE_BYTES)
            .ok_or_else(|| EditError::out_of_resources("allocate sample buffer", "size overflow"))?;
        self.allocate(bytes)
    }

    /// New buffer holding a copy of `data`.
    pub fn allocate_from(&self, data: &[Sample]) -> Result<SampleBuffer> {
        let mut buf = self.allocate_samples(data.len())?;
        buf.copy_from_slice(data);
        Ok(buf)
    }

    /// Build `head ++ middle ++ tail` into one freshly allocated buffer.
    pub fn allocate_joined(&self, parts: &[&[Sample]]) -> Result<SampleBuffer> {
        let total = parts.iter().map(|p| p.len()).sum();
        let mut buf = self.allocate_samples(total)?;
        let mut at = 0usize;
        for part in parts {
            buf[at..at + part.len()].copy_from_slice(part);
            at += part.len();
        }
        Ok(buf)
    }
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new(&AllocConfig::default())
    }
}

/// Release a buffer, reporting teardown failures instead of swallowing them.
pub fn release(buffer: SampleBuffer) -> Result<()> {
    match buffer.storage {
        Storage::Heap(_) => Ok(()),
        Storage::Mapped(mut region) => region.teardown(),
    }
}

/// Owned, fixed-length sample storage.
pub struct SampleBuffer {
    storage: Storage,
}

enum Storage {
    Heap(Vec<Sample>),
    Mapped(MappedRegion),
}

impl SampleBuffer {
    pub fn from_vec(samples: Vec<Sample>) -> Self {
        Self {
            storage: Storage::Heap(samples),
        }
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self.storage, Storage::Mapped(_))
    }

    pub fn backing_path(&self) -> Option<&Path> {
        match &self.storage {
            Storage::Heap(_) => None,
            Storage::Mapped(region) => Some(region.path.as_path()),
        }
    }

    pub fn byte_size(&self) -> usize {
        self.len() * SAMPLE_BYTES
    }
}

impl Deref for SampleBuffer {
    type Target = [Sample];

    fn deref(&self) -> &[Sample] {
        match &self.storage {
            Storage::Heap(v) => v,
            Storage::Mapped(region) => region.samples(),
        }
    }
}

impl DerefMut for SampleBuffer {
    fn deref_mut(&mut self) -> &mut [Sample] {
        match &mut self.storage {
            Storage::Heap(v) => v,
            Storage::Mapped(region) => region.samples_mut(),
        }
    }
}

impl std::fmt::Debug for SampleBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleBuffer")
            .field("len", &self.len())
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

struct MappedRegion {
    id: u64,
    len: usize,
    map: Option<MmapMut>,
    path: PathBuf,
}

impl MappedRegion {
    fn create(dir: &Path, len: usize) -> Result<Self> {
        let bytes = len * SAMPLE_BYTES;
        let (file, path) = create_unique_file(dir, "waveforge", "buf")?;
        let map = match Self::map_file(&file, bytes) {
            Ok(map) => map,
            Err(e) => {
                let _ = std::fs::remove_file(&path);
                return Err(e);
            }
        };
        let id = NEXT_MAPPING_ID.fetch_add(1, Ordering::Relaxed);
        registry().lock().insert(id, path.clone());
        debug!(bytes, path = %path.display(), "mapped sample buffer");
        Ok(Self {
            id,
            len,
            map: Some(map),
            path,
        })
    }

    fn map_file(file: &File, bytes: usize) -> Result<MmapMut> {
        file.set_len(bytes as u64)
            .map_err(|e| EditError::out_of_resources("grow buffer file", e))?;
        // SAFETY: the file was created by us with `create_new` and is not
        // truncated while the mapping lives.
        unsafe { MmapMut::map_mut(file) }
            .map_err(|e| EditError::out_of_resources("map buffer file", e))
    }

    fn samples(&self) -> &[Sample] {
        match &self.map {
            Some(map) => bytemuck::cast_slice(&map[..self.len * SAMPLE_BYTES]),
            None => &[],
        }
    }

    fn samples_mut(&mut self) -> &mut [Sample] {
        let len = self.len;
        match &mut self.map {
            Some(map) => bytemuck::cast_slice_mut(&mut map[..len * SAMPLE_BYTES]),
            None => &mut [],
        }
    }

    fn teardown(&mut self) -> Result<()> {
        let Some(map) = self.map.take() else {
            return Ok(());
        };
        drop(map);
        registry().lock().remove(&self.id);
        debug!(path = %self.path.display(), "released sample buffer");
        std::fs::remove_file(&self.path).map_err(|e| EditError::io(&self.path, e))
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            warn!("buffer release failed: {e}");
        }
    }
}
