use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EditError, Result};
use crate::playback::protocol::{DeviceSpec, WorkerMode};

pub const MMAP_THRESHOLD_ENV: &str = "WAVEFORGE_MMAP_THRESHOLD";
pub const TEMP_DIR_ENV: &str = "WAVEFORGE_TEMP_DIR";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub alloc: AllocConfig,
    pub history: HistoryConfig,
    pub noise: NoiseConfig,
    pub playback: PlaybackConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocConfig {
    /// Buffers at or above this many bytes are backed by a mapped temp file.
    pub mmap_threshold_bytes: usize,
    pub temp_dir: PathBuf,
}

impl Default for AllocConfig {
    fn default() -> Self {
        Self {
            mmap_threshold_bytes: 64 * 1024 * 1024,
            temp_dir: std::env::temp_dir().join("waveforge"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub memory_limit_bytes: usize,
    pub max_entries: usize,
    pub keep_redo: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            memory_limit_bytes: 256 * 1024 * 1024,
            max_entries: 200,
            keep_redo: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    pub seed: u64,
    /// Peak noise level relative to full scale, 0..1.
    pub amplitude: f32,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            seed: 0x5eed_0f_a0d10,
            amplitude: 0.5,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub fragment_frames: usize,
    pub bits: u16,
    pub worker: WorkerMode,
    /// Worker executable; looked up next to the running binary when unset.
    pub worker_path: Option<PathBuf>,
    pub device: DeviceSpec,
    pub input_device: DeviceSpec,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            fragment_frames: 1024,
            bits: 16,
            worker: WorkerMode::Process,
            worker_path: None,
            device: DeviceSpec::Default,
            input_device: DeviceSpec::Default,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| EditError::io(path, e))?;
        let mut cfg: EngineConfig = toml::from_str(&text).map_err(|e| {
            EditError::invalid_args("config", format!("{}: {e}", path.display()))
        })?;
        cfg.apply_env();
        Ok(cfg)
    }

    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env();
        cfg
    }

    pub fn apply_env(&mut self) {
        if let Ok(raw) = std::env::var(MMAP_THRESHOLD_ENV) {
            if let Ok(bytes) = raw.trim().parse::<usize>() {
                self.alloc.mmap_threshold_bytes = bytes;
            }
        }
        if let Ok(dir) = std::env::var(TEMP_DIR_ENV) {
            if !dir.trim().is_empty() {
                self.alloc.temp_dir = PathBuf::from(dir);
            }
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| EditError::invalid_args("config", e.to_string()))
    }
}
