//! Read-only interleaved sample image shared with the worker.
//!
//! Layout: `WFIM`, channel count (u32 LE), frame count (u64 LE), index of
//! the first frame (u64 LE), then interleaved native-endian `i32` samples. The worker maps the file read-only,
//! so the editor's own buffers are never touched from another process.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use tracing::warn;

use crate::alloc::create_unique_file;
use crate::error::{try_vec, EditError, Result};
use crate::signal::Signal;
use crate::Sample;

const MAGIC: &[u8; 4] = b"WFIM";
const HEADER_BYTES: usize = 24;
const SAMPLE_BYTES: usize = std::mem::size_of::<Sample>();
const WRITE_CHUNK_FRAMES: usize = 4096;

fn header(channels: usize, frames: u64, first: u64) -> [u8; HEADER_BYTES] {
    let mut h = [0u8; HEADER_BYTES];
    h[0..4].copy_from_slice(MAGIC);
    h[4..8].copy_from_slice(&(channels as u32).to_le_bytes());
    h[8..16].copy_from_slice(&frames.to_le_bytes());
    h[16..24].copy_from_slice(&first.to_le_bytes());
    h
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(raw)
}

pub struct SampleImage {
    map: Mmap,
    path: PathBuf,
    channels: usize,
    frames: usize,
    first: usize,
    owner: bool,
}

impl SampleImage {
    /// Snapshot the whole signal into a new image file in `dir`.
    pub fn write(dir: &Path, signal: &Signal) -> Result<Self> {
        Self::write_range(dir, signal, 0, signal.len())
    }

    /// Snapshot frames `start..end` only. Frame indices stay those of the
    /// signal, and shorter channels are padded with silence.
    pub fn write_range(dir: &Path, signal: &Signal, start: usize, end: usize) -> Result<Self> {
        let channels = signal.channel_count();
        let end = end.min(signal.len());
        let start = start.min(end);
        let (file, path) = create_unique_file(dir, "waveforge-img", "img")?;
        let io = |e| EditError::io(&path, e);
        let written = (|| {
            let mut w = BufWriter::new(file);
            w.write_all(&header(channels, (end - start) as u64, start as u64))?;
            let mut chunk: Vec<Sample> = Vec::with_capacity(WRITE_CHUNK_FRAMES * channels);
            let mut at = start;
            while at < end {
                let upto = (at + WRITE_CHUNK_FRAMES).min(end);
                chunk.clear();
                for i in at..upto {
                    chunk.extend(
                        signal
                            .channels()
                            .iter()
                            .map(|c| c.samples().get(i).copied().unwrap_or(0)),
                    );
                }
                w.write_all(bytemuck::cast_slice(&chunk[..]))?;
                at = upto;
            }
            w.flush()
        })();
        if let Err(e) = written {
            let _ = std::fs::remove_file(&path);
            return Err(io(e));
        }
        let mut image = Self::open(&path)?;
        image.owner = true;
        Ok(image)
    }

    pub fn open(path: &Path) -> Result<Self> {
        let bad = |reason: &str| EditError::invalid_container(path, reason);
        let file = File::open(path).map_err(|e| EditError::io(path, e))?;
        // SAFETY: image files are written once before being shared and never
        // modified afterwards.
        let map = unsafe { Mmap::map(&file) }
            .map_err(|e| EditError::out_of_resources("map sample image", e))?;
        if map.len() < HEADER_BYTES || &map[0..4] != MAGIC {
            return Err(bad("not a sample image"));
        }
        let channels = u32::from_le_bytes([map[4], map[5], map[6], map[7]]) as usize;
        let declared = read_u64(&map[8..16]) as usize;
        let first = read_u64(&map[16..24]) as usize;
        let available = if channels == 0 {
            0
        } else {
            (map.len() - HEADER_BYTES) / (channels * SAMPLE_BYTES)
        };
        Ok(Self {
            map,
            path: path.to_path_buf(),
            channels,
            frames: declared.min(available),
            first,
            owner: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Signal index of the first frame held.
    pub fn first_frame(&self) -> usize {
        self.first
    }

    /// One past the signal index of the last frame held.
    pub fn end_frame(&self) -> usize {
        self.first + self.frames
    }

    fn samples(&self) -> &[Sample] {
        let end = HEADER_BYTES + self.frames * self.channels * SAMPLE_BYTES;
        bytemuck::cast_slice(&self.map[HEADER_BYTES..end])
    }

    /// Interleaved samples of signal frame `index`; empty outside the image.
    pub fn frame(&self, index: usize) -> &[Sample] {
        if index < self.first || index >= self.end_frame() {
            return &[];
        }
        let at = (index - self.first) * self.channels;
        &self.samples()[at..at + self.channels]
    }

    /// Split into one vector per channel.
    pub fn to_channels(&self) -> Result<Vec<Vec<Sample>>> {
        let mut out = Vec::with_capacity(self.channels);
        for _ in 0..self.channels {
            out.push(try_vec(self.frames, "read capture")?);
        }
        for frame in self.samples().chunks_exact(self.channels.max(1)) {
            for (c, &s) in frame.iter().enumerate() {
                out[c].push(s);
            }
        }
        Ok(out)
    }
}

impl Drop for SampleImage {
    fn drop(&mut self) {
        if self.owner {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!("sample image cleanup failed for {}: {e}", self.path.display());
            }
        }
    }
}

/// Streams captured frames into an image file; the frame count is patched in
/// on `finish`.
pub struct CaptureWriter {
    out: BufWriter<File>,
    path: PathBuf,
    channels: usize,
    frames: u64,
}

impl CaptureWriter {
    pub fn create(path: &Path, channels: usize) -> Result<Self> {
        let file = File::create(path).map_err(|e| EditError::io(path, e))?;
        let mut out = BufWriter::new(file);
        out.write_all(&header(channels, 0, 0))
            .map_err(|e| EditError::io(path, e))?;
        Ok(Self {
            out,
            path: path.to_path_buf(),
            channels,
            frames: 0,
        })
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Append interleaved frames; a trailing partial frame is dropped.
    pub fn push(&mut self, interleaved: &[Sample]) -> Result<()> {
        let whole = interleaved.len() / self.channels.max(1) * self.channels;
        for s in &interleaved[..whole] {
            self.out
                .write_all(&s.to_ne_bytes())
                .map_err(|e| EditError::io(&self.path, e))?;
        }
        self.frames += (whole / self.channels.max(1)) as u64;
        Ok(())
    }

    pub fn finish(mut self) -> Result<u64> {
        let io = |e| EditError::io(&self.path, e);
        self.out.flush().map_err(io)?;
        let file = self.out.get_mut();
        file.seek(SeekFrom::Start(0)).map_err(io)?;
        file.write_all(&header(self.channels, self.frames, 0))
            .map_err(io)?;
        file.flush().map_err(io)?;
        Ok(self.frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_interleaves_and_pads_channels() {
        let dir = std::env::temp_dir().join(format!("waveforge_img_{}", std::process::id()));
        let signal = Signal::from_channels(8000, vec![vec![1, 2, 3], vec![10, 20]]);
        let image = SampleImage::write(&dir, &signal).expect("write");
        assert_eq!(image.channels(), 2);
        assert_eq!(image.frames(), 3);
        assert_eq!(image.frame(1), &[2, 20]);
        assert_eq!(image.frame(2), &[3, 0]);
        assert!(image.frame(3).is_empty());
        let path = image.path().to_path_buf();
        drop(image);
        assert!(!path.exists());
        let _ = std::fs::remove_dir(&dir);
    }

    #[test]
    fn range_image_keeps_signal_indices() {
        let dir = std::env::temp_dir().join(format!("waveforge_img_range_{}", std::process::id()));
        let signal = Signal::from_channels(8000, vec![(0..10_000).collect(), vec![-1; 10_000]]);
        let image = SampleImage::write_range(&dir, &signal, 1000, 5000).expect("write");
        assert_eq!((image.first_frame(), image.end_frame(), image.frames()), (1000, 5000, 4000));
        assert!(image.frame(999).is_empty());
        assert_eq!(image.frame(1000), &[1000, -1]);
        assert_eq!(image.frame(4999), &[4999, -1]);
        assert!(image.frame(5000).is_empty());
        let len = std::fs::metadata(image.path()).expect("stat").len() as usize;
        assert_eq!(len, HEADER_BYTES + 4000 * 2 * SAMPLE_BYTES);
        drop(image);
        let _ = std::fs::remove_dir(&dir);
    }

    #[test]
    fn capture_writer_patches_frame_count() {
        let dir = std::env::temp_dir().join(format!("waveforge_cap_{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("dir");
        let path = dir.join("capture.img");
        let mut writer = CaptureWriter::create(&path, 2).expect("create");
        writer.push(&[1, -1, 2, -2, 9]).expect("push");
        assert_eq!(writer.finish().expect("finish"), 2);
        let image = SampleImage::open(&path).expect("open");
        assert_eq!(image.to_channels().expect("split"), vec![vec![1, 2], vec![-1, -2]]);
        drop(image);
        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_dir(&dir);
    }
}
