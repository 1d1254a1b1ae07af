//! RIFF/RIFX container codec.
//!
//! Layout: container tag, size, `WAVE`, then chunks. `fmt ` carries mode,
//! channel count, rate, average bytes per second, block alignment and bits per
//! sample; `data` carries interleaved PCM. Labels travel in a `cue ` chunk plus
//! a `LIST`/`adtl` chunk of `labl` entries. `RIFX` files store every integer
//! big-endian. Unknown chunks are skipped.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use tracing::{debug, info};

use crate::alloc::Allocator;
use crate::error::{EditError, Result};
use crate::labels::{Label, LabelList};
use crate::pcm::{bytes_per_sample, deinterleave_i16, encode_sample, load_strided};
use crate::signal::Signal;

pub use crate::pcm::ByteOrder;

const PCM_MODE: u16 = 1;
const FMT_LEN: u32 = 16;
const WRITE_BLOCK_FRAMES: usize = 4096;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerInfo {
    pub byte_order: ByteOrder,
    pub mode: u16,
    pub channels: u16,
    pub rate: u32,
    pub avg_bytes_per_sec: u32,
    pub block_align: u16,
    pub bits: u16,
    pub data_offset: usize,
    pub data_len: usize,
}

impl ContainerInfo {
    pub fn frames(&self) -> usize {
        if self.block_align == 0 {
            0
        } else {
            self.data_len / self.block_align as usize
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SaveOptions {
    pub bits: u16,
    pub byte_order: ByteOrder,
    /// Write only the marker range.
    pub selection_only: bool,
    pub write_labels: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            bits: 16,
            byte_order: ByteOrder::Little,
            selection_only: false,
            write_labels: true,
        }
    }
}

struct Fmt {
    mode: u16,
    channels: u16,
    rate: u32,
    avg_bytes_per_sec: u32,
    block_align: u16,
    bits: u16,
}

/// Validate the header and collect labels without touching sample data.
pub fn parse_header(bytes: &[u8], path: &Path) -> Result<(ContainerInfo, Vec<Label>)> {
    let bad = |reason: String| EditError::invalid_container(path, reason);
    if bytes.len() < 12 {
        return Err(bad("truncated header".into()));
    }
    let order = match &bytes[0..4] {
        b"RIFF" => ByteOrder::Little,
        b"RIFX" => ByteOrder::Big,
        _ => return Err(bad("missing RIFF/RIFX tag".into())),
    };
    if &bytes[8..12] != b"WAVE" {
        return Err(bad("missing WAVE tag".into()));
    }

    let mut fmt: Option<Fmt> = None;
    let mut data: Option<(usize, usize)> = None;
    let mut cue_points: Vec<(u32, u32)> = Vec::new();
    let mut names: HashMap<u32, String> = HashMap::new();
    let mut pos = 12usize;
    while pos + 8 <= bytes.len() {
        let id = &bytes[pos..pos + 4];
        let size = order.read_u32(&bytes[pos + 4..pos + 8]) as usize;
        let start = pos + 8;
        let end = start.saturating_add(size).min(bytes.len());
        let body = &bytes[start..end];
        match id {
            b"fmt " => {
                if body.len() < FMT_LEN as usize {
                    return Err(bad(format!("fmt chunk too short ({} bytes)", body.len())));
                }
                fmt = Some(Fmt {
                    mode: order.read_u16(&body[0..2]),
                    channels: order.read_u16(&body[2..4]),
                    rate: order.read_u32(&body[4..8]),
                    avg_bytes_per_sec: order.read_u32(&body[8..12]),
                    block_align: order.read_u16(&body[12..14]),
                    bits: order.read_u16(&body[14..16]),
                });
            }
            b"data" => data = Some((start, end - start)),
            b"cue " => read_cue(body, order, &mut cue_points),
            b"LIST" if body.len() >= 4 && &body[0..4] == b"adtl" => {
                read_adtl(&body[4..], order, &mut names)
            }
            _ => debug!(chunk = %String::from_utf8_lossy(id), size, "skipping chunk"),
        }
        pos = start.saturating_add(size + (size & 1));
    }

    let fmt = fmt.ok_or_else(|| bad("missing fmt chunk".into()))?;
    if fmt.mode != PCM_MODE {
        return Err(bad(format!(
            "compression mode {} is not linear PCM",
            fmt.mode
        )));
    }
    let width = bytes_per_sample(fmt.bits)?;
    if fmt.channels == 0 {
        return Err(bad("zero channels".into()));
    }
    if fmt.block_align as usize != width * fmt.channels as usize {
        return Err(bad(format!(
            "block alignment {} does not match {} channels of {} bits",
            fmt.block_align, fmt.channels, fmt.bits
        )));
    }
    let (data_offset, data_len) = data.ok_or_else(|| bad("missing data chunk".into()))?;

    cue_points.sort_by_key(|(_, sample)| *sample);
    let labels = cue_points
        .into_iter()
        .enumerate()
        .map(|(idx, (cue_id, sample))| {
            let name = names
                .remove(&cue_id)
                .unwrap_or_else(|| format!("M{:02}", idx + 1));
            Label::new(sample as usize, name)
        })
        .collect();

    Ok((
        ContainerInfo {
            byte_order: order,
            mode: fmt.mode,
            channels: fmt.channels,
            rate: fmt.rate,
            avg_bytes_per_sec: fmt.avg_bytes_per_sec,
            block_align: fmt.block_align,
            bits: fmt.bits,
            data_offset,
            data_len,
        },
        labels,
    ))
}

fn read_cue(body: &[u8], order: ByteOrder, out: &mut Vec<(u32, u32)>) {
    if body.len() < 4 {
        return;
    }
    let count = order.read_u32(&body[0..4]) as usize;
    for point in body[4..].chunks_exact(24).take(count) {
        out.push((order.read_u32(&point[0..4]), order.read_u32(&point[20..24])));
    }
}

fn read_adtl(mut body: &[u8], order: ByteOrder, out: &mut HashMap<u32, String>) {
    while body.len() >= 8 {
        let id = &body[0..4];
        let size = order.read_u32(&body[4..8]) as usize;
        let end = 8usize.saturating_add(size).min(body.len());
        let sub = &body[8..end];
        if id == b"labl" && sub.len() >= 4 {
            let cue_id = order.read_u32(&sub[0..4]);
            let name = String::from_utf8_lossy(&sub[4..])
                .trim_end_matches('\0')
                .to_string();
            out.insert(cue_id, name);
        }
        let advance = (8 + size + (size & 1)).min(body.len());
        body = &body[advance..];
    }
}

fn open_mapped(path: &Path) -> Result<Mmap> {
    let file = File::open(path).map_err(|e| EditError::io(path, e))?;
    let len = file.metadata().map_err(|e| EditError::io(path, e))?.len();
    if len < 12 {
        return Err(EditError::invalid_container(path, "truncated header"));
    }
    // SAFETY: the mapping is read-only and dropped before this call chain
    // returns; concurrent truncation by another process is not supported.
    unsafe { Mmap::map(&file) }.map_err(|e| EditError::out_of_resources("map container", e))
}

pub fn read_info(path: &Path) -> Result<ContainerInfo> {
    let map = open_mapped(path)?;
    parse_header(&map, path).map(|(info, _)| info)
}

/// Load a container into a new signal. Nothing is allocated until the header
/// has been validated.
pub fn load(path: &Path, alloc: &Allocator) -> Result<Signal> {
    let map = open_mapped(path)?;
    let (info, labels) = parse_header(&map, path)?;
    let frames = info.frames();
    let channels = info.channels as usize;
    let data = &map[info.data_offset..info.data_offset + info.data_len];

    let mut buffers = Vec::with_capacity(channels);
    for _ in 0..channels {
        buffers.push(alloc.allocate_samples(frames)?);
    }
    if info.bits == 16 && channels > 1 {
        let mut views: Vec<&mut [crate::Sample]> = buffers.iter_mut().map(|b| &mut b[..]).collect();
        deinterleave_i16(data, info.byte_order, &mut views);
    } else {
        let width = (info.bits / 8) as usize;
        for (c, buffer) in buffers.iter_mut().enumerate() {
            load_strided(
                data,
                c * width,
                info.block_align as usize,
                info.bits,
                info.byte_order,
                buffer,
            );
        }
    }

    let mut signal = Signal::from_buffers(info.rate, buffers);
    let labels = labels
        .into_iter()
        .map(|l| Label::new(l.position.min(frames), l.name))
        .collect();
    signal.replace_labels(LabelList::from_unsorted(labels));
    info!(
        path = %path.display(),
        channels,
        frames,
        bits = info.bits,
        rate = info.rate,
        "loaded container"
    );
    Ok(signal)
}

fn label_chunks(labels: &[Label], order: ByteOrder) -> Vec<u8> {
    let mut out = Vec::new();
    if labels.is_empty() {
        return out;
    }
    let mut cue = Vec::new();
    order.put_u32(labels.len() as u32, &mut cue);
    for (idx, label) in labels.iter().enumerate() {
        let sample = label.position.min(u32::MAX as usize) as u32;
        order.put_u32(idx as u32 + 1, &mut cue);
        order.put_u32(sample, &mut cue);
        cue.extend_from_slice(b"data");
        order.put_u32(0, &mut cue);
        order.put_u32(0, &mut cue);
        order.put_u32(sample, &mut cue);
    }
    out.extend_from_slice(b"cue ");
    order.put_u32(cue.len() as u32, &mut out);
    out.extend_from_slice(&cue);

    let mut adtl = Vec::new();
    adtl.extend_from_slice(b"adtl");
    for (idx, label) in labels.iter().enumerate() {
        let mut text = label.name.clone().into_bytes();
        text.push(0);
        let size = 4 + text.len();
        adtl.extend_from_slice(b"labl");
        order.put_u32(size as u32, &mut adtl);
        order.put_u32(idx as u32 + 1, &mut adtl);
        adtl.extend_from_slice(&text);
        if size & 1 == 1 {
            adtl.push(0);
        }
    }
    out.extend_from_slice(b"LIST");
    order.put_u32(adtl.len() as u32, &mut out);
    out.extend_from_slice(&adtl);
    out
}

/// RIFF and data chunk size fields. Errors rather than wrapping past `u32`.
fn chunk_sizes(data_len: usize, extra_len: usize) -> Result<(u32, u32)> {
    let too_big = |what: &str| {
        EditError::out_of_resources("save", format!("{what} exceeds the 32-bit size field"))
    };
    let data = u32::try_from(data_len).map_err(|_| too_big("data chunk"))?;
    let riff = (4 + 8 + FMT_LEN as usize + 8)
        .checked_add(data_len)
        .and_then(|n| n.checked_add(data_len & 1))
        .and_then(|n| n.checked_add(extra_len))
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| too_big("container"))?;
    Ok((riff, data))
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "signal".into());
    path.with_file_name(format!(".{name}.waveforge-tmp"))
}

/// Write the signal (or its marker range) to `path` via a temp file + rename.
pub fn save(signal: &Signal, path: &Path, opts: &SaveOptions) -> Result<()> {
    let width = bytes_per_sample(opts.bits)?;
    let channels = signal.channel_count();
    if channels == 0 {
        return Err(EditError::invalid_range("save", 0, 0, 0));
    }
    let (start, end) = if opts.selection_only {
        let (l, r) = signal.markers();
        if l >= r {
            return Err(EditError::invalid_range("save selection", l, r, signal.len()));
        }
        (l, r)
    } else {
        (0, signal.len())
    };
    let frames = end - start;
    let block = channels * width;
    let data_len = frames
        .checked_mul(block)
        .ok_or_else(|| EditError::out_of_resources("save", "container would exceed 4 GiB"))?;
    let channel_field = u16::try_from(channels)
        .map_err(|_| EditError::invalid_args("save", format!("{channels} channels")))?;
    let block_field = u16::try_from(block)
        .map_err(|_| EditError::invalid_args("save", format!("{block} bytes per frame")))?;

    let labels: Vec<Label> = if opts.write_labels {
        signal
            .labels()
            .iter()
            .filter(|l| l.position >= start && l.position <= end)
            .map(|l| Label::new(l.position - start, l.name.clone()))
            .collect()
    } else {
        Vec::new()
    };
    let order = opts.byte_order;
    let extra = label_chunks(&labels, order);
    let pad = data_len & 1;

    let mut header = Vec::with_capacity(44);
    header.extend_from_slice(match order {
        ByteOrder::Little => b"RIFF",
        ByteOrder::Big => b"RIFX",
    });
    let (riff_size, data_size) = chunk_sizes(data_len, extra.len())?;
    order.put_u32(riff_size, &mut header);
    header.extend_from_slice(b"WAVE");
    header.extend_from_slice(b"fmt ");
    order.put_u32(FMT_LEN, &mut header);
    order.put_u16(PCM_MODE, &mut header);
    order.put_u16(channel_field, &mut header);
    order.put_u32(signal.rate(), &mut header);
    order.put_u32(signal.rate().saturating_mul(u32::from(block_field)), &mut header);
    order.put_u16(block_field, &mut header);
    order.put_u16(opts.bits, &mut header);
    header.extend_from_slice(b"data");
    order.put_u32(data_size, &mut header);

    let tmp = temp_path_for(path);
    let result = write_container(signal, &tmp, &header, &extra, (start, end), opts, pad);
    if let Err(e) = result {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    std::fs::rename(&tmp, path).map_err(|e| EditError::io(path, e))?;
    info!(
        path = %path.display(),
        frames,
        bits = opts.bits,
        order = ?order,
        "saved container"
    );
    Ok(())
}

fn write_container(
    signal: &Signal,
    tmp: &Path,
    header: &[u8],
    extra: &[u8],
    (start, end): (usize, usize),
    opts: &SaveOptions,
    pad: usize,
) -> Result<()> {
    let io = |e| EditError::io(tmp, e);
    let file = File::create(tmp).map_err(io)?;
    let mut w = BufWriter::new(file);
    w.write_all(header).map_err(io)?;

    let channels = signal.channels();
    let mut block = Vec::with_capacity(WRITE_BLOCK_FRAMES * channels.len() * 3);
    let mut frame = start;
    while frame < end {
        let stop = (frame + WRITE_BLOCK_FRAMES).min(end);
        block.clear();
        for i in frame..stop {
            for channel in channels {
                let s = channel.samples().get(i).copied().unwrap_or(0);
                encode_sample(s, opts.bits, opts.byte_order, &mut block);
            }
        }
        w.write_all(&block).map_err(io)?;
        frame = stop;
    }
    if pad == 1 {
        w.write_all(&[0]).map_err(io)?;
    }
    w.write_all(extra).map_err(io)?;
    w.flush().map_err(io)?;
    Ok(())
}
