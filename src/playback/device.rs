//! Audio endpoints and parameter negotiation.
//!
//! `negotiate` walks the same steps for every device: sample width, channel
//! count, sample rate, fragment size. A rejected step fails the whole session
//! with `DeviceNegotiationFailed` naming the step.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::Sample as _;
use tracing::{debug, info, warn};

use crate::error::{EditError, Result};
use crate::pcm::{bytes_per_sample, fixed_from_f32, PcmFragment};
use crate::Sample;

use super::protocol::{DeviceParams, DeviceSpec};

const QUEUE_FRAGMENTS: usize = 4;
const INPUT_WAIT: Duration = Duration::from_millis(200);

pub trait OutputDevice {
    fn negotiate(&mut self, wanted: DeviceParams) -> Result<DeviceParams>;
    fn write(&mut self, fragment: &PcmFragment) -> Result<()>;
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

pub trait InputDevice {
    fn negotiate(&mut self, wanted: DeviceParams) -> Result<DeviceParams>;
    /// Up to `frames` interleaved frames; `None` once the source is exhausted.
    fn read(&mut self, frames: usize) -> Result<Option<Vec<Sample>>>;
}

/// Checks every device shares before its own negotiation.
pub fn check_params(wanted: &DeviceParams) -> Result<()> {
    bytes_per_sample(wanted.bits)
        .map_err(|_| EditError::negotiation("sample width", format!("{} bits", wanted.bits)))?;
    if wanted.channels == 0 {
        return Err(EditError::negotiation("channel count", "zero channels"));
    }
    if wanted.rate == 0 {
        return Err(EditError::negotiation("sample rate", "zero rate"));
    }
    if wanted.fragment_frames == 0 {
        return Err(EditError::negotiation("fragment size", "zero frames"));
    }
    Ok(())
}

pub fn open_output(spec: &DeviceSpec) -> Box<dyn OutputDevice> {
    match spec {
        DeviceSpec::Default => Box::new(CpalOutput::default()),
        DeviceSpec::Null {
            realtime,
            max_channels,
        } => Box::new(NullOutput::new(*realtime, *max_channels)),
        DeviceSpec::WavFile { path } => Box::new(WavOutput::new(path.clone())),
    }
}

pub fn open_input(spec: &DeviceSpec) -> Box<dyn InputDevice> {
    match spec {
        DeviceSpec::Default => Box::new(CpalInput::default()),
        DeviceSpec::Null {
            realtime,
            max_channels,
        } => Box::new(NullInput::new(*realtime, *max_channels)),
        DeviceSpec::WavFile { path } => Box::new(WavInput::new(path.clone())),
    }
}

fn limit_channels(wanted: u16, max_channels: u16) -> u16 {
    if max_channels == 0 {
        wanted
    } else {
        wanted.min(max_channels)
    }
}

#[derive(Debug)]
pub struct NullOutput {
    realtime: bool,
    max_channels: u16,
    granted: Option<DeviceParams>,
    frames: u64,
}

impl NullOutput {
    pub fn new(realtime: bool, max_channels: u16) -> Self {
        Self {
            realtime,
            max_channels,
            granted: None,
            frames: 0,
        }
    }
}

impl OutputDevice for NullOutput {
    fn negotiate(&mut self, wanted: DeviceParams) -> Result<DeviceParams> {
        check_params(&wanted)?;
        let granted = DeviceParams {
            channels: limit_channels(wanted.channels, self.max_channels),
            ..wanted
        };
        self.granted = Some(granted);
        Ok(granted)
    }

    fn write(&mut self, fragment: &PcmFragment) -> Result<()> {
        let Some(p) = self.granted else {
            return Err(EditError::negotiation("write", "device not negotiated"));
        };
        self.frames += (fragment.len() / p.channels.max(1) as usize) as u64;
        if self.realtime {
            std::thread::sleep(p.fragment_duration());
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        debug!(frames = self.frames, "null output finished");
        Ok(())
    }
}

#[derive(Debug)]
pub struct NullInput {
    realtime: bool,
    max_channels: u16,
    granted: Option<DeviceParams>,
}

impl NullInput {
    pub fn new(realtime: bool, max_channels: u16) -> Self {
        Self {
            realtime,
            max_channels,
            granted: None,
        }
    }
}

impl InputDevice for NullInput {
    fn negotiate(&mut self, wanted: DeviceParams) -> Result<DeviceParams> {
        check_params(&wanted)?;
        let granted = DeviceParams {
            channels: limit_channels(wanted.channels, self.max_channels),
            ..wanted
        };
        self.granted = Some(granted);
        Ok(granted)
    }

    fn read(&mut self, frames: usize) -> Result<Option<Vec<Sample>>> {
        let Some(p) = self.granted else {
            return Err(EditError::negotiation("read", "device not negotiated"));
        };
        if self.realtime {
            let rate = p.rate.max(1) as u64;
            std::thread::sleep(Duration::from_micros(frames as u64 * 1_000_000 / rate));
        }
        Ok(Some(vec![0; frames * p.channels as usize]))
    }
}

/// Renders playback into a WAV file through hound.
pub struct WavOutput {
    path: PathBuf,
    writer: Option<hound::WavWriter<BufWriter<File>>>,
}

impl WavOutput {
    pub fn new(path: PathBuf) -> Self {
        Self { path, writer: None }
    }
}

impl OutputDevice for WavOutput {
    fn negotiate(&mut self, wanted: DeviceParams) -> Result<DeviceParams> {
        check_params(&wanted)?;
        let spec = hound::WavSpec {
            channels: wanted.channels,
            sample_rate: wanted.rate,
            bits_per_sample: wanted.bits,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(&self.path, spec).map_err(|e| {
            EditError::negotiation("device", format!("{}: {e}", self.path.display()))
        })?;
        self.writer = Some(writer);
        Ok(wanted)
    }

    fn write(&mut self, fragment: &PcmFragment) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(EditError::negotiation("write", "device not negotiated"));
        };
        let res = match fragment {
            PcmFragment::U8(v) => v
                .iter()
                .try_for_each(|&b| writer.write_sample((b as i16 - 128) as i8)),
            PcmFragment::I16(v) => v.iter().try_for_each(|&s| writer.write_sample(s)),
            PcmFragment::I24(v) => v.iter().try_for_each(|&s| writer.write_sample(s)),
        };
        res.map_err(|e| EditError::out_of_resources(format!("write {}", self.path.display()), e))
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize().map_err(|e| {
                EditError::out_of_resources(format!("finalize {}", self.path.display()), e)
            })?;
        }
        Ok(())
    }
}

/// Uses an existing WAV file as the capture source.
pub struct WavInput {
    path: PathBuf,
    reader: Option<hound::WavReader<BufReader<File>>>,
    shift: u32,
    channels: usize,
}

impl WavInput {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            reader: None,
            shift: 0,
            channels: 0,
        }
    }
}

impl InputDevice for WavInput {
    fn negotiate(&mut self, wanted: DeviceParams) -> Result<DeviceParams> {
        check_params(&wanted)?;
        let reader = hound::WavReader::open(&self.path).map_err(|e| {
            EditError::negotiation("device", format!("{}: {e}", self.path.display()))
        })?;
        let spec = reader.spec();
        if spec.sample_format != hound::SampleFormat::Int {
            return Err(EditError::negotiation("sample width", "float source"));
        }
        self.shift = match spec.bits_per_sample {
            8 => 16,
            16 => 8,
            24 => 0,
            other => {
                return Err(EditError::negotiation(
                    "sample width",
                    format!("{other} bits"),
                ))
            }
        };
        if spec.sample_rate != wanted.rate {
            return Err(EditError::negotiation(
                "sample rate",
                format!("source runs at {} Hz, wanted {}", spec.sample_rate, wanted.rate),
            ));
        }
        self.channels = spec.channels as usize;
        self.reader = Some(reader);
        Ok(DeviceParams {
            bits: spec.bits_per_sample,
            channels: spec.channels,
            ..wanted
        })
    }

    fn read(&mut self, frames: usize) -> Result<Option<Vec<Sample>>> {
        let Some(reader) = self.reader.as_mut() else {
            return Err(EditError::negotiation("read", "device not negotiated"));
        };
        let want = frames * self.channels;
        let mut out = Vec::with_capacity(want);
        for s in reader.samples::<i32>().take(want) {
            let s = s.map_err(|e| {
                EditError::out_of_resources(format!("read {}", self.path.display()), e)
            })?;
            out.push(s << self.shift);
        }
        if out.is_empty() {
            return Ok(None);
        }
        Ok(Some(out))
    }
}

struct CpalChoice {
    device: cpal::Device,
    config: cpal::StreamConfig,
    format: cpal::SampleFormat,
    granted: DeviceParams,
}

fn preferred_formats(bits: u16) -> &'static [cpal::SampleFormat] {
    use cpal::SampleFormat as F;
    match bits {
        8 => &[F::U8, F::I8, F::I16, F::F32],
        16 => &[F::I16, F::F32, F::I32],
        _ => &[F::I32, F::F32, F::I16],
    }
}

/// Walk the negotiation steps against a device's supported ranges.
fn choose_config(
    device: cpal::Device,
    ranges: Vec<cpal::SupportedStreamConfigRange>,
    wanted: DeviceParams,
) -> Result<CpalChoice> {
    if ranges.is_empty() {
        return Err(EditError::negotiation("device", "no supported configurations"));
    }
    let channels = if ranges.iter().any(|r| r.channels() == wanted.channels) {
        wanted.channels
    } else {
        ranges
            .iter()
            .map(|r| r.channels())
            .filter(|&c| c < wanted.channels)
            .max()
            .or_else(|| ranges.iter().map(|r| r.channels()).min())
            .ok_or_else(|| EditError::negotiation("channel count", wanted.channels))?
    };
    let with_rate: Vec<&cpal::SupportedStreamConfigRange> = ranges
        .iter()
        .filter(|r| r.channels() == channels)
        .filter(|r| r.min_sample_rate() <= wanted.rate && wanted.rate <= r.max_sample_rate())
        .collect();
    if with_rate.is_empty() {
        return Err(EditError::negotiation(
            "sample rate",
            format!("{} Hz with {channels} channels", wanted.rate),
        ));
    }
    let range = preferred_formats(wanted.bits)
        .iter()
        .find_map(|f| with_rate.iter().find(|r| r.sample_format() == *f))
        .copied()
        .ok_or_else(|| EditError::negotiation("sample width", format!("{} bits", wanted.bits)))?;
    let fragment = match range.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            (wanted.fragment_frames as u32).clamp(*min, *max)
        }
        cpal::SupportedBufferSize::Unknown => wanted.fragment_frames as u32,
    };
    if fragment == 0 {
        return Err(EditError::negotiation("fragment size", "device grants zero frames"));
    }
    let supported = range.clone().with_sample_rate(wanted.rate);
    let format = supported.sample_format();
    let mut config: cpal::StreamConfig = supported.config();
    if matches!(range.buffer_size(), cpal::SupportedBufferSize::Range { .. }) {
        config.buffer_size = cpal::BufferSize::Fixed(fragment);
    }
    Ok(CpalChoice {
        device,
        config,
        format,
        granted: DeviceParams {
            bits: wanted.bits,
            channels,
            rate: wanted.rate,
            fragment_frames: fragment as usize,
        },
    })
}

/// Host default output through cpal. Fragments are queued to the callback.
#[derive(Default)]
pub struct CpalOutput {
    stream: Option<cpal::Stream>,
    tx: Option<SyncSender<Vec<f32>>>,
    granted: Option<DeviceParams>,
}

impl CpalOutput {
    fn build<T>(choice: &CpalChoice, rx: Receiver<Vec<f32>>) -> Result<cpal::Stream>
    where
        T: cpal::SizedSample + cpal::FromSample<f32>,
    {
        let mut pending: VecDeque<f32> = VecDeque::new();
        let err_fn = |e| warn!("output stream error: {e}");
        choice
            .device
            .build_output_stream(
                &choice.config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    for out in data.iter_mut() {
                        if pending.is_empty() {
                            if let Ok(buf) = rx.try_recv() {
                                pending.extend(buf);
                            }
                        }
                        *out = T::from_sample(pending.pop_front().unwrap_or(0.0));
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| EditError::negotiation("stream", e))
    }
}

impl OutputDevice for CpalOutput {
    fn negotiate(&mut self, wanted: DeviceParams) -> Result<DeviceParams> {
        check_params(&wanted)?;
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| EditError::negotiation("device", "no default output device"))?;
        let ranges = device
            .supported_output_configs()
            .map_err(|e| EditError::negotiation("device", e))?
            .collect();
        let choice = choose_config(device, ranges, wanted)?;
        let (tx, rx) = sync_channel(QUEUE_FRAGMENTS);
        use cpal::SampleFormat as F;
        let stream = match choice.format {
            F::F32 => Self::build::<f32>(&choice, rx)?,
            F::I16 => Self::build::<i16>(&choice, rx)?,
            F::I32 => Self::build::<i32>(&choice, rx)?,
            F::U8 => Self::build::<u8>(&choice, rx)?,
            F::I8 => Self::build::<i8>(&choice, rx)?,
            other => {
                return Err(EditError::negotiation(
                    "sample width",
                    format!("{other:?}"),
                ))
            }
        };
        stream
            .play()
            .map_err(|e| EditError::negotiation("stream", e))?;
        info!(
            channels = choice.granted.channels,
            rate = choice.granted.rate,
            fragment = choice.granted.fragment_frames,
            format = ?choice.format,
            "output device negotiated"
        );
        self.stream = Some(stream);
        self.tx = Some(tx);
        self.granted = Some(choice.granted);
        Ok(choice.granted)
    }

    fn write(&mut self, fragment: &PcmFragment) -> Result<()> {
        let Some(tx) = self.tx.as_ref() else {
            return Err(EditError::negotiation("write", "device not negotiated"));
        };
        tx.send(fragment.to_f32())
            .map_err(|_| EditError::negotiation("stream", "output stream closed"))
    }

    fn finish(&mut self) -> Result<()> {
        self.tx = None;
        if let Some(p) = self.granted {
            std::thread::sleep(p.fragment_duration() * (QUEUE_FRAGMENTS as u32 + 1));
        }
        self.stream = None;
        Ok(())
    }
}

/// Host default input through cpal.
#[derive(Default)]
pub struct CpalInput {
    stream: Option<cpal::Stream>,
    rx: Option<Receiver<Vec<f32>>>,
    pending: VecDeque<f32>,
    channels: usize,
}

impl CpalInput {
    fn build<T>(choice: &CpalChoice, tx: SyncSender<Vec<f32>>) -> Result<cpal::Stream>
    where
        T: cpal::SizedSample,
        f32: cpal::FromSample<T>,
    {
        let err_fn = |e| warn!("input stream error: {e}");
        choice
            .device
            .build_input_stream(
                &choice.config,
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    let buf: Vec<f32> = data.iter().map(|&s| s.to_sample::<f32>()).collect();
                    if tx.try_send(buf).is_err() {
                        debug!("input queue full, dropping a buffer");
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| EditError::negotiation("stream", e))
    }
}

impl InputDevice for CpalInput {
    fn negotiate(&mut self, wanted: DeviceParams) -> Result<DeviceParams> {
        check_params(&wanted)?;
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| EditError::negotiation("device", "no default input device"))?;
        let ranges = device
            .supported_input_configs()
            .map_err(|e| EditError::negotiation("device", e))?
            .collect();
        let choice = choose_config(device, ranges, wanted)?;
        let (tx, rx) = sync_channel(QUEUE_FRAGMENTS * 4);
        use cpal::SampleFormat as F;
        let stream = match choice.format {
            F::F32 => Self::build::<f32>(&choice, tx)?,
            F::I16 => Self::build::<i16>(&choice, tx)?,
            F::I32 => Self::build::<i32>(&choice, tx)?,
            F::U8 => Self::build::<u8>(&choice, tx)?,
            F::I8 => Self::build::<i8>(&choice, tx)?,
            other => {
                return Err(EditError::negotiation(
                    "sample width",
                    format!("{other:?}"),
                ))
            }
        };
        stream
            .play()
            .map_err(|e| EditError::negotiation("stream", e))?;
        info!(
            channels = choice.granted.channels,
            rate = choice.granted.rate,
            "input device negotiated"
        );
        self.stream = Some(stream);
        self.rx = Some(rx);
        self.channels = choice.granted.channels as usize;
        Ok(choice.granted)
    }

    fn read(&mut self, frames: usize) -> Result<Option<Vec<Sample>>> {
        let Some(rx) = self.rx.as_ref() else {
            return Err(EditError::negotiation("read", "device not negotiated"));
        };
        let want = frames * self.channels;
        while self.pending.len() < want {
            match rx.recv_timeout(INPUT_WAIT) {
                Ok(buf) => self.pending.extend(buf),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    if self.pending.is_empty() {
                        return Ok(None);
                    }
                    break;
                }
            }
        }
        let take = (self.pending.len().min(want) / self.channels.max(1)) * self.channels;
        Ok(Some(
            self.pending.drain(..take).map(fixed_from_f32).collect(),
        ))
    }
}
