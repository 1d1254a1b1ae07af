//! Streaming loop run by the worker process (or a worker thread).

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{EditError, Result};
use crate::pcm::PcmFragment;
use crate::Sample;

use super::control::{SharedControl, WorkerState};
use super::device::{open_input, open_output, InputDevice, OutputDevice};
use super::image::{CaptureWriter, SampleImage};
use super::protocol::{PlayJob, RecordJob, WorkerRequest, WorkerResponse};

const PAUSE_POLL: Duration = Duration::from_millis(10);

pub fn handle_request(req: WorkerRequest) -> WorkerResponse {
    match req {
        WorkerRequest::Ping => WorkerResponse::Pong,
        WorkerRequest::Play(job) => respond(play_job(&job)),
        WorkerRequest::Record(job) => respond(record_job(&job)),
    }
}

fn respond(result: Result<u64>) -> WorkerResponse {
    match result {
        Ok(frames) => WorkerResponse::Finished { frames },
        Err(EditError::DeviceNegotiationFailed { step, detail }) => {
            WorkerResponse::NegotiationFailed { step, detail }
        }
        Err(e) => WorkerResponse::Error {
            message: e.to_string(),
        },
    }
}

fn play_job(job: &PlayJob) -> Result<u64> {
    let control = SharedControl::open(&job.control_path)?;
    let image = SampleImage::open(&job.image_path)?;
    let mut device = open_output(&job.device);
    run_playback(job, &control, &image, device.as_mut())
}

fn record_job(job: &RecordJob) -> Result<u64> {
    let control = SharedControl::open(&job.control_path)?;
    let mut device = open_input(&job.device);
    run_record(job, &control, device.as_mut())
}

/// Clears the position and publishes the final state, also on early return.
struct SessionGuard<'a> {
    control: &'a SharedControl,
    done: bool,
}

impl<'a> SessionGuard<'a> {
    fn new(control: &'a SharedControl) -> Self {
        control.set_state(WorkerState::Starting);
        Self {
            control,
            done: false,
        }
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.control.clear_position();
        self.control.set_state(if self.done {
            WorkerState::Finished
        } else {
            WorkerState::Failed
        });
    }
}

/// Map one source frame onto `out_channels` device channels.
///
/// With fewer device channels, source channel `j` is averaged into device
/// channel `j % out_channels`. With more, source channels repeat cyclically.
pub fn downmix_into(frame: &[Sample], out_channels: usize, out: &mut Vec<Sample>) {
    let in_channels = frame.len();
    if in_channels == 0 {
        out.extend(std::iter::repeat(0).take(out_channels));
        return;
    }
    if in_channels <= out_channels {
        out.extend((0..out_channels).map(|k| frame[k % in_channels]));
        return;
    }
    for k in 0..out_channels {
        let (sum, count) = frame
            .iter()
            .skip(k)
            .step_by(out_channels)
            .fold((0i64, 0i64), |(s, n), &v| (s + v as i64, n + 1));
        out.push((sum / count.max(1)) as Sample);
    }
}

pub fn run_playback(
    job: &PlayJob,
    control: &SharedControl,
    image: &SampleImage,
    device: &mut dyn OutputDevice,
) -> Result<u64> {
    let mut guard = SessionGuard::new(control);
    let granted = device.negotiate(job.params)?;
    control.set_pid(std::process::id());
    control.set_state(WorkerState::Running);

    let end = job.end.min(image.end_frame() as u64);
    let start = job.start.max(image.first_frame() as u64).min(end);
    if end <= start {
        device.finish()?;
        guard.done = true;
        return Ok(0);
    }
    info!(
        start,
        end,
        looping = job.looping,
        channels = granted.channels,
        rate = granted.rate,
        "playback started"
    );

    let frag = granted.fragment_frames;
    let out_channels = granted.channels as usize;
    let mut pos = start;
    let mut streamed = 0u64;
    let mut interleaved: Vec<Sample> = Vec::with_capacity(frag * out_channels);
    control.set_position(start);
    loop {
        if control.stop_requested() {
            debug!(pos, "stop requested");
            break;
        }
        if control.is_paused() {
            std::thread::sleep(PAUSE_POLL);
            continue;
        }
        if let Some(target) = control.take_seek() {
            pos = target.clamp(start, end);
        }
        if pos >= end {
            if !job.looping {
                break;
            }
            pos = start;
        }

        // a fragment never straddles the right marker, so a loop pass ends
        // with the position exactly at `end` before it wraps to `start`
        control.set_position(pos);
        let n = frag.min((end - pos) as usize);
        interleaved.clear();
        for frame in pos..pos + n as u64 {
            downmix_into(image.frame(frame as usize), out_channels, &mut interleaved);
        }
        pos += n as u64;
        let last = !job.looping && pos >= end;
        if last {
            interleaved.resize(frag * out_channels, 0);
        }
        let fragment = PcmFragment::encode(&interleaved, granted.bits)?;
        device.write(&fragment)?;
        streamed += n as u64;
        control.set_position(pos);
        if last {
            break;
        }
    }
    device.finish()?;
    guard.done = true;
    info!(frames = streamed, "playback finished");
    Ok(streamed)
}

pub fn run_record(
    job: &RecordJob,
    control: &SharedControl,
    device: &mut dyn InputDevice,
) -> Result<u64> {
    let mut guard = SessionGuard::new(control);
    let granted = device.negotiate(job.params)?;
    control.set_pid(std::process::id());
    control.set_state(WorkerState::Running);
    let mut writer = CaptureWriter::create(&job.capture_path, granted.channels as usize)?;
    info!(
        channels = granted.channels,
        rate = granted.rate,
        "recording started"
    );
    control.set_position(0);
    loop {
        if control.stop_requested() {
            break;
        }
        if control.is_paused() {
            std::thread::sleep(PAUSE_POLL);
            continue;
        }
        let mut want = granted.fragment_frames as u64;
        if let Some(max) = job.max_frames {
            want = want.min(max.saturating_sub(writer.frames()));
        }
        if want == 0 {
            break;
        }
        match device.read(want as usize)? {
            Some(buf) => writer.push(&buf)?,
            None => break,
        }
        control.set_position(writer.frames());
    }
    let frames = match writer.finish() {
        Ok(frames) => frames,
        Err(e) => {
            warn!("capture finish failed: {e}");
            return Err(e);
        }
    };
    guard.done = true;
    info!(frames, "recording finished");
    Ok(frames)
}
