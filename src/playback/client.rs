use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::alloc::create_unique_file;
use crate::config::PlaybackConfig;
use crate::error::{EditError, Result};
use crate::signal::Signal;
use crate::Sample;

use super::control::SharedControl;
use super::image::SampleImage;
use super::protocol::{DeviceParams, PlayJob, RecordJob, WorkerMode, WorkerRequest, WorkerResponse};
use super::worker::handle_request;

pub const WORKER_PATH_ENV: &str = "WAVEFORGE_PLAY_WORKER_PATH";
const POLL_INTERVAL: Duration = Duration::from_millis(8);

fn worker_exe_name() -> &'static str {
    #[cfg(windows)]
    {
        "waveforge_play_worker.exe"
    }
    #[cfg(not(windows))]
    {
        "waveforge_play_worker"
    }
}

fn worker_exe_path(configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = configured {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        warn!(path = %path.display(), "configured play worker not found");
    }
    if let Ok(override_path) = std::env::var(WORKER_PATH_ENV) {
        let path = PathBuf::from(override_path);
        if path.is_file() {
            return Some(path);
        }
    }
    let exe = std::env::current_exe().ok()?;
    let dir = exe.parent()?;
    let path = dir.join(worker_exe_name());
    path.is_file().then_some(path)
}

enum WorkerHandle {
    Process(Child),
    Thread(Option<JoinHandle<WorkerResponse>>),
}

impl WorkerHandle {
    fn try_response(&mut self) -> Option<WorkerResponse> {
        match self {
            WorkerHandle::Process(child) => match child.try_wait() {
                Ok(Some(status)) => Some(read_process_response(child, status)),
                Ok(None) => None,
                Err(e) => Some(WorkerResponse::Error {
                    message: format!("wait worker failed: {e}"),
                }),
            },
            WorkerHandle::Thread(slot) => {
                if slot.as_ref().is_some_and(|h| !h.is_finished()) {
                    return None;
                }
                let resp = match slot.take() {
                    Some(handle) => handle.join().unwrap_or_else(|_| WorkerResponse::Error {
                        message: "worker thread panicked".to_string(),
                    }),
                    None => WorkerResponse::Error {
                        message: "worker already joined".to_string(),
                    },
                };
                Some(resp)
            }
        }
    }

    fn wait_response(&mut self) -> WorkerResponse {
        loop {
            if let Some(resp) = self.try_response() {
                return resp;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

fn read_process_response(child: &mut Child, status: ExitStatus) -> WorkerResponse {
    let mut stdout = Vec::new();
    if let Some(mut out) = child.stdout.take() {
        let _ = out.read_to_end(&mut stdout);
    }
    if let Ok(resp) = serde_json::from_slice::<WorkerResponse>(&stdout) {
        return resp;
    }
    WorkerResponse::Error {
        message: if status.success() {
            "decode worker output failed".to_string()
        } else {
            format!("worker exited with {status}")
        },
    }
}

fn spawn_thread(req: WorkerRequest) -> Result<WorkerHandle> {
    let handle = std::thread::Builder::new()
        .name("waveforge-play".to_string())
        .spawn(move || handle_request(req))
        .map_err(|e| EditError::out_of_resources("spawn playback thread", e))?;
    Ok(WorkerHandle::Thread(Some(handle)))
}

fn spawn_process(worker_path: &Path, req: &WorkerRequest) -> Result<WorkerHandle> {
    let payload = serde_json::to_vec(req)
        .map_err(|e| EditError::out_of_resources("encode worker request", e))?;
    let mut child = Command::new(worker_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| EditError::out_of_resources("spawn play worker", e))?;
    if let Some(mut stdin) = child.stdin.take() {
        if let Err(e) = stdin.write_all(&payload) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(EditError::out_of_resources("worker stdin write", e));
        }
    }
    info!(worker = %worker_path.display(), "play worker spawned");
    Ok(WorkerHandle::Process(child))
}

/// How a playback or recording session ended.
#[derive(Debug)]
pub struct SessionReport {
    pub recording: bool,
    /// Reached the end of the range (or the capture source) without `stop()`.
    pub natural: bool,
    pub frames: u64,
    /// Process id the worker published, 0 if it never got that far.
    pub worker_pid: u32,
    pub failure: Option<EditError>,
    /// Captured frames, one vector per channel.
    pub capture: Option<Vec<Vec<Sample>>>,
    pub rate: u32,
}

struct Session {
    control: SharedControl,
    worker: WorkerHandle,
    _image: Option<SampleImage>,
    capture_path: Option<PathBuf>,
    start: u64,
    end: u64,
    rate: u32,
}

/// Owns the at most one worker attached to a signal.
pub struct Transport {
    config: PlaybackConfig,
    temp_dir: PathBuf,
    session: Option<Session>,
}

impl Transport {
    pub fn new(config: PlaybackConfig, temp_dir: PathBuf) -> Self {
        Self {
            config,
            temp_dir,
            session: None,
        }
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    pub fn is_attached(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_recording(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.capture_path.is_some())
    }

    fn ensure_detached(&self, op: &str) -> Result<()> {
        if self.session.is_some() {
            return Err(EditError::Busy { op: op.to_string() });
        }
        Ok(())
    }

    fn spawn(&self, req: WorkerRequest) -> Result<WorkerHandle> {
        match self.config.worker {
            WorkerMode::Thread => spawn_thread(req),
            WorkerMode::Process => match worker_exe_path(self.config.worker_path.as_deref()) {
                Some(path) => spawn_process(&path, &req),
                None => {
                    warn!("play worker executable not found, streaming on a thread");
                    spawn_thread(req)
                }
            },
        }
    }

    /// Stream the marked range (left marker to end when the markers meet).
    pub fn play(&mut self, signal: &Signal, looping: bool) -> Result<()> {
        self.ensure_detached(if looping { "loop" } else { "play" })?;
        let (left, right) = signal.markers();
        let len = signal.len();
        let (start, end) = if left == right { (left, len) } else { (left, right) };
        if signal.channel_count() == 0 || start >= end {
            return Err(EditError::invalid_range("play", left, right, len));
        }
        let control = SharedControl::create(&self.temp_dir)?;
        let image = SampleImage::write_range(&self.temp_dir, signal, start, end)?;
        let job = PlayJob {
            control_path: control.path().to_path_buf(),
            image_path: image.path().to_path_buf(),
            start: start as u64,
            end: end as u64,
            looping,
            device: self.config.device.clone(),
            params: DeviceParams {
                bits: self.config.bits,
                channels: u16::try_from(signal.channel_count()).unwrap_or(u16::MAX),
                rate: signal.rate(),
                fragment_frames: self.config.fragment_frames,
            },
        };
        let worker = self.spawn(WorkerRequest::Play(job))?;
        self.session = Some(Session {
            control,
            worker,
            _image: Some(image),
            capture_path: None,
            start: start as u64,
            end: end as u64,
            rate: signal.rate(),
        });
        Ok(())
    }

    pub fn record(&mut self, channels: usize, rate: u32, max_frames: Option<u64>) -> Result<()> {
        self.ensure_detached("record")?;
        if channels == 0 || rate == 0 {
            return Err(EditError::invalid_args(
                "record",
                "channel count and rate must be positive",
            ));
        }
        let control = SharedControl::create(&self.temp_dir)?;
        let (_file, capture_path) = create_unique_file(&self.temp_dir, "waveforge-cap", "img")?;
        let job = RecordJob {
            control_path: control.path().to_path_buf(),
            capture_path: capture_path.clone(),
            device: self.config.input_device.clone(),
            params: DeviceParams {
                bits: self.config.bits,
                channels: u16::try_from(channels).unwrap_or(u16::MAX),
                rate,
                fragment_frames: self.config.fragment_frames,
            },
            max_frames,
        };
        let worker = match self.spawn(WorkerRequest::Record(job)) {
            Ok(w) => w,
            Err(e) => {
                let _ = std::fs::remove_file(&capture_path);
                return Err(e);
            }
        };
        self.session = Some(Session {
            control,
            worker,
            _image: None,
            capture_path: Some(capture_path),
            start: 0,
            end: 0,
            rate,
        });
        Ok(())
    }

    /// Advisory: the worker notices within one fragment.
    pub fn stop(&self) -> bool {
        match &self.session {
            Some(s) => {
                s.control.request_stop();
                true
            }
            None => false,
        }
    }

    pub fn set_paused(&self, paused: bool) -> bool {
        match &self.session {
            Some(s) => {
                s.control.set_paused(paused);
                true
            }
            None => false,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.control.is_paused())
    }

    pub fn seek(&self, frame: u64) -> bool {
        match &self.session {
            Some(s) if s.capture_path.is_none() => {
                s.control.request_seek(frame);
                true
            }
            _ => false,
        }
    }

    pub fn position(&self) -> Option<u64> {
        self.session.as_ref().and_then(|s| s.control.position())
    }

    pub fn start_pos(&self) -> Option<u64> {
        self.session.as_ref().map(|s| s.start)
    }

    pub fn end_pos(&self) -> Option<u64> {
        self.session.as_ref().map(|s| s.end)
    }

    /// Detach if the worker has exited.
    pub fn poll(&mut self) -> Option<SessionReport> {
        let resp = self.session.as_mut()?.worker.try_response()?;
        let session = self.session.take()?;
        Some(finish_session(session, resp))
    }

    /// Block until the worker exits, then detach.
    pub fn wait(&mut self) -> Option<SessionReport> {
        let mut session = self.session.take()?;
        let resp = session.worker.wait_response();
        Some(finish_session(session, resp))
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if self.stop() {
            let _ = self.wait();
        }
    }
}

fn finish_session(session: Session, resp: WorkerResponse) -> SessionReport {
    let stopped = session.control.stop_requested();
    debug!(pid = session.control.pid(), ?resp, "worker exited");
    let mut report = SessionReport {
        recording: session.capture_path.is_some(),
        natural: false,
        frames: 0,
        worker_pid: session.control.pid(),
        failure: None,
        capture: None,
        rate: session.rate,
    };
    match resp {
        WorkerResponse::Finished { frames } => {
            report.natural = !stopped;
            report.frames = frames;
        }
        WorkerResponse::NegotiationFailed { step, detail } => {
            report.failure = Some(EditError::DeviceNegotiationFailed { step, detail });
        }
        WorkerResponse::Error { message } => {
            report.failure = Some(EditError::out_of_resources("playback worker", message));
        }
        WorkerResponse::Pong => {
            report.failure = Some(EditError::out_of_resources(
                "playback worker",
                "unexpected pong",
            ));
        }
    }
    if let Some(path) = session.capture_path.as_deref() {
        if report.failure.is_none() {
            match SampleImage::open(path).and_then(|img| img.to_channels()) {
                Ok(channels) => report.capture = Some(channels),
                Err(e) => report.failure = Some(e),
            }
        }
        if let Err(e) = std::fs::remove_file(path) {
            warn!("capture cleanup failed for {}: {e}", path.display());
        }
    }
    info!(
        natural = report.natural,
        frames = report.frames,
        failed = report.failure.is_some(),
        "session ended"
    );
    report
}
