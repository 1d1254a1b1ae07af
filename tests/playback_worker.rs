use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use waveforge::config::{AllocConfig, EngineConfig};
use waveforge::pcm::PcmFragment;
use waveforge::playback::device::check_params;
use waveforge::playback::worker::run_playback;
use waveforge::playback::{
    DeviceParams, DeviceSpec, OutputDevice, PlayJob, SampleImage, SharedControl, Transport,
    WorkerMode, WorkerState,
};
use waveforge::{Clipboard, EditError, Editor, Notification, RangeOp, Sample, Signal};

fn make_temp_dir(tag: &str) -> PathBuf {
    static NEXT_ID: AtomicU64 = AtomicU64::new(1);
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let seq = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let mut dir = std::env::temp_dir();
    dir.push(format!(
        "waveforge_play_{tag}_{}_{}_{}",
        std::process::id(),
        now_ms,
        seq
    ));
    std::fs::create_dir_all(&dir).expect("create temp test dir");
    dir
}

/// Frame `i` carries `i` in 16-bit resolution so it survives fragment encoding.
fn ramp(len: usize) -> Vec<Sample> {
    (0..len as Sample).map(|i| i << 8).collect()
}

/// Records every fragment together with the position reported at write time.
struct Recorder {
    peer: SharedControl,
    max_channels: u16,
    stop_after: Option<usize>,
    positions: Vec<Option<u64>>,
    fragments: Vec<Vec<Sample>>,
}

impl Recorder {
    fn new(control: &Path, max_channels: u16, stop_after: Option<usize>) -> Self {
        Self {
            peer: SharedControl::open(control).expect("attach control"),
            max_channels,
            stop_after,
            positions: Vec::new(),
            fragments: Vec::new(),
        }
    }

    fn samples(&self) -> Vec<Sample> {
        self.fragments.concat()
    }
}

impl OutputDevice for Recorder {
    fn negotiate(&mut self, wanted: DeviceParams) -> waveforge::Result<DeviceParams> {
        check_params(&wanted)?;
        Ok(DeviceParams {
            channels: if self.max_channels == 0 {
                wanted.channels
            } else {
                wanted.channels.min(self.max_channels)
            },
            ..wanted
        })
    }

    fn write(&mut self, fragment: &PcmFragment) -> waveforge::Result<()> {
        self.positions.push(self.peer.position());
        self.fragments.push(fragment.to_fixed());
        if self.stop_after == Some(self.fragments.len()) {
            self.peer.request_stop();
        }
        Ok(())
    }
}

fn job(
    control: &SharedControl,
    image: &SampleImage,
    start: u64,
    end: u64,
    looping: bool,
) -> PlayJob {
    PlayJob {
        control_path: control.path().to_path_buf(),
        image_path: image.path().to_path_buf(),
        start,
        end,
        looping,
        device: DeviceSpec::Null {
            realtime: false,
            max_channels: 0,
        },
        params: DeviceParams {
            bits: 16,
            channels: image.channels() as u16,
            rate: 8000,
            fragment_frames: 256,
        },
    }
}

#[test]
fn looping_wraps_inside_the_markers_until_stopped() {
    let dir = make_temp_dir("loop");
    let signal = Signal::from_channels(8000, vec![ramp(10_000)]);
    let control = SharedControl::create(&dir).expect("control");
    let image = SampleImage::write(&dir, &signal).expect("image");
    let mut device = Recorder::new(control.path(), 0, Some(40));

    let looped = job(&control, &image, 1000, 5000, true);
    let streamed = run_playback(&looped, &control, &image, &mut device).expect("playback");
    // one pass is 15 full fragments and a 160 frame tail ending on the marker
    assert_eq!(streamed, 2 * 4000 + 8 * 256);

    // the reported position is the start of the fragment being written
    let positions: Vec<u64> = device.positions.iter().map(|p| p.expect("position")).collect();
    let lens: Vec<u64> = device.fragments.iter().map(|f| f.len() as u64).collect();
    assert_eq!(positions[0], 1000);
    assert!(positions.iter().all(|&p| (1000..5000).contains(&p)));
    assert!(positions.iter().zip(&lens).all(|(p, n)| p + n <= 5000));

    let wraps: Vec<usize> = positions
        .windows(2)
        .enumerate()
        .filter(|(_, w)| w[1] < w[0])
        .map(|(i, _)| i)
        .collect();
    assert_eq!(wraps, vec![15, 31]);
    for i in wraps {
        // the pass reaches 5000 exactly, then restarts at 1000
        assert_eq!(positions[i] + lens[i], 5000);
        assert_eq!(positions[i + 1], 1000);
    }

    let heard = device.samples();
    for (k, &s) in heard.iter().enumerate() {
        let frame = 1000 + (k as Sample % 4000);
        assert_eq!(s, frame << 8, "sample {k}");
    }

    assert_eq!(control.position(), None);
    assert_eq!(control.state(), WorkerState::Finished);
    drop(image);
    drop(control);
    let _ = std::fs::remove_dir_all(&dir);
}

/// Pauses the worker after the fragment that ends on the right marker, then
/// stops it on the first fragment after the wrap.
struct WrapWatch {
    peer: SharedControl,
    end: u64,
    wrapped: bool,
    starts: Vec<u64>,
}

impl OutputDevice for WrapWatch {
    fn negotiate(&mut self, wanted: DeviceParams) -> waveforge::Result<DeviceParams> {
        check_params(&wanted)?;
        Ok(wanted)
    }

    fn write(&mut self, fragment: &PcmFragment) -> waveforge::Result<()> {
        let start = self.peer.position().expect("position while streaming");
        self.starts.push(start);
        if self.wrapped {
            self.peer.request_stop();
        } else if start + fragment.len() as u64 == self.end {
            self.peer.set_paused(true);
            self.wrapped = true;
        }
        Ok(())
    }
}

#[test]
fn a_loop_pass_reports_the_right_marker_then_wraps_to_the_left() {
    let dir = make_temp_dir("wrapmark");
    let signal = Signal::from_channels(8000, vec![ramp(10_000)]);
    let control = SharedControl::create(&dir).expect("control");
    let image = SampleImage::write(&dir, &signal).expect("image");
    let mut device = WrapWatch {
        peer: SharedControl::open(control.path()).expect("attach control"),
        end: 5000,
        wrapped: false,
        starts: Vec::new(),
    };
    let looped = job(&control, &image, 1000, 5000, true);

    let at_pause = std::thread::scope(|scope| {
        let worker = scope.spawn(|| run_playback(&looped, &control, &image, &mut device));
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut pos = control.position();
        while !(control.is_paused() && pos == Some(5000)) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
            pos = control.position();
        }
        if pos != Some(5000) {
            control.request_stop();
        }
        control.set_paused(false);
        worker
            .join()
            .expect("worker thread")
            .expect("playback");
        pos
    });

    assert_eq!(at_pause, Some(5000));
    assert_eq!(device.starts.first(), Some(&1000));
    assert_eq!(&device.starts[device.starts.len() - 2..], &[4840, 1000]);
    assert_eq!(control.state(), WorkerState::Finished);
    drop(image);
    drop(control);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn one_shot_pads_the_final_fragment_with_silence() {
    let dir = make_temp_dir("oneshot");
    let signal = Signal::from_channels(8000, vec![ramp(1000)]);
    let control = SharedControl::create(&dir).expect("control");
    let image = SampleImage::write(&dir, &signal).expect("image");
    let mut device = Recorder::new(control.path(), 0, None);

    let once = job(&control, &image, 0, 600, false);
    let streamed = run_playback(&once, &control, &image, &mut device).expect("playback");
    assert_eq!(streamed, 600);
    assert_eq!(device.fragments.len(), 3);
    assert!(device.fragments.iter().all(|f| f.len() == 256));

    let heard = device.samples();
    assert_eq!(&heard[..600], &ramp(600)[..]);
    assert!(heard[600..].iter().all(|&s| s == 0));
    assert_eq!(device.positions, vec![Some(0), Some(256), Some(512)]);
    assert_eq!(control.state(), WorkerState::Finished);
    drop(image);
    drop(control);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn extra_source_channels_are_averaged_down() {
    let dir = make_temp_dir("downmix");
    let signal = Signal::from_channels(
        8000,
        vec![vec![300 << 8; 100], vec![600 << 8; 100], vec![900 << 8; 100]],
    );
    let control = SharedControl::create(&dir).expect("control");
    let image = SampleImage::write(&dir, &signal).expect("image");
    let mut device = Recorder::new(control.path(), 1, None);

    run_playback(&job(&control, &image, 0, 100, false), &control, &image, &mut device)
        .expect("playback");
    let heard = device.samples();
    assert_eq!(heard.len(), 256);
    assert!(heard[..100].iter().all(|&s| s == 600 << 8));
    drop(image);
    drop(control);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn rejected_sample_width_fails_the_session() {
    let dir = make_temp_dir("width");
    let signal = Signal::from_channels(8000, vec![ramp(100)]);
    let control = SharedControl::create(&dir).expect("control");
    let image = SampleImage::write(&dir, &signal).expect("image");
    let mut device = Recorder::new(control.path(), 0, None);

    let mut bad = job(&control, &image, 0, 100, false);
    bad.params.bits = 12;
    let err = run_playback(&bad, &control, &image, &mut device).expect_err("12 bits");
    match err {
        EditError::DeviceNegotiationFailed { step, .. } => assert_eq!(step, "sample width"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(device.fragments.is_empty());
    assert_eq!(control.position(), None);
    assert_eq!(control.state(), WorkerState::Failed);
    drop(image);
    drop(control);
    let _ = std::fs::remove_dir_all(&dir);
}

fn thread_editor(dir: &Path, device: DeviceSpec) -> Editor {
    let mut config = EngineConfig::default();
    config.alloc = AllocConfig {
        temp_dir: dir.to_path_buf(),
        ..AllocConfig::default()
    };
    config.playback.worker = WorkerMode::Thread;
    config.playback.device = device.clone();
    config.playback.input_device = device;
    config.playback.fragment_frames = 128;
    Editor::new(config)
}

#[test]
fn edits_are_refused_while_a_worker_is_attached() {
    let dir = make_temp_dir("busy");
    let mut editor = thread_editor(
        &dir,
        DeviceSpec::Null {
            realtime: true,
            max_channels: 0,
        },
    );
    editor
        .set_signal(Signal::from_channels(8000, vec![ramp(8000)]))
        .expect("set signal");
    editor.set_markers(2000, 4000);
    let mut clip = Clipboard::new();

    editor.loop_play().expect("loop");
    assert!(editor.is_playing());
    assert_eq!(editor.start_pos(), Some(2000));
    assert_eq!(editor.end_pos(), Some(4000));

    let deadline = Instant::now() + Duration::from_secs(5);
    let pos = loop {
        if let Some(p) = editor.poll().expect("poll") {
            break p;
        }
        assert!(Instant::now() < deadline, "worker never reported a position");
        std::thread::sleep(Duration::from_millis(5));
    };
    assert!((2000..=4000).contains(&pos));

    assert!(matches!(
        editor.do_range_op(&RangeOp::Reverse, &mut clip),
        Err(EditError::Busy { .. })
    ));
    assert!(matches!(editor.undo(), Err(EditError::Busy { .. })));
    assert!(matches!(editor.play(), Err(EditError::Busy { .. })));
    // copying only reads the signal
    editor.do_range_op(&RangeOp::Copy, &mut clip).expect("copy");
    assert_eq!(clip.len(), 2000);

    assert!(editor.stop());
    editor.wait().expect("wait");
    assert!(!editor.is_playing());
    assert_eq!(editor.current_pos(), None);
    assert!(editor
        .do_range_op(&RangeOp::Reverse, &mut clip)
        .expect("reverse after stop"));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn negotiation_failure_surfaces_when_the_session_ends() {
    let dir = make_temp_dir("negotiate");
    let mut editor = thread_editor(
        &dir,
        DeviceSpec::Null {
            realtime: false,
            max_channels: 0,
        },
    );
    editor
        .set_signal(Signal::from_channels(0, vec![ramp(64)]))
        .expect("set signal");
    editor.play().expect("spawn");
    match editor.wait() {
        Err(EditError::DeviceNegotiationFailed { step, .. }) => assert_eq!(step, "sample rate"),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(!editor.is_playing());
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn playback_renders_the_selection_into_a_wav_device() {
    let dir = make_temp_dir("render");
    let out = dir.join("render.wav");
    let mut editor = thread_editor(&dir, DeviceSpec::WavFile { path: out.clone() });
    editor
        .set_signal(Signal::from_channels(8000, vec![ramp(1000), vec![-256; 1000]]))
        .expect("set signal");
    let notes = editor.subscribe();
    editor.set_markers(100, 400);
    editor.play().expect("play");
    editor.wait().expect("wait");

    let mut reader = hound::WavReader::open(&out).expect("open render");
    assert_eq!(reader.spec().channels, 2);
    assert_eq!(reader.spec().sample_rate, 8000);
    let samples: Vec<i16> = reader
        .samples::<i16>()
        .collect::<Result<_, _>>()
        .expect("samples");
    // 300 frames rounded up to whole fragments of 128
    assert_eq!(samples.len(), 384 * 2);
    for frame in 0..300 {
        assert_eq!(samples[frame * 2], (100 + frame) as i16);
        assert_eq!(samples[frame * 2 + 1], -1);
    }
    assert!(samples[600..].iter().all(|&s| s == 0));

    let seen: Vec<Notification> = notes.try_iter().collect();
    assert!(seen.contains(&Notification::PlaybackStarted { recording: false }));
    assert!(seen.contains(&Notification::PlaybackStopped { natural: true }));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn recording_appends_frames_and_undoes() {
    let dir = make_temp_dir("record");
    let source = dir.join("source.wav");
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 8000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&source, spec).expect("create source");
    for i in 0..500i16 {
        writer.write_sample(i - 250).expect("write");
    }
    writer.finalize().expect("finalize");

    let mut editor = thread_editor(&dir, DeviceSpec::WavFile { path: source });
    editor
        .set_signal(Signal::from_channels(8000, vec![vec![7; 100]]))
        .expect("set signal");
    editor.record(1, None).expect("record");
    assert!(matches!(
        editor.append_channel(),
        Err(EditError::Busy { .. })
    ));
    editor.wait().expect("wait");

    let got = editor.channels()[0].samples();
    assert_eq!(got.len(), 600);
    assert!(got[..100].iter().all(|&s| s == 7));
    for (i, &s) in got[100..].iter().enumerate() {
        assert_eq!(s, (i as Sample - 250) << 8);
    }

    editor.undo().expect("undo").expect("record entry");
    assert_eq!(editor.channels()[0].samples(), &[7; 100][..]);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn capped_recording_into_an_empty_signal_creates_channels() {
    let dir = make_temp_dir("capped");
    let mut editor = thread_editor(
        &dir,
        DeviceSpec::Null {
            realtime: false,
            max_channels: 0,
        },
    );
    editor.record(2, Some(300)).expect("record");
    editor.wait().expect("wait");
    assert_eq!(editor.signal().channel_count(), 2);
    assert_eq!(editor.signal().len(), 300);
    editor.undo().expect("undo");
    assert_eq!(editor.signal().channel_count(), 0);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn a_failed_session_does_not_block_the_next_edit() {
    let dir = make_temp_dir("stale");
    let mut editor = thread_editor(
        &dir,
        DeviceSpec::Null {
            realtime: false,
            max_channels: 0,
        },
    );
    editor
        .set_signal(Signal::from_channels(0, vec![ramp(64)]))
        .expect("set signal");
    let notes = editor.subscribe();
    editor.play().expect("spawn");

    // the worker fails negotiation on its own; nobody waits for it
    let deadline = Instant::now() + Duration::from_secs(5);
    let index = loop {
        match editor.append_channel() {
            Ok(index) => break index,
            Err(EditError::Busy { .. }) => {
                assert!(Instant::now() < deadline, "worker never exited");
                std::thread::sleep(Duration::from_millis(2));
            }
            Err(other) => panic!("edit refused by a finished session: {other}"),
        }
    };
    assert_eq!(index, 1);
    assert!(!editor.is_playing());

    let seen: Vec<Notification> = notes.try_iter().collect();
    assert!(seen.contains(&Notification::PlaybackStopped { natural: false }));
    assert!(seen.iter().any(|n| matches!(
        n,
        Notification::PlaybackFailed { message } if message.contains("sample rate")
    )));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn a_worker_process_streams_the_range_and_answers_over_json() {
    let dir = make_temp_dir("process");
    let out = dir.join("process.wav");
    let mut config = EngineConfig::default().playback;
    config.worker = WorkerMode::Process;
    config.worker_path = Some(PathBuf::from(env!("CARGO_BIN_EXE_waveforge_play_worker")));
    config.device = DeviceSpec::WavFile { path: out.clone() };
    config.fragment_frames = 128;
    let mut transport = Transport::new(config, dir.clone());

    let mut signal = Signal::from_channels(8000, vec![ramp(1000)]);
    signal.set_markers(200, 456);
    transport.play(&signal, false).expect("spawn");
    assert!(transport.is_attached());
    let report = transport.wait().expect("session report");
    assert!(report.failure.is_none(), "{:?}", report.failure);
    assert!(report.natural);
    assert_eq!(report.frames, 256);
    assert_ne!(report.worker_pid, 0);
    assert_ne!(report.worker_pid, std::process::id());
    assert!(!transport.is_attached());

    let mut reader = hound::WavReader::open(&out).expect("open render");
    let samples: Vec<i16> = reader
        .samples::<i16>()
        .collect::<Result<_, _>>()
        .expect("samples");
    let expected: Vec<i16> = (200..456).collect();
    assert_eq!(samples, expected);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn a_worker_process_reports_negotiation_failures() {
    let dir = make_temp_dir("process_fail");
    let mut config = EngineConfig::default();
    config.alloc.temp_dir = dir.clone();
    config.playback.worker = WorkerMode::Process;
    config.playback.worker_path =
        Some(PathBuf::from(env!("CARGO_BIN_EXE_waveforge_play_worker")));
    config.playback.device = DeviceSpec::Null {
        realtime: false,
        max_channels: 0,
    };
    config.playback.bits = 12;
    let mut editor = Editor::new(config);
    editor
        .set_signal(Signal::from_channels(8000, vec![ramp(64)]))
        .expect("set signal");
    editor.play().expect("spawn");
    match editor.wait() {
        Err(EditError::DeviceNegotiationFailed { step, .. }) => assert_eq!(step, "sample width"),
        other => panic!("unexpected outcome: {other:?}"),
    }
    let _ = std::fs::remove_dir_all(&dir);
}
