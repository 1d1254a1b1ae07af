use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use waveforge::alloc::open_mappings;
use waveforge::config::{AllocConfig, EngineConfig};
use waveforge::{wave, Allocator, ByteOrder, EditError, Editor, Label, Sample, SaveOptions, Signal};

fn make_temp_dir(tag: &str) -> PathBuf {
    static NEXT_ID: AtomicU64 = AtomicU64::new(1);
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let seq = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let mut dir = std::env::temp_dir();
    dir.push(format!(
        "waveforge_codec_{tag}_{}_{}_{}",
        std::process::id(),
        now_ms,
        seq
    ));
    std::fs::create_dir_all(&dir).expect("create temp test dir");
    dir
}

/// Values that survive a round trip at `bits`.
fn representable(bits: u16, len: usize, phase: i64) -> Vec<Sample> {
    let shift = 24 - bits as u32;
    let half = 1i64 << (bits - 1);
    (0..len as i64)
        .map(|i| {
            let k = ((i * 7919 + phase) % (2 * half)) - half;
            (k << shift) as Sample
        })
        .collect()
}

#[test]
fn every_width_and_byte_order_round_trips() {
    let dir = make_temp_dir("widths");
    let alloc = Allocator::heap();
    for bits in [8u16, 16, 24] {
        for order in [ByteOrder::Little, ByteOrder::Big] {
            let left = representable(bits, 333, 1);
            let right = representable(bits, 333, 977);
            let mut signal = Signal::from_channels(32_000, vec![left.clone(), right.clone()]);
            signal.set_markers(0, 0);
            let path = dir.join(format!("rt_{bits}_{order:?}.wav"));
            let opts = SaveOptions {
                bits,
                byte_order: order,
                ..SaveOptions::default()
            };
            wave::save(&signal, &path, &opts).expect("save");

            let raw = std::fs::read(&path).expect("read back");
            let tag: &[u8] = match order {
                ByteOrder::Little => b"RIFF",
                ByteOrder::Big => b"RIFX",
            };
            assert_eq!(&raw[0..4], tag);

            let info = wave::read_info(&path).expect("info");
            assert_eq!(info.bits, bits);
            assert_eq!(info.channels, 2);
            assert_eq!(info.frames(), 333);

            let back = wave::load(&path, &alloc).expect("load");
            assert_eq!(back.rate(), 32_000);
            assert_eq!(back.channels()[0].samples(), &left[..], "{bits} bits {order:?}");
            assert_eq!(back.channels()[1].samples(), &right[..], "{bits} bits {order:?}");
        }
    }
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn hound_written_file_loads_as_fixed_point() {
    let dir = make_temp_dir("hound");
    let path = dir.join("hound16.wav");
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 48_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).expect("create");
    for v in [0i16, 1, -1, i16::MAX, i16::MIN] {
        writer.write_sample(v).expect("write sample");
    }
    writer.finalize().expect("finalize");

    let signal = wave::load(&path, &Allocator::heap()).expect("load");
    assert_eq!(
        signal.channels()[0].samples(),
        &[0, 256, -256, 32_767 << 8, -32_768 << 8]
    );
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn labels_and_selection_only_save() {
    let dir = make_temp_dir("labels");
    let data: Vec<Sample> = (0..100).map(|i| (i as Sample) << 8).collect();
    let mut editor = Editor::new(EngineConfig::default());
    editor
        .set_signal(Signal::from_channels(8000, vec![data.clone()]))
        .expect("set signal");
    editor.add_label(10, "intro").expect("label");
    editor.add_label(60, "drop").expect("label");
    editor.set_markers(50, 80);

    let whole = dir.join("whole.wav");
    editor
        .save_signal(&whole, &SaveOptions::default())
        .expect("save whole");
    let loaded = wave::load(&whole, &Allocator::heap()).expect("load whole");
    assert_eq!(
        loaded.labels().as_slice(),
        &[Label::new(10, "intro"), Label::new(60, "drop")]
    );

    let part = dir.join("part.wav");
    let opts = SaveOptions {
        selection_only: true,
        byte_order: ByteOrder::Big,
        ..SaveOptions::default()
    };
    editor.save_signal(&part, &opts).expect("save selection");
    let loaded = wave::load(&part, &Allocator::heap()).expect("load selection");
    assert_eq!(loaded.len(), 30);
    assert_eq!(loaded.channels()[0].samples(), &data[50..80]);
    assert_eq!(loaded.labels().as_slice(), &[Label::new(10, "drop")]);

    editor.set_markers(5, 5);
    assert!(matches!(
        editor.save_signal(&part, &opts),
        Err(EditError::InvalidRange { .. })
    ));
    let _ = std::fs::remove_dir_all(&dir);
}

fn float_container() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(4u32 + 24 + 8 + 8).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&3u16.to_le_bytes()); // IEEE float
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&8000u32.to_le_bytes());
    out.extend_from_slice(&32_000u32.to_le_bytes());
    out.extend_from_slice(&4u16.to_le_bytes());
    out.extend_from_slice(&32u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&8u32.to_le_bytes());
    out.extend_from_slice(&0.5f32.to_le_bytes());
    out.extend_from_slice(&(-0.5f32).to_le_bytes());
    out
}

#[test]
fn non_pcm_container_is_rejected_before_allocation() {
    let dir = make_temp_dir("float");
    let path = dir.join("float.wav");
    std::fs::write(&path, float_container()).expect("write");

    // a one byte threshold would map any buffer the loader allocated
    let mut config = EngineConfig::default();
    config.alloc = AllocConfig {
        mmap_threshold_bytes: 1,
        temp_dir: dir.join("buffers"),
    };
    let mut editor = Editor::new(config);
    let err = editor.load(&path).expect_err("float data must be refused");
    assert!(matches!(err, EditError::InvalidContainer { .. }), "{err}");
    assert!(editor.channels().is_empty());
    assert!(open_mappings()
        .iter()
        .all(|p| !p.starts_with(dir.join("buffers"))));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn garbage_and_missing_chunks_are_invalid_containers() {
    let dir = make_temp_dir("garbage");
    let alloc = Allocator::heap();

    let junk = dir.join("junk.wav");
    std::fs::write(&junk, b"definitely not a container").expect("write");
    assert!(matches!(
        wave::load(&junk, &alloc),
        Err(EditError::InvalidContainer { .. })
    ));

    let mut no_data = float_container();
    no_data.truncate(36);
    no_data[20] = 1; // PCM
    no_data[32] = 2; // block align
    no_data[34] = 16; // bits
    let headless = dir.join("no_data.wav");
    std::fs::write(&headless, &no_data).expect("write");
    assert!(matches!(
        wave::load(&headless, &alloc),
        Err(EditError::InvalidContainer { .. })
    ));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn unsupported_widths_are_refused_on_save() {
    let dir = make_temp_dir("width");
    let signal = Signal::from_channels(8000, vec![vec![0; 4]]);
    let opts = SaveOptions {
        bits: 12,
        ..SaveOptions::default()
    };
    assert!(matches!(
        wave::save(&signal, &dir.join("x.wav"), &opts),
        Err(EditError::UnsupportedFormat { bits: 12 })
    ));
    let _ = std::fs::remove_dir_all(&dir);
}
