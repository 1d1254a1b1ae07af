//! In-place amplitude edits. None of these change a channel's length.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::Result;
use crate::history::UndoAction;
use crate::signal::{Signal, SpliceRecord};
use crate::{clamp_sample, Sample, SAMPLE_MAX};

use super::FadeCurve;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FadeDirection {
    In,
    Out,
}

/// Gain at relative position `t` in `[0, 1]` of a fade.
pub fn fade_weight(curve: FadeCurve, direction: FadeDirection, t: f64) -> f64 {
    let x = match direction {
        FadeDirection::In => t.clamp(0.0, 1.0),
        FadeDirection::Out => 1.0 - t.clamp(0.0, 1.0),
    };
    match curve {
        FadeCurve::Linear => x,
        FadeCurve::Logarithmic => (1.0 + 9.0 * x).log10(),
    }
}

/// Snapshot `[start, end)` of every selected channel, then let `f` rewrite each
/// slice. `f` receives the slice and its absolute start.
pub(super) fn rewrite_selected(
    signal: &mut Signal,
    (start, end): (usize, usize),
    mut f: impl FnMut(&mut [Sample], usize),
) -> Result<Vec<UndoAction>> {
    let mut snapshots = Vec::new();
    for index in signal.selected_indices() {
        let len = signal.channel(index).map(|c| c.len()).unwrap_or(0);
        let e = end.min(len);
        if start >= e {
            continue;
        }
        snapshots.push((index, signal.snapshot(index, start, e)?));
    }
    let mut actions = Vec::with_capacity(snapshots.len());
    for (index, removed) in snapshots {
        let n = removed.len();
        if let Some(channel) = signal.channel_mut(index) {
            f(&mut channel.samples_mut()[start..start + n], start);
        }
        actions.push(UndoAction::Splice(SpliceRecord {
            channel: index,
            start,
            removed,
            inserted_len: n,
        }));
    }
    Ok(actions)
}

pub(super) fn zero(signal: &mut Signal, range: (usize, usize)) -> Result<Vec<UndoAction>> {
    rewrite_selected(signal, range, |s, _| s.fill(0))
}

pub(super) fn flip(signal: &mut Signal, range: (usize, usize)) -> Result<Vec<UndoAction>> {
    rewrite_selected(signal, range, |s, _| {
        for v in s.iter_mut() {
            *v = (-(*v as i64)).min(SAMPLE_MAX as i64) as Sample;
        }
    })
}

pub(super) fn reverse(signal: &mut Signal, range: (usize, usize)) -> Result<Vec<UndoAction>> {
    rewrite_selected(signal, range, |s, _| s.reverse())
}

/// Remove the DC offset: subtract the rounded mean of the range.
pub(super) fn center(signal: &mut Signal, range: (usize, usize)) -> Result<Vec<UndoAction>> {
    rewrite_selected(signal, range, |s, _| {
        if s.is_empty() {
            return;
        }
        let sum: i64 = s.iter().map(|&v| v as i64).sum();
        let mean = (sum as f64 / s.len() as f64).round() as i64;
        if mean == 0 {
            return;
        }
        for v in s.iter_mut() {
            *v = clamp_sample((*v as i64 - mean) as f64);
        }
    })
}

pub(super) fn fade(
    signal: &mut Signal,
    (left, right): (usize, usize),
    curve: FadeCurve,
    direction: FadeDirection,
) -> Result<Vec<UndoAction>> {
    let dur = (right - left).max(1) as f64;
    rewrite_selected(signal, (left, right), |s, at| {
        for (k, v) in s.iter_mut().enumerate() {
            let t = (at + k - left) as f64 / dur;
            *v = clamp_sample(*v as f64 * fade_weight(curve, direction, t));
        }
    })
}

/// Two passes: find the joint peak of the selected channels, then rescale so
/// the peak reaches full scale.
pub(super) fn maximize(signal: &mut Signal, (start, end): (usize, usize)) -> Result<Vec<UndoAction>> {
    let mut peak: i64 = 0;
    for index in signal.selected_indices() {
        if let Some(channel) = signal.channel(index) {
            let e = end.min(channel.len());
            if start < e {
                for &v in &channel.samples()[start..e] {
                    peak = peak.max((v as i64).abs());
                }
            }
        }
    }
    if peak == 0 || peak >= SAMPLE_MAX as i64 {
        return Ok(Vec::new());
    }
    let factor = SAMPLE_MAX as f64 / peak as f64;
    rewrite_selected(signal, (start, end), |s, _| {
        for v in s.iter_mut() {
            *v = clamp_sample(*v as f64 * factor);
        }
    })
}

pub(super) fn amplify(
    signal: &mut Signal,
    range: (usize, usize),
    factor: f32,
) -> Result<Vec<UndoAction>> {
    super::require(factor.is_finite(), "amplify", "factor must be finite")?;
    if factor == 1.0 {
        return Ok(Vec::new());
    }
    let factor = factor as f64;
    rewrite_selected(signal, range, |s, _| {
        for v in s.iter_mut() {
            *v = clamp_sample(*v as f64 * factor);
        }
    })
}

/// Overwrite the range with seeded uniform noise; one stream across channels.
pub(super) fn noise(
    signal: &mut Signal,
    range: (usize, usize),
    amplitude: f32,
    seed: u64,
) -> Result<Vec<UndoAction>> {
    super::require(
        (0.0..=1.0).contains(&amplitude),
        "noise",
        "amplitude must lie in 0..=1",
    )?;
    let level = amplitude as f64 * SAMPLE_MAX as f64;
    let mut rng = StdRng::seed_from_u64(seed);
    rewrite_selected(signal, range, |s, _| {
        for v in s.iter_mut() {
            *v = clamp_sample(rng.gen_range(-1.0..=1.0) * level);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_fade_starts_silent_and_ends_unity() {
        let w0 = fade_weight(FadeCurve::Logarithmic, FadeDirection::In, 0.0);
        let w1 = fade_weight(FadeCurve::Logarithmic, FadeDirection::In, 1.0);
        let wh = fade_weight(FadeCurve::Logarithmic, FadeDirection::In, 0.5);
        assert_eq!(w0, 0.0);
        assert!((w1 - 1.0).abs() < 1e-12);
        assert!(wh > 0.5, "log curve rises faster than linear: {wh}");
        let out = fade_weight(FadeCurve::Logarithmic, FadeDirection::Out, 0.0);
        assert!((out - 1.0).abs() < 1e-12);
    }

    #[test]
    fn flip_saturates_the_negative_extreme() {
        let mut signal = Signal::from_channels(8000, vec![vec![crate::SAMPLE_MIN, 5, -5]]);
        signal.set_markers(0, 3);
        flip(&mut signal, (0, 3)).expect("flip");
        assert_eq!(signal.channels()[0].samples(), &[SAMPLE_MAX, -5, 5]);
    }

    #[test]
    fn center_removes_offset() {
        let mut signal = Signal::from_channels(8000, vec![vec![110, 90, 100, 100]]);
        center(&mut signal, (0, 4)).expect("center");
        assert_eq!(signal.channels()[0].samples(), &[10, -10, 0, 0]);
    }

    #[test]
    fn noise_is_reproducible_for_a_seed() {
        let mut a = Signal::from_channels(8000, vec![vec![0; 64]]);
        let mut b = Signal::from_channels(8000, vec![vec![0; 64]]);
        noise(&mut a, (0, 64), 0.25, 42).expect("noise");
        noise(&mut b, (0, 64), 0.25, 42).expect("noise");
        assert_eq!(a.channels()[0].samples(), b.channels()[0].samples());
        let limit = (0.25 * SAMPLE_MAX as f64).ceil() as Sample;
        assert!(a.channels()[0].samples().iter().all(|v| v.abs() <= limit));
        assert!(a.channels()[0].samples().iter().any(|&v| v != 0));
    }

    #[test]
    fn unselected_channels_are_left_alone() {
        let mut signal = Signal::from_channels(8000, vec![vec![7; 8], vec![7; 8]]);
        signal.toggle_selection(1);
        let actions = zero(&mut signal, (2, 6)).expect("zero");
        assert_eq!(actions.len(), 1);
        assert_eq!(signal.channels()[0].samples(), &[7, 7, 0, 0, 0, 0, 7, 7]);
        assert_eq!(signal.channels()[1].samples(), &[7; 8]);
    }
}
