//! Time-domain edits: delay, resampling and channel mixing.

use crate::alloc::Allocator;
use crate::error::{try_vec, EditError, Result};
use crate::history::UndoAction;
use crate::signal::{Channel, Signal, SpliceEdit};
use crate::{clamp_sample, Sample};

use super::amplitude::rewrite_selected;
use super::{labels_snapshot, require, splice_batches, MixTarget, OpOutcome};

/// Add a copy of the range delayed by `offset` samples and scaled by `gain`.
///
/// Sources never reach before the start of the range. The recursive variant
/// reads the already delayed output, so echoes repeat and decay.
pub(super) fn delay(
    signal: &mut Signal,
    range: (usize, usize),
    offset: usize,
    gain: f32,
    recursive: bool,
) -> Result<Vec<UndoAction>> {
    require(offset > 0, "delay", "offset must be at least one sample")?;
    require(gain.is_finite(), "delay", "gain must be finite")?;
    if offset >= range.1 - range.0 {
        return Ok(Vec::new());
    }
    let gain = gain as f64;
    rewrite_selected(signal, range, |s, _| {
        if offset >= s.len() {
            return;
        }
        if recursive {
            for i in offset..s.len() {
                s[i] = clamp_sample(s[i] as f64 + gain * s[i - offset] as f64);
            }
        } else {
            // back to front so every source is still the dry sample
            for i in (offset..s.len()).rev() {
                s[i] = clamp_sample(s[i] as f64 + gain * s[i - offset] as f64);
            }
        }
    })
}

/// Linear-interpolation resampler. The output length is rounded up.
pub fn resample_linear(input: &[Sample], in_rate: u32, out_rate: u32) -> Result<Vec<Sample>> {
    if in_rate == out_rate || input.is_empty() || in_rate == 0 || out_rate == 0 {
        let mut out = try_vec(input.len(), "resample")?;
        out.extend_from_slice(input);
        return Ok(out);
    }
    let ratio = out_rate as f64 / in_rate as f64;
    let out_len = ((input.len() as f64) * ratio).ceil() as usize;
    let mut out = try_vec(out_len, "resample")?;
    let last = input.len() - 1;
    for i in 0..out_len {
        let src_pos = i as f64 / ratio;
        let i0 = src_pos.floor() as usize;
        if i0 >= last {
            out.push(input[last]);
            continue;
        }
        let t = (src_pos - i0 as f64).clamp(0.0, 1.0);
        let v = input[i0] as f64 * (1.0 - t) + input[i0 + 1] as f64 * t;
        out.push(clamp_sample(v));
    }
    Ok(out)
}

/// Convert every channel to `rate`, rescaling markers and labels.
pub(super) fn resample(
    signal: &mut Signal,
    alloc: &Allocator,
    rate: u32,
) -> Result<Vec<UndoAction>> {
    require(rate > 0, "resample", "rate must be positive")?;
    let old_rate = signal.rate();
    if rate == old_rate || old_rate == 0 || signal.channel_count() == 0 {
        return Ok(Vec::new());
    }
    let mut converted = Vec::with_capacity(signal.channel_count());
    for channel in signal.channels() {
        converted.push(resample_linear(channel.samples(), old_rate, rate)?);
    }
    let edits = converted
        .iter()
        .enumerate()
        .map(|(index, data)| SpliceEdit {
            channel: index,
            start: 0,
            old_len: signal.channel(index).map(Channel::len).unwrap_or(0),
            data,
        })
        .collect();
    let mut actions = splice_batches(signal, alloc, vec![edits])?;
    let ratio = rate as f64 / old_rate as f64;
    let (left, right) = signal.markers();
    actions.push(UndoAction::Rate(old_rate));
    signal.set_rate(rate);
    if !signal.labels().is_empty() {
        actions.push(labels_snapshot(signal));
        signal.labels_mut().scale(ratio);
    }
    signal.set_markers(
        (left as f64 * ratio).round() as usize,
        (right as f64 * ratio).round() as usize,
    );
    Ok(actions)
}

/// Weighted sum of the channels into `target`. Missing weights count as zero.
pub(super) fn channel_mix(
    signal: &mut Signal,
    alloc: &Allocator,
    weights: &[f32],
    target: MixTarget,
    outcome: &mut OpOutcome,
) -> Result<Vec<UndoAction>> {
    let count = signal.channel_count();
    if count == 0 {
        return Err(EditError::invalid_range("channel mix", 0, 0, 0));
    }
    require(
        weights.len() <= count,
        "channel mix",
        "more weights than channels",
    )?;
    require(
        weights.iter().all(|w| w.is_finite()),
        "channel mix",
        "weights must be finite",
    )?;
    if let MixTarget::Channel(index) = target {
        if index >= count {
            return Err(EditError::invalid_range("channel mix", index, index, count));
        }
    }
    let len = signal.len();
    let mut acc = try_vec::<f64>(len, "channel mix")?;
    acc.resize(len, 0.0);
    for (channel, &w) in signal.channels().iter().zip(weights) {
        if w == 0.0 {
            continue;
        }
        for (a, &v) in acc.iter_mut().zip(channel.samples()) {
            *a += w as f64 * v as f64;
        }
    }
    let mut mixed = try_vec::<Sample>(len, "channel mix")?;
    mixed.extend(acc.into_iter().map(clamp_sample));

    match target {
        MixTarget::NewChannel => {
            let buffer = alloc.allocate_from(&mixed)?;
            signal.insert_channel(count, Channel::new(buffer))?;
            outcome.inserted_channel = Some(count);
            Ok(vec![UndoAction::ChannelInserted { index: count }])
        }
        MixTarget::Channel(index) => {
            let old_len = signal.channel(index).map(Channel::len).unwrap_or(0);
            splice_batches(
                signal,
                alloc,
                vec![vec![SpliceEdit {
                    channel: index,
                    start: 0,
                    old_len,
                    data: &mixed,
                }]],
            )
        }
    }
}
