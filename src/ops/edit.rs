//! Length-changing edits and the clipboard transfers.

use crate::alloc::Allocator;
use crate::error::{try_vec, Result};
use crate::history::UndoAction;
use crate::signal::{Channel, Clipboard, Signal, SpliceEdit};
use crate::{clamp_sample, Sample};

use super::{labels_snapshot, splice_batches, OpOutcome};

fn channel_len(signal: &Signal, index: usize) -> usize {
    signal.channel(index).map(Channel::len).unwrap_or(0)
}

/// Remove `[left, right)` from the selected channels.
pub(super) fn delete(
    signal: &mut Signal,
    alloc: &Allocator,
    (left, right): (usize, usize),
) -> Result<Vec<UndoAction>> {
    let chain_wide = signal.all_selected();
    let edits: Vec<SpliceEdit<'_>> = signal
        .selected_indices()
        .into_iter()
        .filter_map(|index| {
            let end = right.min(channel_len(signal, index));
            (left < end).then_some(SpliceEdit {
                channel: index,
                start: left,
                old_len: end - left,
                data: &[],
            })
        })
        .collect();
    let mut actions = splice_batches(signal, alloc, vec![edits])?;
    if chain_wide {
        let before = labels_snapshot(signal);
        if signal.labels_mut().adjust_for_splice(left, right - left, 0) {
            actions.push(before);
        }
    }
    if !actions.is_empty() {
        signal.set_markers(left, left);
    }
    Ok(actions)
}

/// Keep only `[left, right)` of every channel.
pub(super) fn crop(
    signal: &mut Signal,
    alloc: &Allocator,
    (left, right): (usize, usize),
) -> Result<Vec<UndoAction>> {
    let count = signal.channel_count();
    let tails: Vec<SpliceEdit<'_>> = (0..count)
        .filter_map(|index| {
            let len = channel_len(signal, index);
            (right < len).then_some(SpliceEdit {
                channel: index,
                start: right,
                old_len: len - right,
                data: &[],
            })
        })
        .collect();
    let heads: Vec<SpliceEdit<'_>> = (0..count)
        .filter_map(|index| {
            let len = channel_len(signal, index);
            (left > 0).then_some(SpliceEdit {
                channel: index,
                start: 0,
                old_len: left.min(len),
                data: &[],
            })
        })
        .collect();
    let mut actions = splice_batches(signal, alloc, vec![tails, heads])?;
    let before = labels_snapshot(signal);
    if signal.labels_mut().crop(left, right) {
        actions.push(before);
    }
    signal.set_markers(0, 0);
    Ok(actions)
}

/// Snapshot `[left, right)` of the selected channels into a new signal.
pub(super) fn copy(signal: &Signal, (left, right): (usize, usize)) -> Result<Signal> {
    let mut channels = Vec::new();
    for index in signal.selected_indices() {
        let end = right.min(channel_len(signal, index));
        let data = if left < end {
            signal.snapshot(index, left, end)?
        } else {
            Vec::new()
        };
        channels.push(data);
    }
    Ok(Signal::from_channels(signal.rate(), channels))
}

/// Clipboard channel `k` padded with zeros to the clipboard length.
fn clip_channel(clip: &Signal, k: usize, len: usize) -> Result<Vec<Sample>> {
    let src = clip
        .channel(k % clip.channel_count().max(1))
        .map(Channel::samples)
        .unwrap_or(&[]);
    let mut data = try_vec(len, "paste copy")?;
    data.extend_from_slice(&src[..src.len().min(len)]);
    data.resize(len, 0);
    Ok(data)
}

/// Fill an empty signal with the clipboard's channels.
fn adopt_clipboard(
    signal: &mut Signal,
    alloc: &Allocator,
    clip: &Signal,
    outcome: &mut OpOutcome,
) -> Result<Vec<UndoAction>> {
    let mut buffers = Vec::with_capacity(clip.channel_count());
    for channel in clip.channels() {
        buffers.push(alloc.allocate_from(channel.samples())?);
    }
    let mut actions = Vec::new();
    if signal.rate() != clip.rate() {
        actions.push(UndoAction::Rate(signal.rate()));
        signal.set_rate(clip.rate());
    }
    for buffer in buffers {
        let index = signal.channel_count();
        signal.insert_channel(index, Channel::new(buffer))?;
        outcome.inserted_channel.get_or_insert(index);
        actions.push(UndoAction::ChannelInserted { index });
    }
    signal.set_markers(0, clip.len());
    Ok(actions)
}

/// Replace the marker range with the clipboard content.
///
/// Selected channels receive the clipboard; when only some channels are
/// selected the others keep their own samples, cut or zero-padded to the
/// clipboard length, so every channel grows or shrinks by the same amount.
pub(super) fn paste(
    signal: &mut Signal,
    alloc: &Allocator,
    clipboard: &Clipboard,
    outcome: &mut OpOutcome,
) -> Result<Vec<UndoAction>> {
    let Some(clip) = clipboard.signal().filter(|c| !c.is_empty()) else {
        return Ok(Vec::new());
    };
    if signal.channel_count() == 0 {
        return adopt_clipboard(signal, alloc, clip, outcome);
    }
    let (left, right) = signal.markers();
    let clip_len = clip.len();
    let selected = signal.selected_indices();

    let mut payloads = Vec::with_capacity(signal.channel_count());
    for index in 0..signal.channel_count() {
        let len = channel_len(signal, index);
        let start = left.min(len);
        let end = right.min(len);
        let data = match selected.iter().position(|&s| s == index) {
            Some(rank) => clip_channel(clip, rank, clip_len)?,
            None => {
                let mut own = signal.snapshot(index, start, end)?;
                own.resize(clip_len, 0);
                own
            }
        };
        payloads.push((index, start, end - start, data));
    }
    let edits = payloads
        .iter()
        .map(|(channel, start, old_len, data)| SpliceEdit {
            channel: *channel,
            start: *start,
            old_len: *old_len,
            data,
        })
        .collect();
    let mut actions = splice_batches(signal, alloc, vec![edits])?;
    let before = labels_snapshot(signal);
    if signal
        .labels_mut()
        .adjust_for_splice(left, right - left, clip_len)
    {
        actions.push(before);
    }
    signal.set_markers(left, left + clip_len);
    Ok(actions)
}

/// Average the clipboard into the signal from the left marker on. Clipboard
/// samples past the end of a channel are appended unchanged.
pub(super) fn mix_paste(
    signal: &mut Signal,
    alloc: &Allocator,
    clipboard: &Clipboard,
) -> Result<Vec<UndoAction>> {
    let Some(clip) = clipboard.signal().filter(|c| !c.is_empty()) else {
        return Ok(Vec::new());
    };
    if signal.channel_count() == 0 {
        let mut scratch = OpOutcome::default();
        return adopt_clipboard(signal, alloc, clip, &mut scratch);
    }
    let (left, _) = signal.markers();
    let clip_len = clip.len();

    let mut payloads = Vec::with_capacity(signal.channel_count());
    for index in 0..signal.channel_count() {
        let channel = match signal.channel(index) {
            Some(c) => c,
            None => continue,
        };
        let len = channel.len();
        let start = left.min(len);
        let overlap = clip_len.min(len - start);
        let src = clip_channel(clip, index, clip_len)?;
        let mut data = try_vec(clip_len, "mix paste")?;
        let own = &channel.samples()[start..start + overlap];
        data.extend(
            own.iter()
                .zip(&src[..overlap])
                .map(|(&a, &b)| clamp_sample((a as f64 + b as f64) * 0.5)),
        );
        data.extend_from_slice(&src[overlap..]);
        payloads.push((index, start, overlap, data));
    }
    let edits = payloads
        .iter()
        .map(|(channel, start, old_len, data)| SpliceEdit {
            channel: *channel,
            start: *start,
            old_len: *old_len,
            data,
        })
        .collect();
    let actions = splice_batches(signal, alloc, vec![edits])?;
    signal.set_markers(left, left + clip_len);
    Ok(actions)
}

/// Append captured frames to the end of the signal, creating channels when the
/// signal has none. Captured channel `k` feeds signal channel `k % captured`.
pub fn append_frames(
    signal: &mut Signal,
    alloc: &Allocator,
    rate: u32,
    captured: &[Vec<Sample>],
) -> Result<Vec<UndoAction>> {
    if captured.is_empty() || captured.iter().all(Vec::is_empty) {
        return Ok(Vec::new());
    }
    if signal.channel_count() == 0 {
        let capture = Signal::from_channels(rate, captured.to_vec());
        let mut scratch = OpOutcome::default();
        return adopt_clipboard(signal, alloc, &capture, &mut scratch);
    }
    let edits = (0..signal.channel_count())
        .map(|index| SpliceEdit {
            channel: index,
            start: channel_len(signal, index),
            old_len: 0,
            data: &captured[index % captured.len()],
        })
        .collect();
    splice_batches(signal, alloc, vec![edits])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(len: usize) -> Vec<Sample> {
        (0..len as Sample).collect()
    }

    #[test]
    fn partial_delete_only_shrinks_selected_channels() {
        let alloc = Allocator::heap();
        let mut signal = Signal::from_channels(8000, vec![ramp(10), ramp(10)]);
        signal.toggle_selection(0);
        delete(&mut signal, &alloc, (2, 5)).expect("delete");
        assert_eq!(signal.channels()[0].len(), 10);
        assert_eq!(signal.channels()[1].samples(), &[0, 1, 5, 6, 7, 8, 9]);
        assert_eq!(signal.markers(), (2, 2));
    }

    #[test]
    fn crop_keeps_range_and_resets_markers() {
        let alloc = Allocator::heap();
        let mut signal = Signal::from_channels(8000, vec![ramp(10)]);
        signal.set_markers(3, 6);
        let actions = crop(&mut signal, &alloc, (3, 6)).expect("crop");
        assert_eq!(actions.len(), 2);
        assert_eq!(signal.channels()[0].samples(), &[3, 4, 5]);
        assert_eq!(signal.markers(), (0, 0));
    }

    #[test]
    fn mix_paste_averages_and_extends() {
        let alloc = Allocator::heap();
        let mut signal = Signal::from_channels(8000, vec![vec![10, 10, 10]]);
        signal.set_markers(1, 1);
        let mut clipboard = Clipboard::new();
        clipboard.set(Signal::from_channels(8000, vec![vec![20, 30, 40]]));
        mix_paste(&mut signal, &alloc, &clipboard).expect("mix");
        assert_eq!(signal.channels()[0].samples(), &[10, 15, 20, 40]);
        assert_eq!(signal.markers(), (1, 4));
    }

    #[test]
    fn paste_with_partial_selection_pads_unselected_channels() {
        let alloc = Allocator::heap();
        let mut signal = Signal::from_channels(8000, vec![ramp(6), ramp(6)]);
        signal.toggle_selection(1);
        signal.set_markers(1, 3);
        let mut clipboard = Clipboard::new();
        clipboard.set(Signal::from_channels(8000, vec![vec![-1, -2, -3]]));
        let mut outcome = OpOutcome::default();
        paste(&mut signal, &alloc, &clipboard, &mut outcome).expect("paste");
        assert_eq!(signal.channels()[0].samples(), &[0, -1, -2, -3, 3, 4, 5]);
        assert_eq!(signal.channels()[1].samples(), &[0, 1, 2, 0, 3, 4, 5]);
        assert_eq!(signal.markers(), (1, 4));
    }
}
