//! Multi-channel sample store.
//!
//! A [`Signal`] owns an ordered chain of [`Channel`]s plus the chain-wide
//! metadata (sample rate, range markers, labels). Each channel exclusively owns
//! its sample buffer; a clipboard is a separately owned [`Signal`].

use tracing::debug;

use crate::alloc::{release, Allocator, SampleBuffer};
use crate::error::{try_vec, EditError, Result};
use crate::labels::LabelList;
use crate::Sample;

#[derive(Debug)]
pub struct Channel {
    samples: SampleBuffer,
    selected: bool,
}

impl Channel {
    pub fn new(samples: SampleBuffer) -> Self {
        Self {
            samples,
            selected: true,
        }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut [Sample] {
        &mut self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    pub fn set_selected(&mut self, selected: bool) {
        self.selected = selected;
    }

    pub fn is_mapped(&self) -> bool {
        self.samples.is_mapped()
    }

    pub(crate) fn replace_buffer(&mut self, samples: SampleBuffer) -> SampleBuffer {
        std::mem::replace(&mut self.samples, samples)
    }

    pub(crate) fn into_buffer(self) -> SampleBuffer {
        self.samples
    }
}

/// Replace `old_len` samples at `start` of `channel` with `data`.
#[derive(Debug)]
pub struct SpliceEdit<'a> {
    pub channel: usize,
    pub start: usize,
    pub old_len: usize,
    pub data: &'a [Sample],
}

/// What a committed splice removed, enough to reverse it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpliceRecord {
    pub channel: usize,
    pub start: usize,
    pub removed: Vec<Sample>,
    pub inserted_len: usize,
}

#[derive(Debug)]
pub struct Signal {
    channels: Vec<Channel>,
    rate: u32,
    left: usize,
    right: usize,
    labels: LabelList,
}

impl Signal {
    pub fn new(rate: u32) -> Self {
        Self {
            channels: Vec::new(),
            rate,
            left: 0,
            right: 0,
            labels: LabelList::new(),
        }
    }

    /// Heap-backed signal from per-channel sample vectors.
    pub fn from_channels(rate: u32, channels: Vec<Vec<Sample>>) -> Self {
        let mut signal = Self::new(rate);
        signal.channels = channels
            .into_iter()
            .map(|c| Channel::new(SampleBuffer::from_vec(c)))
            .collect();
        signal
    }

    pub fn from_buffers(rate: u32, buffers: Vec<SampleBuffer>) -> Self {
        let mut signal = Self::new(rate);
        signal.channels = buffers.into_iter().map(Channel::new).collect();
        signal
    }

    /// Silent signal with `channels` channels of `len` samples each.
    pub fn blank(alloc: &Allocator, channels: usize, len: usize, rate: u32) -> Result<Self> {
        let mut signal = Self::new(rate);
        for _ in 0..channels {
            signal
                .channels
                .push(Channel::new(alloc.allocate_samples(len)?));
        }
        Ok(signal)
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    pub(crate) fn set_rate(&mut self, rate: u32) {
        self.rate = rate;
    }

    /// Nominal length: the longest channel.
    pub fn len(&self) -> usize {
        self.channels.iter().map(Channel::len).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn channel(&self, index: usize) -> Option<&Channel> {
        self.channels.get(index)
    }

    pub fn channel_mut(&mut self, index: usize) -> Option<&mut Channel> {
        self.channels.get_mut(index)
    }

    pub fn markers(&self) -> (usize, usize) {
        (self.left, self.right)
    }

    /// Store the selection, ordered and clamped into `[0, len]`.
    pub fn set_markers(&mut self, left: usize, right: usize) -> (usize, usize) {
        let len = self.len();
        let (l, r) = if left <= right {
            (left, right)
        } else {
            (right, left)
        };
        self.left = l.min(len);
        self.right = r.min(len);
        (self.left, self.right)
    }

    /// Re-clamp the markers after the length changed.
    pub fn normalize_markers(&mut self) -> (usize, usize) {
        self.set_markers(self.left, self.right)
    }

    pub fn labels(&self) -> &LabelList {
        &self.labels
    }

    pub(crate) fn labels_mut(&mut self) -> &mut LabelList {
        &mut self.labels
    }

    pub(crate) fn replace_labels(&mut self, labels: LabelList) -> LabelList {
        std::mem::replace(&mut self.labels, labels)
    }

    /// Indices of the selected channels; an empty selection means every channel.
    pub fn selected_indices(&self) -> Vec<usize> {
        let picked: Vec<usize> = self
            .channels
            .iter()
            .enumerate()
            .filter(|(_, c)| c.selected)
            .map(|(i, _)| i)
            .collect();
        if picked.is_empty() {
            (0..self.channels.len()).collect()
        } else {
            picked
        }
    }

    pub fn all_selected(&self) -> bool {
        self.selected_indices().len() == self.channels.len()
    }

    pub fn toggle_selection(&mut self, index: usize) -> Option<bool> {
        let channel = self.channels.get_mut(index)?;
        channel.selected = !channel.selected;
        Some(channel.selected)
    }

    /// Append a silent channel of the nominal length; returns its index.
    pub fn append_channel(&mut self, alloc: &Allocator) -> Result<usize> {
        let buffer = alloc.allocate_samples(self.len())?;
        self.channels.push(Channel::new(buffer));
        Ok(self.channels.len() - 1)
    }

    pub(crate) fn insert_channel(&mut self, index: usize, channel: Channel) -> Result<()> {
        if index > self.channels.len() {
            return Err(EditError::invalid_range(
                "insert channel",
                index,
                index,
                self.channels.len(),
            ));
        }
        self.channels.insert(index, channel);
        Ok(())
    }

    /// Unlink a channel from the chain and hand it to the caller.
    pub(crate) fn take_channel(&mut self, index: usize) -> Result<Channel> {
        if index >= self.channels.len() {
            return Err(EditError::invalid_range(
                "delete channel",
                index,
                index,
                self.channels.len(),
            ));
        }
        let channel = self.channels.remove(index);
        if self.channels.is_empty() {
            self.left = 0;
            self.right = 0;
        } else {
            self.normalize_markers();
        }
        Ok(channel)
    }

    /// Unlink a channel and release its buffer.
    pub fn delete_channel(&mut self, index: usize) -> Result<()> {
        let channel = self.take_channel(index)?;
        release(channel.into_buffer())
    }

    /// Copy of `[start, end)` from one channel.
    pub fn snapshot(&self, channel: usize, start: usize, end: usize) -> Result<Vec<Sample>> {
        let ch = self
            .channels
            .get(channel)
            .ok_or_else(|| EditError::invalid_range("snapshot", start, end, 0))?;
        if start > end || end > ch.len() {
            return Err(EditError::invalid_range("snapshot", start, end, ch.len()));
        }
        let mut out = try_vec(end - start, "snapshot range")?;
        out.extend_from_slice(&ch.samples()[start..end]);
        Ok(out)
    }

    /// Apply several splices (at most one per channel) as one all-or-nothing step.
    ///
    /// Every replacement buffer is allocated before any channel is touched, so an
    /// allocation failure leaves the chain exactly as it was.
    pub(crate) fn apply_splices(
        &mut self,
        alloc: &Allocator,
        edits: Vec<SpliceEdit<'_>>,
    ) -> Result<Vec<SpliceRecord>> {
        let mut prepared = Vec::with_capacity(edits.len());
        for edit in edits {
            debug_assert!(
                prepared
                    .iter()
                    .all(|(ch, _, _): &(usize, SampleBuffer, SpliceRecord)| *ch != edit.channel),
                "one splice per channel"
            );
            let ch = self.channels.get(edit.channel).ok_or_else(|| {
                EditError::invalid_range("splice", edit.start, edit.start, self.channels.len())
            })?;
            let end = edit.start + edit.old_len;
            if end > ch.len() {
                return Err(EditError::invalid_range("splice", edit.start, end, ch.len()));
            }
            let samples = ch.samples();
            let buffer = alloc.allocate_joined(&[
                &samples[..edit.start],
                edit.data,
                &samples[end..],
            ])?;
            let mut removed = try_vec(edit.old_len, "splice undo copy")?;
            removed.extend_from_slice(&samples[edit.start..end]);
            prepared.push((
                edit.channel,
                buffer,
                SpliceRecord {
                    channel: edit.channel,
                    start: edit.start,
                    removed,
                    inserted_len: edit.data.len(),
                },
            ));
        }
        let mut records = Vec::with_capacity(prepared.len());
        for (index, buffer, record) in prepared {
            let old = self.channels[index].replace_buffer(buffer);
            if let Err(e) = release(old) {
                debug!("old buffer release failed: {e}");
            }
            records.push(record);
        }
        Ok(records)
    }
}

/// Separately owned copy of the last copied or cut range.
#[derive(Debug, Default)]
pub struct Clipboard {
    content: Option<Signal>,
}

impl Clipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.content.as_ref().map(|s| s.is_empty()).unwrap_or(true)
    }

    pub fn signal(&self) -> Option<&Signal> {
        self.content.as_ref()
    }

    pub fn len(&self) -> usize {
        self.content.as_ref().map(Signal::len).unwrap_or(0)
    }

    pub fn set(&mut self, signal: Signal) {
        self.content = Some(signal);
    }

    pub fn clear(&mut self) {
        self.content = None;
    }
}
