//! Reversible command log.
//!
//! Every destructive edit commits an [`UndoEntry`] holding the minimum state
//! needed to reverse it. Applying an entry performs the reversal and returns a
//! freshly built entry for the inverse, so redo is "undo of the undo".

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use crate::alloc::{release, Allocator};
use crate::config::HistoryConfig;
use crate::error::{try_vec, EditError, Result};
use crate::labels::{Label, LabelList};
use crate::signal::{Channel, Signal, SpliceEdit, SpliceRecord};
use crate::Sample;

const SAMPLE_BYTES: usize = std::mem::size_of::<Sample>();
const ENTRY_OVERHEAD: usize = 64;

#[derive(Clone, Debug, PartialEq)]
pub enum UndoAction {
    /// `inserted_len` samples at `start` replaced `removed`.
    Splice(SpliceRecord),
    ChannelInserted {
        index: usize,
    },
    ChannelRemoved {
        index: usize,
        samples: Vec<Sample>,
        selected: bool,
    },
    /// Previous sample rate.
    Rate(u32),
    /// Previous full label list, for edits that moved many labels at once.
    Labels(Vec<Label>),
    LabelAdded {
        index: usize,
    },
    LabelRemoved {
        index: usize,
        label: Label,
    },
    /// The label now at `index` replaced `label`.
    LabelReplaced {
        index: usize,
        label: Label,
    },
    /// Applied in recorded order; reversed back to front.
    Compound(Vec<UndoAction>),
}

/// A channel an applied entry inserted or removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelChange {
    Inserted(usize),
    Removed(usize),
}

/// What one undo or redo did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryStep {
    pub name: String,
    /// In the order they happened.
    pub channels: Vec<ChannelChange>,
}

impl UndoAction {
    /// Channel changes made by the apply that returned `self` as its inverse.
    pub fn applied_channel_changes(&self, out: &mut Vec<ChannelChange>) {
        match self {
            UndoAction::ChannelInserted { index } => out.push(ChannelChange::Inserted(*index)),
            UndoAction::ChannelRemoved { index, .. } => out.push(ChannelChange::Removed(*index)),
            UndoAction::Compound(items) => {
                for item in items {
                    item.applied_channel_changes(out);
                }
            }
            _ => {}
        }
    }

    /// Group actions, collapsing the trivial cases.
    pub fn group(mut actions: Vec<UndoAction>) -> Option<UndoAction> {
        match actions.len() {
            0 => None,
            1 => actions.pop(),
            _ => Some(UndoAction::Compound(actions)),
        }
    }

    /// Bytes held to undo this action.
    pub fn undo_size(&self) -> usize {
        match self {
            UndoAction::Splice(rec) => ENTRY_OVERHEAD + rec.removed.len() * SAMPLE_BYTES,
            UndoAction::ChannelRemoved { samples, .. } => {
                ENTRY_OVERHEAD + samples.len() * SAMPLE_BYTES
            }
            UndoAction::Labels(labels) => {
                ENTRY_OVERHEAD + labels.iter().map(Label::byte_cost).sum::<usize>()
            }
            UndoAction::LabelRemoved { label, .. } | UndoAction::LabelReplaced { label, .. } => {
                ENTRY_OVERHEAD + label.byte_cost()
            }
            UndoAction::Compound(items) => items.iter().map(UndoAction::undo_size).sum(),
            UndoAction::ChannelInserted { .. }
            | UndoAction::Rate(_)
            | UndoAction::LabelAdded { .. } => ENTRY_OVERHEAD,
        }
    }

    /// Bytes the inverse entry will hold once this action is undone.
    pub fn redo_size(&self, signal: &Signal) -> usize {
        match self {
            UndoAction::Splice(rec) => ENTRY_OVERHEAD + rec.inserted_len * SAMPLE_BYTES,
            UndoAction::ChannelInserted { index } => {
                let len = signal.channel(*index).map(Channel::len).unwrap_or(0);
                ENTRY_OVERHEAD + len * SAMPLE_BYTES
            }
            UndoAction::Labels(_) => ENTRY_OVERHEAD + signal.labels().byte_cost(),
            UndoAction::LabelAdded { index } | UndoAction::LabelReplaced { index, .. } => {
                let label_cost = signal.labels().get(*index).map(Label::byte_cost);
                ENTRY_OVERHEAD + label_cost.unwrap_or(0)
            }
            UndoAction::Compound(items) => items.iter().map(|a| a.redo_size(signal)).sum(),
            UndoAction::ChannelRemoved { .. }
            | UndoAction::Rate(_)
            | UndoAction::LabelRemoved { .. } => ENTRY_OVERHEAD,
        }
    }

    /// Perform the reversal and return the action that reverses it back.
    ///
    /// Either the whole action applies or the signal is left untouched.
    pub fn apply(&self, signal: &mut Signal, alloc: &Allocator) -> Result<UndoAction> {
        match self {
            UndoAction::Splice(rec) => {
                let mut records = signal.apply_splices(
                    alloc,
                    vec![SpliceEdit {
                        channel: rec.channel,
                        start: rec.start,
                        old_len: rec.inserted_len,
                        data: &rec.removed,
                    }],
                )?;
                let inverse = records
                    .pop()
                    .ok_or_else(|| EditError::invalid_range("undo splice", rec.start, rec.start, 0))?;
                Ok(UndoAction::Splice(inverse))
            }
            UndoAction::ChannelInserted { index } => {
                let index = *index;
                let len = signal
                    .channel(index)
                    .map(Channel::len)
                    .ok_or_else(|| {
                        EditError::invalid_range(
                            "undo channel insert",
                            index,
                            index,
                            signal.channel_count(),
                        )
                    })?;
                let mut samples = try_vec(len, "channel undo copy")?;
                let channel = signal.take_channel(index)?;
                samples.extend_from_slice(channel.samples());
                let selected = channel.is_selected();
                if let Err(e) = release(channel.into_buffer()) {
                    warn!("channel buffer release failed: {e}");
                }
                Ok(UndoAction::ChannelRemoved {
                    index,
                    samples,
                    selected,
                })
            }
            UndoAction::ChannelRemoved {
                index,
                samples,
                selected,
            } => {
                let index = *index;
                if index > signal.channel_count() {
                    return Err(EditError::invalid_range(
                        "undo channel delete",
                        index,
                        index,
                        signal.channel_count(),
                    ));
                }
                let mut channel = Channel::new(alloc.allocate_from(samples)?);
                channel.set_selected(*selected);
                signal.insert_channel(index, channel)?;
                Ok(UndoAction::ChannelInserted { index })
            }
            UndoAction::Rate(rate) => {
                let previous = signal.rate();
                signal.set_rate(*rate);
                Ok(UndoAction::Rate(previous))
            }
            UndoAction::Labels(labels) => {
                let previous = signal.replace_labels(LabelList::from_unsorted(labels.clone()));
                Ok(UndoAction::Labels(previous.into_vec()))
            }
            UndoAction::LabelAdded { index } => {
                let index = *index;
                let count = signal.labels().len();
                let label = signal
                    .labels_mut()
                    .remove(index)
                    .ok_or_else(|| EditError::invalid_range("undo label add", index, index, count))?;
                Ok(UndoAction::LabelRemoved { index, label })
            }
            UndoAction::LabelRemoved { index, label } => {
                let index = *index;
                let count = signal.labels().len();
                if !signal.labels_mut().insert_at(index, label.clone()) {
                    return Err(EditError::invalid_range("undo label delete", index, index, count));
                }
                Ok(UndoAction::LabelAdded { index })
            }
            UndoAction::LabelReplaced { index, label } => {
                let index = *index;
                let count = signal.labels().len();
                let (moved_to, old) = signal
                    .labels_mut()
                    .replace(index, label.clone())
                    .ok_or_else(|| EditError::invalid_range("undo label edit", index, index, count))?;
                Ok(UndoAction::LabelReplaced {
                    index: moved_to,
                    label: old,
                })
            }
            UndoAction::Compound(items) => apply_compound(items, signal, alloc),
        }
    }
}

fn apply_compound(
    items: &[UndoAction],
    signal: &mut Signal,
    alloc: &Allocator,
) -> Result<UndoAction> {
    let mut inverses = Vec::with_capacity(items.len());
    for item in items.iter().rev() {
        match item.apply(signal, alloc) {
            Ok(inverse) => inverses.push(inverse),
            Err(e) => {
                // put back what this group already reversed
                for done in inverses.iter().rev() {
                    if let Err(back) = done.apply(signal, alloc) {
                        warn!("compound rollback failed: {back}");
                    }
                }
                return Err(e);
            }
        }
    }
    Ok(UndoAction::Compound(inverses))
}

#[derive(Clone, Debug, PartialEq)]
pub struct UndoEntry {
    pub name: String,
    /// Marker pair to restore when this entry is applied.
    pub markers: (usize, usize),
    pub action: UndoAction,
}

impl UndoEntry {
    pub fn undo_size(&self) -> usize {
        self.name.len() + self.action.undo_size()
    }

    pub fn redo_size(&self, signal: &Signal) -> usize {
        self.name.len() + self.action.redo_size(signal)
    }

    pub fn apply(&self, signal: &mut Signal, alloc: &Allocator) -> Result<UndoEntry> {
        let current = signal.markers();
        let inverse = self.action.apply(signal, alloc)?;
        signal.set_markers(self.markers.0, self.markers.1);
        Ok(UndoEntry {
            name: self.name.clone(),
            markers: current,
            action: inverse,
        })
    }
}

impl HistoryStep {
    fn new(name: String, inverse: &UndoAction) -> Self {
        let mut channels = Vec::new();
        inverse.applied_channel_changes(&mut channels);
        Self { name, channels }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistoryState {
    Idle,
    RecordingEntry,
    Undoing,
    Redoing,
}

#[derive(Debug)]
struct Pending {
    name: String,
    markers: (usize, usize),
}

#[derive(Debug)]
pub struct History {
    undo: VecDeque<UndoEntry>,
    redo: VecDeque<UndoEntry>,
    undo_bytes: usize,
    redo_bytes: usize,
    memory_limit: usize,
    max_entries: usize,
    keep_redo: bool,
    state: HistoryState,
    pending: Option<Pending>,
}

impl History {
    pub fn new(cfg: &HistoryConfig) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: VecDeque::new(),
            undo_bytes: 0,
            redo_bytes: 0,
            memory_limit: cfg.memory_limit_bytes,
            max_entries: cfg.max_entries.max(1),
            keep_redo: cfg.keep_redo,
            state: HistoryState::Idle,
            pending: None,
        }
    }

    pub fn state(&self) -> HistoryState {
        self.state
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    /// Bytes held by both stacks.
    pub fn memory_used(&self) -> usize {
        self.undo_bytes + self.redo_bytes
    }

    /// Names of the undoable entries, oldest first.
    pub fn undo_names(&self) -> impl Iterator<Item = &str> {
        self.undo.iter().map(|e| e.name.as_str())
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
        self.undo_bytes = 0;
        self.redo_bytes = 0;
        self.state = HistoryState::Idle;
        self.pending = None;
    }

    /// Start recording an entry for an operation about to run.
    pub fn begin(&mut self, name: &str, markers: (usize, usize)) -> Result<()> {
        if self.state != HistoryState::Idle {
            return Err(EditError::Busy {
                op: format!("{name} (history is {:?})", self.state),
            });
        }
        self.state = HistoryState::RecordingEntry;
        self.pending = Some(Pending {
            name: name.to_string(),
            markers,
        });
        Ok(())
    }

    /// Finish the pending entry. `None` means the operation changed nothing.
    pub fn commit(&mut self, action: Option<UndoAction>) {
        let pending = self.pending.take();
        self.state = HistoryState::Idle;
        let (Some(pending), Some(action)) = (pending, action) else {
            return;
        };
        self.push(UndoEntry {
            name: pending.name,
            markers: pending.markers,
            action,
        });
    }

    pub fn abort(&mut self) {
        self.pending = None;
        self.state = HistoryState::Idle;
    }

    /// Push a finished entry; a new branch of history drops the redo stack.
    pub fn push(&mut self, entry: UndoEntry) {
        debug!(name = %entry.name, bytes = entry.undo_size(), "history commit");
        self.redo.clear();
        self.redo_bytes = 0;
        self.undo_bytes += entry.undo_size();
        self.undo.push_back(entry);
        self.evict();
    }

    pub fn undo(&mut self, signal: &mut Signal, alloc: &Allocator) -> Result<Option<HistoryStep>> {
        let Some(entry) = self.undo.pop_back() else {
            return Ok(None);
        };
        self.undo_bytes -= entry.undo_size();
        self.state = HistoryState::Undoing;
        let name = entry.name.clone();
        let result = entry.apply(signal, alloc);
        self.state = HistoryState::Idle;
        match result {
            Ok(inverse) => {
                info!(name = %name, "undo");
                let step = HistoryStep::new(name, &inverse.action);
                if self.keep_redo {
                    self.redo_bytes += inverse.undo_size();
                    self.redo.push_back(inverse);
                }
                Ok(Some(step))
            }
            Err(e) => {
                self.undo_bytes += entry.undo_size();
                self.undo.push_back(entry);
                Err(e)
            }
        }
    }

    pub fn redo(&mut self, signal: &mut Signal, alloc: &Allocator) -> Result<Option<HistoryStep>> {
        let Some(entry) = self.redo.pop_back() else {
            return Ok(None);
        };
        self.redo_bytes -= entry.undo_size();
        self.state = HistoryState::Redoing;
        let name = entry.name.clone();
        let result = entry.apply(signal, alloc);
        self.state = HistoryState::Idle;
        match result {
            Ok(inverse) => {
                info!(name = %name, "redo");
                let step = HistoryStep::new(name, &inverse.action);
                self.undo_bytes += inverse.undo_size();
                self.undo.push_back(inverse);
                self.evict();
                Ok(Some(step))
            }
            Err(e) => {
                self.redo_bytes += entry.undo_size();
                self.redo.push_back(entry);
                Err(e)
            }
        }
    }

    /// Drop the oldest undo entries until both ceilings hold; the newest stays.
    fn evict(&mut self) {
        while self.undo.len() > 1
            && (self.undo.len() > self.max_entries || self.memory_used() > self.memory_limit)
        {
            if let Some(old) = self.undo.pop_front() {
                self.undo_bytes -= old.undo_size();
                debug!(name = %old.name, "history evicted");
            }
        }
    }
}
