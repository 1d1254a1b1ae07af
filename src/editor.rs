//! The editing session: one signal, its history and its transport.
//!
//! Every mutating call goes through [`Editor::ensure_idle`], which refuses with
//! `Busy` while a playback or recording worker is attached.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::alloc::Allocator;
use crate::config::EngineConfig;
use crate::error::{EditError, Result};
use crate::history::{ChannelChange, History, HistoryStep, UndoAction};
use crate::labels::Label;
use crate::notify::{Notification, Notifier, Subscription};
use crate::ops::{self, RangeOp};
use crate::playback::{SessionReport, Transport};
use crate::signal::{Channel, Clipboard, Signal};
use crate::wave::{self, SaveOptions};

const DEFAULT_RATE: u32 = 44_100;

pub struct Editor {
    config: EngineConfig,
    alloc: Allocator,
    signal: Signal,
    history: History,
    transport: Transport,
    notifier: Notifier,
    path: Option<PathBuf>,
}

impl Editor {
    pub fn new(config: EngineConfig) -> Self {
        let alloc = Allocator::new(&config.alloc);
        let history = History::new(&config.history);
        let transport = Transport::new(config.playback.clone(), config.alloc.temp_dir.clone());
        Self {
            config,
            alloc,
            signal: Signal::new(DEFAULT_RATE),
            history,
            transport,
            notifier: Notifier::new(),
            path: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn allocator(&self) -> &Allocator {
        &self.alloc
    }

    pub fn signal(&self) -> &Signal {
        &self.signal
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn channels(&self) -> &[Channel] {
        self.signal.channels()
    }

    pub fn subscribe(&mut self) -> Subscription {
        self.notifier.subscribe()
    }

    /// Detach a finished worker, then refuse if one is still attached.
    ///
    /// A failure of the finished session is reported through the notifier
    /// and does not stop `op`.
    fn ensure_idle(&mut self, op: &str) -> Result<()> {
        self.reap_session(op);
        if self.transport.is_attached() {
            return Err(EditError::Busy { op: op.to_string() });
        }
        Ok(())
    }

    fn reap_session(&mut self, op: &str) {
        if let Some(report) = self.transport.poll() {
            if let Err(e) = self.finish_session(report) {
                debug!(op, "earlier session ended with: {e}");
            }
        }
    }

    fn emit_markers(&mut self) {
        let (left, right) = self.signal.markers();
        self.notifier
            .emit(Notification::MarkersChanged { left, right });
    }

    /// Replace the signal; history starts over.
    pub fn set_signal(&mut self, signal: Signal) -> Result<()> {
        self.ensure_idle("set signal")?;
        self.signal = signal;
        self.signal.normalize_markers();
        self.history.clear();
        self.path = None;
        self.notifier.emit(Notification::SignalChanged);
        self.notifier.emit(Notification::LabelsChanged);
        self.emit_markers();
        Ok(())
    }

    pub fn load(&mut self, path: &Path) -> Result<()> {
        self.ensure_idle("load")?;
        let signal = wave::load(path, &self.alloc)?;
        self.set_signal(signal)?;
        self.path = Some(path.to_path_buf());
        Ok(())
    }

    pub fn save_signal(&self, path: &Path, opts: &SaveOptions) -> Result<()> {
        wave::save(&self.signal, path, opts)
    }

    /// Run a range operation against the current markers. Returns whether the
    /// signal changed.
    pub fn do_range_op(&mut self, op: &RangeOp, clipboard: &mut Clipboard) -> Result<bool> {
        if op.is_mutating() {
            self.ensure_idle(op.name())?;
        }
        let before = self.signal.markers();
        self.history.begin(op.name(), before)?;
        let outcome = match ops::apply(&mut self.signal, op, clipboard, &self.alloc) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.history.abort();
                warn!(op = op.name(), "range op failed: {e}");
                return Err(e);
            }
        };
        let changed = outcome.changed();
        self.history.commit(outcome.action);
        if let Some(index) = outcome.inserted_channel {
            self.notifier.emit(Notification::ChannelInserted(index));
        }
        if changed {
            self.notifier.emit(Notification::SignalChanged);
        }
        if outcome.labels_changed {
            self.notifier.emit(Notification::LabelsChanged);
        }
        if outcome.markers != before {
            self.emit_markers();
        }
        Ok(changed)
    }

    pub fn set_markers(&mut self, left: usize, right: usize) -> (usize, usize) {
        let before = self.signal.markers();
        let after = self.signal.set_markers(left, right);
        if after != before {
            self.emit_markers();
        }
        after
    }

    /// Append a silent channel (undoable).
    pub fn append_channel(&mut self) -> Result<usize> {
        self.ensure_idle("append channel")?;
        self.history
            .begin("append channel", self.signal.markers())?;
        match self.signal.append_channel(&self.alloc) {
            Ok(index) => {
                self.history
                    .commit(Some(UndoAction::ChannelInserted { index }));
                self.notifier.emit(Notification::ChannelInserted(index));
                Ok(index)
            }
            Err(e) => {
                self.history.abort();
                Err(e)
            }
        }
    }

    /// Unlink a channel (undoable). Deleting the last channel leaves an empty chain.
    pub fn delete_channel(&mut self, index: usize) -> Result<()> {
        self.ensure_idle("delete channel")?;
        self.history
            .begin("delete channel", self.signal.markers())?;
        // removing a channel is the reversal of having inserted it
        match (UndoAction::ChannelInserted { index }).apply(&mut self.signal, &self.alloc) {
            Ok(action) => {
                self.history.commit(Some(action));
                self.notifier.emit(Notification::ChannelDeleted(index));
                self.emit_markers();
                Ok(())
            }
            Err(e) => {
                self.history.abort();
                Err(e)
            }
        }
    }

    pub fn toggle_selection(&mut self, index: usize) -> Option<bool> {
        self.signal.toggle_selection(index)
    }

    fn label_edit(
        &mut self,
        name: &str,
        edit: impl FnOnce(&mut Signal) -> Result<UndoAction>,
    ) -> Result<()> {
        self.ensure_idle(name)?;
        self.history.begin(name, self.signal.markers())?;
        match edit(&mut self.signal) {
            Ok(action) => {
                self.history.commit(Some(action));
                self.notifier.emit(Notification::LabelsChanged);
                Ok(())
            }
            Err(e) => {
                self.history.abort();
                Err(e)
            }
        }
    }

    /// Returns the index the new label landed at.
    pub fn add_label(&mut self, position: usize, name: &str) -> Result<usize> {
        let len = self.signal.len();
        if position > len {
            return Err(EditError::invalid_range("add label", position, position, len));
        }
        let mut index = 0;
        self.label_edit("add label", |signal| {
            index = signal.labels_mut().insert(Label::new(position, name));
            Ok(UndoAction::LabelAdded { index })
        })?;
        Ok(index)
    }

    pub fn delete_label(&mut self, index: usize) -> Result<Label> {
        let mut removed = None;
        self.label_edit("delete label", |signal| {
            let count = signal.labels().len();
            let label = signal
                .labels_mut()
                .remove(index)
                .ok_or_else(|| EditError::invalid_range("delete label", index, index, count))?;
            removed = Some(label.clone());
            Ok(UndoAction::LabelRemoved { index, label })
        })?;
        removed.ok_or_else(|| EditError::invalid_range("delete label", index, index, 0))
    }

    fn replace_label(&mut self, op: &str, index: usize, label: Label) -> Result<usize> {
        let mut landed = index;
        self.label_edit(op, |signal| {
            let count = signal.labels().len();
            let (moved_to, old) = signal
                .labels_mut()
                .replace(index, label)
                .ok_or_else(|| EditError::invalid_range(op, index, index, count))?;
            landed = moved_to;
            Ok(UndoAction::LabelReplaced {
                index: moved_to,
                label: old,
            })
        })?;
        Ok(landed)
    }

    /// Move a label; returns its new index in the sorted list.
    pub fn move_label(&mut self, index: usize, position: usize) -> Result<usize> {
        let len = self.signal.len();
        if position > len {
            return Err(EditError::invalid_range("move label", position, position, len));
        }
        let name = self
            .label_at_index(index)
            .map(|l| l.name.clone())
            .ok_or_else(|| {
                EditError::invalid_range("move label", index, index, self.signal.labels().len())
            })?;
        self.replace_label("move label", index, Label::new(position, name))
    }

    pub fn rename_label(&mut self, index: usize, name: &str) -> Result<()> {
        let position = self
            .label_at_index(index)
            .map(|l| l.position)
            .ok_or_else(|| {
                EditError::invalid_range("rename label", index, index, self.signal.labels().len())
            })?;
        self.replace_label("rename label", index, Label::new(position, name))?;
        Ok(())
    }

    pub fn find_label(&self, name: &str) -> Option<usize> {
        self.signal.labels().find(name)
    }

    /// Index of the first label at or after `position`.
    pub fn label_index(&self, position: usize) -> usize {
        self.signal.labels().index_at_or_after(position)
    }

    pub fn nearest_label(&self, position: usize) -> Option<usize> {
        self.signal.labels().nearest(position)
    }

    pub fn label_at_index(&self, index: usize) -> Option<&Label> {
        self.signal.labels().get(index)
    }

    pub fn undo(&mut self) -> Result<Option<String>> {
        self.ensure_idle("undo")?;
        let done = self.history.undo(&mut self.signal, &self.alloc)?;
        Ok(done.map(|step| self.after_history_step(step)))
    }

    pub fn redo(&mut self) -> Result<Option<String>> {
        self.ensure_idle("redo")?;
        let done = self.history.redo(&mut self.signal, &self.alloc)?;
        Ok(done.map(|step| self.after_history_step(step)))
    }

    fn after_history_step(&mut self, step: HistoryStep) -> String {
        for change in step.channels {
            self.notifier.emit(match change {
                ChannelChange::Inserted(index) => Notification::ChannelInserted(index),
                ChannelChange::Removed(index) => Notification::ChannelDeleted(index),
            });
        }
        self.notifier.emit(Notification::SignalChanged);
        self.notifier.emit(Notification::LabelsChanged);
        self.emit_markers();
        step.name
    }

    pub fn play(&mut self) -> Result<()> {
        self.start_playback(false)
    }

    pub fn loop_play(&mut self) -> Result<()> {
        self.start_playback(true)
    }

    fn start_playback(&mut self, looping: bool) -> Result<()> {
        self.reap_session(if looping { "loop" } else { "play" });
        self.transport.play(&self.signal, looping)?;
        info!(looping, "playback requested");
        self.notifier
            .emit(Notification::PlaybackStarted { recording: false });
        Ok(())
    }

    /// Advisory stop; the session detaches on the next `poll` or `wait`.
    pub fn stop(&mut self) -> bool {
        self.transport.stop()
    }

    pub fn pause(&mut self) -> bool {
        let done = self.transport.set_paused(true);
        if done {
            self.notifier.emit(Notification::PlaybackPaused);
        }
        done
    }

    pub fn resume(&mut self) -> bool {
        let done = self.transport.set_paused(false);
        if done {
            self.notifier.emit(Notification::PlaybackResumed);
        }
        done
    }

    pub fn is_paused(&self) -> bool {
        self.transport.is_paused()
    }

    pub fn seek_to(&mut self, frame: u64) -> Result<()> {
        if self.transport.seek(frame) {
            Ok(())
        } else {
            Err(EditError::invalid_args("seek", "no playback session is attached"))
        }
    }

    /// Frame the worker is streaming, `None` when nothing plays.
    pub fn current_pos(&self) -> Option<u64> {
        self.transport.position()
    }

    pub fn start_pos(&self) -> Option<u64> {
        self.transport.start_pos()
    }

    pub fn end_pos(&self) -> Option<u64> {
        self.transport.end_pos()
    }

    pub fn is_playing(&self) -> bool {
        self.transport.is_attached()
    }

    /// Check on the worker. Returns the current position while attached and
    /// handles the session end once the worker has exited.
    pub fn poll(&mut self) -> Result<Option<u64>> {
        if let Some(report) = self.transport.poll() {
            self.finish_session(report)?;
            return Ok(None);
        }
        let pos = self.transport.position();
        if let Some(p) = pos {
            self.notifier.emit(Notification::PlaybackPosition(p));
        }
        Ok(pos)
    }

    /// Block until the attached worker exits.
    pub fn wait(&mut self) -> Result<()> {
        match self.transport.wait() {
            Some(report) => self.finish_session(report),
            None => Ok(()),
        }
    }

    /// Capture from the input device; frames are appended when the session ends.
    pub fn record(&mut self, channels: usize, max_frames: Option<u64>) -> Result<()> {
        self.ensure_idle("record")?;
        let channels = match self.signal.channel_count() {
            0 => channels,
            n => n,
        };
        self.transport
            .record(channels, self.signal.rate(), max_frames)?;
        self.notifier
            .emit(Notification::PlaybackStarted { recording: true });
        Ok(())
    }

    pub fn finish_recording(&mut self) -> Result<()> {
        self.transport.stop();
        self.wait()
    }

    /// Emits `PlaybackFailed` whenever the session's outcome is an error.
    fn finish_session(&mut self, report: SessionReport) -> Result<()> {
        self.notifier.emit(Notification::PlaybackStopped {
            natural: report.natural,
        });
        let result = self.absorb_session(report);
        if let Err(e) = &result {
            warn!("session failed: {e}");
            self.notifier.emit(Notification::PlaybackFailed {
                message: e.to_string(),
            });
        }
        result
    }

    fn absorb_session(&mut self, report: SessionReport) -> Result<()> {
        if let Some(e) = report.failure {
            return Err(e);
        }
        let Some(captured) = report.capture else {
            return Ok(());
        };
        debug!(frames = report.frames, "appending recording");
        let had_channels = self.signal.channel_count();
        self.history.begin("record", self.signal.markers())?;
        match ops::append_frames(&mut self.signal, &self.alloc, report.rate, &captured) {
            Ok(actions) => {
                let changed = !actions.is_empty();
                self.history.commit(UndoAction::group(actions));
                for index in had_channels..self.signal.channel_count() {
                    self.notifier.emit(Notification::ChannelInserted(index));
                }
                if changed {
                    self.notifier.emit(Notification::SignalChanged);
                }
                Ok(())
            }
            Err(e) => {
                self.history.abort();
                Err(e)
            }
        }
    }
}
