//! Destructive range operations.
//!
//! Each operation reads the marker pair stored on the signal, mutates the
//! channel chain and returns the [`UndoAction`] that reverses it. Operations
//! snapshot or allocate everything they need before the first channel is
//! touched, so a failure leaves the signal as it was.

mod amplitude;
mod edit;
mod time;

use tracing::{debug, warn};

use crate::alloc::Allocator;
use crate::error::{EditError, Result};
use crate::history::UndoAction;
use crate::signal::{Clipboard, Signal, SpliceEdit};

pub use amplitude::{fade_weight, FadeDirection};
pub use edit::append_frames;
pub use time::resample_linear;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FadeCurve {
    Linear,
    Logarithmic,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MixTarget {
    Channel(usize),
    NewChannel,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RangeOp {
    Delete,
    Crop,
    Cut,
    Copy,
    Paste,
    MixPaste,
    Zero,
    Flip,
    Reverse,
    Center,
    FadeIn(FadeCurve),
    FadeOut(FadeCurve),
    /// Amplify so the peak reaches full scale.
    Maximize,
    Amplify(f32),
    Noise {
        amplitude: f32,
        seed: u64,
    },
    Delay {
        offset: usize,
        gain: f32,
        recursive: bool,
    },
    Resample(u32),
    ChannelMix {
        weights: Vec<f32>,
        target: MixTarget,
    },
}

impl RangeOp {
    pub fn name(&self) -> &'static str {
        match self {
            RangeOp::Delete => "delete",
            RangeOp::Crop => "crop",
            RangeOp::Cut => "cut",
            RangeOp::Copy => "copy",
            RangeOp::Paste => "paste",
            RangeOp::MixPaste => "mix paste",
            RangeOp::Zero => "zero",
            RangeOp::Flip => "flip",
            RangeOp::Reverse => "reverse",
            RangeOp::Center => "center",
            RangeOp::FadeIn(FadeCurve::Linear) => "fade in",
            RangeOp::FadeIn(FadeCurve::Logarithmic) => "log fade in",
            RangeOp::FadeOut(FadeCurve::Linear) => "fade out",
            RangeOp::FadeOut(FadeCurve::Logarithmic) => "log fade out",
            RangeOp::Maximize => "maximize",
            RangeOp::Amplify(_) => "amplify",
            RangeOp::Noise { .. } => "noise",
            RangeOp::Delay {
                recursive: false, ..
            } => "delay",
            RangeOp::Delay {
                recursive: true, ..
            } => "recursive delay",
            RangeOp::Resample(_) => "resample",
            RangeOp::ChannelMix { .. } => "channel mix",
        }
    }

    /// Operations that act on the whole signal when the range is empty.
    pub fn whole_on_empty(&self) -> bool {
        matches!(
            self,
            RangeOp::Zero
                | RangeOp::Flip
                | RangeOp::Reverse
                | RangeOp::Center
                | RangeOp::Maximize
                | RangeOp::Amplify(_)
                | RangeOp::Noise { .. }
                | RangeOp::Delay { .. }
        )
    }

    /// Whether the operation can change the signal (copy only fills the clipboard).
    pub fn is_mutating(&self) -> bool {
        !matches!(self, RangeOp::Copy)
    }
}

/// What an applied operation did.
#[derive(Debug, Default)]
pub struct OpOutcome {
    /// `None` when nothing changed.
    pub action: Option<UndoAction>,
    pub markers: (usize, usize),
    pub inserted_channel: Option<usize>,
    pub labels_changed: bool,
}

impl OpOutcome {
    pub fn changed(&self) -> bool {
        self.action.is_some()
    }
}

/// Run `op` against the signal's current marker range.
pub fn apply(
    signal: &mut Signal,
    op: &RangeOp,
    clipboard: &mut Clipboard,
    alloc: &Allocator,
) -> Result<OpOutcome> {
    signal.normalize_markers();
    let range = effective_range(signal, op.whole_on_empty());
    let mut outcome = OpOutcome::default();
    let actions = match op {
        RangeOp::Delete => match range {
            Some(r) => edit::delete(signal, alloc, r)?,
            None => Vec::new(),
        },
        RangeOp::Crop => match range {
            Some(r) => edit::crop(signal, alloc, r)?,
            None => Vec::new(),
        },
        RangeOp::Copy => {
            if let Some(r) = range {
                clipboard.set(edit::copy(signal, r)?);
            }
            Vec::new()
        }
        RangeOp::Cut => match range {
            Some(r) => {
                let clip = edit::copy(signal, r)?;
                let actions = edit::delete(signal, alloc, r)?;
                clipboard.set(clip);
                actions
            }
            None => Vec::new(),
        },
        RangeOp::Paste => edit::paste(signal, alloc, clipboard, &mut outcome)?,
        RangeOp::MixPaste => edit::mix_paste(signal, alloc, clipboard)?,
        RangeOp::Zero => in_range(range, |r| amplitude::zero(signal, r))?,
        RangeOp::Flip => in_range(range, |r| amplitude::flip(signal, r))?,
        RangeOp::Reverse => in_range(range, |r| amplitude::reverse(signal, r))?,
        RangeOp::Center => in_range(range, |r| amplitude::center(signal, r))?,
        RangeOp::FadeIn(curve) => in_range(range, |r| {
            amplitude::fade(signal, r, *curve, FadeDirection::In)
        })?,
        RangeOp::FadeOut(curve) => in_range(range, |r| {
            amplitude::fade(signal, r, *curve, FadeDirection::Out)
        })?,
        RangeOp::Maximize => in_range(range, |r| amplitude::maximize(signal, r))?,
        RangeOp::Amplify(factor) => in_range(range, |r| amplitude::amplify(signal, r, *factor))?,
        RangeOp::Noise { amplitude, seed } => {
            in_range(range, |r| amplitude::noise(signal, r, *amplitude, *seed))?
        }
        RangeOp::Delay {
            offset,
            gain,
            recursive,
        } => in_range(range, |r| time::delay(signal, r, *offset, *gain, *recursive))?,
        RangeOp::Resample(rate) => time::resample(signal, alloc, *rate)?,
        RangeOp::ChannelMix { weights, target } => {
            time::channel_mix(signal, alloc, weights, *target, &mut outcome)?
        }
    };
    outcome.labels_changed |= actions.iter().any(touches_labels);
    outcome.action = UndoAction::group(actions);
    outcome.markers = signal.normalize_markers();
    debug!(
        op = op.name(),
        changed = outcome.changed(),
        left = outcome.markers.0,
        right = outcome.markers.1,
        "range op"
    );
    Ok(outcome)
}

fn in_range(
    range: Option<(usize, usize)>,
    f: impl FnOnce((usize, usize)) -> Result<Vec<UndoAction>>,
) -> Result<Vec<UndoAction>> {
    match range {
        Some(r) => f(r),
        None => Ok(Vec::new()),
    }
}

fn touches_labels(action: &UndoAction) -> bool {
    matches!(action, UndoAction::Labels(_))
}

/// Non-empty range to act on, falling back to the whole signal when allowed.
fn effective_range(signal: &Signal, whole_on_empty: bool) -> Option<(usize, usize)> {
    let (left, right) = signal.markers();
    if left < right {
        return Some((left, right));
    }
    let len = signal.len();
    (whole_on_empty && len > 0).then_some((0, len))
}

/// Apply splice batches one after another, undoing earlier batches if a later
/// one fails.
pub(crate) fn splice_batches(
    signal: &mut Signal,
    alloc: &Allocator,
    batches: Vec<Vec<SpliceEdit<'_>>>,
) -> Result<Vec<UndoAction>> {
    let mut done = Vec::new();
    for batch in batches {
        if batch.is_empty() {
            continue;
        }
        match signal.apply_splices(alloc, batch) {
            Ok(records) => done.extend(records.into_iter().map(UndoAction::Splice)),
            Err(e) => {
                rollback(signal, alloc, &done);
                return Err(e);
            }
        }
    }
    Ok(done)
}

pub(crate) fn rollback(signal: &mut Signal, alloc: &Allocator, done: &[UndoAction]) {
    for action in done.iter().rev() {
        if let Err(e) = action.apply(signal, alloc) {
            warn!("rollback failed: {e}");
        }
    }
}

/// Snapshot the label list before an edit that may move labels.
pub(crate) fn labels_snapshot(signal: &Signal) -> UndoAction {
    UndoAction::Labels(signal.labels().as_slice().to_vec())
}

pub(crate) fn require(cond: bool, op: &str, reason: &str) -> Result<()> {
    if cond {
        Ok(())
    } else {
        Err(EditError::invalid_args(op, reason))
    }
}
