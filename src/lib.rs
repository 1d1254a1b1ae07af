pub mod alloc;
pub mod config;
pub mod editor;
pub mod error;
pub mod history;
pub mod labels;
pub mod notify;
pub mod ops;
pub mod pcm;
pub mod playback;
pub mod script;
pub mod signal;
pub mod wave;

/// Fixed-point amplitude with 24 significant bits.
pub type Sample = i32;

pub const SAMPLE_MAX: Sample = 8_388_607;
pub const SAMPLE_MIN: Sample = -8_388_608;

/// Round and clamp a computed amplitude into the representable range.
#[inline]
pub fn clamp_sample(v: f64) -> Sample {
    v.round().clamp(SAMPLE_MIN as f64, SAMPLE_MAX as f64) as Sample
}

pub use alloc::{Allocator, SampleBuffer};
pub use config::EngineConfig;
pub use editor::Editor;
pub use error::{EditError, Result};
pub use history::{ChannelChange, History, HistoryState, HistoryStep, UndoAction, UndoEntry};
pub use labels::{Label, LabelList};
pub use notify::{Notification, Subscription};
pub use ops::{FadeCurve, MixTarget, RangeOp};
pub use script::ScriptCommand;
pub use signal::{Channel, Clipboard, Signal};
pub use wave::{ByteOrder, SaveOptions};
