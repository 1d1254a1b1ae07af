//! Error taxonomy shared by the editing engine, the codec and the transport.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EditError>;

#[derive(Debug, Error)]
pub enum EditError {
    /// Sample buffer, temporary file or shared memory could not be obtained.
    #[error("out of resources during {context}: {detail}")]
    OutOfResources { context: String, detail: String },

    /// Bad magic tags, unsupported compression mode or a missing chunk.
    #[error("invalid container {}: {reason}", path.display())]
    InvalidContainer { path: PathBuf, reason: String },

    #[error("unsupported sample width: {bits} bits (expected 8, 16 or 24)")]
    UnsupportedFormat { bits: u16 },

    /// The audio device rejected one negotiation step.
    #[error("audio device rejected {step}: {detail}")]
    DeviceNegotiationFailed { step: String, detail: String },

    #[error("{op}: nothing to do in range [{left}, {right}) of length {len}")]
    InvalidRange {
        op: String,
        left: usize,
        right: usize,
        len: usize,
    },

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("invalid arguments for {command}: {reason}")]
    InvalidArguments { command: String, reason: String },

    /// A worker is attached to the signal; stop playback before editing.
    #[error("{op} refused: playback or recording is active")]
    Busy { op: String },

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl EditError {
    pub fn out_of_resources(context: impl Into<String>, detail: impl ToString) -> Self {
        Self::OutOfResources {
            context: context.into(),
            detail: detail.to_string(),
        }
    }

    pub fn invalid_range(op: impl Into<String>, left: usize, right: usize, len: usize) -> Self {
        Self::InvalidRange {
            op: op.into(),
            left,
            right,
            len,
        }
    }

    pub fn invalid_container(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidContainer {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn negotiation(step: impl Into<String>, detail: impl ToString) -> Self {
        Self::DeviceNegotiationFailed {
            step: step.into(),
            detail: detail.to_string(),
        }
    }

    pub fn invalid_args(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            command: command.into(),
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Reserve room for `len` samples, mapping allocator failure to `OutOfResources`.
pub(crate) fn try_vec<T>(len: usize, context: &str) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|e| EditError::out_of_resources(context, e))?;
    Ok(v)
}
