//! Playback and recording.
//!
//! The editor never shares its own buffers with a worker: `play` writes the
//! play range into a sample image, and the worker (a separate process, or a thread when the
//! worker executable is missing) streams from that image while reporting its
//! position through a mapped control block.

pub mod client;
pub mod control;
pub mod device;
pub mod image;
pub mod protocol;
pub mod worker;

pub use client::{SessionReport, Transport, WORKER_PATH_ENV};
pub use control::{SharedControl, WorkerState, NOT_PLAYING};
pub use device::{InputDevice, OutputDevice};
pub use image::{CaptureWriter, SampleImage};
pub use protocol::{DeviceParams, DeviceSpec, PlayJob, RecordJob, WorkerMode, WorkerRequest, WorkerResponse};
