use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Which audio endpoint a worker opens.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeviceSpec {
    /// The host's default device through cpal.
    #[default]
    Default,
    /// Discards output / produces silence. `max_channels == 0` means no limit.
    Null { realtime: bool, max_channels: u16 },
    /// Playback renders into a WAV file; recording reads one.
    WavFile { path: PathBuf },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkerMode {
    /// Separate OS process running `waveforge_play_worker`.
    #[default]
    Process,
    /// Same loop on a thread of the editing process.
    Thread,
}

/// Requested (and, after negotiation, granted) stream parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceParams {
    pub bits: u16,
    pub channels: u16,
    pub rate: u32,
    pub fragment_frames: usize,
}

impl DeviceParams {
    pub fn fragment_duration(&self) -> std::time::Duration {
        let rate = self.rate.max(1) as u64;
        std::time::Duration::from_micros(self.fragment_frames as u64 * 1_000_000 / rate)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlayJob {
    pub control_path: PathBuf,
    pub image_path: PathBuf,
    pub start: u64,
    pub end: u64,
    pub looping: bool,
    pub device: DeviceSpec,
    pub params: DeviceParams,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordJob {
    pub control_path: PathBuf,
    /// Captured frames are written here in the sample image layout.
    pub capture_path: PathBuf,
    pub device: DeviceSpec,
    pub params: DeviceParams,
    pub max_frames: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum WorkerRequest {
    Ping,
    Play(PlayJob),
    Record(RecordJob),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerResponse {
    Pong,
    Finished { frames: u64 },
    NegotiationFailed { step: String, detail: String },
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_request_roundtrips_through_json() {
        let req = WorkerRequest::Play(PlayJob {
            control_path: PathBuf::from("/tmp/a.ctl"),
            image_path: PathBuf::from("/tmp/a.img"),
            start: 10,
            end: 20,
            looping: true,
            device: DeviceSpec::Null {
                realtime: false,
                max_channels: 2,
            },
            params: DeviceParams {
                bits: 16,
                channels: 2,
                rate: 44_100,
                fragment_frames: 512,
            },
        });
        let text = serde_json::to_string(&req).expect("encode");
        assert!(text.contains("\"kind\":\"null\""));
        let back: WorkerRequest = serde_json::from_str(&text).expect("decode");
        match back {
            WorkerRequest::Play(job) => {
                assert!(job.looping);
                assert_eq!(job.params.fragment_frames, 512);
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }
}
