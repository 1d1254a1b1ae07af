//! Playback worker: one JSON request on stdin, one JSON response on stdout.

use std::io::Write;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use waveforge::playback::worker::handle_request;
use waveforge::playback::WorkerRequest;

fn main() -> Result<()> {
    // stdout carries the response, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let req: WorkerRequest =
        serde_json::from_reader(std::io::stdin().lock()).context("decode worker request")?;
    let resp = handle_request(req);
    tracing::debug!(?resp, "worker done");

    let mut out = std::io::stdout().lock();
    serde_json::to_writer(&mut out, &resp).context("write worker response")?;
    out.flush().context("flush worker response")?;
    Ok(())
}
