use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use waveforge::{ByteOrder, Clipboard, Editor, EngineConfig, SaveOptions};

#[derive(Parser, Debug)]
#[command(name = "waveforge")]
#[command(about = "Multi-channel sample editor driven by command lines", long_about = None)]
struct Cli {
    /// Container to load before running commands.
    input: Option<PathBuf>,

    /// Command line to run, e.g. `fade_in` or `amplify(0.5)`. Repeatable.
    #[arg(short = 'e', long = "exec")]
    exec: Vec<String>,

    /// File with one command per line; blank lines and `#` comments are skipped.
    #[arg(short, long)]
    script: Option<PathBuf>,

    /// Where to save the result.
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(long, default_value = "16")]
    bits: u16,

    /// Write a big-endian (RIFX) container.
    #[arg(long)]
    big_endian: bool,

    /// Save only the marker range.
    #[arg(long)]
    selection_only: bool,

    /// Leave label chunks out of the saved container.
    #[arg(long)]
    no_labels: bool,

    /// TOML engine configuration.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the container header of the input and exit.
    #[arg(long)]
    info: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    if cli.info {
        let input = cli.input.as_deref().context("--info needs an input file")?;
        let header = waveforge::wave::read_info(input)
            .with_context(|| format!("read {}", input.display()))?;
        println!(
            "{}: {} ch, {} Hz, {} bits, {:?} endian, {} frames",
            input.display(),
            header.channels,
            header.rate,
            header.bits,
            header.byte_order,
            header.frames()
        );
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("load config {}", path.display()))?,
        None => EngineConfig::from_env(),
    };
    let mut editor = Editor::new(config);
    let mut clipboard = Clipboard::new();

    if let Some(input) = &cli.input {
        editor
            .load(input)
            .with_context(|| format!("load {}", input.display()))?;
        let signal = editor.signal();
        info!(
            channels = signal.channel_count(),
            frames = signal.len(),
            rate = signal.rate(),
            "loaded {}",
            input.display()
        );
    }

    let mut lines: Vec<String> = Vec::new();
    if let Some(script) = &cli.script {
        let text = std::fs::read_to_string(script)
            .with_context(|| format!("read script {}", script.display()))?;
        lines.extend(text.lines().map(str::to_string));
    }
    lines.extend(cli.exec.iter().cloned());

    for (n, line) in lines.iter().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        editor
            .execute(trimmed, &mut clipboard)
            .with_context(|| format!("command {} `{trimmed}`", n + 1))?;
    }
    if editor.is_playing() {
        editor.wait().context("finish playback")?;
    }

    if let Some(output) = &cli.output {
        let opts = SaveOptions {
            bits: cli.bits,
            byte_order: if cli.big_endian {
                ByteOrder::Big
            } else {
                ByteOrder::Little
            },
            selection_only: cli.selection_only,
            write_labels: !cli.no_labels,
        };
        editor
            .save_signal(output, &opts)
            .with_context(|| format!("save {}", output.display()))?;
        info!("saved {}", output.display());
    }
    Ok(())
}
