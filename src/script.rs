//! `operation(arg, ...)` command lines driving the editor.

use std::sync::OnceLock;

use regex::Regex;

use crate::config::EngineConfig;
use crate::editor::Editor;
use crate::error::{EditError, Result};
use crate::ops::{FadeCurve, MixTarget, RangeOp};
use crate::signal::Clipboard;

#[derive(Clone, Debug, PartialEq)]
pub enum ScriptCommand {
    Range(RangeOp),
    SetMarkers(usize, usize),
    SelectAll,
    AppendChannel,
    DeleteChannel(usize),
    ToggleChannel(usize),
    AddLabel { position: usize, name: String },
    DeleteLabel(usize),
    MoveLabel { index: usize, position: usize },
    RenameLabel { index: usize, name: String },
    Undo,
    Redo,
    Play,
    Loop,
    Stop,
    Pause,
    Resume,
    Seek(u64),
    Wait,
    Record { channels: usize, max_frames: Option<u64> },
    FinishRecording,
}

fn command_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*(?:\((.*)\))?\s*$").ok())
        .as_ref()
}

/// Split on commas outside double quotes. Quoted items lose their quotes,
/// and `\"` and `\\` inside them stand for `"` and `\`.
fn split_args(raw: &str) -> std::result::Result<Vec<String>, &'static str> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            '\\' if quoted => {
                current.push(c);
                current.push(chars.next().ok_or("dangling escape")?);
            }
            ',' if !quoted => segments.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    if quoted {
        return Err("unterminated quote");
    }
    segments.push(current);
    segments.iter().map(|seg| unquote(seg.trim())).collect()
}

fn unquote(item: &str) -> std::result::Result<String, &'static str> {
    let Some(inner) = item.strip_prefix('"').and_then(|r| r.strip_suffix('"')) else {
        if item.contains('"') {
            return Err("quotes must enclose the whole argument");
        }
        return Ok(item.to_string());
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.extend(chars.next()),
            '"' => return Err("quotes must enclose the whole argument"),
            _ => out.push(c),
        }
    }
    Ok(out)
}

struct Args<'a> {
    command: &'a str,
    items: Vec<String>,
    /// Why the argument list did not split; reported once a known command
    /// looks at its arguments.
    malformed: Option<&'static str>,
}

impl<'a> Args<'a> {
    fn new(command: &'a str, raw: Option<&'a str>) -> Self {
        let (items, malformed) = match raw.map(str::trim) {
            None | Some("") => (Vec::new(), None),
            Some(raw) => match split_args(raw) {
                Ok(items) => (items, None),
                Err(reason) => (Vec::new(), Some(reason)),
            },
        };
        Self {
            command,
            items,
            malformed,
        }
    }

    fn well_formed(&self) -> Result<()> {
        match self.malformed {
            Some(reason) => Err(EditError::invalid_args(self.command, reason)),
            None => Ok(()),
        }
    }

    fn expect(&self, min: usize, max: usize) -> Result<()> {
        self.well_formed()?;
        let n = self.items.len();
        if n < min || n > max {
            let wanted = if min == max {
                format!("{min}")
            } else {
                format!("{min} to {max}")
            };
            return Err(EditError::invalid_args(
                self.command,
                format!("expected {wanted} arguments, got {n}"),
            ));
        }
        Ok(())
    }

    fn parse<T: std::str::FromStr>(&self, index: usize, what: &str) -> Result<T> {
        self.well_formed()?;
        let raw = self.items.get(index).map_or("", String::as_str);
        raw.parse().map_err(|_| {
            EditError::invalid_args(self.command, format!("{what} must be a number, got {raw:?}"))
        })
    }

    fn opt<T: std::str::FromStr>(&self, index: usize, what: &str) -> Result<Option<T>> {
        if index < self.items.len() {
            self.parse(index, what).map(Some)
        } else {
            Ok(None)
        }
    }

    fn text(&self, index: usize) -> String {
        self.items.get(index).cloned().unwrap_or_default()
    }

    fn none(&self) -> Result<()> {
        self.expect(0, 0)
    }
}

pub fn parse(line: &str, cfg: &EngineConfig) -> Result<ScriptCommand> {
    let caps = command_regex()
        .and_then(|re| re.captures(line))
        .ok_or_else(|| EditError::UnknownCommand(line.trim().to_string()))?;
    let name = caps.get(1).map_or("", |m| m.as_str());
    let args = Args::new(name, caps.get(2).map(|m| m.as_str()));
    let range = |op: RangeOp| -> Result<ScriptCommand> {
        args.none()?;
        Ok(ScriptCommand::Range(op))
    };
    match name.to_ascii_lowercase().as_str() {
        "delete" => range(RangeOp::Delete),
        "crop" => range(RangeOp::Crop),
        "cut" => range(RangeOp::Cut),
        "copy" => range(RangeOp::Copy),
        "paste" => range(RangeOp::Paste),
        "mix_paste" | "mixpaste" => range(RangeOp::MixPaste),
        "zero" => range(RangeOp::Zero),
        "flip" => range(RangeOp::Flip),
        "reverse" => range(RangeOp::Reverse),
        "center" => range(RangeOp::Center),
        "fade_in" => range(RangeOp::FadeIn(FadeCurve::Linear)),
        "fade_out" => range(RangeOp::FadeOut(FadeCurve::Linear)),
        "log_fade_in" => range(RangeOp::FadeIn(FadeCurve::Logarithmic)),
        "log_fade_out" => range(RangeOp::FadeOut(FadeCurve::Logarithmic)),
        "maximize" => range(RangeOp::Maximize),
        "amplify" => {
            args.expect(1, 1)?;
            Ok(ScriptCommand::Range(RangeOp::Amplify(args.parse(0, "factor")?)))
        }
        "noise" => {
            args.expect(0, 2)?;
            Ok(ScriptCommand::Range(RangeOp::Noise {
                amplitude: args.opt(0, "amplitude")?.unwrap_or(cfg.noise.amplitude),
                seed: args.opt(1, "seed")?.unwrap_or(cfg.noise.seed),
            }))
        }
        "delay" | "recursive_delay" => {
            args.expect(2, 2)?;
            Ok(ScriptCommand::Range(RangeOp::Delay {
                offset: args.parse(0, "offset")?,
                gain: args.parse(1, "gain")?,
                recursive: name.eq_ignore_ascii_case("recursive_delay"),
            }))
        }
        "resample" => {
            args.expect(1, 1)?;
            Ok(ScriptCommand::Range(RangeOp::Resample(args.parse(0, "rate")?)))
        }
        "mix" | "channel_mix" => {
            args.well_formed()?;
            if args.items.len() < 2 {
                return Err(EditError::invalid_args(
                    name,
                    "expected a target and at least one weight",
                ));
            }
            let target = match args.items[0].as_str() {
                "new" => MixTarget::NewChannel,
                _ => MixTarget::Channel(args.parse(0, "target channel")?),
            };
            let weights = (1..args.items.len())
                .map(|i| args.parse(i, "weight"))
                .collect::<Result<Vec<f32>>>()?;
            Ok(ScriptCommand::Range(RangeOp::ChannelMix { weights, target }))
        }
        "select" | "set_markers" => {
            args.expect(2, 2)?;
            Ok(ScriptCommand::SetMarkers(
                args.parse(0, "left")?,
                args.parse(1, "right")?,
            ))
        }
        "select_all" => args.none().map(|_| ScriptCommand::SelectAll),
        "append_channel" => args.none().map(|_| ScriptCommand::AppendChannel),
        "delete_channel" => {
            args.expect(1, 1)?;
            Ok(ScriptCommand::DeleteChannel(args.parse(0, "channel")?))
        }
        "toggle_channel" => {
            args.expect(1, 1)?;
            Ok(ScriptCommand::ToggleChannel(args.parse(0, "channel")?))
        }
        "add_label" => {
            args.expect(2, 2)?;
            Ok(ScriptCommand::AddLabel {
                position: args.parse(0, "position")?,
                name: args.text(1),
            })
        }
        "delete_label" => {
            args.expect(1, 1)?;
            Ok(ScriptCommand::DeleteLabel(args.parse(0, "index")?))
        }
        "move_label" => {
            args.expect(2, 2)?;
            Ok(ScriptCommand::MoveLabel {
                index: args.parse(0, "index")?,
                position: args.parse(1, "position")?,
            })
        }
        "rename_label" => {
            args.expect(2, 2)?;
            Ok(ScriptCommand::RenameLabel {
                index: args.parse(0, "index")?,
                name: args.text(1),
            })
        }
        "undo" => args.none().map(|_| ScriptCommand::Undo),
        "redo" => args.none().map(|_| ScriptCommand::Redo),
        "play" => args.none().map(|_| ScriptCommand::Play),
        "loop" => args.none().map(|_| ScriptCommand::Loop),
        "stop" => args.none().map(|_| ScriptCommand::Stop),
        "pause" => args.none().map(|_| ScriptCommand::Pause),
        "continue" | "resume" => args.none().map(|_| ScriptCommand::Resume),
        "seek" | "seek_to" => {
            args.expect(1, 1)?;
            Ok(ScriptCommand::Seek(args.parse(0, "frame")?))
        }
        "wait" => args.none().map(|_| ScriptCommand::Wait),
        "record" => {
            args.expect(1, 2)?;
            Ok(ScriptCommand::Record {
                channels: args.parse(0, "channels")?,
                max_frames: args.opt(1, "max frames")?,
            })
        }
        "finish_recording" => args.none().map(|_| ScriptCommand::FinishRecording),
        _ => Err(EditError::UnknownCommand(name.to_string())),
    }
}

impl Editor {
    /// Parse and run one command line.
    pub fn execute(&mut self, line: &str, clipboard: &mut Clipboard) -> Result<()> {
        let command = parse(line, self.config())?;
        self.run_command(command, clipboard)
    }

    pub fn run_command(&mut self, command: ScriptCommand, clipboard: &mut Clipboard) -> Result<()> {
        match command {
            ScriptCommand::Range(op) => self.do_range_op(&op, clipboard).map(|_| ()),
            ScriptCommand::SetMarkers(l, r) => {
                self.set_markers(l, r);
                Ok(())
            }
            ScriptCommand::SelectAll => {
                let len = self.signal().len();
                self.set_markers(0, len);
                Ok(())
            }
            ScriptCommand::AppendChannel => self.append_channel().map(|_| ()),
            ScriptCommand::DeleteChannel(i) => self.delete_channel(i),
            ScriptCommand::ToggleChannel(i) => match self.toggle_selection(i) {
                Some(_) => Ok(()),
                None => Err(EditError::invalid_args(
                    "toggle_channel",
                    format!("no channel {i}"),
                )),
            },
            ScriptCommand::AddLabel { position, name } => {
                self.add_label(position, &name).map(|_| ())
            }
            ScriptCommand::DeleteLabel(i) => self.delete_label(i).map(|_| ()),
            ScriptCommand::MoveLabel { index, position } => {
                self.move_label(index, position).map(|_| ())
            }
            ScriptCommand::RenameLabel { index, name } => self.rename_label(index, &name),
            ScriptCommand::Undo => self.undo().map(|_| ()),
            ScriptCommand::Redo => self.redo().map(|_| ()),
            ScriptCommand::Play => self.play(),
            ScriptCommand::Loop => self.loop_play(),
            ScriptCommand::Stop => {
                self.stop();
                Ok(())
            }
            ScriptCommand::Pause => {
                self.pause();
                Ok(())
            }
            ScriptCommand::Resume => {
                self.resume();
                Ok(())
            }
            ScriptCommand::Seek(frame) => self.seek_to(frame),
            ScriptCommand::Wait => self.wait(),
            ScriptCommand::Record {
                channels,
                max_frames,
            } => self.record(channels, max_frames),
            ScriptCommand::FinishRecording => self.finish_recording(),
        }
    }
}
