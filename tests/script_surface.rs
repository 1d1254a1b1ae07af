use waveforge::script::parse;
use waveforge::{Clipboard, EditError, Editor, EngineConfig, RangeOp, ScriptCommand, Signal};

fn editor_with(data: Vec<i32>) -> Editor {
    let mut editor = Editor::new(EngineConfig::default());
    editor
        .set_signal(Signal::from_channels(8000, vec![data]))
        .expect("set signal");
    editor
}

fn run(editor: &mut Editor, clip: &mut Clipboard, lines: &[&str]) {
    for line in lines {
        editor
            .execute(line, clip)
            .unwrap_or_else(|e| panic!("{line}: {e}"));
    }
}

#[test]
fn a_script_edits_labels_and_undoes() {
    let mut editor = editor_with((0..10).collect());
    let mut clip = Clipboard::new();
    run(
        &mut editor,
        &mut clip,
        &[
            "select(2, 5)",
            "cut",
            "select(0, 0)",
            "paste",
            "add_label(4, \"hook\")",
            "rename_label(0, verse)",
        ],
    );
    assert_eq!(
        editor.channels()[0].samples(),
        &[2, 3, 4, 0, 1, 5, 6, 7, 8, 9]
    );
    assert_eq!(editor.label_at_index(0).map(|l| l.name.as_str()), Some("verse"));
    assert_eq!(editor.find_label("verse"), Some(0));

    run(&mut editor, &mut clip, &["undo", "undo", "undo", "undo"]);
    assert_eq!(editor.channels()[0].samples(), &(0..10).collect::<Vec<i32>>()[..]);
    assert!(editor.signal().labels().is_empty());
    run(&mut editor, &mut clip, &["redo()"]);
    assert_eq!(editor.signal().len(), 7);
}

#[test]
fn unknown_commands_leave_the_signal_alone() {
    let mut editor = editor_with(vec![1, 2, 3]);
    let mut clip = Clipboard::new();
    let err = editor.execute("explode(3)", &mut clip).expect_err("unknown");
    assert!(matches!(err, EditError::UnknownCommand(ref name) if name == "explode"));
    let err = editor.execute("!!", &mut clip).expect_err("not a command");
    assert!(matches!(err, EditError::UnknownCommand(_)));
    assert_eq!(editor.channels()[0].samples(), &[1, 2, 3]);
    assert!(!editor.history().can_undo());
}

#[test]
fn malformed_arguments_are_rejected_before_anything_runs() {
    let mut editor = editor_with(vec![1, 2, 3]);
    let mut clip = Clipboard::new();
    for line in [
        "amplify",
        "amplify(loud)",
        "reverse(1)",
        "delay(10)",
        "select(1)",
        "mix(new)",
        "record(two)",
    ] {
        let err = editor.execute(line, &mut clip).expect_err(line);
        assert!(
            matches!(err, EditError::InvalidArguments { .. }),
            "{line}: {err}"
        );
    }
    assert_eq!(editor.channels()[0].samples(), &[1, 2, 3]);
    assert!(!editor.history().can_undo());
}

#[test]
fn noise_defaults_come_from_the_config() {
    let mut cfg = EngineConfig::default();
    cfg.noise.seed = 99;
    cfg.noise.amplitude = 0.125;
    assert_eq!(
        parse("noise", &cfg).expect("parse"),
        ScriptCommand::Range(RangeOp::Noise {
            amplitude: 0.125,
            seed: 99
        })
    );
    assert_eq!(
        parse("noise(0.5)", &cfg).expect("parse"),
        ScriptCommand::Range(RangeOp::Noise {
            amplitude: 0.5,
            seed: 99
        })
    );
}

#[test]
fn transport_commands_without_a_session_are_harmless() {
    let mut editor = editor_with(vec![0; 16]);
    let mut clip = Clipboard::new();
    run(&mut editor, &mut clip, &["stop", "pause", "continue", "wait"]);
    let err = editor.execute("seek(4)", &mut clip).expect_err("no session");
    assert!(matches!(err, EditError::InvalidArguments { .. }));
}

#[test]
fn label_names_may_carry_commas_when_quoted() {
    let mut editor = editor_with(vec![0; 100]);
    let mut clip = Clipboard::new();
    run(
        &mut editor,
        &mut clip,
        &[r#"add_label(40, "chorus, take 2")"#, r#"add_label(10, "a \"b\"")"#],
    );
    assert_eq!(editor.find_label("chorus, take 2"), Some(1));
    assert_eq!(editor.label_at_index(0).map(|l| l.name.as_str()), Some(r#"a "b""#));
    let err = editor
        .execute(r#"add_label(50, "unterminated)"#, &mut clip)
        .expect_err("open quote");
    assert!(matches!(err, EditError::InvalidArguments { .. }));
    assert_eq!(editor.signal().labels().len(), 2);
}
