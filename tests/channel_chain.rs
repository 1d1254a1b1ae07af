use waveforge::{Clipboard, EditError, Editor, EngineConfig, MixTarget, Notification, RangeOp, Signal};

fn editor_with(channels: Vec<Vec<i32>>) -> Editor {
    let mut editor = Editor::new(EngineConfig::default());
    editor
        .set_signal(Signal::from_channels(8000, channels))
        .expect("set signal");
    editor
}

#[test]
fn deleting_the_only_channel_leaves_an_empty_chain() {
    let mut editor = editor_with(vec![vec![1, 2, 3, 4, 5]]);
    editor.set_markers(1, 4);
    editor.delete_channel(0).expect("delete");
    assert!(editor.channels().is_empty());
    assert_eq!(editor.signal().len(), 0);
    assert_eq!(editor.signal().markers(), (0, 0));

    editor.undo().expect("undo").expect("entry");
    assert_eq!(editor.channels()[0].samples(), &[1, 2, 3, 4, 5]);
    assert_eq!(editor.signal().markers(), (1, 4));
}

#[test]
fn appended_channels_are_silent_at_the_nominal_length() {
    let mut editor = editor_with(vec![vec![9; 3], vec![8; 7]]);
    let notes = editor.subscribe();
    let index = editor.append_channel().expect("append");
    assert_eq!(index, 2);
    assert_eq!(editor.channels()[2].samples(), &[0; 7]);
    assert_eq!(notes.try_recv().ok(), Some(Notification::ChannelInserted(2)));

    editor.undo().expect("undo");
    assert_eq!(editor.signal().channel_count(), 2);
    editor.redo().expect("redo");
    assert_eq!(editor.signal().channel_count(), 3);
}

#[test]
fn deleted_channel_comes_back_at_its_index_with_its_selection() {
    let mut editor = editor_with(vec![vec![1; 4], vec![2; 4], vec![3; 4]]);
    editor.toggle_selection(1);
    editor.delete_channel(1).expect("delete middle");
    let left: Vec<i32> = editor.channels().iter().map(|c| c.samples()[0]).collect();
    assert_eq!(left, vec![1, 3]);

    editor.undo().expect("undo");
    let back: Vec<i32> = editor.channels().iter().map(|c| c.samples()[0]).collect();
    assert_eq!(back, vec![1, 2, 3]);
    assert!(editor.channels()[1].is_selected());
    assert!(!editor.channels()[0].is_selected());
}

#[test]
fn bad_channel_index_is_an_invalid_range() {
    let mut editor = editor_with(vec![vec![0; 4]]);
    assert!(matches!(
        editor.delete_channel(3),
        Err(EditError::InvalidRange { .. })
    ));
    assert_eq!(editor.toggle_selection(3), None);
    assert!(!editor.history().can_undo());
}

#[test]
fn empty_selection_means_every_channel() {
    let mut editor = editor_with(vec![vec![5; 4], vec![6; 4]]);
    assert_eq!(editor.signal().selected_indices(), vec![0, 1]);
    assert!(editor.signal().all_selected());
    editor.toggle_selection(1);
    assert_eq!(editor.signal().selected_indices(), vec![1]);
    assert!(!editor.signal().all_selected());
    editor.toggle_selection(1);
    assert_eq!(editor.signal().selected_indices(), vec![0, 1]);
}

#[test]
fn channel_mix_writes_a_weighted_sum_of_the_whole_signal_into_a_new_channel() {
    let mut editor = editor_with(vec![vec![1000; 8], vec![-400; 8]]);
    let mut clip = Clipboard::new();
    editor
        .do_range_op(
            &RangeOp::ChannelMix {
                weights: vec![0.5, 1.0],
                target: MixTarget::NewChannel,
            },
            &mut clip,
        )
        .expect("mix");
    assert_eq!(editor.signal().channel_count(), 3);
    assert_eq!(editor.channels()[2].samples(), &[100; 8]);

    editor.undo().expect("undo");
    assert_eq!(editor.signal().channel_count(), 2);
}
