//! Change notifications for whatever view sits on top of the editor.
//!
//! Playback positions are coalesced: each subscriber holds only the latest
//! one, so a subscriber that stops draining does not grow during playback.

use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    SignalChanged,
    ChannelInserted(usize),
    ChannelDeleted(usize),
    MarkersChanged { left: usize, right: usize },
    LabelsChanged,
    PlaybackStarted { recording: bool },
    PlaybackPaused,
    PlaybackResumed,
    PlaybackPosition(u64),
    /// `natural` is false when a stop was requested.
    PlaybackStopped { natural: bool },
    /// The session that just ended failed; `message` is the error text.
    PlaybackFailed { message: String },
}

type PositionSlot = Arc<Mutex<Option<u64>>>;

/// Receiving end handed out by [`Notifier::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    rx: Receiver<Notification>,
    position: PositionSlot,
}

impl Subscription {
    /// Queued events first, then the latest playback position if one is pending.
    pub fn try_recv(&self) -> Result<Notification, TryRecvError> {
        match self.rx.try_recv() {
            Ok(note) => Ok(note),
            Err(e) => self
                .position
                .lock()
                .take()
                .map(Notification::PlaybackPosition)
                .ok_or(e),
        }
    }

    pub fn try_iter(&self) -> impl Iterator<Item = Notification> + '_ {
        std::iter::from_fn(move || self.try_recv().ok())
    }
}

#[derive(Debug)]
struct Subscriber {
    tx: Sender<Notification>,
    position: PositionSlot,
}

/// Fan-out to every live subscriber; closed receivers are dropped on send.
#[derive(Debug, Default)]
pub struct Notifier {
    subscribers: Vec<Subscriber>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> Subscription {
        let (tx, rx) = channel();
        let position = PositionSlot::default();
        self.subscribers.push(Subscriber {
            tx,
            position: position.clone(),
        });
        Subscription { rx, position }
    }

    pub fn emit(&mut self, note: Notification) {
        match note {
            Notification::PlaybackPosition(pos) => self.subscribers.retain(|s| {
                // the slot is shared with the subscription alone
                if Arc::strong_count(&s.position) < 2 {
                    return false;
                }
                *s.position.lock() = Some(pos);
                true
            }),
            note => {
                let ends_position = matches!(
                    note,
                    Notification::PlaybackStarted { .. } | Notification::PlaybackStopped { .. }
                );
                self.subscribers.retain(|s| {
                    if ends_position {
                        s.position.lock().take();
                    }
                    s.tx.send(note.clone()).is_ok()
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_receivers_are_pruned() {
        let mut notifier = Notifier::new();
        let keep = notifier.subscribe();
        drop(notifier.subscribe());
        notifier.emit(Notification::SignalChanged);
        assert_eq!(notifier.subscribers.len(), 1);
        assert_eq!(keep.try_recv(), Ok(Notification::SignalChanged));
    }

    #[test]
    fn positions_coalesce_to_the_latest() {
        let mut notifier = Notifier::new();
        let sub = notifier.subscribe();
        notifier.emit(Notification::PlaybackStarted { recording: false });
        for pos in 0..10_000 {
            notifier.emit(Notification::PlaybackPosition(pos));
        }
        notifier.emit(Notification::LabelsChanged);
        let seen: Vec<Notification> = sub.try_iter().collect();
        assert_eq!(
            seen,
            vec![
                Notification::PlaybackStarted { recording: false },
                Notification::LabelsChanged,
                Notification::PlaybackPosition(9_999),
            ]
        );
    }

    #[test]
    fn a_stop_discards_the_pending_position() {
        let mut notifier = Notifier::new();
        let sub = notifier.subscribe();
        notifier.emit(Notification::PlaybackPosition(42));
        notifier.emit(Notification::PlaybackStopped { natural: true });
        assert_eq!(
            sub.try_iter().collect::<Vec<_>>(),
            vec![Notification::PlaybackStopped { natural: true }]
        );
    }

    #[test]
    fn position_only_subscribers_are_pruned_too() {
        let mut notifier = Notifier::new();
        drop(notifier.subscribe());
        notifier.emit(Notification::PlaybackPosition(1));
        assert!(notifier.subscribers.is_empty());
    }
}
