//! Typed observer events and the sink callers drain instead of installing
//! one callback per kind.

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::error::ErrorContext;
use crate::platform::Platform;

#[derive(Debug, Clone)]
pub enum Event {
    PeerJoin { peer_id: String, user_name: String, platform: Platform },
    PeerLeave { peer_id: String, user_name: String, platform: Platform },
    RemoteStream { peer_id: String },
    MuteStatus {
        peer_id: String,
        mic_muted: bool,
        speaker_muted: bool,
        video_muted: Option<bool>,
        video_enabled: Option<bool>,
        is_screen_sharing: Option<bool>,
    },
    Error { error: String, context: ErrorContext },
    SignalingStateChange { connected_brokers: usize, total_brokers: usize },
    NetworkStatusChange { online: bool },
    Chat { peer_id: String, id: String, sender_name: String, content: String, timestamp: String },
    RemoteMicControl(crate::control::remote_mic::RemoteMicEvent),
    ModerationControl(crate::control::moderation::ModerationEvent),
}

/// One end of the event channel a `Manager` publishes on; the caller
/// drains the other with `UnboundedReceiver::recv`. Cheaply cloneable so
/// a `Room` can hold its own handle onto the same channel as its `Manager`.
#[derive(Clone)]
pub struct EventSink {
    tx: UnboundedSender<Event>,
}

impl EventSink {
    pub fn new() -> (Self, UnboundedReceiver<Event>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Never panics or blocks: a full receiver (dropped by the caller) just
    /// means the event is lost, same as an uninstalled callback slot.
    pub fn emit(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emitted_event_is_received() {
        let (sink, mut rx) = EventSink::new();
        sink.emit(Event::NetworkStatusChange { online: false });
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, Event::NetworkStatusChange { online: false }));
    }

    #[test]
    fn emit_after_receiver_dropped_does_not_panic() {
        let (sink, rx) = EventSink::new();
        drop(rx);
        sink.emit(Event::NetworkStatusChange { online: true });
    }
}
