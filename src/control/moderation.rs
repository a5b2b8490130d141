//! Room-lock, mute-all, and hand-raise messages carried on the
//! `"control"` data channel.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModerationMessage {
    ModRoomLock { locked: bool, locked_by_peer_id: String },
    ModRoomLockedNotice { locked_by_peer_id: String },
    ModMuteAllRequest { request_id: String, requested_by_peer_id: String, requested_by_name: String },
    ModMuteAllResponse { request_id: String, accepted: bool },
    ModHandRaise { peer_id: String, raised: bool },
}

pub fn parse(payload: &[u8]) -> Option<ModerationMessage> {
    serde_json::from_slice(payload).ok()
}

pub fn encode(message: &ModerationMessage) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(message)
}

#[derive(Debug, Clone)]
pub enum ModerationEvent {
    RoomLockChanged { locked: bool, locked_by_peer_id: Option<String> },
    HandRaiseChanged { peer_id: String, raised: bool },
    MuteAllRequested { request_id: String, requested_by_peer_id: String, requested_by_name: String },
    MuteAllResponded { request_id: String, accepted: bool },
}

/// Outstanding moderation state for a room: lock ownership, an
/// insertion-ordered hand-raise roster, and in-flight mute-all requests.
#[derive(Debug, Default)]
pub struct ModerationState {
    pub locked: bool,
    pub locked_by_peer_id: Option<String>,
    hand_raise_order: Vec<String>,
    hand_raised: std::collections::HashMap<String, bool>,
    /// requestId -> requesting peer id.
    outstanding_mute_all: std::collections::HashMap<String, String>,
}

impl ModerationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_lock(&mut self, locked: bool, locked_by_peer_id: &str) {
        self.locked = locked;
        self.locked_by_peer_id = if locked { Some(locked_by_peer_id.to_string()) } else { None };
    }

    pub fn set_hand_raised(&mut self, peer_id: &str, raised: bool) {
        if !self.hand_raised.contains_key(peer_id) {
            self.hand_raise_order.push(peer_id.to_string());
        }
        self.hand_raised.insert(peer_id.to_string(), raised);
    }

    /// Insertion-ordered `(peerId, raised)` pairs, as the spec's
    /// "insertion-ordered map keyed by peerId" describes.
    pub fn hand_raises(&self) -> Vec<(String, bool)> {
        self.hand_raise_order
            .iter()
            .map(|id| (id.clone(), *self.hand_raised.get(id).unwrap_or(&false)))
            .collect()
    }

    pub fn record_mute_all_request(&mut self, request_id: &str, requested_by_peer_id: &str) {
        self.outstanding_mute_all.insert(request_id.to_string(), requested_by_peer_id.to_string());
    }

    pub fn resolve_mute_all_request(&mut self, request_id: &str) {
        self.outstanding_mute_all.remove(request_id);
    }

    /// Applies the side effects of `peer_id` disconnecting: clears its
    /// raised hand, drops any mute-all requests it raised, and unlocks the
    /// room if it was the lock owner — each with its synthetic notification.
    pub fn on_peer_disconnect(&mut self, peer_id: &str) -> Vec<ModerationEvent> {
        let mut events = Vec::new();

        if self.hand_raised.get(peer_id).copied().unwrap_or(false) {
            self.hand_raised.insert(peer_id.to_string(), false);
            events.push(ModerationEvent::HandRaiseChanged { peer_id: peer_id.to_string(), raised: false });
        }

        let stale: Vec<String> = self
            .outstanding_mute_all
            .iter()
            .filter(|(_, requester)| requester.as_str() == peer_id)
            .map(|(request_id, _)| request_id.clone())
            .collect();
        for request_id in stale {
            self.outstanding_mute_all.remove(&request_id);
        }

        if self.locked_by_peer_id.as_deref() == Some(peer_id) {
            self.locked = false;
            self.locked_by_peer_id = None;
            events.push(ModerationEvent::RoomLockChanged { locked: false, locked_by_peer_id: None });
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_roundtrips_through_json() {
        let message = ModerationMessage::ModHandRaise { peer_id: "p1".to_string(), raised: true };
        let bytes = encode(&message).unwrap();
        assert_eq!(parse(&bytes).unwrap(), message);
    }

    #[test]
    fn hand_raises_preserve_insertion_order() {
        let mut state = ModerationState::new();
        state.set_hand_raised("b", true);
        state.set_hand_raised("a", true);
        state.set_hand_raised("b", false);
        assert_eq!(
            state.hand_raises(),
            vec![("b".to_string(), false), ("a".to_string(), true)]
        );
    }

    #[test]
    fn disconnect_clears_hand_raise_with_notification() {
        let mut state = ModerationState::new();
        state.set_hand_raised("p1", true);
        let events = state.on_peer_disconnect("p1");
        assert!(matches!(events[0], ModerationEvent::HandRaiseChanged { raised: false, .. }));
        assert_eq!(state.hand_raises(), vec![("p1".to_string(), false)]);
    }

    #[test]
    fn disconnect_removes_its_outstanding_mute_all_requests() {
        let mut state = ModerationState::new();
        state.record_mute_all_request("r1", "p1");
        state.record_mute_all_request("r2", "p2");
        state.on_peer_disconnect("p1");
        assert!(!state.outstanding_mute_all.contains_key("r1"));
        assert!(state.outstanding_mute_all.contains_key("r2"));
    }

    #[test]
    fn disconnect_of_lock_owner_unlocks_with_notification() {
        let mut state = ModerationState::new();
        state.set_lock(true, "p1");
        let events = state.on_peer_disconnect("p1");
        assert!(events.iter().any(|e| matches!(e, ModerationEvent::RoomLockChanged { locked: false, .. })));
        assert!(!state.locked);
    }

    #[test]
    fn disconnect_of_non_owner_leaves_lock_untouched() {
        let mut state = ModerationState::new();
        state.set_lock(true, "p1");
        state.on_peer_disconnect("someone-else");
        assert!(state.locked);
        assert_eq!(state.locked_by_peer_id.as_deref(), Some("p1"));
    }
}
