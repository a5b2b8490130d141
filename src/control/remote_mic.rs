//! Remote-mic handshake carried on the `"control"` data channel:
//! `rm_request → rm_response → rm_start → rm_heartbeat* → rm_stop`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemoteMicMessage {
    RmRequest { request_id: String },
    RmResponse { request_id: String, accepted: bool, reason: Option<String> },
    RmStart { request_id: String },
    RmHeartbeat { request_id: String },
    RmStop { request_id: String, reason: Option<String> },
}

pub fn parse(payload: &[u8]) -> Option<RemoteMicMessage> {
    serde_json::from_slice(payload).ok()
}

pub fn encode(message: &RemoteMicMessage) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(message)
}

/// Notifications synthesized for the manager-level `onRemoteMicControl` event.
#[derive(Debug, Clone)]
pub enum RemoteMicEvent {
    Requested { peer_id: String, request_id: String },
    Responded { peer_id: String, request_id: String, accepted: bool },
    Started { peer_id: String, request_id: String },
    Stopped { peer_id: String, request_id: String, reason: Option<String> },
}

/// Per-room remote-mic state, held by the requester side: the one
/// outstanding outgoing request, plus the currently active target/source
/// once a request is accepted and started.
#[derive(Debug, Default)]
pub struct RemoteMicState {
    pub pending_outgoing_request_id: Option<String>,
    pub active_target_peer_id: Option<String>,
    pub active_source_peer_id: Option<String>,
    pub active_request_id: Option<String>,
}

impl RemoteMicState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_sent(&mut self, request_id: &str) {
        self.pending_outgoing_request_id = Some(request_id.to_string());
    }

    /// An accepted response to our own pending request transitions it into
    /// `active_target_peer_id`; anything else (rejected, stale id, a
    /// response to someone else's request) leaves state untouched.
    pub fn on_response(&mut self, from_peer_id: &str, request_id: &str, accepted: bool) -> Option<RemoteMicEvent> {
        if self.pending_outgoing_request_id.as_deref() != Some(request_id) {
            return None;
        }
        if accepted {
            self.active_target_peer_id = Some(from_peer_id.to_string());
            self.active_request_id = Some(request_id.to_string());
        } else {
            self.pending_outgoing_request_id = None;
        }
        Some(RemoteMicEvent::Responded {
            peer_id: from_peer_id.to_string(),
            request_id: request_id.to_string(),
            accepted,
        })
    }

    /// `rm_start` from the accepting peer sets `active_source_peer_id`.
    pub fn on_start(&mut self, from_peer_id: &str, request_id: &str) -> RemoteMicEvent {
        self.active_source_peer_id = Some(from_peer_id.to_string());
        self.active_request_id = Some(request_id.to_string());
        RemoteMicEvent::Started {
            peer_id: from_peer_id.to_string(),
            request_id: request_id.to_string(),
        }
    }

    /// Clears both target and source. Used both for an explicit `rm_stop`
    /// and for a synthetic stop on accepting-peer disconnect (in which
    /// case the caller passes `None` and the last known active request id
    /// is used instead).
    pub fn clear(&mut self, peer_id: &str, request_id: Option<&str>, reason: Option<String>) -> RemoteMicEvent {
        let request_id = request_id
            .map(str::to_string)
            .or_else(|| self.active_request_id.clone())
            .unwrap_or_default();
        self.pending_outgoing_request_id = None;
        self.active_target_peer_id = None;
        self.active_source_peer_id = None;
        self.active_request_id = None;
        RemoteMicEvent::Stopped {
            peer_id: peer_id.to_string(),
            request_id,
            reason,
        }
    }

    /// Whether `peer_id` is the peer currently supplying remote audio, i.e.
    /// whether its disconnect should synthesize an `rm_stop`.
    pub fn is_active_source(&self, peer_id: &str) -> bool {
        self.active_source_peer_id.as_deref() == Some(peer_id)
            || self.active_target_peer_id.as_deref() == Some(peer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_roundtrips_through_json() {
        let message = RemoteMicMessage::RmRequest { request_id: "r1".to_string() };
        let bytes = encode(&message).unwrap();
        assert_eq!(parse(&bytes).unwrap(), message);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let payload = br#"{"type":"rm_bogus","request_id":"r1"}"#;
        assert!(parse(payload).is_none());
    }

    #[test]
    fn accepted_response_sets_active_target() {
        let mut state = RemoteMicState::new();
        state.request_sent("r1");
        state.on_response("peer-a", "r1", true);
        assert_eq!(state.active_target_peer_id.as_deref(), Some("peer-a"));
    }

    #[test]
    fn rejected_response_clears_pending() {
        let mut state = RemoteMicState::new();
        state.request_sent("r1");
        state.on_response("peer-a", "r1", false);
        assert!(state.pending_outgoing_request_id.is_none());
        assert!(state.active_target_peer_id.is_none());
    }

    #[test]
    fn response_to_stale_request_id_is_ignored() {
        let mut state = RemoteMicState::new();
        state.request_sent("r1");
        let event = state.on_response("peer-a", "other-request", true);
        assert!(event.is_none());
        assert!(state.active_target_peer_id.is_none());
    }

    #[test]
    fn start_sets_active_source() {
        let mut state = RemoteMicState::new();
        state.on_start("peer-a", "r1");
        assert_eq!(state.active_source_peer_id.as_deref(), Some("peer-a"));
    }

    #[test]
    fn clear_resets_everything() {
        let mut state = RemoteMicState::new();
        state.request_sent("r1");
        state.on_response("peer-a", "r1", true);
        state.on_start("peer-a", "r1");
        state.clear("peer-a", Some("r1"), None);
        assert!(state.pending_outgoing_request_id.is_none());
        assert!(state.active_target_peer_id.is_none());
        assert!(state.active_source_peer_id.is_none());
    }

    #[test]
    fn synthetic_disconnect_clear_reuses_last_active_request_id() {
        let mut state = RemoteMicState::new();
        state.request_sent("r1");
        state.on_response("peer-a", "r1", true);
        let event = state.clear("peer-a", None, Some("peer disconnected".to_string()));
        match event {
            RemoteMicEvent::Stopped { request_id, .. } => assert_eq!(request_id, "r1"),
            _ => panic!("expected Stopped"),
        }
    }
}
