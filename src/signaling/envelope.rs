//! Rendezvous envelope: the JSON shape carried over every broker and the
//! multicast bus alike.

use serde::{Deserialize, Serialize};

use crate::platform::Platform;

pub const PROTOCOL_VERSION: u8 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EnvelopeKind {
    Announce,
    Offer { sdp: String },
    Answer { sdp: String },
    IceCandidate { candidate: serde_json::Value },
    Ping,
    Pong,
    Leave,
    MuteStatus {
        mic_muted: bool,
        speaker_muted: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        video_muted: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        video_enabled: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_screen_sharing: Option<bool>,
    },
    RoomLocked { locked_by_peer_id: String, ts: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub v: u8,
    #[serde(flatten)]
    pub kind: EnvelopeKind,
    pub from: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<u64>,
}

impl Envelope {
    pub fn new(kind: EnvelopeKind, from: &str) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            kind,
            from: from.to_string(),
            to: None,
            session_id: None,
            msg_id: None,
            user_name: None,
            platform: None,
            ts: None,
        }
    }

    pub fn to(mut self, peer_id: &str) -> Self {
        self.to = Some(peer_id.to_string());
        self
    }

    pub fn with_session(mut self, session_id: u64) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_identity(mut self, user_name: &str, platform: Platform) -> Self {
        self.user_name = Some(user_name.to_string());
        self.platform = Some(platform);
        self
    }

    /// Attaches a random msgId if the envelope doesn't already carry one,
    /// the way a broadcast call mints one for the caller.
    pub fn ensure_msg_id(mut self) -> Self {
        if self.msg_id.is_none() {
            self.msg_id = Some(crate::id::generate_msg_id());
        }
        self
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Parses a received envelope, returning `None` for anything that isn't
    /// `v:1` or carries an unrecognized `type` (both dropped silently).
    pub fn from_json(bytes: &[u8]) -> Option<Self> {
        let envelope: Envelope = serde_json::from_slice(bytes).ok()?;
        if envelope.v != PROTOCOL_VERSION {
            return None;
        }
        Some(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_json() {
        let envelope = Envelope::new(EnvelopeKind::Ping, "self-id").ensure_msg_id();
        let bytes = envelope.to_json().unwrap();
        let parsed = Envelope::from_json(&bytes).unwrap();
        assert_eq!(parsed.from, "self-id");
        assert!(parsed.msg_id.is_some());
        assert!(matches!(parsed.kind, EnvelopeKind::Ping));
    }

    #[test]
    fn wrong_version_is_dropped() {
        let bytes = br#"{"v":2,"type":"ping","from":"x"}"#;
        assert!(Envelope::from_json(bytes).is_none());
    }

    #[test]
    fn unknown_type_is_dropped() {
        let bytes = br#"{"v":1,"type":"not-a-real-type","from":"x"}"#;
        assert!(Envelope::from_json(bytes).is_none());
    }

    #[test]
    fn offer_carries_sdp() {
        let envelope = Envelope::new(
            EnvelopeKind::Offer { sdp: "v=0".to_string() },
            "self-id",
        );
        let bytes = envelope.to_json().unwrap();
        let parsed = Envelope::from_json(&bytes).unwrap();
        match parsed.kind {
            EnvelopeKind::Offer { sdp } => assert_eq!(sdp, "v=0"),
            _ => panic!("expected offer"),
        }
    }
}
