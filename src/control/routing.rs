//! Audio-routing policy (`broadcast` vs `exclusive(peerId)`) and the pure
//! sender-matching decision `replaceTrack` needs before touching any
//! actual `RTCRtpSender`.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioRoutingMode {
    Broadcast,
    Exclusive { target_peer_id: String },
}

impl Default for AudioRoutingMode {
    fn default() -> Self {
        AudioRoutingMode::Broadcast
    }
}

impl AudioRoutingMode {
    /// Whether `peer_id` should currently receive the local audio track.
    pub fn should_send_to(&self, peer_id: &str) -> bool {
        match self {
            AudioRoutingMode::Broadcast => true,
            AudioRoutingMode::Exclusive { target_peer_id } => target_peer_id == peer_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    fn codec_family(self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

/// A minimal snapshot of one `RTCRtpSender` slot: enough to run the
/// `replaceTrack` selection rules without touching `webrtc` types.
#[derive(Debug, Clone)]
pub struct SenderSnapshot {
    pub index: usize,
    pub track_id: Option<String>,
    pub kind: Option<TrackKind>,
    pub codec_mime_prefix: Option<String>,
}

/// What `setLocalStream`/`replaceTrack` should do for one incoming track,
/// given the current senders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackAction {
    Skip,
    ReplaceSender { index: usize },
    AddTrack,
}

/// Same-track-id is a no-op; same-kind-different-id replaces in place;
/// anything else adds a new sender.
pub fn diff_track(senders: &[SenderSnapshot], new_track_id: &str, new_kind: TrackKind) -> TrackAction {
    for sender in senders {
        if sender.track_id.as_deref() == Some(new_track_id) {
            return TrackAction::Skip;
        }
    }
    for sender in senders {
        if sender.kind == Some(new_kind) {
            return TrackAction::ReplaceSender { index: sender.index };
        }
    }
    TrackAction::AddTrack
}

/// Exclusive-mode routing's sender pick for a peer no longer receiving
/// audio: match by `kind` first, fall back to codec family, otherwise
/// there's no sender to clear (caller only adds a track when a local
/// stream exists, which is its own decision, not this function's).
pub fn select_sender_for_routing(senders: &[SenderSnapshot], kind: TrackKind) -> Option<usize> {
    senders
        .iter()
        .find(|sender| sender.kind == Some(kind))
        .or_else(|| {
            senders.iter().find(|sender| {
                sender
                    .codec_mime_prefix
                    .as_deref()
                    .map(|prefix| prefix == kind.codec_family())
                    .unwrap_or(false)
            })
        })
        .map(|sender| sender.index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender(index: usize, track_id: Option<&str>, kind: Option<TrackKind>) -> SenderSnapshot {
        SenderSnapshot {
            index,
            track_id: track_id.map(str::to_string),
            kind,
            codec_mime_prefix: None,
        }
    }

    #[test]
    fn broadcast_mode_sends_to_everyone() {
        let mode = AudioRoutingMode::Broadcast;
        assert!(mode.should_send_to("anyone"));
    }

    #[test]
    fn exclusive_mode_only_sends_to_target() {
        let mode = AudioRoutingMode::Exclusive { target_peer_id: "p1".to_string() };
        assert!(mode.should_send_to("p1"));
        assert!(!mode.should_send_to("p2"));
    }

    #[test]
    fn same_track_id_is_skipped() {
        let senders = vec![sender(0, Some("t1"), Some(TrackKind::Audio))];
        assert_eq!(diff_track(&senders, "t1", TrackKind::Audio), TrackAction::Skip);
    }

    #[test]
    fn same_kind_different_id_replaces_in_place() {
        let senders = vec![sender(0, Some("old"), Some(TrackKind::Audio))];
        assert_eq!(diff_track(&senders, "new", TrackKind::Audio), TrackAction::ReplaceSender { index: 0 });
    }

    #[test]
    fn no_matching_sender_adds_a_track() {
        let senders = vec![sender(0, Some("old"), Some(TrackKind::Video))];
        assert_eq!(diff_track(&senders, "new", TrackKind::Audio), TrackAction::AddTrack);
    }

    #[test]
    fn selects_by_kind_before_codec_family() {
        let senders = vec![SenderSnapshot {
            index: 0,
            track_id: None,
            kind: Some(TrackKind::Audio),
            codec_mime_prefix: Some("audio".to_string()),
        }];
        assert_eq!(select_sender_for_routing(&senders, TrackKind::Audio), Some(0));
    }

    #[test]
    fn falls_back_to_codec_family_when_kind_unset() {
        let senders = vec![SenderSnapshot {
            index: 2,
            track_id: None,
            kind: None,
            codec_mime_prefix: Some("audio".to_string()),
        }];
        assert_eq!(select_sender_for_routing(&senders, TrackKind::Audio), Some(2));
    }

    #[test]
    fn no_match_returns_none() {
        let senders = vec![sender(0, None, Some(TrackKind::Video))];
        assert_eq!(select_sender_for_routing(&senders, TrackKind::Audio), None);
    }
}
