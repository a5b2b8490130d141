//! Pure decision points for the per-type signaling handlers. The
//! orchestration that actually touches peer connections and transports
//! lives on [`crate::room::Room`]; this module holds the bits that are
//! cleanly testable without a WebRTC stack.

/// Tiebreaker: the lexicographically larger self id initiates the offer.
pub fn should_initiate_offer(self_id: &str, remote_id: &str) -> bool {
    self_id > remote_id
}

/// Whether an `announce` from an unknown peer should be turned away with
/// a `room-locked` notice instead of being allowed to negotiate.
pub fn should_reject_for_lock(room_locked: bool, peer_already_known: bool) -> bool {
    room_locked && !peer_already_known
}

/// Whether an inbound offer/answer/ice-candidate belongs to the session
/// currently in progress. A missing `sessionId` on the envelope is treated
/// as belonging to the current session (older peers / same-origin
/// multicast replay may omit it).
pub fn session_matches(envelope_session_id: Option<u64>, current_session_id: u64) -> bool {
    match envelope_session_id {
        Some(id) => id == current_session_id,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn larger_self_id_initiates() {
        assert!(should_initiate_offer("ZZZZZZZZZZZZZZZZ", "0000"));
        assert!(!should_initiate_offer("0000", "ZZZZZZZZZZZZZZZZ"));
    }

    #[test]
    fn lock_only_rejects_unknown_peers() {
        assert!(should_reject_for_lock(true, false));
        assert!(!should_reject_for_lock(true, true));
        assert!(!should_reject_for_lock(false, false));
    }

    #[test]
    fn missing_session_id_always_matches() {
        assert!(session_matches(None, 7));
        assert!(session_matches(Some(7), 7));
        assert!(!session_matches(Some(6), 7));
    }
}
