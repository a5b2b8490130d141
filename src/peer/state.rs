//! Per-peer signaling state machine.

use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerState {
    /// Just announced, no offer/answer exchanged yet. Carries the instant
    /// it was created so the tiebreaker can judge staleness.
    New,
    Offering,
    Answering,
    Connecting,
    Connected,
    Restarting,
    Removed,
}

#[derive(Debug, Clone)]
pub struct StateTimestamp {
    pub state: PeerState,
    pub entered_at: Instant,
}

impl StateTimestamp {
    pub fn new(state: PeerState) -> Self {
        Self {
            state,
            entered_at: Instant::now(),
        }
    }

    pub fn transition(&mut self, next: PeerState) {
        self.state = next;
        self.entered_at = Instant::now();
    }

    pub fn age(&self) -> std::time::Duration {
        self.entered_at.elapsed()
    }
}

/// Whether an existing peer entry should be kept as-is when a fresh
/// `announce` arrives for the same id, or discarded and rebuilt.
pub fn should_keep_existing(state: &StateTimestamp, ice_restart_in_progress: bool, new_connection_stale: std::time::Duration) -> bool {
    match state.state {
        PeerState::Connected | PeerState::Connecting => true,
        PeerState::New => state.age() < new_connection_stale,
        PeerState::Restarting => ice_restart_in_progress,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn fresh_new_peer_is_kept() {
        let state = StateTimestamp::new(PeerState::New);
        assert!(should_keep_existing(&state, false, Duration::from_secs(15)));
    }

    #[test]
    fn connected_peer_is_always_kept() {
        let state = StateTimestamp::new(PeerState::Connected);
        assert!(should_keep_existing(&state, false, Duration::from_secs(15)));
    }

    #[test]
    fn disconnected_without_restart_is_not_kept() {
        let state = StateTimestamp::new(PeerState::Removed);
        assert!(!should_keep_existing(&state, false, Duration::from_secs(15)));
    }

    #[test]
    fn restarting_peer_kept_only_while_in_progress() {
        let state = StateTimestamp::new(PeerState::Restarting);
        assert!(should_keep_existing(&state, true, Duration::from_secs(15)));
        assert!(!should_keep_existing(&state, false, Duration::from_secs(15)));
    }
}
