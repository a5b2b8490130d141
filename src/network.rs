//! Offline/online latch and bounded reconnect supervision, independent of
//! any particular transport so it can be driven by tests without sockets.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::config::EngineConfig;
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectOutcome {
    /// Not online, not in a room, or already past the attempt budget:
    /// nothing to do.
    Aborted,
    /// Attempt budget exhausted this call; state was reset.
    Exhausted,
    /// Caller should tear down the transport and reconnect/resubscribe.
    ShouldReconnect,
}

#[derive(Debug, Default)]
pub struct NetworkSupervisor {
    online: AtomicBool,
    in_room: AtomicBool,
    was_in_room_when_offline: AtomicBool,
    reconnect_attempts: AtomicU32,
}

impl NetworkSupervisor {
    pub fn new() -> Self {
        Self {
            online: AtomicBool::new(true),
            ..Default::default()
        }
    }

    pub fn set_in_room(&self, in_room: bool) {
        self.in_room.store(in_room, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Returns `true` if the caller should latch `wasInRoomWhenOffline`.
    pub fn on_offline(&self) -> bool {
        self.online.store(false, Ordering::SeqCst);
        if self.in_room.load(Ordering::SeqCst) {
            self.was_in_room_when_offline.store(true, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    /// Returns `true` if the caller should wait for the stabilization
    /// delay and then run [`Self::attempt_reconnect`].
    pub fn on_online(&self) -> bool {
        self.online.store(true, Ordering::SeqCst);
        self.was_in_room_when_offline.swap(false, Ordering::SeqCst)
    }

    pub fn manual_reconnect_requested(&self) -> bool {
        if !self.in_room.load(Ordering::SeqCst) {
            return false;
        }
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        true
    }

    /// Evaluates one reconnect attempt against the configured budget.
    /// Exhaustion resets the attempt counter and the caller is expected to
    /// emit `onError(network_reconnect_failed)`.
    pub fn attempt_reconnect(&self, cfg: &EngineConfig) -> ReconnectOutcome {
        if !self.online.load(Ordering::SeqCst) || !self.in_room.load(Ordering::SeqCst) {
            return ReconnectOutcome::Aborted;
        }
        let attempt = self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt > cfg.max_network_reconnect_attempts {
            self.reconnect_attempts.store(0, Ordering::SeqCst);
            return ReconnectOutcome::Exhausted;
        }
        ReconnectOutcome::ShouldReconnect
    }

    pub fn on_reconnect_success(&self) {
        self.reconnect_attempts.store(0, Ordering::SeqCst);
    }

    pub fn reconnect_failed_error(attempts: u32) -> Error {
        Error::NetworkReconnectFailed { attempts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_outside_a_room_does_not_latch() {
        let sup = NetworkSupervisor::new();
        assert!(!sup.on_offline());
    }

    #[test]
    fn offline_in_a_room_latches_and_online_unlatches() {
        let sup = NetworkSupervisor::new();
        sup.set_in_room(true);
        assert!(sup.on_offline());
        assert!(sup.on_online());
        // second online call finds nothing latched
        assert!(!sup.on_online());
    }

    #[test]
    fn reconnect_aborts_when_offline() {
        let sup = NetworkSupervisor::new();
        sup.set_in_room(true);
        sup.on_offline();
        let cfg = EngineConfig::default();
        assert_eq!(sup.attempt_reconnect(&cfg), ReconnectOutcome::Aborted);
    }

    #[test]
    fn reconnect_aborts_when_not_in_room() {
        let sup = NetworkSupervisor::new();
        let cfg = EngineConfig::default();
        assert_eq!(sup.attempt_reconnect(&cfg), ReconnectOutcome::Aborted);
    }

    #[test]
    fn exhausts_after_configured_attempts_and_resets() {
        let sup = NetworkSupervisor::new();
        sup.set_in_room(true);
        let mut cfg = EngineConfig::default();
        cfg.max_network_reconnect_attempts = 2;
        assert_eq!(sup.attempt_reconnect(&cfg), ReconnectOutcome::ShouldReconnect);
        assert_eq!(sup.attempt_reconnect(&cfg), ReconnectOutcome::ShouldReconnect);
        assert_eq!(sup.attempt_reconnect(&cfg), ReconnectOutcome::Exhausted);
        assert_eq!(sup.reconnect_attempts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn manual_reconnect_resets_attempts_and_requires_a_room() {
        let sup = NetworkSupervisor::new();
        assert!(!sup.manual_reconnect_requested());
        sup.set_in_room(true);
        sup.reconnect_attempts.store(4, Ordering::SeqCst);
        assert!(sup.manual_reconnect_requested());
        assert_eq!(sup.reconnect_attempts.load(Ordering::SeqCst), 0);
    }
}
