//! Per-peer liveness tracking: who to ping, who to evict.

use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct Heartbeat {
    last_seen: HashMap<String, Instant>,
    last_ping: HashMap<String, Instant>,
}

/// What a heartbeat tick decided to do for the current peer set.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TickOutcome {
    pub evicted: Vec<String>,
    pub to_ping: Vec<String>,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records inbound activity: both `lastSeen` and `lastPing` move to now.
    pub fn record_activity(&mut self, peer_id: &str) {
        let now = Instant::now();
        self.last_seen.insert(peer_id.to_string(), now);
        self.last_ping.insert(peer_id.to_string(), now);
    }

    pub fn remove(&mut self, peer_id: &str) {
        self.last_seen.remove(peer_id);
        self.last_ping.remove(peer_id);
    }

    /// Runs one tick against the current peer id set: newly-seen peers are
    /// initialized, stale peers are reported for eviction (and removed from
    /// tracking here), and peers due a ping are reported (with `lastPing`
    /// bumped to now).
    pub fn tick(&mut self, peer_ids: &[String], timeout: Duration, ping_interval: Duration) -> TickOutcome {
        let now = Instant::now();
        for peer_id in peer_ids {
            self.last_seen.entry(peer_id.clone()).or_insert(now);
        }

        let mut outcome = TickOutcome::default();
        for peer_id in peer_ids {
            let seen = self.last_seen.get(peer_id).copied().unwrap_or(now);
            if now.duration_since(seen) >= timeout {
                outcome.evicted.push(peer_id.clone());
                continue;
            }
            let pinged = self.last_ping.get(peer_id).copied();
            let due = match pinged {
                Some(last) => now.duration_since(last) >= ping_interval,
                None => true,
            };
            if due {
                self.last_ping.insert(peer_id.clone(), now);
                outcome.to_ping.push(peer_id.clone());
            }
        }

        for peer_id in &outcome.evicted {
            self.remove(peer_id);
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_peer_is_initialized_not_evicted() {
        let mut hb = Heartbeat::new();
        let outcome = hb.tick(&["p1".to_string()], Duration::from_secs(15), Duration::from_secs(5));
        assert!(outcome.evicted.is_empty());
        assert_eq!(outcome.to_ping, vec!["p1".to_string()]);
    }

    #[test]
    fn stale_peer_is_evicted_and_forgotten() {
        let mut hb = Heartbeat::new();
        hb.last_seen.insert("p1".to_string(), Instant::now() - Duration::from_secs(20));
        let outcome = hb.tick(&["p1".to_string()], Duration::from_secs(15), Duration::from_secs(5));
        assert_eq!(outcome.evicted, vec!["p1".to_string()]);
        assert!(!hb.last_seen.contains_key("p1"));
        assert!(!hb.last_ping.contains_key("p1"));
    }

    #[test]
    fn recent_activity_suppresses_ping() {
        let mut hb = Heartbeat::new();
        hb.record_activity("p1");
        let outcome = hb.tick(&["p1".to_string()], Duration::from_secs(15), Duration::from_secs(5));
        assert!(outcome.to_ping.is_empty());
        assert!(outcome.evicted.is_empty());
    }

    #[test]
    fn inbound_message_resets_both_timers() {
        let mut hb = Heartbeat::new();
        hb.last_seen.insert("p1".to_string(), Instant::now() - Duration::from_secs(14));
        hb.last_ping.insert("p1".to_string(), Instant::now() - Duration::from_secs(10));
        hb.record_activity("p1");
        let outcome = hb.tick(&["p1".to_string()], Duration::from_secs(15), Duration::from_secs(5));
        assert!(outcome.evicted.is_empty());
        assert!(outcome.to_ping.is_empty());
    }
}
