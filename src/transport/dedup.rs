//! Sliding-window message-id dedup cache.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::EngineConfig;

struct ThrottleState {
    window_opened_at: Instant,
    filtered_count: u32,
    distinct_ids: Vec<String>,
    last_summary_at: Instant,
    breadcrumb_emitted: bool,
}

impl ThrottleState {
    fn new(now: Instant) -> Self {
        Self {
            window_opened_at: now,
            filtered_count: 0,
            distinct_ids: Vec::new(),
            last_summary_at: now,
            breadcrumb_emitted: false,
        }
    }
}

/// Tracks recently-seen `msgId`s so the same envelope arriving over more
/// than one transport (broker A, broker B, multicast) is only acted on
/// once. Not thread-safe by itself; callers serialize access (the room
/// actor owns one instance).
pub struct DedupCache {
    seen: HashMap<String, Instant>,
    throttle: Option<ThrottleState>,
    capacity: usize,
    ttl: Duration,
    summary_count_threshold: u32,
    summary_interval: Duration,
}

impl DedupCache {
    pub fn new(cfg: &EngineConfig) -> Self {
        Self {
            seen: HashMap::new(),
            throttle: None,
            capacity: cfg.dedup_capacity,
            ttl: cfg.dedup_ttl,
            summary_count_threshold: cfg.dedup_log_summary_count as u32,
            summary_interval: cfg.dedup_log_summary_interval,
        }
    }

    /// Returns `true` if `id` was already seen within the window (and logs
    /// the duplicate, throttled). A missing id is treated as new and
    /// recorded.
    pub fn is_duplicate(&mut self, id: &str) -> bool {
        let now = Instant::now();
        if self.seen.contains_key(id) {
            self.record_duplicate(id, now);
            return true;
        }
        self.seen.insert(id.to_string(), now);
        if self.seen.len() > self.capacity {
            self.evict_oldest();
        }
        false
    }

    fn record_duplicate(&mut self, id: &str, now: Instant) {
        let summary_count_threshold = self.summary_count_threshold;
        let summary_interval = self.summary_interval;
        let state = self.throttle.get_or_insert_with(|| ThrottleState::new(now));
        if !state.breadcrumb_emitted {
            log::debug!("dedup: duplicate window opened (first id {id})");
            state.breadcrumb_emitted = true;
        }
        state.filtered_count += 1;
        if !state.distinct_ids.contains(&id.to_string()) {
            state.distinct_ids.push(id.to_string());
        }

        let should_summarize = state.filtered_count >= summary_count_threshold
            || now.duration_since(state.last_summary_at) >= summary_interval;
        if should_summarize {
            let window_duration = now.duration_since(state.window_opened_at);
            let mut top: Vec<&String> = state.distinct_ids.iter().take(5).collect();
            top.truncate(5);
            log::info!(
                "dedup: filtered {} duplicates ({} distinct msgIds) over {:?}, top ids: {:?}",
                state.filtered_count,
                state.distinct_ids.len(),
                window_duration,
                top
            );
            self.throttle = None;
        }
    }

    fn evict_oldest(&mut self) {
        if let Some(oldest_key) = self
            .seen
            .iter()
            .min_by_key(|(_, ts)| **ts)
            .map(|(k, _)| k.clone())
        {
            self.seen.remove(&oldest_key);
        }
    }

    /// Drops entries older than the TTL. Intended to be called from a
    /// periodic cleaner ticking every `TTL / 2`.
    pub fn clean_expired(&mut self) {
        let now = Instant::now();
        let ttl = self.ttl;
        self.seen.retain(|_, ts| now.duration_since(*ts) < ttl);
    }

    pub fn cleaner_interval(&self) -> Duration {
        self.ttl / 2
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_id_is_new() {
        let mut cache = DedupCache::new(&EngineConfig::default());
        assert!(!cache.is_duplicate("a"));
    }

    #[test]
    fn repeated_id_is_duplicate() {
        let mut cache = DedupCache::new(&EngineConfig::default());
        assert!(!cache.is_duplicate("a"));
        assert!(cache.is_duplicate("a"));
    }

    #[test]
    fn evicts_oldest_past_capacity() {
        let cfg = EngineConfig::default();
        let mut cache = DedupCache::new(&cfg);
        for i in 0..(cfg.dedup_capacity + 10) {
            cache.is_duplicate(&format!("id-{i}"));
        }
        assert!(cache.len() <= cfg.dedup_capacity);
        assert!(!cache.seen.contains_key("id-0"));
    }

    #[test]
    fn clean_expired_is_a_no_op_for_fresh_entries() {
        let mut cache = DedupCache::new(&EngineConfig::default());
        cache.is_duplicate("a");
        cache.clean_expired();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn cleaner_interval_is_half_ttl() {
        let cache = DedupCache::new(&EngineConfig::default());
        assert_eq!(cache.cleaner_interval(), Duration::from_secs(15));
    }
}
