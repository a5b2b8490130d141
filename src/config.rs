//! Centralized timing and capacity constants, tunable per deployment
//! instead of scattered as bare `const`s.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// MQTT CONNECT timeout: 8s.
    pub mqtt_connect_timeout: Duration,
    /// MQTT SUBSCRIBE timeout: 5s.
    pub mqtt_subscribe_timeout: Duration,
    /// MQTT PINGREQ interval while the socket is open: 20s.
    pub mqtt_ping_interval: Duration,
    /// MQTT CONNECT keepalive field: 30s.
    pub mqtt_keepalive: Duration,

    /// Dedup cache capacity: 500 entries.
    pub dedup_capacity: usize,
    /// Dedup cache TTL: 30s.
    pub dedup_ttl: Duration,
    /// Duplicate-log summary threshold: 200 duplicates.
    pub dedup_log_summary_count: u64,
    /// Duplicate-log summary interval: 15s.
    pub dedup_log_summary_interval: Duration,

    /// Max broker reconnection attempts: 5.
    pub max_broker_reconnect_attempts: u32,
    /// Base broker reconnect delay: 2000ms, doubling, capped at 30s.
    pub broker_reconnect_base: Duration,
    pub broker_reconnect_cap: Duration,

    /// Disconnect grace period before an ICE restart is attempted: 5s.
    pub disconnect_grace: Duration,
    /// Max ICE restart attempts per peer: 3.
    pub max_ice_restart_attempts: u32,
    /// ICE restart watchdog: 15s.
    pub ice_restart_watchdog: Duration,
    /// Base ICE restart retry delay: 1000ms, doubling.
    pub ice_restart_retry_base: Duration,

    /// Age under which a `new` peer is kept rather than replaced on a fresh
    /// announce: 15s.
    pub new_connection_stale: Duration,

    /// Heartbeat tick interval: 5s.
    pub heartbeat_tick: Duration,
    /// Heartbeat ping interval per peer: 5s.
    pub heartbeat_ping_interval: Duration,
    /// Heartbeat staleness timeout: 15s.
    pub heartbeat_timeout: Duration,

    /// Network reconnect stabilization delay after an online event: 2s.
    pub network_reconnect_stabilize: Duration,
    /// Max network reconnect attempts: 5.
    pub max_network_reconnect_attempts: u32,

    /// Delayed post-connect announcements: 500/600/800ms.
    pub post_connect_mute_delay: Duration,
    pub post_connect_lock_delay: Duration,
    pub post_connect_hand_raise_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mqtt_connect_timeout: Duration::from_secs(8),
            mqtt_subscribe_timeout: Duration::from_secs(5),
            mqtt_ping_interval: Duration::from_secs(20),
            mqtt_keepalive: Duration::from_secs(30),

            dedup_capacity: 500,
            dedup_ttl: Duration::from_secs(30),
            dedup_log_summary_count: 200,
            dedup_log_summary_interval: Duration::from_secs(15),

            max_broker_reconnect_attempts: 5,
            broker_reconnect_base: Duration::from_millis(2000),
            broker_reconnect_cap: Duration::from_millis(30_000),

            disconnect_grace: Duration::from_secs(5),
            max_ice_restart_attempts: 3,
            ice_restart_watchdog: Duration::from_secs(15),
            ice_restart_retry_base: Duration::from_millis(1000),

            new_connection_stale: Duration::from_secs(15),

            heartbeat_tick: Duration::from_secs(5),
            heartbeat_ping_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(15),

            network_reconnect_stabilize: Duration::from_secs(2),
            max_network_reconnect_attempts: 5,

            post_connect_mute_delay: Duration::from_millis(500),
            post_connect_lock_delay: Duration::from_millis(600),
            post_connect_hand_raise_delay: Duration::from_millis(800),
        }
    }
}

/// Broker reconnect delay for attempt `n` (1-indexed): `min(base*2^(n-1), cap) + jitter(0,1s)`.
pub fn broker_reconnect_delay(cfg: &EngineConfig, attempt: u32) -> Duration {
    let exp = cfg.broker_reconnect_base.as_millis() as u64 * (1u64 << attempt.saturating_sub(1).min(20));
    let capped = exp.min(cfg.broker_reconnect_cap.as_millis() as u64);
    let jitter = rand::random::<u64>() % 1000;
    Duration::from_millis(capped + jitter)
}

/// ICE restart retry delay for attempt `n` (1-indexed): `base*2^(n-1)`.
pub fn ice_restart_retry_delay(cfg: &EngineConfig, attempt: u32) -> Duration {
    let millis = cfg.ice_restart_retry_base.as_millis() as u64 * (1u64 << attempt.saturating_sub(1).min(20));
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_timings() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.heartbeat_timeout, Duration::from_secs(15));
        assert_eq!(cfg.max_ice_restart_attempts, 3);
        assert_eq!(cfg.dedup_capacity, 500);
    }

    #[test]
    fn broker_backoff_caps_at_30s() {
        let cfg = EngineConfig::default();
        let d = broker_reconnect_delay(&cfg, 10);
        assert!(d.as_millis() as u64 >= 30_000);
        assert!(d.as_millis() as u64 <= 31_000);
    }

    #[test]
    fn ice_restart_backoff_doubles() {
        let cfg = EngineConfig::default();
        assert_eq!(ice_restart_retry_delay(&cfg, 1), Duration::from_millis(1000));
        assert_eq!(ice_restart_retry_delay(&cfg, 2), Duration::from_millis(2000));
        assert_eq!(ice_restart_retry_delay(&cfg, 3), Duration::from_millis(4000));
    }
}
