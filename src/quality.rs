//! Connection-quality grading from a WebRTC stats snapshot.

use webrtc::stats::StatsReportType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl Quality {
    pub fn as_str(self) -> &'static str {
        match self {
            Quality::Excellent => "excellent",
            Quality::Good => "good",
            Quality::Fair => "fair",
            Quality::Poor => "poor",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Other,
}

/// Raw numbers pulled out of `webrtc::stats::StatsReport` for the
/// selected candidate pair and the audio in/out RTP stats. Kept as plain
/// fields rather than the full stats enum so the grading function stays a
/// pure, independently testable transform.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsSnapshot {
    pub current_round_trip_time: Option<f64>,
    pub total_round_trip_time: f64,
    pub responses_received: u64,
    pub packets_received: u64,
    pub packets_lost: u64,
    pub jitter: f64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PreviousStats {
    pub packets_received: u64,
    pub packets_lost: u64,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone)]
pub struct QualityReport {
    pub peer_id: String,
    pub rtt_ms: i64,
    pub packet_loss_pct: f64,
    pub jitter_ms: i64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub quality: Quality,
    pub connected: bool,
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn grade(rtt_ms: i64, loss_pct: f64, jitter_ms: i64) -> Quality {
    if rtt_ms > 300 || loss_pct > 5.0 || jitter_ms > 50 {
        Quality::Poor
    } else if rtt_ms > 200 || loss_pct > 2.0 || jitter_ms > 30 {
        Quality::Fair
    } else if rtt_ms > 100 || loss_pct > 1.0 || jitter_ms > 15 {
        Quality::Good
    } else {
        Quality::Excellent
    }
}

/// Computes a [`QualityReport`] from a stats snapshot and the connection
/// state, updating `previous` in place for the next call's delta
/// computation.
pub fn compute(
    peer_id: &str,
    state: ConnectionState,
    snapshot: &StatsSnapshot,
    previous: &mut Option<PreviousStats>,
) -> QualityReport {
    if state != ConnectionState::Connected {
        return QualityReport {
            peer_id: peer_id.to_string(),
            rtt_ms: 0,
            packet_loss_pct: 0.0,
            jitter_ms: 0,
            bytes_received: 0,
            bytes_sent: 0,
            quality: Quality::Fair,
            connected: false,
        };
    }

    let rtt_ms = match snapshot.current_round_trip_time {
        Some(rtt) if rtt > 0.0 => rtt * 1000.0,
        _ if snapshot.responses_received > 0 => {
            (snapshot.total_round_trip_time / snapshot.responses_received as f64) * 1000.0
        }
        _ => 0.0,
    };
    let jitter_ms = snapshot.jitter * 1000.0;

    let loss_pct = match *previous {
        Some(prev) if snapshot.timestamp_ms > prev.timestamp_ms => {
            let delta_received = snapshot.packets_received.saturating_sub(prev.packets_received);
            let delta_lost = snapshot.packets_lost.saturating_sub(prev.packets_lost);
            let denom = delta_received + delta_lost;
            if denom == 0 {
                0.0
            } else {
                (delta_lost as f64 / denom as f64) * 100.0
            }
        }
        _ => {
            let denom = snapshot.packets_received + snapshot.packets_lost;
            if denom == 0 {
                0.0
            } else {
                (snapshot.packets_lost as f64 / denom as f64) * 100.0
            }
        }
    };
    let loss_pct = loss_pct.clamp(0.0, 100.0);

    *previous = Some(PreviousStats {
        packets_received: snapshot.packets_received,
        packets_lost: snapshot.packets_lost,
        timestamp_ms: snapshot.timestamp_ms,
    });

    let rtt_rounded = rtt_ms.round() as i64;
    let jitter_rounded = jitter_ms.round() as i64;
    let loss_rounded = round_to(loss_pct, 2);

    QualityReport {
        peer_id: peer_id.to_string(),
        rtt_ms: rtt_rounded,
        packet_loss_pct: loss_rounded,
        jitter_ms: jitter_rounded,
        bytes_received: snapshot.bytes_received,
        bytes_sent: snapshot.bytes_sent,
        quality: grade(rtt_rounded, loss_rounded, jitter_rounded),
        connected: true,
    }
}

/// Pulls RTT/loss/jitter/bytes inputs out of a raw `webrtc::stats::StatsReport`
/// for the currently selected candidate pair plus the audio in/out RTP
/// stats, per spec: prefer `transport.selectedCandidatePairId`, fall back
/// to any pair that is `nominated` or in the `succeeded` state.
pub fn extract_snapshot(report: &webrtc::stats::StatsReport) -> StatsSnapshot {
    let mut snapshot = StatsSnapshot::default();
    let reports = &report.reports;

    let selected_pair_id = reports.values().find_map(|report| match report {
        StatsReportType::Transport(transport) if !transport.selected_candidate_pair_id.is_empty() => {
            Some(transport.selected_candidate_pair_id.clone())
        }
        _ => None,
    });

    let selected_pair = selected_pair_id
        .and_then(|id| reports.get(&id))
        .and_then(|report| match report {
            StatsReportType::CandidatePair(pair) => Some(pair),
            _ => None,
        })
        .or_else(|| {
            reports.values().find_map(|report| match report {
                StatsReportType::CandidatePair(pair)
                    if pair.nominated || format!("{:?}", pair.state).eq_ignore_ascii_case("succeeded") =>
                {
                    Some(pair)
                }
                _ => None,
            })
        });

    if let Some(pair) = selected_pair {
        snapshot.current_round_trip_time = Some(pair.current_round_trip_time);
        snapshot.total_round_trip_time = pair.total_round_trip_time;
        snapshot.responses_received = pair.responses_received as u64;
    }

    for report in reports.values() {
        match report {
            StatsReportType::InboundRTP(inbound) if inbound.kind == "audio" => {
                snapshot.packets_received = inbound.packets_received as u64;
                snapshot.packets_lost = inbound.packets_lost.max(0) as u64;
                snapshot.jitter = inbound.jitter;
                snapshot.bytes_received = inbound.bytes_received;
            }
            StatsReportType::OutboundRTP(outbound) if outbound.kind == "audio" => {
                snapshot.bytes_sent = outbound.bytes_sent;
            }
            _ => {}
        }
    }

    snapshot.timestamp_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnected_state_returns_zeros_and_fair() {
        let mut prev = None;
        let report = compute("p", ConnectionState::Other, &StatsSnapshot::default(), &mut prev);
        assert_eq!(report.rtt_ms, 0);
        assert_eq!(report.quality, Quality::Fair);
        assert!(prev.is_none());
    }

    #[test]
    fn s6_poor_quality_scenario() {
        let snapshot = StatsSnapshot {
            current_round_trip_time: Some(0.4),
            packets_received: 1000,
            packets_lost: 5,
            jitter: 0.005,
            timestamp_ms: 1000,
            ..Default::default()
        };
        let mut prev = None;
        let report = compute("p", ConnectionState::Connected, &snapshot, &mut prev);
        assert_eq!(report.rtt_ms, 400);
        assert!((report.packet_loss_pct - 0.5).abs() < 0.01);
        assert_eq!(report.jitter_ms, 5);
        assert_eq!(report.quality, Quality::Poor);
    }

    #[test]
    fn s6_excellent_quality_scenario() {
        let snapshot = StatsSnapshot {
            current_round_trip_time: Some(0.05),
            packets_received: 1000,
            packets_lost: 5,
            jitter: 0.005,
            timestamp_ms: 1000,
            ..Default::default()
        };
        let mut prev = None;
        let report = compute("p", ConnectionState::Connected, &snapshot, &mut prev);
        assert_eq!(report.quality, Quality::Excellent);
    }

    #[test]
    fn zero_denominator_loss_is_zero() {
        let snapshot = StatsSnapshot {
            current_round_trip_time: Some(0.01),
            timestamp_ms: 1000,
            ..Default::default()
        };
        let mut prev = None;
        let report = compute("p", ConnectionState::Connected, &snapshot, &mut prev);
        assert_eq!(report.packet_loss_pct, 0.0);
    }

    #[test]
    fn delta_formula_used_on_second_call_with_newer_timestamp() {
        let mut prev = Some(PreviousStats { packets_received: 100, packets_lost: 0, timestamp_ms: 1000 });
        let snapshot = StatsSnapshot {
            current_round_trip_time: Some(0.01),
            packets_received: 150,
            packets_lost: 10,
            timestamp_ms: 2000,
            ..Default::default()
        };
        let report = compute("p", ConnectionState::Connected, &snapshot, &mut prev);
        // delta received = 50, delta lost = 10 -> 10/60 * 100
        assert!((report.packet_loss_pct - 16.67).abs() < 0.1);
    }

    #[test]
    fn quality_ordering_respects_dominance() {
        let good = grade(50, 0.5, 5);
        let worse = grade(150, 0.5, 5);
        assert_eq!(good, Quality::Excellent);
        assert_eq!(worse, Quality::Good);
    }

    #[test]
    fn packet_loss_never_exceeds_100() {
        let mut prev = None;
        let snapshot = StatsSnapshot {
            current_round_trip_time: Some(0.01),
            packets_received: 0,
            packets_lost: 50,
            timestamp_ms: 1000,
            ..Default::default()
        };
        let report = compute("p", ConnectionState::Connected, &snapshot, &mut prev);
        assert!(report.packet_loss_pct <= 100.0);
    }
}
