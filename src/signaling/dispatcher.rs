//! Inbound envelope filter.

use super::envelope::{Envelope, EnvelopeKind};

/// What the room should do with a freshly-decoded inbound envelope, after
/// self/target filtering and ping/pong interception.
pub enum Action {
    /// `from == selfId`, or `to` is set and isn't us.
    Drop,
    /// A `pong`: updates liveness for `peer_id`, nothing else.
    RecordLiveness { peer_id: String },
    /// A `ping`: records liveness for `peer_id` and expects a `pong` reply.
    ReplyPong { peer_id: String },
    /// Anything else, routed on to the per-type handlers.
    Forward(Envelope),
}

pub fn route_inbound(envelope: Envelope, self_id: &str) -> Action {
    if envelope.from == self_id {
        return Action::Drop;
    }
    if let Some(to) = &envelope.to {
        if to != self_id {
            return Action::Drop;
        }
    }
    match envelope.kind {
        EnvelopeKind::Pong => Action::RecordLiveness { peer_id: envelope.from },
        EnvelopeKind::Ping => Action::ReplyPong { peer_id: envelope.from },
        _ => Action::Forward(envelope),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_own_envelope() {
        let envelope = Envelope::new(EnvelopeKind::Announce, "self");
        assert!(matches!(route_inbound(envelope, "self"), Action::Drop));
    }

    #[test]
    fn drops_envelope_targeted_at_someone_else() {
        let envelope = Envelope::new(EnvelopeKind::Announce, "peer-a").to("peer-b");
        assert!(matches!(route_inbound(envelope, "self"), Action::Drop));
    }

    #[test]
    fn forwards_untargeted_envelope() {
        let envelope = Envelope::new(EnvelopeKind::Announce, "peer-a");
        assert!(matches!(route_inbound(envelope, "self"), Action::Forward(_)));
    }

    #[test]
    fn forwards_envelope_targeted_at_self() {
        let envelope = Envelope::new(EnvelopeKind::Leave, "peer-a").to("self");
        assert!(matches!(route_inbound(envelope, "self"), Action::Forward(_)));
    }

    #[test]
    fn ping_replies_and_pong_records_liveness() {
        let ping = Envelope::new(EnvelopeKind::Ping, "peer-a");
        match route_inbound(ping, "self") {
            Action::ReplyPong { peer_id } => assert_eq!(peer_id, "peer-a"),
            _ => panic!("expected ReplyPong"),
        }

        let pong = Envelope::new(EnvelopeKind::Pong, "peer-a");
        match route_inbound(pong, "self") {
            Action::RecordLiveness { peer_id } => assert_eq!(peer_id, "peer-a"),
            _ => panic!("expected RecordLiveness"),
        }
    }
}
