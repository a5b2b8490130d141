//! Same-origin multicast: a process-local broadcast bus used as a parallel
//! transport for the same envelopes brokers carry.

use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

/// One end of an in-process pub/sub bus. Multiple rooms in the same process
/// (e.g. two windows sharing an origin) can see each other's envelopes by
/// sharing a [`MulticastChannel`] constructed from the same registry key;
/// construction itself never fails in this implementation, but callers that
/// wire one up still treat it as optional, since a host environment without
/// in-process sharing may decline to offer one.
pub struct MulticastChannel {
    tx: broadcast::Sender<Vec<u8>>,
}

impl MulticastChannel {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn sender(&self) -> MulticastSender {
        MulticastSender { tx: self.tx.clone() }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Vec<u8>> {
        self.tx.subscribe()
    }
}

impl Default for MulticastChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct MulticastSender {
    tx: broadcast::Sender<Vec<u8>>,
}

impl MulticastSender {
    /// Best-effort: a channel with no active subscribers returns an error
    /// from the underlying broadcast, which this treats as a no-op rather
    /// than propagating a transport failure.
    pub fn send(&self, envelope_bytes: Vec<u8>) {
        let _ = self.tx.send(envelope_bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_sent_envelope() {
        let channel = MulticastChannel::new();
        let mut rx = channel.subscribe();
        channel.sender().send(b"hello".to_vec());
        let received = rx.recv().await.unwrap();
        assert_eq!(received, b"hello");
    }

    #[test]
    fn send_without_subscribers_does_not_panic() {
        let channel = MulticastChannel::new();
        channel.sender().send(b"nobody listening".to_vec());
    }
}
