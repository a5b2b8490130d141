//! Fan-out transport across every configured broker.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{broker_reconnect_delay, EngineConfig};
use crate::credentials::BrokerSpec;
use crate::id::SessionIdGenerator;
use crate::mqtt::MqttClient;

static CLIENT_ID_GEN: SessionIdGenerator = SessionIdGenerator::new();

type MessageCb = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;
type ReconnectCb = Arc<dyn Fn(&str) + Send + Sync>;

struct BrokerHandle {
    spec: BrokerSpec,
    client: Mutex<Option<Arc<MqttClient>>>,
    reconnect_attempts: Mutex<u32>,
}

/// Connects to, subscribes across, and publishes over every broker in
/// parallel, deduplicating at the dispatcher layer above this and
/// reconnecting each broker independently on accidental disconnect.
pub struct MultiBrokerTransport {
    cfg: EngineConfig,
    brokers: Vec<Arc<BrokerHandle>>,
    subscribed_topic: Arc<Mutex<Option<String>>>,
    on_message: MessageCb,
    on_reconnect: ReconnectCb,
}

impl MultiBrokerTransport {
    pub fn new(cfg: EngineConfig, brokers: Vec<BrokerSpec>, on_message: MessageCb, on_reconnect: ReconnectCb) -> Self {
        Self {
            cfg,
            brokers: brokers
                .into_iter()
                .map(|spec| {
                    Arc::new(BrokerHandle {
                        spec,
                        client: Mutex::new(None),
                        reconnect_attempts: Mutex::new(0),
                    })
                })
                .collect(),
            subscribed_topic: Arc::new(Mutex::new(None)),
            on_message,
            on_reconnect,
        }
    }

    /// Connects to every broker in parallel (`allSettled` semantics: one
    /// broker's failure never aborts the others) and returns the urls that
    /// succeeded.
    pub async fn connect_all(&self) -> Vec<String> {
        let futures = self.brokers.iter().map(|handle| self.connect_one(handle.clone()));
        futures_util::future::join_all(futures)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    async fn connect_one(&self, handle: Arc<BrokerHandle>) -> Option<String> {
        let client = connect_and_wire(
            &handle,
            &self.cfg,
            self.on_message.clone(),
            self.on_reconnect.clone(),
            self.subscribed_topic.clone(),
        )
        .await?;
        *handle.client.lock() = Some(client);
        Some(handle.spec.url.clone())
    }

    /// Subscribes `topic` across every connected broker. Returns the count
    /// of brokers that acknowledged the subscription.
    pub async fn subscribe_all(&self, topic: &str) -> usize {
        *self.subscribed_topic.lock() = Some(topic.to_string());
        let futures = self.brokers.iter().map(|handle| async move {
            let client = handle.client.lock().clone();
            match client {
                Some(client) if client.is_connected() => client.subscribe(topic).await.is_ok(),
                _ => false,
            }
        });
        futures_util::future::join_all(futures).await.into_iter().filter(|ok| *ok).count()
    }

    /// Publishes on every broker that is both connected and subscribed.
    /// Returns the count of brokers that accepted the send.
    pub async fn publish(&self, topic: &str, payload: &[u8]) -> usize {
        let futures = self.brokers.iter().map(|handle| async move {
            let client = handle.client.lock().clone();
            match client {
                Some(client) if client.is_connected() && client.is_subscribed(topic) => {
                    client.publish(topic, payload).await.is_ok()
                }
                _ => false,
            }
        });
        futures_util::future::join_all(futures).await.into_iter().filter(|ok| *ok).count()
    }

    pub async fn disconnect_all(&self) {
        for handle in &self.brokers {
            let client = handle.client.lock().take();
            if let Some(client) = client {
                client.disconnect().await;
            }
        }
    }

    pub fn connected_count(&self) -> usize {
        self.brokers
            .iter()
            .filter(|h| h.client.lock().as_ref().map(|c| c.is_connected()).unwrap_or(false))
            .count()
    }
}

fn connect_and_wire<'a>(
    handle: &'a Arc<BrokerHandle>,
    cfg: &'a EngineConfig,
    on_message: MessageCb,
    on_reconnect: ReconnectCb,
    subscribed_topic: Arc<Mutex<Option<String>>>,
) -> Pin<Box<dyn Future<Output = Option<Arc<MqttClient>>> + Send + 'a>> {
    Box::pin(async move {
        let client_id = format!("p2p-conf-{}", CLIENT_ID_GEN.next());
        let client = MqttClient::connect(
            cfg,
            &handle.spec.url,
            &client_id,
            handle.spec.username.as_deref(),
            handle.spec.password.as_deref(),
        )
        .await
        .ok()?;
        let client = Arc::new(client);

        client.set_on_message({
            let on_message = on_message.clone();
            Box::new(move |topic, payload| on_message(topic, payload))
        });

        let handle = handle.clone();
        let cfg = cfg.clone();
        client.set_on_disconnect(Box::new(move |intentional| {
            if intentional {
                return;
            }
            let handle = handle.clone();
            let cfg = cfg.clone();
            let on_message = on_message.clone();
            let on_reconnect = on_reconnect.clone();
            let subscribed_topic = subscribed_topic.clone();
            tokio::spawn(async move {
                schedule_reconnect(handle, cfg, on_message, on_reconnect, subscribed_topic).await;
            });
        }));

        Some(client)
    })
}

/// Reconnects one broker on accidental disconnect. A successful reconnect
/// that fails to resubscribe the current topic is treated as another
/// disconnect and reschedules itself.
async fn schedule_reconnect(
    handle: Arc<BrokerHandle>,
    cfg: EngineConfig,
    on_message: MessageCb,
    on_reconnect: ReconnectCb,
    subscribed_topic: Arc<Mutex<Option<String>>>,
) {
    loop {
        let attempt = {
            let mut attempts = handle.reconnect_attempts.lock();
            *attempts += 1;
            *attempts
        };
        if attempt > cfg.max_broker_reconnect_attempts {
            log::warn!("broker {} exhausted reconnect attempts", handle.spec.url);
            return;
        }
        tokio::time::sleep(broker_reconnect_delay(&cfg, attempt)).await;

        let client = match connect_and_wire(&handle, &cfg, on_message.clone(), on_reconnect.clone(), subscribed_topic.clone()).await {
            Some(c) => c,
            None => continue,
        };

        let topic = subscribed_topic.lock().clone();
        let resubscribed = match topic {
            Some(topic) => client.subscribe(&topic).await.is_ok(),
            None => true,
        };
        if !resubscribed {
            continue;
        }

        *handle.client.lock() = Some(client);
        *handle.reconnect_attempts.lock() = 0;
        on_reconnect(&handle.spec.url);
        return;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_attempts_start_at_zero() {
        let handle = BrokerHandle {
            spec: BrokerSpec {
                url: "wss://example.com".to_string(),
                username: None,
                password: None,
            },
            client: Mutex::new(None),
            reconnect_attempts: Mutex::new(0),
        };
        assert_eq!(*handle.reconnect_attempts.lock(), 0);
    }
}
