//! Single-broker MQTT-over-WebSocket client.
//!
//! One client owns one WebSocket connection to one broker URL. Connect,
//! subscribe and publish all go through this client; [`crate::transport`]
//! fans the same operations out across every configured broker.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::packet::{
    build_connect, build_disconnect, build_pingreq, build_publish, build_subscribe, is_pingresp,
    packet_type, parse_connack, parse_publish, parse_suback, ConnAckCode, PacketType, RecvBuffer,
};
use crate::config::EngineConfig;
use crate::error::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;

pub type MessageHandler = Box<dyn Fn(&str, &[u8]) + Send + Sync>;
pub type DisconnectHandler = Box<dyn Fn(bool) + Send + Sync>;

struct Shared {
    url: String,
    connected: AtomicBool,
    subscribed: Mutex<HashSet<String>>,
    message_count: AtomicU64,
    next_packet_id: AtomicU16,
    pending_suback: Mutex<HashMap<u16, oneshot::Sender<u16>>>,
    on_message: Mutex<Option<MessageHandler>>,
    on_disconnect: Mutex<Option<DisconnectHandler>>,
    intentional_close: AtomicBool,
    subscribe_timeout: Duration,
}

/// A connected client. Dropping it does not send DISCONNECT; call
/// [`MqttClient::disconnect`] explicitly for a clean close.
pub struct MqttClient {
    shared: Arc<Shared>,
    writer: Arc<tokio::sync::Mutex<WsWriter>>,
}

impl MqttClient {
    /// Connects, sends CONNECT, and waits for CONNACK, all within
    /// `cfg.mqtt_connect_timeout`.
    pub async fn connect(
        cfg: &EngineConfig,
        url: &str,
        client_id: &str,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<Self> {
        let connect_timeout = cfg.mqtt_connect_timeout;
        let protocol_keepalive_secs = cfg.mqtt_keepalive.as_secs() as u16;

        let ws_stream = timeout(connect_timeout, connect_async(url))
            .await
            .map_err(|_| Error::BrokerConnectTimeout { url: url.to_string() })?
            .map_err(|e| Error::BrokerWebSocket {
                url: url.to_string(),
                reason: e.to_string(),
            })?
            .0;

        let (mut writer, reader) = ws_stream.split();

        let connect_packet = build_connect(client_id, username, password, protocol_keepalive_secs);
        writer
            .send(Message::Binary(connect_packet))
            .await
            .map_err(|e| Error::BrokerWebSocket {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let shared = Arc::new(Shared {
            url: url.to_string(),
            connected: AtomicBool::new(false),
            subscribed: Mutex::new(HashSet::new()),
            message_count: AtomicU64::new(0),
            next_packet_id: AtomicU16::new(1),
            pending_suback: Mutex::new(HashMap::new()),
            on_message: Mutex::new(None),
            on_disconnect: Mutex::new(None),
            intentional_close: AtomicBool::new(false),
            subscribe_timeout: cfg.mqtt_subscribe_timeout,
        });

        let (connack_tx, connack_rx) = oneshot::channel();
        let writer = Arc::new(tokio::sync::Mutex::new(writer));

        spawn_reader(shared.clone(), reader, Some(connack_tx));
        spawn_keepalive(shared.clone(), writer.clone(), cfg.mqtt_ping_interval);

        let connack = timeout(connect_timeout, connack_rx)
            .await
            .map_err(|_| Error::BrokerConnectTimeout { url: url.to_string() })?
            .map_err(|_| Error::BrokerWebSocket {
                url: url.to_string(),
                reason: "connection closed before CONNACK".to_string(),
            })?;

        match connack {
            ConnAckCode::Accepted => {}
            ConnAckCode::Refused(code) => {
                return Err(Error::BrokerWebSocket {
                    url: url.to_string(),
                    reason: format!("CONNACK refused, code {code}"),
                })
            }
        }
        shared.connected.store(true, Ordering::SeqCst);

        Ok(Self { shared, writer })
    }

    pub fn set_on_message(&self, handler: MessageHandler) {
        *self.shared.on_message.lock() = Some(handler);
    }

    pub fn set_on_disconnect(&self, handler: DisconnectHandler) {
        *self.shared.on_disconnect.lock() = Some(handler);
    }

    /// Subscribes at QoS 0, waiting up to 5s for the matching SUBACK.
    pub async fn subscribe(&self, topic: &str) -> Result<()> {
        let packet_id = self.shared.next_packet_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.shared.pending_suback.lock().insert(packet_id, tx);

        self.writer
            .lock()
            .await
            .send(Message::Binary(build_subscribe(packet_id, topic)))
            .await
            .map_err(|e| Error::BrokerWebSocket {
                url: self.shared.url.clone(),
                reason: e.to_string(),
            })?;

        match timeout(self.shared.subscribe_timeout, rx).await {
            Ok(Ok(_)) => {
                self.shared.subscribed.lock().insert(topic.to_string());
                Ok(())
            }
            _ => {
                self.shared.pending_suback.lock().remove(&packet_id);
                Err(Error::SubscribeFailed { topic: topic.to_string() })
            }
        }
    }

    pub async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::BrokerNotConnected {
                url: self.shared.url.clone(),
            });
        }
        self.writer
            .lock()
            .await
            .send(Message::Binary(build_publish(topic, payload)))
            .await
            .map_err(|e| Error::BrokerWebSocket {
                url: self.shared.url.clone(),
                reason: e.to_string(),
            })
    }

    /// Sends DISCONNECT and marks the close as intentional, so the
    /// disconnect callback reports `intentional = true` rather than
    /// triggering reconnect logic upstream.
    pub async fn disconnect(&self) {
        self.shared.intentional_close.store(true, Ordering::SeqCst);
        let _ = self.writer.lock().await.send(Message::Binary(build_disconnect())).await;
        let _ = self.writer.lock().await.close().await;
        self.shared.connected.store(false, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.shared.subscribed.lock().contains(topic)
    }

    pub fn message_count(&self) -> u64 {
        self.shared.message_count.load(Ordering::SeqCst)
    }
}

fn spawn_keepalive(shared: Arc<Shared>, writer: Arc<tokio::sync::Mutex<WsWriter>>, ping_interval: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(ping_interval);
        interval.tick().await; // first tick fires immediately, skip it
        loop {
            interval.tick().await;
            if !shared.connected.load(Ordering::SeqCst) {
                break;
            }
            if writer
                .lock()
                .await
                .send(Message::Binary(build_pingreq()))
                .await
                .is_err()
            {
                break;
            }
        }
    });
}

fn spawn_reader(
    shared: Arc<Shared>,
    mut reader: futures_util::stream::SplitStream<WsStream>,
    mut connack_tx: Option<oneshot::Sender<ConnAckCode>>,
) {
    tokio::spawn(async move {
        let mut recv_buf = RecvBuffer::new();
        while let Some(msg) = reader.next().await {
            let bytes = match msg {
                Ok(Message::Binary(b)) => b,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(_) => break,
            };
            recv_buf.feed(&bytes);
            let packets = match recv_buf.drain_packets() {
                Ok(p) => p,
                Err(_) => break,
            };
            for packet in packets {
                match packet_type(packet.first_byte) {
                    PacketType::ConnAck => {
                        if let Some(code) = parse_connack(&packet.body) {
                            if let Some(tx) = connack_tx.take() {
                                let _ = tx.send(code);
                            }
                        }
                    }
                    PacketType::SubAck => {
                        if let Some(packet_id) = parse_suback(&packet.body) {
                            if let Some(tx) = shared.pending_suback.lock().remove(&packet_id) {
                                let _ = tx.send(packet_id);
                            }
                        }
                    }
                    PacketType::Publish { qos } => {
                        if let Some(publish) = parse_publish(&packet.body, qos) {
                            shared.message_count.fetch_add(1, Ordering::SeqCst);
                            if let Some(handler) = shared.on_message.lock().as_ref() {
                                handler(&publish.topic, &publish.payload);
                            }
                        }
                    }
                    PacketType::PingResp => {}
                    PacketType::Other(_) if is_pingresp(packet.first_byte) => {}
                    PacketType::Other(_) => {}
                }
            }
        }
        shared.connected.store(false, Ordering::SeqCst);
        let intentional = shared.intentional_close.load(Ordering::SeqCst);
        if let Some(handler) = shared.on_disconnect.lock().as_ref() {
            handler(intentional);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_client_shared_state_defaults() {
        let shared = Shared {
            url: "wss://example.com".to_string(),
            connected: AtomicBool::new(false),
            subscribed: Mutex::new(HashSet::new()),
            message_count: AtomicU64::new(0),
            next_packet_id: AtomicU16::new(1),
            pending_suback: Mutex::new(HashMap::new()),
            on_message: Mutex::new(None),
            on_disconnect: Mutex::new(None),
            intentional_close: AtomicBool::new(false),
            subscribe_timeout: Duration::from_secs(5),
        };
        assert!(!shared.connected.load(Ordering::SeqCst));
        assert_eq!(shared.message_count.load(Ordering::SeqCst), 0);
        assert_eq!(shared.next_packet_id.load(Ordering::SeqCst), 1);
    }
}
