//! Hand-rolled MQTT 3.1.1 framing and a single-broker WebSocket client.
//!
//! Brokers speak MQTT-over-WebSocket with no library available for it in
//! this stack, so the wire format is framed by hand: [`varint`] for the
//! remaining-length codec, [`packet`] for packet encode/decode, [`client`]
//! for the connection itself.

pub mod client;
pub mod packet;
pub mod varint;

pub use client::{DisconnectHandler, MessageHandler, MqttClient};
