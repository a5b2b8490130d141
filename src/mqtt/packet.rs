//! MQTT 3.1.1 packet encode/decode.
//!
//! Packet type bytes used: CONNECT (0x10), CONNACK (0x20), PUBLISH (0x30
//! QoS 0, 0x32 QoS 1 receive-only), SUBSCRIBE (0x82), SUBACK (0x90),
//! PINGREQ (0xC0), PINGRESP (0xD0), DISCONNECT (0xE0).

use super::varint::{decode_remaining_length, encode_remaining_length};

const PROTOCOL_NAME: &str = "MQTT";
const PROTOCOL_LEVEL: u8 = 4;

fn encode_utf8_string(out: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    out.extend_from_slice(bytes);
}

/// Builds a CONNECT packet: clean-session set, optional username/password,
/// fixed 30s keepalive.
pub fn build_connect(client_id: &str, username: Option<&str>, password: Option<&str>, keepalive_secs: u16) -> Vec<u8> {
    let mut variable_and_payload = Vec::new();
    encode_utf8_string(&mut variable_and_payload, PROTOCOL_NAME);
    variable_and_payload.push(PROTOCOL_LEVEL);

    let mut flags: u8 = 0x02; // clean session
    if username.is_some() {
        flags |= 0x80;
    }
    if password.is_some() {
        flags |= 0x40;
    }
    variable_and_payload.push(flags);
    variable_and_payload.extend_from_slice(&keepalive_secs.to_be_bytes());

    encode_utf8_string(&mut variable_and_payload, client_id);
    if let Some(u) = username {
        encode_utf8_string(&mut variable_and_payload, u);
    }
    if let Some(p) = password {
        encode_utf8_string(&mut variable_and_payload, p);
    }

    let mut packet = vec![0x10];
    packet.extend(encode_remaining_length(variable_and_payload.len() as u32));
    packet.extend(variable_and_payload);
    packet
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnAckCode {
    Accepted,
    Refused(u8),
}

/// Parses a CONNACK body (the 2 bytes after the fixed header).
pub fn parse_connack(body: &[u8]) -> Option<ConnAckCode> {
    if body.len() < 2 {
        return None;
    }
    Some(match body[1] {
        0 => ConnAckCode::Accepted,
        code => ConnAckCode::Refused(code),
    })
}

/// Builds a SUBSCRIBE packet (QoS 0 only).
pub fn build_subscribe(packet_id: u16, topic: &str) -> Vec<u8> {
    let mut variable_and_payload = Vec::new();
    variable_and_payload.extend_from_slice(&packet_id.to_be_bytes());
    encode_utf8_string(&mut variable_and_payload, topic);
    variable_and_payload.push(0x00); // QoS 0

    let mut packet = vec![0x82];
    packet.extend(encode_remaining_length(variable_and_payload.len() as u32));
    packet.extend(variable_and_payload);
    packet
}

/// Parses a SUBACK body, returning the acknowledged packet id.
pub fn parse_suback(body: &[u8]) -> Option<u16> {
    if body.len() < 2 {
        return None;
    }
    Some(u16::from_be_bytes([body[0], body[1]]))
}

/// Builds a QoS 0 PUBLISH packet.
pub fn build_publish(topic: &str, payload: &[u8]) -> Vec<u8> {
    let mut variable_and_payload = Vec::new();
    encode_utf8_string(&mut variable_and_payload, topic);
    variable_and_payload.extend_from_slice(payload);

    let mut packet = vec![0x30];
    packet.extend(encode_remaining_length(variable_and_payload.len() as u32));
    packet.extend(variable_and_payload);
    packet
}

/// A received PUBLISH, with the 2 packet-id bytes already skipped for QoS 1.
#[derive(Debug, Clone)]
pub struct ReceivedPublish {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
}

/// Parses a PUBLISH body. `qos` comes from the fixed-header flags (bits 1-2
/// of the first byte), passed in by the caller since the body alone can't
/// recover it.
pub fn parse_publish(body: &[u8], qos: u8) -> Option<ReceivedPublish> {
    if body.len() < 2 {
        return None;
    }
    let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
    let mut offset = 2 + topic_len;
    if body.len() < offset {
        return None;
    }
    let topic = String::from_utf8(body[2..offset].to_vec()).ok()?;

    if qos >= 1 {
        if body.len() < offset + 2 {
            return None;
        }
        offset += 2; // skip packet id
    }

    let payload = body[offset..].to_vec();
    Some(ReceivedPublish { topic, payload, qos })
}

pub fn build_pingreq() -> Vec<u8> {
    vec![0xC0, 0x00]
}

pub fn is_pingresp(fixed_header_byte: u8) -> bool {
    fixed_header_byte == 0xD0
}

pub fn build_disconnect() -> Vec<u8> {
    vec![0xE0, 0x00]
}

/// High-level fixed-header packet type, extracted from the first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    ConnAck,
    Publish { qos: u8 },
    SubAck,
    PingResp,
    Other(u8),
}

pub fn packet_type(first_byte: u8) -> PacketType {
    match first_byte & 0xF0 {
        0x20 => PacketType::ConnAck,
        0x30 => PacketType::Publish {
            qos: (first_byte >> 1) & 0x03,
        },
        0x90 => PacketType::SubAck,
        0xD0 => PacketType::PingResp,
        other => PacketType::Other(other),
    }
}

/// TCP-style receive buffer: accumulates raw bytes (each WS binary frame is
/// fed in via [`RecvBuffer::feed`]) and yields complete MQTT packets as soon
/// as enough bytes have arrived, the same way a raw TCP stream would.
#[derive(Debug, Default)]
pub struct RecvBuffer {
    buf: Vec<u8>,
}

/// One fully-framed packet pulled off the wire: its type byte and the
/// remaining-length body (with the fixed header stripped).
#[derive(Debug, Clone)]
pub struct RawPacket {
    pub first_byte: u8,
    pub body: Vec<u8>,
}

impl RecvBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pulls as many complete packets as are currently available. On a
    /// framing error (5-byte varint) the buffer is discarded entirely and
    /// an error is returned alongside whatever packets were already parsed.
    pub fn drain_packets(&mut self) -> Result<Vec<RawPacket>, &'static str> {
        let mut out = Vec::new();
        loop {
            if self.buf.is_empty() {
                break;
            }
            let first_byte = self.buf[0];
            match decode_remaining_length(&self.buf[1..]) {
                Ok(Some((len, varint_len))) => {
                    let header_len = 1 + varint_len;
                    let total_len = header_len + len as usize;
                    if self.buf.len() < total_len {
                        break; // wait for more bytes
                    }
                    let body = self.buf[header_len..total_len].to_vec();
                    self.buf.drain(0..total_len);
                    out.push(RawPacket { first_byte, body });
                }
                Ok(None) => break, // varint incomplete, wait for more bytes
                Err(e) => {
                    self.buf.clear();
                    return Err(e);
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_packet_bit_exact() {
        let packet = build_connect("abc", None, None, 30);
        assert_eq!(packet[0], 0x10);
        // variable header: "MQTT" (2+4) + level(1) + flags(1) + keepalive(2) = 10
        // payload: client id (2+3) = 5
        assert_eq!(packet[1], 15);
        assert_eq!(&packet[2..4], &[0x00, 0x04]);
        assert_eq!(&packet[4..8], b"MQTT");
        assert_eq!(packet[8], 4);
        assert_eq!(packet[9], 0x02); // clean session only
        assert_eq!(&packet[10..12], &30u16.to_be_bytes());
        assert_eq!(&packet[12..14], &[0x00, 0x03]);
        assert_eq!(&packet[14..17], b"abc");
    }

    #[test]
    fn connect_with_credentials_sets_flags() {
        let packet = build_connect("c", Some("u"), Some("p"), 30);
        assert_eq!(packet[9], 0x02 | 0x80 | 0x40);
    }

    #[test]
    fn publish_roundtrip_qos0() {
        let packet = build_publish("p2p-conf/room", b"hello");
        let mut rb = RecvBuffer::new();
        rb.feed(&packet);
        let parsed = rb.drain_packets().unwrap();
        assert_eq!(parsed.len(), 1);
        let pub_msg = parse_publish(&parsed[0].body, 0).unwrap();
        assert_eq!(pub_msg.topic, "p2p-conf/room");
        assert_eq!(pub_msg.payload, b"hello");
    }

    #[test]
    fn publish_qos1_skips_packet_id() {
        let mut body = Vec::new();
        encode_utf8_string(&mut body, "t");
        body.extend_from_slice(&42u16.to_be_bytes());
        body.extend_from_slice(b"payload");
        let parsed = parse_publish(&body, 1).unwrap();
        assert_eq!(parsed.topic, "t");
        assert_eq!(parsed.payload, b"payload");
    }

    #[test]
    fn recv_buffer_reassembles_split_packet() {
        let packet = build_publish("topic", b"abcdefgh");
        let mut rb = RecvBuffer::new();
        rb.feed(&packet[..3]);
        assert!(rb.drain_packets().unwrap().is_empty());
        rb.feed(&packet[3..]);
        let parsed = rb.drain_packets().unwrap();
        assert_eq!(parsed.len(), 1);
    }

    #[test]
    fn recv_buffer_handles_multiple_packets_in_one_feed() {
        let mut bytes = build_pingreq();
        bytes.extend(build_publish("t", b"x"));
        let mut rb = RecvBuffer::new();
        rb.feed(&bytes);
        let parsed = rb.drain_packets().unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].first_byte, 0xC0);
    }

    #[test]
    fn recv_buffer_discards_on_framing_error() {
        let mut rb = RecvBuffer::new();
        rb.feed(&[0x30, 0x80, 0x80, 0x80, 0x80, 0x01]);
        assert!(rb.drain_packets().is_err());
        rb.feed(&build_pingreq());
        let parsed = rb.drain_packets().unwrap();
        assert_eq!(parsed.len(), 1);
    }

    #[test]
    fn connack_parses_accepted() {
        assert_eq!(parse_connack(&[0x00, 0x00]), Some(ConnAckCode::Accepted));
        assert_eq!(parse_connack(&[0x00, 0x05]), Some(ConnAckCode::Refused(5)));
    }
}
