//! Chat messages carried on the `"chat"` data channel.

use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: String,
    pub sender_name: String,
    pub content: String,
    pub timestamp: String,
}

#[derive(Debug, Deserialize)]
struct RawChatMessage {
    #[serde(rename = "type")]
    kind: String,
    id: String,
    #[serde(rename = "senderName")]
    sender_name: String,
    content: String,
    timestamp: String,
}

/// Parses a chat payload off the wire. Anything malformed or mistyped is
/// discarded silently, matching the control plane's strict-validation rule.
pub fn parse_chat_message(payload: &[u8]) -> Option<ChatMessage> {
    let raw: RawChatMessage = serde_json::from_slice(payload).ok()?;
    if raw.kind != "chat" {
        return None;
    }
    Some(ChatMessage {
        id: raw.id,
        sender_name: raw.sender_name,
        content: raw.content,
        timestamp: raw.timestamp,
    })
}

pub fn encode_chat_message(message: &ChatMessage) -> Vec<u8> {
    json!({
        "type": "chat",
        "id": message.id,
        "senderName": message.sender_name,
        "content": message.content,
        "timestamp": message.timestamp,
    })
    .to_string()
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_json() {
        let message = ChatMessage {
            id: "1".to_string(),
            sender_name: "alice".to_string(),
            content: "hi".to_string(),
            timestamp: "2026-08-01T00:00:00Z".to_string(),
        };
        let bytes = encode_chat_message(&message);
        let parsed = parse_chat_message(&bytes).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn missing_field_is_discarded() {
        let payload = br#"{"type":"chat","id":"1","senderName":"alice"}"#;
        assert!(parse_chat_message(payload).is_none());
    }

    #[test]
    fn wrong_type_tag_is_discarded() {
        let payload = br#"{"type":"not-chat","id":"1","senderName":"a","content":"c","timestamp":"t"}"#;
        assert!(parse_chat_message(payload).is_none());
    }
}
