//! Error taxonomy for the signaling and peer-lifecycle engine.
//!
//! One variant per failure mode in the error-handling table; each variant
//! carries enough context to populate an [`Event::Error`](crate::events::Event::Error)
//! without the caller having to re-derive it.

use thiserror::Error;

/// Coarse classification surfaced alongside [`Error`] in `onError(kind, context)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorContext {
    MqttConnection,
    NetworkReconnect,
    Credentials,
    IceRestart,
    Subscribe,
    Publish,
}

impl ErrorContext {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorContext::MqttConnection => "mqtt-connection",
            ErrorContext::NetworkReconnect => "network-reconnect",
            ErrorContext::Credentials => "credentials",
            ErrorContext::IceRestart => "ice-restart",
            ErrorContext::Subscribe => "subscribe",
            ErrorContext::Publish => "publish",
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("credentials unavailable: secure session API advertised but returned an incomplete payload")]
    CredentialsUnavailable,

    #[error("all brokers failed to connect")]
    AllBrokersFailed,

    #[error("broker {url} connect timed out")]
    BrokerConnectTimeout { url: String },

    #[error("broker {url} websocket error: {reason}")]
    BrokerWebSocket { url: String, reason: String },

    #[error("no broker accepted a subscription for {topic}")]
    SubscribeFailed { topic: String },

    #[error("broker {url} publish failed: not connected")]
    BrokerNotConnected { url: String },

    #[error("mqtt framing error: {0}")]
    MqttFraming(String),

    #[error("peer {peer_id} not found")]
    PeerNotFound { peer_id: String },

    #[error("peer {peer_id} webrtc error: {reason}")]
    PeerConnection { peer_id: String, reason: String },

    #[error("ice restart exhausted for peer {peer_id} after {attempts} attempts")]
    IceRestartExhausted { peer_id: String, attempts: u32 },

    #[error("data channel send failed on peer {peer_id} channel {channel}")]
    DataChannelSend { peer_id: String, channel: String },

    #[error("room is locked by {locked_by}")]
    RoomLocked { locked_by: String },

    #[error("not currently in a room")]
    NotInRoom,

    #[error("a join is already in flight")]
    JoinInFlight,

    #[error("network reconnect attempts exhausted ({attempts})")]
    NetworkReconnectFailed { attempts: u32 },

    #[error("signal envelope encode failed: {0}")]
    SignalEncode(String),
}

impl Error {
    /// Maps an error to its `onError` context tag.
    pub fn context(&self) -> ErrorContext {
        match self {
            Error::CredentialsUnavailable => ErrorContext::Credentials,
            Error::AllBrokersFailed
            | Error::BrokerConnectTimeout { .. }
            | Error::BrokerWebSocket { .. }
            | Error::MqttFraming(_) => ErrorContext::MqttConnection,
            Error::SubscribeFailed { .. } => ErrorContext::Subscribe,
            Error::BrokerNotConnected { .. } => ErrorContext::Publish,
            Error::IceRestartExhausted { .. } => ErrorContext::IceRestart,
            Error::NetworkReconnectFailed { .. } => ErrorContext::NetworkReconnect,
            Error::DataChannelSend { .. }
            | Error::PeerNotFound { .. }
            | Error::PeerConnection { .. }
            | Error::RoomLocked { .. }
            | Error::NotInRoom
            | Error::JoinInFlight
            | Error::SignalEncode(_) => ErrorContext::Publish,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
