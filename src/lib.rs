//! meshconf: serverless peer-to-peer conferencing signaling.
//!
//! Coordinates WebRTC mesh conferencing for a small room of peers without a
//! signaling server: rendezvous happens over a redundant set of public MQTT
//! brokers (with a same-origin multicast fallback), offer/answer and trickle
//! ICE are driven by a lexical tiebreak between peer ids, and a control
//! plane riding the data channels carries chat, a remote-mic handshake, and
//! moderation (room lock, hand raise, mute-all).
//!
//! [`Manager`] is the single entry point a host embeds: construct one,
//! `join_room`, drain its [`Event`] channel, `leave_room` when done.

pub mod config;
pub mod control;
pub mod credentials;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod id;
pub mod manager;
pub mod mqtt;
pub mod network;
pub mod peer;
pub mod platform;
pub mod quality;
pub mod room;
pub mod signaling;
pub mod transport;

pub use config::EngineConfig;
pub use control::{AudioRoutingMode, ChatMessage, ModerationEvent, RemoteMicEvent, TrackKind};
pub use credentials::{BrokerSpec, Credentials, CredentialsProvider, CredentialsSource, IceServerSpec};
pub use error::{Error, ErrorContext, Result};
pub use events::{Event, EventSink};
pub use manager::{EngineDebugInfo, Manager};
pub use peer::{LocalTrack, MuteStatus};
pub use platform::Platform;
pub use quality::QualityReport;
pub use room::{DebugInfo, ModerationSnapshot, PeerSummary, Room, SignalingState};
