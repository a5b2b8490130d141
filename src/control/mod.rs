//! Control plane carried over the `"chat"`/`"control"` data channels:
//! chat messages, the remote-mic handshake, moderation, and audio-routing
//! sender selection.

pub mod chat;
pub mod moderation;
pub mod remote_mic;
pub mod routing;

pub use chat::ChatMessage;
pub use moderation::{ModerationEvent, ModerationMessage, ModerationState};
pub use remote_mic::{RemoteMicEvent, RemoteMicMessage, RemoteMicState};
pub use routing::{AudioRoutingMode, TrackAction, TrackKind};
