//! Per-peer WebRTC connection, its signaling state machine, and the Opus
//! SDP tuning applied to every offer/answer. Peer *ownership* (the set of
//! peers in a room, connect/reconnect/cleanup policy) lives in
//! [`crate::room`]; this module is the single-connection building block.

pub mod connection;
pub mod sdp;
pub mod state;

pub use connection::{LocalTrack, MuteStatus, PeerConn, PeerEvent, CHAT_LABEL, CONTROL_LABEL};
pub use sdp::configure_opus_sdp;
pub use state::{should_keep_existing, PeerState, StateTimestamp};
