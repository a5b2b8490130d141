//! One remote peer's WebRTC connection: offer/answer, trickle ICE, data
//! channels, and the state transitions described by [`super::state`].

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::control::routing::{diff_track, select_sender_for_routing, AudioRoutingMode, SenderSnapshot, TrackAction, TrackKind};
use crate::credentials::IceServerSpec;
use crate::error::{Error, Result};
use crate::peer::sdp::configure_opus_sdp;
use crate::peer::state::{PeerState, StateTimestamp};
use crate::platform::Platform;

pub type LocalTrack = Arc<dyn TrackLocal + Send + Sync>;

struct AttachedSender {
    track_id: String,
    kind: TrackKind,
    sender: Arc<RTCRtpSender>,
    index: usize,
}

pub const CHAT_LABEL: &str = "chat";
pub const CONTROL_LABEL: &str = "control";

/// Events a [`PeerConn`] reports back to its owning room. Callbacks only
/// carry the peer id so the room looks current state up through its own
/// peer map, instead of the connection holding a back-reference to it.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    IceCandidate { peer_id: String, candidate: String },
    IceConnected { peer_id: String },
    IceFailed { peer_id: String },
    IceDisconnected { peer_id: String },
    ConnectionConnected { peer_id: String },
    ConnectionDisconnected { peer_id: String },
    ConnectionFailed { peer_id: String },
    ConnectionClosed { peer_id: String },
    RemoteTrack { peer_id: String },
    DataChannelOpen { peer_id: String, label: String },
    DataChannelMessage { peer_id: String, label: String, data: Vec<u8> },
}

fn ice_servers_from_specs(specs: &[IceServerSpec]) -> Vec<RTCIceServer> {
    specs
        .iter()
        .map(|spec| RTCIceServer {
            urls: spec.urls.clone(),
            username: spec.username.clone().unwrap_or_default(),
            credential: spec.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct MuteStatus {
    pub mic_muted: bool,
    pub speaker_muted: bool,
    pub video_muted: bool,
    pub video_enabled: bool,
    pub is_screen_sharing: bool,
}

pub struct PeerConn {
    pub peer_id: String,
    pub user_name: String,
    pub platform: Platform,
    pub is_initiator: bool,
    pc: Arc<RTCPeerConnection>,
    chat_channel: Mutex<Option<Arc<RTCDataChannel>>>,
    control_channel: Mutex<Option<Arc<RTCDataChannel>>>,
    pub state: Mutex<StateTimestamp>,
    pub mute_status: Mutex<MuteStatus>,
    pub ice_restart_attempts: AtomicU32,
    pub ice_restart_in_progress: AtomicBool,
    pub is_connected: AtomicBool,
    /// Tracks `RTCIceConnectionState` independently of `is_connected`
    /// (which mirrors the overall `RTCPeerConnectionState`), so the
    /// disconnect-grace timer can tell whether ICE has recovered by the
    /// time it fires.
    pub ice_connected: AtomicBool,
    pub connection_start_time: Mutex<Option<std::time::Instant>>,
    senders: Mutex<Vec<AttachedSender>>,
}

impl PeerConn {
    pub async fn new(
        peer_id: String,
        user_name: String,
        platform: Platform,
        is_initiator: bool,
        ice_servers: &[IceServerSpec],
        events: UnboundedSender<PeerEvent>,
    ) -> Result<Arc<Self>> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::PeerConnection { peer_id: peer_id.clone(), reason: e.to_string() })?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| Error::PeerConnection { peer_id: peer_id.clone(), reason: e.to_string() })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: ice_servers_from_specs(ice_servers),
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(|e| Error::PeerConnection { peer_id: peer_id.clone(), reason: e.to_string() })?,
        );

        let peer = Arc::new(Self {
            peer_id: peer_id.clone(),
            user_name,
            platform,
            is_initiator,
            pc: pc.clone(),
            chat_channel: Mutex::new(None),
            control_channel: Mutex::new(None),
            state: Mutex::new(StateTimestamp::new(PeerState::New)),
            mute_status: Mutex::new(MuteStatus::default()),
            ice_restart_attempts: AtomicU32::new(0),
            ice_restart_in_progress: AtomicBool::new(false),
            is_connected: AtomicBool::new(false),
            ice_connected: AtomicBool::new(false),
            connection_start_time: Mutex::new(None),
            senders: Mutex::new(Vec::new()),
        });

        peer.register_callbacks(events.clone());

        if is_initiator {
            let chat = pc
                .create_data_channel(CHAT_LABEL, Some(ordered_reliable()))
                .await
                .map_err(|e| Error::PeerConnection { peer_id: peer_id.clone(), reason: e.to_string() })?;
            let control = pc
                .create_data_channel(CONTROL_LABEL, Some(ordered_reliable()))
                .await
                .map_err(|e| Error::PeerConnection { peer_id: peer_id.clone(), reason: e.to_string() })?;
            wire_data_channel(chat.clone(), peer_id.clone(), events.clone());
            wire_data_channel(control.clone(), peer_id.clone(), events.clone());
            *peer.chat_channel.lock() = Some(chat);
            *peer.control_channel.lock() = Some(control);
        }

        Ok(peer)
    }

    fn register_callbacks(self: &Arc<Self>, events: UnboundedSender<PeerEvent>) {
        let peer_id = self.peer_id.clone();
        let tx = events.clone();
        self.pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let peer_id = peer_id.clone();
            let tx = tx.clone();
            Box::pin(async move {
                if let Some(candidate) = candidate {
                    if let Ok(init) = candidate.to_json() {
                        if let Ok(json) = serde_json::to_string(&init) {
                            let _ = tx.send(PeerEvent::IceCandidate { peer_id, candidate: json });
                        }
                    }
                }
            })
        }));

        let peer_id = self.peer_id.clone();
        let tx = events.clone();
        self.pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            let peer_id = peer_id.clone();
            let tx = tx.clone();
            Box::pin(async move {
                let event = match state {
                    RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => {
                        Some(PeerEvent::IceConnected { peer_id })
                    }
                    RTCIceConnectionState::Failed => Some(PeerEvent::IceFailed { peer_id }),
                    RTCIceConnectionState::Disconnected => Some(PeerEvent::IceDisconnected { peer_id }),
                    _ => None,
                };
                if let Some(event) = event {
                    let _ = tx.send(event);
                }
            })
        }));

        let peer_id = self.peer_id.clone();
        let tx = events.clone();
        self.pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let peer_id = peer_id.clone();
            let tx = tx.clone();
            Box::pin(async move {
                let event = match state {
                    RTCPeerConnectionState::Connected => Some(PeerEvent::ConnectionConnected { peer_id }),
                    RTCPeerConnectionState::Disconnected => Some(PeerEvent::ConnectionDisconnected { peer_id }),
                    RTCPeerConnectionState::Failed => Some(PeerEvent::ConnectionFailed { peer_id }),
                    RTCPeerConnectionState::Closed => Some(PeerEvent::ConnectionClosed { peer_id }),
                    _ => None,
                };
                if let Some(event) = event {
                    let _ = tx.send(event);
                }
            })
        }));

        let peer_id = self.peer_id.clone();
        let tx = events.clone();
        self.pc.on_track(Box::new(move |_track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _transceiver| {
            let peer_id = peer_id.clone();
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(PeerEvent::RemoteTrack { peer_id });
            })
        }));

        if !self.is_initiator {
            let peer_id = self.peer_id.clone();
            let self_weak = Arc::downgrade(self);
            let tx = events.clone();
            self.pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                let peer_id = peer_id.clone();
                let tx = tx.clone();
                let self_weak = self_weak.clone();
                Box::pin(async move {
                    let label = dc.label().to_string();
                    wire_data_channel(dc.clone(), peer_id.clone(), tx.clone());
                    if let Some(peer) = self_weak.upgrade() {
                        match label.as_str() {
                            CHAT_LABEL => *peer.chat_channel.lock() = Some(dc),
                            CONTROL_LABEL => *peer.control_channel.lock() = Some(dc),
                            _ => {}
                        }
                    }
                    let _ = tx.send(PeerEvent::DataChannelOpen { peer_id, label });
                })
            }));
        }
    }

    pub async fn create_offer(&self, ice_restart: bool) -> Result<String> {
        let options = if ice_restart {
            Some(RTCOfferOptions { ice_restart: true, ..Default::default() })
        } else {
            None
        };
        let offer = self
            .pc
            .create_offer(options)
            .await
            .map_err(|e| Error::PeerConnection { peer_id: self.peer_id.clone(), reason: e.to_string() })?;
        let tuned = RTCSessionDescription::offer(configure_opus_sdp(&offer.sdp))
            .map_err(|e| Error::PeerConnection { peer_id: self.peer_id.clone(), reason: e.to_string() })?;
        self.pc
            .set_local_description(tuned.clone())
            .await
            .map_err(|e| Error::PeerConnection { peer_id: self.peer_id.clone(), reason: e.to_string() })?;
        Ok(tuned.sdp)
    }

    pub async fn handle_offer(&self, sdp: &str) -> Result<String> {
        let offer = RTCSessionDescription::offer(sdp.to_string())
            .map_err(|e| Error::PeerConnection { peer_id: self.peer_id.clone(), reason: e.to_string() })?;
        self.pc
            .set_remote_description(offer)
            .await
            .map_err(|e| Error::PeerConnection { peer_id: self.peer_id.clone(), reason: e.to_string() })?;

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| Error::PeerConnection { peer_id: self.peer_id.clone(), reason: e.to_string() })?;
        let tuned = RTCSessionDescription::answer(configure_opus_sdp(&answer.sdp))
            .map_err(|e| Error::PeerConnection { peer_id: self.peer_id.clone(), reason: e.to_string() })?;
        self.pc
            .set_local_description(tuned.clone())
            .await
            .map_err(|e| Error::PeerConnection { peer_id: self.peer_id.clone(), reason: e.to_string() })?;
        Ok(tuned.sdp)
    }

    pub async fn handle_answer(&self, sdp: &str) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp.to_string())
            .map_err(|e| Error::PeerConnection { peer_id: self.peer_id.clone(), reason: e.to_string() })?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| Error::PeerConnection { peer_id: self.peer_id.clone(), reason: e.to_string() })
    }

    pub async fn add_ice_candidate(&self, candidate_json: &str) -> Result<()> {
        let init: RTCIceCandidateInit = serde_json::from_str(candidate_json)
            .map_err(|e| Error::PeerConnection { peer_id: self.peer_id.clone(), reason: e.to_string() })?;
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::PeerConnection { peer_id: self.peer_id.clone(), reason: e.to_string() })
    }

    pub fn has_remote_description(&self) -> bool {
        self.pc.remote_description_unchecked().is_some()
    }

    /// Attempts an ICE restart. Preconditions (current state, attempt
    /// budget) are the caller's responsibility via [`super::state`] and
    /// `ice_restart_attempts`; this just runs the renegotiation and
    /// reports the fresh offer's SDP for the caller to publish.
    pub async fn restart_ice(&self) -> Result<String> {
        self.ice_restart_in_progress.store(true, Ordering::SeqCst);
        self.create_offer(true).await
    }

    pub fn send_chat(&self, payload: &[u8]) -> bool {
        send_on_channel(&self.chat_channel, payload)
    }

    pub fn send_control(&self, payload: &[u8]) -> bool {
        send_on_channel(&self.control_channel, payload)
    }

    pub async fn close(&self) {
        let chat = self.chat_channel.lock().take();
        if let Some(chat) = chat {
            let _ = chat.close().await;
        }
        let control = self.control_channel.lock().take();
        if let Some(control) = control {
            let _ = control.close().await;
        }
        let _ = self.pc.close().await;
    }

    pub async fn stats(&self) -> webrtc::stats::StatsReport {
        self.pc.get_stats().await
    }

    fn sender_snapshots(&self) -> Vec<SenderSnapshot> {
        self.senders
            .lock()
            .iter()
            .map(|entry| SenderSnapshot {
                index: entry.index,
                track_id: if entry.track_id.is_empty() { None } else { Some(entry.track_id.clone()) },
                kind: Some(entry.kind),
                codec_mime_prefix: None,
            })
            .collect()
    }

    /// Attaches one local track, following [`diff_track`]'s decision: a
    /// track already attached under the same id is a no-op, a track of a
    /// kind already sending is replaced in place, anything else adds a
    /// fresh `RTCRtpSender`.
    pub async fn apply_local_track(&self, track: LocalTrack, kind: TrackKind) -> Result<()> {
        let track_id = track.id().to_string();
        let snapshots = self.sender_snapshots();
        match diff_track(&snapshots, &track_id, kind) {
            TrackAction::Skip => Ok(()),
            TrackAction::ReplaceSender { index } => {
                let sender = {
                    let senders = self.senders.lock();
                    senders.get(index).map(|entry| entry.sender.clone())
                };
                if let Some(sender) = sender {
                    sender
                        .replace_track(Some(track.clone()))
                        .await
                        .map_err(|e| Error::PeerConnection { peer_id: self.peer_id.clone(), reason: e.to_string() })?;
                    let mut senders = self.senders.lock();
                    if let Some(entry) = senders.get_mut(index) {
                        entry.track_id = track_id;
                    }
                }
                Ok(())
            }
            TrackAction::AddTrack => {
                let sender = self
                    .pc
                    .add_track(track)
                    .await
                    .map_err(|e| Error::PeerConnection { peer_id: self.peer_id.clone(), reason: e.to_string() })?;
                let mut senders = self.senders.lock();
                let index = senders.len();
                senders.push(AttachedSender { track_id, kind, sender, index });
                Ok(())
            }
        }
    }

    /// Applies an [`AudioRoutingMode`] decision to the audio sender
    /// attached for this peer: clears it (stops sending) when the mode
    /// excludes this peer, leaves it alone otherwise. The sender is kept
    /// in place rather than removed so a later mode change can resume
    /// sending without renegotiating.
    pub async fn apply_routing_mode(&self, mode: &AudioRoutingMode) -> Result<()> {
        let should_send = mode.should_send_to(&self.peer_id);
        let snapshots = self.sender_snapshots();
        let index = match select_sender_for_routing(&snapshots, TrackKind::Audio) {
            Some(index) => index,
            None => return Ok(()),
        };
        let (sender, currently_sending) = {
            let senders = self.senders.lock();
            match senders.get(index) {
                Some(entry) => (entry.sender.clone(), !entry.track_id.is_empty()),
                None => return Ok(()),
            }
        };
        if should_send == currently_sending {
            return Ok(());
        }
        if should_send {
            // Re-enabling requires the caller to re-attach via
            // `apply_local_track`; there is no track to restore here.
            return Ok(());
        }
        sender
            .replace_track(None)
            .await
            .map_err(|e| Error::PeerConnection { peer_id: self.peer_id.clone(), reason: e.to_string() })?;
        let mut senders = self.senders.lock();
        if let Some(entry) = senders.get_mut(index) {
            entry.track_id.clear();
        }
        Ok(())
    }
}

fn ordered_reliable() -> RTCDataChannelInit {
    RTCDataChannelInit {
        ordered: Some(true),
        ..Default::default()
    }
}

fn wire_data_channel(dc: Arc<RTCDataChannel>, peer_id: String, tx: UnboundedSender<PeerEvent>) {
    let label = dc.label().to_string();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let peer_id = peer_id.clone();
        let label = label.clone();
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(PeerEvent::DataChannelMessage {
                peer_id,
                label,
                data: msg.data.to_vec(),
            });
        })
    }));
}

/// `RTCDataChannel::send` is async; a synchronous, best-effort `-> bool`
/// API fires it into a detached task rather than blocking the caller.
/// Returns `false` immediately if the channel hasn't been created yet.
fn send_on_channel(slot: &Mutex<Option<Arc<RTCDataChannel>>>, payload: &[u8]) -> bool {
    let dc = match slot.lock().clone() {
        Some(dc) => dc,
        None => return false,
    };
    let payload = bytes::Bytes::copy_from_slice(payload);
    tokio::spawn(async move {
        let _ = dc.send(&payload).await;
    });
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mute_status_defaults_to_unmuted() {
        let status = MuteStatus::default();
        assert!(!status.mic_muted);
        assert!(!status.is_screen_sharing);
    }

    #[test]
    fn ice_servers_carry_credentials_through() {
        let specs = vec![IceServerSpec {
            urls: vec!["turn:example.com".to_string()],
            username: Some("u".to_string()),
            credential: Some("p".to_string()),
        }];
        let servers = ice_servers_from_specs(&specs);
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].username, "u");
        assert_eq!(servers[0].credential, "p");
    }
}
