//! Public façade: the one type a host embeds. Owns identity, the
//! credentials provider, and the network supervisor across room
//! join/leave cycles, and hands out exactly one [`Room`] per active join.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::config::EngineConfig;
use crate::control::routing::TrackKind;
use crate::control::ChatMessage;
use crate::credentials::{CredentialsProvider, CredentialsSource};
use crate::error::{Error, Result};
use crate::events::{Event, EventSink};
use crate::id::{generate_self_id, SessionIdGenerator};
use crate::network::{NetworkSupervisor, ReconnectOutcome};
use crate::peer::connection::{LocalTrack, MuteStatus};
use crate::platform::{detect_platform, Platform};
use crate::quality::QualityReport;
use crate::room::{DebugInfo, ModerationSnapshot, PeerSummary, Room, SignalingState};

static SESSION_IDS: SessionIdGenerator = SessionIdGenerator::new();

/// Top-level snapshot surfaced for host diagnostics, combining the active
/// room's [`DebugInfo`] with identity fields the room itself doesn't carry.
#[derive(Debug, Clone)]
pub struct EngineDebugInfo {
    pub self_id: String,
    pub room_id: Option<String>,
    pub online: bool,
    pub room: Option<DebugInfo>,
}

/// The engine's single public entry point. Construct one per conferencing
/// session; `join_room`/`leave_room` may be called repeatedly across its
/// lifetime, each cycle getting a fresh [`Room`].
pub struct Manager {
    self_id: String,
    user_name: Mutex<String>,
    platform: Platform,
    cfg: EngineConfig,
    credentials: CredentialsProvider,
    network: Arc<NetworkSupervisor>,
    events: EventSink,
    room: Mutex<Option<Arc<Room>>>,
    joining: Mutex<bool>,
}

impl Manager {
    /// Builds a manager with the default [`EngineConfig`]. `user_agent` is
    /// used only to classify [`Platform`] the way a browser host would.
    pub fn new(credentials_source: Arc<dyn CredentialsSource>, user_agent: &str) -> (Arc<Self>, UnboundedReceiver<Event>) {
        Self::with_config(credentials_source, user_agent, EngineConfig::default())
    }

    pub fn with_config(
        credentials_source: Arc<dyn CredentialsSource>,
        user_agent: &str,
        cfg: EngineConfig,
    ) -> (Arc<Self>, UnboundedReceiver<Event>) {
        let (events, rx) = EventSink::new();
        let manager = Arc::new(Self {
            self_id: generate_self_id(),
            user_name: Mutex::new(String::new()),
            platform: detect_platform(user_agent),
            cfg,
            credentials: CredentialsProvider::new(credentials_source),
            network: Arc::new(NetworkSupervisor::new()),
            events,
            room: Mutex::new(None),
            joining: Mutex::new(false),
        });
        (manager, rx)
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    /// Joins `room_id` as `user_name`. Fails if a join is already in
    /// flight, if credentials can't be fetched, or if every configured
    /// broker refuses to connect or subscribe.
    pub async fn join_room(self: &Arc<Self>, room_id: &str, user_name: &str) -> Result<()> {
        {
            let mut joining = self.joining.lock();
            if *joining {
                return Err(Error::JoinInFlight);
            }
            *joining = true;
        }
        let result = self.join_room_inner(room_id, user_name).await;
        *self.joining.lock() = false;
        if let Err(e) = &result {
            self.events.emit(Event::Error { error: e.to_string(), context: e.context() });
        }
        result
    }

    async fn join_room_inner(self: &Arc<Self>, room_id: &str, user_name: &str) -> Result<()> {
        if self.room.lock().is_some() {
            self.leave_room().await;
        }

        let creds = self.credentials.load().await?;
        *self.user_name.lock() = user_name.to_string();
        let session_id = SESSION_IDS.next();

        let room = Room::new(
            self.self_id.clone(),
            user_name.to_string(),
            self.platform,
            room_id.to_string(),
            session_id,
            self.cfg.clone(),
            creds.ice_servers,
            creds.brokers,
            self.events.clone(),
            self.network.clone(),
        );

        room.start().await?;
        *self.room.lock() = Some(room);
        Ok(())
    }

    /// Leaves the current room, if any. A no-op when not in a room.
    pub async fn leave_room(&self) {
        let room = self.room.lock().take();
        if let Some(room) = room {
            room.leave().await;
        }
    }

    fn active_room(&self) -> Result<Arc<Room>> {
        self.room.lock().clone().ok_or(Error::NotInRoom)
    }

    // ---- media ----

    pub async fn set_local_stream(&self, tracks: Vec<(LocalTrack, TrackKind)>) -> Result<()> {
        self.active_room()?.set_local_stream(tracks).await;
        Ok(())
    }

    pub async fn replace_track(&self, track: LocalTrack, kind: TrackKind) -> Result<()> {
        self.active_room()?.replace_track(track, kind).await;
        Ok(())
    }

    pub async fn set_audio_routing_exclusive(&self, target_peer_id: &str) -> Result<()> {
        self.active_room()?
            .set_audio_routing_mode(crate::control::AudioRoutingMode::Exclusive { target_peer_id: target_peer_id.to_string() })
            .await;
        Ok(())
    }

    pub async fn set_audio_routing_broadcast(&self) -> Result<()> {
        self.active_room()?.set_audio_routing_mode(crate::control::AudioRoutingMode::Broadcast).await;
        Ok(())
    }

    pub async fn broadcast_mute_status(&self, status: MuteStatus) -> Result<()> {
        self.active_room()?.broadcast_mute_status(status).await;
        Ok(())
    }

    // ---- moderation / chat / remote mic ----

    pub fn set_room_locked(&self, locked: bool) -> Result<()> {
        self.active_room()?.set_room_locked(locked);
        Ok(())
    }

    pub fn broadcast_mute_all_request(&self) -> Result<String> {
        let room = self.active_room()?;
        let name = self.user_name.lock().clone();
        Ok(room.broadcast_mute_all_request(&name))
    }

    pub fn respond_mute_all_request(&self, request_id: &str, accepted: bool) -> Result<()> {
        self.active_room()?.respond_mute_all_request(request_id, accepted);
        Ok(())
    }

    pub fn set_local_hand_raised(&self, raised: bool) -> Result<()> {
        self.active_room()?.set_local_hand_raised(raised);
        Ok(())
    }

    pub fn send_chat_message(&self, content: &str, timestamp: &str) -> Result<ChatMessage> {
        Ok(self.active_room()?.send_chat_message(content, timestamp))
    }

    pub fn send_remote_mic_request(&self, target_peer_id: &str) -> Result<String> {
        Ok(self.active_room()?.send_remote_mic_request(target_peer_id))
    }

    pub fn send_remote_mic_response(&self, target_peer_id: &str, request_id: &str, accepted: bool, reason: Option<String>) -> Result<()> {
        self.active_room()?.send_remote_mic_response(target_peer_id, request_id, accepted, reason);
        Ok(())
    }

    pub fn send_remote_mic_start(&self, target_peer_id: &str, request_id: &str) -> Result<()> {
        self.active_room()?.send_remote_mic_start(target_peer_id, request_id);
        Ok(())
    }

    pub async fn send_remote_mic_stop(&self, target_peer_id: &str, request_id: &str, reason: Option<String>) -> Result<()> {
        self.active_room()?.send_remote_mic_stop(target_peer_id, request_id, reason).await;
        Ok(())
    }

    pub fn get_moderation_state(&self) -> Result<ModerationSnapshot> {
        Ok(self.active_room()?.get_moderation_state())
    }

    // ---- network ----

    pub fn is_online(&self) -> bool {
        self.network.is_online()
    }

    /// Called by the host's network-change listener when connectivity drops.
    pub fn on_network_offline(&self) {
        self.network.on_offline();
        self.events.emit(Event::NetworkStatusChange { online: false });
    }

    /// Called by the host's network-change listener when connectivity
    /// returns. If the engine was mid-room when it dropped, this spawns a
    /// detached reconnect loop rather than blocking the caller on it.
    pub fn on_network_online(self: &Arc<Self>) {
        let should_reconnect = self.network.on_online();
        self.events.emit(Event::NetworkStatusChange { online: true });
        if should_reconnect {
            let manager = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(manager.cfg.network_reconnect_stabilize).await;
                manager.run_reconnect_loop().await;
            });
        }
    }

    pub fn request_manual_reconnect(self: &Arc<Self>) {
        if self.network.manual_reconnect_requested() {
            let manager = self.clone();
            tokio::spawn(async move { manager.run_reconnect_loop().await });
        }
    }

    async fn run_reconnect_loop(self: &Arc<Self>) {
        loop {
            match self.network.attempt_reconnect(&self.cfg) {
                ReconnectOutcome::Aborted => return,
                ReconnectOutcome::Exhausted => {
                    self.events.emit(Event::Error {
                        error: NetworkSupervisor::reconnect_failed_error(self.cfg.max_network_reconnect_attempts).to_string(),
                        context: crate::error::ErrorContext::NetworkReconnect,
                    });
                    return;
                }
                ReconnectOutcome::ShouldReconnect => {
                    let room = self.room.lock().clone();
                    let ok = match room {
                        Some(room) => room.reconnect_transport().await,
                        None => return,
                    };
                    if ok {
                        self.network.on_reconnect_success();
                        return;
                    }
                }
            }
        }
    }

    // ---- accessors ----

    pub fn get_peers(&self) -> Vec<PeerSummary> {
        self.active_room().map(|room| room.get_peers()).unwrap_or_default()
    }

    pub fn get_all_peer_mute_statuses(&self) -> HashMap<String, MuteStatus> {
        self.active_room().map(|room| room.get_all_peer_mute_statuses()).unwrap_or_default()
    }

    pub async fn get_connection_stats(&self) -> Vec<QualityReport> {
        match self.active_room() {
            Ok(room) => room.get_connection_stats().await,
            Err(_) => Vec::new(),
        }
    }

    pub fn get_signaling_state(&self) -> Option<SignalingState> {
        self.active_room().ok().map(|room| room.get_signaling_state())
    }

    pub fn get_debug_info(&self) -> EngineDebugInfo {
        let room = self.room.lock().clone();
        EngineDebugInfo {
            self_id: self.self_id.clone(),
            room_id: room.as_ref().map(|r| r.room_id().to_string()),
            online: self.network.is_online(),
            room: room.as_ref().map(|r| r.get_debug_info()),
        }
    }
}
