//! One active room: owns the broker/multicast transports, the peer map,
//! the control-plane state, the dedup cache, and every timer created in
//! room scope. [`crate::manager::Manager`] constructs exactly one of
//! these per `join_room` call and drops it on `leave_room`.
//!
//! Construction is two-phase to avoid a reference cycle: the transport's
//! `on_message`/`on_reconnect` closures only capture plain channel
//! senders, never an `Arc<Room>`. [`Room::start`] is the point where the
//! background pump tasks are spawned, each holding its own `Arc<Room>`
//! clone and draining the channels the closures feed.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{ice_restart_retry_delay, EngineConfig};
use crate::control::chat::{encode_chat_message, parse_chat_message, ChatMessage};
use crate::control::moderation::{self, ModerationEvent, ModerationMessage, ModerationState};
use crate::control::remote_mic::{self, RemoteMicEvent, RemoteMicMessage, RemoteMicState};
use crate::control::routing::{AudioRoutingMode, TrackKind};
use crate::credentials::IceServerSpec;
use crate::error::{Error, Result};
use crate::events::{Event, EventSink};
use crate::heartbeat::Heartbeat;
use crate::id::generate_msg_id;
use crate::network::NetworkSupervisor;
use crate::peer::connection::{LocalTrack, MuteStatus, CHAT_LABEL, CONTROL_LABEL};
use crate::peer::state::{should_keep_existing, PeerState};
use crate::peer::{PeerConn, PeerEvent};
use crate::platform::Platform;
use crate::quality::{self, ConnectionState, PreviousStats, QualityReport};
use crate::signaling::handlers::{session_matches, should_initiate_offer, should_reject_for_lock};
use crate::signaling::{route_inbound, Action, Envelope, EnvelopeKind};
use crate::transport::{DedupCache, MulticastChannel, MultiBrokerTransport};

/// What the background pump task received off a transport, before it's
/// decoded into an [`Envelope`].
enum Inbound {
    Bytes(Vec<u8>),
    BrokerReconnected,
}

#[derive(Debug, Clone)]
pub struct PeerSummary {
    pub peer_id: String,
    pub user_name: String,
    pub platform: Platform,
    pub connected: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ModerationSnapshot {
    pub locked: bool,
    pub locked_by_peer_id: Option<String>,
    pub hand_raises: Vec<(String, bool)>,
}

#[derive(Debug, Clone)]
pub struct DebugInfo {
    pub connected_brokers: usize,
    pub total_brokers: usize,
    pub dedup_cache_size: usize,
    pub peer_count: usize,
    pub peers_by_state: HashMap<String, usize>,
}

#[derive(Debug, Clone, Copy)]
pub struct SignalingState {
    pub connected_brokers: usize,
    pub total_brokers: usize,
}

pub struct Room {
    self_id: String,
    user_name: String,
    platform: Platform,
    room_id: String,
    topic: String,
    session_id: u64,
    cfg: EngineConfig,
    ice_servers: Vec<IceServerSpec>,
    total_brokers: usize,
    transport: Arc<MultiBrokerTransport>,
    multicast: Option<Arc<MulticastChannel>>,

    peers: Mutex<HashMap<String, Arc<PeerConn>>>,
    pending_candidates: Mutex<HashMap<String, Vec<String>>>,
    previous_stats: Mutex<HashMap<String, PreviousStats>>,
    heartbeat: Mutex<Heartbeat>,
    dedup: Mutex<DedupCache>,
    moderation: Mutex<ModerationState>,
    remote_mic: Mutex<RemoteMicState>,
    routing_mode: Mutex<AudioRoutingMode>,
    local_mute_status: Mutex<MuteStatus>,
    local_hand_raised: AtomicBool,
    local_tracks: Mutex<Vec<(LocalTrack, TrackKind)>>,

    events: EventSink,
    network: Arc<NetworkSupervisor>,
    peer_event_tx: mpsc::UnboundedSender<PeerEvent>,

    disconnect_timers: Mutex<HashMap<String, JoinHandle<()>>>,
    restart_watchdogs: Mutex<HashMap<String, JoinHandle<()>>>,
    background_tasks: Mutex<Vec<JoinHandle<()>>>,

    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Inbound>>>,
    peer_event_rx: Mutex<Option<mpsc::UnboundedReceiver<PeerEvent>>>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
}

impl Room {
    /// Constructs a `Room` with its transport wired up, but starts no
    /// background work — call [`Room::start`] to connect and subscribe.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        self_id: String,
        user_name: String,
        platform: Platform,
        room_id: String,
        session_id: u64,
        cfg: EngineConfig,
        ice_servers: Vec<IceServerSpec>,
        brokers: Vec<crate::credentials::BrokerSpec>,
        events: EventSink,
        network: Arc<NetworkSupervisor>,
    ) -> Arc<Self> {
        let topic = format!("p2p-conf/{room_id}");
        let total_brokers = brokers.len();

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (peer_event_tx, peer_event_rx) = mpsc::unbounded_channel();

        let on_message_tx = inbound_tx.clone();
        let on_message = Arc::new(move |_topic: &str, payload: &[u8]| {
            let _ = on_message_tx.send(Inbound::Bytes(payload.to_vec()));
        });
        let on_reconnect_tx = inbound_tx.clone();
        let on_reconnect = Arc::new(move |_url: &str| {
            let _ = on_reconnect_tx.send(Inbound::BrokerReconnected);
        });

        let transport = Arc::new(MultiBrokerTransport::new(cfg.clone(), brokers, on_message, on_reconnect));
        let multicast = Arc::new(MulticastChannel::new());
        let dedup = DedupCache::new(&cfg);

        Arc::new(Self {
            self_id,
            user_name,
            platform,
            room_id,
            topic,
            session_id,
            cfg,
            ice_servers,
            total_brokers,
            transport,
            multicast: Some(multicast),
            peers: Mutex::new(HashMap::new()),
            pending_candidates: Mutex::new(HashMap::new()),
            previous_stats: Mutex::new(HashMap::new()),
            heartbeat: Mutex::new(Heartbeat::new()),
            dedup: Mutex::new(dedup),
            moderation: Mutex::new(ModerationState::new()),
            remote_mic: Mutex::new(RemoteMicState::new()),
            routing_mode: Mutex::new(AudioRoutingMode::Broadcast),
            local_mute_status: Mutex::new(MuteStatus::default()),
            local_hand_raised: AtomicBool::new(false),
            local_tracks: Mutex::new(Vec::new()),
            events,
            network,
            peer_event_tx,
            disconnect_timers: Mutex::new(HashMap::new()),
            restart_watchdogs: Mutex::new(HashMap::new()),
            background_tasks: Mutex::new(Vec::new()),
            inbound_rx: Mutex::new(Some(inbound_rx)),
            peer_event_rx: Mutex::new(Some(peer_event_rx)),
            inbound_tx,
        })
    }

    /// Connects every broker, subscribes the room topic, wires the
    /// same-origin multicast bus, and spawns the background pumps
    /// (inbound dispatch, peer events, heartbeat, dedup cleaner). Fails
    /// closed if no broker subscribes.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let connected = self.transport.connect_all().await;
        if connected.is_empty() && self.total_brokers > 0 {
            return Err(Error::AllBrokersFailed);
        }

        let subscribed = self.transport.subscribe_all(&self.topic).await;
        if subscribed == 0 && self.total_brokers > 0 {
            self.transport.disconnect_all().await;
            return Err(Error::SubscribeFailed { topic: self.topic.clone() });
        }

        if let Some(multicast) = &self.multicast {
            let mut rx = multicast.subscribe();
            let inbound_tx = self.inbound_tx.clone();
            let task = tokio::spawn(async move {
                while let Ok(bytes) = rx.recv().await {
                    if inbound_tx.send(Inbound::Bytes(bytes)).is_err() {
                        break;
                    }
                }
            });
            self.background_tasks.lock().push(task);
        }

        let inbound_rx = self.inbound_rx.lock().take();
        if let Some(mut rx) = inbound_rx {
            let room = self.clone();
            let task = tokio::spawn(async move {
                while let Some(msg) = rx.recv().await {
                    match msg {
                        Inbound::Bytes(bytes) => room.process_inbound(bytes).await,
                        Inbound::BrokerReconnected => room.on_broker_reconnected().await,
                    }
                }
            });
            self.background_tasks.lock().push(task);
        }

        let peer_event_rx = self.peer_event_rx.lock().take();
        if let Some(mut rx) = peer_event_rx {
            let room = self.clone();
            let task = tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    room.handle_peer_event(event).await;
                }
            });
            self.background_tasks.lock().push(task);
        }

        {
            let room = self.clone();
            let task = tokio::spawn(async move { room.heartbeat_loop().await });
            self.background_tasks.lock().push(task);
        }
        {
            let room = self.clone();
            let task = tokio::spawn(async move { room.dedup_cleaner_loop().await });
            self.background_tasks.lock().push(task);
        }

        self.network.set_in_room(true);
        self.broadcast_announce().await;
        self.events.emit(Event::SignalingStateChange {
            connected_brokers: self.transport.connected_count(),
            total_brokers: self.total_brokers,
        });
        Ok(())
    }

    /// Tears the room down: announces departure, cleans every peer,
    /// disconnects every broker, and aborts every background task.
    pub async fn leave(self: &Arc<Self>) {
        self.send_leave_signal().await;

        let peer_ids: Vec<String> = self.peers.lock().keys().cloned().collect();
        for peer_id in peer_ids {
            self.cleanup_peer(&peer_id, true).await;
        }

        self.transport.disconnect_all().await;
        self.network.set_in_room(false);

        for (_, handle) in self.disconnect_timers.lock().drain() {
            handle.abort();
        }
        for (_, handle) in self.restart_watchdogs.lock().drain() {
            handle.abort();
        }
        for handle in self.background_tasks.lock().drain(..) {
            handle.abort();
        }
    }

    // ---- outbound envelope / control-plane helpers ----

    async fn broadcast_envelope(&self, envelope: Envelope) {
        let envelope = envelope.ensure_msg_id();
        let bytes = match envelope.to_json() {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("failed to encode outbound envelope: {e}");
                return;
            }
        };
        self.transport.publish(&self.topic, &bytes).await;
        if let Some(multicast) = &self.multicast {
            multicast.sender().send(bytes);
        }
    }

    pub async fn broadcast_announce(&self) {
        self.broadcast_envelope(
            Envelope::new(EnvelopeKind::Announce, &self.self_id)
                .with_session(self.session_id)
                .with_identity(&self.user_name, self.platform),
        )
        .await;
    }

    pub async fn send_leave_signal(&self) {
        self.broadcast_envelope(Envelope::new(EnvelopeKind::Leave, &self.self_id).with_session(self.session_id))
            .await;
    }

    pub async fn broadcast_mute_status(&self, status: MuteStatus) {
        *self.local_mute_status.lock() = status.clone();
        if self.peers.lock().is_empty() {
            return;
        }
        self.broadcast_envelope(
            Envelope::new(
                EnvelopeKind::MuteStatus {
                    mic_muted: status.mic_muted,
                    speaker_muted: status.speaker_muted,
                    video_muted: Some(status.video_muted),
                    video_enabled: Some(status.video_enabled),
                    is_screen_sharing: Some(status.is_screen_sharing),
                },
                &self.self_id,
            )
            .with_session(self.session_id),
        )
        .await;
    }

    fn broadcast_control_to_all(&self, message: &ModerationMessage) {
        let bytes = match moderation::encode(message) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("failed to encode moderation message: {e}");
                return;
            }
        };
        for peer in self.peers.lock().values() {
            peer.send_control(&bytes);
        }
    }

    pub fn set_room_locked(&self, locked: bool) {
        self.moderation.lock().set_lock(locked, &self.self_id);
        self.broadcast_control_to_all(&ModerationMessage::ModRoomLock {
            locked,
            locked_by_peer_id: self.self_id.clone(),
        });
    }

    pub fn broadcast_mute_all_request(&self, requested_by_name: &str) -> String {
        let request_id = generate_msg_id();
        self.moderation.lock().record_mute_all_request(&request_id, &self.self_id);
        self.broadcast_control_to_all(&ModerationMessage::ModMuteAllRequest {
            request_id: request_id.clone(),
            requested_by_peer_id: self.self_id.clone(),
            requested_by_name: requested_by_name.to_string(),
        });
        request_id
    }

    pub fn respond_mute_all_request(&self, request_id: &str, accepted: bool) {
        self.broadcast_control_to_all(&ModerationMessage::ModMuteAllResponse {
            request_id: request_id.to_string(),
            accepted,
        });
    }

    pub fn set_local_hand_raised(&self, raised: bool) {
        self.local_hand_raised.store(raised, Ordering::SeqCst);
        self.broadcast_control_to_all(&ModerationMessage::ModHandRaise {
            peer_id: self.self_id.clone(),
            raised,
        });
    }

    pub fn send_chat_message(&self, content: &str, timestamp: &str) -> ChatMessage {
        let message = ChatMessage {
            id: generate_msg_id(),
            sender_name: self.user_name.clone(),
            content: content.to_string(),
            timestamp: timestamp.to_string(),
        };
        let bytes = encode_chat_message(&message);
        for peer in self.peers.lock().values() {
            peer.send_chat(&bytes);
        }
        message
    }

    fn send_remote_mic(&self, target_peer_id: &str, message: &RemoteMicMessage) {
        let peer = self.peers.lock().get(target_peer_id).cloned();
        if let Some(peer) = peer {
            if let Ok(bytes) = remote_mic::encode(message) {
                peer.send_control(&bytes);
            }
        }
    }

    pub fn send_remote_mic_request(&self, target_peer_id: &str) -> String {
        let request_id = generate_msg_id();
        self.remote_mic.lock().request_sent(&request_id);
        self.send_remote_mic(target_peer_id, &RemoteMicMessage::RmRequest { request_id: request_id.clone() });
        request_id
    }

    pub fn send_remote_mic_response(&self, target_peer_id: &str, request_id: &str, accepted: bool, reason: Option<String>) {
        self.send_remote_mic(
            target_peer_id,
            &RemoteMicMessage::RmResponse { request_id: request_id.to_string(), accepted, reason },
        );
    }

    pub fn send_remote_mic_start(&self, target_peer_id: &str, request_id: &str) {
        self.send_remote_mic(target_peer_id, &RemoteMicMessage::RmStart { request_id: request_id.to_string() });
    }

    pub async fn send_remote_mic_stop(&self, target_peer_id: &str, request_id: &str, reason: Option<String>) {
        self.send_remote_mic(
            target_peer_id,
            &RemoteMicMessage::RmStop { request_id: request_id.to_string(), reason: reason.clone() },
        );
        let event = self.remote_mic.lock().clear(&self.self_id, Some(request_id), reason);
        self.events.emit(Event::RemoteMicControl(event));
        self.reset_routing_to_broadcast().await;
    }

    // ---- local track management ----

    pub async fn set_local_stream(&self, tracks: Vec<(LocalTrack, TrackKind)>) {
        *self.local_tracks.lock() = tracks.clone();
        let mode = self.routing_mode.lock().clone();
        let peers: Vec<Arc<PeerConn>> = self.peers.lock().values().cloned().collect();
        for peer in peers {
            if mode.should_send_to(&peer.peer_id) {
                for (track, kind) in &tracks {
                    if let Err(e) = peer.apply_local_track(track.clone(), *kind).await {
                        log::warn!("apply_local_track failed for {}: {e}", peer.peer_id);
                    }
                }
            }
        }
    }

    pub async fn replace_track(&self, track: LocalTrack, kind: TrackKind) {
        {
            let mut tracks = self.local_tracks.lock();
            if let Some(slot) = tracks.iter_mut().find(|(_, k)| *k == kind) {
                slot.0 = track.clone();
            } else {
                tracks.push((track.clone(), kind));
            }
        }
        let mode = self.routing_mode.lock().clone();
        let peers: Vec<Arc<PeerConn>> = self.peers.lock().values().cloned().collect();
        for peer in peers {
            if mode.should_send_to(&peer.peer_id) {
                if let Err(e) = peer.apply_local_track(track.clone(), kind).await {
                    log::warn!("apply_local_track failed for {}: {e}", peer.peer_id);
                }
            }
        }
    }

    pub async fn set_audio_routing_mode(&self, mode: AudioRoutingMode) {
        *self.routing_mode.lock() = mode.clone();
        let peers: Vec<Arc<PeerConn>> = self.peers.lock().values().cloned().collect();
        let tracks = self.local_tracks.lock().clone();
        for peer in peers {
            if mode.should_send_to(&peer.peer_id) {
                for (track, kind) in &tracks {
                    let _ = peer.apply_local_track(track.clone(), *kind).await;
                }
            } else if let Err(e) = peer.apply_routing_mode(&mode).await {
                log::warn!("apply_routing_mode failed for {}: {e}", peer.peer_id);
            }
        }
    }

    async fn reset_routing_to_broadcast(&self) {
        self.set_audio_routing_mode(AudioRoutingMode::Broadcast).await;
    }

    // ---- inbound envelope processing ----

    async fn process_inbound(self: &Arc<Self>, bytes: Vec<u8>) {
        let envelope = match Envelope::from_json(&bytes) {
            Some(e) => e,
            None => return,
        };
        if let Some(msg_id) = &envelope.msg_id {
            if self.dedup.lock().is_duplicate(msg_id) {
                return;
            }
        }
        match route_inbound(envelope, &self.self_id) {
            Action::Drop => {}
            Action::RecordLiveness { peer_id } => {
                self.heartbeat.lock().record_activity(&peer_id);
            }
            Action::ReplyPong { peer_id } => {
                self.heartbeat.lock().record_activity(&peer_id);
                self.broadcast_envelope(
                    Envelope::new(EnvelopeKind::Pong, &self.self_id).to(&peer_id).with_session(self.session_id),
                )
                .await;
            }
            Action::Forward(envelope) => {
                self.heartbeat.lock().record_activity(&envelope.from);
                self.dispatch_envelope(envelope).await;
            }
        }
    }

    async fn on_broker_reconnected(self: &Arc<Self>) {
        self.broadcast_announce().await;
        self.events.emit(Event::SignalingStateChange {
            connected_brokers: self.transport.connected_count(),
            total_brokers: self.total_brokers,
        });
    }

    async fn dispatch_envelope(self: &Arc<Self>, envelope: Envelope) {
        let from = envelope.from.clone();
        match envelope.kind {
            EnvelopeKind::Announce => {
                self.handle_announce(&from, envelope.user_name, envelope.platform).await;
            }
            EnvelopeKind::Offer { sdp } => {
                if session_matches(envelope.session_id, self.session_id) {
                    self.handle_offer(&from, &sdp, envelope.user_name, envelope.platform).await;
                }
            }
            EnvelopeKind::Answer { sdp } => {
                if session_matches(envelope.session_id, self.session_id) {
                    self.handle_answer(&from, &sdp).await;
                }
            }
            EnvelopeKind::IceCandidate { candidate } => {
                if session_matches(envelope.session_id, self.session_id) {
                    self.handle_ice_candidate(&from, candidate).await;
                }
            }
            EnvelopeKind::Leave => {
                self.cleanup_peer(&from, true).await;
            }
            EnvelopeKind::MuteStatus { mic_muted, speaker_muted, video_muted, video_enabled, is_screen_sharing } => {
                self.handle_mute_status(&from, mic_muted, speaker_muted, video_muted, video_enabled, is_screen_sharing)
                    .await;
            }
            EnvelopeKind::RoomLocked { locked_by_peer_id, .. } => {
                log::info!("room-locked notice from {locked_by_peer_id} while negotiating with {from}");
            }
            EnvelopeKind::Ping | EnvelopeKind::Pong => unreachable!("intercepted by route_inbound"),
        }
    }

    async fn handle_announce(self: &Arc<Self>, from: &str, user_name: Option<String>, platform: Option<Platform>) {
        let locked = self.moderation.lock().locked;
        let already_known = self.peers.lock().contains_key(from);
        if should_reject_for_lock(locked, already_known) {
            let locked_by = self.moderation.lock().locked_by_peer_id.clone().unwrap_or_else(|| self.self_id.clone());
            let ts = now_ms();
            self.broadcast_envelope(
                Envelope::new(EnvelopeKind::RoomLocked { locked_by_peer_id: locked_by, ts }, &self.self_id).to(from),
            )
            .await;
            return;
        }

        if let Some(peer) = self.peers.lock().get(from).cloned() {
            let state = peer.state.lock().clone();
            if should_keep_existing(&state, peer.ice_restart_in_progress.load(Ordering::SeqCst), self.cfg.new_connection_stale) {
                return;
            }
        }
        self.discard_peer(from).await;

        let user_name = user_name.unwrap_or_default();
        let platform = platform.unwrap_or(Platform::Other);

        if should_initiate_offer(&self.self_id, from) {
            match self.create_peer(from, user_name, platform, true).await {
                Ok(peer) => match peer.create_offer(false).await {
                    Ok(sdp) => {
                        peer.state.lock().transition(PeerState::Offering);
                        self.broadcast_envelope(
                            Envelope::new(EnvelopeKind::Offer { sdp }, &self.self_id)
                                .to(from)
                                .with_session(self.session_id),
                        )
                        .await;
                    }
                    Err(e) => {
                        log::warn!("createOffer failed for {from}: {e}");
                        self.discard_peer(from).await;
                    }
                },
                Err(e) => log::warn!("createPeer failed for {from}: {e}"),
            }
        } else {
            self.broadcast_announce().await;
        }
    }

    async fn create_peer(
        self: &Arc<Self>,
        peer_id: &str,
        user_name: String,
        platform: Platform,
        is_initiator: bool,
    ) -> Result<Arc<PeerConn>> {
        let peer = PeerConn::new(
            peer_id.to_string(),
            user_name,
            platform,
            is_initiator,
            &self.ice_servers,
            self.peer_event_tx.clone(),
        )
        .await?;

        let mode = self.routing_mode.lock().clone();
        let tracks = self.local_tracks.lock().clone();
        if mode.should_send_to(peer_id) {
            for (track, kind) in tracks {
                let _ = peer.apply_local_track(track, kind).await;
            }
        }

        self.peers.lock().insert(peer_id.to_string(), peer.clone());
        Ok(peer)
    }

    /// Removes and closes any existing peer for `peer_id` without firing
    /// `PeerLeave` — used when the caller is about to immediately build a
    /// fresh connection under the same id (a new `offer`/`announce`), not
    /// when the peer is actually gone.
    async fn discard_peer(&self, peer_id: &str) {
        let peer = self.peers.lock().remove(peer_id);
        if let Some(peer) = peer {
            peer.close().await;
        }
        self.pending_candidates.lock().remove(peer_id);
        self.previous_stats.lock().remove(peer_id);
        self.heartbeat.lock().remove(peer_id);
        self.cancel_disconnect_timer(peer_id);
        self.cancel_restart_watchdog(peer_id);
    }

    async fn handle_offer(self: &Arc<Self>, from: &str, sdp: &str, user_name: Option<String>, platform: Option<Platform>) {
        self.discard_peer(from).await;

        let user_name = user_name.unwrap_or_default();
        let platform = platform.unwrap_or(Platform::Other);

        let peer = match self.create_peer(from, user_name, platform, false).await {
            Ok(peer) => peer,
            Err(e) => {
                log::warn!("createPeer (responder) failed for {from}: {e}");
                return;
            }
        };

        peer.state.lock().transition(PeerState::Answering);
        let answer_sdp = match peer.handle_offer(sdp).await {
            Ok(sdp) => sdp,
            Err(e) => {
                log::warn!("handleOffer failed for {from}: {e}");
                self.discard_peer(from).await;
                return;
            }
        };

        self.flush_pending_candidates(&peer, from).await;
        peer.state.lock().transition(PeerState::Connecting);

        self.broadcast_envelope(
            Envelope::new(EnvelopeKind::Answer { sdp: answer_sdp }, &self.self_id)
                .to(from)
                .with_session(self.session_id),
        )
        .await;
    }

    async fn handle_answer(&self, from: &str, sdp: &str) {
        let peer = self.peers.lock().get(from).cloned();
        let peer = match peer {
            Some(peer) => peer,
            None => return,
        };
        if let Err(e) = peer.handle_answer(sdp).await {
            log::warn!("handleAnswer failed for {from}: {e}");
            return;
        }
        peer.state.lock().transition(PeerState::Connecting);
        self.flush_pending_candidates(&peer, from).await;
    }

    async fn handle_ice_candidate(&self, from: &str, candidate: serde_json::Value) {
        let candidate_json = match serde_json::to_string(&candidate) {
            Ok(json) => json,
            Err(_) => return,
        };
        let peer = self.peers.lock().get(from).cloned();
        match peer {
            Some(peer) if peer.has_remote_description() => {
                if let Err(e) = peer.add_ice_candidate(&candidate_json).await {
                    log::debug!("addIceCandidate failed for {from}: {e}");
                }
            }
            _ => {
                self.pending_candidates.lock().entry(from.to_string()).or_default().push(candidate_json);
            }
        }
    }

    async fn flush_pending_candidates(&self, peer: &Arc<PeerConn>, peer_id: &str) {
        let candidates = self.pending_candidates.lock().remove(peer_id).unwrap_or_default();
        for candidate in candidates {
            if let Err(e) = peer.add_ice_candidate(&candidate).await {
                log::debug!("flushed ICE candidate failed for {peer_id}: {e}");
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_mute_status(
        &self,
        from: &str,
        mic_muted: bool,
        speaker_muted: bool,
        video_muted: Option<bool>,
        video_enabled: Option<bool>,
        is_screen_sharing: Option<bool>,
    ) {
        if let Some(peer) = self.peers.lock().get(from) {
            *peer.mute_status.lock() = MuteStatus {
                mic_muted,
                speaker_muted,
                video_muted: video_muted.unwrap_or(false),
                video_enabled: video_enabled.unwrap_or(true),
                is_screen_sharing: is_screen_sharing.unwrap_or(false),
            };
        }
        self.events.emit(Event::MuteStatus {
            peer_id: from.to_string(),
            mic_muted,
            speaker_muted,
            video_muted,
            video_enabled,
            is_screen_sharing,
        });
    }

    // ---- peer lifecycle events ----

    async fn handle_peer_event(self: &Arc<Self>, event: PeerEvent) {
        match event {
            PeerEvent::IceCandidate { peer_id, candidate } => {
                let value: serde_json::Value = serde_json::from_str(&candidate).unwrap_or(serde_json::Value::Null);
                self.broadcast_envelope(
                    Envelope::new(EnvelopeKind::IceCandidate { candidate: value }, &self.self_id)
                        .to(&peer_id)
                        .with_session(self.session_id),
                )
                .await;
            }
            PeerEvent::IceConnected { peer_id } => {
                if let Some(peer) = self.peers.lock().get(&peer_id) {
                    peer.ice_connected.store(true, Ordering::SeqCst);
                    peer.ice_restart_attempts.store(0, Ordering::SeqCst);
                    peer.ice_restart_in_progress.store(false, Ordering::SeqCst);
                }
                self.cancel_disconnect_timer(&peer_id);
                self.cancel_restart_watchdog(&peer_id);
            }
            PeerEvent::IceFailed { peer_id } => {
                self.try_restart_ice(&peer_id).await;
            }
            PeerEvent::IceDisconnected { peer_id } => {
                if let Some(peer) = self.peers.lock().get(&peer_id) {
                    peer.ice_connected.store(false, Ordering::SeqCst);
                }
                self.arm_disconnect_grace(peer_id);
            }
            PeerEvent::ConnectionConnected { peer_id } => {
                let peer = self.peers.lock().get(&peer_id).cloned();
                if let Some(peer) = peer {
                    peer.is_connected.store(true, Ordering::SeqCst);
                    *peer.connection_start_time.lock() = Some(Instant::now());
                    peer.state.lock().transition(PeerState::Connected);
                    self.events.emit(Event::PeerJoin {
                        peer_id: peer_id.clone(),
                        user_name: peer.user_name.clone(),
                        platform: peer.platform,
                    });
                    self.schedule_post_connect_announcements(peer_id);
                }
            }
            PeerEvent::ConnectionDisconnected { peer_id } => {
                log::debug!("peer {peer_id} connection state: disconnected");
            }
            PeerEvent::ConnectionFailed { peer_id } => {
                let restarting = self
                    .peers
                    .lock()
                    .get(&peer_id)
                    .map(|p| p.ice_restart_in_progress.load(Ordering::SeqCst))
                    .unwrap_or(false);
                if !restarting {
                    self.cleanup_peer(&peer_id, true).await;
                }
            }
            PeerEvent::ConnectionClosed { peer_id } => {
                let was_connected =
                    self.peers.lock().get(&peer_id).map(|p| p.is_connected.load(Ordering::SeqCst)).unwrap_or(false);
                if was_connected {
                    self.cleanup_peer(&peer_id, true).await;
                } else {
                    self.discard_peer(&peer_id).await;
                }
            }
            PeerEvent::RemoteTrack { peer_id } => {
                self.events.emit(Event::RemoteStream { peer_id });
            }
            PeerEvent::DataChannelOpen { peer_id, label } => {
                log::debug!("data channel '{label}' open for {peer_id}");
            }
            PeerEvent::DataChannelMessage { peer_id, label, data } => {
                self.handle_data_channel_message(&peer_id, &label, &data).await;
            }
        }
    }

    async fn handle_data_channel_message(self: &Arc<Self>, peer_id: &str, label: &str, data: &[u8]) {
        match label {
            CHAT_LABEL => {
                if let Some(message) = parse_chat_message(data) {
                    self.events.emit(Event::Chat {
                        peer_id: peer_id.to_string(),
                        id: message.id,
                        sender_name: message.sender_name,
                        content: message.content,
                        timestamp: message.timestamp,
                    });
                }
            }
            CONTROL_LABEL => {
                if let Some(message) = moderation::parse(data) {
                    self.handle_moderation_message(peer_id, message).await;
                } else if let Some(message) = remote_mic::parse(data) {
                    self.handle_remote_mic_message(peer_id, message).await;
                } else {
                    log::debug!("discarded malformed control payload from {peer_id}");
                }
            }
            _ => {}
        }
    }

    async fn handle_moderation_message(&self, from: &str, message: ModerationMessage) {
        let event = match message {
            ModerationMessage::ModRoomLock { locked, locked_by_peer_id } => {
                self.moderation.lock().set_lock(locked, &locked_by_peer_id);
                Some(ModerationEvent::RoomLockChanged { locked, locked_by_peer_id: Some(locked_by_peer_id) })
            }
            ModerationMessage::ModRoomLockedNotice { locked_by_peer_id } => {
                Some(ModerationEvent::RoomLockChanged { locked: true, locked_by_peer_id: Some(locked_by_peer_id) })
            }
            ModerationMessage::ModMuteAllRequest { request_id, requested_by_peer_id, requested_by_name } => {
                self.moderation.lock().record_mute_all_request(&request_id, &requested_by_peer_id);
                Some(ModerationEvent::MuteAllRequested { request_id, requested_by_peer_id, requested_by_name })
            }
            ModerationMessage::ModMuteAllResponse { request_id, accepted } => {
                self.moderation.lock().resolve_mute_all_request(&request_id);
                Some(ModerationEvent::MuteAllResponded { request_id, accepted })
            }
            ModerationMessage::ModHandRaise { peer_id, raised } => {
                self.moderation.lock().set_hand_raised(&peer_id, raised);
                Some(ModerationEvent::HandRaiseChanged { peer_id, raised })
            }
        };
        if let Some(event) = event {
            self.events.emit(Event::ModerationControl(event));
        }
        let _ = from;
    }

    async fn handle_remote_mic_message(&self, from: &str, message: RemoteMicMessage) {
        match message {
            RemoteMicMessage::RmRequest { request_id } => {
                self.events.emit(Event::RemoteMicControl(RemoteMicEvent::Requested {
                    peer_id: from.to_string(),
                    request_id,
                }));
            }
            RemoteMicMessage::RmResponse { request_id, accepted, .. } => {
                let event = self.remote_mic.lock().on_response(from, &request_id, accepted);
                if let Some(event) = event {
                    self.events.emit(Event::RemoteMicControl(event));
                }
            }
            RemoteMicMessage::RmStart { request_id } => {
                let event = self.remote_mic.lock().on_start(from, &request_id);
                self.events.emit(Event::RemoteMicControl(event));
            }
            RemoteMicMessage::RmHeartbeat { .. } => {
                self.heartbeat.lock().record_activity(from);
            }
            RemoteMicMessage::RmStop { request_id, reason } => {
                if self.remote_mic.lock().is_active_source(from) {
                    let event = self.remote_mic.lock().clear(from, Some(&request_id), reason);
                    self.events.emit(Event::RemoteMicControl(event));
                    self.reset_routing_to_broadcast().await;
                }
            }
        }
    }

    // ---- cleanup / ICE restart / timers ----

    async fn cleanup_peer(self: &Arc<Self>, peer_id: &str, emit_events: bool) {
        let peer = self.peers.lock().remove(peer_id);
        let peer = match peer {
            Some(peer) => peer,
            None => return,
        };
        peer.close().await;
        self.pending_candidates.lock().remove(peer_id);
        self.previous_stats.lock().remove(peer_id);
        self.heartbeat.lock().remove(peer_id);
        self.cancel_disconnect_timer(peer_id);
        self.cancel_restart_watchdog(peer_id);

        if emit_events {
            self.events.emit(Event::PeerLeave {
                peer_id: peer_id.to_string(),
                user_name: peer.user_name.clone(),
                platform: peer.platform,
            });

            if self.remote_mic.lock().is_active_source(peer_id) {
                let event = self.remote_mic.lock().clear(peer_id, None, Some("peer disconnected".to_string()));
                self.events.emit(Event::RemoteMicControl(event));
                self.reset_routing_to_broadcast().await;
            }

            for mod_event in self.moderation.lock().on_peer_disconnect(peer_id) {
                self.events.emit(Event::ModerationControl(mod_event));
            }
        }

        if self.peers.lock().is_empty() {
            self.broadcast_announce().await;
        }
    }

    fn try_restart_ice<'a>(self: &'a Arc<Self>, peer_id: &'a str) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
      Box::pin(async move {
        let peer = self.peers.lock().get(peer_id).cloned();
        let peer = match peer {
            Some(peer) => peer,
            None => return,
        };
        if peer.ice_restart_in_progress.load(Ordering::SeqCst) {
            return;
        }
        if peer.ice_restart_attempts.load(Ordering::SeqCst) >= self.cfg.max_ice_restart_attempts {
            self.cleanup_peer(peer_id, true).await;
            return;
        }

        let attempt = peer.ice_restart_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        peer.ice_restart_in_progress.store(true, Ordering::SeqCst);
        peer.state.lock().transition(PeerState::Restarting);
        self.arm_restart_watchdog(peer_id.to_string());

        match peer.restart_ice().await {
            Ok(sdp) => {
                self.broadcast_envelope(
                    Envelope::new(EnvelopeKind::Offer { sdp }, &self.self_id)
                        .to(peer_id)
                        .with_session(self.session_id),
                )
                .await;
            }
            Err(e) => {
                log::warn!("ICE restart offer failed for {peer_id}: {e}");
                peer.ice_restart_in_progress.store(false, Ordering::SeqCst);
                self.cancel_restart_watchdog(peer_id);
                if attempt < self.cfg.max_ice_restart_attempts {
                    let delay = ice_restart_retry_delay(&self.cfg, attempt);
                    let room = self.clone();
                    let peer_id = peer_id.to_string();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        room.try_restart_ice(&peer_id).await;
                    });
                } else {
                    self.cleanup_peer(peer_id, true).await;
                }
            }
        }
    }

    fn arm_disconnect_grace(self: &Arc<Self>, peer_id: String) {
        let room = self.clone();
        let grace = self.cfg.disconnect_grace;
        let key = peer_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let still_disconnected =
                room.peers.lock().get(&peer_id).map(|p| !p.ice_connected.load(Ordering::SeqCst)).unwrap_or(false);
            if still_disconnected {
                room.try_restart_ice(&peer_id).await;
            }
        });
        if let Some(old) = self.disconnect_timers.lock().insert(key, handle) {
            old.abort();
        }
    }

    fn arm_restart_watchdog(self: &Arc<Self>, peer_id: String) {
        let room = self.clone();
        let watchdog = self.cfg.ice_restart_watchdog;
        let key = peer_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(watchdog).await;
            let still_restarting = room
                .peers
                .lock()
                .get(&peer_id)
                .map(|p| p.ice_restart_in_progress.load(Ordering::SeqCst))
                .unwrap_or(false);
            if still_restarting {
                room.cleanup_peer(&peer_id, true).await;
            }
        });
        if let Some(old) = self.restart_watchdogs.lock().insert(key, handle) {
            old.abort();
        }
    }

    fn cancel_disconnect_timer(&self, peer_id: &str) {
        if let Some(handle) = self.disconnect_timers.lock().remove(peer_id) {
            handle.abort();
        }
    }

    fn cancel_restart_watchdog(&self, peer_id: &str) {
        if let Some(handle) = self.restart_watchdogs.lock().remove(peer_id) {
            handle.abort();
        }
    }

    fn schedule_post_connect_announcements(self: &Arc<Self>, peer_id: String) {
        let room = self.clone();
        let mute_delay = self.cfg.post_connect_mute_delay;
        let lock_delay = self.cfg.post_connect_lock_delay.saturating_sub(mute_delay);
        let hand_raise_delay = self.cfg.post_connect_hand_raise_delay.saturating_sub(self.cfg.post_connect_lock_delay);
        tokio::spawn(async move {
            tokio::time::sleep(mute_delay).await;
            let status = room.local_mute_status.lock().clone();
            room.broadcast_envelope(
                Envelope::new(
                    EnvelopeKind::MuteStatus {
                        mic_muted: status.mic_muted,
                        speaker_muted: status.speaker_muted,
                        video_muted: Some(status.video_muted),
                        video_enabled: Some(status.video_enabled),
                        is_screen_sharing: Some(status.is_screen_sharing),
                    },
                    &room.self_id,
                )
                .to(&peer_id)
                .with_session(room.session_id),
            )
            .await;

            tokio::time::sleep(lock_delay).await;
            let (locked, locked_by) = {
                let moderation = room.moderation.lock();
                (moderation.locked, moderation.locked_by_peer_id.clone())
            };
            if locked {
                if let Some(peer) = room.peers.lock().get(&peer_id).cloned() {
                    if let Ok(bytes) = moderation::encode(&ModerationMessage::ModRoomLockedNotice {
                        locked_by_peer_id: locked_by.unwrap_or_else(|| room.self_id.clone()),
                    }) {
                        peer.send_control(&bytes);
                    }
                }
            }

            tokio::time::sleep(hand_raise_delay).await;
            if room.local_hand_raised.load(Ordering::SeqCst) {
                if let Some(peer) = room.peers.lock().get(&peer_id).cloned() {
                    if let Ok(bytes) =
                        moderation::encode(&ModerationMessage::ModHandRaise { peer_id: room.self_id.clone(), raised: true })
                    {
                        peer.send_control(&bytes);
                    }
                }
            }
        });
    }

    // ---- heartbeat / dedup background loops ----

    async fn heartbeat_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.cfg.heartbeat_tick);
        loop {
            interval.tick().await;
            let peer_ids: Vec<String> = self.peers.lock().keys().cloned().collect();
            let outcome = self.heartbeat.lock().tick(&peer_ids, self.cfg.heartbeat_timeout, self.cfg.heartbeat_ping_interval);
            for peer_id in outcome.evicted {
                self.cleanup_peer(&peer_id, true).await;
            }
            for peer_id in outcome.to_ping {
                self.broadcast_envelope(
                    Envelope::new(EnvelopeKind::Ping, &self.self_id).to(&peer_id).with_session(self.session_id),
                )
                .await;
            }
        }
    }

    async fn dedup_cleaner_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.dedup.lock().cleaner_interval());
        loop {
            interval.tick().await;
            self.dedup.lock().clean_expired();
        }
    }

    /// Disconnects and reconnects every broker, re-subscribing the room
    /// topic. Used by [`crate::network::NetworkSupervisor`]-driven
    /// reconnection and manual reconnect alike.
    pub async fn reconnect_transport(&self) -> bool {
        self.transport.disconnect_all().await;
        let connected = self.transport.connect_all().await;
        if connected.is_empty() {
            return false;
        }
        let subscribed = self.transport.subscribe_all(&self.topic).await;
        subscribed > 0
    }

    // ---- accessors ----

    pub fn get_peers(&self) -> Vec<PeerSummary> {
        self.peers
            .lock()
            .values()
            .map(|peer| PeerSummary {
                peer_id: peer.peer_id.clone(),
                user_name: peer.user_name.clone(),
                platform: peer.platform,
                connected: peer.is_connected.load(Ordering::SeqCst),
            })
            .collect()
    }

    pub fn get_all_peer_mute_statuses(&self) -> HashMap<String, MuteStatus> {
        self.peers.lock().iter().map(|(id, peer)| (id.clone(), peer.mute_status.lock().clone())).collect()
    }

    pub async fn get_connection_stats(&self) -> Vec<QualityReport> {
        let peers: Vec<Arc<PeerConn>> = self.peers.lock().values().cloned().collect();
        let mut reports = Vec::with_capacity(peers.len());
        for peer in peers {
            let stats_report = peer.stats().await;
            let snapshot = quality::extract_snapshot(&stats_report);
            let conn_state =
                if peer.is_connected.load(Ordering::SeqCst) { ConnectionState::Connected } else { ConnectionState::Other };
            let mut previous = self.previous_stats.lock().get(&peer.peer_id).copied();
            let report = quality::compute(&peer.peer_id, conn_state, &snapshot, &mut previous);
            if let Some(previous) = previous {
                self.previous_stats.lock().insert(peer.peer_id.clone(), previous);
            }
            reports.push(report);
        }
        reports
    }

    pub fn get_moderation_state(&self) -> ModerationSnapshot {
        let moderation = self.moderation.lock();
        ModerationSnapshot {
            locked: moderation.locked,
            locked_by_peer_id: moderation.locked_by_peer_id.clone(),
            hand_raises: moderation.hand_raises(),
        }
    }

    pub fn get_debug_info(&self) -> DebugInfo {
        let peers = self.peers.lock();
        let mut peers_by_state: HashMap<String, usize> = HashMap::new();
        for peer in peers.values() {
            let state = format!("{:?}", peer.state.lock().state);
            *peers_by_state.entry(state).or_insert(0) += 1;
        }
        DebugInfo {
            connected_brokers: self.transport.connected_count(),
            total_brokers: self.total_brokers,
            dedup_cache_size: self.dedup.lock().len(),
            peer_count: peers.len(),
            peers_by_state,
        }
    }

    pub fn get_signaling_state(&self) -> SignalingState {
        SignalingState { connected_brokers: self.transport.connected_count(), total_brokers: self.total_brokers }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}
