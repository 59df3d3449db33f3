//! WebSocket Game Server
//!
//! Async WebSocket server for duel rooms. Routes client messages into the
//! duel engine, schedules the delayed effects (attack impacts, shield
//! expiry, disconnect grace periods) and runs the periodic win-condition
//! sweep. Every scheduled task carries plain identifiers - room code,
//! attack id, shield sequence - and re-validates them at fire time, so a
//! timer that outlives its room is a silent no-op.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::interval;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::game::duel::{
    DuelError, EndReason, MatchOutcome, PendingAttack, Phase, PlayerSlot, SlotRole,
};
use crate::game::tier::{Tier, SHIELD_DURATION};
use crate::game::words::{pool_or_fallback, WordSource};
use crate::network::liveness::{LivenessTimers, TimerPair};
use crate::network::protocol::{AttackInfo, ClientMessage, MatchResultInfo, ServerMessage};
use crate::network::registry::{SessionHandle, SessionRegistry};
use crate::recorder::{MatchRecorder, MatchSummary, PlayerSummary};
use crate::{
    DISCONNECT_GRACE_PERIOD, DISCONNECT_NOTIFY_DELAY, LEAVE_CLEANUP_DELAY, RESULT_DISPLAY_DELAY,
    SWEEP_INTERVAL,
};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Word-pool topic used when `create_room` omits one.
    pub default_topic: String,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().unwrap(),
            max_connections: 1000,
            default_topic: "general".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Connected client state.
struct ConnectedClient {
    /// Identity bound at create/join/rejoin.
    identity: Option<Uuid>,
    /// Room the connection is bound to.
    room_code: Option<String>,
    /// Connection time.
    #[allow(dead_code)]
    connected_at: Instant,
    /// Message sender (for direct messaging to client).
    #[allow(dead_code)]
    sender: mpsc::Sender<ServerMessage>,
}

/// State shared by the accept loop, per-connection tasks, timers and the
/// win sweep.
struct Shared {
    config: ServerConfig,
    registry: SessionRegistry,
    timers: LivenessTimers,
    clients: RwLock<BTreeMap<SocketAddr, ConnectedClient>>,
    words: Arc<dyn WordSource>,
    recorder: Arc<dyn MatchRecorder>,
}

/// The game server.
pub struct GameServer {
    shared: Arc<Shared>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

/// Wire representation of a pending attack.
fn attack_info(attack: &PendingAttack) -> AttackInfo {
    AttackInfo {
        id: attack.id,
        from: attack.origin,
        target: attack.target,
        tier: attack.tier,
        damage: attack.damage,
        travel_ms: attack.tier.travel_time().as_millis() as u64,
        word: attack.word.clone(),
    }
}

impl GameServer {
    /// Create a new game server.
    pub fn new(
        config: ServerConfig,
        words: Arc<dyn WordSource>,
        recorder: Arc<dyn MatchRecorder>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            shared: Arc::new(Shared {
                config,
                registry: SessionRegistry::new(),
                timers: LivenessTimers::new(),
                clients: RwLock::new(BTreeMap::new()),
                words,
                recorder,
            }),
            shutdown_tx,
        }
    }

    /// Run the server.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.shared.config.bind_addr).await?;
        info!("Game server listening on {}", self.shared.config.bind_addr);

        // Spawn the win-condition sweep
        let sweep_shared = self.shared.clone();
        let sweep_handle = tokio::spawn(async move {
            Self::run_win_sweep(sweep_shared).await;
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.shared.clients.read().await.len();
                            if clients_count >= self.shared.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        sweep_handle.abort();
        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let shared = self.shared.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(64);

            // Register client
            {
                let mut clients = shared.clients.write().await;
                clients.insert(
                    addr,
                    ConnectedClient {
                        identity: None,
                        room_code: None,
                        connected_at: Instant::now(),
                        sender: msg_tx.clone(),
                    },
                );
            }

            // Spawn message sender task
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            // Handle incoming messages
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let client_msg = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        let _ = msg_tx.send(ServerMessage::Error {
                                            message: "Invalid message format".to_string(),
                                        }).await;
                                        continue;
                                    }
                                };

                                Self::handle_client_message(&shared, addr, client_msg, &msg_tx)
                                    .await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }

            // Cleanup
            sender_task.abort();
            Self::handle_socket_disconnect(&shared, addr).await;
            info!("Client {} cleaned up", addr);
        });
    }

    /// Handle a client message.
    async fn handle_client_message(
        shared: &Arc<Shared>,
        addr: SocketAddr,
        msg: ClientMessage,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        match msg {
            ClientMessage::CreateRoom {
                username,
                identity,
                topic,
            } => {
                Self::handle_create_room(shared, addr, username, identity, topic, sender).await;
            }
            ClientMessage::JoinRoom {
                room_code,
                username,
                identity,
            } => {
                Self::handle_join_room(shared, addr, room_code, username, identity, sender).await;
            }
            ClientMessage::PlayerReady { room_code } => {
                Self::handle_player_ready(shared, addr, room_code, sender).await;
            }
            ClientMessage::SendAttack { room_code, tier } => {
                Self::handle_send_attack(shared, addr, room_code, tier, sender).await;
            }
            ClientMessage::ActivateShield { room_code } => {
                Self::handle_activate_shield(shared, addr, room_code, sender).await;
            }
            ClientMessage::RequestState { room_code } => {
                Self::handle_request_state(shared, addr, room_code, sender).await;
            }
            ClientMessage::LeaveRoom { room_code } => {
                Self::handle_leave_room(shared, addr, room_code, sender).await;
            }
            ClientMessage::RejoinRoom {
                room_code,
                username,
                identity,
            } => {
                Self::handle_rejoin_room(shared, addr, room_code, username, identity, sender).await;
            }
        }
    }

    /// Identity the connection bound at create/join/rejoin.
    async fn client_identity(shared: &Arc<Shared>, addr: SocketAddr) -> Option<Uuid> {
        shared.clients.read().await.get(&addr).and_then(|c| c.identity)
    }

    /// Bind a connection to an identity and room.
    async fn bind_client(shared: &Arc<Shared>, addr: SocketAddr, identity: Uuid, room_code: &str) {
        let mut clients = shared.clients.write().await;
        if let Some(client) = clients.get_mut(&addr) {
            client.identity = Some(identity);
            client.room_code = Some(room_code.to_string());
        }
    }

    async fn send_error(sender: &mpsc::Sender<ServerMessage>, message: impl Into<String>) {
        let _ = sender
            .send(ServerMessage::Error {
                message: message.into(),
            })
            .await;
    }

    /// Handle `create_room`.
    async fn handle_create_room(
        shared: &Arc<Shared>,
        addr: SocketAddr,
        username: String,
        identity: Option<Uuid>,
        topic: Option<String>,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        // Guests get a server-assigned identity; it cannot be used to
        // rejoin from a fresh connection.
        let registered = identity.is_some();
        let identity = identity.unwrap_or_else(Uuid::new_v4);
        let topic = topic.unwrap_or_else(|| shared.config.default_topic.clone());

        let (room_code, session) = shared
            .registry
            .create(topic, identity, registered, username.clone(), sender.clone())
            .await;

        Self::bind_client(shared, addr, identity, &room_code).await;

        let (roster, phase) = {
            let s = session.read().await;
            (s.roster(), s.phase)
        };
        let _ = sender
            .send(ServerMessage::RoomCreated {
                room_code: room_code.clone(),
                identity,
                roster,
                phase,
            })
            .await;

        info!(room = %room_code, %username, "room created");
    }

    /// Handle `join_room`. A join carrying an identity that already holds
    /// a slot is a reconnection, not a second seat.
    async fn handle_join_room(
        shared: &Arc<Shared>,
        addr: SocketAddr,
        room_code: String,
        username: String,
        identity: Option<Uuid>,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        let Some(session) = shared.registry.get(&room_code).await else {
            Self::send_error(sender, "Room not found").await;
            return;
        };

        let registered = identity.is_some();
        let identity = identity.unwrap_or_else(Uuid::new_v4);

        let outcome = {
            let mut s = session.write().await;
            s.join(identity, registered, username.clone(), sender.clone())
        };
        let outcome = match outcome {
            Ok(o) => o,
            Err(e) => {
                Self::send_error(sender, e.to_string()).await;
                return;
            }
        };

        Self::bind_client(shared, addr, identity, &room_code).await;

        if outcome.reconnected {
            Self::finish_reconnect(shared, &room_code, &session, outcome.role, identity, &username)
                .await;
            return;
        }

        {
            let s = session.read().await;
            let update = ServerMessage::RoomUpdate {
                roster: s.roster(),
                phase: s.phase,
            };
            s.broadcast(update);
        }

        info!(room = %room_code, %username, "player joined");
    }

    /// Handle `player_ready`. Starting the match when both flags are set.
    async fn handle_player_ready(
        shared: &Arc<Shared>,
        addr: SocketAddr,
        room_code: String,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        let Some(identity) = Self::client_identity(shared, addr).await else {
            Self::send_error(sender, DuelError::UnknownPlayer.to_string()).await;
            return;
        };
        let Some(session) = shared.registry.get(&room_code).await else {
            Self::send_error(sender, "Room not found").await;
            return;
        };

        let ready = {
            let mut s = session.write().await;
            match s.slot_of(identity) {
                Some(role) => s.mark_ready(role),
                None => Err(DuelError::UnknownPlayer),
            }
        };
        let start = match ready {
            Ok(start) => start,
            Err(e) => {
                Self::send_error(sender, e.to_string()).await;
                return;
            }
        };

        {
            let s = session.read().await;
            let update = ServerMessage::RoomUpdate {
                roster: s.roster(),
                phase: s.phase,
            };
            s.broadcast(update);
        }

        if !start {
            return;
        }

        // Both ready: fetch words (outside the lock) and start
        let topic = { session.read().await.topic.clone() };
        let pool = pool_or_fallback(shared.words.as_ref(), &topic);

        let begun = {
            let mut s = session.write().await;
            let mut rng = rand::thread_rng();
            s.begin(&pool, &mut rng)
        };
        if let Err(e) = begun {
            Self::send_error(sender, e.to_string()).await;
            return;
        }

        {
            let s = session.read().await;
            for role in [SlotRole::SlotA, SlotRole::SlotB] {
                if let Some(start) = s.game_start_for(role) {
                    s.send_to(role, ServerMessage::GameStart(start));
                }
            }
        }

        info!(room = %room_code, "match started");
    }

    /// Handle `send_attack`: launch and schedule the impact after the
    /// tier's travel time.
    async fn handle_send_attack(
        shared: &Arc<Shared>,
        addr: SocketAddr,
        room_code: String,
        tier: Tier,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        let Some(identity) = Self::client_identity(shared, addr).await else {
            Self::send_error(sender, DuelError::UnknownPlayer.to_string()).await;
            return;
        };
        let Some(session) = shared.registry.get(&room_code).await else {
            Self::send_error(sender, "Room not found").await;
            return;
        };

        let launch = {
            let mut s = session.write().await;
            match s.slot_of(identity) {
                Some(role) => s.launch_attack(role, tier),
                None => Err(DuelError::UnknownPlayer),
            }
        };
        let launch = match launch {
            Ok(l) => l,
            Err(e) => {
                Self::send_error(sender, e.to_string()).await;
                return;
            }
        };

        {
            let s = session.read().await;
            s.broadcast(ServerMessage::AttackLaunched {
                attack: attack_info(&launch.attack),
                ammo_remaining: launch.ammo_remaining,
            });
        }

        // Impact timer: resolve-by-id is the only guard it needs
        let shared = shared.clone();
        let attack_id = launch.attack.id;
        let travel = tier.travel_time();
        tokio::spawn(async move {
            tokio::time::sleep(travel).await;
            Self::resolve_attack(&shared, &room_code, attack_id).await;
        });
    }

    /// Fire one attack impact. A vanished room or an already-resolved id
    /// is a no-op.
    async fn resolve_attack(shared: &Arc<Shared>, room_code: &str, attack_id: u64) {
        let Some(session) = shared.registry.get(room_code).await else {
            return;
        };
        let impact = { session.write().await.resolve_attack(attack_id) };
        let Some(impact) = impact else {
            return;
        };

        let s = session.read().await;
        s.send_to(
            impact.attack.target,
            ServerMessage::ReceiveAttack {
                attack_id,
                tier: impact.attack.tier,
                blocked: impact.blocked,
                damage: impact.damage,
                target_hp: impact.target_hp,
            },
        );
        s.broadcast(ServerMessage::AttackImpact {
            attack_id,
            target: impact.attack.target,
            blocked: impact.blocked,
            damage: impact.damage,
            target_hp: impact.target_hp,
        });
    }

    /// Handle `activate_shield` and schedule the sequence-guarded expiry.
    async fn handle_activate_shield(
        shared: &Arc<Shared>,
        addr: SocketAddr,
        room_code: String,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        let Some(identity) = Self::client_identity(shared, addr).await else {
            Self::send_error(sender, DuelError::UnknownPlayer.to_string()).await;
            return;
        };
        let Some(session) = shared.registry.get(&room_code).await else {
            Self::send_error(sender, "Room not found").await;
            return;
        };

        let activated = {
            let mut s = session.write().await;
            match s.slot_of(identity) {
                Some(role) => s.activate_shield(role).map(|a| (role, a)),
                None => Err(DuelError::UnknownPlayer),
            }
        };
        let (role, activation) = match activated {
            Ok(r) => r,
            Err(e) => {
                Self::send_error(sender, e.to_string()).await;
                return;
            }
        };

        {
            let s = session.read().await;
            s.send_to(
                role,
                ServerMessage::ShieldActivated {
                    role,
                    shield: activation.shield,
                    ammo_remaining: activation.ammo_remaining,
                },
            );
            s.send_to(
                role.opponent(),
                ServerMessage::EnemyShieldActive {
                    role,
                    shield: activation.shield,
                },
            );
        }

        // Expiry timer: carries the activation sequence so it never tears
        // down a newer shield
        let shared = shared.clone();
        let seq = activation.seq;
        tokio::spawn(async move {
            tokio::time::sleep(SHIELD_DURATION).await;
            if let Some(session) = shared.registry.get(&room_code).await {
                let expired = { session.write().await.expire_shield(role, seq) };
                if expired {
                    debug!(room = %room_code, ?role, "shield expired unused");
                }
            }
        });
    }

    /// Handle `request_state`.
    async fn handle_request_state(
        shared: &Arc<Shared>,
        addr: SocketAddr,
        room_code: String,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        let Some(identity) = Self::client_identity(shared, addr).await else {
            Self::send_error(sender, DuelError::UnknownPlayer.to_string()).await;
            return;
        };
        let Some(session) = shared.registry.get(&room_code).await else {
            Self::send_error(sender, "Room not found").await;
            return;
        };

        let snapshot = {
            let s = session.read().await;
            s.slot_of(identity).and_then(|role| s.snapshot_for(role))
        };
        match snapshot {
            Some(snapshot) => {
                let _ = sender.send(ServerMessage::StateUpdate(snapshot)).await;
            }
            None => {
                Self::send_error(sender, DuelError::UnknownPlayer.to_string()).await;
            }
        }
    }

    /// Handle `leave_room`: an intentional leave ends the match
    /// immediately, with no grace period.
    async fn handle_leave_room(
        shared: &Arc<Shared>,
        addr: SocketAddr,
        room_code: String,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        let Some(identity) = Self::client_identity(shared, addr).await else {
            Self::send_error(sender, DuelError::UnknownPlayer.to_string()).await;
            return;
        };
        let Some(session) = shared.registry.get(&room_code).await else {
            Self::send_error(sender, "Room not found").await;
            return;
        };

        shared.timers.cancel(&room_code, identity).await;

        let located = {
            let s = session.read().await;
            s.slot_of(identity).map(|role| {
                let username = s
                    .slot(role)
                    .map(|p| p.username.clone())
                    .unwrap_or_default();
                (role, username, s.phase)
            })
        };
        let Some((role, username, phase)) = located else {
            Self::send_error(sender, DuelError::UnknownPlayer.to_string()).await;
            return;
        };

        {
            session.write().await.mark_disconnected(role);
        }
        {
            let s = session.read().await;
            s.send_to(
                role.opponent(),
                ServerMessage::PlayerDisconnected {
                    role,
                    message: format!("{username} left the room"),
                },
            );
        }

        match phase {
            Phase::InProgress => {
                Self::complete_match(
                    shared,
                    &room_code,
                    &session,
                    MatchOutcome {
                        winner: Some(role.opponent()),
                        reason: EndReason::OpponentLeft,
                    },
                )
                .await;
            }
            Phase::Lobby | Phase::AwaitingReady => {
                let shared = shared.clone();
                let room = room_code.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(LEAVE_CLEANUP_DELAY).await;
                    shared.timers.cancel_room(&room).await;
                    if shared.registry.remove(&room).await.is_some() {
                        debug!(room = %room, "room removed after leave");
                    }
                });
            }
            Phase::Finished => {}
        }

        // Unbind the connection from the room
        {
            let mut clients = shared.clients.write().await;
            if let Some(client) = clients.get_mut(&addr) {
                client.room_code = None;
            }
        }

        info!(room = %room_code, %username, "player left");
    }

    /// Handle `rejoin_room`: a fresh connection reclaiming its slot within
    /// the grace period.
    ///
    /// A finished room lingers for the result-display window; rejoining
    /// during it resyncs into `Finished` so the client can render the
    /// result. Once the room is removed, rejoin fails with room-not-found.
    async fn handle_rejoin_room(
        shared: &Arc<Shared>,
        addr: SocketAddr,
        room_code: String,
        username: String,
        identity: Uuid,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        let Some(session) = shared.registry.get(&room_code).await else {
            let _ = sender
                .send(ServerMessage::RejoinFailed {
                    message: "Room not found".to_string(),
                })
                .await;
            return;
        };

        let role = { session.read().await.slot_of(identity) };
        let Some(role) = role else {
            let _ = sender
                .send(ServerMessage::RejoinFailed {
                    message: "No seat in this room for that identity".to_string(),
                })
                .await;
            return;
        };

        {
            session.write().await.rebind(role, sender.clone());
        }
        Self::bind_client(shared, addr, identity, &room_code).await;
        Self::finish_reconnect(shared, &room_code, &session, role, identity, &username).await;
    }

    /// Common tail of both reconnection paths (`join_room` with a known
    /// identity, and `rejoin_room`): cancel the grace-period timers,
    /// resync the returning client and tell the opponent.
    async fn finish_reconnect(
        shared: &Arc<Shared>,
        room_code: &str,
        session: &SessionHandle,
        role: SlotRole,
        identity: Uuid,
        username: &str,
    ) {
        shared.timers.cancel(room_code, identity).await;

        let s = session.read().await;
        if let Some(snapshot) = s.snapshot_for(role) {
            s.send_to(role, ServerMessage::RejoinSuccess { snapshot });
        }
        // Mid-match rejoin also gets the full ammunition list back, with
        // used flags, so the client converges exactly
        if let Some(start) = s.game_start_for(role) {
            s.send_to(role, ServerMessage::GameStart(start));
        }
        s.send_to(
            role.opponent(),
            ServerMessage::PlayerReconnected {
                role,
                username: username.to_string(),
            },
        );

        info!(room = %room_code, %username, "player reconnected");
    }

    /// Handle a dropped socket: unbind the connection and, if it held a
    /// slot, start the grace-period timer pair.
    async fn handle_socket_disconnect(shared: &Arc<Shared>, addr: SocketAddr) {
        let removed = { shared.clients.write().await.remove(&addr) };
        let Some(client) = removed else {
            return;
        };
        let (Some(identity), Some(room_code)) = (client.identity, client.room_code) else {
            return;
        };

        // A reconnect replaces the socket before the old one is reaped; if
        // another live connection holds this seat, the drop is stale.
        let rebound = {
            let clients = shared.clients.read().await;
            clients.values().any(|c| {
                c.identity == Some(identity) && c.room_code.as_deref() == Some(room_code.as_str())
            })
        };
        if rebound {
            return;
        }

        let Some(session) = shared.registry.get(&room_code).await else {
            return;
        };

        let located = {
            let mut s = session.write().await;
            match s.slot_of(identity) {
                Some(role) if s.phase != Phase::Finished => {
                    s.mark_disconnected(role);
                    let username = s
                        .slot(role)
                        .map(|p| p.username.clone())
                        .unwrap_or_default();
                    let has_opponent = s.slot(role.opponent()).is_some();
                    Some((role, username, has_opponent))
                }
                _ => None,
            }
        };
        let Some((role, username, has_opponent)) = located else {
            return;
        };

        if !has_opponent {
            // Alone in the lobby: nothing to wait for
            shared.timers.cancel_room(&room_code).await;
            shared.registry.remove(&room_code).await;
            info!(room = %room_code, "empty room removed");
            return;
        }

        let notify = {
            let shared = shared.clone();
            let room = room_code.clone();
            let name = username.clone();
            tokio::spawn(async move {
                tokio::time::sleep(DISCONNECT_NOTIFY_DELAY).await;
                let Some(session) = shared.registry.get(&room).await else {
                    return;
                };
                let s = session.read().await;
                if s.slot(role).is_some_and(|p| !p.connected) {
                    s.send_to(
                        role.opponent(),
                        ServerMessage::PlayerTemporarilyDisconnected {
                            role,
                            username: name.clone(),
                            message: format!("{name} disconnected, waiting for reconnect..."),
                        },
                    );
                }
            })
        };

        let forfeit = {
            let shared = shared.clone();
            let room = room_code.clone();
            let name = username.clone();
            tokio::spawn(async move {
                tokio::time::sleep(DISCONNECT_GRACE_PERIOD).await;
                shared.timers.forget(&room, identity).await;
                Self::forfeit_after_grace(&shared, &room, role, identity, &name).await;
            })
        };

        if shared
            .timers
            .insert(&room_code, identity, TimerPair { notify, forfeit })
            .await
        {
            info!(room = %room_code, %username, "grace period started");
        }
    }

    /// Grace period expired without a reconnect: forfeit the match, or
    /// tear the room down if it never started.
    async fn forfeit_after_grace(
        shared: &Arc<Shared>,
        room_code: &str,
        role: SlotRole,
        identity: Uuid,
        username: &str,
    ) {
        let Some(session) = shared.registry.get(room_code).await else {
            return;
        };

        let phase = {
            let s = session.read().await;
            // Re-validate: the seat may have been reclaimed or rebound
            if s.slot_of(identity) != Some(role) {
                return;
            }
            if s.slot(role).is_some_and(|p| p.connected) {
                return;
            }
            s.phase
        };

        match phase {
            Phase::InProgress => {
                {
                    let s = session.read().await;
                    s.send_to(
                        role.opponent(),
                        ServerMessage::PlayerDisconnected {
                            role,
                            message: format!("{username} did not reconnect in time"),
                        },
                    );
                }
                Self::complete_match(
                    shared,
                    room_code,
                    &session,
                    MatchOutcome {
                        winner: Some(role.opponent()),
                        reason: EndReason::OpponentDisconnected,
                    },
                )
                .await;
            }
            Phase::Lobby | Phase::AwaitingReady => {
                {
                    let s = session.read().await;
                    s.send_to(
                        role.opponent(),
                        ServerMessage::PlayerDisconnected {
                            role,
                            message: format!("{username} did not reconnect in time"),
                        },
                    );
                }
                shared.timers.cancel_room(room_code).await;
                shared.registry.remove(room_code).await;
                info!(room = %room_code, "room removed after grace period");
            }
            Phase::Finished => {}
        }
    }

    /// End a match exactly once: finish the session, record it, broadcast
    /// the result and schedule room removal. The win sweep, the forfeit
    /// timer and `leave_room` can all race here; the `Finished` check
    /// makes the first caller win.
    async fn complete_match(
        shared: &Arc<Shared>,
        room_code: &str,
        session: &SessionHandle,
        outcome: MatchOutcome,
    ) {
        let summarize = |p: &PlayerSlot| PlayerSummary {
            identity: p.identity,
            registered: p.registered,
            username: p.username.clone(),
            hp: p.hp,
            ammo_remaining: p.ammo_remaining(),
        };

        let (summary, final_state) = {
            let mut s = session.write().await;
            if s.phase == Phase::Finished {
                return;
            }
            let final_state = s.finish(outcome);

            let slot_a = match s.slot(SlotRole::SlotA) {
                Some(p) => summarize(p),
                None => return,
            };
            let slot_b = s.slot(SlotRole::SlotB).map(summarize);
            let duration_ms = s
                .started_at
                .map(|t| t.elapsed().as_millis() as u64)
                .unwrap_or(0);

            (
                MatchSummary {
                    room_code: s.room_code.clone(),
                    topic: s.topic.clone(),
                    winner: outcome.winner,
                    reason: outcome.reason,
                    slot_a,
                    slot_b,
                    duration_ms,
                    ended_at: Utc::now(),
                },
                final_state,
            )
        };

        // Best-effort: a recorder failure never blocks the result
        let match_id = match shared.recorder.record(&summary) {
            Ok(id) => id,
            Err(e) => {
                warn!(room = %room_code, "match recording failed: {}", e);
                None
            }
        };

        {
            let s = session.read().await;
            s.broadcast(ServerMessage::MatchResult(MatchResultInfo {
                winner: outcome.winner,
                reason: outcome.reason,
                final_state,
                match_id,
                timestamp: summary.ended_at.to_rfc3339(),
            }));
        }

        shared.timers.cancel_room(room_code).await;

        info!(
            room = %room_code,
            winner = ?outcome.winner,
            reason = ?outcome.reason,
            "match finished"
        );

        // Leave the room up briefly so clients can render the result
        let shared = shared.clone();
        let room = room_code.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(RESULT_DISPLAY_DELAY).await;
            shared.timers.cancel_room(&room).await;
            if shared.registry.remove(&room).await.is_some() {
                debug!(room = %room, "finished room removed");
            }
        });
    }

    /// Run the win-condition sweep: every 100 ms, evaluate each session
    /// and complete the ones that reached a terminal state.
    async fn run_win_sweep(shared: Arc<Shared>) {
        let mut sweep = interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            sweep.tick().await;

            for (room_code, session) in shared.registry.snapshot().await {
                let outcome = { session.read().await.evaluate_win() };
                if let Some(outcome) = outcome {
                    Self::complete_match(&shared, &room_code, &session, outcome).await;
                }
            }
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.shared.clients.read().await.len()
    }

    /// Get active session count.
    pub async fn session_count(&self) -> usize {
        self.shared.registry.count().await
    }
}
