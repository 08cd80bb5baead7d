//! # Node - One Peer of a Session
//!
//! A [`Node`] composes everything a peer runs each frame:
//!
//! ```text
//!                 ┌──────────────────────── Node ────────────────────────┐
//! Transport ─────▶│ poll ─▶ Rpc dispatch ─▶ registry / chat / leaderboard │
//!   (Rpc, State)  │             │              avatars (replication)     │
//!                 │             ▼                                        │
//!                 │   HostAuthority (host only):                         │
//!                 │     RpcRouter + NetworkSync + RoundDirector          │
//!                 │             │                                        │
//! Transport ◀─────│ flush queues, snapshots ◀── FixedStep simulation     │
//!                 └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Authority
//!
//! - The host owns the router, the barrier table and the round director.
//!   Clients only hold mirrors that change when a call is applied.
//! - The owner of an avatar moves it locally without waiting for anyone.
//!
//! ## Errors
//!
//! [`Node::update`] never fails. Malformed input, unknown calls and send
//! failures are logged and dropped.

mod dispatch;
mod events;
mod host;

pub use events::{NodeConfig, NodeEvent, PlayerProfile, SyncAction, REGISTER_BARRIER};

use std::collections::BTreeMap;

use horus_shared::{PeerId, RoundPhase, Vec3};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, error, info, warn};

use crate::chat::ChatLog;
use crate::error::{NetError, NetResult};
use crate::leaderboard::Leaderboard;
use crate::registry::PlayerRegistry;
use crate::replication::{EffectFlags, EntitySnapshot, MovementInput, MovementModel, ReplicatedEntity};
use crate::round::RoundDirector;
use crate::rpc::{Persistence, Rpc, RpcEnvelope, RpcRouter, Target};
use crate::sync::NetworkSync;
use crate::tick::FixedStep;
use crate::transport::{Channel, Transport, TransportEvent};

/// Server-only state.
#[derive(Debug)]
struct HostAuthority {
    router: RpcRouter<Rpc>,
    sync: NetworkSync<SyncAction>,
    director: RoundDirector,
}

/// One peer of a session, host or client.
pub struct Node<T: Transport> {
    transport: T,
    config: NodeConfig,
    profile: Option<PlayerProfile>,
    local: PeerId,
    connected: bool,
    host: Option<HostAuthority>,

    registry: PlayerRegistry,
    chat: ChatLog,
    leaderboard: Leaderboard,
    phase: Option<RoundPhase>,
    generation: u32,
    level: Option<String>,
    paused: bool,

    avatars: BTreeMap<PeerId, ReplicatedEntity>,
    movement: MovementModel,
    input: MovementInput,
    clock: FixedStep,
    send_timer: f32,

    rng: StdRng,
    events: Vec<NodeEvent>,
    inbox: Vec<TransportEvent>,
}

impl<T: Transport> Node<T> {
    /// Starts an authoritative host on `transport`.
    ///
    /// `profile` is the host's own player; `None` runs a dedicated server
    /// with no avatar. The first round starts on the first update.
    ///
    /// # Errors
    ///
    /// [`NetError::NotAuthoritative`] if `transport` is a client endpoint.
    pub fn host(transport: T, config: NodeConfig, profile: Option<PlayerProfile>) -> NetResult<Self> {
        if !transport.is_server() {
            error!("host node created on a client transport");
            return Err(NetError::NotAuthoritative("Node::host"));
        }
        let level = config
            .initial_level
            .clone()
            .or_else(|| config.round.levels.first().cloned())
            .ok_or_else(|| NetError::UnknownLevel(String::new()))?;
        let authority = HostAuthority {
            router: RpcRouter::new(),
            sync: NetworkSync::new(true),
            director: RoundDirector::new(config.round.clone(), level.clone()),
        };
        let mut node = Self::build(transport, config, profile);
        node.local = PeerId::SERVER;
        node.connected = true;
        node.level = Some(level);
        node.host = Some(authority);
        info!(level = ?node.level, "hosting session");
        Ok(node)
    }

    /// Creates a client on `transport`; it joins once the handshake
    /// completes.
    pub fn client(transport: T, config: NodeConfig, profile: PlayerProfile) -> Self {
        Self::build(transport, config, Some(profile))
    }

    fn build(transport: T, config: NodeConfig, profile: Option<PlayerProfile>) -> Self {
        let rng = config.seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        Self {
            local: transport.local_peer(),
            transport,
            profile,
            connected: false,
            host: None,
            registry: PlayerRegistry::new(),
            chat: ChatLog::new(),
            leaderboard: Leaderboard::new(),
            phase: None,
            generation: 0,
            level: None,
            paused: true,
            avatars: BTreeMap::new(),
            movement: MovementModel::new(config.movement),
            input: MovementInput::default(),
            clock: FixedStep::new(config.tick_rate),
            send_timer: 0.0,
            rng,
            events: Vec::new(),
            inbox: Vec::new(),
            config,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Our peer id ([`PeerId::NULL`] until a client is accepted).
    #[inline]
    #[must_use]
    pub const fn local_peer(&self) -> PeerId {
        self.local
    }

    /// True on the authoritative host.
    #[inline]
    #[must_use]
    pub const fn is_host(&self) -> bool {
        self.host.is_some()
    }

    /// True while part of a session.
    #[inline]
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connected
    }

    /// Current round phase (mirrored on clients). Warmup until the host
    /// has announced one.
    #[must_use]
    pub fn phase(&self) -> RoundPhase {
        self.phase.unwrap_or(RoundPhase::Warmup)
    }

    /// Current level generation.
    #[inline]
    #[must_use]
    pub const fn generation(&self) -> u32 {
        self.generation
    }

    /// Loaded level, once known.
    #[must_use]
    pub fn level(&self) -> Option<&str> {
        self.level.as_deref()
    }

    /// Players are frozen.
    #[inline]
    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    /// Registered players.
    #[must_use]
    pub const fn registry(&self) -> &PlayerRegistry {
        &self.registry
    }

    /// Chat history.
    #[must_use]
    pub const fn chat(&self) -> &ChatLog {
        &self.chat
    }

    /// Chat history, for local notices.
    pub fn chat_mut(&mut self) -> &mut ChatLog {
        &mut self.chat
    }

    /// Scores.
    #[must_use]
    pub const fn leaderboard(&self) -> &Leaderboard {
        &self.leaderboard
    }

    /// Avatar of `peer`.
    #[must_use]
    pub fn avatar(&self, peer: PeerId) -> Option<&ReplicatedEntity> {
        self.avatars.get(&peer)
    }

    /// Every avatar in peer order.
    pub fn avatars(&self) -> impl Iterator<Item = &ReplicatedEntity> {
        self.avatars.values()
    }

    /// Our own avatar.
    #[must_use]
    pub fn own_avatar(&self) -> Option<&ReplicatedEntity> {
        self.avatars.get(&self.local)
    }

    /// True while we watch instead of play.
    #[must_use]
    pub fn is_spectating(&self) -> bool {
        self.profile.as_ref().is_some_and(|profile| profile.spectating)
    }

    /// Host only: the RPC router.
    #[must_use]
    pub fn router(&self) -> Option<&RpcRouter<Rpc>> {
        self.host.as_ref().map(|authority| &authority.router)
    }

    /// Host only: the barrier table.
    #[must_use]
    pub fn barriers(&self) -> Option<&NetworkSync<SyncAction>> {
        self.host.as_ref().map(|authority| &authority.sync)
    }

    /// Host only: the round director.
    #[must_use]
    pub fn director(&self) -> Option<&RoundDirector> {
        self.host.as_ref().map(|authority| &authority.director)
    }

    /// The transport.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Takes the events raised since the last call.
    pub fn drain_events(&mut self) -> Vec<NodeEvent> {
        std::mem::take(&mut self.events)
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Sets the movement input used by the next simulation steps.
    pub fn set_input(&mut self, input: MovementInput) {
        self.input = input;
    }

    /// Broadcasts a chat line. Blank text is ignored.
    pub fn send_chat(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() || !self.connected {
            return;
        }
        self.invoke(
            Rpc::LogChat {
                peer: self.local,
                text: text.to_owned(),
                system: false,
                sourceless: false,
            },
            Target::AllPeers,
            Persistence::Transient,
        );
    }

    /// Switches spectator mode. Returns false if already in that mode.
    pub fn set_spectating(&mut self, spectating: bool) -> bool {
        let Some(profile) = self.profile.as_mut() else {
            return false;
        };
        if profile.spectating == spectating {
            return false;
        }
        profile.spectating = spectating;
        if !self.connected {
            return true;
        }

        let local = self.local;
        self.invoke(Rpc::ToggleSpectate { peer: local, spectating }, Target::AllPeers, Persistence::Buffered);
        let text = if spectating {
            self.invoke(Rpc::DespawnAvatar { peer: local }, Target::AllPeers, Persistence::Transient);
            "went in spectator mode."
        } else {
            self.ensure_spawned();
            "rejoined the game."
        };
        self.invoke(
            Rpc::LogChat {
                peer: local,
                text: text.to_owned(),
                system: true,
                sourceless: false,
            },
            Target::AllPeers,
            Persistence::Transient,
        );
        true
    }

    /// Reports that our avatar was killed by `killer` (ourselves for a
    /// suicide).
    pub fn report_death(&mut self, killer: PeerId) {
        if !self.connected {
            return;
        }
        let victim = self.local;
        self.invoke(Rpc::RegisterKill { shooter: killer, victim }, Target::AllPeers, Persistence::Transient);
    }

    /// Raises a one-shot effect on our avatar (reload).
    pub fn raise_effect(&mut self, flags: EffectFlags) {
        let local = self.local;
        if let Some(avatar) = self.avatars.get_mut(&local) {
            avatar.raise(flags);
        }
    }

    /// Host only: switches level now.
    ///
    /// # Errors
    ///
    /// [`NetError::NotAuthoritative`] on a client,
    /// [`NetError::AlreadyOnLevel`] or [`NetError::UnknownLevel`] for a bad
    /// level name.
    pub fn change_level(&mut self, level: &str) -> NetResult<()> {
        let Some(authority) = self.host.as_mut() else {
            error!("level change requested on a client");
            return Err(NetError::NotAuthoritative("change_level"));
        };
        let events = authority.director.force_level(level)?;
        self.handle_round_events(events);
        self.flush_router();
        Ok(())
    }

    /// Leaves the session (client) or ends it (host), including a join
    /// still in progress. Mirrors are cleared.
    pub fn disconnect(&mut self) {
        let was_connected = self.connected;
        info!(peer = %self.local, "leaving session");
        self.flush_router();
        self.transport.disconnect();
        self.reset_session();
        if was_connected {
            self.events.push(NodeEvent::Disconnected);
        }
    }

    fn reset_session(&mut self) {
        self.connected = false;
        self.registry.clear();
        self.chat.clear();
        self.leaderboard.clear();
        self.avatars.clear();
        self.phase = None;
        self.paused = true;
        if let Some(authority) = self.host.as_mut() {
            authority.router.clear();
            authority.sync.clear();
        }
    }

    // =========================================================================
    // Frame
    // =========================================================================

    /// Runs one frame of `dt` seconds.
    pub fn update(&mut self, dt: f32) {
        self.poll_transport();

        if self.host.is_some() {
            self.update_director(dt);
        }

        let steps = self.clock.advance(dt);
        let step = self.clock.step();
        for _ in 0..steps {
            self.simulate(step);
        }

        self.send_timer += dt;
        let interval = 1.0 / self.config.send_rate.max(f32::EPSILON);
        if self.send_timer >= interval {
            self.send_timer %= interval;
            self.send_snapshot();
        }

        self.flush_router();
        self.chat.update(dt);
    }

    fn poll_transport(&mut self) {
        let mut inbox = std::mem::take(&mut self.inbox);
        self.transport.poll(&mut inbox);
        for event in inbox.drain(..) {
            match event {
                TransportEvent::Connected(peer) => {
                    info!(%peer, "joined session");
                    self.local = peer;
                    self.connected = true;
                    self.events.push(NodeEvent::Connected(peer));
                }
                TransportEvent::ConnectFailed => {
                    warn!("could not reach host");
                    self.events.push(NodeEvent::ConnectFailed);
                }
                TransportEvent::Disconnected => {
                    warn!("lost connection to host");
                    self.reset_session();
                    self.events.push(NodeEvent::Disconnected);
                }
                TransportEvent::PeerConnected(peer) => self.on_peer_connected(peer),
                TransportEvent::PeerDisconnected(peer) => self.on_peer_disconnected(peer),
                TransportEvent::Message {
                    from,
                    channel: Channel::Rpc,
                    payload,
                } => self.on_rpc_payload(from, &payload),
                TransportEvent::Message {
                    from,
                    channel: Channel::State,
                    payload,
                } => self.on_state_payload(from, &payload),
            }
        }
        self.inbox = inbox;
    }

    fn simulate(&mut self, dt: f32) {
        let local = self.local;
        let paused = self.paused;
        let tuning = self.config.movement;
        for (peer, avatar) in &mut self.avatars {
            if *peer == local {
                if !paused {
                    self.movement.step(avatar, &self.input, dt);
                }
            } else {
                avatar.advance_remote(&tuning, dt);
            }
        }
    }

    fn send_snapshot(&mut self) {
        if !self.connected || self.is_spectating() {
            return;
        }
        let local = self.local;
        let Some(avatar) = self.avatars.get_mut(&local) else {
            return;
        };
        let bytes = match avatar.take_snapshot().encode() {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%err, "snapshot encode failed");
                return;
            }
        };
        let recipients: Vec<PeerId> = match &self.host {
            Some(authority) => authority.router.peers().collect(),
            None => vec![PeerId::SERVER],
        };
        for peer in recipients {
            self.send_raw(peer, Channel::State, &bytes);
        }
    }

    fn on_state_payload(&mut self, from: PeerId, payload: &[u8]) {
        let snapshot = match EntitySnapshot::decode(payload) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                debug!(%from, %err, "dropping snapshot");
                return;
            }
        };
        let owner = snapshot.owner();
        if owner == self.local {
            return;
        }
        if self.host.is_some() && owner != from {
            warn!(%from, %owner, "snapshot for an avatar the sender does not own");
            return;
        }
        let relay: Vec<PeerId> = self
            .host
            .as_ref()
            .map(|authority| authority.router.peers().filter(|peer| *peer != from).collect())
            .unwrap_or_default();
        for peer in relay {
            self.send_raw(peer, Channel::State, payload);
        }
        if let Some(avatar) = self.avatars.get_mut(&owner) {
            let flags = avatar.receive_snapshot(&snapshot);
            if !flags.is_empty() {
                self.events.push(NodeEvent::Effect { peer: owner, flags });
            }
        }
    }

    // =========================================================================
    // Invocation
    // =========================================================================

    /// Invokes `rpc` from the local peer.
    ///
    /// The host routes it directly. A client runs `AllPeers` calls (and
    /// calls addressed to itself) at once and forwards the rest to the host.
    fn invoke(&mut self, rpc: Rpc, target: Target, persistence: Persistence) {
        if let Some(authority) = self.host.as_mut() {
            host::supersede_buffered(&mut authority.router, PeerId::SERVER, &rpc);
            let routed = authority.router.invoke(PeerId::SERVER, rpc.clone(), target, persistence);
            if routed.local {
                self.apply(PeerId::SERVER, rpc);
            }
            return;
        }

        if !self.connected {
            debug!(rpc = rpc.name(), "not connected, dropping call");
            return;
        }
        let run_locally = match target {
            Target::AllPeers => true,
            Target::Peer(peer) => peer == self.local,
            Target::Server | Target::AllExceptSender => false,
        };
        if target != Target::Peer(self.local) {
            let envelope = RpcEnvelope::Request {
                target,
                persistence,
                generation: self.generation,
                call: rpc.to_call(),
            };
            match envelope.encode() {
                Ok(bytes) => self.send_raw(PeerId::SERVER, Channel::Rpc, &bytes),
                Err(err) => warn!(rpc = rpc.name(), %err, "dropping call"),
            }
        }
        if run_locally {
            self.apply(self.local, rpc);
        }
    }

    fn on_rpc_payload(&mut self, from: PeerId, payload: &[u8]) {
        let envelope = match RpcEnvelope::decode(payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(%from, %err, "dropping rpc payload");
                return;
            }
        };
        match envelope {
            RpcEnvelope::Request {
                target,
                persistence,
                generation,
                call,
            } => {
                if self.host.is_none() {
                    warn!(%from, "client received a routing request");
                    return;
                }
                match Rpc::from_call(&call) {
                    Ok(rpc) => self.route_request(from, rpc, target, persistence, generation),
                    Err(err) => warn!(%from, %err, "rejecting call"),
                }
            }
            RpcEnvelope::Delivery { sender, call } => {
                if !from.is_server() {
                    warn!(%from, "delivery from a non-host peer");
                    return;
                }
                match Rpc::from_call(&call) {
                    Ok(rpc) if rpc.is_host_only() && !sender.is_server() => {
                        warn!(%sender, rpc = rpc.name(), "host-only call from a client");
                    }
                    Ok(rpc) => self.apply(sender, rpc),
                    Err(err) => warn!(%sender, %err, "ignoring call"),
                }
            }
        }
    }

    fn send_raw(&mut self, to: PeerId, channel: Channel, payload: &[u8]) {
        if let Err(err) = self.transport.send(to, channel, payload) {
            warn!(%to, ?channel, %err, "send failed");
        }
    }

    fn flush_router(&mut self) {
        let Self { transport, host, .. } = self;
        let Some(authority) = host.as_mut() else {
            return;
        };
        authority.router.flush(|peer, delivery| {
            let envelope = RpcEnvelope::Delivery {
                sender: delivery.sender,
                call: delivery.message.to_call(),
            };
            let sent = envelope
                .encode()
                .and_then(|bytes| transport.send(peer, Channel::Rpc, &bytes));
            if let Err(err) = sent {
                warn!(%peer, rpc = delivery.message.name(), %err, "delivery failed");
            }
        });
    }

    // =========================================================================
    // Local player lifecycle
    // =========================================================================

    /// Registers the local player unless it already is.
    fn ensure_registered(&mut self) {
        let Some(profile) = self.profile.clone() else {
            return;
        };
        if self.registry.contains(self.local) {
            return;
        }
        self.invoke(
            Rpc::RegisterPlayer {
                peer: self.local,
                username: profile.username,
                guid: profile.guid,
                color: profile.color,
                spectating: profile.spectating,
            },
            Target::AllPeers,
            Persistence::Buffered,
        );
    }

    /// Spawns the local avatar on the current level unless it exists.
    fn ensure_spawned(&mut self) {
        if self.profile.is_none() || self.is_spectating() || self.avatars.contains_key(&self.local) {
            return;
        }
        let position = self.pick_spawn_point();
        self.invoke(
            Rpc::SpawnAvatar {
                peer: self.local,
                position,
            },
            Target::AllPeers,
            Persistence::LevelBuffered,
        );
    }

    fn pick_spawn_point(&mut self) -> Vec3 {
        self.config
            .spawn_points
            .choose(&mut self.rng)
            .copied()
            .unwrap_or(Vec3::ZERO)
    }
}

impl<T: Transport> std::fmt::Debug for Node<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("local", &self.local)
            .field("host", &self.host.is_some())
            .field("connected", &self.connected)
            .field("phase", &self.phase)
            .field("generation", &self.generation)
            .field("level", &self.level)
            .field("players", &self.registry.len())
            .finish_non_exhaustive()
    }
}
