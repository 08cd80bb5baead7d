//! Node configuration and the events a node reports to its front end.

use horus_shared::{PeerId, RoundPhase, Vec3, SEND_RATE, TICK_RATE};

use crate::replication::{EffectFlags, MovementTuning};
use crate::round::RoundConfig;

/// Name of the barrier gating every round start.
pub const REGISTER_BARRIER: &str = "RegisterPlayer";

/// Static configuration of a [`super::Node`].
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Snapshots sent per second.
    pub send_rate: f32,
    /// Simulation steps per second.
    pub tick_rate: u32,
    /// Round timings and level rotation (host only).
    pub round: RoundConfig,
    /// Level the host starts on; the first rotation level when `None`.
    pub initial_level: Option<String>,
    /// Owner movement tunables.
    pub movement: MovementTuning,
    /// Spawn points of every level.
    pub spawn_points: Vec<Vec3>,
    /// Seed for level rotation and spawn picks; entropy when `None`.
    pub seed: Option<u64>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            send_rate: SEND_RATE,
            tick_rate: TICK_RATE,
            round: RoundConfig::default(),
            initial_level: None,
            movement: MovementTuning::default(),
            spawn_points: vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(20.0, 0.0, 20.0),
                Vec3::new(-20.0, 0.0, 20.0),
                Vec3::new(20.0, 0.0, -20.0),
                Vec3::new(-20.0, 0.0, -20.0),
            ],
            seed: None,
        }
    }
}

/// How the local player presents itself.
#[derive(Clone, Debug, PartialEq)]
pub struct PlayerProfile {
    /// Display name.
    pub username: String,
    /// Stable player guid.
    pub guid: String,
    /// Body colour.
    pub color: Vec3,
    /// Join as spectator.
    pub spectating: bool,
}

impl PlayerProfile {
    /// A playing profile with a white body.
    #[must_use]
    pub fn new(username: impl Into<String>, guid: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            guid: guid.into(),
            color: Vec3::new(1.0, 1.0, 1.0),
            spectating: false,
        }
    }
}

/// Completion payload of node barriers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncAction {
    /// Every tracked peer registered; the round may start.
    StartRound,
}

/// Something the front end may want to react to.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeEvent {
    /// Client: accepted by the host as this peer.
    Connected(PeerId),
    /// Client: the handshake failed.
    ConnectFailed,
    /// The session is gone (client lost the host, or we disconnected).
    Disconnected,
    /// Host: a client completed the handshake.
    PeerConnected(PeerId),
    /// Host: a client left.
    PeerDisconnected(PeerId),
    /// A player registered.
    PlayerJoined(PeerId),
    /// A player unregistered.
    PlayerLeft(PeerId),
    /// Round phase changed.
    PhaseChanged {
        /// New phase.
        phase: RoundPhase,
        /// Generation it belongs to.
        generation: u32,
    },
    /// A different level was loaded.
    LevelLoaded {
        /// Level name.
        level: String,
        /// Generation the level belongs to.
        generation: u32,
    },
    /// Host: the registration barrier completed.
    RoundStarted {
        /// Generation of the round.
        generation: u32,
    },
    /// An avatar appeared.
    AvatarSpawned(PeerId),
    /// An avatar was removed.
    AvatarDespawned(PeerId),
    /// An avatar was moved to a fresh spawn point.
    Respawned(PeerId),
    /// A remote avatar announced one-shot effects.
    Effect {
        /// Owner of the avatar.
        peer: PeerId,
        /// Effects raised.
        flags: EffectFlags,
    },
    /// Someone died.
    Kill {
        /// Killer (equal to `victim` for a suicide).
        shooter: PeerId,
        /// Victim.
        victim: PeerId,
    },
}
