//! # Remote Procedure Calls
//!
//! Named calls with positional arguments, routed by the host.
//!
//! ## Dispatch
//!
//! On the wire a call is `name + args` ([`RpcCall`]). Every receiver turns it
//! back into the typed [`Rpc`] table before acting on it; a name outside the
//! table, or a known name with the wrong arguments, is logged and dropped.
//!
//! ## Envelopes
//!
//! ```text
//! CLIENT                          HOST                          CLIENTS
//!   |-- Request{target, persist,   |                               |
//!   |           generation, call}->|-- RpcRouter (log + queues) -->|
//!   |                              |   Delivery{sender, call}      |
//! ```

mod router;

pub use router::{BufferScope, BufferedCall, Delivery, Routed, RpcRouter};

use horus_shared::{PeerId, RoundPhase, Vec3};

use crate::error::{NetError, NetResult};
use crate::protocol::{ByteReader, ByteWriter};

/// Who receives an invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Target {
    /// The host only.
    Server,
    /// Every peer; the sender runs the call locally at once.
    AllPeers,
    /// Every peer except the sender.
    AllExceptSender,
    /// One specific peer.
    Peer(PeerId),
}

/// Whether an invocation is kept for peers that join later.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Persistence {
    /// Delivered to currently connected peers only.
    Transient,
    /// Replayed to late joiners for the whole session.
    Buffered,
    /// Replayed to late joiners until the current level generation is
    /// invalidated.
    LevelBuffered,
}

/// A positional rpc argument.
#[derive(Clone, Debug, PartialEq)]
pub enum RpcArg {
    /// Unsigned integer.
    U32(u32),
    /// Float.
    F32(f32),
    /// Boolean.
    Bool(bool),
    /// UTF-8 text.
    Str(String),
    /// Vector.
    Vec3(Vec3),
    /// Peer reference.
    Peer(PeerId),
}

/// The wire form of a call: a name and positional arguments.
#[derive(Clone, Debug, PartialEq)]
pub struct RpcCall {
    /// Call name.
    pub name: String,
    /// Positional arguments.
    pub args: Vec<RpcArg>,
}

/// Every call a HORUS peer understands.
#[derive(Clone, Debug, PartialEq)]
pub enum Rpc {
    /// Announces a player's profile. Session-buffered.
    RegisterPlayer {
        /// Player's peer.
        peer: PeerId,
        /// Display name.
        username: String,
        /// Stable player guid.
        guid: String,
        /// Body colour (rgb).
        color: Vec3,
        /// Joined as spectator.
        spectating: bool,
    },
    /// Removes a departed player.
    UnregisterPlayer {
        /// Departed peer.
        peer: PeerId,
    },
    /// Creates a player's avatar on the current level.
    SpawnAvatar {
        /// Owning peer.
        peer: PeerId,
        /// Spawn position.
        position: Vec3,
    },
    /// Destroys a player's avatar.
    DespawnAvatar {
        /// Owning peer.
        peer: PeerId,
    },
    /// Spectator mode switched on or off.
    ToggleSpectate {
        /// Player's peer.
        peer: PeerId,
        /// New spectating flag.
        spectating: bool,
    },
    /// Owner moved its avatar to a fresh spawn point.
    ImmediateRespawn {
        /// Owning peer.
        peer: PeerId,
        /// New position.
        position: Vec3,
    },
    /// A chat line.
    LogChat {
        /// Author, or the player an announcement is about.
        peer: PeerId,
        /// Text.
        text: String,
        /// Announcement rather than player chat.
        system: bool,
        /// Shown without the author's name.
        sourceless: bool,
    },
    /// The host moved to a new round phase.
    RoundPhaseChanged {
        /// New phase.
        phase: RoundPhase,
        /// Level generation the phase belongs to.
        generation: u32,
    },
    /// Current session state, sent directly to a peer that just joined.
    SessionState {
        /// Current phase.
        phase: RoundPhase,
        /// Current generation.
        generation: u32,
        /// Current level.
        level: String,
    },
    /// Warmup started: load `level`, register and acknowledge.
    PrepareRound {
        /// Level to be on.
        level: String,
        /// Generation to be on.
        generation: u32,
    },
    /// Barrier acknowledgement sent to the host.
    Acknowledge {
        /// Barrier name.
        barrier: String,
    },
    /// Round over, freeze players.
    StopRound,
    /// Round started: unfreeze, reset scores, respawn.
    RestartRound,
    /// Load another level.
    ChangeLevelTo {
        /// Level name.
        level: String,
        /// Generation the level starts.
        generation: u32,
    },
    /// A kill happened.
    RegisterKill {
        /// Killer (equal to `victim` for a suicide).
        shooter: PeerId,
        /// Victim.
        victim: PeerId,
    },
}

impl Rpc {
    /// Wire name of the call.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::RegisterPlayer { .. } => "RegisterPlayer",
            Self::UnregisterPlayer { .. } => "UnregisterPlayer",
            Self::SpawnAvatar { .. } => "SpawnAvatar",
            Self::DespawnAvatar { .. } => "DespawnAvatar",
            Self::ToggleSpectate { .. } => "ToggleSpectate",
            Self::ImmediateRespawn { .. } => "ImmediateRespawn",
            Self::LogChat { .. } => "LogChat",
            Self::RoundPhaseChanged { .. } => "RoundPhaseChanged",
            Self::SessionState { .. } => "SessionState",
            Self::PrepareRound { .. } => "PrepareRound",
            Self::Acknowledge { .. } => "Acknowledge",
            Self::StopRound => "StopRound",
            Self::RestartRound => "RestartRound",
            Self::ChangeLevelTo { .. } => "ChangeLevelTo",
            Self::RegisterKill { .. } => "RegisterKill",
        }
    }

    /// Calls only the host may originate.
    #[must_use]
    pub const fn is_host_only(&self) -> bool {
        matches!(
            self,
            Self::UnregisterPlayer { .. }
                | Self::RoundPhaseChanged { .. }
                | Self::SessionState { .. }
                | Self::PrepareRound { .. }
                | Self::StopRound
                | Self::RestartRound
                | Self::ChangeLevelTo { .. }
        )
    }

    /// The peer a player-scoped call speaks for, if any.
    ///
    /// The host refuses client calls that speak for another peer.
    #[must_use]
    pub const fn subject(&self) -> Option<PeerId> {
        match self {
            Self::RegisterPlayer { peer, .. }
            | Self::SpawnAvatar { peer, .. }
            | Self::DespawnAvatar { peer }
            | Self::ToggleSpectate { peer, .. }
            | Self::ImmediateRespawn { peer, .. }
            | Self::LogChat { peer, .. } => Some(*peer),
            Self::RegisterKill { victim, .. } => Some(*victim),
            _ => None,
        }
    }

    /// Lowers the call to its wire form.
    #[must_use]
    pub fn to_call(&self) -> RpcCall {
        use RpcArg as A;
        let args = match self {
            Self::RegisterPlayer {
                peer,
                username,
                guid,
                color,
                spectating,
            } => vec![
                A::Peer(*peer),
                A::Str(username.clone()),
                A::Str(guid.clone()),
                A::Vec3(*color),
                A::Bool(*spectating),
            ],
            Self::UnregisterPlayer { peer } | Self::DespawnAvatar { peer } => vec![A::Peer(*peer)],
            Self::SpawnAvatar { peer, position } | Self::ImmediateRespawn { peer, position } => {
                vec![A::Peer(*peer), A::Vec3(*position)]
            }
            Self::ToggleSpectate { peer, spectating } => vec![A::Peer(*peer), A::Bool(*spectating)],
            Self::LogChat {
                peer,
                text,
                system,
                sourceless,
            } => vec![
                A::Peer(*peer),
                A::Str(text.clone()),
                A::Bool(*system),
                A::Bool(*sourceless),
            ],
            Self::RoundPhaseChanged { phase, generation } => {
                vec![A::U32(u32::from(*phase as u8)), A::U32(*generation)]
            }
            Self::SessionState {
                phase,
                generation,
                level,
            } => vec![
                A::U32(u32::from(*phase as u8)),
                A::U32(*generation),
                A::Str(level.clone()),
            ],
            Self::PrepareRound { level, generation } | Self::ChangeLevelTo { level, generation } => {
                vec![A::Str(level.clone()), A::U32(*generation)]
            }
            Self::Acknowledge { barrier } => vec![A::Str(barrier.clone())],
            Self::StopRound | Self::RestartRound => Vec::new(),
            Self::RegisterKill { shooter, victim } => vec![A::Peer(*shooter), A::Peer(*victim)],
        };
        RpcCall {
            name: self.name().to_owned(),
            args,
        }
    }

    /// Resolves a wire call against the dispatch table.
    ///
    /// # Errors
    ///
    /// [`NetError::UnknownRpc`] for names outside the table and
    /// [`NetError::BadArguments`] when the argument list does not match.
    pub fn from_call(call: &RpcCall) -> NetResult<Self> {
        use RpcArg as A;
        let rpc = match (call.name.as_str(), call.args.as_slice()) {
            ("RegisterPlayer", [A::Peer(peer), A::Str(username), A::Str(guid), A::Vec3(color), A::Bool(spectating)]) => {
                Self::RegisterPlayer {
                    peer: *peer,
                    username: username.clone(),
                    guid: guid.clone(),
                    color: *color,
                    spectating: *spectating,
                }
            }
            ("UnregisterPlayer", [A::Peer(peer)]) => Self::UnregisterPlayer { peer: *peer },
            ("SpawnAvatar", [A::Peer(peer), A::Vec3(position)]) => Self::SpawnAvatar {
                peer: *peer,
                position: *position,
            },
            ("DespawnAvatar", [A::Peer(peer)]) => Self::DespawnAvatar { peer: *peer },
            ("ToggleSpectate", [A::Peer(peer), A::Bool(spectating)]) => Self::ToggleSpectate {
                peer: *peer,
                spectating: *spectating,
            },
            ("ImmediateRespawn", [A::Peer(peer), A::Vec3(position)]) => Self::ImmediateRespawn {
                peer: *peer,
                position: *position,
            },
            ("LogChat", [A::Peer(peer), A::Str(text), A::Bool(system), A::Bool(sourceless)]) => Self::LogChat {
                peer: *peer,
                text: text.clone(),
                system: *system,
                sourceless: *sourceless,
            },
            ("RoundPhaseChanged", [A::U32(phase), A::U32(generation)]) => Self::RoundPhaseChanged {
                phase: phase_arg(*phase)?,
                generation: *generation,
            },
            ("SessionState", [A::U32(phase), A::U32(generation), A::Str(level)]) => Self::SessionState {
                phase: phase_arg(*phase)?,
                generation: *generation,
                level: level.clone(),
            },
            ("PrepareRound", [A::Str(level), A::U32(generation)]) => Self::PrepareRound {
                level: level.clone(),
                generation: *generation,
            },
            ("Acknowledge", [A::Str(barrier)]) => Self::Acknowledge {
                barrier: barrier.clone(),
            },
            ("StopRound", []) => Self::StopRound,
            ("RestartRound", []) => Self::RestartRound,
            ("ChangeLevelTo", [A::Str(level), A::U32(generation)]) => Self::ChangeLevelTo {
                level: level.clone(),
                generation: *generation,
            },
            ("RegisterKill", [A::Peer(shooter), A::Peer(victim)]) => Self::RegisterKill {
                shooter: *shooter,
                victim: *victim,
            },
            (name, _) => return Err(known_name(name).map_or_else(|| NetError::UnknownRpc(name.to_owned()), NetError::BadArguments)),
        };
        Ok(rpc)
    }
}

const KNOWN_NAMES: [&str; 15] = [
    "RegisterPlayer",
    "UnregisterPlayer",
    "SpawnAvatar",
    "DespawnAvatar",
    "ToggleSpectate",
    "ImmediateRespawn",
    "LogChat",
    "RoundPhaseChanged",
    "SessionState",
    "PrepareRound",
    "Acknowledge",
    "StopRound",
    "RestartRound",
    "ChangeLevelTo",
    "RegisterKill",
];

fn known_name(name: &str) -> Option<&'static str> {
    KNOWN_NAMES.iter().copied().find(|known| *known == name)
}

fn phase_arg(value: u32) -> NetResult<RoundPhase> {
    u8::try_from(value)
        .ok()
        .and_then(RoundPhase::from_u8)
        .ok_or(NetError::Malformed { what: "round phase" })
}

// =============================================================================
// WIRE ENCODING
// =============================================================================

const ARG_U32: u8 = 0;
const ARG_F32: u8 = 1;
const ARG_BOOL: u8 = 2;
const ARG_STR: u8 = 3;
const ARG_VEC3: u8 = 4;
const ARG_PEER: u8 = 5;

impl RpcCall {
    fn write(&self, w: &mut ByteWriter) {
        w.write_str(&self.name);
        // argument lists are tiny; anything past 255 is a bug upstream
        #[allow(clippy::cast_possible_truncation)]
        w.write_u8(self.args.len().min(255) as u8);
        for arg in self.args.iter().take(255) {
            match arg {
                RpcArg::U32(v) => {
                    w.write_u8(ARG_U32);
                    w.write_u32(*v);
                }
                RpcArg::F32(v) => {
                    w.write_u8(ARG_F32);
                    w.write_f32(*v);
                }
                RpcArg::Bool(v) => {
                    w.write_u8(ARG_BOOL);
                    w.write_bool(*v);
                }
                RpcArg::Str(v) => {
                    w.write_u8(ARG_STR);
                    w.write_str(v);
                }
                RpcArg::Vec3(v) => {
                    w.write_u8(ARG_VEC3);
                    w.write_vec3(*v);
                }
                RpcArg::Peer(v) => {
                    w.write_u8(ARG_PEER);
                    w.write_u32(v.0);
                }
            }
        }
    }

    fn read(r: &mut ByteReader<'_>) -> Option<Self> {
        let name = r.read_str()?;
        let count = r.read_u8()?;
        let mut args = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            let arg = match r.read_u8()? {
                ARG_U32 => RpcArg::U32(r.read_u32()?),
                ARG_F32 => RpcArg::F32(r.read_f32()?),
                ARG_BOOL => RpcArg::Bool(r.read_bool()?),
                ARG_STR => RpcArg::Str(r.read_str()?),
                ARG_VEC3 => RpcArg::Vec3(r.read_vec3()?),
                ARG_PEER => RpcArg::Peer(PeerId(r.read_u32()?)),
                _ => return None,
            };
            args.push(arg);
        }
        Some(Self { name, args })
    }
}

/// What travels on the RPC channel.
#[derive(Clone, Debug, PartialEq)]
pub enum RpcEnvelope {
    /// Client → host: route this call.
    Request {
        /// Requested targets.
        target: Target,
        /// Requested persistence.
        persistence: Persistence,
        /// Level generation the client was on when it invoked.
        generation: u32,
        /// The call.
        call: RpcCall,
    },
    /// Host → client: run this call.
    Delivery {
        /// Original sender.
        sender: PeerId,
        /// The call.
        call: RpcCall,
    },
}

const ENVELOPE_REQUEST: u8 = 0;
const ENVELOPE_DELIVERY: u8 = 1;

impl RpcEnvelope {
    /// Encodes the envelope.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::PayloadTooLarge`] if it does not fit a datagram.
    pub fn encode(&self) -> NetResult<Vec<u8>> {
        let mut w = ByteWriter::new();
        match self {
            Self::Request {
                target,
                persistence,
                generation,
                call,
            } => {
                w.write_u8(ENVELOPE_REQUEST);
                match target {
                    Target::Server => w.write_u8(0),
                    Target::AllPeers => w.write_u8(1),
                    Target::AllExceptSender => w.write_u8(2),
                    Target::Peer(peer) => {
                        w.write_u8(3);
                        w.write_u32(peer.0);
                    }
                }
                w.write_u8(match persistence {
                    Persistence::Transient => 0,
                    Persistence::Buffered => 1,
                    Persistence::LevelBuffered => 2,
                });
                w.write_u32(*generation);
                call.write(&mut w);
            }
            Self::Delivery { sender, call } => {
                w.write_u8(ENVELOPE_DELIVERY);
                w.write_u32(sender.0);
                call.write(&mut w);
            }
        }
        w.finish()
    }

    /// Decodes an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Malformed`] on truncated or unknown input.
    pub fn decode(bytes: &[u8]) -> NetResult<Self> {
        Self::read(&mut ByteReader::new(bytes)).ok_or(NetError::Malformed { what: "rpc envelope" })
    }

    fn read(r: &mut ByteReader<'_>) -> Option<Self> {
        match r.read_u8()? {
            ENVELOPE_REQUEST => {
                let target = match r.read_u8()? {
                    0 => Target::Server,
                    1 => Target::AllPeers,
                    2 => Target::AllExceptSender,
                    3 => Target::Peer(PeerId(r.read_u32()?)),
                    _ => return None,
                };
                let persistence = match r.read_u8()? {
                    0 => Persistence::Transient,
                    1 => Persistence::Buffered,
                    2 => Persistence::LevelBuffered,
                    _ => return None,
                };
                let generation = r.read_u32()?;
                let call = RpcCall::read(r)?;
                Some(Self::Request {
                    target,
                    persistence,
                    generation,
                    call,
                })
            }
            ENVELOPE_DELIVERY => {
                let sender = PeerId(r.read_u32()?);
                let call = RpcCall::read(r)?;
                Some(Self::Delivery { sender, call })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_call_survives_the_wire() {
        let rpc = Rpc::RegisterPlayer {
            peer: PeerId(3),
            username: "zoe".into(),
            guid: "guid-3".into(),
            color: Vec3::new(1.0, 0.5, 0.0),
            spectating: false,
        };
        let envelope = RpcEnvelope::Request {
            target: Target::AllPeers,
            persistence: Persistence::Buffered,
            generation: 4,
            call: rpc.to_call(),
        };
        let bytes = envelope.encode().unwrap();
        let RpcEnvelope::Request { call, generation, .. } = RpcEnvelope::decode(&bytes).unwrap() else {
            panic!("expected a request");
        };
        assert_eq!(generation, 4);
        assert_eq!(Rpc::from_call(&call).unwrap(), rpc);
    }

    #[test]
    fn test_unknown_name_is_an_error() {
        let call = RpcCall {
            name: "SummonDragon".into(),
            args: Vec::new(),
        };
        assert!(matches!(Rpc::from_call(&call), Err(NetError::UnknownRpc(name)) if name == "SummonDragon"));
    }

    #[test]
    fn test_wrong_arguments_are_an_error() {
        let call = RpcCall {
            name: "SpawnAvatar".into(),
            args: vec![RpcArg::Bool(true)],
        };
        assert!(matches!(Rpc::from_call(&call), Err(NetError::BadArguments("SpawnAvatar"))));
    }

    #[test]
    fn test_every_variant_name_is_known() {
        let samples = [
            Rpc::StopRound,
            Rpc::RestartRound,
            Rpc::Acknowledge { barrier: "x".into() },
            Rpc::RegisterKill {
                shooter: PeerId(1),
                victim: PeerId(2),
            },
            Rpc::SessionState {
                phase: RoundPhase::Cooldown,
                generation: 1,
                level: "pi_mar".into(),
            },
        ];
        for rpc in samples {
            assert!(known_name(rpc.name()).is_some());
            assert_eq!(Rpc::from_call(&rpc.to_call()).unwrap(), rpc);
        }
    }

    #[test]
    fn test_host_only_calls() {
        assert!(Rpc::RestartRound.is_host_only());
        assert!(!Rpc::Acknowledge { barrier: "x".into() }.is_host_only());
    }

    #[test]
    fn test_truncated_envelope_rejected() {
        let bytes = RpcEnvelope::Delivery {
            sender: PeerId::SERVER,
            call: Rpc::StopRound.to_call(),
        }
        .encode()
        .unwrap();
        assert!(RpcEnvelope::decode(&bytes[..bytes.len() - 1]).is_err());
    }
}
