//! Runs a decoded call against the node's local state.
//!
//! Every peer, the host included, applies calls through here so the
//! mirrored state evolves the same way everywhere.

use horus_shared::{PeerId, RoundPhase, Vec3};
use tracing::{debug, info, warn};

use super::{Node, NodeEvent, REGISTER_BARRIER};
use crate::registry::PlayerInfo;
use crate::replication::ReplicatedEntity;
use crate::rpc::{Persistence, Rpc, Target};
use crate::transport::Transport;

impl<T: Transport> Node<T> {
    pub(super) fn apply(&mut self, sender: PeerId, rpc: Rpc) {
        debug!(%sender, rpc = rpc.name(), "applying call");
        match rpc {
            Rpc::RegisterPlayer {
                peer,
                username,
                guid,
                color,
                spectating,
            } => {
                let info = PlayerInfo {
                    username,
                    guid,
                    color,
                    spectating,
                };
                if self.registry.register(peer, info) {
                    self.leaderboard.add(peer);
                    self.events.push(NodeEvent::PlayerJoined(peer));
                }
            }
            Rpc::UnregisterPlayer { peer } => {
                self.leaderboard.remove(peer);
                if self.avatars.remove(&peer).is_some() {
                    self.events.push(NodeEvent::AvatarDespawned(peer));
                }
                if self.registry.unregister(peer).is_some() {
                    self.events.push(NodeEvent::PlayerLeft(peer));
                }
            }
            Rpc::SpawnAvatar { peer, position } => self.spawn_avatar(peer, position),
            Rpc::DespawnAvatar { peer } => {
                if self.avatars.remove(&peer).is_some() {
                    self.events.push(NodeEvent::AvatarDespawned(peer));
                }
            }
            Rpc::ToggleSpectate { peer, spectating } => {
                self.registry.set_spectating(peer, spectating);
            }
            Rpc::ImmediateRespawn { peer, position } => match self.avatars.get_mut(&peer) {
                Some(avatar) => {
                    avatar.teleport(position);
                    if peer == self.local {
                        self.movement.reset();
                    }
                    self.events.push(NodeEvent::Respawned(peer));
                }
                None => warn!(%peer, "respawn for a missing avatar"),
            },
            Rpc::LogChat {
                peer,
                text,
                system,
                sourceless,
            } => {
                self.chat.log(&self.registry, peer, &text, system, sourceless);
            }
            Rpc::RoundPhaseChanged { phase, generation } => self.set_phase(phase, generation),
            Rpc::SessionState {
                phase,
                generation,
                level,
            } => {
                self.load_level(&level, generation);
                self.set_phase(phase, generation);
                self.ensure_registered();
                self.ensure_spawned();
            }
            Rpc::PrepareRound { level, generation } => {
                self.load_level(&level, generation);
                self.ensure_registered();
                self.ensure_spawned();
                if !self.is_host() {
                    self.invoke(
                        Rpc::Acknowledge {
                            barrier: REGISTER_BARRIER.to_owned(),
                        },
                        Target::Server,
                        Persistence::Transient,
                    );
                }
            }
            Rpc::Acknowledge { barrier } => self.acknowledge(sender, &barrier),
            Rpc::StopRound => self.paused = true,
            Rpc::RestartRound => {
                self.paused = false;
                self.leaderboard.reset();
                self.chat.hide_all();
                if self.avatars.contains_key(&self.local) {
                    let position = self.pick_spawn_point();
                    self.invoke(
                        Rpc::ImmediateRespawn {
                            peer: self.local,
                            position,
                        },
                        Target::AllPeers,
                        Persistence::Transient,
                    );
                }
            }
            Rpc::ChangeLevelTo { level, generation } => self.load_level(&level, generation),
            Rpc::RegisterKill { shooter, victim } => {
                let announcements = self.leaderboard.record_kill(&self.registry, shooter, victim);
                self.events.push(NodeEvent::Kill { shooter, victim });
                if self.is_host() {
                    for announcement in announcements {
                        self.invoke(
                            Rpc::LogChat {
                                peer: announcement.peer,
                                text: announcement.text,
                                system: true,
                                sourceless: false,
                            },
                            Target::AllPeers,
                            Persistence::Transient,
                        );
                    }
                }
            }
        }
    }

    fn spawn_avatar(&mut self, peer: PeerId, position: Vec3) {
        if let Some(avatar) = self.avatars.get_mut(&peer) {
            avatar.teleport(position);
        } else {
            self.avatars
                .insert(peer, ReplicatedEntity::new(peer, position, self.config.send_rate));
        }
        if peer == self.local {
            self.movement.reset();
        }
        self.events.push(NodeEvent::AvatarSpawned(peer));
    }

    /// Mirrors a host phase change. Changes from an older generation are
    /// stale and ignored; a repeat of the current phase is a no-op.
    fn set_phase(&mut self, phase: RoundPhase, generation: u32) {
        if generation < self.generation {
            debug!(?phase, generation, current = self.generation, "ignoring stale phase change");
            return;
        }
        if self.phase == Some(phase) && self.generation == generation {
            return;
        }
        self.generation = generation;
        self.phase = Some(phase);
        self.paused = phase.is_frozen();
        self.events.push(NodeEvent::PhaseChanged { phase, generation });
    }

    /// Switches to `level`. Avatars of the previous level are dropped; the
    /// first level a client hears about keeps what was replayed to it.
    fn load_level(&mut self, level: &str, generation: u32) {
        if generation < self.generation {
            debug!(level, generation, current = self.generation, "ignoring stale level");
            return;
        }
        self.generation = generation;
        if self.level.as_deref() == Some(level) {
            return;
        }
        if let Some(previous) = self.level.replace(level.to_owned()) {
            info!(%previous, level, generation, "changing level");
            for peer in std::mem::take(&mut self.avatars).into_keys() {
                self.events.push(NodeEvent::AvatarDespawned(peer));
            }
            self.movement.reset();
            self.chat.notice(&format!("Changed level to {level}."));
        }
        self.events.push(NodeEvent::LevelLoaded {
            level: level.to_owned(),
            generation,
        });
    }
}
