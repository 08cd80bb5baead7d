//! Host-only handling: client requests, membership changes, the round
//! director and barrier completions.

use horus_shared::{PeerId, RoundPhase};
use tracing::{debug, info, warn};

use super::{HostAuthority, Node, NodeEvent, SyncAction, REGISTER_BARRIER};
use crate::round::RoundEvent;
use crate::rpc::{Persistence, Rpc, RpcRouter, Target};
use crate::transport::Transport;

/// Drops buffered calls that `rpc` makes obsolete, so late joiners only
/// replay the latest state of each player.
pub(super) fn supersede_buffered(router: &mut RpcRouter<Rpc>, sender: PeerId, rpc: &Rpc) {
    let removed = match rpc {
        Rpc::ToggleSpectate { .. } => router
            .remove_buffered_where(|entry| entry.sender == sender && matches!(entry.message, Rpc::ToggleSpectate { .. })),
        Rpc::SpawnAvatar { .. } | Rpc::DespawnAvatar { .. } => router
            .remove_buffered_where(|entry| entry.sender == sender && matches!(entry.message, Rpc::SpawnAvatar { .. })),
        _ => 0,
    };
    if removed > 0 {
        debug!(%sender, rpc = rpc.name(), removed, "superseded buffered calls");
    }
}

impl<T: Transport> Node<T> {
    /// Routes a call a client asked us to make.
    pub(super) fn route_request(
        &mut self,
        sender: PeerId,
        rpc: Rpc,
        target: Target,
        persistence: Persistence,
        generation: u32,
    ) {
        if rpc.is_host_only() {
            warn!(%sender, rpc = rpc.name(), "client attempted a host-only call");
            return;
        }
        if let Some(subject) = rpc.subject() {
            if subject != sender {
                warn!(%sender, %subject, rpc = rpc.name(), "client spoke for another peer");
                return;
            }
        }
        let Some(authority) = self.host.as_mut() else {
            return;
        };
        supersede_buffered(&mut authority.router, sender, &rpc);
        let Some(routed) = authority
            .router
            .invoke_in(generation, sender, rpc.clone(), target, persistence)
        else {
            return;
        };
        if routed.local {
            self.apply(sender, rpc);
        }
    }

    pub(super) fn on_peer_connected(&mut self, peer: PeerId) {
        let level = self.level.clone().unwrap_or_default();
        let (phase, generation) = (self.phase(), self.generation);
        let Some(authority) = self.host.as_mut() else {
            warn!(%peer, "peer connection reported to a client");
            return;
        };
        let replayed = authority.router.connect_peer(peer);
        authority.router.invoke(
            PeerId::SERVER,
            Rpc::SessionState {
                phase,
                generation,
                level,
            },
            Target::Peer(peer),
            Persistence::Transient,
        );
        info!(%peer, replayed, "peer joined");
        self.events.push(NodeEvent::PeerConnected(peer));
    }

    pub(super) fn on_peer_disconnected(&mut self, peer: PeerId) {
        let Some(authority) = self.host.as_mut() else {
            return;
        };
        authority.router.disconnect_peer(peer);
        let dropped = authority.router.remove_buffered_from(peer);
        let fired = authority.sync.remove_peer(peer);
        info!(%peer, dropped, "peer left");
        self.events.push(NodeEvent::PeerDisconnected(peer));

        self.invoke(Rpc::UnregisterPlayer { peer }, Target::AllPeers, Persistence::Transient);
        for (barrier, action) in fired {
            debug!(%barrier, "barrier completed by departure");
            self.run_sync_action(action);
        }
    }

    /// Starts the director on the first frame, then advances it.
    pub(super) fn update_director(&mut self, dt: f32) {
        let Some(authority) = self.host.as_mut() else {
            return;
        };
        let mut events = authority.director.start();
        events.extend(authority.director.update(dt, &mut self.rng));
        self.handle_round_events(events);
    }

    pub(super) fn handle_round_events(&mut self, events: Vec<RoundEvent>) {
        for event in events {
            match event {
                RoundEvent::PhaseChanged { phase, generation } => self.enter_phase(phase, generation),
                RoundEvent::Announce(text) => self.invoke(
                    Rpc::LogChat {
                        peer: PeerId::SERVER,
                        text,
                        system: true,
                        sourceless: true,
                    },
                    Target::AllPeers,
                    Persistence::Transient,
                ),
                RoundEvent::LevelChanged {
                    previous_generation,
                    generation,
                    level,
                } => {
                    if let Some(authority) = self.host.as_mut() {
                        authority.router.invalidate_generation(previous_generation);
                        authority.router.set_generation(generation);
                    }
                    self.invoke(
                        Rpc::ChangeLevelTo { level, generation },
                        Target::AllPeers,
                        Persistence::LevelBuffered,
                    );
                }
            }
        }
    }

    fn enter_phase(&mut self, phase: RoundPhase, generation: u32) {
        if phase == RoundPhase::Warmup {
            self.open_register_barrier();
        }
        self.invoke(
            Rpc::RoundPhaseChanged { phase, generation },
            Target::AllPeers,
            Persistence::Transient,
        );
        match phase {
            RoundPhase::Warmup => {
                let level = self
                    .director()
                    .map_or_else(String::new, |director| director.level().to_owned());
                self.invoke(Rpc::PrepareRound { level, generation }, Target::AllPeers, Persistence::Transient);
            }
            RoundPhase::Active => self.invoke(Rpc::RestartRound, Target::AllPeers, Persistence::Transient),
            RoundPhase::Cooldown => self.invoke(Rpc::StopRound, Target::AllPeers, Persistence::Transient),
            RoundPhase::LevelTransition => {}
        }
    }

    /// Opens the registration barrier over the connected clients.
    fn open_register_barrier(&mut self) {
        let Some(HostAuthority { router, sync, .. }) = self.host.as_mut() else {
            return;
        };
        sync.cancel(REGISTER_BARRIER);
        let fired = sync
            .create_barrier(REGISTER_BARRIER, router.peers())
            .and_then(|()| sync.register_completion(REGISTER_BARRIER, SyncAction::StartRound));
        match fired {
            Ok(Some(action)) => self.run_sync_action(action),
            Ok(None) => {}
            Err(err) => warn!(%err, "could not open the registration barrier"),
        }
    }

    /// Handles an acknowledgement received by the host.
    pub(super) fn acknowledge(&mut self, sender: PeerId, barrier: &str) {
        let Some(authority) = self.host.as_mut() else {
            warn!(%sender, "acknowledgement delivered to a client");
            return;
        };
        match authority.sync.acknowledge(barrier, sender) {
            Ok(Some(action)) => self.run_sync_action(action),
            Ok(None) => {}
            Err(err) => debug!(%sender, %err, "stale acknowledgement"),
        }
    }

    fn run_sync_action(&mut self, action: SyncAction) {
        match action {
            SyncAction::StartRound => {
                let Some(authority) = self.host.as_mut() else {
                    return;
                };
                authority.director.mark_peers_ready();
                let generation = authority.director.generation();
                info!(generation, "every peer registered");
                self.events.push(NodeEvent::RoundStarted { generation });
            }
        }
    }
}
