//! # RPC Router
//!
//! Host-side fan-out of invocations to peers.
//!
//! ## Guarantees
//!
//! - Per-peer FIFO queues: calls from one sender reach one receiver in
//!   send order
//! - Buffered calls are replayed, in their original order, to a peer the
//!   moment it completes the join handshake
//! - Level-buffered calls carry the generation they were made in and are
//!   dropped en masse by [`RpcRouter::invalidate_generation`], including any
//!   copies still waiting in a queue
//! - Calls for a peer that is gone are dropped silently, never retried
//!
//! The router is transport-agnostic: the owner drains the queues each tick
//! and hands the deliveries to whatever link reaches the peer.

use std::collections::{BTreeMap, VecDeque};

use horus_shared::PeerId;
use tracing::debug;

use super::{Persistence, Target};

/// How long a buffered call lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferScope {
    /// Not buffered.
    Transient,
    /// Until the session ends.
    Session,
    /// Until generation `n` is invalidated.
    Generation(u32),
}

impl BufferScope {
    const fn expired_by(self, invalidated: u32) -> bool {
        matches!(self, Self::Generation(generation) if generation <= invalidated)
    }
}

/// One queued call for one receiver.
#[derive(Clone, Debug, PartialEq)]
pub struct Delivery<M> {
    /// Original sender.
    pub sender: PeerId,
    /// The call.
    pub message: M,
    scope: BufferScope,
}

/// A call kept for late joiners.
#[derive(Clone, Debug, PartialEq)]
pub struct BufferedCall<M> {
    /// Original sender.
    pub sender: PeerId,
    /// Original target.
    pub target: Target,
    /// Lifetime of the entry.
    pub scope: BufferScope,
    /// The call.
    pub message: M,
}

/// Outcome of routing one invocation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Routed {
    /// The host must run the call itself.
    pub local: bool,
    /// Remote peers the call was queued for.
    pub recipients: usize,
}

/// Host-side routing table, outbound queues and buffered-call log.
#[derive(Debug)]
pub struct RpcRouter<M> {
    /// Outbound queues keyed by connected peer.
    queues: BTreeMap<PeerId, VecDeque<Delivery<M>>>,
    /// Buffered calls in invocation order.
    log: Vec<BufferedCall<M>>,
    /// Current level generation.
    generation: u32,
}

impl<M: Clone> RpcRouter<M> {
    /// Creates an empty router at generation 0.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            queues: BTreeMap::new(),
            log: Vec::new(),
            generation: 0,
        }
    }

    /// Current level generation.
    #[inline]
    #[must_use]
    pub const fn generation(&self) -> u32 {
        self.generation
    }

    /// Moves to a new level generation.
    ///
    /// Generations only move forward; an older value is ignored.
    pub fn set_generation(&mut self, generation: u32) {
        if generation < self.generation {
            debug!(current = self.generation, generation, "ignoring generation rollback");
            return;
        }
        self.generation = generation;
    }

    /// Connected remote peers, in id order.
    pub fn peers(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.queues.keys().copied()
    }

    /// Number of connected remote peers.
    #[inline]
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.queues.len()
    }

    /// Returns true if `peer` completed the handshake and is still here.
    #[inline]
    #[must_use]
    pub fn is_connected(&self, peer: PeerId) -> bool {
        self.queues.contains_key(&peer)
    }

    /// Number of buffered calls.
    #[inline]
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.log.len()
    }

    /// Buffered calls in invocation order.
    #[must_use]
    pub fn buffered(&self) -> &[BufferedCall<M>] {
        &self.log
    }

    /// Calls waiting to be drained for `peer`.
    #[must_use]
    pub fn pending(&self, peer: PeerId) -> usize {
        self.queues.get(&peer).map_or(0, VecDeque::len)
    }

    /// Registers a peer that completed the join handshake and queues the
    /// replay of every buffered call addressed to it.
    ///
    /// Returns the number of replayed calls.
    pub fn connect_peer(&mut self, peer: PeerId) -> usize {
        if peer.is_server() || self.queues.contains_key(&peer) {
            debug!(%peer, "peer already connected");
            return 0;
        }
        let queue: VecDeque<Delivery<M>> = self
            .log
            .iter()
            .filter(|entry| replays_to(entry, peer))
            .map(|entry| Delivery {
                sender: entry.sender,
                message: entry.message.clone(),
                scope: entry.scope,
            })
            .collect();
        let replayed = queue.len();
        self.queues.insert(peer, queue);
        debug!(%peer, replayed, "peer joined router");
        replayed
    }

    /// Forgets a departed peer. Anything still queued for it is dropped.
    pub fn disconnect_peer(&mut self, peer: PeerId) {
        if let Some(queue) = self.queues.remove(&peer) {
            debug!(%peer, dropped = queue.len(), "peer left router");
        }
    }

    /// Routes a call made at the current generation.
    pub fn invoke(&mut self, sender: PeerId, message: M, target: Target, persistence: Persistence) -> Routed {
        let scope = match persistence {
            Persistence::Transient => BufferScope::Transient,
            Persistence::Buffered => BufferScope::Session,
            Persistence::LevelBuffered => BufferScope::Generation(self.generation),
        };
        self.route(sender, message, target, scope)
    }

    /// Routes a call the sender made while on `generation`.
    ///
    /// Level-buffered calls from an older generation are stale and dropped;
    /// `None` is returned for them.
    pub fn invoke_in(
        &mut self,
        generation: u32,
        sender: PeerId,
        message: M,
        target: Target,
        persistence: Persistence,
    ) -> Option<Routed> {
        if persistence == Persistence::LevelBuffered && generation < self.generation {
            debug!(%sender, generation, current = self.generation, "dropping stale level-buffered call");
            return None;
        }
        Some(self.invoke(sender, message, target, persistence))
    }

    fn route(&mut self, sender: PeerId, message: M, target: Target, scope: BufferScope) -> Routed {
        let local = match target {
            Target::Server | Target::AllPeers => true,
            Target::AllExceptSender => !sender.is_server(),
            Target::Peer(peer) => peer.is_server(),
        };

        let mut recipients = 0;
        for (peer, queue) in &mut self.queues {
            if *peer == sender || !addresses(target, *peer) {
                continue;
            }
            queue.push_back(Delivery {
                sender,
                message: message.clone(),
                scope,
            });
            recipients += 1;
        }

        if scope != BufferScope::Transient && target != Target::Server {
            self.log.push(BufferedCall {
                sender,
                target,
                scope,
                message,
            });
        }

        Routed { local, recipients }
    }

    /// Takes everything queued for `peer`, oldest first.
    pub fn drain(&mut self, peer: PeerId) -> Vec<Delivery<M>> {
        self.queues
            .get_mut(&peer)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default()
    }

    /// Drains every queue, calling `send` per delivery in per-peer order.
    pub fn flush(&mut self, mut send: impl FnMut(PeerId, Delivery<M>)) {
        for (peer, queue) in &mut self.queues {
            for delivery in queue.drain(..) {
                send(*peer, delivery);
            }
        }
    }

    /// Discards every call buffered under `generation` or earlier, including
    /// copies not yet drained. Returns the number of log entries removed.
    pub fn invalidate_generation(&mut self, generation: u32) -> usize {
        let before = self.log.len();
        self.log.retain(|entry| !entry.scope.expired_by(generation));
        for queue in self.queues.values_mut() {
            queue.retain(|delivery| !delivery.scope.expired_by(generation));
        }
        let removed = before - self.log.len();
        debug!(generation, removed, "invalidated buffered calls");
        removed
    }

    /// Drops every buffered call made by `sender`.
    pub fn remove_buffered_from(&mut self, sender: PeerId) -> usize {
        self.remove_buffered_where(|entry| entry.sender == sender)
    }

    /// Drops buffered calls matching `predicate`. Returns how many went.
    pub fn remove_buffered_where(&mut self, mut predicate: impl FnMut(&BufferedCall<M>) -> bool) -> usize {
        let before = self.log.len();
        self.log.retain(|entry| !predicate(entry));
        before - self.log.len()
    }

    /// Drops all state (session over).
    pub fn clear(&mut self) {
        self.queues.clear();
        self.log.clear();
        self.generation = 0;
    }
}

impl<M: Clone> Default for RpcRouter<M> {
    fn default() -> Self {
        Self::new()
    }
}

fn addresses(target: Target, peer: PeerId) -> bool {
    match target {
        Target::Server => false,
        Target::AllPeers | Target::AllExceptSender => true,
        Target::Peer(wanted) => wanted == peer,
    }
}

fn replays_to<M>(entry: &BufferedCall<M>, joiner: PeerId) -> bool {
    entry.sender != joiner && addresses(entry.target, joiner)
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: PeerId = PeerId(1);
    const B: PeerId = PeerId(2);
    const C: PeerId = PeerId(3);

    fn messages(deliveries: Vec<Delivery<&'static str>>) -> Vec<&'static str> {
        deliveries.into_iter().map(|d| d.message).collect()
    }

    #[test]
    fn test_all_peers_from_host_runs_locally_and_fans_out() {
        let mut router = RpcRouter::new();
        router.connect_peer(A);
        router.connect_peer(B);

        let routed = router.invoke(PeerId::SERVER, "hello", Target::AllPeers, Persistence::Transient);
        assert!(routed.local);
        assert_eq!(routed.recipients, 2);
        assert_eq!(messages(router.drain(A)), vec!["hello"]);
        assert_eq!(messages(router.drain(B)), vec!["hello"]);
    }

    #[test]
    fn test_all_except_sender_skips_sender() {
        let mut router = RpcRouter::new();
        router.connect_peer(A);
        router.connect_peer(B);

        let routed = router.invoke(A, "x", Target::AllExceptSender, Persistence::Transient);
        assert!(routed.local);
        assert_eq!(router.pending(A), 0);
        assert_eq!(router.pending(B), 1);

        let routed = router.invoke(PeerId::SERVER, "y", Target::AllExceptSender, Persistence::Transient);
        assert!(!routed.local);
        assert_eq!(routed.recipients, 2);
    }

    #[test]
    fn test_specific_peer_and_server_targets() {
        let mut router = RpcRouter::new();
        router.connect_peer(A);
        router.connect_peer(B);

        let routed = router.invoke(A, "only-b", Target::Peer(B), Persistence::Transient);
        assert!(!routed.local);
        assert_eq!(router.pending(B), 1);

        let routed = router.invoke(A, "host", Target::Server, Persistence::Buffered);
        assert!(routed.local);
        assert_eq!(routed.recipients, 0);
        // server-targeted calls never enter the replay log
        assert_eq!(router.buffered_len(), 0);
    }

    #[test]
    fn test_per_sender_order_is_preserved() {
        let mut router = RpcRouter::new();
        router.connect_peer(B);
        for msg in ["1", "2", "3"] {
            router.invoke(A, msg, Target::AllPeers, Persistence::Transient);
        }
        assert_eq!(messages(router.drain(B)), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_buffered_replayed_transient_not() {
        let mut router = RpcRouter::new();
        router.connect_peer(A);
        router.invoke(A, "buffered", Target::AllPeers, Persistence::Buffered);
        router.invoke(A, "transient", Target::AllPeers, Persistence::Transient);

        assert_eq!(router.connect_peer(C), 1);
        assert_eq!(messages(router.drain(C)), vec!["buffered"]);
    }

    #[test]
    fn test_replay_respects_targets() {
        let mut router = RpcRouter::new();
        router.connect_peer(A);
        router.invoke(A, "to-b", Target::Peer(B), Persistence::Buffered);
        router.invoke(PeerId::SERVER, "others", Target::AllExceptSender, Persistence::Buffered);

        assert_eq!(messages(router.drain(A)), vec!["others"]);
        router.connect_peer(C);
        assert_eq!(messages(router.drain(C)), vec!["others"]);
    }

    #[test]
    fn test_invalidation_removes_log_and_queued_copies() {
        let mut router = RpcRouter::new();
        router.connect_peer(A);
        router.invoke(PeerId::SERVER, "level0", Target::AllPeers, Persistence::LevelBuffered);
        router.invoke(PeerId::SERVER, "session", Target::AllPeers, Persistence::Buffered);

        assert_eq!(router.invalidate_generation(0), 1);
        router.set_generation(1);
        router.invoke(PeerId::SERVER, "level1", Target::AllPeers, Persistence::LevelBuffered);

        assert_eq!(messages(router.drain(A)), vec!["session", "level1"]);
        router.connect_peer(B);
        assert_eq!(messages(router.drain(B)), vec!["session", "level1"]);
    }

    #[test]
    fn test_stale_level_call_dropped() {
        let mut router = RpcRouter::new();
        router.connect_peer(B);
        router.set_generation(2);
        assert!(router
            .invoke_in(1, A, "old", Target::AllPeers, Persistence::LevelBuffered)
            .is_none());
        assert!(router
            .invoke_in(1, A, "chat", Target::AllPeers, Persistence::Transient)
            .is_some());
        assert_eq!(messages(router.drain(B)), vec!["chat"]);
    }

    #[test]
    fn test_disconnected_target_dropped_silently() {
        let mut router = RpcRouter::new();
        router.connect_peer(A);
        router.invoke(PeerId::SERVER, "x", Target::Peer(A), Persistence::Transient);
        router.disconnect_peer(A);
        assert!(router.drain(A).is_empty());
        let routed = router.invoke(PeerId::SERVER, "y", Target::Peer(A), Persistence::Transient);
        assert_eq!(routed.recipients, 0);
    }

    #[test]
    fn test_remove_buffered_from_sender() {
        let mut router = RpcRouter::new();
        router.invoke(A, "a", Target::AllPeers, Persistence::Buffered);
        router.invoke(B, "b", Target::AllPeers, Persistence::Buffered);
        assert_eq!(router.remove_buffered_from(A), 1);
        router.connect_peer(C);
        assert_eq!(messages(router.drain(C)), vec!["b"]);
    }

    #[test]
    fn test_generation_never_rolls_back() {
        let mut router: RpcRouter<&str> = RpcRouter::new();
        router.set_generation(3);
        router.set_generation(1);
        assert_eq!(router.generation(), 3);
    }
}
