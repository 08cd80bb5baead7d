//! # NetworkSync - Rendezvous Barriers
//!
//! Lets the host hold a state transition until every tracked peer has
//! acknowledged it.
//!
//! ## Lifecycle
//!
//! ```text
//! create_barrier(name, peers)      acknowledge(name, peer) ...
//!          │                                   │
//!          ▼                                   ▼
//!   ┌─────────────┐   register_completion   ┌──────────┐
//!   │    Open     │ ──────────────────────▶ │ Complete │ (entry removed,
//!   │ acks: P→bool│   + all tracked acked   └──────────┘  token returned once)
//!   └─────────────┘
//! ```
//!
//! A barrier completes iff a completion is registered AND every peer still
//! tracked has acknowledged. Peers leaving are removed from every open
//! barrier, so a departure can complete one.
//!
//! ## Membership
//!
//! Tracked peers are fixed when the barrier is created. Peers that join
//! later are never added, and their acknowledgements are ignored; a barrier
//! that is ready to complete can therefore never reopen.
//!
//! ## Completions
//!
//! Instead of storing closures the barrier stores a completion value `C`
//! and hands it back from whichever call completed it. The caller runs it
//! synchronously in the same tick.

use std::collections::BTreeMap;

use horus_shared::PeerId;
use tracing::{debug, error, warn};

use crate::error::{SyncError, SyncResult};

#[derive(Debug)]
struct Barrier<C> {
    acks: BTreeMap<PeerId, bool>,
    completion: Option<C>,
}

impl<C> Barrier<C> {
    fn is_complete(&self) -> bool {
        self.completion.is_some() && self.acks.values().all(|acked| *acked)
    }
}

/// Named barrier table owned by the host.
#[derive(Debug)]
pub struct NetworkSync<C> {
    authoritative: bool,
    barriers: BTreeMap<String, Barrier<C>>,
}

impl<C> NetworkSync<C> {
    /// Creates an empty table. Only an `authoritative` table accepts
    /// [`NetworkSync::create_barrier`].
    #[must_use]
    pub const fn new(authoritative: bool) -> Self {
        Self {
            authoritative,
            barriers: BTreeMap::new(),
        }
    }

    /// Opens a barrier tracking `peers`.
    ///
    /// # Errors
    ///
    /// [`SyncError::NotAuthoritative`] on a client table and
    /// [`SyncError::AlreadyExists`] if `name` is still open.
    pub fn create_barrier(&mut self, name: &str, peers: impl IntoIterator<Item = PeerId>) -> SyncResult<()> {
        if !self.authoritative {
            error!(barrier = name, "barrier creation attempted on a client");
            return Err(SyncError::NotAuthoritative(name.to_owned()));
        }
        if self.barriers.contains_key(name) {
            warn!(barrier = name, "barrier already exists");
            return Err(SyncError::AlreadyExists(name.to_owned()));
        }
        let acks: BTreeMap<PeerId, bool> = peers.into_iter().map(|peer| (peer, false)).collect();
        debug!(barrier = name, peers = acks.len(), "barrier opened");
        self.barriers.insert(
            name.to_owned(),
            Barrier {
                acks,
                completion: None,
            },
        );
        Ok(())
    }

    /// Marks `peer` as acknowledged and returns the completion if this
    /// finished the barrier.
    ///
    /// # Errors
    ///
    /// [`SyncError::UnknownBarrier`] if `name` is not open.
    pub fn acknowledge(&mut self, name: &str, peer: PeerId) -> SyncResult<Option<C>> {
        let Some(barrier) = self.barriers.get_mut(name) else {
            warn!(barrier = name, %peer, "acknowledgement for unknown barrier");
            return Err(SyncError::UnknownBarrier(name.to_owned()));
        };
        match barrier.acks.get_mut(&peer) {
            Some(acked) => *acked = true,
            None => debug!(barrier = name, %peer, "ignoring acknowledgement from untracked peer"),
        }
        Ok(self.complete_if_ready(name))
    }

    /// Attaches the completion and returns it at once if every tracked peer
    /// already acknowledged. A second registration replaces the first.
    ///
    /// # Errors
    ///
    /// [`SyncError::UnknownBarrier`] if `name` is not open.
    pub fn register_completion(&mut self, name: &str, completion: C) -> SyncResult<Option<C>> {
        let Some(barrier) = self.barriers.get_mut(name) else {
            warn!(barrier = name, "completion registered for unknown barrier");
            return Err(SyncError::UnknownBarrier(name.to_owned()));
        };
        if barrier.completion.replace(completion).is_some() {
            warn!(barrier = name, "replacing barrier completion");
        }
        Ok(self.complete_if_ready(name))
    }

    /// Stops tracking `peer` everywhere. Returns `(name, completion)` for
    /// every barrier that completed as a result, in name order.
    pub fn remove_peer(&mut self, peer: PeerId) -> Vec<(String, C)> {
        let names: Vec<String> = self
            .barriers
            .iter_mut()
            .filter_map(|(name, barrier)| barrier.acks.remove(&peer).map(|_| name.clone()))
            .collect();

        names
            .into_iter()
            .filter_map(|name| self.complete_if_ready(&name).map(|c| (name, c)))
            .collect()
    }

    /// Drops an open barrier without running it. Returns false if unknown.
    pub fn cancel(&mut self, name: &str) -> bool {
        let removed = self.barriers.remove(name).is_some();
        if removed {
            debug!(barrier = name, "barrier cancelled");
        }
        removed
    }

    /// Returns true while `name` is open.
    #[must_use]
    pub fn is_open(&self, name: &str) -> bool {
        self.barriers.contains_key(name)
    }

    /// Tracked peers of `name` that have not acknowledged yet.
    #[must_use]
    pub fn waiting_on(&self, name: &str) -> Vec<PeerId> {
        self.barriers.get(name).map_or_else(Vec::new, |barrier| {
            barrier
                .acks
                .iter()
                .filter(|(_, acked)| !**acked)
                .map(|(peer, _)| *peer)
                .collect()
        })
    }

    /// Number of open barriers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.barriers.len()
    }

    /// True when no barrier is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.barriers.is_empty()
    }

    /// Drops every barrier (session over).
    pub fn clear(&mut self) {
        self.barriers.clear();
    }

    fn complete_if_ready(&mut self, name: &str) -> Option<C> {
        if !self.barriers.get(name).is_some_and(Barrier::is_complete) {
            return None;
        }
        let barrier = self.barriers.remove(name)?;
        debug!(barrier = name, "barrier complete");
        barrier.completion
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: PeerId = PeerId(1);
    const B: PeerId = PeerId(2);
    const C: PeerId = PeerId(3);

    #[test]
    fn test_clients_cannot_create() {
        let mut sync: NetworkSync<u8> = NetworkSync::new(false);
        assert_eq!(
            sync.create_barrier("RegisterPlayer", [A]),
            Err(SyncError::NotAuthoritative("RegisterPlayer".into()))
        );
        assert!(sync.is_empty());
    }

    #[test]
    fn test_duplicate_create_rejected() {
        let mut sync: NetworkSync<u8> = NetworkSync::new(true);
        sync.create_barrier("x", [A]).unwrap();
        assert_eq!(sync.create_barrier("x", [B]), Err(SyncError::AlreadyExists("x".into())));
        assert_eq!(sync.waiting_on("x"), vec![A]);
    }

    #[test]
    fn test_unknown_names_rejected() {
        let mut sync: NetworkSync<u8> = NetworkSync::new(true);
        assert!(sync.acknowledge("nope", A).is_err());
        assert!(sync.register_completion("nope", 1).is_err());
    }

    #[test]
    fn test_dangling_until_completion_registered() {
        let mut sync = NetworkSync::new(true);
        sync.create_barrier("x", [A, B]).unwrap();
        assert_eq!(sync.acknowledge("x", A), Ok(None));
        assert_eq!(sync.acknowledge("x", B), Ok(None));
        assert!(sync.is_open("x"));
        assert_eq!(sync.register_completion("x", "go"), Ok(Some("go")));
        assert!(!sync.is_open("x"));
    }

    #[test]
    fn test_completion_fires_on_last_ack() {
        let mut sync = NetworkSync::new(true);
        sync.create_barrier("x", [A, B]).unwrap();
        assert_eq!(sync.register_completion("x", 7), Ok(None));
        assert_eq!(sync.acknowledge("x", A), Ok(None));
        assert_eq!(sync.acknowledge("x", B), Ok(Some(7)));
        // the entry is gone, so a late ack cannot fire it again
        assert!(sync.acknowledge("x", B).is_err());
    }

    #[test]
    fn test_empty_barrier_completes_on_registration() {
        let mut sync = NetworkSync::new(true);
        sync.create_barrier("x", []).unwrap();
        assert_eq!(sync.register_completion("x", ()), Ok(Some(())));
    }

    #[test]
    fn test_departure_can_complete() {
        let mut sync = NetworkSync::new(true);
        sync.create_barrier("x", [A, B]).unwrap();
        sync.register_completion("x", 1).unwrap();
        sync.acknowledge("x", A).unwrap();
        assert_eq!(sync.remove_peer(B), vec![("x".to_owned(), 1)]);
        assert!(sync.is_empty());
    }

    #[test]
    fn test_late_joiner_not_tracked() {
        let mut sync = NetworkSync::new(true);
        sync.create_barrier("x", [A]).unwrap();
        sync.register_completion("x", 1).unwrap();
        assert_eq!(sync.acknowledge("x", C), Ok(None));
        assert_eq!(sync.waiting_on("x"), vec![A]);
        assert_eq!(sync.acknowledge("x", A), Ok(Some(1)));
    }

    #[test]
    fn test_cancel() {
        let mut sync: NetworkSync<u8> = NetworkSync::new(true);
        sync.create_barrier("x", [A]).unwrap();
        assert!(sync.cancel("x"));
        assert!(!sync.cancel("x"));
        sync.create_barrier("x", [A]).unwrap();
    }
}
