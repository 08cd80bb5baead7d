//! # Player Registry
//!
//! `PeerId → PlayerInfo`, mirrored on every peer through the
//! `RegisterPlayer`/`UnregisterPlayer` calls. Entries are added and removed
//! incrementally; nothing ever scans for players.

use std::collections::BTreeMap;

use horus_shared::{PeerId, Vec3};
use tracing::{debug, warn};

/// What every peer knows about a player.
#[derive(Clone, Debug, PartialEq)]
pub struct PlayerInfo {
    /// Display name.
    pub username: String,
    /// Stable player guid.
    pub guid: String,
    /// Body colour.
    pub color: Vec3,
    /// Watching rather than playing.
    pub spectating: bool,
}

/// Registered players keyed by peer.
#[derive(Debug, Default)]
pub struct PlayerRegistry {
    players: BTreeMap<PeerId, PlayerInfo>,
}

impl PlayerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            players: BTreeMap::new(),
        }
    }

    /// Adds a player. A peer that is already registered keeps its entry;
    /// the call is logged and returns false.
    pub fn register(&mut self, peer: PeerId, info: PlayerInfo) -> bool {
        if let Some(existing) = self.players.get(&peer) {
            warn!(
                %peer,
                current = %existing.username,
                wanted = %info.username,
                "player already registered"
            );
            return false;
        }
        debug!(%peer, username = %info.username, "player registered");
        self.players.insert(peer, info);
        true
    }

    /// Removes a player, returning its entry.
    pub fn unregister(&mut self, peer: PeerId) -> Option<PlayerInfo> {
        let removed = self.players.remove(&peer);
        if removed.is_none() {
            debug!(%peer, "unregister for unknown player");
        }
        removed
    }

    /// Entry for `peer`.
    #[must_use]
    pub fn get(&self, peer: PeerId) -> Option<&PlayerInfo> {
        self.players.get(&peer)
    }

    /// True if `peer` is registered.
    #[must_use]
    pub fn contains(&self, peer: PeerId) -> bool {
        self.players.contains_key(&peer)
    }

    /// Display name of `peer`, if registered.
    #[must_use]
    pub fn username(&self, peer: PeerId) -> Option<&str> {
        self.players.get(&peer).map(|info| info.username.as_str())
    }

    /// Sets the spectating flag. Returns false for unknown peers.
    pub fn set_spectating(&mut self, peer: PeerId, spectating: bool) -> bool {
        match self.players.get_mut(&peer) {
            Some(info) => {
                info.spectating = spectating;
                true
            }
            None => false,
        }
    }

    /// Registered players in peer order.
    pub fn iter(&self) -> impl Iterator<Item = (PeerId, &PlayerInfo)> {
        self.players.iter().map(|(peer, info)| (*peer, info))
    }

    /// Number of registered players.
    #[must_use]
    pub fn len(&self) -> usize {
        self.players.len()
    }

    /// True when nobody is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Forgets everyone.
    pub fn clear(&mut self) {
        self.players.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str) -> PlayerInfo {
        PlayerInfo {
            username: name.to_owned(),
            guid: format!("guid-{name}"),
            color: Vec3::new(1.0, 1.0, 1.0),
            spectating: false,
        }
    }

    #[test]
    fn test_duplicate_registration_keeps_first() {
        let mut registry = PlayerRegistry::new();
        assert!(registry.register(PeerId(1), info("ana")));
        assert!(!registry.register(PeerId(1), info("bob")));
        assert_eq!(registry.username(PeerId(1)), Some("ana"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister_and_spectate() {
        let mut registry = PlayerRegistry::new();
        registry.register(PeerId(2), info("cy"));
        assert!(registry.set_spectating(PeerId(2), true));
        assert!(registry.get(PeerId(2)).is_some_and(|p| p.spectating));
        assert!(registry.unregister(PeerId(2)).is_some());
        assert!(registry.unregister(PeerId(2)).is_none());
        assert!(!registry.set_spectating(PeerId(2), false));
    }
}
