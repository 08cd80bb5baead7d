//! Identity and phase types that both ends of a session agree on.

use serde::{Deserialize, Serialize};

/// Identifier of a network participant.
///
/// The host is always [`PeerId::SERVER`]; clients receive increasing ids at
/// connect time and an id is never reused within a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u32);

impl PeerId {
    /// The authoritative host.
    pub const SERVER: Self = Self(0);

    /// Invalid/null peer (not yet assigned).
    pub const NULL: Self = Self(u32::MAX);

    /// Returns true if this is the host.
    #[inline]
    #[must_use]
    pub const fn is_server(self) -> bool {
        self.0 == 0
    }

    /// Returns true if this is a null/invalid id.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == u32::MAX
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::NULL
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_server() {
            write!(f, "peer#server")
        } else {
            write!(f, "peer#{}", self.0)
        }
    }
}

/// Phase of the server-driven round lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RoundPhase {
    /// Players frozen, waiting for every peer to register.
    Warmup = 0,
    /// Round in play.
    Active = 1,
    /// Round over, players frozen.
    Cooldown = 2,
    /// Switching to a new level.
    LevelTransition = 3,
}

impl RoundPhase {
    /// Decodes a wire byte.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Warmup),
            1 => Some(Self::Active),
            2 => Some(Self::Cooldown),
            3 => Some(Self::LevelTransition),
            _ => None,
        }
    }

    /// Players may only move while a round is active.
    #[inline]
    #[must_use]
    pub const fn is_frozen(self) -> bool {
        !matches!(self, Self::Active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_markers() {
        assert!(PeerId::SERVER.is_server());
        assert!(!PeerId(3).is_server());
        assert!(PeerId::default().is_null());
        assert_eq!(PeerId(7).to_string(), "peer#7");
    }

    #[test]
    fn test_round_phase_wire_byte() {
        for phase in [
            RoundPhase::Warmup,
            RoundPhase::Active,
            RoundPhase::Cooldown,
            RoundPhase::LevelTransition,
        ] {
            assert_eq!(RoundPhase::from_u8(phase as u8), Some(phase));
        }
        assert_eq!(RoundPhase::from_u8(9), None);
        assert!(RoundPhase::Warmup.is_frozen());
        assert!(!RoundPhase::Active.is_frozen());
    }
}
