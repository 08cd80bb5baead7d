//! # Lobby - Hosting and Joining
//!
//! The [`Session`] walks one process through finding or hosting a game:
//!
//! ```text
//!  Startup ─▶ QueryingDirectory ─▶ AwaitingInput ─┬─ join ─▶ ChoosingHost ─▶ Connecting ─▶ Connected
//!     ▲        (skipped in LAN)          ▲         │              │ none          │ failed
//!     │                                  │         │              ▼               ▼
//!     │                                  │         │          Startup     blacklist, ChoosingHost
//!     │                                  │         │
//!     │                                  │         └─ host ─▶ PreparingToHost ─▶ Hosting
//!     │                                  │                  DiscoveringNat
//!     │                                  │                  WaitingForNat
//!     │                                  │                  Ready
//!     └──────────── leave / lost ────────┴─────────────────────────────────────────┘
//! ```
//!
//! `Hosting` and `Connected` are the in-game states; the round lifecycle
//! runs inside the node from there on.

mod session;

pub use session::Session;

use std::collections::BTreeSet;
use std::fmt;

use horus_networking::NodeEvent;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::directory::HostRecord;

/// Steps of preparing to host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrepareStage {
    /// About to ask the gateway for port mappings.
    DiscoveringNat,
    /// Waiting for the gateway to answer.
    WaitingForNat,
    /// Mappings settled; the server socket opens next.
    Ready,
}

/// Where the session is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HostingState {
    /// Nothing running; the directory is queried next.
    Startup,
    /// Waiting for the host list.
    QueryingDirectory,
    /// Lobby: waiting for host or join.
    AwaitingInput,
    /// Picking a host from the list.
    ChoosingHost,
    /// Handshaking with the chosen host.
    Connecting,
    /// Opening a host.
    PreparingToHost(PrepareStage),
    /// Running as the authoritative host.
    Hosting,
    /// Playing on someone else's host.
    Connected,
}

impl HostingState {
    /// In a game, as host or client.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Hosting | Self::Connected)
    }
}

impl fmt::Display for HostingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Startup => "starting up",
            Self::QueryingDirectory => "querying the directory",
            Self::AwaitingInput => "in the lobby",
            Self::ChoosingHost => "choosing a host",
            Self::Connecting => "connecting",
            Self::PreparingToHost(_) => "preparing to host",
            Self::Hosting => "hosting",
            Self::Connected => "connected",
        })
    }
}

/// Something the front end may want to show.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// The hosting state changed.
    StateChanged {
        /// Previous state.
        from: HostingState,
        /// New state.
        to: HostingState,
    },
    /// Local feedback line (command errors, connection trouble).
    Notice(String),
    /// Raised by the running node.
    Node(NodeEvent),
    /// `/quit` was entered.
    QuitRequested,
}

/// Picks the host to join: compatible version, room left, not blacklisted,
/// fewest players; ties are broken at random.
pub fn choose_host<'a, R: Rng + ?Sized>(
    servers: &'a [HostRecord],
    version: &str,
    blacklist: &BTreeSet<String>,
    rng: &mut R,
) -> Option<&'a HostRecord> {
    let candidates: Vec<&HostRecord> = servers
        .iter()
        .filter(|host| host.has_room() && host.version == version && !blacklist.contains(&host.guid))
        .collect();
    let fewest = candidates.iter().map(|host| host.current_players).min()?;
    let emptiest: Vec<&HostRecord> = candidates
        .into_iter()
        .filter(|host| host.current_players == fewest)
        .collect();
    emptiest.choose(rng).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn host(guid: &str, players: u32, version: &str) -> HostRecord {
        HostRecord {
            guid: guid.into(),
            map: "pi_rah".into(),
            version: version.into(),
            current_players: players,
            max_players: 6,
        }
    }

    #[test]
    fn test_prefers_the_emptiest_compatible_host() {
        let servers = vec![
            host("busy", 4, "19062014"),
            host("old", 0, "18000000"),
            host("full", 6, "19062014"),
            host("quiet", 2, "19062014"),
        ];
        let mut rng = StdRng::seed_from_u64(1);
        let chosen = choose_host(&servers, "19062014", &BTreeSet::new(), &mut rng);
        assert_eq!(chosen.map(|h| h.guid.as_str()), Some("quiet"));
    }

    #[test]
    fn test_blacklist_and_nothing_left() {
        let servers = vec![host("quiet", 2, "19062014"), host("busy", 5, "19062014")];
        let mut rng = StdRng::seed_from_u64(2);
        let blacklist: BTreeSet<String> = ["quiet".to_owned()].into();
        let chosen = choose_host(&servers, "19062014", &blacklist, &mut rng);
        assert_eq!(chosen.map(|h| h.guid.as_str()), Some("busy"));

        let blacklist: BTreeSet<String> = ["quiet".to_owned(), "busy".to_owned()].into();
        assert!(choose_host(&servers, "19062014", &blacklist, &mut rng).is_none());
        assert!(choose_host(&[], "19062014", &BTreeSet::new(), &mut rng).is_none());
    }

    #[test]
    fn test_ties_are_broken_at_random() {
        let servers = vec![host("a", 1, "v"), host("b", 1, "v"), host("c", 3, "v")];
        let mut seen = BTreeSet::new();
        for seed in 0..32 {
            let mut rng = StdRng::seed_from_u64(seed);
            if let Some(chosen) = choose_host(&servers, "v", &BTreeSet::new(), &mut rng) {
                seen.insert(chosen.guid.clone());
            }
        }
        assert_eq!(seen, ["a".to_owned(), "b".to_owned()].into());
    }

    #[test]
    fn test_active_states() {
        assert!(HostingState::Hosting.is_active());
        assert!(HostingState::Connected.is_active());
        assert!(!HostingState::PreparingToHost(PrepareStage::Ready).is_active());
    }
}
