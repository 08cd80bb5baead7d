//! # Leaderboard
//!
//! Kills, deaths and killing sprees per player. Every peer applies
//! `RegisterKill` to its own copy; only the host broadcasts the
//! announcements this module produces.

use horus_shared::PeerId;

use crate::registry::PlayerRegistry;

/// Spree lengths that earn an announcement.
const SPREE_TITLES: [(u32, &str); 3] = [(3, "is threatening!"), (6, "is dangerous!"), (9, "is merciless!")];

/// Killing a player on a spree at least this long is called out.
const SPREE_STOP_MIN: u32 = 3;

/// One player's score.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LeaderboardEntry {
    /// Player.
    pub peer: PeerId,
    /// Kills this round.
    pub kills: u32,
    /// Deaths this round.
    pub deaths: u32,
    /// Kills since the last death.
    pub consecutive_kills: u32,
}

impl LeaderboardEntry {
    const fn new(peer: PeerId) -> Self {
        Self {
            peer,
            kills: 0,
            deaths: 0,
            consecutive_kills: 0,
        }
    }
}

/// A chat announcement about `peer` (shown as `PEER: text`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Announcement {
    /// Player the line is about.
    pub peer: PeerId,
    /// Text after the name.
    pub text: String,
}

/// Scores of every player in the session.
#[derive(Debug, Default)]
pub struct Leaderboard {
    entries: Vec<LeaderboardEntry>,
}

impl Leaderboard {
    /// Creates an empty board.
    #[must_use]
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Adds a zeroed entry for `peer` unless it has one.
    pub fn add(&mut self, peer: PeerId) {
        if self.get(peer).is_none() {
            self.entries.push(LeaderboardEntry::new(peer));
        }
    }

    /// Drops `peer`'s entry.
    pub fn remove(&mut self, peer: PeerId) {
        self.entries.retain(|entry| entry.peer != peer);
    }

    /// Entry for `peer`.
    #[must_use]
    pub fn get(&self, peer: PeerId) -> Option<&LeaderboardEntry> {
        self.entries.iter().find(|entry| entry.peer == peer)
    }

    fn get_mut(&mut self, peer: PeerId) -> Option<&mut LeaderboardEntry> {
        self.entries.iter_mut().find(|entry| entry.peer == peer)
    }

    /// Zeroes every score (round restart).
    pub fn reset(&mut self) {
        for entry in &mut self.entries {
            *entry = LeaderboardEntry::new(entry.peer);
        }
    }

    /// Entries ordered by kills, most first; ties keep join order.
    #[must_use]
    pub fn standings(&self) -> Vec<LeaderboardEntry> {
        let mut sorted = self.entries.clone();
        sorted.sort_by(|a, b| b.kills.cmp(&a.kills));
        sorted
    }

    /// Forgets everyone.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Applies a kill and returns the announcements it earns, in order.
    ///
    /// `shooter == victim` is a suicide.
    pub fn record_kill(&mut self, registry: &PlayerRegistry, shooter: PeerId, victim: PeerId) -> Vec<Announcement> {
        let mut announcements = Vec::new();

        let mut ended_spree = false;
        if let Some(entry) = self.get_mut(victim) {
            entry.deaths += 1;
            ended_spree = entry.consecutive_kills >= SPREE_STOP_MIN;
            entry.consecutive_kills = 0;
        }

        if shooter == victim {
            announcements.push(Announcement {
                peer: shooter,
                text: "committed suicide".to_owned(),
            });
            return announcements;
        }

        let victim_name = registry
            .username(victim)
            .map_or_else(|| victim.to_string(), str::to_owned)
            .to_uppercase();
        let stopped = if ended_spree { "and stopped " } else { "" };
        announcements.push(Announcement {
            peer: shooter,
            text: format!("killed {stopped}{victim_name}"),
        });

        if let Some(entry) = self.get_mut(shooter) {
            entry.kills += 1;
            entry.consecutive_kills += 1;
            let streak = entry.consecutive_kills;
            if let Some((_, title)) = SPREE_TITLES.iter().find(|(at, _)| *at == streak) {
                announcements.push(Announcement {
                    peer: shooter,
                    text: (*title).to_owned(),
                });
            }
        }

        announcements
    }
}
