//! # Round Director
//!
//! Server-only round lifecycle. Clients never run this; they mirror the
//! phase from `RoundPhaseChanged` broadcasts.
//!
//! ```text
//!        ┌──────────────────────────────────────────────────────┐
//!        ▼                                                      │
//!   ┌────────┐ warmup elapsed  ┌────────┐ round   ┌──────────┐  │ level not due
//!   │ Warmup │ + peers ready ─▶│ Active │ ──────▶ │ Cooldown │ ─┤
//!   └────────┘                 └────────┘ elapsed └──────────┘  │ level due
//!        ▲                                                      ▼
//!        │      generation + 1, new level       ┌─────────────────┐
//!        └───────────────────────────────────── │ LevelTransition │
//!                                               └─────────────────┘
//! ```
//!
//! Every transition is reported as a [`RoundEvent`]; the owner turns them
//! into broadcasts. Phases only change inside [`RoundDirector::update`]
//! (time-driven) or [`RoundDirector::force_level`] (admin command).

use horus_shared::constants::{
    ANNOUNCE_AT_SECS, COOLDOWN_SECS, LEVELS, ROUNDS_PER_LEVEL, ROUND_SECS, START_WARNING_SECS, WARMUP_SECS,
};
use horus_shared::RoundPhase;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::info;

use crate::error::{NetError, NetResult};

/// Round timings and level rotation.
#[derive(Clone, Debug, PartialEq)]
pub struct RoundConfig {
    /// Minimum warmup (seconds).
    pub warmup_secs: f32,
    /// Round length (seconds).
    pub round_secs: f32,
    /// Cooldown length (seconds).
    pub cooldown_secs: f32,
    /// Rounds played before the level rotates.
    pub rounds_per_level: u32,
    /// Remaining-time announcements, largest first (seconds).
    pub announce_at: Vec<u32>,
    /// "Game starts in N seconds..." lead time (seconds).
    pub start_warning_secs: f32,
    /// Levels in the rotation.
    pub levels: Vec<String>,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            warmup_secs: WARMUP_SECS,
            round_secs: ROUND_SECS,
            cooldown_secs: COOLDOWN_SECS,
            rounds_per_level: ROUNDS_PER_LEVEL,
            announce_at: ANNOUNCE_AT_SECS.to_vec(),
            start_warning_secs: START_WARNING_SECS,
            levels: LEVELS.iter().map(|level| (*level).to_owned()).collect(),
        }
    }
}

/// Something the owner must broadcast.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoundEvent {
    /// Entered a new phase.
    PhaseChanged {
        /// New phase.
        phase: RoundPhase,
        /// Generation the phase belongs to.
        generation: u32,
    },
    /// Sourceless chat announcement.
    Announce(String),
    /// The level rotated; buffered calls of `previous_generation` are stale.
    LevelChanged {
        /// Generation that just ended.
        previous_generation: u32,
        /// Generation that starts.
        generation: u32,
        /// New level.
        level: String,
    },
}

/// Server-side round state machine.
#[derive(Debug)]
pub struct RoundDirector {
    config: RoundConfig,
    phase: RoundPhase,
    generation: u32,
    level: String,
    elapsed: f32,
    peers_ready: bool,
    rounds_until_change: u32,
    next_warning: usize,
    start_warned: bool,
    started: bool,
}

impl RoundDirector {
    /// Creates a director on `level`, generation 0.
    #[must_use]
    pub fn new(config: RoundConfig, level: impl Into<String>) -> Self {
        let rounds_until_change = config.rounds_per_level.max(1);
        Self {
            config,
            phase: RoundPhase::Warmup,
            generation: 0,
            level: level.into(),
            elapsed: 0.0,
            peers_ready: false,
            rounds_until_change,
            next_warning: 0,
            start_warned: false,
            started: false,
        }
    }

    /// Current phase.
    #[inline]
    #[must_use]
    pub const fn phase(&self) -> RoundPhase {
        self.phase
    }

    /// Current level generation.
    #[inline]
    #[must_use]
    pub const fn generation(&self) -> u32 {
        self.generation
    }

    /// Current level.
    #[must_use]
    pub fn level(&self) -> &str {
        &self.level
    }

    /// Timings in use.
    #[must_use]
    pub const fn config(&self) -> &RoundConfig {
        &self.config
    }

    /// Seconds spent in the current phase.
    #[must_use]
    pub const fn elapsed(&self) -> f32 {
        self.elapsed
    }

    /// Enters the first warmup. Calling it again does nothing.
    pub fn start(&mut self) -> Vec<RoundEvent> {
        if self.started {
            return Vec::new();
        }
        self.started = true;
        let mut events = Vec::new();
        self.enter(RoundPhase::Warmup, &mut events);
        events
    }

    /// Every tracked peer registered for the coming round.
    pub fn mark_peers_ready(&mut self) {
        if self.phase == RoundPhase::Warmup {
            self.peers_ready = true;
        }
    }

    /// Advances the clock by `dt` seconds.
    pub fn update<R: Rng + ?Sized>(&mut self, dt: f32, rng: &mut R) -> Vec<RoundEvent> {
        let mut events = Vec::new();
        if !self.started {
            return events;
        }
        self.elapsed += dt;

        match self.phase {
            RoundPhase::Warmup => {
                if self.elapsed >= self.config.warmup_secs && self.peers_ready {
                    self.enter(RoundPhase::Active, &mut events);
                    events.push(RoundEvent::Announce("Game start!".to_owned()));
                }
            }
            RoundPhase::Active => {
                let remaining = self.config.round_secs - self.elapsed;
                while let Some(&at) = self.config.announce_at.get(self.next_warning) {
                    #[allow(clippy::cast_precision_loss)]
                    let threshold = at as f32;
                    if remaining >= threshold {
                        break;
                    }
                    self.next_warning += 1;
                    if remaining > 0.0 {
                        events.push(RoundEvent::Announce(format!("{at} seconds remaining...")));
                    }
                }
                if self.elapsed >= self.config.round_secs {
                    self.rounds_until_change = self.rounds_until_change.saturating_sub(1);
                    self.enter(RoundPhase::Cooldown, &mut events);
                    events.push(RoundEvent::Announce("Round over!".to_owned()));
                    if self.rounds_until_change == 0 {
                        events.push(RoundEvent::Announce("Level will change on the next round.".to_owned()));
                    }
                }
            }
            RoundPhase::Cooldown => {
                if !self.start_warned && self.config.cooldown_secs - self.elapsed < self.config.start_warning_secs {
                    self.start_warned = true;
                    events.push(RoundEvent::Announce(format!(
                        "Game starts in {} seconds...",
                        self.config.start_warning_secs
                    )));
                }
                if self.elapsed >= self.config.cooldown_secs {
                    if self.rounds_until_change == 0 {
                        self.enter(RoundPhase::LevelTransition, &mut events);
                    } else {
                        self.enter(RoundPhase::Warmup, &mut events);
                    }
                }
            }
            RoundPhase::LevelTransition => {
                let level = self.pick_next_level(rng);
                self.rotate_to(level, &mut events);
            }
        }
        events
    }

    /// Switches to `level` now (the `/map` command).
    ///
    /// # Errors
    ///
    /// [`NetError::AlreadyOnLevel`] for the current level and
    /// [`NetError::UnknownLevel`] for a level outside the rotation.
    pub fn force_level(&mut self, level: &str) -> NetResult<Vec<RoundEvent>> {
        if level == self.level {
            return Err(NetError::AlreadyOnLevel(level.to_owned()));
        }
        if !self.config.levels.iter().any(|known| known == level) {
            return Err(NetError::UnknownLevel(level.to_owned()));
        }
        self.started = true;
        let mut events = Vec::new();
        self.enter(RoundPhase::LevelTransition, &mut events);
        self.rotate_to(level.to_owned(), &mut events);
        Ok(events)
    }

    fn pick_next_level<R: Rng + ?Sized>(&self, rng: &mut R) -> String {
        let candidates: Vec<&String> = self.config.levels.iter().filter(|level| **level != self.level).collect();
        candidates
            .choose(rng)
            .map_or_else(|| self.level.clone(), |level| (*level).clone())
    }

    fn rotate_to(&mut self, level: String, events: &mut Vec<RoundEvent>) {
        let previous_generation = self.generation;
        self.generation += 1;
        self.level = level;
        self.rounds_until_change = self.config.rounds_per_level.max(1);
        info!(level = %self.level, generation = self.generation, "level rotated");
        events.push(RoundEvent::LevelChanged {
            previous_generation,
            generation: self.generation,
            level: self.level.clone(),
        });
        self.enter(RoundPhase::Warmup, events);
    }

    fn enter(&mut self, phase: RoundPhase, events: &mut Vec<RoundEvent>) {
        self.phase = phase;
        self.elapsed = 0.0;
        self.next_warning = 0;
        self.start_warned = false;
        if phase == RoundPhase::Warmup {
            self.peers_ready = false;
        }
        info!(?phase, generation = self.generation, "round phase");
        events.push(RoundEvent::PhaseChanged {
            phase,
            generation: self.generation,
        });
    }
}
