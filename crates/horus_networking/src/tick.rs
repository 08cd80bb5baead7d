//! # Tick Scheduling
//!
//! Two clocks drive a peer:
//!
//! - [`TickLoop`] paces a headless process in wall-clock time (the
//!   dedicated server binary)
//! - [`FixedStep`] splits the variable frame time handed to
//!   [`crate::Node::update`] into fixed simulation steps
//!
//! Gameplay state is only ever mutated from inside a tick; nothing here
//! spawns threads.

use std::time::{Duration, Instant};

/// Simulation steps run for one long frame at most; the rest is dropped.
const MAX_STEPS_PER_FRAME: u32 = 8;

/// Wall-clock pacing for a fixed-rate loop.
#[derive(Debug)]
pub struct TickLoop {
    tick_duration: Duration,
    next_tick: Instant,
    tick_count: u64,
    stats: TickStats,
}

/// Tick timing statistics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickStats {
    /// Shortest tick body observed (µs).
    pub min_tick_us: u64,
    /// Longest tick body observed (µs).
    pub max_tick_us: u64,
    /// Rolling average of the tick body (µs).
    pub avg_tick_us: u64,
    /// Ticks whose body overran the budget.
    pub late_ticks: u64,
    /// Ticks measured.
    pub total_ticks: u64,
}

impl TickStats {
    fn fresh(budget: Duration) -> Self {
        Self {
            min_tick_us: u64::MAX,
            max_tick_us: 0,
            avg_tick_us: duration_us(budget),
            late_ticks: 0,
            total_ticks: 0,
        }
    }
}

fn duration_us(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

impl TickLoop {
    /// Creates a loop running `tick_rate` times per second.
    #[must_use]
    pub fn new(tick_rate: u32) -> Self {
        let tick_duration = Duration::from_micros(1_000_000 / u64::from(tick_rate.max(1)));
        Self {
            tick_duration,
            next_tick: Instant::now(),
            tick_count: 0,
            stats: TickStats::fresh(tick_duration),
        }
    }

    /// Returns true if a tick is due.
    #[must_use]
    pub fn should_tick(&self) -> bool {
        Instant::now() >= self.next_tick
    }

    /// Marks the start of a tick. Returns the start time for
    /// [`TickLoop::end_tick`].
    #[must_use]
    pub fn begin_tick(&mut self) -> Instant {
        let now = Instant::now();
        self.next_tick += self.tick_duration;
        // a stalled process does not try to catch up tick by tick
        if self.next_tick + self.tick_duration * MAX_STEPS_PER_FRAME < now {
            self.next_tick = now + self.tick_duration;
        }
        self.tick_count += 1;
        now
    }

    /// Marks the end of a tick and records its duration.
    pub fn end_tick(&mut self, start: Instant) {
        let duration = start.elapsed();
        let duration_us = duration_us(duration);

        self.stats.total_ticks += 1;
        self.stats.min_tick_us = self.stats.min_tick_us.min(duration_us);
        self.stats.max_tick_us = self.stats.max_tick_us.max(duration_us);
        self.stats.avg_tick_us = (self.stats.avg_tick_us * 15 + duration_us) / 16;

        if duration > self.tick_duration {
            self.stats.late_ticks += 1;
        }
    }

    /// Sleeps until the next tick is due.
    pub fn wait_for_next_tick(&self) {
        let now = Instant::now();
        if self.next_tick > now {
            std::thread::sleep(self.next_tick - now);
        }
    }

    /// Ticks begun so far.
    #[must_use]
    pub const fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Timing statistics.
    #[must_use]
    pub const fn stats(&self) -> &TickStats {
        &self.stats
    }

    /// Target tick duration.
    #[must_use]
    pub const fn tick_duration(&self) -> Duration {
        self.tick_duration
    }

    /// Seconds per tick, for passing to frame-driven code.
    #[must_use]
    pub fn tick_secs(&self) -> f32 {
        self.tick_duration.as_secs_f32()
    }
}

impl Default for TickLoop {
    fn default() -> Self {
        Self::new(horus_shared::TICK_RATE)
    }
}

/// Fixed-step accumulator fed with variable frame times.
#[derive(Clone, Debug)]
pub struct FixedStep {
    step: f32,
    accumulator: f32,
}

impl FixedStep {
    /// Creates an accumulator producing `rate` steps per second.
    #[must_use]
    pub fn new(rate: u32) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let step = 1.0 / rate.max(1) as f32;
        Self { step, accumulator: 0.0 }
    }

    /// Length of one step in seconds.
    #[inline]
    #[must_use]
    pub const fn step(&self) -> f32 {
        self.step
    }

    /// Adds `dt` seconds and returns how many whole steps are due.
    pub fn advance(&mut self, dt: f32) -> u32 {
        self.accumulator += dt.max(0.0);
        let mut steps = 0;
        while self.accumulator >= self.step && steps < MAX_STEPS_PER_FRAME {
            self.accumulator -= self.step;
            steps += 1;
        }
        if steps == MAX_STEPS_PER_FRAME {
            self.accumulator = self.accumulator.min(self.step);
        }
        steps
    }
}
