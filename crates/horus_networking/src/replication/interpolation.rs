//! # Delta-Correction Interpolation
//!
//! A remote avatar never jumps to the position in a snapshot. The receiver
//! takes `delta = received - local` and bleeds it in over one network tick
//! (`1 / send_rate` seconds):
//!
//! ```text
//!   correction per frame = delta * (step / duration)
//!
//!   t=0           t=duration         t=2*duration
//!   |=============|------------------|
//!     Σ steps = delta    nothing applied
//! ```
//!
//! The last frame is clipped to the remaining time, so the corrections of
//! one run add up to exactly `delta`.

use horus_shared::Vec3;

/// Deltas shorter than this are treated as already converged.
pub const CONVERGED_EPSILON: f32 = horus_shared::constants::CONVERGENCE_EPSILON;

/// Bleeds a position delta in over one network tick.
#[derive(Clone, Debug)]
pub struct VectorInterpolator {
    duration: f32,
    delta: Vec3,
    elapsed: f32,
    running: bool,
}

impl VectorInterpolator {
    /// Creates an idle interpolator for a link sending `send_rate`
    /// snapshots per second.
    #[must_use]
    pub fn new(send_rate: f32) -> Self {
        Self {
            duration: 1.0 / send_rate.max(f32::EPSILON),
            delta: Vec3::ZERO,
            elapsed: 0.0,
            running: false,
        }
    }

    /// Starts bleeding in `delta`, replacing any run in progress.
    ///
    /// Returns false, and stays idle, when `delta` is below
    /// [`CONVERGED_EPSILON`]; the caller should snap instead.
    pub fn start(&mut self, delta: Vec3) -> bool {
        self.elapsed = 0.0;
        self.delta = delta;
        self.running = delta.length() >= CONVERGED_EPSILON;
        self.running
    }

    /// Advances by `dt` seconds and returns the correction to add to the
    /// local position this frame.
    pub fn update(&mut self, dt: f32) -> Vec3 {
        if !self.running || dt <= 0.0 {
            return Vec3::ZERO;
        }
        let step = dt.min(self.duration - self.elapsed);
        self.elapsed += step;
        if self.elapsed >= self.duration {
            self.running = false;
        }
        self.delta * (step / self.duration)
    }

    /// Drops the run in progress.
    pub fn cancel(&mut self) {
        self.running = false;
        self.delta = Vec3::ZERO;
    }

    /// True while a correction is being applied.
    #[inline]
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// Delta of the current (or last) run.
    #[inline]
    #[must_use]
    pub const fn delta(&self) -> Vec3 {
        self.delta
    }

    /// Length of one run in seconds.
    #[inline]
    #[must_use]
    pub const fn duration(&self) -> f32 {
        self.duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_delta_does_not_start() {
        let mut interp = VectorInterpolator::new(15.0);
        assert!(!interp.start(Vec3::new(0.005, 0.0, 0.0)));
        assert_eq!(interp.update(0.1), Vec3::ZERO);
    }

    #[test]
    fn test_run_sums_to_delta() {
        let mut interp = VectorInterpolator::new(10.0);
        let delta = Vec3::new(3.0, -1.0, 2.0);
        assert!(interp.start(delta));

        let mut total = Vec3::ZERO;
        for _ in 0..7 {
            total += interp.update(0.016);
        }
        assert!(!interp.is_running());
        assert!(total.almost_equals(delta, 1e-4));
    }

    #[test]
    fn test_restart_replaces_run() {
        let mut interp = VectorInterpolator::new(10.0);
        interp.start(Vec3::new(1.0, 0.0, 0.0));
        interp.update(0.05);
        interp.start(Vec3::new(0.0, 2.0, 0.0));
        let mut total = Vec3::ZERO;
        for _ in 0..4 {
            total += interp.update(0.05);
        }
        assert!(total.almost_equals(Vec3::new(0.0, 2.0, 0.0), 1e-4));
    }

    #[test]
    fn test_cancel() {
        let mut interp = VectorInterpolator::new(10.0);
        interp.start(Vec3::new(1.0, 0.0, 0.0));
        interp.cancel();
        assert!(!interp.is_running());
        assert_eq!(interp.update(0.05), Vec3::ZERO);
    }
}
