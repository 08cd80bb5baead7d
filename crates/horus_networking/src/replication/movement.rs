//! # Owner-Side Movement
//!
//! Kinematic controller for the locally owned avatar. Runs every simulation
//! step with no network round trip; other peers only ever see the result
//! through snapshots.
//!
//! Features:
//! - Ground running at a fixed speed
//! - Jump input queued for a short window, with a grace period after
//!   leaving the ground
//! - Air dash on a cooldown when a jump is not possible
//! - Gravity and exponential air damping
//!
//! The world is a flat floor at `y = 0`; level geometry belongs to the
//! front end.

use horus_shared::Vec3;

use super::{AnimState, EffectFlags, ReplicatedEntity};

/// Seconds after leaving the ground during which a jump is still accepted.
const COYOTE_TIME: f32 = 0.25;

/// Input speed below which a grounded avatar plays the idle animation.
const IDLE_THRESHOLD: f32 = 0.1;

/// Releasing jump caps the rising speed at this value.
const JUMP_RELEASE_CAP: f32 = 2.0;

/// Movement tunables.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MovementTuning {
    /// Ground speed (units per second).
    pub speed: f32,
    /// Gravity (negative is down).
    pub gravity: f32,
    /// Initial jump velocity.
    pub jump_velocity: f32,
    /// Seconds between dashes.
    pub dash_cooldown: f32,
    /// Dash impulse along the input direction.
    pub dash_forward: f32,
    /// Dash impulse upward.
    pub dash_upward: f32,
    /// Fraction of horizontal air speed left after one second.
    pub air_damping: f32,
    /// Seconds a jump press stays queued.
    pub jump_queue: f32,
}

impl Default for MovementTuning {
    fn default() -> Self {
        Self {
            speed: 10.0,
            gravity: -100.0,
            jump_velocity: 65.0,
            dash_cooldown: 1.0,
            dash_forward: 70.0,
            dash_upward: 30.0,
            air_damping: 0.05,
            jump_queue: 0.2,
        }
    }
}

impl MovementTuning {
    /// Applies gravity, damping and velocity to `entity` without reading
    /// any input. Remote avatars dead-reckon with this between snapshots.
    ///
    /// Returns true if the avatar ends the step on the ground.
    pub fn coast(&self, entity: &mut ReplicatedEntity, dt: f32) -> bool {
        let grounded = is_grounded(entity);
        self.apply_forces(entity, grounded, dt);
        integrate(entity, dt)
    }

    fn apply_forces(&self, entity: &mut ReplicatedEntity, grounded: bool, dt: f32) {
        if grounded {
            if entity.falling_velocity.y <= 0.0 {
                entity.falling_velocity = Vec3::UP * (self.gravity * dt);
            }
        } else {
            let damping = self.air_damping.powf(dt);
            entity.falling_velocity.y += self.gravity * dt;
            entity.falling_velocity.x *= damping;
            entity.falling_velocity.z *= damping;
        }
    }
}

/// One frame of player input.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MovementInput {
    /// Sideways axis, -1..1.
    pub strafe: f32,
    /// Forward axis, -1..1.
    pub thrust: f32,
    /// Look yaw in degrees.
    pub yaw: f32,
    /// Look pitch in degrees.
    pub pitch: f32,
    /// Jump went down this frame.
    pub jump_pressed: bool,
    /// Jump is held.
    pub jump_held: bool,
}

impl MovementInput {
    /// World-space input velocity at `speed`.
    #[must_use]
    pub fn velocity(&self, speed: f32) -> Vec3 {
        let (sin, cos) = self.yaw.to_radians().sin_cos();
        let forward = Vec3::new(sin, 0.0, cos);
        let right = Vec3::new(cos, 0.0, -sin);
        (right * self.strafe + forward * self.thrust).clamp_length(1.0) * speed
    }
}

/// Owner-side controller state.
#[derive(Clone, Debug)]
pub struct MovementModel {
    tuning: MovementTuning,
    clock: f32,
    last_jump_input: Option<f32>,
    dash_cooldown: f32,
    since_not_grounded: f32,
    grounded: bool,
}

impl MovementModel {
    /// Creates a controller with the given tunables.
    #[must_use]
    pub const fn new(tuning: MovementTuning) -> Self {
        Self {
            tuning,
            clock: 0.0,
            last_jump_input: None,
            dash_cooldown: 0.0,
            since_not_grounded: 0.0,
            grounded: true,
        }
    }

    /// Tunables in use.
    #[must_use]
    pub const fn tuning(&self) -> &MovementTuning {
        &self.tuning
    }

    /// True if the last step ended on the ground.
    #[must_use]
    pub const fn is_grounded(&self) -> bool {
        self.grounded
    }

    /// Forgets queued input and cooldowns (respawn).
    pub fn reset(&mut self) {
        self.last_jump_input = None;
        self.dash_cooldown = 0.0;
        self.since_not_grounded = 0.0;
        self.grounded = true;
    }

    /// Runs one simulation step of the owned `entity`.
    pub fn step(&mut self, entity: &mut ReplicatedEntity, input: &MovementInput, dt: f32) {
        self.clock += dt;
        self.dash_cooldown -= dt;

        entity.input_velocity = input.velocity(self.tuning.speed);
        entity.yaw = input.yaw;
        entity.pitch = input.pitch;

        if input.jump_pressed {
            self.last_jump_input = Some(self.clock);
        }
        if !input.jump_held && entity.falling_velocity.y > JUMP_RELEASE_CAP {
            entity.falling_velocity.y = JUMP_RELEASE_CAP;
        }

        let queued = self
            .last_jump_input
            .is_some_and(|at| self.clock - at <= self.tuning.jump_queue);
        let mut just_jumped = false;
        if queued {
            if self.grounded || self.since_not_grounded < COYOTE_TIME {
                self.last_jump_input = None;
                just_jumped = true;
                self.since_not_grounded = COYOTE_TIME;
                entity.falling_velocity.y = self.tuning.jump_velocity;
                entity.anim = AnimState::Jump;
                entity.raise(EffectFlags::JUMPED);
            } else if self.dash_cooldown <= 0.0 {
                self.last_jump_input = None;
                self.dash_cooldown = self.tuning.dash_cooldown;
                let mut direction = entity.input_velocity.normalize_or_zero();
                if direction == Vec3::ZERO {
                    direction = Vec3::UP * 0.4;
                }
                entity.falling_velocity +=
                    direction * self.tuning.dash_forward + Vec3::UP * self.tuning.dash_upward;
                entity.anim = AnimState::Jump;
                entity.raise(EffectFlags::DASHED);
            }
        }

        let grounded = self.grounded && !just_jumped;
        if grounded {
            self.since_not_grounded = 0.0;
        } else if !just_jumped {
            self.since_not_grounded += dt;
        }
        self.tuning.apply_forces(entity, grounded, dt);

        if grounded {
            entity.anim = if entity.input_velocity.length() < IDLE_THRESHOLD {
                AnimState::Idle
            } else {
                AnimState::Run
            };
        }

        self.grounded = integrate(entity, dt);
    }
}

impl Default for MovementModel {
    fn default() -> Self {
        Self::new(MovementTuning::default())
    }
}

fn is_grounded(entity: &ReplicatedEntity) -> bool {
    entity.position.y <= 0.0 && entity.falling_velocity.y <= 0.0
}

/// Moves the entity and resolves the floor. Returns grounded.
fn integrate(entity: &mut ReplicatedEntity, dt: f32) -> bool {
    entity.position += (entity.falling_velocity + entity.input_velocity) * dt;
    if entity.position.y <= 0.0 {
        entity.position.y = 0.0;
        if entity.falling_velocity.y < 0.0 {
            entity.falling_velocity.y = 0.0;
        }
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use horus_shared::PeerId;

    const DT: f32 = 1.0 / 60.0;

    fn avatar() -> ReplicatedEntity {
        ReplicatedEntity::new(PeerId(1), Vec3::ZERO, 15.0)
    }

    #[test]
    fn test_run_forward() {
        let mut model = MovementModel::default();
        let mut entity = avatar();
        let input = MovementInput {
            thrust: 1.0,
            ..MovementInput::default()
        };
        for _ in 0..60 {
            model.step(&mut entity, &input, DT);
        }
        assert!((entity.position.z - 10.0).abs() < 0.01);
        assert_eq!(entity.position.y, 0.0);
        assert_eq!(entity.anim, AnimState::Run);
    }

    #[test]
    fn test_diagonal_input_is_clamped() {
        let input = MovementInput {
            strafe: 1.0,
            thrust: 1.0,
            ..MovementInput::default()
        };
        assert!((input.velocity(10.0).length() - 10.0).abs() < 1e-4);
    }

    #[test]
    fn test_jump_raises_flag_and_lands() {
        let mut model = MovementModel::default();
        let mut entity = avatar();
        let press = MovementInput {
            jump_pressed: true,
            jump_held: true,
            ..MovementInput::default()
        };
        model.step(&mut entity, &press, DT);
        assert!(entity.position.y > 0.0);
        assert!(entity.flags().contains(EffectFlags::JUMPED));
        assert!(!model.is_grounded());

        let hold = MovementInput {
            jump_held: true,
            ..MovementInput::default()
        };
        for _ in 0..120 {
            model.step(&mut entity, &hold, DT);
        }
        assert!(model.is_grounded());
        assert_eq!(entity.position.y, 0.0);
    }

    #[test]
    fn test_second_press_in_air_dashes_once() {
        let mut model = MovementModel::default();
        let mut entity = avatar();
        let press = MovementInput {
            jump_pressed: true,
            jump_held: true,
            ..MovementInput::default()
        };
        let hold = MovementInput {
            jump_held: true,
            ..MovementInput::default()
        };
        model.step(&mut entity, &press, DT);
        for _ in 0..20 {
            model.step(&mut entity, &hold, DT);
        }
        let _ = entity.take_snapshot();

        model.step(&mut entity, &press, DT);
        assert!(entity.flags().contains(EffectFlags::DASHED));
        let _ = entity.take_snapshot();

        // cooldown blocks an immediate second dash
        model.step(&mut entity, &press, DT);
        assert!(!entity.flags().contains(EffectFlags::DASHED));
    }

    #[test]
    fn test_coast_falls_to_floor() {
        let tuning = MovementTuning::default();
        let mut entity = ReplicatedEntity::new(PeerId(2), Vec3::new(0.0, 5.0, 0.0), 15.0);
        let mut grounded = false;
        for _ in 0..120 {
            grounded = tuning.coast(&mut entity, DT);
        }
        assert!(grounded);
        assert_eq!(entity.position.y, 0.0);
    }
}
