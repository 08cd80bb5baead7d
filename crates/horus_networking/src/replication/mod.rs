//! # Entity State Replication
//!
//! Owner-authoritative replication of player avatars.
//!
//! ## Flow
//!
//! ```text
//! OWNER                                       OTHER PEERS
//! MovementModel::step (every sim tick)
//!        │
//!        ▼ every 1/send_rate s
//! take_snapshot() ── State channel ──▶ receive_snapshot()
//!  (one-shot flags reset)                  │ delta = received - local
//!                                          ▼
//!                                   VectorInterpolator
//!                                          │
//!                                   advance_remote(dt)
//!                                   (dead reckoning + correction)
//! ```
//!
//! The owner never waits on the network for its own avatar. Receivers
//! never snap to a snapshot unless the sender is idle or the delta is
//! negligible.

mod interpolation;
mod movement;

pub use interpolation::{VectorInterpolator, CONVERGED_EPSILON};
pub use movement::{MovementInput, MovementModel, MovementTuning};

use bytemuck::{Pod, Zeroable};
use horus_shared::{PeerId, Vec3};

use crate::error::{NetError, NetResult};
use crate::protocol::{ByteReader, ByteWriter};

/// Remote look yaw moves this fraction towards the target per frame.
const YAW_SMOOTHING: f32 = 0.4;

/// Animation tag of an avatar.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum AnimState {
    /// Standing still.
    #[default]
    Idle = 0,
    /// Running on the ground.
    Run = 1,
    /// Jumping or dashing.
    Jump = 2,
}

impl AnimState {
    /// Decodes a wire value; unknown values read as idle.
    #[must_use]
    pub const fn from_u32(value: u32) -> Self {
        match value {
            1 => Self::Run,
            2 => Self::Jump,
            _ => Self::Idle,
        }
    }
}

/// Edge-triggered effect flags carried by one snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct EffectFlags(u32);

impl EffectFlags {
    /// No effect.
    pub const NONE: Self = Self(0);
    /// The owner jumped.
    pub const JUMPED: Self = Self(1);
    /// The owner dashed.
    pub const DASHED: Self = Self(1 << 1);
    /// The owner reloaded.
    pub const RELOADED: Self = Self(1 << 2);

    /// Raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Builds from raw bits, keeping known flags only.
    #[must_use]
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & 0b111)
    }

    /// True if every flag of `other` is set.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if no flag is set.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Sets every flag of `other`.
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

/// Wire record of one avatar, sent on the state channel.
///
/// Layout is fixed (`repr(C)`, 56 bytes) so it can be copied straight into
/// a datagram.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct EntitySnapshot {
    /// Owning peer.
    pub owner: u32,
    /// [`EffectFlags`] bits.
    pub flags: u32,
    /// Position.
    pub position: Vec3,
    /// Input velocity.
    pub input_velocity: Vec3,
    /// Falling (gravity, jump and dash) velocity.
    pub falling_velocity: Vec3,
    /// Look yaw in degrees.
    pub yaw: f32,
    /// Look pitch in degrees.
    pub pitch: f32,
    /// [`AnimState`] value.
    pub anim: u32,
}

impl EntitySnapshot {
    /// Encoded size.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Owning peer.
    #[inline]
    #[must_use]
    pub const fn owner(&self) -> PeerId {
        PeerId(self.owner)
    }

    /// Encodes the snapshot.
    ///
    /// # Errors
    ///
    /// Never in practice; the record is far below the datagram limit.
    pub fn encode(&self) -> NetResult<Vec<u8>> {
        let mut w = ByteWriter::new();
        w.write_pod(self);
        w.finish()
    }

    /// Decodes a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Malformed`] for a payload of the wrong size.
    pub fn decode(bytes: &[u8]) -> NetResult<Self> {
        if bytes.len() != Self::SIZE {
            return Err(NetError::Malformed { what: "entity snapshot" });
        }
        ByteReader::new(bytes)
            .read_pod()
            .ok_or(NetError::Malformed { what: "entity snapshot" })
    }
}

/// One networked avatar as seen by a peer.
#[derive(Clone, Debug)]
pub struct ReplicatedEntity {
    owner: PeerId,
    /// Current position.
    pub position: Vec3,
    /// Velocity from movement input.
    pub input_velocity: Vec3,
    /// Velocity from gravity, jumps and dashes.
    pub falling_velocity: Vec3,
    /// Look yaw in degrees (target yaw on remote peers).
    pub yaw: f32,
    /// Look pitch in degrees.
    pub pitch: f32,
    /// Animation tag.
    pub anim: AnimState,
    smooth_yaw: f32,
    flags: EffectFlags,
    last_network_position: Option<Vec3>,
    interpolator: VectorInterpolator,
}

impl ReplicatedEntity {
    /// Creates an avatar for `owner` at `position`.
    #[must_use]
    pub fn new(owner: PeerId, position: Vec3, send_rate: f32) -> Self {
        Self {
            owner,
            position,
            input_velocity: Vec3::ZERO,
            falling_velocity: Vec3::ZERO,
            yaw: 0.0,
            pitch: 0.0,
            anim: AnimState::Idle,
            smooth_yaw: 0.0,
            flags: EffectFlags::NONE,
            last_network_position: None,
            interpolator: VectorInterpolator::new(send_rate),
        }
    }

    /// Owning peer.
    #[inline]
    #[must_use]
    pub const fn owner(&self) -> PeerId {
        self.owner
    }

    /// One-shot flags raised since the last snapshot.
    #[inline]
    #[must_use]
    pub const fn flags(&self) -> EffectFlags {
        self.flags
    }

    /// Smoothed yaw for display on remote peers.
    #[inline]
    #[must_use]
    pub const fn display_yaw(&self) -> f32 {
        self.smooth_yaw
    }

    /// True while a correction is being bled in.
    #[inline]
    #[must_use]
    pub const fn is_correcting(&self) -> bool {
        self.interpolator.is_running()
    }

    /// Raises a one-shot flag; it rides the next snapshot only.
    pub fn raise(&mut self, flag: EffectFlags) {
        self.flags.insert(flag);
    }

    /// Moves the avatar to `position` at rest (spawn, respawn).
    pub fn teleport(&mut self, position: Vec3) {
        self.position = position;
        self.input_velocity = Vec3::ZERO;
        self.falling_velocity = Vec3::ZERO;
        self.last_network_position = None;
        self.interpolator.cancel();
    }

    /// Serializes the owner's state and clears the one-shot flags, whether
    /// or not the snapshot reaches anyone.
    #[must_use]
    pub fn take_snapshot(&mut self) -> EntitySnapshot {
        let flags = std::mem::take(&mut self.flags);
        EntitySnapshot {
            owner: self.owner.0,
            flags: flags.bits(),
            position: self.position,
            input_velocity: self.input_velocity,
            falling_velocity: self.falling_velocity,
            yaw: self.yaw,
            pitch: self.pitch,
            anim: self.anim as u32,
        }
    }

    /// Applies a snapshot from the owner. Returns the effects it carried.
    pub fn receive_snapshot(&mut self, snapshot: &EntitySnapshot) -> EffectFlags {
        let received = snapshot.position;
        self.input_velocity = snapshot.input_velocity;
        self.falling_velocity = snapshot.falling_velocity;
        self.yaw = snapshot.yaw;
        self.pitch = snapshot.pitch;
        self.anim = AnimState::from_u32(snapshot.anim);

        if self.last_network_position == Some(received) {
            // sender is idle
            self.position = received;
            self.interpolator.cancel();
        } else if !self.interpolator.start(received - self.position) {
            self.position = received;
        }
        self.last_network_position = Some(received);

        EffectFlags::from_bits_truncate(snapshot.flags)
    }

    /// Advances a remote avatar by `dt`: dead reckoning with the last
    /// received velocities plus the pending correction.
    pub fn advance_remote(&mut self, tuning: &MovementTuning, dt: f32) {
        tuning.coast(self, dt);
        self.position += self.interpolator.update(dt);
        self.smooth_yaw = lerp_angle(self.smooth_yaw, self.yaw, YAW_SMOOTHING);
    }
}

fn lerp_angle(from: f32, to: f32, t: f32) -> f32 {
    let delta = (to - from + 180.0).rem_euclid(360.0) - 180.0;
    from + delta * t
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_at(position: Vec3) -> EntitySnapshot {
        EntitySnapshot {
            owner: 1,
            position,
            ..EntitySnapshot::default()
        }
    }

    #[test]
    fn test_snapshot_layout() {
        assert_eq!(EntitySnapshot::SIZE, 56);
        let snap = snapshot_at(Vec3::new(1.0, 2.0, 3.0));
        let bytes = snap.encode().unwrap();
        assert_eq!(EntitySnapshot::decode(&bytes).unwrap(), snap);
        assert!(EntitySnapshot::decode(&bytes[1..]).is_err());
    }

    #[test]
    fn test_one_shot_flags_cleared_by_snapshot() {
        let mut entity = ReplicatedEntity::new(PeerId(1), Vec3::ZERO, 15.0);
        entity.raise(EffectFlags::RELOADED);
        let first = entity.take_snapshot();
        assert_eq!(first.flags, EffectFlags::RELOADED.bits());
        let second = entity.take_snapshot();
        assert_eq!(second.flags, 0);
    }

    #[test]
    fn test_receive_starts_correction() {
        let mut entity = ReplicatedEntity::new(PeerId(1), Vec3::ZERO, 15.0);
        entity.receive_snapshot(&snapshot_at(Vec3::new(2.0, 0.0, 0.0)));
        assert!(entity.is_correcting());
        assert_eq!(entity.position, Vec3::ZERO);
    }

    #[test]
    fn test_tiny_delta_snaps() {
        let mut entity = ReplicatedEntity::new(PeerId(1), Vec3::ZERO, 15.0);
        let target = Vec3::new(0.004, 0.0, 0.0);
        entity.receive_snapshot(&snapshot_at(target));
        assert!(!entity.is_correcting());
        assert_eq!(entity.position, target);
    }

    #[test]
    fn test_effects_surface_on_receive() {
        let mut owner = ReplicatedEntity::new(PeerId(1), Vec3::ZERO, 15.0);
        let mut remote = ReplicatedEntity::new(PeerId(1), Vec3::ZERO, 15.0);
        owner.raise(EffectFlags::DASHED);
        let effects = remote.receive_snapshot(&owner.take_snapshot());
        assert!(effects.contains(EffectFlags::DASHED));
        assert!(!effects.contains(EffectFlags::JUMPED));
    }

    #[test]
    fn test_lerp_angle_takes_short_way() {
        assert!((lerp_angle(350.0, 10.0, 0.5) - 360.0).abs() < 1e-4);
        assert!((lerp_angle(10.0, 350.0, 0.5) - 0.0).abs() < 1e-4);
    }
}
