//! # Replication Tests
//!
//! Delta-correction convergence and idle snapping on a remote avatar.
//!
//! Run with: cargo test -p horus_networking --test replication_test

use horus_networking::{EntitySnapshot, MovementTuning, ReplicatedEntity, VectorInterpolator};
use horus_shared::{PeerId, Vec3};

const SEND_RATE: f32 = 15.0;
const FRAME: f32 = 1.0 / 60.0;
const TOLERANCE: f32 = 1e-3;

fn snapshot(owner: &mut ReplicatedEntity, position: Vec3) -> EntitySnapshot {
    owner.position = position;
    owner.take_snapshot()
}

#[test]
fn corrections_sum_to_the_delta_within_one_send_interval() {
    let delta = Vec3::new(3.0, 0.0, -1.5);
    let mut interpolator = VectorInterpolator::new(SEND_RATE);
    assert!(interpolator.start(delta));

    let mut applied = Vec3::ZERO;
    let mut elapsed = 0.0;
    while elapsed < 1.0 / SEND_RATE + FRAME {
        applied += interpolator.update(FRAME);
        elapsed += FRAME;
    }
    assert!(applied.almost_equals(delta, TOLERANCE), "applied {applied:?}");
    assert!(!interpolator.is_running());

    // nothing left at T + 2/send_rate
    let mut late = Vec3::ZERO;
    while elapsed < 2.0 / SEND_RATE {
        late += interpolator.update(FRAME);
        elapsed += FRAME;
    }
    assert_eq!(late, Vec3::ZERO);
}

#[test]
fn uneven_frames_still_converge_exactly() {
    let delta = Vec3::new(0.0, 0.0, 10.0);
    let mut interpolator = VectorInterpolator::new(SEND_RATE);
    interpolator.start(delta);

    let mut applied = Vec3::ZERO;
    for dt in [0.013, 0.041, 0.002, 0.05, 0.05] {
        applied += interpolator.update(dt);
    }
    assert!(applied.almost_equals(delta, TOLERANCE));
}

#[test]
fn remote_avatar_converges_on_the_owner() {
    let tuning = MovementTuning::default();
    let mut owner = ReplicatedEntity::new(PeerId(1), Vec3::ZERO, SEND_RATE);
    let mut remote = ReplicatedEntity::new(PeerId(1), Vec3::ZERO, SEND_RATE);

    let target = Vec3::new(4.0, 0.0, 2.0);
    remote.receive_snapshot(&snapshot(&mut owner, target));
    assert!(remote.is_correcting());
    assert_eq!(remote.position, Vec3::ZERO);

    for _ in 0..8 {
        remote.advance_remote(&tuning, FRAME);
    }
    assert!(remote.position.almost_equals(target, TOLERANCE), "at {:?}", remote.position);
    assert!(!remote.is_correcting());
}

#[test]
fn idle_owner_snaps_without_interpolation() {
    let mut owner = ReplicatedEntity::new(PeerId(1), Vec3::ZERO, SEND_RATE);
    let mut remote = ReplicatedEntity::new(PeerId(1), Vec3::ZERO, SEND_RATE);

    let resting = Vec3::new(5.0, 0.0, 5.0);
    remote.receive_snapshot(&snapshot(&mut owner, resting));
    assert!(remote.is_correcting());

    // same position again: the owner is idle
    remote.receive_snapshot(&snapshot(&mut owner, resting));
    assert!(!remote.is_correcting());
    assert_eq!(remote.position, resting);
}

#[test]
fn tiny_deltas_snap_immediately() {
    let mut owner = ReplicatedEntity::new(PeerId(1), Vec3::ZERO, SEND_RATE);
    let mut remote = ReplicatedEntity::new(PeerId(1), Vec3::ZERO, SEND_RATE);

    let nudge = Vec3::new(0.001, 0.0, 0.0);
    remote.receive_snapshot(&snapshot(&mut owner, nudge));
    assert!(!remote.is_correcting());
    assert_eq!(remote.position, nudge);
}
