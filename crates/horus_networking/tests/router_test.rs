//! # RPC Router Tests
//!
//! Buffered replay to late joiners and generation invalidation, exercised
//! with the real call table.
//!
//! Run with: cargo test -p horus_networking --test router_test

use horus_networking::{Persistence, Rpc, RpcRouter, Target};
use horus_shared::{PeerId, Vec3};

const A: PeerId = PeerId(1);
const B: PeerId = PeerId(2);
const C: PeerId = PeerId(3);

fn names(router: &mut RpcRouter<Rpc>, peer: PeerId) -> Vec<&'static str> {
    router.drain(peer).into_iter().map(|d| d.message.name()).collect()
}

fn spawn(peer: PeerId) -> Rpc {
    Rpc::SpawnAvatar {
        peer,
        position: Vec3::new(1.0, 0.0, 1.0),
    }
}

#[test]
fn buffered_calls_reach_late_joiners_transient_calls_do_not() {
    let mut router = RpcRouter::new();
    router.connect_peer(A);
    router.invoke(
        A,
        Rpc::RegisterPlayer {
            peer: A,
            username: "ana".into(),
            guid: "g-a".into(),
            color: Vec3::ZERO,
            spectating: false,
        },
        Target::AllPeers,
        Persistence::Buffered,
    );
    router.invoke(
        A,
        Rpc::LogChat {
            peer: A,
            text: "hello".into(),
            system: false,
            sourceless: false,
        },
        Target::AllPeers,
        Persistence::Transient,
    );

    assert_eq!(router.connect_peer(C), 1);
    assert_eq!(names(&mut router, C), vec!["RegisterPlayer"]);
    // the sender never receives its own call back
    assert!(router.drain(A).is_empty());
}

#[test]
fn replay_preserves_invocation_order() {
    let mut router = RpcRouter::new();
    router.invoke(PeerId::SERVER, Rpc::RestartRound, Target::AllPeers, Persistence::Buffered);
    router.invoke(A, spawn(A), Target::AllPeers, Persistence::LevelBuffered);
    router.invoke(PeerId::SERVER, Rpc::StopRound, Target::AllPeers, Persistence::Buffered);

    router.connect_peer(B);
    assert_eq!(names(&mut router, B), vec!["RestartRound", "SpawnAvatar", "StopRound"]);
}

#[test]
fn invalidated_generations_never_replay() {
    let mut router = RpcRouter::new();
    router.connect_peer(A);
    router.invoke(A, spawn(A), Target::AllPeers, Persistence::LevelBuffered);
    router.invoke(PeerId::SERVER, Rpc::StopRound, Target::AllPeers, Persistence::Buffered);

    router.set_generation(1);
    router.invoke(A, spawn(A), Target::AllPeers, Persistence::LevelBuffered);
    router.set_generation(2);
    router.invoke(A, spawn(A), Target::AllPeers, Persistence::LevelBuffered);

    // invalidating a later generation also removes the earlier ones
    assert_eq!(router.invalidate_generation(1), 2);
    router.connect_peer(B);
    let replayed: Vec<Rpc> = router.drain(B).into_iter().map(|d| d.message).collect();
    assert_eq!(replayed.len(), 2);
    assert_eq!(replayed[0], Rpc::StopRound);
    assert_eq!(replayed[1], spawn(A));
    assert_eq!(router.buffered()[1].scope, horus_networking::rpc::BufferScope::Generation(2));
}

#[test]
fn invalidation_purges_undelivered_copies() {
    let mut router = RpcRouter::new();
    router.connect_peer(B);
    router.invoke(A, spawn(A), Target::AllPeers, Persistence::LevelBuffered);
    router.invoke(A, Rpc::DespawnAvatar { peer: A }, Target::AllPeers, Persistence::Transient);
    assert_eq!(router.pending(B), 2);

    router.invalidate_generation(0);
    assert_eq!(names(&mut router, B), vec!["DespawnAvatar"]);
}

#[test]
fn calls_from_a_stale_generation_are_refused() {
    let mut router = RpcRouter::new();
    router.connect_peer(B);
    router.invalidate_generation(0);
    router.set_generation(1);

    assert!(router
        .invoke_in(0, A, spawn(A), Target::AllPeers, Persistence::LevelBuffered)
        .is_none());
    assert_eq!(router.buffered_len(), 0);
    assert_eq!(router.pending(B), 0);
}

#[test]
fn departed_peer_calls_are_forgotten() {
    let mut router = RpcRouter::new();
    router.connect_peer(A);
    router.invoke(A, spawn(A), Target::AllPeers, Persistence::LevelBuffered);
    router.invoke(B, spawn(B), Target::AllPeers, Persistence::LevelBuffered);

    router.disconnect_peer(A);
    assert_eq!(router.remove_buffered_from(A), 1);
    router.connect_peer(C);
    let replayed: Vec<Rpc> = router.drain(C).into_iter().map(|d| d.message).collect();
    assert_eq!(replayed, vec![spawn(B)]);
}
