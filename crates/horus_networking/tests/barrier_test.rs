//! # Rendezvous Barrier Tests
//!
//! Completion must fire exactly once, and only when every tracked peer has
//! either acknowledged or left.
//!
//! Run with: cargo test -p horus_networking --test barrier_test

use horus_networking::{NetworkSync, SyncError};
use horus_shared::PeerId;

const A: PeerId = PeerId(1);
const B: PeerId = PeerId(2);
const C: PeerId = PeerId(3);

#[test]
fn completion_fires_once_after_every_ack() {
    // every order of acks, completion registered last
    let orders = [[A, B, C], [A, C, B], [B, A, C], [B, C, A], [C, A, B], [C, B, A]];
    for order in orders {
        let mut sync: NetworkSync<&str> = NetworkSync::new(true);
        sync.create_barrier("RegisterPlayer", [A, B, C]).unwrap();
        for peer in order {
            assert_eq!(sync.acknowledge("RegisterPlayer", peer).unwrap(), None);
        }
        assert_eq!(sync.register_completion("RegisterPlayer", "start").unwrap(), Some("start"));

        // gone after completion: nothing can fire it again
        assert!(!sync.is_open("RegisterPlayer"));
        assert!(sync.acknowledge("RegisterPlayer", A).is_err());
    }
}

#[test]
fn completion_waits_for_the_last_tracked_peer() {
    let mut sync = NetworkSync::new(true);
    sync.create_barrier("RegisterPlayer", [A, B]).unwrap();
    assert_eq!(sync.register_completion("RegisterPlayer", 7).unwrap(), None);
    assert_eq!(sync.acknowledge("RegisterPlayer", A).unwrap(), None);
    // a repeated ack changes nothing
    assert_eq!(sync.acknowledge("RegisterPlayer", A).unwrap(), None);
    assert_eq!(sync.waiting_on("RegisterPlayer"), vec![B]);
    assert_eq!(sync.acknowledge("RegisterPlayer", B).unwrap(), Some(7));
}

#[test]
fn late_joiner_ack_is_ignored() {
    let mut sync = NetworkSync::new(true);
    sync.create_barrier("RegisterPlayer", [A]).unwrap();
    sync.register_completion("RegisterPlayer", ()).unwrap();
    assert_eq!(sync.acknowledge("RegisterPlayer", C).unwrap(), None);
    assert!(sync.is_open("RegisterPlayer"));
    assert_eq!(sync.acknowledge("RegisterPlayer", A).unwrap(), Some(()));
}

#[test]
fn departure_of_the_missing_peer_satisfies_the_barrier() {
    let mut sync = NetworkSync::new(true);
    sync.create_barrier("RegisterPlayer", [A, B]).unwrap();
    sync.acknowledge("RegisterPlayer", A).unwrap();

    // B leaves before acknowledging; no completion registered yet
    assert!(sync.remove_peer(B).is_empty());
    assert_eq!(sync.register_completion("RegisterPlayer", "start").unwrap(), Some("start"));
}

#[test]
fn departure_completes_a_waiting_barrier() {
    let mut sync = NetworkSync::new(true);
    sync.create_barrier("RegisterPlayer", [A, B]).unwrap();
    sync.register_completion("RegisterPlayer", "start").unwrap();
    sync.acknowledge("RegisterPlayer", A).unwrap();

    let fired = sync.remove_peer(B);
    assert_eq!(fired, vec![("RegisterPlayer".to_owned(), "start")]);
    assert!(sync.is_empty());
}

#[test]
fn logic_errors_leave_state_untouched() {
    let mut client: NetworkSync<()> = NetworkSync::new(false);
    assert_eq!(
        client.create_barrier("RegisterPlayer", [A]),
        Err(SyncError::NotAuthoritative("RegisterPlayer".to_owned()))
    );
    assert!(client.is_empty());

    let mut host: NetworkSync<()> = NetworkSync::new(true);
    host.create_barrier("RegisterPlayer", [A]).unwrap();
    assert_eq!(
        host.create_barrier("RegisterPlayer", [B]),
        Err(SyncError::AlreadyExists("RegisterPlayer".to_owned()))
    );
    assert_eq!(host.waiting_on("RegisterPlayer"), vec![A]);
    assert_eq!(
        host.acknowledge("Unknown", A),
        Err(SyncError::UnknownBarrier("Unknown".to_owned()))
    );
}
