//! # Lobby Tests
//!
//! Whole sessions on the in-process exchange: hosts listing themselves,
//! clients finding them, failures and teardown.
//!
//! Run with: cargo test -p horus --test lobby_test

use std::collections::BTreeSet;
use std::time::Duration;

use horus::directory::{DirectoryFuture, DirectoryListing, DirectoryService, HostRecord, HostUpdate, InMemoryDirectory};
use horus::nat::{DisabledPortMapper, MemoryGateway, PortMapper, Protocol};
use horus::{HostingState, MemoryBackend, Session, SessionConfig, SessionEvent};
use horus_shared::BUILD_VERSION;

type Lobby = Session<MemoryBackend>;

const FRAME: f32 = 1.0 / 60.0;

fn config(lan: bool) -> SessionConfig {
    let mut config = SessionConfig::default();
    config.seed = Some(11);
    config.directory.lan_mode = lan;
    config.directory.refresh_secs = 0.1;
    config.jobs.shutdown_grace_secs = 1;
    config.round.initial_level = Some(config.round.levels[0].clone());
    config
}

fn lobby(
    name: &str,
    config: SessionConfig,
    backend: MemoryBackend,
    directory: impl DirectoryService + 'static,
    mapper: impl PortMapper + 'static,
) -> Lobby {
    Session::new(config, name, backend, Box::new(directory), Box::new(mapper)).unwrap()
}

/// Updates every session once per frame until `done` holds.
fn pump(sessions: &mut [&mut Lobby], done: impl Fn(&[&mut Lobby]) -> bool) -> bool {
    for _ in 0..2000 {
        for session in sessions.iter_mut() {
            session.update(FRAME);
        }
        if done(sessions) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    false
}

fn notices(session: &mut Lobby) -> Vec<String> {
    session
        .drain_events()
        .into_iter()
        .filter_map(|event| match event {
            SessionEvent::Notice(text) => Some(text),
            _ => None,
        })
        .collect()
}

/// A host on machine `alpha`, already listed (or open, in LAN mode).
fn running_host(exchange: &MemoryBackend, directory: &InMemoryDirectory, gateway: &MemoryGateway, lan: bool) -> Lobby {
    let mut host = lobby(
        "host",
        config(lan),
        exchange.machine("alpha"),
        directory.clone(),
        gateway.clone(),
    );
    assert!(pump(&mut [&mut host], |s| s[0].state() == HostingState::AwaitingInput));
    host.host().unwrap();
    assert!(pump(&mut [&mut host], |s| {
        s[0].state() == HostingState::Hosting && (lan || s[0].token().is_some())
    }));
    host
}

#[test]
fn host_lists_itself_and_a_client_joins_it() {
    let exchange = MemoryBackend::new("lan");
    let directory = InMemoryDirectory::new();
    let gateway = MemoryGateway::new();
    let mut host = running_host(&exchange, &directory, &gateway, false);

    // both protocols forwarded, one listing with the host's own player
    assert_eq!(gateway.installed().len(), 2);
    let token = host.token().unwrap().to_owned();
    let record = directory.record(&token).unwrap();
    assert_eq!(record.guid, "alpha:31414");
    assert_eq!(record.version, BUILD_VERSION);
    assert_eq!(record.current_players, 1);
    assert_eq!(record.max_players, 6);

    let mut client = lobby("client", config(false), exchange.machine("beta"), directory.clone(), DisabledPortMapper);
    assert!(pump(&mut [&mut host, &mut client], |s| s[1].state() == HostingState::AwaitingInput));
    assert_eq!(client.status(), "Server activity : 1 players in 1 games");

    client.join().unwrap();
    assert!(pump(&mut [&mut host, &mut client], |s| s[1].state() == HostingState::Connected));
    assert!(pump(&mut [&mut host, &mut client], |_| {
        directory.record(&token).is_some_and(|r| r.current_players == 2)
    }));
    assert!(directory.updates(&token) >= 1);

    client.leave().unwrap();
    assert!(pump(&mut [&mut host, &mut client], |_| {
        directory.record(&token).is_some_and(|r| r.current_players == 1)
    }));

    host.shutdown();
    assert_eq!(host.state(), HostingState::Startup);
    assert!(directory.records().is_empty());
    assert!(gateway.installed().is_empty());
}

#[test]
fn unreachable_host_is_blacklisted_and_the_next_one_is_tried() {
    let exchange = MemoryBackend::new("lan");
    let directory = InMemoryDirectory::new();
    let mut host = running_host(&exchange, &directory, &MemoryGateway::new(), false);

    // emptier than the real host, so it is tried first
    directory.insert(HostRecord {
        guid: "ghost:31414".into(),
        map: "pi_rah".into(),
        version: BUILD_VERSION.into(),
        current_players: 0,
        max_players: 6,
    });

    let mut client = lobby("client", config(false), exchange.machine("beta"), directory.clone(), DisabledPortMapper);
    assert!(pump(&mut [&mut host, &mut client], |s| s[1].state() == HostingState::AwaitingInput));
    client.join().unwrap();
    assert!(pump(&mut [&mut host, &mut client], |s| s[1].state() == HostingState::Connected));

    let expected: BTreeSet<String> = ["ghost:31414".to_owned()].into();
    assert_eq!(client.blacklist(), &expected);
    host.shutdown();
}

#[test]
fn lan_sessions_connect_by_address() {
    let exchange = MemoryBackend::new("lan");
    let directory = InMemoryDirectory::new();
    let mut host = running_host(&exchange, &directory, &MemoryGateway::new(), true);
    assert!(host.token().is_none());
    assert!(host.port_mappings().is_empty());

    let mut client = lobby("client", config(true), exchange.machine("beta"), directory.clone(), DisabledPortMapper);
    client.update(FRAME);
    assert_eq!(client.status(), "Lan Mode - Master server is disabled");
    client.submit("/connect alpha:31414");
    assert!(pump(&mut [&mut host, &mut client], |s| s[1].state() == HostingState::Connected));
    assert!(directory.records().is_empty());
}

#[test]
fn lost_host_sends_the_client_back_to_the_lobby() {
    let exchange = MemoryBackend::new("lan");
    let mut host = running_host(&exchange, &InMemoryDirectory::new(), &MemoryGateway::new(), true);
    let mut client = lobby("client", config(true), exchange.machine("beta"), InMemoryDirectory::new(), DisabledPortMapper);
    client.update(FRAME);
    client.connect("alpha:31414").unwrap();
    assert!(pump(&mut [&mut host, &mut client], |s| s[1].state() == HostingState::Connected));
    client.drain_events();

    host.shutdown();
    assert!(pump(&mut [&mut client], |s| s[0].state() == HostingState::AwaitingInput));
    assert!(client.node().is_none());
    assert!(notices(&mut client).contains(&"Lost connection to the server.".to_owned()));
}

#[test]
fn commands_reach_the_node() {
    let exchange = MemoryBackend::new("lan");
    let mut host = running_host(&exchange, &InMemoryDirectory::new(), &MemoryGateway::new(), true);
    let mut client = lobby("client", config(true), exchange.machine("beta"), InMemoryDirectory::new(), DisabledPortMapper);
    client.update(FRAME);
    client.connect("alpha:31414").unwrap();
    assert!(pump(&mut [&mut host, &mut client], |s| s[1].state() == HostingState::Connected));
    host.drain_events();
    client.drain_events();

    client.submit("/map pi_mar");
    assert_eq!(notices(&mut client), vec!["Map change is only allowed on server.".to_owned()]);

    let levels = host.config().round.levels.clone();
    host.submit("/map nowhere");
    assert_eq!(
        notices(&mut host),
        vec![format!("Level nowhere does not exist. [{}]", levels.join(", "))]
    );
    host.submit(&format!("/map {}", levels[0]));
    assert_eq!(notices(&mut host), vec![format!("You're already in {}, dummy.", levels[0])]);

    client.submit("/spectate");
    client.submit("/spectate");
    assert_eq!(notices(&mut client), vec!["Already spectating!".to_owned()]);
    client.submit("/join");
    client.submit("/join");
    assert_eq!(notices(&mut client), vec!["Already in-game!".to_owned()]);

    client.submit("/dance");
    assert_eq!(notices(&mut client), vec!["/dance command not recognized.".to_owned()]);

    client.submit("/quit");
    assert!(client.quit_requested());
    assert!(client.drain_events().contains(&SessionEvent::QuitRequested));
    host.shutdown();
}

#[test]
fn refused_mapping_still_hosts_and_cleans_up() {
    let exchange = MemoryBackend::new("lan");
    let directory = InMemoryDirectory::new();
    let gateway = MemoryGateway::new();
    gateway.refuse(Protocol::Tcp);
    let mut host = running_host(&exchange, &directory, &gateway, false);

    assert_eq!(host.port_mappings().len(), 1);
    assert_eq!(host.port_mappings()[0].protocol, Protocol::Udp);
    host.shutdown();
    assert!(gateway.installed().is_empty());
    assert!(host.port_mappings().is_empty());
}

#[test]
fn host_lists_itself_once_the_directory_comes_back() {
    let exchange = MemoryBackend::new("lan");
    let directory = InMemoryDirectory::new();
    directory.set_online(false);
    let mut host = lobby("host", config(false), exchange.machine("alpha"), directory.clone(), DisabledPortMapper);
    assert!(pump(&mut [&mut host], |s| s[0].state() == HostingState::AwaitingInput));
    assert_eq!(host.status(), "The master server is down");

    host.host().unwrap();
    assert!(pump(&mut [&mut host], |s| s[0].state() == HostingState::Hosting));
    assert!(pump(&mut [&mut host], |s| s[0].directory_down()));
    assert!(host.token().is_none());

    directory.set_online(true);
    assert!(pump(&mut [&mut host], |s| s[0].token().is_some()));
    assert_eq!(directory.records().len(), 1);
    host.shutdown();
    assert!(directory.records().is_empty());
}

/// Directory whose host list takes a while to arrive.
struct SlowDirectory {
    inner: InMemoryDirectory,
    delay: Duration,
}

impl DirectoryService for SlowDirectory {
    fn list(&self, version: &str) -> DirectoryFuture<DirectoryListing> {
        let delay = self.delay;
        let listing = self.inner.list(version);
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            listing.await
        })
    }

    fn add(&self, record: HostRecord) -> DirectoryFuture<String> {
        self.inner.add(record)
    }

    fn update(&self, update: HostUpdate) -> DirectoryFuture<()> {
        self.inner.update(update)
    }

    fn delete(&self, token: String) -> DirectoryFuture<()> {
        self.inner.delete(token)
    }
}

#[test]
fn late_host_list_does_not_pull_a_connected_client_back() {
    let exchange = MemoryBackend::new("lan");
    let mut host = running_host(&exchange, &InMemoryDirectory::new(), &MemoryGateway::new(), true);

    let slow = SlowDirectory {
        inner: InMemoryDirectory::new(),
        delay: Duration::from_millis(150),
    };
    let mut client = lobby("client", config(false), exchange.machine("beta"), slow, DisabledPortMapper);
    client.update(FRAME);
    assert_eq!(client.state(), HostingState::QueryingDirectory);

    client.connect("alpha:31414").unwrap();
    assert!(pump(&mut [&mut host, &mut client], |s| s[1].state() == HostingState::Connected));
    for _ in 0..30 {
        host.update(FRAME);
        client.update(FRAME);
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(client.state(), HostingState::Connected);
    assert!(client.listing().is_none());
    host.shutdown();
}
