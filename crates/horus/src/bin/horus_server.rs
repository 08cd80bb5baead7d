//! # Horus Dedicated Server
//!
//! Headless host without a local player. Lists itself in the directory,
//! maps the game port where it can and rotates levels until stopped.
//!
//! ## Usage
//!
//! ```bash
//! horus_server --config server.toml --port 31414 --duration 600
//! RUST_LOG=horus=debug horus_server --lan
//! ```

use std::path::PathBuf;
use std::time::Instant;

use horus::directory::{DirectoryService, HttpDirectory, InMemoryDirectory};
use horus::nat::{port_mapper_for, PortMapper};
use horus::{HostingState, JobStatus, Session, SessionConfig, SessionEvent, UdpBackend};
use horus_networking::{NodeEvent, TickLoop};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║         HORUS DEDICATED SERVER                                   ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();

    // Parse command line arguments (simple parsing, no external deps)
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = PathBuf::from("horus_server.toml");
    let mut port: Option<u16> = None;
    let mut lan = false;
    let mut duration_secs: Option<u64> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    port = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            "--duration" | "-d" => {
                if i + 1 < args.len() {
                    duration_secs = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            "--lan" | "-l" => lan = true,
            "--help" | "-h" => {
                println!("Usage: horus_server [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --config <FILE>        Session config (default: horus_server.toml)");
                println!("  -p, --port <PORT>          Game port (overrides the config)");
                println!("  -l, --lan                  LAN mode: no directory, no port mapping");
                println!("  -d, --duration <SECS>      Run for N seconds then exit");
                println!("  -h, --help                 Show this help");
                return;
            }
            other => warn!(argument = other, "ignoring unknown argument"),
        }
        i += 1;
    }

    let mut config = match SessionConfig::load(&config_path) {
        Ok(config) => config,
        Err(err) => {
            warn!(%err, "bad session config, using defaults");
            SessionConfig::default()
        }
    };
    config.dedicated = true;
    if let Some(port) = port {
        config.network.port = port;
    }
    config.directory.lan_mode |= lan;

    println!("┌─ CONFIGURATION ─────────────────────────────────────────────────┐");
    println!("│ Bind Address:       {}:{}", config.network.bind_address, config.network.port);
    println!("│ Max Players:        {}", config.network.max_players);
    println!("│ Tick Rate:          {} Hz", config.network.tick_rate);
    if config.directory.lan_mode {
        println!("│ Directory:          disabled (LAN)");
    } else {
        println!("│ Directory:          {}", config.directory.uri);
    }
    let mapper = port_mapper_for(&config);
    if mapper.enabled() {
        println!("│ Port Mapping:       UPnP ({:.0} s limit)", config.nat_timeout().as_secs_f32());
    } else {
        println!("│ Port Mapping:       disabled");
    }
    match duration_secs {
        Some(d) => println!("│ Duration:           {d} seconds"),
        None => println!("│ Duration:           infinite"),
    }
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    let directory: Box<dyn DirectoryService> = match HttpDirectory::new(&config.directory.uri, config.request_timeout()) {
        Ok(directory) => Box::new(directory),
        Err(err) => {
            warn!(%err, "no HTTP client, the directory will stay empty");
            Box::new(InMemoryDirectory::new())
        }
    };
    let backend = UdpBackend::new(
        config.network.bind_address,
        config.network.public_address.clone(),
        config.udp_config(),
    );
    let tick_rate = config.network.tick_rate;

    let mut session = match Session::new(config, "Server", backend, directory, mapper) {
        Ok(session) => session,
        Err(err) => {
            error!(%err, "could not start the session");
            std::process::exit(1);
        }
    };

    let mut ctrl_c = session.jobs().ctrl_c();
    let mut tick_loop = TickLoop::new(tick_rate);
    let dt = tick_loop.tick_secs();
    let start = Instant::now();
    let mut last_stats_tick = 0u64;
    let stats_interval = u64::from(tick_rate) * 30;
    let mut asked_to_host = false;

    loop {
        if let Some(duration) = duration_secs {
            if start.elapsed().as_secs() >= duration {
                info!("duration reached");
                break;
            }
        }
        match ctrl_c.poll() {
            JobStatus::Done(Ok(())) => {
                info!("ctrl-c received");
                break;
            }
            JobStatus::Done(Err(err)) => warn!(%err, "ctrl-c handler failed"),
            JobStatus::Running | JobStatus::Lost => {}
        }
        if session.quit_requested() {
            break;
        }

        tick_loop.wait_for_next_tick();

        while tick_loop.should_tick() {
            let tick_start = tick_loop.begin_tick();

            session.update(dt);
            if session.state() == HostingState::AwaitingInput && !asked_to_host {
                asked_to_host = true;
                if let Err(err) = session.host() {
                    error!(%err, "could not start hosting");
                }
            }
            for event in session.drain_events() {
                match event {
                    SessionEvent::StateChanged { to, .. } => {
                        info!(state = %to, status = session.status(), "session");
                        // Hosting failed or ended: try again from the lobby.
                        if to == HostingState::Startup {
                            asked_to_host = false;
                        }
                    }
                    SessionEvent::Notice(text) => info!(notice = %text),
                    SessionEvent::Node(NodeEvent::PeerConnected(peer)) => info!(%peer, "player connected"),
                    SessionEvent::Node(NodeEvent::PeerDisconnected(peer)) => info!(%peer, "player left"),
                    SessionEvent::Node(NodeEvent::LevelLoaded { level, .. }) => info!(%level, "level loaded"),
                    SessionEvent::Node(_) | SessionEvent::QuitRequested => {}
                }
            }

            tick_loop.end_tick(tick_start);

            let current_tick = tick_loop.tick_count();
            if current_tick - last_stats_tick >= stats_interval {
                last_stats_tick = current_tick;
                let stats = tick_loop.stats();
                let players = session.published().map_or(0, |record| record.current_players);
                info!(
                    uptime_secs = start.elapsed().as_secs(),
                    players,
                    listed = session.token().is_some(),
                    avg_tick_us = stats.avg_tick_us,
                    late_ticks = stats.late_ticks,
                    "server status"
                );
            }
        }
    }

    session.shutdown();

    let final_stats = tick_loop.stats();
    println!();
    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║                    SERVER SHUTDOWN                               ║");
    println!("╠══════════════════════════════════════════════════════════════════╣");
    println!("║ Total Ticks:        {:>10}                                 ║", final_stats.total_ticks);
    println!("║ Avg Tick Time:      {:>10} μs                             ║", final_stats.avg_tick_us);
    println!("║ Max Tick Time:      {:>10} μs                             ║", final_stats.max_tick_us);
    println!("║ Late Ticks:         {:>10}                                 ║", final_stats.late_ticks);
    println!("╚══════════════════════════════════════════════════════════════════╝");
}
