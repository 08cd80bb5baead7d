//! # Port Mapping
//!
//! A host asks its router to forward the game port (UDP and TCP) so players
//! outside the LAN can reach it. Mapping is best-effort: whatever the
//! gateway answers, hosting goes ahead.
//!
//! | Mapper               | Used for                                  |
//! |----------------------|-------------------------------------------|
//! | [`UpnpPortMapper`]   | Real hosts, through the router's UPnP IGD |
//! | [`DisabledPortMapper`] | LAN mode or `nat.port_mapping = false`  |
//! | [`MemoryGateway`]    | Tests and LAN rigs                        |
//!
//! Mappers return boxed futures so the session can run them on the
//! [`crate::jobs::WorkerPool`] without borrowing the mapper.

use std::fmt;
use std::future::Future;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use igd_next::aio::tokio::search_gateway;
use igd_next::{PortMappingProtocol, SearchOptions};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::error::{NatError, NatResult};

/// Future returned by a [`PortMapper`].
pub type NatFuture<T> = Pin<Box<dyn Future<Output = NatResult<T>> + Send + 'static>>;

/// Transport protocol of a mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// UDP, the game traffic.
    Udp,
    /// TCP.
    Tcp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Udp => "UDP",
            Self::Tcp => "TCP",
        })
    }
}

/// A forwarding rule installed on a gateway.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortMapping {
    /// Protocol forwarded.
    pub protocol: Protocol,
    /// Port opened on the gateway.
    pub public_port: u16,
    /// Port on this machine.
    pub private_port: u16,
    /// Label shown in the router UI.
    pub description: String,
}

impl PortMapping {
    /// The mapping a host asks for: same port outside and in.
    #[must_use]
    pub fn game(protocol: Protocol, port: u16) -> Self {
        Self {
            protocol,
            public_port: port,
            private_port: port,
            description: format!("Horus ({protocol})"),
        }
    }
}

/// Something that can open ports on the local gateway.
pub trait PortMapper: Send + Sync {
    /// Installs `mapping` and resolves to the mapping the gateway reports.
    fn map_port(&self, mapping: PortMapping) -> NatFuture<PortMapping>;

    /// Removes a mapping installed earlier.
    fn unmap_port(&self, mapping: PortMapping) -> NatFuture<()>;

    /// Whether this mapper talks to a gateway at all.
    fn enabled(&self) -> bool {
        true
    }
}

/// The mapper a host on this machine should use: UPnP unless the config
/// turns mapping off or runs in LAN mode.
#[must_use]
pub fn port_mapper_for(config: &SessionConfig) -> Box<dyn PortMapper> {
    if config.nat.port_mapping && !config.directory.lan_mode {
        Box::new(UpnpPortMapper::new(config.nat_timeout(), config.nat.lease_secs))
    } else {
        Box::new(DisabledPortMapper)
    }
}

/// Checks that the gateway installed what was asked for.
///
/// # Errors
///
/// [`NatError::Rejected`] if the ports differ.
pub fn validate_mapping(requested: &PortMapping, installed: &PortMapping) -> NatResult<()> {
    if installed.public_port != requested.public_port || installed.private_port != requested.private_port {
        return Err(NatError::Rejected {
            protocol: requested.protocol,
            port: requested.public_port,
            reason: format!(
                "mapped {} -> {} instead",
                installed.public_port, installed.private_port
            ),
        });
    }
    Ok(())
}

// =============================================================================
// UPnP
// =============================================================================

/// Maps ports through the router's UPnP Internet Gateway Device service.
///
/// Every call searches for the gateway again, so a router that reboots
/// between hosting and shutdown is still found.
#[derive(Clone, Debug)]
pub struct UpnpPortMapper {
    search_timeout: Duration,
    lease_secs: u32,
    broadcast: SocketAddr,
}

impl UpnpPortMapper {
    /// Mapper that waits `search_timeout` for a gateway and asks for
    /// `lease_secs` leases (0 = until removed).
    #[must_use]
    pub fn new(search_timeout: Duration, lease_secs: u32) -> Self {
        Self {
            search_timeout,
            lease_secs,
            broadcast: SearchOptions::default().broadcast_address,
        }
    }

    /// Sends discovery to `broadcast` instead of the SSDP multicast group.
    #[must_use]
    pub fn with_broadcast(mut self, broadcast: SocketAddr) -> Self {
        self.broadcast = broadcast;
        self
    }

    fn options(&self) -> SearchOptions {
        SearchOptions {
            broadcast_address: self.broadcast,
            timeout: Some(self.search_timeout),
            ..SearchOptions::default()
        }
    }
}

const fn wire_protocol(protocol: Protocol) -> PortMappingProtocol {
    match protocol {
        Protocol::Udp => PortMappingProtocol::UDP,
        Protocol::Tcp => PortMappingProtocol::TCP,
    }
}

/// Address of this machine on the interface that routes to `gateway`.
fn local_ip(gateway: SocketAddr) -> NatResult<IpAddr> {
    let any = if gateway.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(any).map_err(NatError::LocalAddress)?;
    socket.connect(gateway).map_err(NatError::LocalAddress)?;
    Ok(socket.local_addr().map_err(NatError::LocalAddress)?.ip())
}

fn no_gateway(err: impl fmt::Display) -> NatError {
    debug!(%err, "UPnP discovery failed");
    NatError::NoGateway
}

impl PortMapper for UpnpPortMapper {
    fn map_port(&self, mapping: PortMapping) -> NatFuture<PortMapping> {
        let options = self.options();
        let lease = self.lease_secs;
        Box::pin(async move {
            let gateway = search_gateway(options).await.map_err(no_gateway)?;
            let local = SocketAddr::new(local_ip(gateway.addr)?, mapping.private_port);
            gateway
                .add_port(
                    wire_protocol(mapping.protocol),
                    mapping.public_port,
                    local,
                    lease,
                    &mapping.description,
                )
                .await
                .map_err(|err| NatError::Rejected {
                    protocol: mapping.protocol,
                    port: mapping.public_port,
                    reason: err.to_string(),
                })?;
            info!(gateway = %gateway.addr, %local, protocol = %mapping.protocol, port = mapping.public_port, "port mapped");
            Ok(mapping)
        })
    }

    fn unmap_port(&self, mapping: PortMapping) -> NatFuture<()> {
        let options = self.options();
        Box::pin(async move {
            let gateway = search_gateway(options).await.map_err(no_gateway)?;
            gateway
                .remove_port(wire_protocol(mapping.protocol), mapping.public_port)
                .await
                .map_err(|err| NatError::Rejected {
                    protocol: mapping.protocol,
                    port: mapping.public_port,
                    reason: err.to_string(),
                })
        })
    }
}

/// Mapper for hosts with port mapping turned off: every request fails and
/// hosting goes ahead unmapped.
#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledPortMapper;

impl PortMapper for DisabledPortMapper {
    fn map_port(&self, _mapping: PortMapping) -> NatFuture<PortMapping> {
        Box::pin(async { Err(NatError::Disabled) })
    }

    fn unmap_port(&self, _mapping: PortMapping) -> NatFuture<()> {
        Box::pin(async { Err(NatError::Disabled) })
    }

    fn enabled(&self) -> bool {
        false
    }
}

/// In-process gateway for tests and LAN rigs.
#[derive(Clone, Debug, Default)]
pub struct MemoryGateway {
    state: Arc<Mutex<GatewayState>>,
}

#[derive(Debug, Default)]
struct GatewayState {
    installed: Vec<PortMapping>,
    refused: Vec<Protocol>,
}

impl MemoryGateway {
    /// A gateway that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the gateway refuse `protocol`.
    pub fn refuse(&self, protocol: Protocol) {
        self.state.lock().refused.push(protocol);
    }

    /// Mappings currently installed.
    #[must_use]
    pub fn installed(&self) -> Vec<PortMapping> {
        self.state.lock().installed.clone()
    }
}

impl PortMapper for MemoryGateway {
    fn map_port(&self, mapping: PortMapping) -> NatFuture<PortMapping> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            let mut state = state.lock();
            if state.refused.contains(&mapping.protocol) {
                return Err(NatError::Rejected {
                    protocol: mapping.protocol,
                    port: mapping.public_port,
                    reason: "refused by gateway".to_owned(),
                });
            }
            if !state.installed.contains(&mapping) {
                state.installed.push(mapping.clone());
            }
            Ok(mapping)
        })
    }

    fn unmap_port(&self, mapping: PortMapping) -> NatFuture<()> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            let mut state = state.lock();
            let before = state.installed.len();
            state.installed.retain(|installed| *installed != mapping);
            if state.installed.len() == before {
                return Err(NatError::NoGateway);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobStatus, WorkerPool};

    fn run<T: Send + 'static>(pool: &WorkerPool, job: NatFuture<T>) -> NatResult<T> {
        pool.block_on("test", Duration::from_secs(5), job)
            .unwrap_or(Err(NatError::NoGateway))
    }

    #[test]
    fn test_game_mapping_labels() {
        let mapping = PortMapping::game(Protocol::Udp, 31414);
        assert_eq!(mapping.description, "Horus (UDP)");
        assert_eq!(mapping.public_port, mapping.private_port);
    }

    #[test]
    fn test_disabled_mapper_always_fails() {
        let pool = WorkerPool::new(1).unwrap();
        let mapper = DisabledPortMapper;
        let mut pending = pool.spawn("map", mapper.map_port(PortMapping::game(Protocol::Tcp, 1)));
        let result = loop {
            if let JobStatus::Done(result) = pending.poll() {
                break result;
            }
            std::thread::sleep(Duration::from_millis(1));
        };
        assert!(matches!(result, Err(NatError::Disabled)));
    }

    #[test]
    fn test_memory_gateway_maps_and_refuses() {
        let pool = WorkerPool::new(1).unwrap();
        let gateway = MemoryGateway::new();
        gateway.refuse(Protocol::Tcp);

        let udp = PortMapping::game(Protocol::Udp, 31414);
        assert_eq!(run(&pool, gateway.map_port(udp.clone())).unwrap(), udp);
        assert!(run(&pool, gateway.map_port(PortMapping::game(Protocol::Tcp, 31414))).is_err());
        assert_eq!(gateway.installed(), vec![udp.clone()]);

        run(&pool, gateway.unmap_port(udp.clone())).unwrap();
        assert!(gateway.installed().is_empty());
        assert!(run(&pool, gateway.unmap_port(udp)).is_err());
    }

    #[test]
    fn test_validation_catches_remapped_ports() {
        let requested = PortMapping::game(Protocol::Udp, 31414);
        let mut installed = requested.clone();
        assert!(validate_mapping(&requested, &installed).is_ok());
        installed.public_port = 40000;
        assert!(matches!(
            validate_mapping(&requested, &installed),
            Err(NatError::Rejected { port: 31414, .. })
        ));
    }

    #[test]
    fn test_mapper_follows_the_config() {
        let mut config = SessionConfig::default();
        assert!(config.nat.port_mapping);
        assert!(port_mapper_for(&config).enabled());

        config.directory.lan_mode = true;
        assert!(!port_mapper_for(&config).enabled());

        config.directory.lan_mode = false;
        config.nat.port_mapping = false;
        assert!(!port_mapper_for(&config).enabled());
    }

    #[test]
    fn test_upnp_without_gateway() {
        let pool = WorkerPool::new(1).unwrap();
        // nothing answers SSDP on the discard port
        let mapper = UpnpPortMapper::new(Duration::from_millis(200), 0)
            .with_broadcast(SocketAddr::from(([127, 0, 0, 1], 9)));
        assert!(mapper.enabled());
        assert!(matches!(
            run(&pool, mapper.map_port(PortMapping::game(Protocol::Udp, 31414))),
            Err(NatError::NoGateway)
        ));
        assert!(matches!(
            run(&pool, mapper.unmap_port(PortMapping::game(Protocol::Tcp, 31414))),
            Err(NatError::NoGateway)
        ));
    }

    #[test]
    fn test_local_address_towards_loopback() {
        let ip = local_ip(SocketAddr::from(([127, 0, 0, 1], 1900))).unwrap();
        assert!(ip.is_loopback());
    }
}
