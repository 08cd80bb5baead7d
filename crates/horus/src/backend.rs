//! # Transport Backends
//!
//! How a session opens links: real UDP sockets, or an in-process exchange
//! where every "machine" of a test shares one address book.
//!
//! Addresses are what the directory publishes as a host's `guid`. Opening a
//! client never blocks; an unreachable address surfaces later as
//! [`horus_networking::TransportEvent::ConnectFailed`].

use std::collections::BTreeMap;
use std::io;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use horus_networking::{MemoryNetwork, MemoryTransport, NetError, NetResult, Transport, UdpConfig, UdpTransport};
use parking_lot::Mutex;
use tracing::debug;

/// Opens host and client endpoints.
pub trait Backend {
    /// Endpoint type.
    type Transport: Transport;

    /// Opens an authoritative endpoint on `port` and returns it with the
    /// address clients should use.
    ///
    /// # Errors
    ///
    /// Fails if the port cannot be opened.
    fn host(&mut self, port: u16) -> NetResult<(Self::Transport, String)>;

    /// Starts connecting to `address`.
    ///
    /// # Errors
    ///
    /// Fails if `address` cannot be parsed or no local endpoint can be
    /// opened.
    fn connect(&mut self, address: &str, port: u16) -> NetResult<Self::Transport>;
}

// =============================================================================
// UDP
// =============================================================================

/// UDP sockets.
#[derive(Clone, Debug)]
pub struct UdpBackend {
    bind: IpAddr,
    public_address: Option<String>,
    link: UdpConfig,
}

impl UdpBackend {
    /// Hosts bind to `bind`; `public_address` is advertised instead of the
    /// bound socket when set.
    #[must_use]
    pub const fn new(bind: IpAddr, public_address: Option<String>, link: UdpConfig) -> Self {
        Self {
            bind,
            public_address,
            link,
        }
    }
}

/// Resolves `address`, adding `default_port` when it names no port.
///
/// # Errors
///
/// [`NetError::Io`] if the name does not resolve.
pub fn resolve(address: &str, default_port: u16) -> NetResult<SocketAddr> {
    let address = address.trim();
    if let Ok(addr) = address.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, default_port));
    }
    let candidates = if address.contains(':') {
        address.to_socket_addrs()
    } else {
        (address, default_port).to_socket_addrs()
    };
    candidates?
        .next()
        .ok_or_else(|| NetError::Io(io::Error::new(io::ErrorKind::NotFound, format!("{address} did not resolve"))))
}

impl Backend for UdpBackend {
    type Transport = UdpTransport;

    fn host(&mut self, port: u16) -> NetResult<(UdpTransport, String)> {
        let transport = UdpTransport::host(SocketAddr::new(self.bind, port), self.link.clone())?;
        let address = self
            .public_address
            .clone()
            .unwrap_or_else(|| transport.local_addr().to_string());
        Ok((transport, address))
    }

    fn connect(&mut self, address: &str, port: u16) -> NetResult<UdpTransport> {
        let server = resolve(address, port)?;
        UdpTransport::connect(server, self.link.clone())
    }
}

// =============================================================================
// IN-PROCESS
// =============================================================================

/// In-process links. Clones made with [`MemoryBackend::machine`] share one
/// address book, like machines on one LAN.
#[derive(Clone, Debug)]
pub struct MemoryBackend {
    name: String,
    networks: Arc<Mutex<BTreeMap<String, MemoryNetwork>>>,
}

impl MemoryBackend {
    /// First machine of a new exchange.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            networks: Arc::default(),
        }
    }

    /// Another machine on the same exchange.
    #[must_use]
    pub fn machine(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            networks: Arc::clone(&self.networks),
        }
    }

    /// Address this machine hosts on for `port`.
    #[must_use]
    pub fn address(&self, port: u16) -> String {
        format!("{}:{port}", self.name)
    }
}

impl Backend for MemoryBackend {
    type Transport = MemoryTransport;

    fn host(&mut self, port: u16) -> NetResult<(MemoryTransport, String)> {
        let address = self.address(port);
        let network = self
            .networks
            .lock()
            .entry(address.clone())
            .or_insert_with(MemoryNetwork::new)
            .clone();
        Ok((network.host()?, address))
    }

    fn connect(&mut self, address: &str, _port: u16) -> NetResult<MemoryTransport> {
        let network = self.networks.lock().get(address).cloned();
        if network.is_none() {
            debug!(address, "nobody hosts there");
        }
        Ok(network.unwrap_or_default().connect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use horus_networking::TransportEvent;

    #[test]
    fn test_resolve_forms() {
        assert_eq!(resolve("127.0.0.1:4000", 31414).unwrap(), "127.0.0.1:4000".parse().unwrap());
        assert_eq!(resolve(" 127.0.0.1 ", 31414).unwrap(), "127.0.0.1:31414".parse().unwrap());
        assert_eq!(resolve("::1", 31414).unwrap(), "[::1]:31414".parse().unwrap());
    }

    #[test]
    fn test_memory_machines_share_addresses() {
        let mut host = MemoryBackend::new("alpha");
        let mut guest = host.machine("beta");

        let (mut server, address) = host.host(31414).unwrap();
        assert_eq!(address, "alpha:31414");
        assert!(host.host(31414).is_err());

        let mut client = guest.connect(&address, 31414).unwrap();
        let mut events = Vec::new();
        client.poll(&mut events);
        assert!(matches!(events.as_slice(), [TransportEvent::Connected(_)]));
        events.clear();
        server.poll(&mut events);
        assert!(matches!(events.as_slice(), [TransportEvent::PeerConnected(_)]));
    }

    #[test]
    fn test_unknown_memory_address_fails_on_poll() {
        let mut guest = MemoryBackend::new("beta");
        let mut client = guest.connect("nowhere:1", 1).unwrap();
        let mut events = Vec::new();
        client.poll(&mut events);
        assert_eq!(events, vec![TransportEvent::ConnectFailed]);
    }
}
