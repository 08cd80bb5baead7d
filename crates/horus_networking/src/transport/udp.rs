//! UDP transport.
//!
//! Non-blocking std socket with a small connection protocol on top:
//!
//! ```text
//! CLIENT                                HOST
//!   |--- Connect (retried) ------------->|  assigns PeerId
//!   |<-- ConnectAck{peer} ---------------|
//!   |<-> Reliable{seq} / Ack{seq} ------>|  RPC channel, resent until acked
//!   |<-> State{seq} -------------------->|  newest wins, stale dropped
//!   |<-> Heartbeat --------------------->|  when otherwise idle
//!   |--- Disconnect -------------------->|  or silence past the timeout
//! ```

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use horus_shared::constants::MAX_PACKET_SIZE;
use horus_shared::PeerId;
use tracing::{debug, info, warn};

use super::reliable::ReliableChannel;
use super::{Channel, Transport, TransportEvent};
use crate::error::{NetError, NetResult};
use crate::protocol::{sequence_newer, Frame, SequenceNumber};

/// Link timing and capacity.
#[derive(Clone, Debug)]
pub struct UdpConfig {
    /// Clients accepted by a host.
    pub max_peers: usize,
    /// Give up connecting after this long.
    pub connect_timeout: Duration,
    /// Interval between connect attempts.
    pub connect_retry: Duration,
    /// Send a heartbeat when nothing else went out for this long.
    pub heartbeat_interval: Duration,
    /// Drop a link that stayed silent this long.
    pub peer_timeout: Duration,
    /// Reliable resend timeout.
    pub resend_timeout: Duration,
    /// Reliable resends before the link is dropped.
    pub max_resends: u32,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            max_peers: horus_shared::MAX_PLAYERS as usize - 1,
            connect_timeout: Duration::from_secs(5),
            connect_retry: Duration::from_millis(250),
            heartbeat_interval: Duration::from_secs(1),
            peer_timeout: Duration::from_secs(10),
            resend_timeout: Duration::from_millis(100),
            max_resends: 30,
        }
    }
}

/// Transport statistics.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransportStats {
    /// Packets sent.
    pub packets_sent: u64,
    /// Packets received.
    pub packets_received: u64,
    /// Bytes sent.
    pub bytes_sent: u64,
    /// Bytes received.
    pub bytes_received: u64,
    /// Send errors.
    pub send_errors: u64,
    /// Receive errors.
    pub recv_errors: u64,
    /// Datagrams that failed to decode.
    pub malformed: u64,
    /// State payloads dropped as stale.
    pub stale_states: u64,
}

#[derive(Debug)]
struct PeerLink {
    id: PeerId,
    reliable: ReliableChannel,
    state_out: SequenceNumber,
    state_in: Option<SequenceNumber>,
    last_recv: Instant,
    last_send: Instant,
}

impl PeerLink {
    fn new(id: PeerId, config: &UdpConfig, now: Instant) -> Self {
        Self {
            id,
            reliable: ReliableChannel::new(config.resend_timeout, config.max_resends),
            state_out: 0,
            state_in: None,
            last_recv: now,
            last_send: now,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ClientPhase {
    Handshaking { started: Instant, last_attempt: Instant },
    Connected,
    Closed,
}

#[derive(Clone, Copy, Debug)]
enum Role {
    Host { next_peer: u32 },
    Client { server: SocketAddr, phase: ClientPhase },
}

/// UDP endpoint, host or client.
pub struct UdpTransport {
    /// The underlying socket.
    socket: UdpSocket,
    /// Local address.
    local_addr: SocketAddr,
    /// Receive buffer.
    recv_buffer: Vec<u8>,
    /// Statistics.
    stats: TransportStats,
    config: UdpConfig,
    role: Role,
    local: PeerId,
    links: HashMap<SocketAddr, PeerLink>,
    by_peer: HashMap<PeerId, SocketAddr>,
    /// Frames produced while links were borrowed.
    outbox: Vec<(SocketAddr, Frame)>,
}

impl UdpTransport {
    fn bind(addr: SocketAddr, config: UdpConfig, role: Role, local: PeerId) -> NetResult<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?;
        Ok(Self {
            socket,
            local_addr,
            recv_buffer: vec![0u8; MAX_PACKET_SIZE],
            stats: TransportStats::default(),
            config,
            role,
            local,
            links: HashMap::new(),
            by_peer: HashMap::new(),
            outbox: Vec::new(),
        })
    }

    /// Starts a host bound to `addr`.
    ///
    /// # Errors
    ///
    /// Fails if the socket cannot be bound.
    pub fn host(addr: SocketAddr, config: UdpConfig) -> NetResult<Self> {
        let transport = Self::bind(addr, config, Role::Host { next_peer: 0 }, PeerId::SERVER)?;
        info!(addr = %transport.local_addr, "udp host listening");
        Ok(transport)
    }

    /// Starts a client and sends the first connect request to `server`.
    ///
    /// # Errors
    ///
    /// Fails if no local socket can be bound.
    pub fn connect(server: SocketAddr, config: UdpConfig) -> NetResult<Self> {
        let any: SocketAddr = if server.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let now = Instant::now();
        let role = Role::Client {
            server,
            phase: ClientPhase::Handshaking {
                started: now,
                last_attempt: now,
            },
        };
        let mut transport = Self::bind(any, config, role, PeerId::NULL)?;
        transport.transmit(server, &Frame::Connect);
        info!(%server, "udp client connecting");
        Ok(transport)
    }

    /// Returns the local address.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns statistics.
    #[must_use]
    pub const fn stats(&self) -> &TransportStats {
        &self.stats
    }

    fn transmit(&mut self, addr: SocketAddr, frame: &Frame) {
        let bytes = match frame.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "dropping unencodable frame");
                return;
            }
        };
        match self.socket.send_to(&bytes, addr) {
            Ok(n) => {
                self.stats.packets_sent += 1;
                self.stats.bytes_sent += n as u64;
            }
            Err(e) => {
                // reliable frames are resent; state frames are best effort anyway
                self.stats.send_errors += 1;
                if e.kind() != io::ErrorKind::WouldBlock {
                    debug!(%addr, error = %e, "udp send failed");
                }
            }
        }
    }

    fn flush_outbox(&mut self) {
        for (addr, frame) in std::mem::take(&mut self.outbox) {
            self.transmit(addr, &frame);
        }
    }

    fn recv(&mut self) -> Option<(Frame, SocketAddr)> {
        loop {
            match self.socket.recv_from(&mut self.recv_buffer) {
                Ok((len, addr)) => {
                    self.stats.packets_received += 1;
                    self.stats.bytes_received += len as u64;
                    match Frame::decode(&self.recv_buffer[..len]) {
                        Ok(frame) => return Some((frame, addr)),
                        Err(_) => self.stats.malformed += 1,
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return None,
                Err(e) => {
                    // ICMP port-unreachable surfaces here on some platforms
                    self.stats.recv_errors += 1;
                    debug!(error = %e, "udp recv failed");
                    if e.kind() != io::ErrorKind::ConnectionReset {
                        return None;
                    }
                }
            }
        }
    }

    fn open_link(&mut self, addr: SocketAddr, id: PeerId, now: Instant) {
        self.links.insert(addr, PeerLink::new(id, &self.config, now));
        self.by_peer.insert(id, addr);
    }

    fn close_link(&mut self, addr: SocketAddr) -> Option<PeerId> {
        let link = self.links.remove(&addr)?;
        self.by_peer.remove(&link.id);
        Some(link.id)
    }

    fn handle_frame(&mut self, addr: SocketAddr, frame: Frame, now: Instant, events: &mut Vec<TransportEvent>) {
        match (self.role, frame) {
            (Role::Host { next_peer }, Frame::Connect) => {
                if let Some(link) = self.links.get(&addr) {
                    let peer = link.id.0;
                    self.transmit(addr, &Frame::ConnectAck { peer });
                    return;
                }
                if self.links.len() >= self.config.max_peers {
                    info!(%addr, "refusing connection, session full");
                    self.transmit(addr, &Frame::Disconnect);
                    return;
                }
                let peer = PeerId(next_peer + 1);
                self.role = Role::Host { next_peer: peer.0 };
                self.open_link(addr, peer, now);
                self.transmit(addr, &Frame::ConnectAck { peer: peer.0 });
                info!(%addr, %peer, "peer connected");
                events.push(TransportEvent::PeerConnected(peer));
            }
            (Role::Client { server, phase }, Frame::ConnectAck { peer }) => {
                if addr != server || !matches!(phase, ClientPhase::Handshaking { .. }) {
                    return;
                }
                self.role = Role::Client {
                    server,
                    phase: ClientPhase::Connected,
                };
                self.local = PeerId(peer);
                self.open_link(addr, PeerId::SERVER, now);
                info!(local = %self.local, "connected to host");
                events.push(TransportEvent::Connected(self.local));
            }
            (Role::Client { server, phase }, Frame::Disconnect) if addr == server => {
                let event = if matches!(phase, ClientPhase::Handshaking { .. }) {
                    TransportEvent::ConnectFailed
                } else {
                    TransportEvent::Disconnected
                };
                self.role = Role::Client {
                    server,
                    phase: ClientPhase::Closed,
                };
                self.close_link(addr);
                events.push(event);
            }
            (Role::Host { .. }, Frame::Disconnect) => {
                if let Some(peer) = self.close_link(addr) {
                    info!(%peer, "peer left");
                    events.push(TransportEvent::PeerDisconnected(peer));
                }
            }
            (_, frame) => self.handle_link_frame(addr, frame, now, events),
        }
    }

    fn handle_link_frame(&mut self, addr: SocketAddr, frame: Frame, now: Instant, events: &mut Vec<TransportEvent>) {
        let Some(link) = self.links.get_mut(&addr) else {
            return;
        };
        link.last_recv = now;
        match frame {
            Frame::Reliable { sequence, payload } => {
                self.outbox.push((addr, Frame::Ack { sequence }));
                for payload in link.reliable.receive(sequence, payload) {
                    events.push(TransportEvent::Message {
                        from: link.id,
                        channel: Channel::Rpc,
                        payload,
                    });
                }
            }
            Frame::Ack { sequence } => link.reliable.acknowledge(sequence),
            Frame::State { sequence, payload } => {
                let fresh = link.state_in.map_or(true, |last| sequence_newer(sequence, last));
                if fresh {
                    link.state_in = Some(sequence);
                    events.push(TransportEvent::Message {
                        from: link.id,
                        channel: Channel::State,
                        payload,
                    });
                } else {
                    self.stats.stale_states += 1;
                }
            }
            Frame::Heartbeat | Frame::Connect | Frame::ConnectAck { .. } | Frame::Disconnect => {}
        }
    }

    fn maintain(&mut self, now: Instant, events: &mut Vec<TransportEvent>) {
        if let Role::Client {
            server,
            phase: ClientPhase::Handshaking { started, last_attempt },
        } = self.role
        {
            if now.duration_since(started) > self.config.connect_timeout {
                warn!(%server, "connect timed out");
                self.role = Role::Client {
                    server,
                    phase: ClientPhase::Closed,
                };
                events.push(TransportEvent::ConnectFailed);
            } else if now.duration_since(last_attempt) > self.config.connect_retry {
                self.role = Role::Client {
                    server,
                    phase: ClientPhase::Handshaking {
                        started,
                        last_attempt: now,
                    },
                };
                self.outbox.push((server, Frame::Connect));
            }
        }

        let mut dead = Vec::new();
        for (addr, link) in &mut self.links {
            let batch = link.reliable.resends(now);
            if batch.exhausted || now.duration_since(link.last_recv) > self.config.peer_timeout {
                dead.push(*addr);
                continue;
            }
            if !batch.frames.is_empty() {
                link.last_send = now;
            }
            for (sequence, payload) in batch.frames {
                self.outbox.push((*addr, Frame::Reliable { sequence, payload }));
            }
            if now.duration_since(link.last_send) > self.config.heartbeat_interval {
                link.last_send = now;
                self.outbox.push((*addr, Frame::Heartbeat));
            }
        }

        for addr in dead {
            let Some(peer) = self.close_link(addr) else {
                continue;
            };
            warn!(%peer, %addr, "link timed out");
            match &mut self.role {
                Role::Host { .. } => events.push(TransportEvent::PeerDisconnected(peer)),
                Role::Client { phase, .. } => {
                    *phase = ClientPhase::Closed;
                    events.push(TransportEvent::Disconnected);
                }
            }
        }
    }
}

impl Transport for UdpTransport {
    fn local_peer(&self) -> PeerId {
        self.local
    }

    fn is_server(&self) -> bool {
        matches!(self.role, Role::Host { .. })
    }

    fn send(&mut self, to: PeerId, channel: Channel, payload: &[u8]) -> NetResult<()> {
        if let Role::Client { phase, .. } = self.role {
            if !to.is_server() {
                return Err(NetError::NotRoutable { from: self.local, to });
            }
            if phase != ClientPhase::Connected {
                return Err(NetError::NotConnected);
            }
        }
        let Some(addr) = self.by_peer.get(&to).copied() else {
            debug!(%to, "dropping payload for disconnected peer");
            return Ok(());
        };
        if payload.len() + 7 > MAX_PACKET_SIZE {
            return Err(NetError::PayloadTooLarge {
                size: payload.len(),
                limit: MAX_PACKET_SIZE - 7,
            });
        }
        let now = Instant::now();
        let Some(link) = self.links.get_mut(&addr) else {
            return Ok(());
        };
        link.last_send = now;
        let frame = match channel {
            Channel::Rpc => Frame::Reliable {
                sequence: link.reliable.send(payload, now),
                payload: payload.to_vec(),
            },
            Channel::State => {
                let sequence = link.state_out;
                link.state_out = link.state_out.wrapping_add(1);
                Frame::State {
                    sequence,
                    payload: payload.to_vec(),
                }
            }
        };
        self.transmit(addr, &frame);
        Ok(())
    }

    fn poll(&mut self, events: &mut Vec<TransportEvent>) {
        let now = Instant::now();
        while let Some((frame, addr)) = self.recv() {
            self.handle_frame(addr, frame, now, events);
        }
        self.maintain(now, events);
        self.flush_outbox();
    }

    fn disconnect(&mut self) {
        let addrs: Vec<SocketAddr> = self.links.keys().copied().collect();
        for addr in addrs {
            self.transmit(addr, &Frame::Disconnect);
        }
        self.links.clear();
        self.by_peer.clear();
        if let Role::Client { phase, .. } = &mut self.role {
            *phase = ClientPhase::Closed;
        }
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}
