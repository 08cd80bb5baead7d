//! # Transport Layer
//!
//! Moves opaque payloads between the host and its clients.
//!
//! ## Design
//!
//! - Star topology: clients only ever talk to the host
//! - Two channels per link: [`Channel::Rpc`] is reliable and ordered,
//!   [`Channel::State`] is unreliable and sequenced (stale payloads dropped)
//! - Non-blocking: [`Transport::poll`] drains whatever arrived since the
//!   last tick and never waits
//!
//! Two implementations ship: [`MemoryTransport`] links peers inside one
//! process, [`UdpTransport`] talks over real sockets.

mod memory;
mod reliable;
mod udp;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use reliable::{ReliableChannel, ResendBatch};
pub use udp::{TransportStats, UdpConfig, UdpTransport};

use horus_shared::PeerId;

use crate::error::NetResult;

/// Logical channel of a payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Reliable, ordered. Carries RPC envelopes.
    Rpc,
    /// Unreliable, sequenced. Carries entity snapshots.
    State,
}

/// Something that happened on the link since the last poll.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// Host side: a client finished the handshake.
    PeerConnected(PeerId),
    /// Host side: a client left or timed out.
    PeerDisconnected(PeerId),
    /// Client side: the host accepted us as `PeerId`.
    Connected(PeerId),
    /// Client side: the handshake never completed.
    ConnectFailed,
    /// Client side: the link to the host is gone.
    Disconnected,
    /// A payload arrived.
    Message {
        /// Sending peer.
        from: PeerId,
        /// Channel it arrived on.
        channel: Channel,
        /// Payload bytes.
        payload: Vec<u8>,
    },
}

/// A host or client endpoint.
pub trait Transport {
    /// Our own peer id; [`PeerId::NULL`] until a client is accepted.
    fn local_peer(&self) -> PeerId;

    /// True for the host endpoint.
    fn is_server(&self) -> bool;

    /// Sends a payload to `to`.
    ///
    /// Payloads for a peer that is not connected are dropped silently.
    ///
    /// # Errors
    ///
    /// Fails when a client addresses anyone but the host, when the payload
    /// is too large, or on a socket error.
    fn send(&mut self, to: PeerId, channel: Channel, payload: &[u8]) -> NetResult<()>;

    /// Appends every event since the last poll to `events`.
    fn poll(&mut self, events: &mut Vec<TransportEvent>);

    /// Leaves the session (client) or shuts it down (host).
    fn disconnect(&mut self);
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn local_peer(&self) -> PeerId {
        (**self).local_peer()
    }

    fn is_server(&self) -> bool {
        (**self).is_server()
    }

    fn send(&mut self, to: PeerId, channel: Channel, payload: &[u8]) -> NetResult<()> {
        (**self).send(to, channel, payload)
    }

    fn poll(&mut self, events: &mut Vec<TransportEvent>) {
        (**self).poll(events);
    }

    fn disconnect(&mut self) {
        (**self).disconnect();
    }
}
