//! In-process transport.
//!
//! A [`MemoryNetwork`] is a hub shared by one host and any number of
//! clients living in the same process. Links are crossbeam channels, so both
//! channels are lossless and ordered; that is a valid (if generous) rendition
//! of the reliable and the sequenced channel contracts.

use std::collections::BTreeMap;
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use horus_shared::PeerId;
use parking_lot::Mutex;
use tracing::debug;

use super::{Channel, Transport, TransportEvent};
use crate::error::{NetError, NetResult};

#[derive(Debug)]
enum Envelope {
    Joined(PeerId),
    Left(PeerId),
    Welcome(PeerId),
    Closed,
    Data {
        from: PeerId,
        channel: Channel,
        payload: Vec<u8>,
    },
}

#[derive(Debug, Default)]
struct Hub {
    server: Option<Sender<Envelope>>,
    clients: BTreeMap<PeerId, Sender<Envelope>>,
    next_peer: u32,
}

/// In-process network hub.
#[derive(Clone, Debug, Default)]
pub struct MemoryNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl MemoryNetwork {
    /// Creates an empty network.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a host is running on this network.
    #[must_use]
    pub fn has_host(&self) -> bool {
        self.hub.lock().server.is_some()
    }

    /// Starts the host endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::HostAlreadyRunning`] if a host exists.
    pub fn host(&self) -> NetResult<MemoryTransport> {
        let (tx, rx) = unbounded();
        {
            let mut hub = self.hub.lock();
            if hub.server.is_some() {
                return Err(NetError::HostAlreadyRunning);
            }
            hub.server = Some(tx);
        }
        Ok(MemoryTransport {
            hub: Arc::clone(&self.hub),
            inbox: rx,
            local: PeerId::SERVER,
            host: true,
            link: Link::Open,
        })
    }

    /// Starts a client endpoint and begins the handshake.
    ///
    /// Without a host the first poll reports [`TransportEvent::ConnectFailed`].
    #[must_use]
    pub fn connect(&self) -> MemoryTransport {
        let (tx, rx) = unbounded();
        let mut hub = self.hub.lock();
        let link = match hub.server.clone() {
            Some(server) => {
                hub.next_peer += 1;
                let peer = PeerId(hub.next_peer);
                let _ = tx.send(Envelope::Welcome(peer));
                let _ = server.send(Envelope::Joined(peer));
                hub.clients.insert(peer, tx);
                Link::Pending(peer)
            }
            None => Link::Refused,
        };
        MemoryTransport {
            hub: Arc::clone(&self.hub),
            inbox: rx,
            local: PeerId::NULL,
            host: false,
            link,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Link {
    Pending(PeerId),
    Open,
    Refused,
    Closed,
}

/// One endpoint on a [`MemoryNetwork`].
#[derive(Debug)]
pub struct MemoryTransport {
    hub: Arc<Mutex<Hub>>,
    inbox: Receiver<Envelope>,
    local: PeerId,
    host: bool,
    link: Link,
}

impl Transport for MemoryTransport {
    fn local_peer(&self) -> PeerId {
        self.local
    }

    fn is_server(&self) -> bool {
        self.host
    }

    fn send(&mut self, to: PeerId, channel: Channel, payload: &[u8]) -> NetResult<()> {
        if self.link != Link::Open {
            return Err(NetError::NotConnected);
        }
        let hub = self.hub.lock();
        let link = if self.host {
            hub.clients.get(&to)
        } else if to.is_server() {
            hub.server.as_ref()
        } else {
            return Err(NetError::NotRoutable { from: self.local, to });
        };
        match link {
            Some(tx) => {
                let _ = tx.send(Envelope::Data {
                    from: self.local,
                    channel,
                    payload: payload.to_vec(),
                });
            }
            None => debug!(%to, "dropping payload for disconnected peer"),
        }
        Ok(())
    }

    fn poll(&mut self, events: &mut Vec<TransportEvent>) {
        if self.link == Link::Refused {
            self.link = Link::Closed;
            events.push(TransportEvent::ConnectFailed);
            return;
        }
        while let Ok(envelope) = self.inbox.try_recv() {
            let event = match envelope {
                Envelope::Joined(peer) => TransportEvent::PeerConnected(peer),
                Envelope::Left(peer) => TransportEvent::PeerDisconnected(peer),
                Envelope::Welcome(peer) => {
                    self.local = peer;
                    self.link = Link::Open;
                    TransportEvent::Connected(peer)
                }
                Envelope::Closed => {
                    self.link = Link::Closed;
                    TransportEvent::Disconnected
                }
                Envelope::Data {
                    from,
                    channel,
                    payload,
                } => TransportEvent::Message {
                    from,
                    channel,
                    payload,
                },
            };
            events.push(event);
        }
    }

    fn disconnect(&mut self) {
        if matches!(self.link, Link::Closed | Link::Refused) {
            return;
        }
        let mut hub = self.hub.lock();
        if self.host {
            hub.server = None;
            for (_, client) in std::mem::take(&mut hub.clients) {
                let _ = client.send(Envelope::Closed);
            }
        } else {
            let peer = match self.link {
                Link::Pending(peer) => peer,
                _ => self.local,
            };
            hub.clients.remove(&peer);
            if let Some(server) = &hub.server {
                let _ = server.send(Envelope::Left(peer));
            }
        }
        self.link = Link::Closed;
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}
