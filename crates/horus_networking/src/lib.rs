//! # HORUS Networking - Authoritative Session Core
//!
//! Everything peers must agree on during a match.
//!
//! ## Architecture
//!
//! - **Transport**: in-process hub for tests, UDP with a reliable ordered
//!   RPC channel and an unreliable state channel for real sessions
//! - **RPC**: named calls routed by the host, with session-buffered and
//!   level-buffered replay for late joiners
//! - **Replication**: owners move their avatar locally and stream
//!   snapshots; everyone else dead-reckons and bleeds in corrections
//! - **Sync**: rendezvous barriers that gate round starts on every peer
//!   having registered
//! - **Round**: the host-only warmup/active/cooldown/level rotation machine
//!
//! ## Authority Model
//!
//! ```text
//! CLIENT                           HOST
//!   |                                 |
//!   |--- Request{AllPeers, call} ---->| <- checks sender, buffers, fans out
//!   |<-- Delivery{sender, call} ------|
//!   |--- Acknowledge(barrier) ------->| <- barrier completes, round starts
//!   |                                 |
//! ```
//!
//! Clients never change round state, the buffered log or a barrier. They
//! only own their own avatar and the calls that speak for them.
//!
//! ## Example
//!
//! ```rust,ignore
//! use horus_networking::{MemoryNetwork, Node, NodeConfig, PlayerProfile};
//!
//! let network = MemoryNetwork::new();
//! let mut host = Node::host(network.host()?, NodeConfig::default(), None)?;
//! let mut client = Node::client(network.connect(), NodeConfig::default(), PlayerProfile::new("ana", "g1"));
//!
//! loop {
//!     host.update(1.0 / 60.0);
//!     client.update(1.0 / 60.0);
//! }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod chat;
pub mod error;
pub mod leaderboard;
pub mod node;
pub mod protocol;
pub mod registry;
pub mod replication;
pub mod round;
pub mod rpc;
pub mod sync;
pub mod tick;
pub mod transport;

pub use chat::{ChatLine, ChatLog};
pub use error::{NetError, NetResult, SyncError, SyncResult};
pub use leaderboard::{Announcement, Leaderboard, LeaderboardEntry};
pub use node::{Node, NodeConfig, NodeEvent, PlayerProfile, SyncAction, REGISTER_BARRIER};
pub use registry::{PlayerInfo, PlayerRegistry};
pub use replication::{
    AnimState, EffectFlags, EntitySnapshot, MovementInput, MovementModel, MovementTuning, ReplicatedEntity,
    VectorInterpolator,
};
pub use round::{RoundConfig, RoundDirector, RoundEvent};
pub use rpc::{Persistence, Rpc, RpcArg, RpcCall, RpcEnvelope, RpcRouter, Target};
pub use sync::NetworkSync;
pub use tick::{FixedStep, TickLoop, TickStats};
pub use transport::{Channel, MemoryNetwork, MemoryTransport, Transport, TransportEvent, UdpConfig, UdpTransport};
