//! # Networking Error Types
//!
//! Nothing in this crate panics on bad input from the wire. Every failure is
//! one of these values; the per-frame drivers log them and carry on.

use horus_shared::PeerId;
use thiserror::Error;

/// Errors raised by the transport, codec and RPC layers.
#[derive(Error, Debug)]
pub enum NetError {
    /// Socket-level failure.
    #[error("transport i/o failed: {0}")]
    Io(#[from] std::io::Error),

    /// A datagram or payload ended early or carried an unknown tag.
    #[error("malformed {what} payload")]
    Malformed {
        /// What was being decoded.
        what: &'static str,
    },

    /// The payload does not fit in one datagram.
    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge {
        /// Payload size.
        size: usize,
        /// Maximum size.
        limit: usize,
    },

    /// The receiving side has no handler for this name.
    #[error("unknown rpc `{0}`")]
    UnknownRpc(String),

    /// A known rpc arrived with the wrong argument list.
    #[error("bad arguments for rpc `{0}`")]
    BadArguments(&'static str),

    /// Clients can only talk to the host.
    #[error("{to} is not reachable from {from}")]
    NotRoutable {
        /// Local peer.
        from: PeerId,
        /// Requested destination.
        to: PeerId,
    },

    /// Operation needs a live connection.
    #[error("transport is not connected")]
    NotConnected,

    /// A host is already running on this network.
    #[error("a host is already running")]
    HostAlreadyRunning,

    /// Server-only logic was invoked on a client.
    #[error("`{0}` may only run on the host")]
    NotAuthoritative(&'static str),

    /// The named level is not in the rotation.
    #[error("Level {0} does not exist.")]
    UnknownLevel(String),

    /// The named level is already loaded.
    #[error("You're already in {0}, dummy.")]
    AlreadyOnLevel(String),
}

/// Result type for networking operations.
pub type NetResult<T> = Result<T, NetError>;

/// Errors raised by [`crate::sync::NetworkSync`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Barriers are created by the host only.
    #[error("cannot create barrier `{0}` on a non-authoritative peer")]
    NotAuthoritative(String),

    /// A barrier with this name is still open.
    #[error("barrier `{0}` already exists")]
    AlreadyExists(String),

    /// No open barrier has this name.
    #[error("no barrier named `{0}`")]
    UnknownBarrier(String),
}

/// Result type for barrier operations.
pub type SyncResult<T> = Result<T, SyncError>;
