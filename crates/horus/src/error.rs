//! # Session Error Types
//!
//! Everything here is recoverable. The state machine turns these into a
//! status string or a chat notice and keeps running.

use std::path::PathBuf;

use horus_networking::NetError;
use thiserror::Error;

use crate::lobby::HostingState;

/// Errors raised by [`crate::Session`] commands.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The worker pool could not be started.
    #[error("could not start the worker pool: {0}")]
    WorkerPool(#[source] std::io::Error),

    /// The command does not apply to the current state.
    #[error("cannot {action} while {state}")]
    InvalidState {
        /// Requested action.
        action: &'static str,
        /// State the session was in.
        state: HostingState,
    },

    /// `connect` was given a blank address.
    #[error("no address given")]
    NoAddress,

    /// No session is running.
    #[error("not in a session")]
    NotInSession,

    /// Transport or node failure.
    #[error(transparent)]
    Net(#[from] NetError),
}

/// Result type for session commands.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors raised by a [`crate::directory::DirectoryService`].
#[derive(Error, Debug)]
pub enum DirectoryError {
    /// Transport-level HTTP failure or an error status.
    #[error("directory request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The directory answered with something that is not the expected JSON.
    #[error("directory sent malformed json: {0}")]
    Json(#[from] serde_json::Error),

    /// The directory cannot be reached.
    #[error("directory is unreachable")]
    Unreachable,

    /// The token does not name a listed host.
    #[error("directory does not know token `{0}`")]
    UnknownToken(String),
}

/// Result type for directory calls.
pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// Errors raised by a [`crate::nat::PortMapper`].
#[derive(Error, Debug)]
pub enum NatError {
    /// Port mapping is turned off.
    #[error("port mapping is disabled")]
    Disabled,

    /// No gateway answered discovery.
    #[error("no port mapping gateway found")]
    NoGateway,

    /// The gateway did not answer in time.
    #[error("gateway did not answer for {protocol} port {port}")]
    TimedOut {
        /// Mapped protocol.
        protocol: crate::nat::Protocol,
        /// Requested port.
        port: u16,
    },

    /// The local address facing the gateway could not be found.
    #[error("no local address towards the gateway: {0}")]
    LocalAddress(#[source] std::io::Error),

    /// The gateway refused or mangled the mapping.
    #[error("gateway rejected {protocol} port {port}: {reason}")]
    Rejected {
        /// Mapped protocol.
        protocol: crate::nat::Protocol,
        /// Requested port.
        port: u16,
        /// Gateway's reason.
        reason: String,
    },
}

/// Result type for port mapping.
pub type NatResult<T> = Result<T, NatError>;

/// Errors raised while parsing chat commands.
///
/// The display strings are shown to the player as they are.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// `/something` that is not a command.
    #[error("{0} command not recognized.")]
    Unrecognized(String),

    /// A known command with the wrong arguments.
    #[error("{0}")]
    Usage(&'static str),
}

/// Result type for command parsing.
pub type CommandResult<T> = Result<T, CommandError>;

/// Errors raised while loading or saving config and preference files.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file exists but could not be read or written.
    #[error("{}: {source}", path.display())]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The value could not be written as TOML.
    #[error("could not serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Parsed, but the values make no sense.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Result type for config and preferences.
pub type ConfigResult<T> = Result<T, ConfigError>;
