//! # HORUS - Session & Matchmaking
//!
//! The process-level half of a peer. [`horus_networking`] runs the match;
//! this crate gets a process into one:
//!
//! - **Lobby**: the [`Session`] state machine (query the directory, pick a
//!   host or open one, leave again)
//! - **Directory**: the HTTP host list behind [`directory::DirectoryService`]
//! - **NAT**: UPnP port forwarding behind [`nat::PortMapper`]
//! - **Jobs**: a bounded worker pool so the tick thread never blocks
//! - **Commands, config, preferences**: what the player types and keeps
//!
//! ## Example
//!
//! ```rust,ignore
//! use horus::{HostingState, MemoryBackend, Session, SessionConfig};
//! use horus::directory::InMemoryDirectory;
//! use horus::nat::DisabledPortMapper;
//!
//! let mut session = Session::new(
//!     SessionConfig::default(),
//!     "ana",
//!     MemoryBackend::new("alpha"),
//!     Box::new(InMemoryDirectory::new()),
//!     Box::new(DisabledPortMapper),
//! )?;
//! loop {
//!     session.update(1.0 / 60.0);
//!     if session.state() == HostingState::AwaitingInput {
//!         session.join()?;
//!     }
//! }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod backend;
pub mod command;
pub mod config;
pub mod directory;
pub mod error;
pub mod jobs;
pub mod lobby;
pub mod nat;
pub mod prefs;

pub use backend::{Backend, MemoryBackend, UdpBackend};
pub use command::Command;
pub use config::SessionConfig;
pub use error::{
    CommandError, ConfigError, ConfigResult, DirectoryError, DirectoryResult, NatError, NatResult, SessionError,
    SessionResult,
};
pub use jobs::{JobStatus, Pending, WorkerPool};
pub use lobby::{HostingState, PrepareStage, Session, SessionEvent};
pub use prefs::Preferences;
