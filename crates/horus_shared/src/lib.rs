//! # HORUS Shared
//!
//! Common types used by both the host and its clients.
//!
//! ## CRITICAL RULE
//!
//! This crate holds plain data only. It must never depend on sockets,
//! runtimes or HTTP clients; those belong to `horus_networking` and `horus`.

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod constants;
pub mod math;
pub mod protocol;

pub use constants::{BUILD_VERSION, DEFAULT_PORT, MAX_PLAYERS, SEND_RATE, TICK_RATE};
pub use math::Vec3;
pub use protocol::{PeerId, RoundPhase};
