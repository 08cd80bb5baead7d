//! # Session Constants
//!
//! Stock values for a HORUS session. Every one of these can be overridden
//! from the session config file; the constants are what a missing file
//! gives you.
//!
//! **CRITICAL:** `BUILD_VERSION` gates matchmaking. Hosts advertising a
//! different version are never chosen.

// =============================================================================
// NETWORK CONFIGURATION
// =============================================================================

/// Default game port (UDP, and TCP for port mapping).
pub const DEFAULT_PORT: u16 = 31414;

/// Protocol/build version advertised to and filtered by the directory.
pub const BUILD_VERSION: &str = "19062014";

/// Directory service base URI.
pub const DIRECTORY_URI: &str = "http://ohs.padrepio.in/";

/// Maximum players in one session, host included.
pub const MAX_PLAYERS: u32 = 6;

/// Directory refresh interval for hosts (seconds).
pub const DIRECTORY_REFRESH_SECS: f32 = 15.0;

/// Entity snapshots sent per second.
pub const SEND_RATE: f32 = 15.0;

/// Simulation steps per second.
pub const TICK_RATE: u32 = 60;

/// Maximum datagram size (MTU-safe).
pub const MAX_PACKET_SIZE: usize = 1200;

// =============================================================================
// REPLICATION
// =============================================================================

/// Deltas shorter than this are treated as converged.
pub const CONVERGENCE_EPSILON: f32 = 0.01;

// =============================================================================
// ROUND LIFECYCLE
// =============================================================================

/// Warmup length before a round may start (seconds).
pub const WARMUP_SECS: f32 = 5.0;

/// Length of one round (seconds).
pub const ROUND_SECS: f32 = 300.0;

/// Frozen time between rounds (seconds).
pub const COOLDOWN_SECS: f32 = 20.0;

/// Rounds played on one level before rotating.
pub const ROUNDS_PER_LEVEL: u32 = 2;

/// Remaining-time announcements during a round (seconds).
pub const ANNOUNCE_AT_SECS: [u32; 3] = [60, 30, 10];

/// "Game starts in N seconds..." is announced when this much cooldown is left.
pub const START_WARNING_SECS: f32 = 5.0;

/// Levels a session rotates through.
pub const LEVELS: [&str; 6] = ["pi_rah", "pi_jst", "pi_mar", "pi_ven", "pi_gho", "pi_set"];

// =============================================================================
// PLAYERS & CHAT
// =============================================================================

/// Display name used when none was chosen.
pub const DEFAULT_USERNAME: &str = "Anon";

/// Usernames are cut to this many characters.
pub const MAX_USERNAME_CHARS: usize = 24;

/// Chat lines kept in the log.
pub const CHAT_CAPACITY: usize = 60;

/// Seconds a chat line stays visible.
pub const CHAT_VISIBLE_SECS: f32 = 15.0;
