//! # Session Configuration
//!
//! One TOML file, read once at startup. Every field has a default, so a
//! missing file, a missing section or a missing key all give the stock game:
//!
//! ```toml
//! [network]
//! port = 31414
//! max_players = 6
//!
//! [directory]
//! uri = "http://ohs.padrepio.in/"
//! lan_mode = false
//!
//! [round]
//! warmup_secs = 5.0
//! levels = ["pi_rah", "pi_jst"]
//! ```

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use horus_networking::{MovementTuning, NodeConfig, RoundConfig, UdpConfig};
use horus_shared::constants::{
    ANNOUNCE_AT_SECS, COOLDOWN_SECS, DIRECTORY_REFRESH_SECS, DIRECTORY_URI, LEVELS, ROUNDS_PER_LEVEL, ROUND_SECS,
    START_WARNING_SECS, WARMUP_SECS,
};
use horus_shared::{Vec3, BUILD_VERSION, DEFAULT_PORT, MAX_PLAYERS, SEND_RATE, TICK_RATE};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ConfigError, ConfigResult};

/// Complete session configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Hosting without a local player (the dedicated server).
    pub dedicated: bool,
    /// Seed for host choice, level picks and spawns; entropy when unset.
    pub seed: Option<u64>,
    /// Sockets and rates.
    pub network: NetworkSection,
    /// Directory service and LAN mode.
    pub directory: DirectorySection,
    /// Router port mapping.
    pub nat: NatSection,
    /// Round timings and level rotation.
    pub round: RoundSection,
    /// Background jobs.
    pub jobs: JobsSection,
}

/// `[network]`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkSection {
    /// Game port.
    pub port: u16,
    /// Players per session, host included.
    pub max_players: u32,
    /// Address the host binds to.
    pub bind_address: IpAddr,
    /// Address advertised to the directory; the bound socket when unset.
    pub public_address: Option<String>,
    /// Entity snapshots per second.
    pub send_rate: f32,
    /// Simulation steps per second.
    pub tick_rate: u32,
    /// Seconds a connect attempt may take.
    pub connect_timeout_secs: f32,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            max_players: MAX_PLAYERS,
            bind_address: IpAddr::from([0, 0, 0, 0]),
            public_address: None,
            send_rate: SEND_RATE,
            tick_rate: TICK_RATE,
            connect_timeout_secs: 5.0,
        }
    }
}

/// `[directory]`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DirectorySection {
    /// Base URI of the directory service.
    pub uri: String,
    /// Version advertised and required of chosen hosts.
    pub build_version: String,
    /// Seconds between host record refreshes.
    pub refresh_secs: f32,
    /// Seconds an HTTP request may take.
    pub request_timeout_secs: f32,
    /// Skip the directory and port mapping entirely.
    pub lan_mode: bool,
}

impl Default for DirectorySection {
    fn default() -> Self {
        Self {
            uri: DIRECTORY_URI.to_owned(),
            build_version: BUILD_VERSION.to_owned(),
            refresh_secs: DIRECTORY_REFRESH_SECS,
            request_timeout_secs: 10.0,
            lan_mode: false,
        }
    }
}

/// `[nat]`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NatSection {
    /// Ask the router to forward the game port when hosting.
    pub port_mapping: bool,
    /// Gateway search and per-mapping limit (seconds). A gateway that
    /// stays silent longer counts as a failed mapping.
    pub timeout_secs: f32,
    /// Lease asked for each mapping (seconds, 0 = until removed).
    pub lease_secs: u32,
}

impl Default for NatSection {
    fn default() -> Self {
        Self {
            port_mapping: true,
            timeout_secs: 10.0,
            lease_secs: 0,
        }
    }
}

/// `[round]`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RoundSection {
    /// Minimum warmup (seconds).
    pub warmup_secs: f32,
    /// Round length (seconds).
    pub round_secs: f32,
    /// Frozen time between rounds (seconds).
    pub cooldown_secs: f32,
    /// Rounds before the level rotates.
    pub rounds_per_level: u32,
    /// Remaining-time announcements (seconds).
    pub announce_at: Vec<u32>,
    /// "Game starts in N seconds..." lead time.
    pub start_warning_secs: f32,
    /// Allowed levels.
    pub levels: Vec<String>,
    /// Level a host starts on; random when unset.
    pub initial_level: Option<String>,
    /// Spawn points shared by every level.
    pub spawn_points: Vec<[f32; 3]>,
}

impl Default for RoundSection {
    fn default() -> Self {
        Self {
            warmup_secs: WARMUP_SECS,
            round_secs: ROUND_SECS,
            cooldown_secs: COOLDOWN_SECS,
            rounds_per_level: ROUNDS_PER_LEVEL,
            announce_at: ANNOUNCE_AT_SECS.to_vec(),
            start_warning_secs: START_WARNING_SECS,
            levels: LEVELS.iter().map(|level| (*level).to_owned()).collect(),
            initial_level: None,
            spawn_points: NodeConfig::default()
                .spawn_points
                .iter()
                .map(|point| point.to_array())
                .collect(),
        }
    }
}

/// `[jobs]`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobsSection {
    /// Worker threads for directory and port-mapping calls.
    pub workers: usize,
    /// Seconds shutdown waits for the final directory and mapping calls.
    pub shutdown_grace_secs: u64,
}

impl Default for JobsSection {
    fn default() -> Self {
        Self {
            workers: 2,
            shutdown_grace_secs: 3,
        }
    }
}

impl SessionConfig {
    /// Loads `path`. A missing file gives the defaults.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file exists but cannot be read, and
    /// [`ConfigError::Parse`]/[`ConfigError::Invalid`] for bad contents.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml_str(&text),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no session config, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for bad TOML, [`ConfigError::Invalid`] for
    /// values out of range.
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Renders the config as TOML.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Serialize`] if a value has no TOML form.
    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn validate(&self) -> ConfigResult<()> {
        let invalid = |what: &str| -> ConfigResult<()> { Err(ConfigError::Invalid(what.to_owned())) };
        if self.network.max_players < 2 {
            return invalid("network.max_players must be at least 2");
        }
        if self.network.send_rate <= 0.0 || self.network.tick_rate == 0 {
            return invalid("network rates must be positive");
        }
        if self.round.levels.is_empty() {
            return invalid("round.levels must name at least one level");
        }
        if let Some(level) = &self.round.initial_level {
            if !self.round.levels.contains(level) {
                return Err(ConfigError::Invalid(format!("round.initial_level `{level}` is not in round.levels")));
            }
        }
        if self.round.spawn_points.is_empty() {
            return invalid("round.spawn_points must not be empty");
        }
        if self.nat.timeout_secs <= 0.0 {
            return invalid("nat.timeout_secs must be positive");
        }
        if self.jobs.workers == 0 {
            return invalid("jobs.workers must be at least 1");
        }
        Ok(())
    }

    // =========================================================================
    // Derived settings
    // =========================================================================

    /// Round director settings.
    #[must_use]
    pub fn round_config(&self) -> RoundConfig {
        RoundConfig {
            warmup_secs: self.round.warmup_secs,
            round_secs: self.round.round_secs,
            cooldown_secs: self.round.cooldown_secs,
            rounds_per_level: self.round.rounds_per_level,
            announce_at: self.round.announce_at.clone(),
            start_warning_secs: self.round.start_warning_secs,
            levels: self.round.levels.clone(),
        }
    }

    /// Node settings; `initial_level` is the level a host starts on.
    #[must_use]
    pub fn node_config(&self, initial_level: Option<String>) -> NodeConfig {
        NodeConfig {
            send_rate: self.network.send_rate,
            tick_rate: self.network.tick_rate,
            round: self.round_config(),
            initial_level,
            movement: MovementTuning::default(),
            spawn_points: self
                .round
                .spawn_points
                .iter()
                .map(|point| Vec3::from_array(*point))
                .collect(),
            seed: self.seed,
        }
    }

    /// UDP link settings.
    #[must_use]
    pub fn udp_config(&self) -> UdpConfig {
        UdpConfig {
            max_peers: self.network.max_players.saturating_sub(1) as usize,
            connect_timeout: Duration::from_secs_f32(self.network.connect_timeout_secs.max(0.1)),
            ..UdpConfig::default()
        }
    }

    /// HTTP timeout for directory calls.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f32(self.directory.request_timeout_secs.max(0.1))
    }

    /// Limit on gateway search and on each port mapping request.
    #[must_use]
    pub fn nat_timeout(&self) -> Duration {
        Duration::from_secs_f32(self.nat.timeout_secs.max(0.01))
    }

    /// How long shutdown waits for its final calls.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.jobs.shutdown_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_the_stock_game() {
        let config = SessionConfig::from_toml_str("").unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.network.port, 31414);
        assert_eq!(config.network.max_players, 6);
        assert_eq!(config.directory.build_version, "19062014");
        assert_eq!(config.directory.uri, "http://ohs.padrepio.in/");
        assert!((config.directory.refresh_secs - 15.0).abs() < f32::EPSILON);
        assert!(!config.directory.lan_mode);
        assert!(config.nat.port_mapping);
        assert_eq!(config.nat_timeout(), Duration::from_secs(10));
        assert_eq!(config.nat.lease_secs, 0);
        assert_eq!(config.round.announce_at, vec![60, 30, 10]);
        assert_eq!(config.round.rounds_per_level, 2);
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = SessionConfig::from_toml_str(
            r#"
            [directory]
            lan_mode = true

            [round]
            warmup_secs = 1.5
            levels = ["pi_mar", "pi_set"]
            "#,
        )
        .unwrap();
        assert!(config.directory.lan_mode);
        assert_eq!(config.directory.build_version, "19062014");
        assert_eq!(config.round_config().levels, vec!["pi_mar", "pi_set"]);
        assert!((config.round.warmup_secs - 1.5).abs() < f32::EPSILON);
        assert_eq!(config.network.port, 31414);
    }

    #[test]
    fn test_bad_documents_are_rejected() {
        assert!(matches!(
            SessionConfig::from_toml_str("[network]\nport = \"many\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            SessionConfig::from_toml_str("[round]\nlevels = []"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SessionConfig::from_toml_str("[round]\ninitial_level = \"dust2\""),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SessionConfig::from_toml_str("[nat]\ntimeout_secs = 0.0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(SessionConfig::from_toml_str("[netwrok]\nport = 1"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let path = std::env::temp_dir().join("horus-config-that-does-not-exist.toml");
        let config = SessionConfig::load(&path).unwrap();
        assert_eq!(config, SessionConfig::default());
    }

    #[test]
    fn test_derived_settings() {
        let config = SessionConfig::default();
        let node = config.node_config(Some("pi_gho".into()));
        assert_eq!(node.initial_level.as_deref(), Some("pi_gho"));
        assert_eq!(node.spawn_points.len(), config.round.spawn_points.len());
        assert_eq!(config.udp_config().max_peers, 5);
    }

    #[test]
    fn test_round_trips_through_toml() {
        let mut config = SessionConfig::default();
        config.seed = Some(7);
        config.network.public_address = Some("203.0.113.9:31414".into());
        let text = config.to_toml_string().unwrap();
        assert_eq!(SessionConfig::from_toml_str(&text).unwrap(), config);
    }
}
