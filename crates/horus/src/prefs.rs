//! # Player Preferences
//!
//! A small TOML file next to the player: display name, mouse sensitivity
//! and mute flags. Missing keys fall back to the defaults; values are
//! sanitised on load so a hand-edited file cannot break the lobby.

use std::path::Path;

use horus_shared::constants::{DEFAULT_USERNAME, MAX_USERNAME_CHARS};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};

/// Sensitivity percentage a fresh install starts with.
pub const DEFAULT_SENSITIVITY_PERCENT: u8 = 50;

/// Mouse sensitivity at 50%.
pub const BASE_SENSITIVITY: f32 = 3.0;

/// Step of one sensitivity key press.
pub const SENSITIVITY_STEP: i32 = 2;

/// Persisted player preferences.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    username: String,
    sensitivity: u8,
    music_muted: bool,
    sound_muted: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            username: DEFAULT_USERNAME.to_owned(),
            sensitivity: DEFAULT_SENSITIVITY_PERCENT,
            music_muted: false,
            sound_muted: false,
        }
    }
}

/// Strips line breaks and cuts `name` to the username length.
#[must_use]
pub fn sanitize_username(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '\n' && *c != '\r')
        .take(MAX_USERNAME_CHARS)
        .collect::<String>()
        .trim()
        .to_owned()
}

impl Preferences {
    /// Loads `path`; a missing file gives the defaults.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] for an unreadable file and [`ConfigError::Parse`]
    /// for bad TOML.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no preferences yet");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let mut prefs: Self = toml::from_str(&text)?;
        let username = std::mem::take(&mut prefs.username);
        prefs.set_username(&username);
        prefs.sensitivity = prefs.sensitivity.min(100);
        Ok(prefs)
    }

    /// Writes the preferences to `path`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be written.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let text = toml::to_string_pretty(self)?;
        std::fs::write(path, text).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Display name.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Sets the display name; a blank name resets it to the default.
    pub fn set_username(&mut self, name: &str) {
        let clean = sanitize_username(name);
        self.username = if clean.is_empty() {
            DEFAULT_USERNAME.to_owned()
        } else {
            clean
        };
    }

    /// Sensitivity percentage (0-100).
    #[inline]
    #[must_use]
    pub const fn sensitivity_percent(&self) -> u8 {
        self.sensitivity
    }

    /// Moves the sensitivity by `delta` percent, clamped to 0-100.
    pub fn adjust_sensitivity(&mut self, delta: i32) {
        let next = (i32::from(self.sensitivity) + delta).clamp(0, 100);
        self.sensitivity = u8::try_from(next).unwrap_or(DEFAULT_SENSITIVITY_PERCENT);
    }

    /// Mouse sensitivity: `base * 2^(percent / 25 - 2)`, so 50% is `base`
    /// and every 25% doubles or halves it.
    #[must_use]
    pub fn mouse_sensitivity(&self, base: f32) -> f32 {
        base * 2f32.powf(f32::from(self.sensitivity) / 25.0 - 2.0)
    }

    /// Music is muted.
    #[inline]
    #[must_use]
    pub const fn music_muted(&self) -> bool {
        self.music_muted
    }

    /// Sound effects are muted.
    #[inline]
    #[must_use]
    pub const fn sound_muted(&self) -> bool {
        self.sound_muted
    }

    /// Mutes or unmutes the music.
    pub fn set_music_muted(&mut self, muted: bool) {
        self.music_muted = muted;
    }

    /// Mutes or unmutes sound effects.
    pub fn set_sound_muted(&mut self, muted: bool) {
        self.sound_muted = muted;
    }
}
