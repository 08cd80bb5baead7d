//! # Directory Service
//!
//! The directory lists running hosts for matchmaking. Its HTTP contract:
//!
//! | call                | body                          | answer             |
//! |---------------------|-------------------------------|--------------------|
//! | `GET /<version>`    |                               | [`DirectoryListing`] |
//! | `POST /add`         | [`HostRecord`]                | token (plain text) |
//! | `POST /update`      | [`HostUpdate`]                |                    |
//! | `POST /delete`      | token (plain text)            |                    |
//!
//! Every call is fire-and-forget from the game's point of view: a failure
//! turns into "The master server is down" and a retry later, never an error
//! that stops a session.

mod http;
mod memory;

pub use http::HttpDirectory;
pub use memory::InMemoryDirectory;

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::error::DirectoryResult;

/// Future returned by a [`DirectoryService`].
pub type DirectoryFuture<T> = Pin<Box<dyn Future<Output = DirectoryResult<T>> + Send + 'static>>;

/// A host as published in the directory.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostRecord {
    /// Address clients connect to.
    pub guid: String,
    /// Level being played.
    pub map: String,
    /// Build version of the host.
    pub version: String,
    /// Players in the session, host included.
    pub current_players: u32,
    /// Session capacity.
    pub max_players: u32,
}

impl HostRecord {
    /// True if another player fits.
    #[must_use]
    pub const fn has_room(&self) -> bool {
        self.current_players < self.max_players
    }
}

/// Answer to `GET /<version>`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryListing {
    /// Message of the day.
    pub message: Option<String>,
    /// Players across every listed game.
    pub connections: u32,
    /// Listed games.
    #[serde(rename = "activegames")]
    pub active_games: u32,
    /// Listed hosts; `null` when there are none.
    pub servers: Option<Vec<HostRecord>>,
}

impl DirectoryListing {
    /// Listed hosts.
    #[must_use]
    pub fn servers(&self) -> &[HostRecord] {
        self.servers.as_deref().unwrap_or_default()
    }

    /// Lobby status line.
    #[must_use]
    pub fn activity(&self) -> String {
        format!(
            "Server activity : {} players in {} games",
            self.connections, self.active_games
        )
    }
}

/// Body of `POST /update`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostUpdate {
    /// 0 while running.
    pub status: u32,
    /// Token handed out by `add`.
    pub token: String,
    /// Current record.
    pub info: HostRecord,
}

impl HostUpdate {
    /// Status of a running host.
    pub const RUNNING: u32 = 0;

    /// Update for a running host.
    #[must_use]
    pub fn running(token: impl Into<String>, info: HostRecord) -> Self {
        Self {
            status: Self::RUNNING,
            token: token.into(),
            info,
        }
    }
}

/// A host directory.
pub trait DirectoryService: Send + Sync {
    /// Lists the hosts of `version`.
    fn list(&self, version: &str) -> DirectoryFuture<DirectoryListing>;

    /// Publishes `record`; resolves to the token for later updates.
    fn add(&self, record: HostRecord) -> DirectoryFuture<String>;

    /// Refreshes a published record.
    fn update(&self, update: HostUpdate) -> DirectoryFuture<()>;

    /// Removes a published record.
    fn delete(&self, token: String) -> DirectoryFuture<()>;
}
