//! In-process directory for tests and LAN rigs.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{DirectoryFuture, DirectoryListing, DirectoryService, HostRecord, HostUpdate};
use crate::error::DirectoryError;

#[derive(Debug)]
struct Listed {
    record: HostRecord,
    updates: u32,
}

#[derive(Debug, Default)]
struct DirectoryState {
    hosts: BTreeMap<String, Listed>,
    next_token: u64,
    offline: bool,
}

/// A directory held in memory. Clones share the same listing.
///
/// Lists every host whatever its version; choosing a compatible one is the
/// client's job.
#[derive(Clone, Debug, Default)]
pub struct InMemoryDirectory {
    state: Arc<Mutex<DirectoryState>>,
}

impl InMemoryDirectory {
    /// An empty, reachable directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the directory down (every call fails) or brings it back.
    pub fn set_online(&self, online: bool) {
        self.state.lock().offline = !online;
    }

    /// Lists `record` directly and returns its token.
    pub fn insert(&self, record: HostRecord) -> String {
        let mut state = self.state.lock();
        state.next_token += 1;
        let token = format!("token-{}", state.next_token);
        state.hosts.insert(token.clone(), Listed { record, updates: 0 });
        token
    }

    /// Every listed record.
    #[must_use]
    pub fn records(&self) -> Vec<HostRecord> {
        self.state
            .lock()
            .hosts
            .values()
            .map(|listed| listed.record.clone())
            .collect()
    }

    /// Record published under `token`.
    #[must_use]
    pub fn record(&self, token: &str) -> Option<HostRecord> {
        self.state.lock().hosts.get(token).map(|listed| listed.record.clone())
    }

    /// Updates received for `token`.
    #[must_use]
    pub fn updates(&self, token: &str) -> u32 {
        self.state.lock().hosts.get(token).map_or(0, |listed| listed.updates)
    }

    /// Tokens of every listed host.
    #[must_use]
    pub fn tokens(&self) -> Vec<String> {
        self.state.lock().hosts.keys().cloned().collect()
    }
}

impl DirectoryService for InMemoryDirectory {
    fn list(&self, _version: &str) -> DirectoryFuture<DirectoryListing> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            let state = state.lock();
            if state.offline {
                return Err(DirectoryError::Unreachable);
            }
            let servers: Vec<HostRecord> = state.hosts.values().map(|listed| listed.record.clone()).collect();
            Ok(DirectoryListing {
                message: None,
                connections: servers.iter().map(|record| record.current_players).sum(),
                active_games: u32::try_from(servers.len()).unwrap_or(u32::MAX),
                servers: Some(servers),
            })
        })
    }

    fn add(&self, record: HostRecord) -> DirectoryFuture<String> {
        let directory = self.clone();
        Box::pin(async move {
            if directory.state.lock().offline {
                return Err(DirectoryError::Unreachable);
            }
            Ok(directory.insert(record))
        })
    }

    fn update(&self, update: HostUpdate) -> DirectoryFuture<()> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            let mut state = state.lock();
            if state.offline {
                return Err(DirectoryError::Unreachable);
            }
            let listed = state
                .hosts
                .get_mut(&update.token)
                .ok_or(DirectoryError::UnknownToken(update.token))?;
            listed.record = update.info;
            listed.updates += 1;
            Ok(())
        })
    }

    fn delete(&self, token: String) -> DirectoryFuture<()> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            let mut state = state.lock();
            if state.offline {
                return Err(DirectoryError::Unreachable);
            }
            state
                .hosts
                .remove(&token)
                .map(|_| ())
                .ok_or(DirectoryError::UnknownToken(token))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::WorkerPool;
    use std::time::Duration;

    fn record(guid: &str, players: u32) -> HostRecord {
        HostRecord {
            guid: guid.into(),
            map: "pi_rah".into(),
            version: "19062014".into(),
            current_players: players,
            max_players: 6,
        }
    }

    #[test]
    fn test_add_update_delete() {
        let pool = WorkerPool::new(1).unwrap();
        let directory = InMemoryDirectory::new();
        let wait = Duration::from_secs(1);

        let token = pool.block_on("add", wait, directory.add(record("a", 1))).unwrap().unwrap();
        let listing = pool.block_on("list", wait, directory.list("19062014")).unwrap().unwrap();
        assert_eq!(listing.active_games, 1);
        assert_eq!(listing.connections, 1);

        pool.block_on("update", wait, directory.update(HostUpdate::running(token.clone(), record("a", 4))))
            .unwrap()
            .unwrap();
        assert_eq!(directory.record(&token).map(|r| r.current_players), Some(4));
        assert_eq!(directory.updates(&token), 1);

        pool.block_on("delete", wait, directory.delete(token.clone())).unwrap().unwrap();
        assert!(directory.records().is_empty());
        assert!(matches!(
            pool.block_on("delete", wait, directory.delete(token)).unwrap(),
            Err(DirectoryError::UnknownToken(_))
        ));
    }

    #[test]
    fn test_offline_directory_fails_every_call() {
        let pool = WorkerPool::new(1).unwrap();
        let directory = InMemoryDirectory::new();
        directory.insert(record("a", 1));
        directory.set_online(false);
        let wait = Duration::from_secs(1);
        assert!(matches!(
            pool.block_on("list", wait, directory.list("19062014")).unwrap(),
            Err(DirectoryError::Unreachable)
        ));
        assert!(pool.block_on("add", wait, directory.add(record("b", 1))).unwrap().is_err());
        directory.set_online(true);
        assert!(pool.block_on("list", wait, directory.list("19062014")).unwrap().is_ok());
    }
}
