//! The hosting state machine.

use std::collections::BTreeSet;
use std::fmt;

use horus_networking::{NetError, Node, NodeEvent, PlayerProfile};
use horus_shared::constants::DEFAULT_USERNAME;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use super::{choose_host, HostingState, PrepareStage, SessionEvent};
use crate::backend::Backend;
use crate::command::{self, Command};
use crate::config::SessionConfig;
use crate::directory::{DirectoryListing, DirectoryService, HostRecord, HostUpdate};
use crate::error::{DirectoryError, DirectoryResult, NatError, NatResult, SessionError, SessionResult};
use crate::jobs::{JobStatus, Pending, WorkerPool};
use crate::nat::{validate_mapping, PortMapper, PortMapping, Protocol};
use crate::prefs::sanitize_username;

/// Transitions one `advance` may chain before yielding to the next frame.
const MAX_TRANSITIONS_PER_FRAME: usize = 8;

/// A job tagged with the state epoch it was started in. Its result is only
/// acted on while the session is still in that epoch.
struct Guarded<T> {
    pending: Pending<T>,
    epoch: u64,
}

/// Finished job: its epoch and its result (`None` if the job was lost).
type Finished<T> = (u64, Option<T>);

fn take_finished<T>(slot: &mut Option<Guarded<T>>) -> Option<Finished<T>> {
    let job = slot.as_mut()?;
    let result = match job.pending.poll() {
        JobStatus::Running => return None,
        JobStatus::Done(value) => Some(value),
        JobStatus::Lost => {
            warn!(job = job.pending.what(), "job ended without a result");
            None
        }
    };
    let epoch = job.epoch;
    *slot = None;
    Some((epoch, result))
}

type MappingResults = Vec<(PortMapping, NatResult<PortMapping>)>;

#[derive(Clone, Debug)]
struct Dial {
    address: String,
    /// Picked from the directory (blacklisted on failure) rather than typed.
    listed: bool,
}

/// One process's path through the lobby: querying the directory, hosting
/// or joining, and leaving again.
///
/// Drive it with [`Session::update`] once per frame. Directory and gateway
/// calls run on the worker pool; their results are picked up by later
/// updates and ignored if the session moved on in the meantime.
pub struct Session<B: Backend> {
    config: SessionConfig,
    backend: B,
    directory: Box<dyn DirectoryService>,
    mapper: Box<dyn PortMapper>,
    pool: WorkerPool,
    rng: StdRng,

    state: HostingState,
    epoch: u64,
    status: String,
    events: Vec<SessionEvent>,
    quit: bool,

    username: String,
    guid: String,

    listing: Option<DirectoryListing>,
    directory_down: bool,
    blacklist: BTreeSet<String>,
    dial: Option<Dial>,
    listing_job: Option<Guarded<DirectoryResult<DirectoryListing>>>,

    mapping_job: Option<Guarded<MappingResults>>,
    mappings: Vec<PortMapping>,
    record: Option<HostRecord>,
    token: Option<String>,
    add_jobs: Vec<Guarded<DirectoryResult<String>>>,
    update_job: Option<Pending<DirectoryResult<()>>>,
    since_refresh: f32,
    last_clients: u32,
    last_level: String,

    node: Option<Node<B::Transport>>,
}

impl<B: Backend> fmt::Debug for Session<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("status", &self.status)
            .field("username", &self.username)
            .field("token", &self.token)
            .field("blacklist", &self.blacklist)
            .finish_non_exhaustive()
    }
}

impl<B: Backend> Session<B> {
    /// Creates a session in [`HostingState::Startup`]. Nothing happens until
    /// the first [`Session::update`].
    ///
    /// # Errors
    ///
    /// [`SessionError::WorkerPool`] if the worker threads cannot start.
    pub fn new(
        config: SessionConfig,
        username: &str,
        backend: B,
        directory: Box<dyn DirectoryService>,
        mapper: Box<dyn PortMapper>,
    ) -> SessionResult<Self> {
        let pool = WorkerPool::new(config.jobs.workers)?;
        let mut rng = config.seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        let guid = format!("{:016x}", rng.gen::<u64>());
        let mut session = Self {
            config,
            backend,
            directory,
            mapper,
            pool,
            rng,
            state: HostingState::Startup,
            epoch: 0,
            status: String::new(),
            events: Vec::new(),
            quit: false,
            username: String::new(),
            guid,
            listing: None,
            directory_down: false,
            blacklist: BTreeSet::new(),
            dial: None,
            listing_job: None,
            mapping_job: None,
            mappings: Vec::new(),
            record: None,
            token: None,
            add_jobs: Vec::new(),
            update_job: None,
            since_refresh: 0.0,
            last_clients: 0,
            last_level: String::new(),
            node: None,
        };
        session.set_username(username);
        Ok(session)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Current state.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> HostingState {
        self.state
    }

    /// Status line for the lobby screen.
    #[must_use]
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Settings the session was created with.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Directory and port mapping are skipped.
    #[inline]
    #[must_use]
    pub const fn is_lan(&self) -> bool {
        self.config.directory.lan_mode
    }

    /// Last host list received.
    #[must_use]
    pub const fn listing(&self) -> Option<&DirectoryListing> {
        self.listing.as_ref()
    }

    /// The last directory call failed.
    #[must_use]
    pub const fn directory_down(&self) -> bool {
        self.directory_down
    }

    /// Hosts that failed to accept us this run.
    #[must_use]
    pub const fn blacklist(&self) -> &BTreeSet<String> {
        &self.blacklist
    }

    /// Name used for the next game joined or hosted.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Sets the name used for the next game; blank names become the default.
    pub fn set_username(&mut self, name: &str) {
        let name = sanitize_username(name);
        self.username = if name.is_empty() { DEFAULT_USERNAME.to_owned() } else { name };
    }

    /// Player guid of this process.
    #[must_use]
    pub fn guid(&self) -> &str {
        &self.guid
    }

    /// Running node, host or client.
    #[must_use]
    pub const fn node(&self) -> Option<&Node<B::Transport>> {
        self.node.as_ref()
    }

    /// Running node, mutably (input, effects).
    pub fn node_mut(&mut self) -> Option<&mut Node<B::Transport>> {
        self.node.as_mut()
    }

    /// Directory token of our listed host.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Record last published for our host.
    #[must_use]
    pub const fn published(&self) -> Option<&HostRecord> {
        self.record.as_ref()
    }

    /// Port mappings installed on the gateway.
    #[must_use]
    pub fn port_mappings(&self) -> &[PortMapping] {
        &self.mappings
    }

    /// `/quit` was entered.
    #[must_use]
    pub const fn quit_requested(&self) -> bool {
        self.quit
    }

    /// The worker pool, for callers that need their own background jobs.
    #[must_use]
    pub const fn jobs(&self) -> &WorkerPool {
        &self.pool
    }

    /// Takes the events raised since the last call.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Starts hosting from the lobby.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidState`] outside [`HostingState::AwaitingInput`].
    pub fn host(&mut self) -> SessionResult<()> {
        self.require_lobby("host")?;
        self.enter(HostingState::PreparingToHost(PrepareStage::DiscoveringNat));
        self.advance();
        Ok(())
    }

    /// Joins the emptiest compatible host of the last listing.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidState`] outside [`HostingState::AwaitingInput`].
    pub fn join(&mut self) -> SessionResult<()> {
        self.require_lobby("join")?;
        self.enter(HostingState::ChoosingHost);
        self.advance();
        Ok(())
    }

    /// Leaves whatever is running and connects to `address`.
    ///
    /// # Errors
    ///
    /// [`SessionError::NoAddress`] if `address` is blank.
    pub fn connect(&mut self, address: &str) -> SessionResult<()> {
        let address = address.trim();
        if address.is_empty() {
            return Err(SessionError::NoAddress);
        }
        if self.node.is_some() {
            self.end_session(None);
        }
        info!(address, "connecting by address");
        self.dial = Some(Dial {
            address: address.to_owned(),
            listed: false,
        });
        self.enter(HostingState::Connecting);
        self.advance();
        Ok(())
    }

    /// Leaves the game, or abandons hosting or joining, and goes back to
    /// the lobby.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotInSession`] when nothing is running.
    pub fn leave(&mut self) -> SessionResult<()> {
        if matches!(
            self.state,
            HostingState::Startup | HostingState::QueryingDirectory | HostingState::AwaitingInput
        ) {
            return Err(SessionError::NotInSession);
        }
        self.end_session(None);
        self.advance();
        Ok(())
    }

    /// Queries the directory again.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidState`] outside [`HostingState::AwaitingInput`].
    pub fn refresh(&mut self) -> SessionResult<()> {
        self.require_lobby("refresh")?;
        self.enter(HostingState::Startup);
        self.advance();
        Ok(())
    }

    /// Handles one line of chat input: a command or a chat message.
    /// Problems are reported as notices.
    pub fn submit(&mut self, input: &str) {
        match command::parse(input) {
            Ok(None) => {}
            Ok(Some(command)) => self.execute(command),
            Err(err) => self.notify(err.to_string()),
        }
    }

    /// Ends the session for good: disconnects, removes the directory entry
    /// and deletes port mappings, waiting up to the configured grace period
    /// for each call.
    pub fn shutdown(&mut self) {
        info!(state = ?self.state, "shutting down session");
        let grace = self.config.shutdown_grace();
        if let Some(mut node) = self.node.take() {
            node.disconnect();
        }
        self.listing_job = None;
        self.update_job = None;
        self.dial = None;
        self.record = None;

        if let Some(job) = self.mapping_job.take() {
            if let Some(results) = self.pool.wait_for(job.pending, grace) {
                self.record_mappings(results);
            }
        }
        for job in std::mem::take(&mut self.add_jobs) {
            if let Some(Ok(token)) = self.pool.wait_for(job.pending, grace) {
                debug!(%token, "late directory entry");
                self.token.get_or_insert(token);
            }
        }

        if let Some(token) = self.token.take() {
            match self.pool.block_on("directory delete", grace, self.directory.delete(token)) {
                Some(Ok(())) => info!("removed from the directory"),
                Some(Err(err)) => warn!(%err, "could not remove the directory entry"),
                None => {}
            }
        }
        for mapping in std::mem::take(&mut self.mappings) {
            let protocol = mapping.protocol;
            let port = mapping.public_port;
            match self.pool.block_on("port unmap", grace, self.mapper.unmap_port(mapping)) {
                Some(Ok(())) => debug!(%protocol, port, "port mapping deleted"),
                Some(Err(err)) => warn!(%err, %protocol, port, "could not delete port mapping"),
                None => {}
            }
        }
        self.enter(HostingState::Startup);
    }

    fn require_lobby(&self, action: &'static str) -> SessionResult<()> {
        if self.state == HostingState::AwaitingInput {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                action,
                state: self.state,
            })
        }
    }

    fn execute(&mut self, command: Command) {
        match command {
            Command::Chat(text) => match self.node.as_mut() {
                Some(node) => node.send_chat(&text),
                None => debug!("chat outside a game dropped"),
            },
            Command::Map(level) => self.change_level(&level),
            Command::Spectate => self.spectate(true),
            Command::Join => self.spectate(false),
            Command::Connect(address) => {
                if let Err(err) = self.connect(&address) {
                    self.notify(err.to_string());
                }
            }
            Command::Leave => {
                if let Err(err) = self.leave() {
                    self.notify(err.to_string());
                }
            }
            Command::Quit => {
                info!("quit requested");
                self.quit = true;
                self.events.push(SessionEvent::QuitRequested);
            }
        }
    }

    fn change_level(&mut self, level: &str) {
        let Some(node) = self.node.as_mut().filter(|node| node.is_host()) else {
            self.notify("Map change is only allowed on server.");
            return;
        };
        match node.change_level(level) {
            Ok(()) => info!(level, "level changed by command"),
            Err(err @ NetError::UnknownLevel(_)) => {
                let known = self.config.round.levels.join(", ");
                self.notify(format!("{err} [{known}]"));
            }
            Err(err) => self.notify(err.to_string()),
        }
    }

    fn spectate(&mut self, spectating: bool) {
        let Some(node) = self.node.as_mut() else {
            self.notify("Not in a game.");
            return;
        };
        if !node.set_spectating(spectating) {
            self.notify(if spectating { "Already spectating!" } else { "Already in-game!" });
        }
    }

    // =========================================================================
    // Frame
    // =========================================================================

    /// Runs one frame of `dt` seconds.
    pub fn update(&mut self, dt: f32) {
        self.poll_jobs();
        self.update_node(dt);
        self.advance();
        self.refresh_listing(dt);
    }

    fn enter(&mut self, to: HostingState) {
        let from = self.state;
        self.state = to;
        self.epoch += 1;
        self.status = self.status_for(to);
        debug!(?from, ?to, "session state");
        self.events.push(SessionEvent::StateChanged { from, to });
    }

    fn status_for(&self, state: HostingState) -> String {
        match state {
            HostingState::Startup => String::new(),
            HostingState::QueryingDirectory => "Waiting for servers...".to_owned(),
            HostingState::AwaitingInput => {
                if self.is_lan() {
                    "Lan Mode - Master server is disabled".to_owned()
                } else if self.directory_down {
                    "The master server is down".to_owned()
                } else {
                    self.listing.as_ref().map(DirectoryListing::activity).unwrap_or_default()
                }
            }
            HostingState::ChoosingHost => "Choosing server...".to_owned(),
            HostingState::Connecting => "Connecting to server...".to_owned(),
            HostingState::PreparingToHost(PrepareStage::DiscoveringNat) => "Discovering NAT...".to_owned(),
            HostingState::PreparingToHost(PrepareStage::WaitingForNat) => "Waiting for NAT...".to_owned(),
            HostingState::PreparingToHost(PrepareStage::Ready) => "Attempting to host...".to_owned(),
            HostingState::Hosting => "Hosting".to_owned(),
            HostingState::Connected => "Connected".to_owned(),
        }
    }

    fn notify(&mut self, text: impl Into<String>) {
        let text = text.into();
        if let Some(node) = self.node.as_mut() {
            node.chat_mut().notice(&text);
        }
        self.events.push(SessionEvent::Notice(text));
    }

    /// Runs the automatic transitions until the state settles.
    fn advance(&mut self) {
        for _ in 0..MAX_TRANSITIONS_PER_FRAME {
            let before = self.epoch;
            match self.state {
                HostingState::Startup => self.query_directory(),
                HostingState::ChoosingHost => self.pick_host(),
                HostingState::Connecting if self.node.is_none() => self.dial(),
                HostingState::PreparingToHost(PrepareStage::DiscoveringNat) => self.discover_nat(),
                HostingState::PreparingToHost(PrepareStage::Ready) => self.open_host(),
                _ => {}
            }
            if self.epoch == before {
                return;
            }
        }
    }

    // =========================================================================
    // Joining
    // =========================================================================

    fn query_directory(&mut self) {
        if self.is_lan() {
            self.listing = None;
            self.enter(HostingState::AwaitingInput);
            return;
        }
        let job = self.directory.list(&self.config.directory.build_version);
        self.enter(HostingState::QueryingDirectory);
        self.listing_job = Some(Guarded {
            pending: self.pool.spawn("directory list", job),
            epoch: self.epoch,
        });
    }

    fn poll_listing(&mut self) {
        let Some((epoch, result)) = take_finished(&mut self.listing_job) else {
            return;
        };
        if epoch != self.epoch {
            debug!("discarding a superseded host list");
            return;
        }
        match result.unwrap_or(Err(DirectoryError::Unreachable)) {
            Ok(listing) => {
                debug!(servers = listing.servers().len(), "host list received");
                self.directory_down = false;
                self.listing = Some(listing);
            }
            Err(err) => {
                warn!(%err, "directory is down");
                self.directory_down = true;
                self.listing = None;
            }
        }
        self.enter(HostingState::AwaitingInput);
    }

    fn pick_host(&mut self) {
        let chosen = self.listing.as_ref().and_then(|listing| {
            choose_host(
                listing.servers(),
                &self.config.directory.build_version,
                &self.blacklist,
                &mut self.rng,
            )
            .map(|host| host.guid.clone())
        });
        match chosen {
            Some(address) => {
                info!(%address, "joining listed host");
                self.dial = Some(Dial { address, listed: true });
                self.enter(HostingState::Connecting);
            }
            None => {
                info!("no joinable host, asking the directory again");
                self.listing = None;
                self.notify("No open game found.");
                self.enter(HostingState::Startup);
            }
        }
    }

    fn dial(&mut self) {
        let Some(dial) = self.dial.clone() else {
            self.enter(HostingState::Startup);
            return;
        };
        match self.backend.connect(&dial.address, self.config.network.port) {
            Ok(transport) => {
                let profile = PlayerProfile::new(self.username.clone(), self.guid.clone());
                self.node = Some(Node::client(transport, self.config.node_config(None), profile));
            }
            Err(err) => self.connect_failed(&err.to_string()),
        }
    }

    fn connect_failed(&mut self, reason: &str) {
        self.node = None;
        let Some(dial) = self.dial.take() else {
            self.enter(HostingState::Startup);
            return;
        };
        warn!(address = %dial.address, reason, "could not connect");
        if dial.listed {
            self.blacklist.insert(dial.address);
            self.enter(HostingState::ChoosingHost);
        } else {
            self.notify(format!("Could not connect to {}.", dial.address));
            self.enter(HostingState::Startup);
        }
    }

    // =========================================================================
    // Hosting
    // =========================================================================

    fn discover_nat(&mut self) {
        if self.is_lan() || !self.config.nat.port_mapping || !self.mapper.enabled() {
            self.enter(HostingState::PreparingToHost(PrepareStage::Ready));
            return;
        }
        let port = self.config.network.port;
        let limit = self.config.nat_timeout();
        let requests: Vec<_> = [Protocol::Udp, Protocol::Tcp]
            .into_iter()
            .map(|protocol| {
                let mapping = PortMapping::game(protocol, port);
                let future = self.mapper.map_port(mapping.clone());
                (mapping, future)
            })
            .collect();
        let job = async move {
            let mut results = Vec::with_capacity(requests.len());
            for (mapping, future) in requests {
                let result = tokio::time::timeout(limit, future).await.unwrap_or_else(|_| {
                    Err(NatError::TimedOut {
                        protocol: mapping.protocol,
                        port: mapping.public_port,
                    })
                });
                results.push((mapping, result));
            }
            results
        };
        self.enter(HostingState::PreparingToHost(PrepareStage::WaitingForNat));
        self.mapping_job = Some(Guarded {
            pending: self.pool.spawn("port mapping", job),
            epoch: self.epoch,
        });
    }

    fn poll_mapping(&mut self) {
        let Some((epoch, results)) = take_finished(&mut self.mapping_job) else {
            return;
        };
        if let Some(results) = results {
            self.record_mappings(results);
        }
        if epoch == self.epoch {
            self.enter(HostingState::PreparingToHost(PrepareStage::Ready));
        }
    }

    /// Keeps every mapping the gateway installed, valid or not, so it can be
    /// deleted on shutdown.
    fn record_mappings(&mut self, results: MappingResults) {
        let requested = results.len();
        let mut valid = 0;
        for (request, result) in results {
            match result {
                Ok(installed) => {
                    match validate_mapping(&request, &installed) {
                        Ok(()) => valid += 1,
                        Err(err) => warn!(%err, "gateway installed a different mapping"),
                    }
                    self.mappings.push(installed);
                }
                Err(err) => warn!(%err, protocol = %request.protocol, "port mapping failed"),
            }
        }
        if valid == requested {
            info!(port = self.config.network.port, "game port mapped");
        } else if valid > 0 {
            info!("some port mappings failed, hosting anyway");
        } else {
            info!("port mapping failed, hosting anyway");
        }
    }

    fn open_host(&mut self) {
        let level = self
            .config
            .round
            .initial_level
            .clone()
            .or_else(|| self.config.round.levels.choose(&mut self.rng).cloned());
        let profile =
            (!self.config.dedicated).then(|| PlayerProfile::new(self.username.clone(), self.guid.clone()));
        let node_config = self.config.node_config(level);
        let opened = self
            .backend
            .host(self.config.network.port)
            .and_then(|(transport, address)| Node::host(transport, node_config, profile).map(|node| (node, address)));

        match opened {
            Ok((node, address)) => {
                let level = node.level().unwrap_or_default().to_owned();
                info!(%address, %level, dedicated = self.config.dedicated, "hosting");
                self.record = Some(HostRecord {
                    guid: address,
                    map: level.clone(),
                    version: self.config.directory.build_version.clone(),
                    current_players: u32::from(!self.config.dedicated),
                    max_players: self.config.network.max_players,
                });
                self.last_clients = 0;
                self.last_level = level;
                self.since_refresh = self.config.directory.refresh_secs;
                self.node = Some(node);
                self.enter(HostingState::Hosting);
                self.publish();
            }
            Err(err) => {
                warn!(%err, "could not open a host");
                self.notify(format!("Could not host: {err}"));
                self.enter(HostingState::Startup);
            }
        }
    }

    /// Sends the current record: `add` until a token is known, `update`
    /// afterwards.
    fn publish(&mut self) {
        if self.is_lan() {
            return;
        }
        let Some(record) = self.record.clone() else {
            return;
        };
        match self.token.clone() {
            None => {
                if self.add_jobs.iter().any(|job| job.epoch == self.epoch) {
                    debug!("directory add already running");
                    return;
                }
                let job = self.directory.add(record);
                self.add_jobs.push(Guarded {
                    pending: self.pool.spawn("directory add", job),
                    epoch: self.epoch,
                });
            }
            Some(token) => {
                if self.update_job.is_some() {
                    debug!("previous directory update still running");
                    return;
                }
                let job = self.directory.update(HostUpdate::running(token, record));
                self.update_job = Some(self.pool.spawn("directory update", job));
            }
        }
    }

    fn refresh_listing(&mut self, dt: f32) {
        if self.state != HostingState::Hosting {
            return;
        }
        let Some(node) = self.node.as_ref() else {
            return;
        };
        let clients = node.router().map_or(0, |router| router.peer_count());
        let clients = u32::try_from(clients).unwrap_or(u32::MAX);
        let level = node.level().unwrap_or_default().to_owned();

        self.since_refresh -= dt;
        if clients == self.last_clients && level == self.last_level && self.since_refresh > 0.0 {
            return;
        }
        self.since_refresh = self.config.directory.refresh_secs;
        self.last_clients = clients;
        if let Some(record) = self.record.as_mut() {
            record.current_players = clients + u32::from(!self.config.dedicated);
            record.map.clone_from(&level);
        }
        self.last_level = level;
        self.publish();
    }

    fn poll_directory_writes(&mut self) {
        let mut finished = Vec::new();
        self.add_jobs.retain_mut(|job| match job.pending.poll() {
            JobStatus::Running => true,
            JobStatus::Done(result) => {
                finished.push((job.epoch, result));
                false
            }
            JobStatus::Lost => false,
        });
        for (epoch, result) in finished {
            let current = epoch == self.epoch && self.state == HostingState::Hosting;
            match result {
                Ok(token) if current && self.token.is_none() => {
                    info!(%token, "listed in the directory");
                    self.directory_down = false;
                    self.token = Some(token);
                }
                Ok(token) => {
                    debug!(%token, "withdrawing a stale directory entry");
                    self.pool.detach("directory delete", self.directory.delete(token));
                }
                Err(err) if current => {
                    warn!(%err, "could not list the host, retrying at the next refresh");
                    self.directory_down = true;
                }
                Err(err) => debug!(%err, "stale directory add failed"),
            }
        }

        let Some(job) = self.update_job.as_mut() else {
            return;
        };
        let result = match job.poll() {
            JobStatus::Running => return,
            JobStatus::Done(result) => result,
            JobStatus::Lost => Err(DirectoryError::Unreachable),
        };
        self.update_job = None;
        match result {
            Ok(()) => self.directory_down = false,
            Err(DirectoryError::UnknownToken(token)) => {
                warn!(%token, "directory forgot our entry, listing again");
                self.token = None;
            }
            Err(err) => {
                warn!(%err, "directory update failed, retrying at the next refresh");
                self.directory_down = true;
            }
        }
    }

    // =========================================================================
    // Node
    // =========================================================================

    fn poll_jobs(&mut self) {
        self.poll_listing();
        self.poll_mapping();
        self.poll_directory_writes();
    }

    fn update_node(&mut self, dt: f32) {
        let Some(node) = self.node.as_mut() else {
            return;
        };
        node.update(dt);
        for event in node.drain_events() {
            self.on_node_event(&event);
            self.events.push(SessionEvent::Node(event));
        }
    }

    fn on_node_event(&mut self, event: &NodeEvent) {
        match event {
            NodeEvent::Connected(peer) if self.state == HostingState::Connecting => {
                info!(%peer, "joined the game");
                self.enter(HostingState::Connected);
            }
            NodeEvent::ConnectFailed if self.state == HostingState::Connecting => {
                self.connect_failed("handshake failed");
            }
            NodeEvent::Disconnected if self.state == HostingState::Connected => {
                warn!("lost connection to the host");
                self.end_session(Some("Lost connection to the server.".to_owned()));
            }
            _ => {}
        }
    }

    /// Stops the node, withdraws our directory entry and returns to
    /// [`HostingState::Startup`]. Port mappings stay until shutdown.
    fn end_session(&mut self, reason: Option<String>) {
        if let Some(mut node) = self.node.take() {
            node.disconnect();
        }
        if let Some(token) = self.token.take() {
            self.pool.detach("directory delete", self.directory.delete(token));
        }
        self.record = None;
        self.update_job = None;
        self.dial = None;
        if let Some(reason) = reason {
            self.notify(reason);
        }
        self.enter(HostingState::Startup);
    }
}
