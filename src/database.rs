//! Database coordinator
//!
//! Owns the repository configuration, one connection per repository and the
//! migration registry. Consumers call [`Database::setup`] once, then reach
//! repositories through [`Database::with_repository`] or [`Database::map`].
//!
//! ```no_run
//! use reconbase::{Database, Settings};
//!
//! # fn main() -> reconbase::Result<()> {
//! let db = Database::new(Settings::from_env()?)?;
//! db.setup()?;
//!
//! let hosts = db.with_repository("default", |session| {
//!     session.count_rows("ronin_host_names")
//! })?;
//! # Ok(())
//! # }
//! ```

use crate::config::{RepositoryConfig, Settings, DEFAULT_REPOSITORY};
use crate::migrations::{builtin, MigrationRegistry, MigrationStatus};
use crate::storage::{SqliteStore, StoreStats};
use crate::{logging, Error, Result};
use rusqlite::{Connection, Params, Row, Transaction};
use std::sync::{Arc, Mutex, RwLock};

/// Lifecycle of a [`Database`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// No connections are open
    Unconfigured,
    /// Logging is ready and every configured repository is open
    Configured,
    /// Migrations have been applied since the connections were opened
    Migrated,
}

type SharedStore = Arc<Mutex<SqliteStore>>;

pub struct Database {
    settings: Settings,
    config: RepositoryConfig,
    registry: MigrationRegistry,
    connections: RwLock<Vec<(String, SharedStore)>>,
    state: RwLock<State>,
}

impl Database {
    /// A coordinator using the built-in migrations
    pub fn new(settings: Settings) -> Result<Self> {
        Ok(Self::with_registry(settings, builtin::registry()?))
    }

    pub fn from_env() -> Result<Self> {
        Self::new(Settings::from_env()?)
    }

    pub fn with_registry(settings: Settings, registry: MigrationRegistry) -> Self {
        let config = RepositoryConfig::new(
            settings.config_path.clone(),
            settings.default_repository.clone(),
        );
        Self {
            settings,
            config,
            registry,
            connections: RwLock::new(Vec::new()),
            state: RwLock::new(State::Unconfigured),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    pub fn state(&self) -> State {
        self.state.read().map(|state| *state).unwrap_or(State::Unconfigured)
    }

    /// Configure logging, open every configured repository and apply
    /// pending migrations. Safe to call more than once.
    ///
    /// Returns whether any migration ran.
    pub fn setup(&self) -> Result<bool> {
        self.connect()?;
        self.upgrade()
    }

    /// Configure logging and open every configured repository without
    /// migrating. Repositories that are already open are left alone.
    pub fn connect(&self) -> Result<()> {
        logging::init(&self.settings.log)?;

        let repositories = self.config.list()?;
        let mut connections = self.connections.write().map_err(|_| poisoned("connections"))?;

        for (name, uri) in repositories.iter() {
            if connections.iter().any(|(open, _)| open == name) {
                continue;
            }
            let store = SqliteStore::open(uri)?;
            tracing::info!("Opened repository {} at {}", name, uri);
            connections.push((name.to_string(), Arc::new(Mutex::new(store))));
        }

        let mut state = self.state.write().map_err(|_| poisoned("state"))?;
        if *state == State::Unconfigured {
            *state = State::Configured;
        }
        Ok(())
    }

    /// Apply pending migrations to every open repository.
    ///
    /// Returns `false` without error when the database is not set up.
    pub fn upgrade(&self) -> Result<bool> {
        if !self.is_setup(DEFAULT_REPOSITORY) {
            return Ok(false);
        }

        let mut migrated = false;
        for (name, store) in self.open_stores()? {
            let _span = tracing::info_span!("repository", name = %name).entered();
            let mut store = store.lock().map_err(|_| Error::LockPoisoned(name.clone()))?;

            let applied = self.registry.migrate_up(&mut store)?;
            if !applied.is_empty() {
                tracing::info!("Applied {} migrations to {}", applied.len(), name);
                migrated = true;
            }
        }

        *self.state.write().map_err(|_| poisoned("state"))? = State::Migrated;
        Ok(migrated)
    }

    /// Whether a connection to `name` is open
    pub fn is_setup(&self, name: &str) -> bool {
        self.connections
            .read()
            .map(|connections| connections.iter().any(|(open, _)| open == name))
            .unwrap_or(false)
    }

    /// Scoped access to one repository
    pub fn repository(&self, name: &str) -> Result<Repository> {
        let store = self.store(name)?;
        Ok(Repository {
            name: name.to_string(),
            store,
        })
    }

    /// Run `f` with `name`'s connection locked and return its result
    pub fn with_repository<T, F>(&self, name: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Session<'_>) -> Result<T>,
    {
        self.repository(name)?.with(f)
    }

    /// Drop and rebuild the schema of `name`. Every table loses its rows and
    /// the ledger ends up empty.
    pub fn clear(&self, name: &str) -> Result<()> {
        self.clear_with(name, || {})
    }

    /// Like [`clear`](Self::clear), then call `after` once the reset is committed
    pub fn clear_with<F>(&self, name: &str, after: F) -> Result<()>
    where
        F: FnOnce(),
    {
        let store = self.store(name)?;
        {
            let _span = tracing::info_span!("repository", name = %name).entered();
            let mut store = store.lock().map_err(|_| Error::LockPoisoned(name.to_string()))?;
            tracing::warn!("Clearing repository {}", name);
            self.registry.rebuild(&mut store)?;
        }

        after();
        Ok(())
    }

    /// Run `f` against every configured repository in configuration order,
    /// collecting the `Some` results.
    pub fn map<T, F>(&self, mut f: F) -> Result<Vec<T>>
    where
        F: FnMut(&mut Session<'_>) -> Result<Option<T>>,
    {
        if self.state() == State::Unconfigured {
            return Err(Error::NotSetup(DEFAULT_REPOSITORY.to_string()));
        }

        let mut results = Vec::new();
        for name in self.config.list()?.names() {
            if let Some(result) = self.with_repository(&name, &mut f)? {
                results.push(result);
            }
        }
        Ok(results)
    }

    /// Migrations of `name` with their applied timestamps
    pub fn status(&self, name: &str) -> Result<Vec<MigrationStatus>> {
        self.with_repository(name, |session| self.registry.status(session.connection()))
    }

    /// Roll back migrations of `name`, newest first, stopping before `to`
    pub fn rollback(&self, name: &str, to: Option<&str>) -> Result<Vec<String>> {
        let store = self.store(name)?;
        let _span = tracing::info_span!("repository", name = %name).entered();
        let mut store = store.lock().map_err(|_| Error::LockPoisoned(name.to_string()))?;

        tracing::warn!("Rolling back repository {}", name);
        self.registry.migrate_down(&mut store, to)
    }

    /// Row counts of every table in `name`
    pub fn stats(&self, name: &str) -> Result<StoreStats> {
        self.with_repository(name, |session| session.store.stats())
    }

    /// Close every connection. A later [`setup`](Self::setup) reopens them.
    pub fn shutdown(&self) -> Result<()> {
        let mut connections = self.connections.write().map_err(|_| poisoned("connections"))?;
        let closed = connections.len();
        connections.clear();
        *self.state.write().map_err(|_| poisoned("state"))? = State::Unconfigured;

        tracing::info!("Closed {} repositories", closed);
        Ok(())
    }

    fn store(&self, name: &str) -> Result<SharedStore> {
        if !self.config.has(name)? {
            return Err(Error::UnknownRepository(name.to_string()));
        }

        let connections = self.connections.read().map_err(|_| poisoned("connections"))?;
        connections
            .iter()
            .find(|(open, _)| open == name)
            .map(|(_, store)| Arc::clone(store))
            .ok_or_else(|| Error::NotSetup(name.to_string()))
    }

    fn open_stores(&self) -> Result<Vec<(String, SharedStore)>> {
        let connections = self.connections.read().map_err(|_| poisoned("connections"))?;
        Ok(connections.clone())
    }
}

fn poisoned(what: &str) -> Error {
    Error::LockPoisoned(what.to_string())
}

/// Handle to one open repository. Access goes through callbacks so the
/// connection is only used while its lock is held.
#[derive(Clone)]
pub struct Repository {
    name: String,
    store: SharedStore,
}

impl Repository {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lock the repository and run `f` with a session bound to it
    pub fn with<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Session<'_>) -> Result<T>,
    {
        let mut store = self
            .store
            .lock()
            .map_err(|_| Error::LockPoisoned(self.name.clone()))?;
        let mut session = Session {
            name: &self.name,
            store: &mut *store,
        };
        f(&mut session)
    }

    /// Lock the repository and run `f` in a transaction
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        self.with(|session| session.transaction(f))
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository").field("name", &self.name).finish()
    }
}

/// A repository bound as the current context of a callback
pub struct Session<'a> {
    name: &'a str,
    store: &'a mut SqliteStore,
}

impl Session<'_> {
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn connection(&self) -> &Connection {
        self.store.connection()
    }

    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize> {
        self.store.execute(sql, params)
    }

    pub fn query_row<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<T>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        Ok(self.store.connection().query_row(sql, params, f)?)
    }

    /// Run `f` in a transaction; commits on `Ok`, rolls back otherwise
    pub fn transaction<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        self.store.transaction(f)
    }

    pub fn count_rows(&self, table: &str) -> Result<usize> {
        self.store.count_rows(table)
    }

    pub fn table_names(&self) -> Result<Vec<String>> {
        self.store.table_names()
    }
}
