//! Configuration for tlogkv
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{Result, TlogError};

/// Main configuration for a tlogkv instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Backend Configuration
    // -------------------------------------------------------------------------
    /// Durability medium, chosen once at construction time
    pub backend: Backend,

    // -------------------------------------------------------------------------
    // Pipeline Configuration
    // -------------------------------------------------------------------------
    /// Capacity of the append queue between callers and the writer thread.
    /// Callers block once this many appends are waiting.
    pub queue_capacity: usize,

    /// Sync strategy: how often the file backend fsyncs
    pub wal_sync_strategy: WalSyncStrategy,
}

/// Where the transaction log lives
#[derive(Debug, Clone)]
pub enum Backend {
    /// Append-only, tab-separated text file
    File { path: PathBuf },

    /// `transactions` table in an embedded SQL database
    Sql(DbParams),
}

/// Connection parameters for the relational backend
///
/// The backend runs on embedded SQLite, so there is no server to reach:
/// the host, port, user and password of a networked database are replaced
/// by the path of the database file. The database name is that file.
#[derive(Debug, Clone)]
pub struct DbParams {
    /// Database file (created if missing)
    pub database: PathBuf,

    /// How long a statement waits on a locked database (milliseconds)
    pub busy_timeout_ms: u64,
}

impl DbParams {
    pub fn new(database: impl Into<PathBuf>) -> Self {
        Self {
            database: database.into(),
            busy_timeout_ms: 5000,
        }
    }

    /// Set the busy timeout (in milliseconds)
    pub fn busy_timeout_ms(mut self, ms: u64) -> Self {
        self.busy_timeout_ms = ms;
        self
    }
}

/// File backend sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N unsynced entries (balanced durability/performance)
    EveryNEntries { count: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::File {
                path: PathBuf::from("transactions.log"),
            },
            queue_capacity: 16,
            wal_sync_strategy: WalSyncStrategy::EveryNEntries { count: 100 },
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the logger cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(TlogError::Config(
                "queue_capacity must be at least 1".to_string(),
            ));
        }

        if let WalSyncStrategy::EveryNEntries { count: 0 } = self.wal_sync_strategy {
            return Err(TlogError::Config(
                "EveryNEntries sync count must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Use the local-file backend at `path`
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.backend = Backend::File { path: path.into() };
        self
    }

    /// Use the relational backend with the given connection parameters
    pub fn sql(mut self, params: DbParams) -> Self {
        self.config.backend = Backend::Sql(params);
        self
    }

    /// Set the append queue capacity
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// Set the file sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
