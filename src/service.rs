//! Service Module
//!
//! Key-value operations backed by the transaction log.
//!
//! ## Responsibilities
//! - Rebuild the store from the log before serving anything
//! - Mutate the store, then append the mutation to the log
//! - Drain the log's error stream for the lifetime of the service
//! - Shut the log down cleanly on close

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{Result, TlogError};
use crate::logger::{self, TransactionLogger};
use crate::replay::{self, ReplayStats};
use crate::store::{KeyValueStore, MemStore};

/// A store plus the transaction log that makes it durable
///
/// Store mutations are synchronous and report errors to the caller. Log
/// appends are asynchronous: a put that returned `Ok` may still fail to be
/// logged, which only shows up in the error drain (and in
/// [`append_failures`](Self::append_failures)).
pub struct Service {
    store: Arc<dyn KeyValueStore>,

    logger: Arc<dyn TransactionLogger>,

    /// What the startup replay applied
    replay_stats: ReplayStats,

    /// Append errors seen by the drain thread
    append_failures: Arc<AtomicU64>,

    /// Error drain thread; ends once the logger closes its error stream
    drain: Mutex<Option<JoinHandle<()>>>,
}

impl Service {
    /// Open the configured backend, replay it into a fresh [`MemStore`] and
    /// start accepting operations.
    pub fn open(config: &Config) -> Result<Self> {
        let logger = logger::open(config)?;
        Self::with_logger(logger, Arc::new(MemStore::new()))
    }

    /// Replay `logger` into `store` and start accepting operations.
    ///
    /// `logger` must not have been replayed or activated yet.
    pub fn with_logger(
        logger: Arc<dyn TransactionLogger>,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self> {
        let replay_stats = replay::restore(logger.as_ref(), store.as_ref())?;

        let append_failures = Arc::new(AtomicU64::new(0));
        let errors = logger.errors();
        let failures = Arc::clone(&append_failures);

        let drain = thread::Builder::new()
            .name("tlog-errors".to_string())
            .spawn(move || {
                for err in errors.iter() {
                    failures.fetch_add(1, Ordering::SeqCst);
                    tracing::error!(error = %err, "transaction log append failed");
                }
            })?;

        Ok(Self {
            store,
            logger,
            replay_stats,
            append_failures,
            drain: Mutex::new(Some(drain)),
        })
    }

    /// Store `value` under `key` and log the put
    pub fn put(&self, key: &str, value: &str) -> Result<()> {
        check_key(key)?;
        self.store.put(key, value)?;
        self.logger.write_put(key, value);
        tracing::debug!(key, "PUT");
        Ok(())
    }

    /// Current value of `key`
    pub fn get(&self, key: &str) -> Result<String> {
        self.store.get(key)
    }

    /// Remove `key` and log the delete
    pub fn delete(&self, key: &str) -> Result<()> {
        check_key(key)?;
        self.store.delete(key)?;
        self.logger.write_delete(key);
        tracing::debug!(key, "DELETE");
        Ok(())
    }

    /// Wait until every logged mutation so far has reached the backend
    pub fn flush(&self) -> Result<()> {
        self.logger.flush()
    }

    /// Shut the log down and stop the error drain.
    pub fn close(&self) -> Result<()> {
        let result = self.logger.shutdown();

        let drain = self.drain.lock().take();
        if let Some(handle) = drain {
            if handle.join().is_err() {
                tracing::error!("error drain thread panicked");
            }
        }

        result
    }

    /// Statistics from the startup replay
    pub fn replay_stats(&self) -> &ReplayStats {
        &self.replay_stats
    }

    /// Append failures reported so far
    pub fn append_failures(&self) -> u64 {
        self.append_failures.load(Ordering::SeqCst)
    }

    /// The logger handle, for callers that need the raw contract
    pub fn logger(&self) -> &Arc<dyn TransactionLogger> {
        &self.logger
    }

    /// The store handle
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }
}

fn check_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(TlogError::InvalidEvent("key must not be empty".to_string()));
    }
    Ok(())
}
