//! Transaction Logger Module
//!
//! Durably records every key mutation and replays them on startup.
//!
//! ## Responsibilities
//! - Append Put/Delete events asynchronously through a bounded queue
//! - Assign strictly increasing sequence numbers
//! - Replay history in ascending sequence order
//! - Surface append failures on a separate error stream
//!
//! ## Lifecycle
//! ```text
//!  open ──▶ read_events (replay) ──▶ activate ──▶ write_* ... ──▶ shutdown
//! ```
//!
//! ## Backends
//! - [`FileTransactionLogger`]: append-only tab-separated text file
//! - [`SqlTransactionLogger`]: `transactions` table in SQLite

mod file;
pub mod pipeline;
mod sql;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

use crate::config::{Backend, Config};
use crate::error::{Result, TlogError};
use crate::event::Event;

pub use file::FileTransactionLogger;
pub use pipeline::{AppendPipeline, EventSink, ERROR_CAPACITY};
pub use sql::SqlTransactionLogger;

/// Event stream and error stream produced by a replay
pub type ReplayStreams = (Receiver<Event>, Receiver<TlogError>);

/// Events buffered between a replay reader and its consumer
const REPLAY_BUFFER: usize = 64;

/// Capability set every durability backend provides
pub trait TransactionLogger: Send + Sync {
    /// Enqueue a Put event. Failures surface on [`errors`](Self::errors).
    fn write_put(&self, key: &str, value: &str);

    /// Enqueue a Delete event. Failures surface on [`errors`](Self::errors).
    fn write_delete(&self, key: &str);

    /// Stream of asynchronous append failures.
    ///
    /// The stream holds a single error. Keep draining it: while it is full
    /// the writer thread blocks on its next failure and every later append
    /// stalls behind it.
    fn errors(&self) -> Receiver<TlogError>;

    /// Replay the log from the beginning.
    ///
    /// Events arrive in ascending sequence order. Both streams close when the
    /// medium is exhausted or replay stops. Only valid once, before
    /// [`activate`](Self::activate).
    fn read_events(&self) -> ReplayStreams;

    /// Start accepting appends. Waits for a running replay to finish.
    fn activate(&self) -> Result<()>;

    /// Block until every earlier append is processed and synced.
    fn flush(&self) -> Result<()>;

    /// Stop accepting appends, drain, sync and release the writer.
    fn shutdown(&self) -> Result<()>;

    /// Appends enqueued but not yet processed
    fn pending(&self) -> u64;

    /// Highest sequence replayed or written so far
    fn last_sequence(&self) -> u64;
}

/// Open the backend selected by `config`.
pub fn open(config: &Config) -> Result<Arc<dyn TransactionLogger>> {
    config.validate()?;

    let logger: Arc<dyn TransactionLogger> = match &config.backend {
        Backend::File { path } => Arc::new(FileTransactionLogger::open(
            path,
            config.wal_sync_strategy,
            config.queue_capacity,
        )?),
        Backend::Sql(params) => Arc::new(SqlTransactionLogger::open(
            params,
            config.queue_capacity,
        )?),
    };

    Ok(logger)
}

// =============================================================================
// Replay plumbing shared by the backends
// =============================================================================

/// Tracks the one replay a logger may run
#[derive(Default)]
pub(crate) struct ReplayTask {
    claimed: AtomicBool,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl ReplayTask {
    /// Claim the replay slot; false if a replay already ran
    pub(crate) fn claim(&self) -> bool {
        !self.claimed.swap(true, Ordering::SeqCst)
    }

    /// Block replays from now on (used on activation)
    pub(crate) fn seal(&self) {
        self.claimed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_reader(&self, handle: JoinHandle<()>) {
        *self.reader.lock() = Some(handle);
    }

    /// Join the reader thread if one is still around
    pub(crate) fn wait(&self) {
        let handle = self.reader.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("replay reader thread panicked");
            }
        }
    }
}

/// Channel pair for a replay reader: senders for the reader thread,
/// receivers for the caller.
pub(crate) fn replay_channels() -> (Sender<Event>, Sender<TlogError>, ReplayStreams) {
    let (events_tx, events_rx) = channel::bounded(REPLAY_BUFFER);
    let (errors_tx, errors_rx) = channel::bounded(1);
    (events_tx, errors_tx, (events_rx, errors_rx))
}

/// Streams for a replay that was refused: no events, one error.
pub(crate) fn rejected_replay(err: TlogError) -> ReplayStreams {
    let (_events_tx, errors_tx, streams) = replay_channels();
    let _ = errors_tx.send(err);
    streams
}
