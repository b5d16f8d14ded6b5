//! Relational backend
//!
//! Stores events as rows of a `transactions` table in SQLite. The database
//! assigns sequence numbers through the autoincrementing primary key.
//!
//! ## Schema
//! ```sql
//! CREATE TABLE transactions (
//!     sequence   INTEGER PRIMARY KEY AUTOINCREMENT,
//!     event_type INTEGER NOT NULL,
//!     key        TEXT NOT NULL,
//!     value      TEXT
//! );
//! ```

use std::fs;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{Receiver, Sender};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, Row};

use crate::config::DbParams;
use crate::error::{Result, TlogError};
use crate::event::{Event, EventType};

use super::pipeline::{AppendPipeline, EventSink};
use super::{rejected_replay, replay_channels, ReplayStreams, ReplayTask, TransactionLogger};

const TABLE: &str = "transactions";

type SharedConnection = Arc<Mutex<Connection>>;

/// Transaction logger backed by a SQL table
///
/// ## Concurrency:
/// - The connection sits behind a mutex shared by the replay reader and the
///   writer thread; activation joins the reader so they never contend.
/// - Row ids come from the database, so concurrent appends cannot collide.
pub struct SqlTransactionLogger {
    /// Connection parameters this logger was opened with
    params: DbParams,

    /// Shared connection, `None` after shutdown
    conn: Mutex<Option<SharedConnection>>,

    /// Highest sequence seen; advanced by replay, then by the writer
    last_sequence: Arc<AtomicU64>,

    replay: ReplayTask,

    pipeline: AppendPipeline,
}

impl SqlTransactionLogger {
    /// Connect and make sure the `transactions` table exists.
    pub fn open(params: &DbParams, queue_capacity: usize) -> Result<Self> {
        if let Some(parent) = params.database.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            &params.database,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        conn.busy_timeout(Duration::from_millis(params.busy_timeout_ms))?;

        if !table_exists(&conn)? {
            create_table(&conn)?;
            tracing::info!(database = %params.database.display(), "created {} table", TABLE);
        }

        tracing::info!(database = %params.database.display(), "opened sql transaction log");

        Ok(Self {
            params: params.clone(),
            conn: Mutex::new(Some(Arc::new(Mutex::new(conn)))),
            last_sequence: Arc::new(AtomicU64::new(0)),
            replay: ReplayTask::default(),
            pipeline: AppendPipeline::new(queue_capacity),
        })
    }

    /// Connection parameters
    pub fn params(&self) -> &DbParams {
        &self.params
    }

    fn connection(&self) -> Option<SharedConnection> {
        self.conn.lock().clone()
    }
}

impl TransactionLogger for SqlTransactionLogger {
    fn write_put(&self, key: &str, value: &str) {
        self.pipeline.submit(Event::put(key, value));
    }

    fn write_delete(&self, key: &str) {
        self.pipeline.submit(Event::delete(key));
    }

    fn errors(&self) -> Receiver<TlogError> {
        self.pipeline.errors()
    }

    fn read_events(&self) -> ReplayStreams {
        if !self.replay.claim() {
            return rejected_replay(TlogError::InvalidState(
                "read_events may run once, before activate".to_string(),
            ));
        }

        let Some(conn) = self.connection() else {
            return rejected_replay(TlogError::Closed);
        };

        let (events_tx, errors_tx, streams) = replay_channels();
        let last_sequence = Arc::clone(&self.last_sequence);

        let spawned = thread::Builder::new()
            .name("tlog-replay".to_string())
            .spawn(move || read_table(conn, last_sequence, events_tx, errors_tx));

        match spawned {
            Ok(handle) => {
                self.replay.set_reader(handle);
                streams
            }
            Err(e) => rejected_replay(e.into()),
        }
    }

    fn activate(&self) -> Result<()> {
        if self.pipeline.is_closed() {
            return Err(TlogError::Closed);
        }
        if self.pipeline.is_active() {
            tracing::warn!("sql transaction log already active");
            return Ok(());
        }

        self.replay.seal();
        self.replay.wait();

        let conn = self.connection().ok_or(TlogError::Closed)?;
        self.pipeline.start(SqlSink {
            conn,
            last_sequence: Arc::clone(&self.last_sequence),
        })?;

        tracing::info!(
            database = %self.params.database.display(),
            last_sequence = self.last_sequence(),
            "sql transaction log active"
        );
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.pipeline.flush()
    }

    fn shutdown(&self) -> Result<()> {
        let result = self.pipeline.shutdown();

        if let Some(shared) = self.conn.lock().take() {
            // Close explicitly when nothing else holds the connection, so
            // close errors are not swallowed by Drop.
            if let Ok(conn) = Arc::try_unwrap(shared) {
                if let Err((_, e)) = conn.into_inner().close() {
                    tracing::warn!(error = %e, "error closing sql transaction log");
                    return result.and(Err(e.into()));
                }
            }
        }

        tracing::info!(
            database = %self.params.database.display(),
            last_sequence = self.last_sequence(),
            "sql transaction log shut down"
        );
        result
    }

    fn pending(&self) -> u64 {
        self.pipeline.pending()
    }

    fn last_sequence(&self) -> u64 {
        self.last_sequence.load(Ordering::SeqCst)
    }
}

fn table_exists(conn: &Connection) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [TABLE],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn create_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS transactions (
            sequence   INTEGER PRIMARY KEY AUTOINCREMENT,
            event_type INTEGER NOT NULL,
            key        TEXT NOT NULL,
            value      TEXT
        );",
    )?;
    Ok(())
}

/// Replay reader: stream the table in sequence order.
///
/// Bad rows are reported and skipped; the cursor keeps going.
fn read_table(
    conn: SharedConnection,
    last_sequence: Arc<AtomicU64>,
    events: Sender<Event>,
    errors: Sender<TlogError>,
) {
    let conn = conn.lock();

    let mut stmt = match conn
        .prepare("SELECT sequence, event_type, key, value FROM transactions ORDER BY sequence")
    {
        Ok(stmt) => stmt,
        Err(e) => {
            let _ = errors.send(e.into());
            return;
        }
    };

    let mut rows = match stmt.query([]) {
        Ok(rows) => rows,
        Err(e) => {
            let _ = errors.send(e.into());
            return;
        }
    };

    let mut replayed = 0u64;
    let mut skipped = 0u64;

    loop {
        let decoded = match rows.next() {
            Ok(Some(row)) => decode_row(row),
            Ok(None) => break,
            Err(e) => {
                // The cursor itself failed; there is no next row to move to.
                tracing::error!(error = %e, "sql replay cursor failed");
                let _ = errors.send(e.into());
                return;
            }
        };

        match decoded {
            Ok(event) => {
                last_sequence.fetch_max(event.sequence, Ordering::SeqCst);
                if events.send(event).is_err() {
                    tracing::debug!("replay consumer went away; stopping reader");
                    return;
                }
                replayed += 1;
            }
            Err(e) => {
                tracing::error!(error = %e, "unreadable transactions row");
                skipped += 1;
                if errors.send(e).is_err() {
                    return;
                }
            }
        }
    }

    tracing::debug!(events = replayed, skipped, "sql replay finished");
}

fn decode_row(row: &Row<'_>) -> Result<Event> {
    let raw_sequence: i64 = row.get(0)?;
    let code: i64 = row.get(1)?;
    let key: String = row.get(2)?;
    let value: Option<String> = row.get(3)?;

    let invalid = |reason: String| TlogError::InvalidRow {
        sequence: raw_sequence,
        reason,
    };

    let sequence = u64::try_from(raw_sequence)
        .ok()
        .filter(|sequence| *sequence > 0)
        .ok_or_else(|| invalid("sequence must be positive".to_string()))?;
    let event_type = EventType::from_code(code).map_err(|e| invalid(e.to_string()))?;
    if key.is_empty() {
        return Err(invalid("empty key".to_string()));
    }

    let event = match event_type {
        EventType::Put => Event::put(key, value.unwrap_or_default()),
        EventType::Delete => Event::delete(key),
    };
    Ok(event.with_sequence(sequence))
}

/// Writer-side half of the relational backend
struct SqlSink {
    conn: SharedConnection,
    last_sequence: Arc<AtomicU64>,
}

impl EventSink for SqlSink {
    fn append(&mut self, event: Event) -> Result<Event> {
        let value = match event.event_type {
            EventType::Put => Some(event.value.as_str()),
            EventType::Delete => None,
        };

        let rowid = {
            let conn = self.conn.lock();
            conn.prepare_cached(
                "INSERT INTO transactions (event_type, key, value) VALUES (?1, ?2, ?3)",
            )?
            .execute(params![event.event_type.code(), event.key, value])?;
            conn.last_insert_rowid()
        };

        let sequence = u64::try_from(rowid).map_err(|_| TlogError::InvalidRow {
            sequence: rowid,
            reason: "database assigned a negative row id".to_string(),
        })?;
        self.last_sequence.fetch_max(sequence, Ordering::SeqCst);

        Ok(event.with_sequence(sequence))
    }

    fn sync(&mut self) -> Result<()> {
        // Every INSERT runs in its own implicit transaction.
        Ok(())
    }
}
