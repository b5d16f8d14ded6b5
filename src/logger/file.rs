//! Local-file backend
//!
//! Appends one tab-separated line per event to an append-only file and
//! replays by scanning the file from the top.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::config::WalSyncStrategy;
use crate::error::{Result, TlogError};
use crate::event::Event;

use super::pipeline::{AppendPipeline, EventSink};
use super::{rejected_replay, replay_channels, ReplayStreams, ReplayTask, TransactionLogger};

/// Transaction logger backed by an append-only text file
///
/// The file handle is used by the replay reader first and then moved into
/// the writer thread on activation; the two phases never overlap.
pub struct FileTransactionLogger {
    /// Log file location
    path: PathBuf,

    /// Open handle, `None` once handed to the writer or released
    file: Mutex<Option<File>>,

    /// Highest sequence seen; advanced by replay, then by the writer
    last_sequence: Arc<AtomicU64>,

    /// When the writer fsyncs
    sync_strategy: WalSyncStrategy,

    replay: ReplayTask,

    pipeline: AppendPipeline,
}

impl FileTransactionLogger {
    /// Open or create the log file at `path`.
    ///
    /// Missing parent directories are created. Opening an existing log
    /// leaves its contents untouched.
    pub fn open(
        path: impl AsRef<Path>,
        sync_strategy: WalSyncStrategy,
        queue_capacity: usize,
    ) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;

        tracing::info!(path = %path.display(), "opened file transaction log");

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(Some(file)),
            last_sequence: Arc::new(AtomicU64::new(0)),
            sync_strategy,
            replay: ReplayTask::default(),
            pipeline: AppendPipeline::new(queue_capacity),
        })
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TransactionLogger for FileTransactionLogger {
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

        let reader = match self.file.lock().as_ref().map(File::try_clone) {
            Some(Ok(file)) => file,
            Some(Err(e)) => return rejected_replay(e.into()),
            None => return rejected_replay(TlogError::Closed),
        };

        let (events_tx, errors_tx, streams) = replay_channels();
        let last_sequence = Arc::clone(&self.last_sequence);

        let spawned = thread::Builder::new()
            .name("tlog-replay".to_string())
            .spawn(move || read_log(reader, last_sequence, events_tx, errors_tx));

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

        // Claiming succeeds only if no replay ever ran.
        let unreplayed = self.replay.claim();
        self.replay.wait();

        let mut slot = self.file.lock();
        let Some(file) = slot.as_ref() else {
            if self.pipeline.is_active() {
                tracing::warn!("file transaction log already active");
                return Ok(());
            }
            return Err(TlogError::InvalidState(
                "log file was released by an earlier failed activation".to_string(),
            ));
        };

        if unreplayed {
            // Sequences must continue past what is already on disk.
            match read_records(file, &self.last_sequence, |_| true) {
                Ok(0) => {}
                Ok(records) => tracing::warn!(
                    records,
                    last_sequence = self.last_sequence(),
                    "activated without replay; scanned log for its last sequence"
                ),
                Err(e) => {
                    // The replay slot is spent, so a retry could not rescan.
                    drop(slot.take());
                    return Err(e);
                }
            }
        }

        // The slot stays locked until the writer is running.
        let file = slot.take().ok_or(TlogError::Closed)?;

        self.pipeline.start(FileSink {
            file,
            last_sequence: Arc::clone(&self.last_sequence),
            sync_strategy: self.sync_strategy,
            unsynced: 0,
        })?;

        tracing::info!(
            path = %self.path.display(),
            last_sequence = self.last_sequence(),
            "file transaction log active"
        );
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.pipeline.flush()
    }

    fn shutdown(&self) -> Result<()> {
        let result = self.pipeline.shutdown();
        drop(self.file.lock().take());

        tracing::info!(
            path = %self.path.display(),
            last_sequence = self.last_sequence(),
            "file transaction log shut down"
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

/// Replay reader: scan `file` from the top, stopping at the first bad line.
fn read_log(
    file: File,
    last_sequence: Arc<AtomicU64>,
    events: Sender<Event>,
    errors: Sender<TlogError>,
) {
    let scanned = read_records(&file, &last_sequence, |event| {
        if events.send(event).is_err() {
            tracing::debug!("replay consumer went away; stopping reader");
            return false;
        }
        true
    });

    match scanned {
        Ok(replayed) => tracing::debug!(events = replayed, "file replay finished"),
        Err(e) => {
            tracing::error!(error = %e, "replay halted");
            let _ = errors.send(e);
        }
    }
}

/// Walk every record in `file`, advancing `last_sequence` and handing each
/// event to `on_event` until it returns false.
///
/// A final line without its newline is a torn write and is reported as
/// corruption; appending after it would fuse the next record onto it.
fn read_records(
    mut file: &File,
    last_sequence: &AtomicU64,
    mut on_event: impl FnMut(Event) -> bool,
) -> Result<u64> {
    file.seek(SeekFrom::Start(0))?;

    let mut reader = BufReader::new(file);
    let mut line = String::new();
    let mut line_no = 0u64;
    let mut replayed = 0u64;

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        line_no += 1;

        let Some(record) = line.strip_suffix('\n') else {
            return Err(TlogError::Corruption {
                line: line_no,
                reason: "unterminated record at end of log".to_string(),
            });
        };

        let event = Event::from_line(record, line_no)?;

        // Everything after an out-of-order record is left unread.
        let last = last_sequence.load(Ordering::SeqCst);
        if event.sequence <= last {
            return Err(TlogError::SequenceViolation {
                last,
                found: event.sequence,
            });
        }
        last_sequence.store(event.sequence, Ordering::SeqCst);

        if !on_event(event) {
            break;
        }
        replayed += 1;
    }

    Ok(replayed)
}

/// Writer-side half of the file backend
struct FileSink {
    file: File,
    last_sequence: Arc<AtomicU64>,
    sync_strategy: WalSyncStrategy,

    /// Lines written since the last fsync
    unsynced: usize,
}

impl EventSink for FileSink {
    fn append(&mut self, event: Event) -> Result<Event> {
        let sequence = self.last_sequence.load(Ordering::SeqCst) + 1;
        let event = event.with_sequence(sequence);

        self.file.write_all(event.to_line().as_bytes())?;
        self.last_sequence.store(sequence, Ordering::SeqCst);
        self.unsynced += 1;

        let sync_due = match self.sync_strategy {
            WalSyncStrategy::EveryWrite => true,
            WalSyncStrategy::EveryNEntries { count } => self.unsynced >= count,
        };
        if sync_due {
            self.sync()?;
        }

        Ok(event)
    }

    fn sync(&mut self) -> Result<()> {
        if self.unsynced > 0 {
            self.file.sync_data()?;
            self.unsynced = 0;
        }
        Ok(())
    }
}
