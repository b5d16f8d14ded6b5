//! Append pipeline
//!
//! The asynchronous half shared by every backend: a bounded append queue,
//! one writer thread that drains it into an [`EventSink`], and a single-slot
//! error stream.
//!
//! ```text
//!  write_put / write_delete          flush
//!            │                         │
//!            ▼                         ▼
//!   ┌──────────────────────────────────────────┐
//!   │  append queue (bounded, FIFO)            │
//!   └────────────────────┬─────────────────────┘
//!                        ▼
//!              ┌───────────────────┐       ┌────────────────────┐
//!              │  tlog-writer      │──────▶│ error slot (cap 1) │──▶ errors()
//!              │  EventSink        │       └────────────────────┘
//!              └───────────────────┘
//! ```
//!
//! A full queue blocks callers. A full error slot blocks the writer, so the
//! error stream has to be drained for appends to keep flowing.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};

use crate::error::{Result, TlogError};
use crate::event::Event;

/// Capacity of the asynchronous error stream
pub const ERROR_CAPACITY: usize = 1;

/// Backend-specific writer driven by the pipeline's worker thread
pub trait EventSink: Send + 'static {
    /// Durably record `event` and return it with its assigned sequence
    fn append(&mut self, event: Event) -> Result<Event>;

    /// Push anything buffered to stable storage
    fn sync(&mut self) -> Result<()>;
}

/// Messages travelling through the append queue
enum Message {
    Append(Event),

    /// Sync marker; answered once every earlier message was processed
    Flush(Sender<Result<()>>),
}

/// Bounded queue + single writer thread + error slot
///
/// ## Concurrency:
/// - `queue`: callers clone the sender out under a read lock; shutdown takes
///   it under the write lock to close the queue
/// - `worker`: held across start/shutdown so the two never interleave
/// - `in_flight`: atomic, bumped by callers, lowered by the writer
pub struct AppendPipeline {
    /// Append queue capacity
    capacity: usize,

    /// Sending side of the append queue, `Some` while active
    queue: RwLock<Option<Sender<Message>>>,

    /// Sending side of the error stream, dropped on shutdown
    errors_tx: Mutex<Option<Sender<TlogError>>>,

    /// Receiving side of the error stream, cloned out by `errors()`
    errors_rx: Receiver<TlogError>,

    /// Appends enqueued but not yet processed
    in_flight: Arc<AtomicU64>,

    /// Writer thread handle; yields the result of the final sync
    worker: Mutex<Option<JoinHandle<Result<()>>>>,

    /// Set once shutdown began; appends are rejected from then on
    closed: AtomicBool,
}

impl AppendPipeline {
    /// Create an idle pipeline. Nothing runs until [`start`](Self::start).
    pub fn new(capacity: usize) -> Self {
        let (errors_tx, errors_rx) = channel::bounded(ERROR_CAPACITY);

        Self {
            capacity,
            queue: RwLock::new(None),
            errors_tx: Mutex::new(Some(errors_tx)),
            errors_rx,
            in_flight: Arc::new(AtomicU64::new(0)),
            worker: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Spawn the writer thread over `sink`.
    ///
    /// Starting an already running pipeline is a no-op; starting one that
    /// was shut down fails with [`TlogError::Closed`].
    pub fn start<S: EventSink>(&self, sink: S) -> Result<()> {
        let mut worker = self.worker.lock();

        if self.closed.load(Ordering::SeqCst) {
            return Err(TlogError::Closed);
        }
        if worker.is_some() {
            tracing::warn!("append pipeline already running; ignoring start");
            return Ok(());
        }

        let errors = self.errors_tx.lock().clone().ok_or(TlogError::Closed)?;
        let (queue_tx, queue_rx) = channel::bounded(self.capacity);
        let in_flight = Arc::clone(&self.in_flight);

        let handle = thread::Builder::new()
            .name("tlog-writer".to_string())
            .spawn(move || run_worker(sink, queue_rx, errors, in_flight))?;

        *worker = Some(handle);
        *self.queue.write() = Some(queue_tx);

        tracing::debug!(capacity = self.capacity, "append pipeline started");
        Ok(())
    }

    /// Enqueue an event for the writer thread.
    ///
    /// Blocks while the queue is full. Never fails to the caller: a rejected
    /// append is reported on the error stream instead.
    pub fn submit(&self, event: Event) {
        // A cloned sender keeps the queue open until this send lands, even
        // if shutdown runs meanwhile.
        let queue = self.queue.read().clone();

        let Some(tx) = queue else {
            let err = if self.closed.load(Ordering::SeqCst) {
                TlogError::Closed
            } else {
                TlogError::NotActive
            };
            tracing::warn!(key = %event.key, "rejected {} append: {}", event.event_type, err);
            self.report(err);
            return;
        };

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if tx.send(Message::Append(event)).is_err() {
            // Receiver gone: the writer thread died.
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            tracing::error!("append queue disconnected; writer thread is gone");
            self.report(TlogError::WorkerPanicked);
        }
    }

    /// Wait until every append enqueued before this call is processed and
    /// synced. Returns immediately when the pipeline is not running.
    pub fn flush(&self) -> Result<()> {
        let tx = match self.queue.read().as_ref() {
            Some(tx) => tx.clone(),
            None => return Ok(()),
        };

        let (reply_tx, reply_rx) = channel::bounded(1);
        tx.send(Message::Flush(reply_tx))
            .map_err(|_| TlogError::WorkerPanicked)?;
        drop(tx);

        reply_rx.recv().map_err(|_| TlogError::WorkerPanicked)?
    }

    /// Close the queue, let the writer drain it, join the writer and close
    /// the error stream. Idempotent.
    pub fn shutdown(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        self.closed.store(true, Ordering::SeqCst);

        // Dropping the only long-lived sender ends the writer's loop once
        // the queue is empty.
        drop(self.queue.write().take());

        let result = match worker.take() {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => Err(TlogError::WorkerPanicked),
            },
            None => Ok(()),
        };

        drop(self.errors_tx.lock().take());
        result
    }

    /// A receiver on the error stream
    pub fn errors(&self) -> Receiver<TlogError> {
        self.errors_rx.clone()
    }

    /// Report an error from the caller side without blocking
    pub fn report(&self, err: TlogError) {
        let errors = self.errors_tx.lock();
        let Some(tx) = errors.as_ref() else {
            tracing::warn!("error stream closed, dropping: {}", err);
            return;
        };

        match tx.try_send(err) {
            Ok(()) => {}
            Err(TrySendError::Full(err)) | Err(TrySendError::Disconnected(err)) => {
                tracing::warn!("error stream full, dropping: {}", err);
            }
        }
    }

    /// Number of appends enqueued but not yet processed
    pub fn pending(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Whether the writer thread is running
    pub fn is_active(&self) -> bool {
        self.queue.read().is_some()
    }

    /// Whether shutdown has begun
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Writer thread body: drain the queue in FIFO order until it closes.
fn run_worker<S: EventSink>(
    mut sink: S,
    queue: Receiver<Message>,
    errors: Sender<TlogError>,
    in_flight: Arc<AtomicU64>,
) -> Result<()> {
    tracing::debug!("append worker started");

    for message in queue.iter() {
        match message {
            Message::Append(event) => {
                let outcome = match event.validate() {
                    Ok(()) => sink.append(event),
                    Err(e) => Err(e),
                };

                match outcome {
                    Ok(written) => {
                        tracing::trace!(
                            sequence = written.sequence,
                            key = %written.key,
                            "appended {}",
                            written.event_type
                        );
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "transaction log append failed");
                        // Blocks while the error slot is full.
                        let _ = errors.send(e);
                    }
                }

                in_flight.fetch_sub(1, Ordering::SeqCst);
            }
            Message::Flush(reply) => {
                let _ = reply.send(sink.sync());
            }
        }
    }

    let result = sink.sync();
    tracing::debug!("append worker stopped");
    result
}
