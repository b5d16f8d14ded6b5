//! Replay Module
//!
//! Rebuilds the store from the transaction log on startup.
//!
//! ## Responsibilities
//! - Drain the logger's replay streams into the store
//! - Abort startup on the first replay or store error
//! - Activate the logger only after a complete replay
//!
//! The event and error streams are consumed together with `select!`, so an
//! error is noticed as soon as the reader reports it.

use crossbeam::channel::{self, select};

use crate::error::{Result, TlogError};
use crate::event::{Event, EventType};
use crate::logger::{ReplayStreams, TransactionLogger};
use crate::store::KeyValueStore;

/// Result of a replay
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplayStats {
    /// Events applied
    pub events: u64,

    /// Put events applied
    pub puts: u64,

    /// Delete events applied
    pub deletes: u64,

    /// Sequence of the last event applied (0 for an empty log)
    pub last_sequence: u64,
}

impl ReplayStats {
    fn record(&mut self, event: &Event) {
        self.events += 1;
        match event.event_type {
            EventType::Put => self.puts += 1,
            EventType::Delete => self.deletes += 1,
        }
        self.last_sequence = event.sequence;
    }
}

/// Replay `logger` into `store`, then activate the logger.
///
/// Any replay or store error is returned before activation: a store that
/// was only partially rebuilt must not take traffic.
pub fn restore(logger: &dyn TransactionLogger, store: &dyn KeyValueStore) -> Result<ReplayStats> {
    let mut stats = ReplayStats::default();

    let drained = pump(
        logger.read_events(),
        |event| {
            apply(store, &event)?;
            stats.record(&event);
            Ok(())
        },
        Err,
    );

    if let Err(e) = drained {
        tracing::error!(error = %e, applied = stats.events, "replay aborted");
        return Err(e);
    }

    tracing::info!(
        events = stats.events,
        puts = stats.puts,
        deletes = stats.deletes,
        last_sequence = stats.last_sequence,
        "events replayed"
    );

    logger.activate()?;
    Ok(stats)
}

/// Apply one replayed event to the store
pub fn apply(store: &dyn KeyValueStore, event: &Event) -> Result<()> {
    match event.event_type {
        EventType::Put => store.put(&event.key, &event.value),
        EventType::Delete => store.delete(&event.key),
    }
}

/// Read the whole log, stopping at the first error. Does not activate.
pub fn read_all(logger: &dyn TransactionLogger) -> Result<Vec<Event>> {
    let mut events = Vec::new();
    pump(
        logger.read_events(),
        |event| {
            events.push(event);
            Ok(())
        },
        Err,
    )?;
    Ok(events)
}

/// Read everything the backend is willing to produce, keeping errors
/// alongside events. Does not activate.
pub fn scan(logger: &dyn TransactionLogger) -> (Vec<Event>, Vec<TlogError>) {
    let mut events = Vec::new();
    let mut errors = Vec::new();

    // Neither callback fails, so neither can the pump.
    let _ = pump(
        logger.read_events(),
        |event| {
            events.push(event);
            Ok(())
        },
        |err| {
            errors.push(err);
            Ok(())
        },
    );

    (events, errors)
}

enum Step {
    Event(Event),
    Error(TlogError),
    EventsClosed,
    ErrorsClosed,
}

/// Consume both replay streams until both close or a callback fails.
fn pump<E, F>(streams: ReplayStreams, mut on_event: E, mut on_error: F) -> Result<()>
where
    E: FnMut(Event) -> Result<()>,
    F: FnMut(TlogError) -> Result<()>,
{
    let (mut events, mut errors) = streams;
    let mut events_open = true;
    let mut errors_open = true;

    while events_open || errors_open {
        let step = select! {
            recv(events) -> msg => msg.map_or(Step::EventsClosed, Step::Event),
            recv(errors) -> msg => msg.map_or(Step::ErrorsClosed, Step::Error),
        };

        match step {
            Step::Event(event) => on_event(event)?,
            Step::Error(err) => on_error(err)?,
            Step::EventsClosed => {
                events_open = false;
                events = channel::never();
            }
            Step::ErrorsClosed => {
                errors_open = false;
                errors = channel::never();
            }
        }
    }

    Ok(())
}
