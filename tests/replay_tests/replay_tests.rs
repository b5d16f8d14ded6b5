//! Tests for the replay driver
//!
//! These tests verify:
//! - Put/Delete events are applied to the store in order
//! - The logger is activated only after a complete replay
//! - Replay errors and store errors abort without activation
//! - read_all / scan collect without activating

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::channel::{self, Receiver};
use parking_lot::Mutex;
use tlogkv::error::{Result, TlogError};
use tlogkv::event::Event;
use tlogkv::logger::{ReplayStreams, TransactionLogger};
use tlogkv::replay::{self, ReplayStats};
use tlogkv::store::{KeyValueStore, MemStore};

// =============================================================================
// Test Doubles
// =============================================================================

/// Logger that replays a fixed script and counts activations
struct ScriptedLogger {
    events: Vec<Event>,
    errors: Mutex<Vec<TlogError>>,
    activations: AtomicUsize,
    fail_activation: bool,
}

impl ScriptedLogger {
    fn new(events: Vec<Event>) -> Self {
        Self {
            events,
            errors: Mutex::new(Vec::new()),
            activations: AtomicUsize::new(0),
            fail_activation: false,
        }
    }

    fn with_error(self, err: TlogError) -> Self {
        self.errors.lock().push(err);
        self
    }

    fn activations(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }
}

impl TransactionLogger for ScriptedLogger {
    fn write_put(&self, _key: &str, _value: &str) {}

    fn write_delete(&self, _key: &str) {}

    fn errors(&self) -> Receiver<TlogError> {
        channel::never()
    }

    fn read_events(&self) -> ReplayStreams {
        let (events_tx, events_rx) = channel::unbounded();
        let (errors_tx, errors_rx) = channel::unbounded();
        for event in &self.events {
            events_tx.send(event.clone()).unwrap();
        }
        for err in self.errors.lock().drain(..) {
            errors_tx.send(err).unwrap();
        }
        (events_rx, errors_rx)
    }

    fn activate(&self) -> Result<()> {
        self.activations.fetch_add(1, Ordering::SeqCst);
        if self.fail_activation {
            return Err(TlogError::Closed);
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    fn pending(&self) -> u64 {
        0
    }

    fn last_sequence(&self) -> u64 {
        self.events.last().map(|e| e.sequence).unwrap_or(0)
    }
}

/// Store that refuses one key
struct PickyStore {
    inner: MemStore,
    refuse: &'static str,
}

impl KeyValueStore for PickyStore {
    fn put(&self, key: &str, value: &str) -> Result<()> {
        if key == self.refuse {
            return Err(TlogError::InvalidEvent(format!("store refused {}", key)));
        }
        self.inner.put(key, value)
    }

    fn get(&self, key: &str) -> Result<String> {
        self.inner.get(key)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key)
    }
}

fn script() -> Vec<Event> {
    vec![
        Event::put("a", "1").with_sequence(1),
        Event::put("b", "2").with_sequence(2),
        Event::delete("a").with_sequence(3),
        Event::put("c", "3").with_sequence(4),
        Event::put("b", "22").with_sequence(5),
    ]
}

// =============================================================================
// Restore Tests
// =============================================================================

#[test]
fn test_restore_applies_events_and_activates() {
    let logger = ScriptedLogger::new(script());
    let store = MemStore::new();

    let stats = replay::restore(&logger, &store).unwrap();

    assert_eq!(
        stats,
        ReplayStats {
            events: 5,
            puts: 4,
            deletes: 1,
            last_sequence: 5,
        }
    );
    assert_eq!(logger.activations(), 1);

    let snapshot = store.snapshot();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot["b"], "22");
    assert_eq!(snapshot["c"], "3");
}

#[test]
fn test_restore_empty_log_activates() {
    let logger = ScriptedLogger::new(Vec::new());
    let store = MemStore::new();

    let stats = replay::restore(&logger, &store).unwrap();

    assert_eq!(stats, ReplayStats::default());
    assert_eq!(logger.activations(), 1);
    assert!(store.is_empty());
}

#[test]
fn test_restore_aborts_on_replay_error() {
    let logger = ScriptedLogger::new(script()).with_error(TlogError::SequenceViolation {
        last: 5,
        found: 5,
    });
    let store = MemStore::new();

    let result = replay::restore(&logger, &store);

    assert!(matches!(
        result,
        Err(TlogError::SequenceViolation { last: 5, found: 5 })
    ));
    assert_eq!(logger.activations(), 0);
}

#[test]
fn test_restore_aborts_on_store_error() {
    let logger = ScriptedLogger::new(script());
    let store = PickyStore {
        inner: MemStore::new(),
        refuse: "c",
    };

    let result = replay::restore(&logger, &store);

    assert!(matches!(result, Err(TlogError::InvalidEvent(_))));
    assert_eq!(logger.activations(), 0);
    // Events before the refused one were applied, later ones were not.
    assert_eq!(store.inner.get("b").unwrap(), "2");
}

#[test]
fn test_restore_propagates_activation_failure() {
    let mut logger = ScriptedLogger::new(script());
    logger.fail_activation = true;
    let store = MemStore::new();

    let result = replay::restore(&logger, &store);

    assert!(matches!(result, Err(TlogError::Closed)));
    assert_eq!(logger.activations(), 1);
}

// =============================================================================
// Inspection Tests
// =============================================================================

#[test]
fn test_read_all_does_not_activate() {
    let logger = ScriptedLogger::new(script());

    let events = replay::read_all(&logger).unwrap();

    assert_eq!(events, script());
    assert_eq!(logger.activations(), 0);
}

#[test]
fn test_scan_collects_events_and_errors() {
    let logger = ScriptedLogger::new(script()).with_error(TlogError::InvalidRow {
        sequence: 9,
        reason: "bad".to_string(),
    });

    let (events, errors) = replay::scan(&logger);

    assert_eq!(events, script());
    assert_eq!(errors.len(), 1);
    assert_eq!(logger.activations(), 0);
}

#[test]
fn test_apply_single_event() {
    let store = MemStore::new();

    replay::apply(&store, &Event::put("k", "v")).unwrap();
    assert_eq!(store.get("k").unwrap(), "v");

    replay::apply(&store, &Event::delete("k")).unwrap();
    assert!(store.is_empty());
}
