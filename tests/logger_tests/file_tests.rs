//! Tests for the local-file backend
//!
//! These tests verify:
//! - Opening creates the file (and parents) without touching existing logs
//! - Appended events land on disk in order with sequences 1, 2, 3, ...
//! - Replay yields the same events after close/reopen
//! - Replay halts on non-increasing sequences and malformed lines
//! - Lifecycle rules (activate, read_events, shutdown)
//! - Concurrent writers get distinct, increasing sequences

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tempfile::TempDir;
use tlogkv::config::WalSyncStrategy;
use tlogkv::error::TlogError;
use tlogkv::event::{Event, EventType};
use tlogkv::logger::{FileTransactionLogger, TransactionLogger};
use tlogkv::replay;
use tlogkv::store::{KeyValueStore, MemStore};

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_log() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let log_path = temp_dir.path().join("transactions.log");
    (temp_dir, log_path)
}

fn open_logger(path: &Path) -> FileTransactionLogger {
    FileTransactionLogger::open(path, WalSyncStrategy::EveryWrite, 16).unwrap()
}

/// Open, replay (ignoring contents) and activate
fn open_active(path: &Path) -> FileTransactionLogger {
    let logger = open_logger(path);
    replay::read_all(&logger).unwrap();
    logger.activate().unwrap();
    logger
}

fn sequences_on_disk(path: &Path) -> Vec<u64> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| line.split('\t').next().unwrap().parse().unwrap())
        .collect()
}

// =============================================================================
// Open Tests
// =============================================================================

#[test]
fn test_open_creates_file_and_parents() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("dir").join("tx.log");

    let logger = open_logger(&path);

    assert!(path.exists());
    assert_eq!(logger.path(), path.as_path());
    assert_eq!(logger.last_sequence(), 0);
}

#[test]
fn test_open_existing_log_is_idempotent() {
    let (_temp, path) = setup_temp_log();
    fs::write(&path, "1\t2\ta\t1\n").unwrap();

    let first = open_logger(&path);
    drop(first);
    let second = open_logger(&path);

    assert_eq!(fs::read_to_string(&path).unwrap(), "1\t2\ta\t1\n");
    let events = replay::read_all(&second).unwrap();
    assert_eq!(events.len(), 1);
}

#[test]
fn test_open_fails_on_directory() {
    let temp_dir = TempDir::new().unwrap();
    let result = FileTransactionLogger::open(temp_dir.path(), WalSyncStrategy::EveryWrite, 16);
    assert!(matches!(result, Err(TlogError::Io(_))));
}

// =============================================================================
// Append Tests
// =============================================================================

#[test]
fn test_scenario_put_put_delete() {
    let (_temp, path) = setup_temp_log();

    {
        let logger = open_active(&path);
        logger.write_put("a", "1");
        logger.write_put("b", "2");
        logger.write_delete("a");
        logger.shutdown().unwrap();
    }

    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "1\t2\ta\t1\n2\t2\tb\t2\n3\t1\ta\t\n"
    );

    let logger = open_logger(&path);
    let store = MemStore::new();
    let stats = replay::restore(&logger, &store).unwrap();

    assert_eq!(stats.events, 3);
    assert_eq!(stats.last_sequence, 3);
    assert_eq!(store.len(), 1);
    assert_eq!(store.get("b").unwrap(), "2");
    assert!(matches!(store.get("a"), Err(TlogError::KeyNotFound)));
}

#[test]
fn test_flush_makes_appends_visible() {
    let (_temp, path) = setup_temp_log();
    let logger = open_active(&path);

    for i in 0..25 {
        logger.write_put(&format!("key{}", i), "v");
    }
    logger.flush().unwrap();

    assert_eq!(logger.pending(), 0);
    assert_eq!(logger.last_sequence(), 25);
    assert_eq!(sequences_on_disk(&path), (1..=25).collect::<Vec<u64>>());
}

#[test]
fn test_batched_sync_strategy_still_writes_every_line() {
    let (_temp, path) = setup_temp_log();
    let logger =
        FileTransactionLogger::open(&path, WalSyncStrategy::EveryNEntries { count: 10 }, 16)
            .unwrap();
    replay::read_all(&logger).unwrap();
    logger.activate().unwrap();

    for i in 0..7 {
        logger.write_put(&format!("key{}", i), "v");
    }
    logger.shutdown().unwrap();

    assert_eq!(sequences_on_disk(&path).len(), 7);
}

#[test]
fn test_sequence_continues_after_reopen() {
    let (_temp, path) = setup_temp_log();

    {
        let logger = open_active(&path);
        logger.write_put("a", "1");
        logger.write_put("b", "2");
        logger.write_put("c", "3");
        logger.shutdown().unwrap();
    }

    let logger = open_active(&path);
    assert_eq!(logger.last_sequence(), 3);
    logger.write_delete("b");
    logger.shutdown().unwrap();

    let lines: Vec<String> = fs::read_to_string(&path)
        .unwrap()
        .lines()
        .map(String::from)
        .collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[3], "4\t1\tb\t");
}

#[test]
fn test_sequence_gaps_are_accepted() {
    let (_temp, path) = setup_temp_log();
    fs::write(&path, "1\t2\ta\t1\n5\t2\tb\t2\n9\t1\ta\t\n").unwrap();

    let logger = open_logger(&path);
    let events = replay::read_all(&logger).unwrap();
    let sequences: Vec<u64> = events.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![1, 5, 9]);

    logger.activate().unwrap();
    logger.write_put("c", "3");
    logger.shutdown().unwrap();

    assert_eq!(sequences_on_disk(&path), vec![1, 5, 9, 10]);
}

// =============================================================================
// Replay Round-Trip Tests
// =============================================================================

#[test]
fn test_replay_matches_appended_events() {
    let (_temp, path) = setup_temp_log();

    let mut expected = Vec::new();
    {
        let logger = open_active(&path);
        for i in 0..60u64 {
            let key = format!("key{}", i % 7);
            if i % 3 == 2 {
                logger.write_delete(&key);
                expected.push(Event::delete(key).with_sequence(i + 1));
            } else {
                let value = format!("value{}", i);
                logger.write_put(&key, &value);
                expected.push(Event::put(key, value).with_sequence(i + 1));
            }
        }
        logger.shutdown().unwrap();
    }

    let logger = open_logger(&path);
    let replayed = replay::read_all(&logger).unwrap();
    assert_eq!(replayed, expected);
}

#[test]
fn test_round_trip_text_needing_escapes() {
    let (_temp, path) = setup_temp_log();

    {
        let logger = open_active(&path);
        logger.write_put("multi\nline", "a\tb\\c\r\n");
        logger.write_put("unicode-ключ", "värde ✓");
        logger.write_put("empty-value", "");
        logger.shutdown().unwrap();
    }

    let logger = open_logger(&path);
    let replayed = replay::read_all(&logger).unwrap();
    assert_eq!(
        replayed,
        vec![
            Event::put("multi\nline", "a\tb\\c\r\n").with_sequence(1),
            Event::put("unicode-ключ", "värde ✓").with_sequence(2),
            Event::put("empty-value", "").with_sequence(3),
        ]
    );
}

#[test]
fn test_replay_empty_log() {
    let (_temp, path) = setup_temp_log();
    let logger = open_logger(&path);

    let (events, errors) = replay::scan(&logger);

    assert!(events.is_empty());
    assert!(errors.is_empty());
}

// =============================================================================
// Replay Corruption Tests
// =============================================================================

#[test]
fn test_duplicate_sequence_halts_replay() {
    let (_temp, path) = setup_temp_log();
    fs::write(&path, "1\t2\ta\t1\n1\t2\tb\t2\n2\t2\tc\t3\n").unwrap();

    let logger = open_logger(&path);
    let (events, errors) = replay::scan(&logger);

    assert_eq!(events, vec![Event::put("a", "1").with_sequence(1)]);
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        errors[0],
        TlogError::SequenceViolation { last: 1, found: 1 }
    ));
}

#[test]
fn test_decreasing_sequence_halts_replay() {
    let (_temp, path) = setup_temp_log();
    fs::write(&path, "1\t2\ta\t1\n2\t2\tb\t2\n5\t2\tc\t3\n4\t2\td\t4\n6\t2\te\t5\n").unwrap();

    let logger = open_logger(&path);
    let (events, errors) = replay::scan(&logger);

    let keys: Vec<&str> = events.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, vec!["a", "b", "c"]);
    assert!(matches!(
        errors.as_slice(),
        [TlogError::SequenceViolation { last: 5, found: 4 }]
    ));
}

#[test]
fn test_malformed_line_halts_replay() {
    let (_temp, path) = setup_temp_log();
    fs::write(&path, "1\t2\ta\t1\nnot a record\n3\t2\tc\t3\n").unwrap();

    let logger = open_logger(&path);
    let (events, errors) = replay::scan(&logger);

    assert_eq!(events.len(), 1);
    assert!(matches!(
        errors.as_slice(),
        [TlogError::Corruption { line: 2, .. }]
    ));
}

#[test]
fn test_strict_read_reports_error() {
    let (_temp, path) = setup_temp_log();
    fs::write(&path, "2\t2\ta\t1\n2\t1\ta\t\n").unwrap();

    let logger = open_logger(&path);
    let result = replay::read_all(&logger);

    assert!(matches!(result, Err(TlogError::SequenceViolation { .. })));
}

#[test]
fn test_unterminated_tail_halts_replay() {
    let (_temp, path) = setup_temp_log();
    fs::write(&path, "1\t2\ta\t1\n2\t2\tb\t2").unwrap();

    let logger = open_logger(&path);
    let (events, errors) = replay::scan(&logger);

    assert_eq!(events, vec![Event::put("a", "1").with_sequence(1)]);
    assert!(matches!(
        errors.as_slice(),
        [TlogError::Corruption { line: 2, .. }]
    ));
}

#[test]
fn test_torn_write_is_not_appended_onto() {
    let (_temp, path) = setup_temp_log();
    fs::write(&path, "1\t2\ta\t1").unwrap();

    let logger = open_logger(&path);
    let errors = logger.errors();
    let store = MemStore::new();

    let result = replay::restore(&logger, &store);
    assert!(matches!(result, Err(TlogError::Corruption { line: 1, .. })));

    // Not activated, so nothing gets fused onto the torn line.
    logger.write_put("b", "2");
    assert!(matches!(
        errors.recv_timeout(Duration::from_secs(1)),
        Ok(TlogError::NotActive)
    ));
    logger.shutdown().unwrap();

    assert_eq!(fs::read_to_string(&path).unwrap(), "1\t2\ta\t1");
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_append_before_activate_is_rejected() {
    let (_temp, path) = setup_temp_log();
    let logger = open_logger(&path);
    let errors = logger.errors();

    logger.write_put("k", "v");

    assert!(matches!(
        errors.recv_timeout(Duration::from_secs(1)),
        Ok(TlogError::NotActive)
    ));
    assert_eq!(fs::read_to_string(&path).unwrap(), "");
}

#[test]
fn test_read_events_only_once() {
    let (_temp, path) = setup_temp_log();
    let logger = open_logger(&path);

    replay::read_all(&logger).unwrap();
    let second = replay::read_all(&logger);

    assert!(matches!(second, Err(TlogError::InvalidState(_))));
}

#[test]
fn test_read_events_after_activate_is_rejected() {
    let (_temp, path) = setup_temp_log();
    let logger = open_logger(&path);
    logger.activate().unwrap();

    let (events, errors) = replay::scan(&logger);

    assert!(events.is_empty());
    assert!(matches!(errors.as_slice(), [TlogError::InvalidState(_)]));
}

#[test]
fn test_activate_without_replay_continues_sequence() {
    let (_temp, path) = setup_temp_log();
    fs::write(&path, "1\t2\ta\t1\n2\t2\tb\t2\n").unwrap();

    let logger = open_logger(&path);
    logger.activate().unwrap();
    assert_eq!(logger.last_sequence(), 2);

    logger.write_put("c", "3");
    logger.shutdown().unwrap();

    assert_eq!(sequences_on_disk(&path), vec![1, 2, 3]);
    let reopened = open_logger(&path);
    assert_eq!(replay::read_all(&reopened).unwrap().len(), 3);
}

#[test]
fn test_activate_without_replay_on_torn_log_fails() {
    let (_temp, path) = setup_temp_log();
    fs::write(&path, "1\t2\ta\t1").unwrap();

    let logger = open_logger(&path);

    assert!(matches!(
        logger.activate(),
        Err(TlogError::Corruption { line: 1, .. })
    ));
    assert!(matches!(logger.activate(), Err(TlogError::InvalidState(_))));
    assert_eq!(fs::read_to_string(&path).unwrap(), "1\t2\ta\t1");
}

#[test]
fn test_activate_twice_is_noop() {
    let (_temp, path) = setup_temp_log();
    let logger = open_active(&path);

    logger.activate().unwrap();
    logger.write_put("k", "v");
    logger.flush().unwrap();

    assert_eq!(sequences_on_disk(&path), vec![1]);
}

#[test]
fn test_activate_after_shutdown_fails() {
    let (_temp, path) = setup_temp_log();
    let logger = open_logger(&path);
    logger.shutdown().unwrap();

    assert!(matches!(logger.activate(), Err(TlogError::Closed)));
}

#[test]
fn test_shutdown_is_idempotent() {
    let (_temp, path) = setup_temp_log();
    let logger = open_active(&path);
    logger.write_put("k", "v");

    logger.shutdown().unwrap();
    logger.shutdown().unwrap();

    assert_eq!(sequences_on_disk(&path), vec![1]);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_writers_get_distinct_sequences() {
    let (_temp, path) = setup_temp_log();
    let logger = Arc::new(open_active(&path));

    let handles: Vec<_> = (0..100)
        .map(|i| {
            let logger = Arc::clone(&logger);
            thread::spawn(move || logger.write_put(&format!("key{}", i), &format!("value{}", i)))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    logger.flush().unwrap();

    let sequences = sequences_on_disk(&path);
    assert_eq!(sequences, (1..=100).collect::<Vec<u64>>());

    logger.shutdown().unwrap();
    let replayed = replay::read_all(&open_logger(&path)).unwrap();
    let mut keys: Vec<String> = replayed.iter().map(|e| e.key.clone()).collect();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), 100);
    assert!(replayed.iter().all(|e| e.event_type == EventType::Put));
}
