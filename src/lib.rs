//! # tlogkv
//!
//! A key-value store made durable by a transaction log:
//! - Every put/delete is appended to an ordered, sequence-numbered log
//! - Appends are queued to a background writer; failures surface out of band
//! - On startup the log is replayed to rebuild the store
//! - Two interchangeable backends: append-only text file or SQL table
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Service                            │
//! │          put/delete: store first, then log append           │
//! └──────────────┬──────────────────────────────┬───────────────┘
//!                │                              │
//!                ▼                              ▼
//!         ┌─────────────┐             ┌───────────────────┐
//!         │  MemStore   │◀── replay ──│ TransactionLogger │
//!         │  (RwLock)   │             │  queue + writer   │
//!         └─────────────┘             └─────────┬─────────┘
//!                                               │
//!                                  ┌────────────┴────────────┐
//!                                  ▼                         ▼
//!                          ┌──────────────┐         ┌──────────────┐
//!                          │   File log   │         │  SQL table   │
//!                          │ (TSV lines)  │         │  (SQLite)    │
//!                          └──────────────┘         └──────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod event;
pub mod logger;
pub mod store;
pub mod replay;
pub mod service;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::{Backend, Config, DbParams, WalSyncStrategy};
pub use error::{Result, TlogError};
pub use event::{Event, EventType};
pub use logger::{FileTransactionLogger, SqlTransactionLogger, TransactionLogger};
pub use replay::{restore, ReplayStats};
pub use service::Service;
pub use store::{KeyValueStore, MemStore};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of tlogkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
