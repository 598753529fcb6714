//! chainstore-storage: pluggable key-value backends for ChainStore.
//!
//! Backends:
//! - [`memory`]: in-memory (dev/testing, no persistence)
//! - [`sqlite`]: SQLite via `sqlx` (embedded, single-file persistence)

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemoryBackend;

#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteBackend, SqliteOptions};
