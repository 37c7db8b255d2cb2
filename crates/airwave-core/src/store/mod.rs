//! Partitioned response storage.
//!
//! A partition is a named, versioned set of url -> response pairs. Partitions
//! share one SQLite database; versioned names are how activation invalidates
//! stale content wholesale.

mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{CacheStore, PartitionStats, StoredEntry};
