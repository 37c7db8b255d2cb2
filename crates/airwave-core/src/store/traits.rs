//! Cache store trait and entry types.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A stored response with its cache metadata.
///
/// `cached_at` and `max_age` are the two synthetic fields stamped alongside
/// the original response; they drive freshness checks and age-based pruning.
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// When the entry was written.
    pub cached_at: DateTime<Utc>,
    /// Freshness window override for this entry, if any.
    pub max_age: Option<Duration>,
}

impl StoredEntry {
    /// Entry age relative to `now`. Saturates to zero for clock skew.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.cached_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Whether the entry is still inside its freshness window.
    ///
    /// Entries without a `max_age` never go stale on read; only the
    /// maintenance sweep removes them.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match self.max_age {
            Some(max_age) => self.age(now) <= max_age,
            None => true,
        }
    }
}

/// Per-partition statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionStats {
    pub partition: String,
    pub entry_count: usize,
    pub total_size_bytes: u64,
    pub oldest_cached_at: Option<DateTime<Utc>>,
}

/// Partitioned url -> response storage.
///
/// Operations are synchronous to match rusqlite; put/delete are atomic per
/// key and last-writer-wins under concurrent handlers.
pub trait CacheStore: Send + Sync {
    /// Get the entry for a URL, regardless of freshness.
    fn get(&self, partition: &str, url: &str) -> Result<Option<StoredEntry>>;

    /// Store an entry, replacing any existing one for the same URL.
    fn put(&self, partition: &str, url: &str, entry: &StoredEntry) -> Result<()>;

    /// Delete one entry. Returns whether it existed.
    fn delete(&self, partition: &str, url: &str) -> Result<bool>;

    /// Delete a whole partition. Returns the number of entries removed.
    fn delete_partition(&self, partition: &str) -> Result<usize>;

    /// All partition names currently present in storage.
    fn partition_names(&self) -> Result<Vec<String>>;

    /// Statistics for every partition.
    fn stats(&self) -> Result<Vec<PartitionStats>>;

    /// Remove entries cached strictly before `cutoff`.
    ///
    /// An entry cached exactly at the cutoff is retained.
    fn prune_older_than(&self, partition: &str, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Evict oldest-by-`cached_at` entries until the partition holds at most
    /// `max_entries`. Returns the number evicted.
    fn cap_entries(&self, partition: &str, max_entries: usize) -> Result<usize>;
}
