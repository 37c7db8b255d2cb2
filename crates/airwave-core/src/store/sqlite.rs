//! SQLite-backed cache store.

use super::traits::{CacheStore, PartitionStats, StoredEntry};
use crate::error::{AirwaveError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// SQLite-backed partitioned store.
///
/// One database holds every partition; the partition name is a column, so
/// deleting a partition is a single statement. Thread-safe via an internal
/// mutex on the connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

/// Fixed-width UTC timestamp so lexicographic order in SQL matches
/// chronological order.
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl SqliteStore {
    /// Open (or create) a store at the given database path.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AirwaveError::Storage {
                message: format!("Failed to create store directory: {}", e),
                source: None,
            })?;
        }

        let conn = Connection::open(db_path).map_err(|e| AirwaveError::Storage {
            message: format!("Failed to open cache database: {}", e),
            source: Some(e),
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| AirwaveError::Storage {
                message: format!("Failed to set pragmas: {}", e),
                source: Some(e),
            })?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open an in-memory store. Used by tests and throwaway gateways.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| AirwaveError::Storage {
            message: format!("Failed to open in-memory database: {}", e),
            source: Some(e),
        })?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS responses (
                partition TEXT NOT NULL,
                url TEXT NOT NULL,
                status INTEGER NOT NULL,
                headers TEXT NOT NULL,
                body BLOB NOT NULL,
                cached_at TEXT NOT NULL,
                max_age_secs INTEGER,
                PRIMARY KEY (partition, url)
            );

            -- Oldest-first eviction and age pruning scan this ordering
            CREATE INDEX IF NOT EXISTS idx_responses_age
                ON responses(partition, cached_at);
            "#,
        )
        .map_err(|e| AirwaveError::Storage {
            message: format!("Failed to initialize store schema: {}", e),
            source: Some(e),
        })?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| AirwaveError::Storage {
            message: "Cache store mutex poisoned".to_string(),
            source: None,
        })
    }
}

impl CacheStore for SqliteStore {
    fn get(&self, partition: &str, url: &str) -> Result<Option<StoredEntry>> {
        let conn = self.lock()?;

        let row: Option<(u16, String, Vec<u8>, String, Option<i64>)> = conn
            .query_row(
                r#"
                SELECT status, headers, body, cached_at, max_age_secs
                FROM responses
                WHERE partition = ?1 AND url = ?2
                "#,
                params![partition, url],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| AirwaveError::Storage {
                message: format!("Failed to query cache entry: {}", e),
                source: Some(e),
            })?;

        let Some((status, headers_json, body, cached_at_str, max_age_secs)) = row else {
            return Ok(None);
        };

        let headers: Vec<(String, String)> =
            serde_json::from_str(&headers_json).unwrap_or_default();

        Ok(Some(StoredEntry {
            status,
            headers,
            body,
            cached_at: parse_ts(&cached_at_str),
            max_age: max_age_secs.map(|s| Duration::from_secs(s.max(0) as u64)),
        }))
    }

    fn put(&self, partition: &str, url: &str, entry: &StoredEntry) -> Result<()> {
        let conn = self.lock()?;

        let headers_json = serde_json::to_string(&entry.headers)?;
        let max_age_secs = entry.max_age.map(|d| d.as_secs() as i64);

        conn.execute(
            r#"
            INSERT OR REPLACE INTO responses
            (partition, url, status, headers, body, cached_at, max_age_secs)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                partition,
                url,
                entry.status,
                headers_json,
                entry.body,
                ts(entry.cached_at),
                max_age_secs
            ],
        )
        .map_err(|e| AirwaveError::Storage {
            message: format!("Failed to store cache entry: {}", e),
            source: Some(e),
        })?;

        Ok(())
    }

    fn delete(&self, partition: &str, url: &str) -> Result<bool> {
        let conn = self.lock()?;
        let deleted = conn
            .execute(
                "DELETE FROM responses WHERE partition = ?1 AND url = ?2",
                params![partition, url],
            )
            .map_err(|e| AirwaveError::Storage {
                message: format!("Failed to delete cache entry: {}", e),
                source: Some(e),
            })?;
        Ok(deleted > 0)
    }

    fn delete_partition(&self, partition: &str) -> Result<usize> {
        let conn = self.lock()?;
        let deleted = conn
            .execute(
                "DELETE FROM responses WHERE partition = ?1",
                params![partition],
            )
            .map_err(|e| AirwaveError::Storage {
                message: format!("Failed to delete partition: {}", e),
                source: Some(e),
            })?;
        debug!("Deleted partition '{}' ({} entries)", partition, deleted);
        Ok(deleted)
    }

    fn partition_names(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT DISTINCT partition FROM responses ORDER BY partition")
            .map_err(|e| AirwaveError::Storage {
                message: format!("Failed to prepare partition query: {}", e),
                source: Some(e),
            })?;

        let names = stmt
            .query_map([], |row| row.get(0))
            .map_err(|e| AirwaveError::Storage {
                message: format!("Failed to list partitions: {}", e),
                source: Some(e),
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(names)
    }

    fn stats(&self) -> Result<Vec<PartitionStats>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT partition, COUNT(*), COALESCE(SUM(LENGTH(body)), 0), MIN(cached_at)
                FROM responses
                GROUP BY partition
                ORDER BY partition
                "#,
            )
            .map_err(|e| AirwaveError::Storage {
                message: format!("Failed to prepare stats query: {}", e),
                source: Some(e),
            })?;

        let rows = stmt
            .query_map([], |row| {
                let partition: String = row.get(0)?;
                let entry_count: i64 = row.get(1)?;
                let total_size: i64 = row.get(2)?;
                let oldest: Option<String> = row.get(3)?;
                Ok(PartitionStats {
                    partition,
                    entry_count: entry_count as usize,
                    total_size_bytes: total_size as u64,
                    oldest_cached_at: oldest.as_deref().map(parse_ts),
                })
            })
            .map_err(|e| AirwaveError::Storage {
                message: format!("Failed to query stats: {}", e),
                source: Some(e),
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(rows)
    }

    fn prune_older_than(&self, partition: &str, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.lock()?;
        // Strict inequality: an entry cached exactly at the cutoff survives.
        let deleted = conn
            .execute(
                "DELETE FROM responses WHERE partition = ?1 AND cached_at < ?2",
                params![partition, ts(cutoff)],
            )
            .map_err(|e| AirwaveError::Storage {
                message: format!("Failed to prune partition: {}", e),
                source: Some(e),
            })?;
        if deleted > 0 {
            debug!("Pruned {} aged entries from '{}'", deleted, partition);
        }
        Ok(deleted)
    }

    fn cap_entries(&self, partition: &str, max_entries: usize) -> Result<usize> {
        let conn = self.lock()?;

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM responses WHERE partition = ?1",
                params![partition],
                |row| row.get(0),
            )
            .map_err(|e| AirwaveError::Storage {
                message: format!("Failed to count partition entries: {}", e),
                source: Some(e),
            })?;

        let excess = (count as usize).saturating_sub(max_entries);
        if excess == 0 {
            return Ok(0);
        }

        let evicted = conn
            .execute(
                r#"
                DELETE FROM responses
                WHERE partition = ?1 AND url IN (
                    SELECT url FROM responses
                    WHERE partition = ?1
                    ORDER BY cached_at ASC
                    LIMIT ?2
                )
                "#,
                params![partition, excess as i64],
            )
            .map_err(|e| AirwaveError::Storage {
                message: format!("Failed to evict from partition: {}", e),
                source: Some(e),
            })?;

        debug!(
            "Evicted {} oldest entries from '{}' (cap {})",
            evicted, partition, max_entries
        );
        Ok(evicted)
    }
}
