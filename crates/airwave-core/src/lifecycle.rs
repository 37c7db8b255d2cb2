//! Cache lifecycle: install precache, activation cleanup, maintenance sweep.

use crate::config::{EngineConfig, NetworkConfig};
use crate::error::Result;
use crate::fetch::Fetcher;
use crate::retry::{with_backoff, RetryConfig};
use crate::store::{CacheStore, StoredEntry};
use crate::types::GatewayRequest;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Outcome of an install precache run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstallReport {
    /// URLs now present in the core partition.
    pub cached: Vec<String>,
    /// URLs that could not be fetched, with the reason.
    pub failed: Vec<(String, String)>,
}

/// Outcome of an activation pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivateReport {
    /// Partitions outside the valid set that were deleted.
    pub deleted_partitions: Vec<String>,
    /// Partitions in the valid set that were left untouched.
    pub retained_partitions: Vec<String>,
}

/// Outcome of one maintenance sweep.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SweepReport {
    /// Entries removed because they aged past a partition threshold.
    pub pruned: usize,
    /// Entries removed to respect partition entry caps.
    pub evicted: usize,
}

/// Owns install, activation, and the periodic sweep.
pub struct LifecycleManager {
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    config: Arc<EngineConfig>,
}

impl LifecycleManager {
    pub fn new(
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            store,
            fetcher,
            config,
        }
    }

    /// Precache the core-asset manifest, then the external list.
    ///
    /// Every asset settles independently: one bad URL is reported but never
    /// aborts the rest, and external/CDN assets are purely best-effort.
    pub async fn install(&self) -> InstallReport {
        let mut report = self
            .precache(&self.config.precache_assets, "core assets")
            .await;

        let external = self
            .precache(&self.config.external_assets, "external assets")
            .await;
        report.cached.extend(external.cached);
        report.failed.extend(external.failed);

        info!(
            "Install complete: {} cached, {} failed",
            report.cached.len(),
            report.failed.len()
        );
        report
    }

    async fn precache(&self, urls: &[String], what: &str) -> InstallReport {
        if urls.is_empty() {
            return InstallReport::default();
        }
        debug!("Precaching {} {}", urls.len(), what);

        let partition = self.config.partition_name(&self.config.precache_partition);
        let retry = RetryConfig {
            max_attempts: NetworkConfig::PRECACHE_RETRY_ATTEMPTS,
            base_delay: NetworkConfig::PRECACHE_RETRY_BASE_DELAY,
            ..Default::default()
        };

        let fetches = urls.iter().map(|url| {
            let retry = retry.clone();
            async move {
                let request = GatewayRequest::get(url.clone());
                let result = with_backoff(
                    &retry,
                    || self.fetcher.fetch(&request),
                    |e| e.is_retryable(),
                )
                .await;
                (url.clone(), result)
            }
        });

        let mut report = InstallReport::default();
        for (url, result) in futures::future::join_all(fetches).await {
            match result {
                Ok(fetched) if fetched.is_cacheable() => {
                    let entry = StoredEntry {
                        status: fetched.status,
                        headers: fetched.headers,
                        body: fetched.body,
                        cached_at: Utc::now(),
                        max_age: None,
                    };
                    match self.store.put(&partition, &url, &entry) {
                        Ok(()) => report.cached.push(url),
                        Err(e) => report.failed.push((url, e.to_string())),
                    }
                }
                Ok(fetched) => {
                    report
                        .failed
                        .push((url, format!("HTTP {}", fetched.status)));
                }
                Err(e) => {
                    warn!("Precache fetch failed for {}: {}", url, e);
                    report.failed.push((url, e.to_string()));
                }
            }
        }
        report
    }

    /// Delete every partition whose name is not in the current valid set.
    ///
    /// Takes effect immediately for all in-flight handlers; there is no
    /// waiting period.
    pub fn activate(&self) -> Result<ActivateReport> {
        let valid = self.config.valid_partition_names();
        let mut report = ActivateReport::default();

        for partition in self.store.partition_names()? {
            if valid.contains(&partition) {
                report.retained_partitions.push(partition);
            } else {
                let removed = self.store.delete_partition(&partition)?;
                info!(
                    "Activation deleted stale partition '{}' ({} entries)",
                    partition, removed
                );
                report.deleted_partitions.push(partition);
            }
        }
        Ok(report)
    }

    /// One maintenance pass: age-prune, then cap entry counts.
    ///
    /// Failures on individual partitions are logged and skipped; deleting an
    /// already-deleted entry is a no-op, so racing a concurrent handler is
    /// harmless.
    pub fn sweep(&self) -> SweepReport {
        let now = Utc::now();
        let mut report = SweepReport::default();

        for partition_config in &self.config.partitions {
            let partition = self.config.partition_name(&partition_config.name);

            if let Some(max_age) = partition_config.max_age {
                let cutoff = now
                    - chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::zero());
                match self.store.prune_older_than(&partition, cutoff) {
                    Ok(n) => report.pruned += n,
                    Err(e) => warn!("Sweep prune failed for '{}': {}", partition, e),
                }
            }

            if let Some(max_entries) = partition_config.max_entries {
                match self.store.cap_entries(&partition, max_entries) {
                    Ok(n) => report.evicted += n,
                    Err(e) => warn!("Sweep cap failed for '{}': {}", partition, e),
                }
            }
        }

        if report.pruned > 0 || report.evicted > 0 {
            info!(
                "Sweep removed {} aged and {} excess entries",
                report.pruned, report.evicted
            );
        }
        report
    }

    /// Spawn the periodic sweep task. Runs until the handle is dropped.
    pub fn start_maintenance(self: &Arc<Self>) -> MaintenanceHandle {
        let manager = self.clone();
        let interval = self.config.sweep_interval;
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so the sweep cadence
            // starts one full interval after startup.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        debug!("Maintenance task shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        manager.sweep();
                    }
                }
            }
        });

        MaintenanceHandle {
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

/// Handle to the periodic sweep task. Dropping it stops the task.
pub struct MaintenanceHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl MaintenanceHandle {
    /// Stop the sweep task.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AirwaveError;
    use crate::store::SqliteStore;
    use crate::types::FetchedResponse;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Fetcher that fails for URLs in a deny set.
    struct SelectiveFetcher {
        deny: Mutex<HashSet<String>>,
    }

    impl SelectiveFetcher {
        fn denying(urls: &[&str]) -> Self {
            Self {
                deny: Mutex::new(urls.iter().map(|s| s.to_string()).collect()),
            }
        }
    }

    #[async_trait::async_trait]
    impl Fetcher for SelectiveFetcher {
        async fn fetch(&self, request: &GatewayRequest) -> Result<FetchedResponse> {
            if self.deny.lock().unwrap().contains(&request.url) {
                return Err(AirwaveError::Other(format!("denied: {}", request.url)));
            }
            Ok(FetchedResponse {
                status: 200,
                headers: vec![],
                body: b"asset".to_vec(),
            })
        }
    }

    fn manager_with(
        fetcher: Arc<dyn Fetcher>,
        mutate: impl FnOnce(&mut EngineConfig),
    ) -> (Arc<LifecycleManager>, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let mut config = EngineConfig::default();
        mutate(&mut config);
        let manager = Arc::new(LifecycleManager::new(
            store.clone(),
            fetcher,
            Arc::new(config),
        ));
        (manager, store)
    }

    #[tokio::test]
    async fn test_install_settles_each_asset_independently() {
        let fetcher = Arc::new(SelectiveFetcher::denying(&["https://radio.example/broken.js"]));
        let (manager, store) = manager_with(fetcher, |c| {
            c.precache_assets = vec![
                "https://radio.example/".to_string(),
                "https://radio.example/broken.js".to_string(),
                "https://radio.example/css/player.css".to_string(),
            ];
        });

        let report = manager.install().await;
        assert_eq!(report.cached.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "https://radio.example/broken.js");

        // The good assets made it into the core partition despite the failure.
        assert!(store
            .get("airwave-core-v3", "https://radio.example/css/player.css")
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_install_with_empty_manifest_is_a_noop() {
        let fetcher = Arc::new(SelectiveFetcher::denying(&[]));
        let (manager, _) = manager_with(fetcher, |_| {});
        let report = manager.install().await;
        assert!(report.cached.is_empty());
        assert!(report.failed.is_empty());
    }

    #[tokio::test]
    async fn test_activate_deletes_only_stale_partitions() {
        let fetcher = Arc::new(SelectiveFetcher::denying(&[]));
        let (manager, store) = manager_with(fetcher, |_| {});

        let entry = StoredEntry {
            status: 200,
            headers: vec![],
            body: b"x".to_vec(),
            cached_at: Utc::now(),
            max_age: None,
        };
        store.put("airwave-core-v2", "/old", &entry).unwrap();
        store.put("airwave-core-v3", "/current", &entry).unwrap();
        store.put("airwave-media-v3", "/track.mp3", &entry).unwrap();

        let report = manager.activate().unwrap();
        assert_eq!(report.deleted_partitions, vec!["airwave-core-v2"]);
        assert!(report
            .retained_partitions
            .contains(&"airwave-core-v3".to_string()));
        assert!(store.get("airwave-core-v2", "/old").unwrap().is_none());
        assert!(store.get("airwave-core-v3", "/current").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sweep_prunes_by_age_and_caps_by_count() {
        let fetcher = Arc::new(SelectiveFetcher::denying(&[]));
        let (manager, store) = manager_with(fetcher, |c| {
            c.partitions = vec![
                crate::config::PartitionConfig {
                    name: "dynamic".to_string(),
                    max_entries: None,
                    max_age: Some(Duration::from_secs(3600)),
                },
                crate::config::PartitionConfig {
                    name: "media".to_string(),
                    max_entries: Some(2),
                    max_age: None,
                },
            ];
        });

        let now = Utc::now();
        let entry = |age_secs: i64| StoredEntry {
            status: 200,
            headers: vec![],
            body: b"x".to_vec(),
            cached_at: now - chrono::Duration::seconds(age_secs),
            max_age: None,
        };

        store.put("airwave-dynamic-v3", "/aged", &entry(7200)).unwrap();
        store.put("airwave-dynamic-v3", "/recent", &entry(60)).unwrap();
        store.put("airwave-media-v3", "/t1.mp3", &entry(300)).unwrap();
        store.put("airwave-media-v3", "/t2.mp3", &entry(200)).unwrap();
        store.put("airwave-media-v3", "/t3.mp3", &entry(100)).unwrap();

        let report = manager.sweep();
        assert_eq!(report.pruned, 1);
        assert_eq!(report.evicted, 1);

        assert!(store.get("airwave-dynamic-v3", "/aged").unwrap().is_none());
        assert!(store.get("airwave-dynamic-v3", "/recent").unwrap().is_some());
        // The oldest media entry went first.
        assert!(store.get("airwave-media-v3", "/t1.mp3").unwrap().is_none());
        assert!(store.get("airwave-media-v3", "/t3.mp3").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_maintenance_task_sweeps_on_interval() {
        let fetcher = Arc::new(SelectiveFetcher::denying(&[]));
        let (manager, store) = manager_with(fetcher, |c| {
            c.sweep_interval = Duration::from_millis(20);
        });

        let stale = StoredEntry {
            status: 200,
            headers: vec![],
            body: b"x".to_vec(),
            cached_at: Utc::now() - chrono::Duration::days(30),
            max_age: None,
        };
        store.put("airwave-api-v3", "/old.php", &stale).unwrap();

        let mut handle = manager.start_maintenance();
        tokio::time::sleep(Duration::from_millis(80)).await;
        handle.shutdown();

        assert!(store.get("airwave-api-v3", "/old.php").unwrap().is_none());
    }
}
