//! Airwave Cache - Offline-first HTTP cache policy engine for the Airwave
//! web radio player.
//!
//! Intercepts outgoing GET requests, classifies them by URL shape, and
//! resolves each one through a per-route caching strategy (cache-first,
//! network-first, network-only, cache-only, stale-while-revalidate) against a
//! versioned SQLite-backed cache. Playback streams are never cached.
//!
//! # Example
//!
//! ```rust,ignore
//! use airwave_cache::{CacheGateway, EngineConfig, GatewayRequest};
//!
//! #[tokio::main]
//! async fn main() -> airwave_cache::Result<()> {
//!     let gateway = CacheGateway::open("/var/lib/airwave/cache.db", EngineConfig::default())?;
//!
//!     // Precache the app shell, then drop partitions from older versions.
//!     gateway.install().await;
//!     gateway.activate()?;
//!
//!     let response = gateway
//!         .handle(&GatewayRequest::get("https://radio.example/css/player.css"))
//!         .await?;
//!     println!("{} bytes from {}", response.body.len(), response.source);
//!
//!     Ok(())
//! }
//! ```

pub mod classify;
pub mod config;
pub mod control;
pub mod error;
pub mod fetch;
pub mod lifecycle;
pub mod metrics;
pub mod offline;
pub mod retry;
pub mod store;
pub mod strategy;
pub mod types;

// Re-export commonly used types
pub use classify::{Classifier, ContentClass, RouteDecision, RouteMatcher, RouteRule};
pub use config::{EngineConfig, NetworkConfig, PartitionConfig, SweepConfig};
pub use control::{ControlHandle, ControlRequest, ControlResponse, ControlSender};
pub use error::{AirwaveError, Result};
pub use fetch::{Fetcher, HttpFetcher};
pub use lifecycle::{ActivateReport, InstallReport, LifecycleManager, MaintenanceHandle, SweepReport};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use offline::FallbackResolver;
pub use store::{CacheStore, PartitionStats, SqliteStore, StoredEntry};
pub use strategy::{PolicyEngine, Strategy};
pub use types::{FetchedResponse, GatewayRequest, GatewayResponse, ResponseSource};

use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use control::ControlDispatch;

/// Main entry point: one gateway per player instance.
///
/// Owns the cache store, the HTTP fetcher, the strategy engine, and the
/// lifecycle manager, and implements the control-command surface on top of
/// them. Construct it once, share it via [`Arc`], and route every outgoing
/// request through [`CacheGateway::handle`].
pub struct CacheGateway {
    config: Arc<EngineConfig>,
    store: Arc<dyn CacheStore>,
    engine: PolicyEngine,
    lifecycle: Arc<LifecycleManager>,
    metrics: Arc<EngineMetrics>,
}

impl CacheGateway {
    /// Open the gateway over a SQLite cache at the given path.
    pub fn open(db_path: impl AsRef<Path>, config: EngineConfig) -> Result<Self> {
        let store = Arc::new(SqliteStore::open(db_path)?);
        let fetcher = Arc::new(HttpFetcher::with_timeout(config.request_timeout)?);
        Self::with_parts(store, fetcher, config)
    }

    /// Open the gateway over an in-memory cache. Nothing survives a restart.
    pub fn in_memory(config: EngineConfig) -> Result<Self> {
        let store = Arc::new(SqliteStore::in_memory()?);
        let fetcher = Arc::new(HttpFetcher::with_timeout(config.request_timeout)?);
        Self::with_parts(store, fetcher, config)
    }

    /// Assemble a gateway from explicit parts. Lets tests swap in their own
    /// store or fetcher.
    pub fn with_parts(
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let metrics = Arc::new(EngineMetrics::new());

        let engine = PolicyEngine::new(
            store.clone(),
            fetcher.clone(),
            config.clone(),
            metrics.clone(),
        );
        let lifecycle = Arc::new(LifecycleManager::new(
            store.clone(),
            fetcher,
            config.clone(),
        ));

        info!(
            "Cache gateway ready: version {}, {} partitions",
            config.version,
            config.partitions.len()
        );

        Ok(Self {
            config,
            store,
            engine,
            lifecycle,
            metrics,
        })
    }

    /// Resolve one outgoing request through its route's strategy.
    pub async fn handle(&self, request: &GatewayRequest) -> Result<GatewayResponse> {
        self.engine.handle(request).await
    }

    /// Precache the asset manifests into the core partition.
    pub async fn install(&self) -> InstallReport {
        self.lifecycle.install().await
    }

    /// Drop partitions left over from previous versions.
    pub fn activate(&self) -> Result<ActivateReport> {
        self.lifecycle.activate()
    }

    /// Run one maintenance sweep now.
    pub fn sweep(&self) -> SweepReport {
        self.lifecycle.sweep()
    }

    /// Start the periodic maintenance sweep.
    pub fn start_maintenance(&self) -> MaintenanceHandle {
        self.lifecycle.start_maintenance()
    }

    /// Start the control-command loop for this gateway.
    pub fn start_control(self: &Arc<Self>) -> ControlHandle {
        control::start_control(self.clone())
    }

    /// Current counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Per-partition entry counts and sizes.
    pub fn status(&self) -> Result<Vec<PartitionStats>> {
        self.store.stats()
    }

    /// Empty one partition (by short name), or all of them.
    pub fn clear_cache(&self, partition: Option<&str>) -> Result<usize> {
        match partition {
            Some(short) => {
                if self.config.partition(short).is_none() {
                    return Err(AirwaveError::UnknownPartition(short.to_string()));
                }
                self.store.delete_partition(&self.config.partition_name(short))
            }
            None => {
                // Everything on disk, including partitions left over from
                // older versions.
                let mut deleted = 0;
                for name in self.store.partition_names()? {
                    deleted += self.store.delete_partition(&name)?;
                }
                Ok(deleted)
            }
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

#[async_trait::async_trait]
impl ControlDispatch for CacheGateway {
    async fn dispatch(
        &self,
        command: &str,
        params: serde_json::Value,
    ) -> Result<Option<serde_json::Value>> {
        match command {
            "cache_status" => {
                let stats = self.status()?;
                Ok(Some(json!({
                    "version": self.config.version,
                    "cache_prefix": self.config.cache_prefix,
                    "partitions": stats,
                })))
            }
            "clear_cache" => {
                let partition = params
                    .get("partition")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                let deleted = self.clear_cache(partition.as_deref())?;
                Ok(Some(json!({ "deleted": deleted })))
            }
            "update_cache" => {
                let report = self.install().await;
                Ok(Some(serde_json::to_value(report)?))
            }
            "skip_waiting" => {
                // Promote this version now: stale partitions go immediately.
                let report = self.activate()?;
                Ok(Some(serde_json::to_value(report)?))
            }
            "cache_cleanup" => {
                let report = self.sweep();
                Ok(Some(serde_json::to_value(report)?))
            }
            "get_metrics" => Ok(Some(serde_json::to_value(self.metrics())?)),
            _ => Ok(None),
        }
    }
}
