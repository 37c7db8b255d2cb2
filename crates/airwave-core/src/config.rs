//! Engine configuration.
//!
//! Everything the dispatcher consumes is immutable data built here: the
//! versioned partition set, the route table, precache manifests, and the
//! maintenance tunables. The defaults mirror the Airwave radio page: php
//! API endpoints are network-first, HLS manifests and segments are
//! network-only, media and images are cache-first, css/js revalidate in the
//! background.

use crate::classify::{ContentClass, RouteMatcher, RouteRule};
use crate::error::{AirwaveError, Result};
use crate::strategy::Strategy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fixed network tunables.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
    pub const USER_AGENT: &'static str = "airwave-cache/0.3";
    /// Attempts for precache fetches (install is best-effort, so a couple
    /// of retries per asset are cheap).
    pub const PRECACHE_RETRY_ATTEMPTS: u32 = 2;
    pub const PRECACHE_RETRY_BASE_DELAY: Duration = Duration::from_millis(250);
}

/// Fixed maintenance tunables.
pub struct SweepConfig;

impl SweepConfig {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3600);
    pub const DEFAULT_DYNAMIC_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 3600);
}

/// A named cache partition with its eviction policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// Short name ("core", "dynamic", "api", "media").
    pub name: String,
    /// Entry-count cap; oldest entries are evicted past this.
    #[serde(default)]
    pub max_entries: Option<usize>,
    /// Age threshold applied by the maintenance sweep.
    #[serde(default)]
    pub max_age: Option<Duration>,
}

/// Immutable configuration for the cache policy engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Prefix for on-disk partition names.
    pub cache_prefix: String,
    /// Cache version; bumping it invalidates every old partition on activate.
    pub version: String,
    /// Partition set with per-partition eviction policy.
    pub partitions: Vec<PartitionConfig>,
    /// Ordered route table, first match wins.
    pub routes: Vec<RouteRule>,
    /// Short name of the partition that receives precached assets.
    pub precache_partition: String,
    /// Core assets fetched into the precache partition at install.
    pub precache_assets: Vec<String>,
    /// External/CDN assets, fetched best-effort at install.
    pub external_assets: Vec<String>,
    /// Interval between maintenance sweeps.
    pub sweep_interval: Duration,
    /// Chance (0.0..=1.0) that a fresh cache-first hit triggers a background
    /// refresh. Best-effort optimization, not a correctness requirement.
    pub refresh_probability: f64,
    /// Timeout for upstream fetches.
    pub request_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_prefix: "airwave".to_string(),
            version: "v3".to_string(),
            partitions: vec![
                PartitionConfig {
                    name: "core".to_string(),
                    max_entries: None,
                    max_age: None,
                },
                PartitionConfig {
                    name: "dynamic".to_string(),
                    max_entries: Some(100),
                    max_age: Some(SweepConfig::DEFAULT_DYNAMIC_MAX_AGE),
                },
                PartitionConfig {
                    name: "api".to_string(),
                    max_entries: Some(50),
                    max_age: Some(Duration::from_secs(24 * 3600)),
                },
                PartitionConfig {
                    name: "media".to_string(),
                    max_entries: Some(60),
                    max_age: None,
                },
            ],
            routes: default_routes(),
            precache_partition: "core".to_string(),
            precache_assets: Vec::new(),
            external_assets: Vec::new(),
            sweep_interval: SweepConfig::DEFAULT_INTERVAL,
            refresh_probability: 0.1,
            request_timeout: NetworkConfig::REQUEST_TIMEOUT,
        }
    }
}

impl EngineConfig {
    /// Full on-disk name of a partition ("airwave-media-v3").
    pub fn partition_name(&self, short: &str) -> String {
        format!("{}-{}-{}", self.cache_prefix, short, self.version)
    }

    /// The set of partition names valid for the current version.
    ///
    /// Anything outside this set is deleted on activation.
    pub fn valid_partition_names(&self) -> Vec<String> {
        self.partitions
            .iter()
            .map(|p| self.partition_name(&p.name))
            .collect()
    }

    /// Look up a partition's policy by short name.
    pub fn partition(&self, short: &str) -> Option<&PartitionConfig> {
        self.partitions.iter().find(|p| p.name == short)
    }

    /// Partition for paths no route matches: the catch-all (last) route's
    /// partition, falling back to the first configured partition.
    pub fn default_route_partition(&self) -> String {
        self.routes
            .last()
            .map(|r| r.partition.clone())
            .or_else(|| self.partitions.first().map(|p| p.name.clone()))
            .unwrap_or_default()
    }

    /// Partitions searched for a cached root document during offline
    /// fallback: the precache target first, then every partition a
    /// document route stores into.
    pub fn document_partition_names(&self) -> Vec<String> {
        let mut shorts = vec![self.precache_partition.clone()];
        for rule in &self.routes {
            if rule.class == ContentClass::Document && !shorts.contains(&rule.partition) {
                shorts.push(rule.partition.clone());
            }
        }
        shorts.iter().map(|s| self.partition_name(s)).collect()
    }

    /// Validate cross-references and ranges.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.refresh_probability) {
            return Err(AirwaveError::Validation {
                field: "refresh_probability".to_string(),
                message: format!("must be within 0.0..=1.0, got {}", self.refresh_probability),
            });
        }
        if self.partitions.is_empty() {
            return Err(AirwaveError::Validation {
                field: "partitions".to_string(),
                message: "at least one partition is required".to_string(),
            });
        }
        if self.partition(&self.precache_partition).is_none() {
            return Err(AirwaveError::Validation {
                field: "precache_partition".to_string(),
                message: format!("unknown partition '{}'", self.precache_partition),
            });
        }
        for rule in &self.routes {
            if self.partition(&rule.partition).is_none() {
                return Err(AirwaveError::Validation {
                    field: "routes".to_string(),
                    message: format!("route references unknown partition '{}'", rule.partition),
                });
            }
        }
        Ok(())
    }
}

/// The default route table for the radio page.
fn default_routes() -> Vec<RouteRule> {
    let suffix = |exts: &[&str]| RouteMatcher::Suffix(exts.iter().map(|s| s.to_string()).collect());

    vec![
        // Live playback correctness depends on always reaching the network;
        // these must stay ahead of every cacheable rule.
        RouteRule {
            matcher: suffix(&[".m3u8", ".ts"]),
            class: ContentClass::Streaming,
            strategy: Strategy::NetworkOnly,
            partition: "dynamic".to_string(),
            max_age: None,
        },
        RouteRule {
            matcher: RouteMatcher::Contains("/stream".to_string()),
            class: ContentClass::Streaming,
            strategy: Strategy::NetworkOnly,
            partition: "dynamic".to_string(),
            max_age: None,
        },
        // Backend php endpoints (CSRF tokens, comments).
        RouteRule {
            matcher: suffix(&[".php"]),
            class: ContentClass::Api,
            strategy: Strategy::NetworkFirst,
            partition: "api".to_string(),
            max_age: Some(Duration::from_secs(300)),
        },
        RouteRule {
            matcher: RouteMatcher::Prefix("/api".to_string()),
            class: ContentClass::Api,
            strategy: Strategy::NetworkFirst,
            partition: "api".to_string(),
            max_age: Some(Duration::from_secs(300)),
        },
        RouteRule {
            matcher: suffix(&[".mp3", ".ogg", ".aac", ".m4a", ".flac", ".wav"]),
            class: ContentClass::Audio,
            strategy: Strategy::CacheFirst,
            partition: "media".to_string(),
            max_age: None,
        },
        RouteRule {
            matcher: suffix(&[".mp4", ".webm"]),
            class: ContentClass::Video,
            strategy: Strategy::CacheFirst,
            partition: "media".to_string(),
            max_age: None,
        },
        RouteRule {
            matcher: suffix(&[".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp", ".ico"]),
            class: ContentClass::Image,
            strategy: Strategy::CacheFirst,
            partition: "core".to_string(),
            max_age: Some(Duration::from_secs(30 * 24 * 3600)),
        },
        RouteRule {
            matcher: suffix(&[".woff", ".woff2", ".ttf", ".eot"]),
            class: ContentClass::Font,
            strategy: Strategy::CacheFirst,
            partition: "core".to_string(),
            max_age: Some(Duration::from_secs(365 * 24 * 3600)),
        },
        RouteRule {
            matcher: suffix(&[".css"]),
            class: ContentClass::Stylesheet,
            strategy: Strategy::StaleWhileRevalidate,
            partition: "core".to_string(),
            max_age: None,
        },
        RouteRule {
            matcher: suffix(&[".js"]),
            class: ContentClass::Script,
            strategy: Strategy::StaleWhileRevalidate,
            partition: "core".to_string(),
            max_age: None,
        },
        RouteRule {
            matcher: suffix(&[".json"]),
            class: ContentClass::Json,
            strategy: Strategy::NetworkFirst,
            partition: "dynamic".to_string(),
            max_age: Some(Duration::from_secs(3600)),
        },
        // The offline page comes from the precache or not at all; fetching
        // it over the network defeats its purpose.
        RouteRule {
            matcher: RouteMatcher::Contains("/offline.html".to_string()),
            class: ContentClass::Document,
            strategy: Strategy::CacheOnly,
            partition: "core".to_string(),
            max_age: None,
        },
        RouteRule {
            matcher: suffix(&[".html", ".htm"]),
            class: ContentClass::Document,
            strategy: Strategy::NetworkFirst,
            partition: "dynamic".to_string(),
            max_age: None,
        },
        RouteRule {
            matcher: RouteMatcher::Navigation,
            class: ContentClass::Document,
            strategy: Strategy::NetworkFirst,
            partition: "dynamic".to_string(),
            max_age: None,
        },
    ]
}
