//! Strategy dispatch: one intercepted request in, one response out.
//!
//! Every intercepted GET is routed to exactly one strategy. Apart from
//! network-only (where a stale answer is worse than an error), a strategy
//! that cannot produce a real response hands the request to the offline
//! resolver, so no failure escapes to the caller.

use crate::classify::{Classifier, RouteDecision};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::fetch::Fetcher;
use crate::metrics::EngineMetrics;
use crate::offline::FallbackResolver;
use crate::store::{CacheStore, StoredEntry};
use crate::types::{GatewayRequest, GatewayResponse, ResponseSource};
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// The five caching behaviors a route can be assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    CacheFirst,
    NetworkFirst,
    NetworkOnly,
    CacheOnly,
    StaleWhileRevalidate,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Strategy::CacheFirst => "cache-first",
            Strategy::NetworkFirst => "network-first",
            Strategy::NetworkOnly => "network-only",
            Strategy::CacheOnly => "cache-only",
            Strategy::StaleWhileRevalidate => "stale-while-revalidate",
        };
        write!(f, "{}", name)
    }
}

/// The strategy dispatcher.
///
/// Holds shared handles so background revalidation tasks can outlive the
/// request that spawned them.
pub struct PolicyEngine {
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    classifier: Classifier,
    config: Arc<EngineConfig>,
    metrics: Arc<EngineMetrics>,
    fallback: FallbackResolver,
}

impl PolicyEngine {
    pub fn new(
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
        config: Arc<EngineConfig>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        let classifier = Classifier::new(config.routes.clone(), config.default_route_partition());
        let fallback = FallbackResolver::new(config.document_partition_names());
        Self {
            store,
            fetcher,
            classifier,
            config,
            metrics,
            fallback,
        }
    }

    /// Handle one outgoing request.
    ///
    /// Non-GET requests are forwarded untouched and their failures propagate;
    /// they were never intercepted. Intercepted GETs can only fail on
    /// network-only routes — everything else resolves to a response.
    pub async fn handle(&self, request: &GatewayRequest) -> Result<GatewayResponse> {
        let start = Instant::now();

        if !request.is_get() {
            self.metrics.record_network_request();
            let fetched = self.fetcher.fetch(request).await.inspect_err(|_| {
                self.metrics.record_network_failure();
            })?;
            self.metrics.record_latency(start.elapsed());
            return Ok(GatewayResponse::from_network(fetched));
        }

        let decision = self.classifier.classify(&request.path());
        let partition = self.config.partition_name(&decision.partition);
        debug!(
            "{} {} -> {} ({})",
            request.method, request.url, decision.strategy, decision.class
        );

        let result = match decision.strategy {
            Strategy::CacheFirst => Ok(self.cache_first(request, &decision, &partition).await),
            Strategy::NetworkFirst => Ok(self.network_first(request, &decision, &partition).await),
            Strategy::NetworkOnly => self.network_only(request).await,
            Strategy::CacheOnly => Ok(self.cache_only(request, &decision, &partition)),
            Strategy::StaleWhileRevalidate => {
                Ok(self.stale_while_revalidate(request, &decision, &partition).await)
            }
        };

        self.metrics.record_latency(start.elapsed());
        result
    }

    /// The classifier in use (for introspection and tests).
    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    // Strategy handlers

    async fn cache_first(
        &self,
        request: &GatewayRequest,
        decision: &RouteDecision,
        partition: &str,
    ) -> GatewayResponse {
        let now = Utc::now();
        match self.lookup(partition, &request.url) {
            Some(entry) if entry.is_fresh(now) => {
                self.metrics.record_cache_hit();
                self.maybe_background_refresh(request, decision, partition);
                cached_response(entry)
            }
            Some(stale) => {
                // Freshness window elapsed: refresh from network, keep the
                // stale copy as a safety net.
                self.metrics.record_cache_miss();
                match self.fetch_and_store(request, decision, partition).await {
                    Ok(response) => response,
                    Err(_) => {
                        debug!("Serving stale entry for {} after network failure", request.url);
                        cached_response(stale)
                    }
                }
            }
            None => {
                self.metrics.record_cache_miss();
                match self.fetch_and_store(request, decision, partition).await {
                    Ok(response) => response,
                    Err(_) => self.offline(request, decision),
                }
            }
        }
    }

    async fn network_first(
        &self,
        request: &GatewayRequest,
        decision: &RouteDecision,
        partition: &str,
    ) -> GatewayResponse {
        match self.fetch_and_store(request, decision, partition).await {
            Ok(response) => response,
            Err(e) => {
                debug!("Network-first fetch failed for {}: {}", request.url, e);
                match self.lookup(partition, &request.url) {
                    Some(entry) => {
                        self.metrics.record_cache_hit();
                        cached_response(entry)
                    }
                    None => {
                        self.metrics.record_cache_miss();
                        self.offline(request, decision)
                    }
                }
            }
        }
    }

    /// Never reads or writes cache. The failure path is deliberate: a stale
    /// stream manifest or segment breaks live playback.
    async fn network_only(&self, request: &GatewayRequest) -> Result<GatewayResponse> {
        self.metrics.record_network_request();
        let fetched = self.fetcher.fetch(request).await.inspect_err(|_| {
            self.metrics.record_network_failure();
        })?;
        Ok(GatewayResponse::from_network(fetched))
    }

    fn cache_only(
        &self,
        request: &GatewayRequest,
        decision: &RouteDecision,
        partition: &str,
    ) -> GatewayResponse {
        match self.lookup(partition, &request.url) {
            Some(entry) => {
                self.metrics.record_cache_hit();
                cached_response(entry)
            }
            None => {
                self.metrics.record_cache_miss();
                self.offline(request, decision)
            }
        }
    }

    async fn stale_while_revalidate(
        &self,
        request: &GatewayRequest,
        decision: &RouteDecision,
        partition: &str,
    ) -> GatewayResponse {
        match self.lookup(partition, &request.url) {
            Some(entry) => {
                self.metrics.record_cache_hit();
                self.spawn_revalidation(request, decision, partition);
                cached_response(entry)
            }
            None => {
                self.metrics.record_cache_miss();
                match self.fetch_and_store(request, decision, partition).await {
                    Ok(response) => response,
                    Err(_) => self.offline(request, decision),
                }
            }
        }
    }

    // Shared plumbing

    /// Cache lookup with storage failures degraded to misses.
    fn lookup(&self, partition: &str, url: &str) -> Option<StoredEntry> {
        match self.store.get(partition, url) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Cache lookup failed for {}: {} (treating as miss)", url, e);
                None
            }
        }
    }

    /// Fetch from the network; store a copy of cacheable responses.
    async fn fetch_and_store(
        &self,
        request: &GatewayRequest,
        decision: &RouteDecision,
        partition: &str,
    ) -> Result<GatewayResponse> {
        self.metrics.record_network_request();
        let fetched = self.fetcher.fetch(request).await.inspect_err(|_| {
            self.metrics.record_network_failure();
        })?;

        if fetched.is_cacheable() {
            let entry = StoredEntry {
                status: fetched.status,
                headers: fetched.headers.clone(),
                body: fetched.body.clone(),
                cached_at: Utc::now(),
                max_age: decision.max_age,
            };
            if let Err(e) = self.store.put(partition, &request.url, &entry) {
                // Cache write failure must not fail the request.
                warn!("Failed to store {} in '{}': {}", request.url, partition, e);
            }
        }

        Ok(GatewayResponse::from_network(fetched))
    }

    fn offline(&self, request: &GatewayRequest, decision: &RouteDecision) -> GatewayResponse {
        self.metrics.record_fallback();
        self.fallback
            .resolve(self.store.as_ref(), request, decision.class)
    }

    /// Roll the configured probability; on a win, refresh in the background.
    fn maybe_background_refresh(
        &self,
        request: &GatewayRequest,
        decision: &RouteDecision,
        partition: &str,
    ) {
        let p = self.config.refresh_probability;
        if p > 0.0 && rand::rng().random::<f64>() < p {
            self.spawn_revalidation(request, decision, partition);
        }
    }

    /// Fire-and-forget refresh of one entry. One attempt; failures are
    /// logged and never reach the original caller.
    fn spawn_revalidation(
        &self,
        request: &GatewayRequest,
        decision: &RouteDecision,
        partition: &str,
    ) {
        let store = self.store.clone();
        let fetcher = self.fetcher.clone();
        let metrics = self.metrics.clone();
        let request = request.clone();
        let partition = partition.to_string();
        let max_age = decision.max_age;

        tokio::spawn(async move {
            metrics.record_network_request();
            match fetcher.fetch(&request).await {
                Ok(fetched) if fetched.is_cacheable() => {
                    let entry = StoredEntry {
                        status: fetched.status,
                        headers: fetched.headers,
                        body: fetched.body,
                        cached_at: Utc::now(),
                        max_age,
                    };
                    if let Err(e) = store.put(&partition, &request.url, &entry) {
                        warn!("Background refresh store failed for {}: {}", request.url, e);
                    } else {
                        debug!("Background refresh updated {}", request.url);
                    }
                }
                Ok(fetched) => {
                    debug!(
                        "Background refresh for {} returned HTTP {}, not stored",
                        request.url, fetched.status
                    );
                }
                Err(e) => {
                    metrics.record_network_failure();
                    debug!("Background refresh failed for {}: {}", request.url, e);
                }
            }
        });
    }
}

fn cached_response(entry: StoredEntry) -> GatewayResponse {
    GatewayResponse {
        status: entry.status,
        headers: entry.headers,
        body: entry.body,
        source: ResponseSource::Cache,
        cached_at: Some(entry.cached_at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AirwaveError;
    use crate::store::SqliteStore;
    use crate::types::FetchedResponse;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Scripted fetcher: one canned response, a failure switch, a call count.
    struct ScriptedFetcher {
        status: u16,
        body: Vec<u8>,
        fail: AtomicBool,
        delay: Option<Duration>,
        calls: AtomicUsize,
    }

    impl ScriptedFetcher {
        fn ok(body: &[u8]) -> Self {
            Self {
                status: 200,
                body: body.to_vec(),
                fail: AtomicBool::new(false),
                delay: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            let fetcher = Self::ok(b"");
            fetcher.fail.store(true, Ordering::SeqCst);
            fetcher
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch(&self, request: &GatewayRequest) -> Result<FetchedResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(AirwaveError::Network {
                    message: format!("scripted failure for {}", request.url),
                    source: None,
                });
            }
            Ok(FetchedResponse {
                status: self.status,
                headers: vec![("content-type".to_string(), "text/plain".to_string())],
                body: self.body.clone(),
            })
        }
    }

    fn engine_with(fetcher: Arc<ScriptedFetcher>) -> (PolicyEngine, Arc<EngineMetrics>) {
        let mut config = EngineConfig::default();
        // Deterministic tests: no probabilistic refresh.
        config.refresh_probability = 0.0;
        let metrics = Arc::new(EngineMetrics::new());
        let engine = PolicyEngine::new(
            Arc::new(SqliteStore::in_memory().unwrap()),
            fetcher,
            Arc::new(config),
            metrics.clone(),
        );
        (engine, metrics)
    }

    #[tokio::test]
    async fn test_cache_first_stores_then_serves_from_cache() {
        let fetcher = Arc::new(ScriptedFetcher::ok(b"logo bytes"));
        let (engine, metrics) = engine_with(fetcher.clone());
        let request = GatewayRequest::get("https://radio.example/images/logo.png");

        let first = engine.handle(&request).await.unwrap();
        assert_eq!(first.source, ResponseSource::Network);
        assert_eq!(fetcher.calls(), 1);

        let second = engine.handle(&request).await.unwrap();
        assert_eq!(second.source, ResponseSource::Cache);
        assert_eq!(second.body, b"logo bytes");
        assert_eq!(fetcher.calls(), 1, "second request must not hit the network");

        let snap = metrics.snapshot();
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.cache_misses, 1);
    }

    #[tokio::test]
    async fn test_network_only_never_touches_cache() {
        let fetcher = Arc::new(ScriptedFetcher::ok(b"#EXTM3U"));
        let (engine, _) = engine_with(fetcher.clone());
        let request = GatewayRequest::get("https://radio.example/stream/live.m3u8");

        engine.handle(&request).await.unwrap();
        engine.handle(&request).await.unwrap();
        assert_eq!(fetcher.calls(), 2, "every request must reach the network");

        // And a network failure propagates instead of falling back.
        fetcher.fail.store(true, Ordering::SeqCst);
        assert!(engine.handle(&request).await.is_err());
    }

    #[tokio::test]
    async fn test_network_first_falls_back_to_cache() {
        let fetcher = Arc::new(ScriptedFetcher::ok(b"{\"comments\":[]}"));
        let (engine, _) = engine_with(fetcher.clone());
        let request = GatewayRequest::get("https://radio.example/api-get-comments.php");

        // Prime the cache while the network is up.
        engine.handle(&request).await.unwrap();

        fetcher.fail.store(true, Ordering::SeqCst);
        let response = engine.handle(&request).await.unwrap();
        assert_eq!(response.source, ResponseSource::Cache);
        assert_eq!(response.body, b"{\"comments\":[]}");
    }

    #[tokio::test]
    async fn test_network_first_offline_fallback_when_cache_empty() {
        let fetcher = Arc::new(ScriptedFetcher::failing());
        let (engine, metrics) = engine_with(fetcher);
        let request = GatewayRequest::get("https://radio.example/api-get-comments.php");

        let response = engine.handle(&request).await.unwrap();
        assert_eq!(response.status, 503);
        assert_eq!(response.source, ResponseSource::Fallback);
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["offline"], true);
        assert_eq!(metrics.snapshot().fallback_responses, 1);
    }

    #[tokio::test]
    async fn test_swr_serves_cache_even_when_network_fails() {
        let fetcher = Arc::new(ScriptedFetcher::ok(b"body { color: red }"));
        let (engine, _) = engine_with(fetcher.clone());
        let request = GatewayRequest::get("https://radio.example/css/player.css");

        engine.handle(&request).await.unwrap();

        // Network down: the cached copy must still return immediately.
        fetcher.fail.store(true, Ordering::SeqCst);
        let response = engine.handle(&request).await.unwrap();
        assert_eq!(response.source, ResponseSource::Cache);
        assert_eq!(response.body, b"body { color: red }");
    }

    #[tokio::test]
    async fn test_swr_revalidates_in_background() {
        let fetcher = Arc::new(ScriptedFetcher::ok(b"v1"));
        let (engine, _) = engine_with(fetcher.clone());
        let request = GatewayRequest::get("https://radio.example/js/app.js");

        engine.handle(&request).await.unwrap();
        assert_eq!(fetcher.calls(), 1);

        // Second request answers from cache and kicks a background fetch.
        let response = engine.handle(&request).await.unwrap();
        assert_eq!(response.source, ResponseSource::Cache);

        // Give the detached task a moment to run.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_non_get_passes_through_uncached() {
        let fetcher = Arc::new(ScriptedFetcher::ok(b"posted"));
        let (engine, _) = engine_with(fetcher.clone());
        let request = GatewayRequest::new("POST", "https://radio.example/api-post-comment.php");

        let first = engine.handle(&request).await.unwrap();
        assert_eq!(first.source, ResponseSource::Network);
        engine.handle(&request).await.unwrap();
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_stale_entry_served_when_refresh_fails() {
        let fetcher = Arc::new(ScriptedFetcher::ok(b"fresh token"));
        let (engine, _) = engine_with(fetcher.clone());
        // Image route carries a max_age; plant an entry older than it.
        let request = GatewayRequest::get("https://radio.example/images/banner.png");

        let stale = StoredEntry {
            status: 200,
            headers: vec![],
            body: b"stale banner".to_vec(),
            cached_at: Utc::now() - chrono::Duration::days(90),
            max_age: Some(Duration::from_secs(3600)),
        };
        engine
            .store
            .put(
                &engine.config.partition_name("core"),
                &request.url,
                &stale,
            )
            .unwrap();

        fetcher.fail.store(true, Ordering::SeqCst);
        let response = engine.handle(&request).await.unwrap();
        assert_eq!(response.source, ResponseSource::Cache);
        assert_eq!(response.body, b"stale banner");
    }

    #[tokio::test]
    async fn test_stale_entry_refreshed_when_network_up() {
        let fetcher = Arc::new(ScriptedFetcher::ok(b"fresh banner"));
        let (engine, _) = engine_with(fetcher.clone());
        let request = GatewayRequest::get("https://radio.example/images/banner.png");

        let stale = StoredEntry {
            status: 200,
            headers: vec![],
            body: b"stale banner".to_vec(),
            cached_at: Utc::now() - chrono::Duration::days(90),
            max_age: Some(Duration::from_secs(3600)),
        };
        engine
            .store
            .put(
                &engine.config.partition_name("core"),
                &request.url,
                &stale,
            )
            .unwrap();

        let response = engine.handle(&request).await.unwrap();
        assert_eq!(response.source, ResponseSource::Network);
        assert_eq!(response.body, b"fresh banner");
    }

    #[tokio::test]
    async fn test_uncacheable_status_not_stored() {
        let fetcher = Arc::new(ScriptedFetcher {
            status: 404,
            body: b"not here".to_vec(),
            fail: AtomicBool::new(false),
            delay: None,
            calls: AtomicUsize::new(0),
        });
        let (engine, _) = engine_with(fetcher.clone());
        let request = GatewayRequest::get("https://radio.example/images/missing.png");

        let first = engine.handle(&request).await.unwrap();
        assert_eq!(first.status, 404);

        // Still a miss the second time: the 404 was never cached.
        engine.handle(&request).await.unwrap();
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_cache_only_serves_seeded_entry_without_network() {
        let fetcher = Arc::new(ScriptedFetcher::ok(b"network copy"));
        let (engine, metrics) = engine_with(fetcher.clone());
        let request = GatewayRequest::get("https://radio.example/offline.html");

        let entry = StoredEntry {
            status: 200,
            headers: vec![],
            body: b"<html>offline</html>".to_vec(),
            cached_at: Utc::now(),
            max_age: None,
        };
        engine
            .store
            .put(
                &engine.config.partition_name("core"),
                &request.url,
                &entry,
            )
            .unwrap();

        let response = engine.handle(&request).await.unwrap();
        assert_eq!(response.source, ResponseSource::Cache);
        assert_eq!(response.body, b"<html>offline</html>");
        assert_eq!(fetcher.calls(), 0, "cache-only must never hit the network");
        assert_eq!(metrics.snapshot().cache_hits, 1);
    }

    #[tokio::test]
    async fn test_cache_only_miss_resolves_to_offline_fallback() {
        let fetcher = Arc::new(ScriptedFetcher::ok(b"network copy"));
        let (engine, metrics) = engine_with(fetcher.clone());
        let request = GatewayRequest::get("https://radio.example/offline.html");

        let response = engine.handle(&request).await.unwrap();
        assert_eq!(response.status, 503);
        assert_eq!(response.source, ResponseSource::Fallback);
        assert_eq!(fetcher.calls(), 0);
        assert_eq!(metrics.snapshot().fallback_responses, 1);
    }

    #[tokio::test]
    async fn test_document_fallback_follows_renamed_partitions() {
        use crate::classify::{ContentClass, RouteMatcher, RouteRule};
        use crate::config::PartitionConfig;

        let mut config = EngineConfig::default();
        config.refresh_probability = 0.0;
        config.partitions = vec![
            PartitionConfig {
                name: "shell".to_string(),
                max_entries: None,
                max_age: None,
            },
            PartitionConfig {
                name: "pages".to_string(),
                max_entries: Some(100),
                max_age: None,
            },
        ];
        config.precache_partition = "shell".to_string();
        config.routes = vec![RouteRule {
            matcher: RouteMatcher::Navigation,
            class: ContentClass::Document,
            strategy: Strategy::NetworkFirst,
            partition: "pages".to_string(),
            max_age: None,
        }];
        config.validate().unwrap();

        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let entry = StoredEntry {
            status: 200,
            headers: vec![],
            body: b"<html>shell</html>".to_vec(),
            cached_at: Utc::now(),
            max_age: None,
        };
        store
            .put(
                &config.partition_name("shell"),
                "https://radio.example/",
                &entry,
            )
            .unwrap();

        let engine = PolicyEngine::new(
            store,
            Arc::new(ScriptedFetcher::failing()),
            Arc::new(config),
            Arc::new(EngineMetrics::new()),
        );

        let response = engine
            .handle(&GatewayRequest::get("https://radio.example/schedule"))
            .await
            .unwrap();
        assert_eq!(response.source, ResponseSource::Fallback);
        assert_eq!(response.body, b"<html>shell</html>");
    }
}
