//! Offline fallback resolver.
//!
//! The guaranteed last-resort responder: whenever a strategy cannot produce
//! a real response, this resolver produces a synthetic one. It never returns
//! an error — storage trouble during lookup just degrades to the built-in
//! page. The dispatcher relies on that contract to keep failures away from
//! the caller on every intercepted route.

use crate::classify::ContentClass;
use crate::store::CacheStore;
use crate::types::{GatewayRequest, GatewayResponse, ResponseSource};
use tracing::{debug, warn};

/// Minimal built-in page served when no document was ever cached.
const OFFLINE_PAGE: &str = "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<title>Airwave - Offline</title>\n</head>\n<body>\n<h1>You're offline</h1>\n<p>Airwave radio needs a connection for live playback. Cached pages and saved tracks remain available.</p>\n</body>\n</html>\n";

/// Resolves failed requests into synthetic offline responses.
pub struct FallbackResolver {
    /// Partitions searched for a previously cached root document, in order.
    document_partitions: Vec<String>,
}

impl FallbackResolver {
    pub fn new(document_partitions: Vec<String>) -> Self {
        Self {
            document_partitions,
        }
    }

    /// Produce a response for a request no strategy could serve.
    pub fn resolve(
        &self,
        store: &dyn CacheStore,
        request: &GatewayRequest,
        class: ContentClass,
    ) -> GatewayResponse {
        debug!("Offline fallback for {} ({})", request.url, class);
        match class {
            ContentClass::Api | ContentClass::Json => self.api_fallback(request),
            ContentClass::Document => self.document_fallback(store, request),
            _ => generic_fallback(),
        }
    }

    /// Structured offline payload for API-type requests.
    fn api_fallback(&self, request: &GatewayRequest) -> GatewayResponse {
        let body = serde_json::json!({
            "offline": true,
            "error": "Network unavailable",
            "url": request.url,
        });
        GatewayResponse {
            status: 503,
            headers: vec![(
                "content-type".to_string(),
                "application/json".to_string(),
            )],
            body: body.to_string().into_bytes(),
            source: ResponseSource::Fallback,
            cached_at: None,
        }
    }

    /// A previously cached root document, or the built-in offline page.
    fn document_fallback(
        &self,
        store: &dyn CacheStore,
        request: &GatewayRequest,
    ) -> GatewayResponse {
        for url in root_candidates(&request.url) {
            for partition in &self.document_partitions {
                match store.get(partition, &url) {
                    Ok(Some(entry)) => {
                        debug!("Serving cached root document {} from '{}'", url, partition);
                        return GatewayResponse {
                            status: entry.status,
                            headers: entry.headers,
                            body: entry.body,
                            source: ResponseSource::Fallback,
                            cached_at: Some(entry.cached_at),
                        };
                    }
                    Ok(None) => {}
                    Err(e) => {
                        // Treated as a miss; the built-in page still stands.
                        warn!("Store lookup failed during fallback: {}", e);
                    }
                }
            }
        }

        GatewayResponse {
            status: 503,
            headers: vec![(
                "content-type".to_string(),
                "text/html; charset=utf-8".to_string(),
            )],
            body: OFFLINE_PAGE.as_bytes().to_vec(),
            source: ResponseSource::Fallback,
            cached_at: None,
        }
    }
}

fn generic_fallback() -> GatewayResponse {
    GatewayResponse {
        status: 503,
        headers: vec![("content-type".to_string(), "text/plain".to_string())],
        body: b"Service unavailable (offline)".to_vec(),
        source: ResponseSource::Fallback,
        cached_at: None,
    }
}

/// Root-document URLs to try for a failed navigation, same-origin first.
fn root_candidates(request_url: &str) -> Vec<String> {
    match url::Url::parse(request_url) {
        Ok(parsed) => {
            let origin = parsed.origin().ascii_serialization();
            vec![
                format!("{}/", origin),
                format!("{}/index.html", origin),
                format!("{}/offline.html", origin),
            ]
        }
        Err(_) => vec![
            "/".to_string(),
            "/index.html".to_string(),
            "/offline.html".to_string(),
        ],
    }
}
