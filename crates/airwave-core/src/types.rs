//! Request and response types flowing through the cache gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An intercepted outgoing request.
///
/// Only the pieces the engine needs: method, absolute URL, and any headers
/// that should be forwarded upstream. Bodies are not carried because only
/// GET requests are ever intercepted; non-GET requests pass straight through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayRequest {
    /// HTTP method, uppercase (e.g. "GET").
    pub method: String,
    /// Absolute request URL.
    pub url: String,
    /// Headers to forward upstream.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

impl GatewayRequest {
    /// Build a GET request for a URL.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            headers: Vec::new(),
        }
    }

    /// Build a request with an explicit method.
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into().to_uppercase(),
            url: url.into(),
            headers: Vec::new(),
        }
    }

    /// Whether this request is eligible for interception.
    pub fn is_get(&self) -> bool {
        self.method.eq_ignore_ascii_case("GET")
    }

    /// The URL path component, used for route classification.
    ///
    /// Falls back to the raw string for relative or unparseable inputs so
    /// classification stays deterministic for any input.
    pub fn path(&self) -> String {
        match url::Url::parse(&self.url) {
            Ok(parsed) => parsed.path().to_string(),
            Err(_) => self.url.split(['?', '#']).next().unwrap_or("").to_string(),
        }
    }
}

/// Where a gateway response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    /// Fetched from the network (possibly also stored).
    Network,
    /// Served from a cache partition.
    Cache,
    /// Synthesized by the offline fallback resolver.
    Fallback,
}

impl std::fmt::Display for ResponseSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseSource::Network => write!(f, "network"),
            ResponseSource::Cache => write!(f, "cache"),
            ResponseSource::Fallback => write!(f, "fallback"),
        }
    }
}

/// A raw response from the network, before any cache bookkeeping.
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    /// Whether this response may be written to a cache partition.
    ///
    /// Matches the `response.ok` eligibility check the page relied on:
    /// only 2xx responses are stored.
    pub fn is_cacheable(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The response handed back to the caller for an intercepted request.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Provenance of this response.
    pub source: ResponseSource,
    /// When the entry was stored, for cache-served responses.
    pub cached_at: Option<DateTime<Utc>>,
}

impl GatewayResponse {
    /// Wrap a network response.
    pub fn from_network(fetched: FetchedResponse) -> Self {
        Self {
            status: fetched.status,
            headers: fetched.headers,
            body: fetched.body,
            source: ResponseSource::Network,
            cached_at: None,
        }
    }

    /// Whether the response status is a success (2xx).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Look up a header value, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}
