//! Content classification: URL path -> caching strategy.
//!
//! The route table is plain data. Each rule pairs a matcher with the content
//! class, strategy, and target partition that apply to it; the first matching
//! rule wins. A path that matches nothing defaults to network-first into the
//! dynamic partition, so an unknown route can never fail classification.

use crate::strategy::Strategy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Broad content categories recognized by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentClass {
    Api,
    Streaming,
    Audio,
    Video,
    Image,
    Font,
    Stylesheet,
    Script,
    Json,
    Document,
    Other,
}

impl std::fmt::Display for ContentClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ContentClass::Api => "api",
            ContentClass::Streaming => "streaming",
            ContentClass::Audio => "audio",
            ContentClass::Video => "video",
            ContentClass::Image => "image",
            ContentClass::Font => "font",
            ContentClass::Stylesheet => "stylesheet",
            ContentClass::Script => "script",
            ContentClass::Json => "json",
            ContentClass::Document => "document",
            ContentClass::Other => "other",
        };
        write!(f, "{}", name)
    }
}

/// How a route rule matches a URL path. Matching is case-insensitive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteMatcher {
    /// Path ends with any of the given suffixes (extensions, usually).
    Suffix(Vec<String>),
    /// Path starts with the given prefix.
    Prefix(String),
    /// Path contains the given substring.
    Contains(String),
    /// Navigation-style request: "/" or a final segment without an extension.
    Navigation,
}

impl RouteMatcher {
    fn matches(&self, path: &str) -> bool {
        match self {
            RouteMatcher::Suffix(suffixes) => {
                suffixes.iter().any(|s| path.ends_with(&s.to_lowercase()))
            }
            RouteMatcher::Prefix(prefix) => path.starts_with(&prefix.to_lowercase()),
            RouteMatcher::Contains(needle) => path.contains(&needle.to_lowercase()),
            RouteMatcher::Navigation => {
                let last = path.rsplit('/').next().unwrap_or("");
                path.ends_with('/') || !last.contains('.')
            }
        }
    }
}

/// One row of the route table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRule {
    pub matcher: RouteMatcher,
    pub class: ContentClass,
    pub strategy: Strategy,
    /// Short partition name (resolved against the versioned set at runtime).
    pub partition: String,
    /// Freshness window for entries stored under this rule.
    #[serde(default)]
    pub max_age: Option<Duration>,
}

/// The outcome of classifying one request.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteDecision {
    pub class: ContentClass,
    pub strategy: Strategy,
    pub partition: String,
    pub max_age: Option<Duration>,
}

/// Ordered, first-match-wins path classifier.
///
/// Stateless and deterministic: the same path always produces the same
/// decision for a given rule table.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<RouteRule>,
    default_partition: String,
}

impl Classifier {
    pub fn new(rules: Vec<RouteRule>, default_partition: impl Into<String>) -> Self {
        Self {
            rules,
            default_partition: default_partition.into(),
        }
    }

    /// Classify a URL path.
    pub fn classify(&self, path: &str) -> RouteDecision {
        let path = path.to_lowercase();
        for rule in &self.rules {
            if rule.matcher.matches(&path) {
                return RouteDecision {
                    class: rule.class,
                    strategy: rule.strategy,
                    partition: rule.partition.clone(),
                    max_age: rule.max_age,
                };
            }
        }

        // No pattern matched: network-first, no special policy.
        RouteDecision {
            class: ContentClass::Other,
            strategy: Strategy::NetworkFirst,
            partition: self.default_partition.clone(),
            max_age: None,
        }
    }
}
