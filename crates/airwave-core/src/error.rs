//! Error types for the Airwave cache engine.
//!
//! Mirrors the failure taxonomy the engine has to absorb: network trouble is
//! recoverable (cache fallback, offline responder), storage trouble degrades
//! to a cache miss, and only misconfiguration is surfaced to the embedder.

use thiserror::Error;

/// Main error type for the Airwave cache engine.
#[derive(Debug, Error)]
pub enum AirwaveError {
    // Network errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Upstream returned HTTP {status} for {url}")]
    UpstreamStatus { url: String, status: u16 },

    // Cache storage errors
    #[error("Cache storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("Unknown cache partition: {0}")]
    UnknownPartition(String),

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for Airwave cache operations.
pub type Result<T> = std::result::Result<T, AirwaveError>;

// Conversion implementations for common error types

impl From<reqwest::Error> for AirwaveError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AirwaveError::Timeout(std::time::Duration::from_secs(0))
        } else {
            AirwaveError::Network {
                message: err.to_string(),
                source: Some(err),
            }
        }
    }
}

impl From<rusqlite::Error> for AirwaveError {
    fn from(err: rusqlite::Error) -> Self {
        AirwaveError::Storage {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for AirwaveError {
    fn from(err: serde_json::Error) -> Self {
        AirwaveError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<std::io::Error> for AirwaveError {
    fn from(err: std::io::Error) -> Self {
        AirwaveError::Other(format!("IO error: {}", err))
    }
}

impl AirwaveError {
    /// Check if this error should trigger a retry.
    ///
    /// Only transient network conditions qualify; storage errors and cache
    /// misses are handled by degrading to a miss or falling back, not by
    /// retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AirwaveError::Network { .. } | AirwaveError::Timeout(_) => true,
            AirwaveError::UpstreamStatus { status, .. } => {
                matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AirwaveError::UnknownPartition("airwave-media-v1".into());
        assert_eq!(err.to_string(), "Unknown cache partition: airwave-media-v1");
    }

    #[test]
    fn test_retryable_errors() {
        assert!(AirwaveError::Timeout(std::time::Duration::from_secs(5)).is_retryable());
        assert!(AirwaveError::UpstreamStatus {
            url: "/api-get-comments.php".into(),
            status: 503,
        }
        .is_retryable());
        assert!(!AirwaveError::UpstreamStatus {
            url: "/missing.png".into(),
            status: 404,
        }
        .is_retryable());
        assert!(!AirwaveError::Validation {
            field: "partitions".into(),
            message: "bad".into()
        }
        .is_retryable());
        assert!(!AirwaveError::Storage {
            message: "quota exceeded".into(),
            source: None,
        }
        .is_retryable());
    }
}
