//! Error types for ARDA runtime operations

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A required capability was not bound in the caller's scope.
///
/// This is a wiring bug at the composition root, never a runtime condition.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("Context missing: {capability} is not bound in this scope")]
    ContextMissing { capability: &'static str },
}

/// Failure reported by a query or mutation fetcher.
///
/// Stored on the cache entry once retries are exhausted, so it is
/// serializable and cheap to clone.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetchError {
    #[error("Network failure: {message}")]
    Network { message: String },

    #[error("Server responded with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Failed to decode response: {message}")]
    Decode { message: String },

    #[error("Fetch aborted before completion")]
    Aborted,

    #[error("Fetch failed: {message}")]
    Other { message: String },
}

impl FetchError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Client errors (4xx) will not change on retry.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Status { status, .. } if (400..500).contains(status))
    }
}

/// Durable storage failures. Swallowed by the persistence bridge.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("Storage I/O failed: {reason}")]
    Io { reason: String },

    #[error("Snapshot serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Storage backend error: {reason}")]
    Backend { reason: String },

    #[error("Storage quota exceeded writing {bytes} bytes")]
    QuotaExceeded { bytes: usize },
}

impl From<std::io::Error> for PersistenceError {
    fn from(e: std::io::Error) -> Self {
        Self::Io {
            reason: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization {
            reason: e.to_string(),
        }
    }
}

/// Why a persisted snapshot was discarded instead of restored.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SnapshotRejection {
    #[error("Snapshot version {found} does not match buster {expected}")]
    VersionMismatch { expected: String, found: String },

    #[error("Snapshot is {age_ms}ms old, maximum is {max_age_ms}ms")]
    Expired { age_ms: u64, max_age_ms: u64 },

    #[error("Snapshot could not be decoded: {reason}")]
    Corrupt { reason: String },
}

/// Navigation engine failures, propagated unchanged to the caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NavigationError {
    #[error("Invalid navigation path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Navigation engine error: {reason}")]
    Engine { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigError {
    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Master error type for all ARDA errors.
#[derive(Debug, Clone, Error)]
pub enum ArdaError {
    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Snapshot rejected: {0}")]
    Snapshot(#[from] SnapshotRejection),

    #[error("Navigation error: {0}")]
    Navigation(#[from] NavigationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for ARDA operations.
pub type ArdaResult<T> = Result<T, ArdaError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_missing_display() {
        let err = ContextError::ContextMissing {
            capability: "NavigationContext",
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Context missing"));
        assert!(msg.contains("NavigationContext"));
    }

    #[test]
    fn test_fetch_error_serde_shape() {
        let err = FetchError::status(503, "unavailable");
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["kind"], "status");
        assert_eq!(value["status"], 503);
        let back: FetchError = serde_json::from_value(value).unwrap();
        assert_eq!(back, err);

        let aborted = serde_json::to_value(FetchError::Aborted).unwrap();
        assert_eq!(aborted["kind"], "aborted");
    }

    #[test]
    fn test_fetch_error_client_classification() {
        assert!(FetchError::status(404, "missing").is_client_error());
        assert!(!FetchError::status(502, "bad gateway").is_client_error());
        assert!(!FetchError::network("reset").is_client_error());
    }

    #[test]
    fn test_snapshot_rejection_display() {
        let err = SnapshotRejection::VersionMismatch {
            expected: "v1.0.0".to_string(),
            found: "v0.9.0".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("v0.9.0"));
        assert!(msg.contains("v1.0.0"));
    }

    #[test]
    fn test_arda_error_from_variants() {
        let context = ArdaError::from(ContextError::ContextMissing { capability: "x" });
        assert!(matches!(context, ArdaError::Context(_)));

        let fetch = ArdaError::from(FetchError::Aborted);
        assert!(matches!(fetch, ArdaError::Fetch(_)));

        let persistence = ArdaError::from(PersistenceError::QuotaExceeded { bytes: 10 });
        assert!(matches!(persistence, ArdaError::Persistence(_)));

        let nav = ArdaError::from(NavigationError::Engine {
            reason: "detached".to_string(),
        });
        assert!(matches!(nav, ArdaError::Navigation(_)));

        let config = ArdaError::from(ConfigError::invalid("buster", "must not be empty"));
        assert!(matches!(config, ArdaError::Config(_)));
    }

    #[test]
    fn test_persistence_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = PersistenceError::from(io);
        assert!(format!("{}", err).contains("disk full"));
    }
}
