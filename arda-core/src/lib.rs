//! ARDA Core - Shared Runtime Types
//!
//! Pure data structures shared by every federated module. The query runtime,
//! the persistence bridge and the router adapter all speak these types; this
//! crate contains no scheduling or I/O.

use chrono::{DateTime, Utc};

pub mod config;
pub mod entry;
pub mod error;
pub mod key;
pub mod navigation;
pub mod snapshot;

pub use config::{PersistenceConfig, QueryDefaultsConfig, DEFAULT_STORAGE_KEY};
pub use entry::{CacheEntry, QueryStatus};
pub use error::{
    ArdaError, ArdaResult, ConfigError, ContextError, FetchError, NavigationError,
    PersistenceError, SnapshotRejection,
};
pub use key::{KeyPart, QueryKey};
pub use navigation::{NavigateOptions, NavigationState};
pub use snapshot::{MutationId, PersistedMutation, PersistedSnapshot};

// ============================================================================
// TIME
// ============================================================================

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Current time truncated to millisecond precision.
///
/// Persisted timestamps are epoch milliseconds, so entries stamped with this
/// clock survive a save/restore cycle unchanged.
pub fn now() -> Timestamp {
    let now = Utc::now();
    DateTime::<Utc>::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

/// Add a std duration to a timestamp, saturating at the chrono maximum.
pub fn add_duration(at: Timestamp, duration: std::time::Duration) -> Timestamp {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or_else(far_future)
}

/// The latest millisecond-precise timestamp chrono can represent.
pub fn far_future() -> Timestamp {
    let max = DateTime::<Utc>::MAX_UTC;
    DateTime::<Utc>::from_timestamp_millis(max.timestamp_millis()).unwrap_or(max)
}

/// Age of `then` as observed at `now`; zero when `then` is in the future.
pub fn age_at(then: Timestamp, now: Timestamp) -> std::time::Duration {
    now.signed_duration_since(then)
        .to_std()
        .unwrap_or(std::time::Duration::ZERO)
}
