//! Cache entry state machine.
//!
//! An entry carries the last known value for a [`QueryKey`] together with the
//! timestamps that decide when it goes stale and when it may be collected.
//! Every transition keeps `stale_at <= expires_at`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::FetchError;
use crate::key::QueryKey;
use crate::{add_duration, Timestamp};

/// Lifecycle status of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    /// Created but never fetched.
    #[default]
    Idle,
    /// A fetch (possibly a retry) is running.
    Fetching,
    /// The last fetch succeeded.
    Success,
    /// Retries were exhausted; `error` is set and `data` keeps the last good value.
    Error,
}

/// One cached query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub key: QueryKey,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub fetched_at: Timestamp,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub stale_at: Timestamp,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: Timestamp,
    pub status: QueryStatus,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub error: Option<FetchError>,
}

impl CacheEntry {
    /// A placeholder for a key that has been requested but holds no data yet.
    ///
    /// It is stale from the start and expires `gc_time` after creation.
    pub fn pending(key: QueryKey, now: Timestamp, gc_time: Duration) -> Self {
        Self {
            key,
            data: None,
            fetched_at: now,
            stale_at: now,
            expires_at: add_duration(now, gc_time),
            status: QueryStatus::Idle,
            retry_count: 0,
            error: None,
        }
    }

    /// A successful entry holding `data` fetched at `now`.
    pub fn with_data(
        key: QueryKey,
        data: Value,
        now: Timestamp,
        stale_time: Duration,
        gc_time: Duration,
    ) -> Self {
        let mut entry = Self::pending(key, now, gc_time);
        entry.apply_success(data, now, stale_time, gc_time);
        entry
    }

    /// True when the entry holds a value that may be served without fetching.
    pub fn is_fresh(&self, now: Timestamp) -> bool {
        self.data.is_some() && now < self.stale_at
    }

    pub fn is_stale(&self, now: Timestamp) -> bool {
        now >= self.stale_at
    }

    /// Past `expires_at`; eligible for collection once unobserved.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at <= now
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    /// Start a new fetch. The failure count restarts; data and error stay visible.
    pub fn mark_fetching(&mut self) {
        self.status = QueryStatus::Fetching;
        self.retry_count = 0;
    }

    /// Record a successful fetch and recompute the staleness window.
    pub fn apply_success(
        &mut self,
        data: Value,
        now: Timestamp,
        stale_time: Duration,
        gc_time: Duration,
    ) {
        self.data = Some(data);
        self.status = QueryStatus::Success;
        self.retry_count = 0;
        self.error = None;
        self.set_window(now, stale_time, gc_time);
    }

    /// Count one failed attempt. Status stays `Fetching` while retries remain.
    pub fn record_failed_attempt(&mut self) -> u32 {
        self.retry_count = self.retry_count.saturating_add(1);
        self.retry_count
    }

    /// Retries exhausted: surface the error but keep the last known data.
    pub fn apply_error(&mut self, error: FetchError) {
        self.status = QueryStatus::Error;
        self.error = Some(error);
    }

    /// Make the entry stale now without touching its data.
    pub fn invalidate(&mut self, now: Timestamp) {
        if now < self.stale_at {
            self.stale_at = now.min(self.expires_at);
        }
    }

    /// Whether `stale_at <= expires_at` holds.
    pub fn window_is_consistent(&self) -> bool {
        self.stale_at <= self.expires_at
    }

    fn set_window(&mut self, fetched_at: Timestamp, stale_time: Duration, gc_time: Duration) {
        self.fetched_at = fetched_at;
        self.expires_at = add_duration(fetched_at, gc_time);
        self.stale_at = add_duration(fetched_at, stale_time).min(self.expires_at);
    }
}
