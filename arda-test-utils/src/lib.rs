//! ARDA Test Utilities
//!
//! Centralized test infrastructure for the ARDA workspace:
//! - Scripted fetchers and failing collaborators
//! - Proptest generators for keys and cache entries
//! - Fixtures for the menu scenarios used across crates

pub use arda_core::{
    now, query_key, CacheEntry, FetchError, KeyPart, NavigationError, NavigationState,
    PersistedSnapshot, PersistenceConfig, PersistenceError, QueryKey, QueryStatus, Timestamp,
};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use arda_query::StorageMedium;
use arda_router::NavigationEngine;
use async_trait::async_trait;
use futures_util::future::BoxFuture;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// MOCK COLLABORATORS
// ============================================================================

struct Script<T> {
    queued: VecDeque<Result<T, FetchError>>,
    last: Option<Result<T, FetchError>>,
}

/// Fetcher that replays scripted results and counts invocations.
///
/// Results are consumed in order; once the script runs out the last result
/// repeats. Invocations are counted when the fetcher is called, before any
/// configured delay.
pub struct MockFetcher<T> {
    script: Arc<Mutex<Script<T>>>,
    calls: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

impl<T> Clone for MockFetcher<T> {
    fn clone(&self) -> Self {
        Self {
            script: Arc::clone(&self.script),
            calls: Arc::clone(&self.calls),
            delay: self.delay,
        }
    }
}

impl<T: Clone + Send + 'static> MockFetcher<T> {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                queued: VecDeque::new(),
                last: None,
            })),
            calls: Arc::new(AtomicUsize::new(0)),
            delay: None,
        }
    }

    /// Always succeeds with `value`.
    pub fn returning(value: T) -> Self {
        Self::new().then_ok(value)
    }

    /// Always fails with `error`.
    pub fn failing(error: FetchError) -> Self {
        Self::new().then_err(error)
    }

    pub fn then_ok(self, value: T) -> Self {
        lock(&self.script).queued.push_back(Ok(value));
        self
    }

    pub fn then_err(self, error: FetchError) -> Self {
        lock(&self.script).queued.push_back(Err(error));
        self
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_result(&self) -> Result<T, FetchError> {
        let mut script = lock(&self.script);
        match script.queued.pop_front() {
            Some(result) => {
                script.last = Some(result.clone());
                result
            }
            None => script
                .last
                .clone()
                .unwrap_or_else(|| Err(FetchError::other("no scripted result"))),
        }
    }

    /// A fetcher closure suitable for `QueryRuntime::fetch` and `observe`.
    pub fn fetcher(&self) -> impl Fn() -> BoxFuture<'static, Result<T, FetchError>> + Clone + Send + Sync + 'static {
        let mock = self.clone();
        move || -> BoxFuture<'static, Result<T, FetchError>> {
            mock.calls.fetch_add(1, Ordering::SeqCst);
            let result = mock.next_result();
            let delay = mock.delay;
            Box::pin(async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                result
            })
        }
    }
}

impl<T: Clone + Send + 'static> Default for MockFetcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Storage medium whose writes fail; reads return whatever was seeded.
#[derive(Debug, Default)]
pub struct FailingMedium {
    seeded: Mutex<Option<String>>,
    attempts: AtomicUsize,
}

impl FailingMedium {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `value` from every read.
    pub fn seeded(value: impl Into<String>) -> Self {
        Self {
            seeded: Mutex::new(Some(value.into())),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Write attempts made so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageMedium for FailingMedium {
    async fn get_item(&self, _key: &str) -> Result<Option<String>, PersistenceError> {
        Ok(lock(&self.seeded).clone())
    }

    async fn set_item(&self, _key: &str, value: &str) -> Result<(), PersistenceError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(PersistenceError::QuotaExceeded { bytes: value.len() })
    }

    async fn remove_item(&self, _key: &str) -> Result<(), PersistenceError> {
        Err(PersistenceError::Backend {
            reason: "read-only medium".to_string(),
        })
    }
}

/// Navigation engine that rejects every navigation.
#[derive(Debug, Clone)]
pub struct FailingEngine {
    location: NavigationState,
    reason: String,
}

impl FailingEngine {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            location: NavigationState::root(),
            reason: reason.into(),
        }
    }

    fn error(&self) -> NavigationError {
        NavigationError::Engine {
            reason: self.reason.clone(),
        }
    }
}

impl NavigationEngine for FailingEngine {
    fn push(&self, _path: &str) -> Result<(), NavigationError> {
        Err(self.error())
    }

    fn replace(&self, _path: &str) -> Result<(), NavigationError> {
        Err(self.error())
    }

    fn location(&self) -> NavigationState {
        self.location.clone()
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use chrono::DateTime;
    use proptest::prelude::*;

    pub fn arb_key_part() -> impl Strategy<Value = KeyPart> {
        prop_oneof![
            Just(KeyPart::Null),
            any::<bool>().prop_map(KeyPart::Bool),
            any::<i64>().prop_map(KeyPart::Int),
            "[a-zA-Z0-9_-]{0,12}".prop_map(KeyPart::Str),
        ]
    }

    /// Keys with a string namespace followed by up to three parts.
    pub fn arb_query_key() -> impl Strategy<Value = QueryKey> {
        (
            "[a-z]{1,8}",
            prop::collection::vec(arb_key_part(), 0..4),
        )
            .prop_map(|(namespace, rest)| {
                rest.into_iter()
                    .fold(QueryKey::new(namespace.as_str()), |key, part| key.with(part))
            })
    }

    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1_600_000_000_000i64..1_900_000_000_000i64)
            .prop_map(|ms| DateTime::from_timestamp_millis(ms).unwrap_or_default())
    }

    pub fn arb_json() -> impl Strategy<Value = serde_json::Value> {
        prop_oneof![
            Just(serde_json::Value::Null),
            any::<i64>().prop_map(serde_json::Value::from),
            "[a-z ]{0,16}".prop_map(serde_json::Value::from),
            prop::collection::vec(any::<u16>(), 0..5).prop_map(serde_json::Value::from),
        ]
    }

    /// Successful entries with millisecond timestamps.
    pub fn arb_cache_entry() -> impl Strategy<Value = CacheEntry> {
        (
            arb_query_key(),
            arb_json(),
            arb_timestamp(),
            0u64..600_000,
            0u64..600_000,
        )
            .prop_map(|(key, data, at, stale_ms, gc_ms)| {
                CacheEntry::with_data(
                    key,
                    data,
                    at,
                    Duration::from_millis(stale_ms),
                    Duration::from_millis(gc_ms),
                )
            })
    }

    /// Absolute paths made of one to three lowercase segments.
    pub fn arb_path() -> impl Strategy<Value = String> {
        prop::collection::vec("[a-z]{1,8}", 1..4).prop_map(|segments| format!("/{}", segments.join("/")))
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    use super::*;
    use arda_query::{QueryOptions, RetryDelay, RetryPolicy};
    use serde_json::{json, Value};

    pub const BUSTER: &str = "v1.0.0";

    /// `["menus", role]`
    pub fn menu_key(role: &str) -> QueryKey {
        query_key!["menus", role]
    }

    /// Fresh for a minute, no retries.
    pub fn fast_options() -> QueryOptions {
        QueryOptions::new()
            .with_stale_time(Duration::from_secs(60))
            .with_gc_time(Duration::from_secs(300))
            .with_retry(RetryPolicy::Never)
    }

    /// Always stale, no retries.
    pub fn stale_options() -> QueryOptions {
        fast_options().with_stale_time(Duration::ZERO)
    }

    /// `RetryPolicy::Count(attempts)` with no delay between attempts.
    pub fn retrying_options(attempts: u32) -> QueryOptions {
        fast_options()
            .with_retry(RetryPolicy::Count(attempts))
            .with_retry_delay(RetryDelay::Fixed(Duration::ZERO))
    }

    pub fn persistence_config() -> PersistenceConfig {
        PersistenceConfig::new(BUSTER)
    }

    pub fn sample_menu_tree(role: &str) -> Value {
        json!([
            {
                "id": 1,
                "parentId": null,
                "order": 0,
                "label": "Dashboard",
                "path": "/dashboard",
                "roles": [role],
                "children": []
            },
            {
                "id": 2,
                "parentId": null,
                "order": 1,
                "label": "Settings",
                "path": "/settings",
                "roles": [role],
                "children": [
                    {
                        "id": 3,
                        "parentId": 2,
                        "order": 0,
                        "label": "Tenants",
                        "path": "/settings/tenants",
                        "roles": [role],
                        "children": []
                    }
                ]
            }
        ])
    }

    /// A successful entry for `key` fetched at `at`.
    pub fn success_entry(key: QueryKey, data: Value, at: Timestamp) -> CacheEntry {
        CacheEntry::with_data(key, data, at, Duration::from_secs(60), Duration::from_secs(300))
    }
}
