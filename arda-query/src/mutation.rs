//! Mutations: write operations that invalidate cached reads on success.
//!
//! A mutation is registered once under a key together with the query filters
//! it invalidates. Because the write function is code, only the mutation key
//! and its variables are persisted; a restored mutation can run again only if
//! a definition for its key is registered in the new process.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arda_core::{FetchError, MutationId, PersistedMutation, QueryKey, Timestamp};
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::options::{RetryDelay, RetryPolicy};
use crate::store::QueryFilter;

pub(crate) type MutationFn = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, FetchError>> + Send + Sync>;

/// How a registered mutation runs and what it invalidates.
#[derive(Clone)]
pub struct MutationDefinition {
    pub(crate) run: MutationFn,
    pub(crate) invalidates: Vec<QueryFilter>,
    pub(crate) retry: RetryPolicy,
    pub(crate) retry_delay: RetryDelay,
}

impl MutationDefinition {
    /// Wrap a typed write function. Variables and results travel as JSON.
    pub fn new<V, R, F, Fut>(f: F) -> Self
    where
        V: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, FetchError>> + Send + 'static,
    {
        let f = Arc::new(f);
        let run: MutationFn = Arc::new(move |variables: Value| {
            let f = Arc::clone(&f);
            Box::pin(async move {
                let variables: V = serde_json::from_value(variables)
                    .map_err(|e| FetchError::decode(e.to_string()))?;
                let result = f(variables).await?;
                serde_json::to_value(result).map_err(|e| FetchError::decode(e.to_string()))
            })
        });
        Self {
            run,
            invalidates: Vec::new(),
            retry: RetryPolicy::Never,
            retry_delay: RetryDelay::default(),
        }
    }

    /// Invalidate queries matching `filter` after every successful run.
    pub fn invalidates(mut self, filter: QueryFilter) -> Self {
        self.invalidates.push(filter);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy, retry_delay: RetryDelay) -> Self {
        self.retry = retry;
        self.retry_delay = retry_delay;
        self
    }
}

impl fmt::Debug for MutationDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationDefinition")
            .field("invalidates", &self.invalidates)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStatus {
    Pending,
    /// Submitted while offline, or restored from a snapshot; waiting to be resumed.
    Paused,
    Success,
    Error,
}

/// One submitted mutation.
#[derive(Debug, Clone)]
pub struct MutationRecord {
    pub id: MutationId,
    pub mutation_key: QueryKey,
    pub variables: Value,
    pub status: MutationStatus,
    pub submitted_at: Timestamp,
    pub failure_count: u32,
    pub error: Option<FetchError>,
}

impl MutationRecord {
    pub fn new(mutation_key: QueryKey, variables: Value, submitted_at: Timestamp) -> Self {
        Self {
            id: MutationId::new(),
            mutation_key,
            variables,
            status: MutationStatus::Pending,
            submitted_at,
            failure_count: 0,
            error: None,
        }
    }

    fn from_persisted(persisted: PersistedMutation) -> Self {
        Self {
            id: persisted.id,
            mutation_key: persisted.mutation_key,
            variables: persisted.variables,
            status: MutationStatus::Paused,
            submitted_at: persisted.submitted_at,
            failure_count: persisted.failure_count,
            error: None,
        }
    }

    fn to_persisted(&self) -> PersistedMutation {
        PersistedMutation {
            id: self.id,
            mutation_key: self.mutation_key.clone(),
            variables: self.variables.clone(),
            submitted_at: self.submitted_at,
            failure_count: self.failure_count,
        }
    }
}

/// Result of submitting a mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    /// The mutation ran and returned this value.
    Completed(Value),
    /// The runtime is offline; the mutation was queued.
    Paused(MutationId),
}

/// Registered definitions plus the record of submitted mutations.
#[derive(Default)]
pub struct MutationCache {
    definitions: Mutex<HashMap<QueryKey, MutationDefinition>>,
    records: Mutex<Vec<MutationRecord>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MutationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, key: QueryKey, definition: MutationDefinition) {
        lock(&self.definitions).insert(key, definition);
    }

    pub fn definition(&self, key: &QueryKey) -> Option<MutationDefinition> {
        lock(&self.definitions).get(key).cloned()
    }

    pub fn push(&self, record: MutationRecord) {
        lock(&self.records).push(record);
    }

    pub fn get(&self, id: MutationId) -> Option<MutationRecord> {
        lock(&self.records).iter().find(|r| r.id == id).cloned()
    }

    pub fn records(&self) -> Vec<MutationRecord> {
        lock(&self.records).clone()
    }

    pub(crate) fn update<F>(&self, id: MutationId, f: F) -> bool
    where
        F: FnOnce(&mut MutationRecord),
    {
        let mut records = lock(&self.records);
        match records.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                f(record);
                true
            }
            None => false,
        }
    }

    /// Move a paused mutation to pending. False if it is no longer paused.
    pub(crate) fn claim(&self, id: MutationId) -> bool {
        let mut records = lock(&self.records);
        match records.iter_mut().find(|r| r.id == id) {
            Some(record) if record.status == MutationStatus::Paused => {
                record.status = MutationStatus::Pending;
                true
            }
            _ => false,
        }
    }

    /// Keep at most `keep` finished mutations, dropping the oldest first.
    pub fn trim_finished(&self, keep: usize) -> usize {
        let mut records = lock(&self.records);
        let finished = records
            .iter()
            .filter(|r| matches!(r.status, MutationStatus::Success | MutationStatus::Error))
            .count();
        let mut excess = finished.saturating_sub(keep);
        let dropped = excess;
        records.retain(|r| {
            if excess > 0 && matches!(r.status, MutationStatus::Success | MutationStatus::Error) {
                excess -= 1;
                return false;
            }
            true
        });
        dropped
    }

    /// Paused mutations in submission order.
    pub fn paused(&self) -> Vec<MutationRecord> {
        let mut paused: Vec<MutationRecord> = lock(&self.records)
            .iter()
            .filter(|r| r.status == MutationStatus::Paused)
            .cloned()
            .collect();
        paused.sort_by_key(|r| (r.submitted_at, r.id));
        paused
    }

    /// Paused mutations in their durable form. Pending and finished ones are never persisted.
    pub fn persisted(&self) -> Vec<PersistedMutation> {
        self.paused().iter().map(MutationRecord::to_persisted).collect()
    }

    /// Re-queue restored mutations as paused, skipping ids already known.
    pub fn restore(&self, mutations: Vec<PersistedMutation>) -> usize {
        let mut records = lock(&self.records);
        let mut restored = 0;
        for persisted in mutations {
            if records.iter().any(|r| r.id == persisted.id) {
                continue;
            }
            records.push(MutationRecord::from_persisted(persisted));
            restored += 1;
        }
        restored
    }

    /// Forget finished mutations. Pending and paused ones are kept.
    pub fn prune_finished(&self) -> usize {
        let mut records = lock(&self.records);
        let before = records.len();
        records.retain(|r| matches!(r.status, MutationStatus::Pending | MutationStatus::Paused));
        before - records.len()
    }
}

impl fmt::Debug for MutationCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationCache")
            .field("records", &lock(&self.records).len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arda_core::{now, query_key};
    use serde_json::json;

    fn paused(key: QueryKey, at: Timestamp) -> MutationRecord {
        let mut record = MutationRecord::new(key, json!({"order": 1}), at);
        record.status = MutationStatus::Paused;
        record
    }

    #[test]
    fn test_only_paused_are_persisted() {
        let cache = MutationCache::new();
        let at = now();
        cache.push(MutationRecord::new(query_key!["menus", "reorder"], json!({}), at));
        cache.push(paused(query_key!["menus", "reorder"], at));
        let mut done = MutationRecord::new(query_key!["menus", "create"], json!({}), at);
        done.status = MutationStatus::Success;
        cache.push(done);

        let persisted = cache.persisted();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].mutation_key, query_key!["menus", "reorder"]);
    }

    #[test]
    fn test_paused_in_submission_order() {
        let cache = MutationCache::new();
        let at = now();
        let later = paused(query_key!["b"], at + chrono::Duration::seconds(1));
        let earlier = paused(query_key!["a"], at);
        cache.push(later);
        cache.push(earlier);
        let keys: Vec<QueryKey> = cache.paused().into_iter().map(|r| r.mutation_key).collect();
        assert_eq!(keys, vec![query_key!["a"], query_key!["b"]]);
    }

    #[test]
    fn test_restore_skips_known_ids() {
        let cache = MutationCache::new();
        let record = paused(query_key!["menus", "reorder"], now());
        let persisted = vec![record.to_persisted()];
        cache.push(record);
        assert_eq!(cache.restore(persisted), 0);
        assert_eq!(cache.records().len(), 1);
    }

    #[test]
    fn test_prune_finished() {
        let cache = MutationCache::new();
        let at = now();
        let mut failed = MutationRecord::new(query_key!["x"], json!(null), at);
        failed.status = MutationStatus::Error;
        cache.push(failed);
        cache.push(paused(query_key!["y"], at));
        assert_eq!(cache.prune_finished(), 1);
        assert_eq!(cache.records().len(), 1);
    }

    #[test]
    fn test_claim_only_once() {
        let cache = MutationCache::new();
        let record = paused(query_key!["menus", "reorder"], now());
        let id = record.id;
        cache.push(record);
        assert!(cache.claim(id));
        assert!(!cache.claim(id));
        assert_eq!(cache.get(id).unwrap().status, MutationStatus::Pending);
    }

    #[test]
    fn test_trim_finished_drops_oldest() {
        let cache = MutationCache::new();
        let at = now();
        let mut ids = Vec::new();
        for _ in 0..5 {
            let mut done = MutationRecord::new(query_key!["menus", "reorder"], json!({}), at);
            done.status = MutationStatus::Success;
            ids.push(done.id);
            cache.push(done);
        }
        cache.push(paused(query_key!["menus", "reorder"], at));

        assert_eq!(cache.trim_finished(2), 3);
        let kept: Vec<MutationId> = cache.records().iter().map(|r| r.id).collect();
        assert_eq!(kept.len(), 3);
        assert_eq!(&kept[..2], &ids[3..]);
        assert_eq!(cache.paused().len(), 1);
    }

    #[tokio::test]
    async fn test_definition_round_trips_json() {
        let def = MutationDefinition::new(|n: u32| async move { Ok::<_, FetchError>(n * 2) });
        let out = (def.run)(json!(21)).await.unwrap();
        assert_eq!(out, json!(42));
        let bad = (def.run)(json!("x")).await.unwrap_err();
        assert!(matches!(bad, FetchError::Decode { .. }));
    }
}
