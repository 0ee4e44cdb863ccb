//! Query runtime: fetch coalescing, retry, invalidation and mutations.
//!
//! [`QueryRuntime`] is a cheap, cloneable handle over one shared
//! [`CacheStore`]. Every fetch runs on its own spawned task and publishes its
//! outcome on a `watch` channel, so concurrent callers for the same key await
//! a single fetcher invocation and dropping a caller never aborts the request.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arda_core::{
    now, CacheEntry, FetchError, PersistedMutation, QueryDefaultsConfig, QueryKey, QueryStatus,
    Timestamp,
};
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, watch};

use crate::error::{QueryError, QueryResult};
use crate::mutation::{
    MutationCache, MutationDefinition, MutationOutcome, MutationRecord, MutationStatus,
};
use crate::options::QueryOptions;
use crate::store::{CacheEvent, CacheStats, CacheStore, QueryFilter};

pub(crate) type ErasedFetcher =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Value, FetchError>> + Send + Sync>;

type FetchOutcome = Result<Value, FetchError>;

/// Finished mutations kept for inspection; older ones are dropped as new ones settle.
pub const MAX_FINISHED_MUTATIONS: usize = 32;

fn erase<T, F, Fut>(fetcher: F) -> ErasedFetcher
where
    T: Serialize + Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
{
    Arc::new(move || {
        let fut = fetcher();
        Box::pin(async move {
            let value = fut.await?;
            serde_json::to_value(value).map_err(|e| FetchError::decode(e.to_string()))
        })
    })
}

fn decode<T: DeserializeOwned>(key: &QueryKey, value: Value) -> QueryResult<T> {
    serde_json::from_value(value).map_err(|e| QueryError::Decode {
        key: key.clone(),
        reason: e.to_string(),
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How to refetch an observed key in the background.
#[derive(Clone)]
struct QueryDefinition {
    fetcher: ErasedFetcher,
    options: QueryOptions,
}

struct InFlight {
    request_id: u64,
    outcome: watch::Receiver<Option<FetchOutcome>>,
    fetcher: ErasedFetcher,
    options: QueryOptions,
}

/// How a mutation run ended without an error.
enum Settled {
    Completed(Value),
    /// Failed after connectivity dropped; queued again as paused.
    Paused,
}

struct RuntimeInner {
    store: CacheStore,
    defaults: QueryOptions,
    in_flight: Mutex<HashMap<QueryKey, InFlight>>,
    definitions: Mutex<HashMap<QueryKey, QueryDefinition>>,
    next_request: AtomicU64,
    mutations: MutationCache,
    online: AtomicBool,
}

/// Renderable view of one entry: last known data plus status and error.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState<T> {
    pub data: Option<T>,
    pub status: QueryStatus,
    pub error: Option<FetchError>,
    pub fetched_at: Timestamp,
    pub is_stale: bool,
}

impl<T> QueryState<T> {
    pub fn is_fetching(&self) -> bool {
        self.status == QueryStatus::Fetching
    }
}

/// Counts from one pass over the paused mutation queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResumeSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Failed after connectivity dropped and went back to paused.
    pub paused: usize,
    /// Left paused because no definition is registered for their key.
    pub unregistered: usize,
}

/// Shared handle to the query cache and its fetch machinery.
#[derive(Clone)]
pub struct QueryRuntime {
    inner: Arc<RuntimeInner>,
}

impl Default for QueryRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for QueryRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryRuntime")
            .field("store", &self.inner.store)
            .field("online", &self.is_online())
            .finish_non_exhaustive()
    }
}

impl QueryRuntime {
    pub fn new() -> Self {
        Self::with_defaults(QueryOptions::default())
    }

    /// Runtime whose observers and background refetches fall back to `defaults`.
    pub fn with_defaults(defaults: QueryOptions) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                store: CacheStore::new(),
                defaults,
                in_flight: Mutex::new(HashMap::new()),
                definitions: Mutex::new(HashMap::new()),
                next_request: AtomicU64::new(0),
                mutations: MutationCache::new(),
                online: AtomicBool::new(true),
            }),
        }
    }

    pub fn from_config(config: &QueryDefaultsConfig) -> Self {
        Self::with_defaults(QueryOptions::from_config(config))
    }

    pub fn default_options(&self) -> QueryOptions {
        self.inner.defaults.clone()
    }

    pub fn store(&self) -> &CacheStore {
        &self.inner.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.store.subscribe()
    }

    fn next_request_id(&self) -> u64 {
        self.inner.next_request.fetch_add(1, Ordering::Relaxed) + 1
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Return the cached value for `key` if fresh, otherwise fetch it.
    ///
    /// Concurrent calls for a key with a fetch in flight await that fetch.
    /// When retries are exhausted the error is returned and the entry keeps
    /// its last known data.
    pub async fn fetch<T, F, Fut>(&self, key: QueryKey, fetcher: F, options: QueryOptions) -> QueryResult<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        if let Some(entry) = self.inner.store.get(&key) {
            if entry.is_fresh(now()) {
                if let Some(data) = entry.data {
                    self.inner.store.record_hit();
                    return decode(&key, data);
                }
            }
        }
        self.inner.store.record_miss();

        let outcome = self.start_or_join(&key, erase(fetcher), options);
        match Self::wait(outcome).await {
            Ok(value) => decode(&key, value),
            Err(error) => Err(QueryError::Fetch { key, error }),
        }
    }

    /// Warm the cache for `key`. Failures are logged, never returned.
    pub async fn prefetch<T, F, Fut>(&self, key: QueryKey, fetcher: F, options: QueryOptions)
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        if let Err(e) = self.fetch::<T, F, Fut>(key.clone(), fetcher, options).await {
            tracing::debug!(key = %key, error = %e, "Prefetch failed");
        }
    }

    pub fn get_query_data<T: DeserializeOwned>(&self, key: &QueryKey) -> QueryResult<Option<T>> {
        match self.inner.store.get(key).and_then(|entry| entry.data) {
            Some(data) => decode(key, data).map(Some),
            None => Ok(None),
        }
    }

    /// Data, status and error for `key`, or `None` when nothing is cached.
    pub fn query_state<T: DeserializeOwned>(&self, key: &QueryKey) -> QueryResult<Option<QueryState<T>>> {
        let Some(entry) = self.inner.store.get(key) else {
            return Ok(None);
        };
        let at = now();
        let is_stale = entry.is_stale(at);
        let data = match entry.data {
            Some(data) => Some(decode(key, data)?),
            None => None,
        };
        Ok(Some(QueryState {
            data,
            status: entry.status,
            error: entry.error,
            fetched_at: entry.fetched_at,
            is_stale,
        }))
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Write `data` for `key` directly. Any fetch already in flight for the
    /// key is superseded and its result discarded.
    pub fn set_query_data<T: Serialize>(&self, key: &QueryKey, data: &T, options: &QueryOptions) -> QueryResult<()> {
        let value = serde_json::to_value(data).map_err(|e| QueryError::Serialize {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        let request_id = self.next_request_id();
        lock(&self.inner.in_flight).remove(key);
        self.inner
            .store
            .set_data(key, request_id, value, now(), options.stale_time, options.gc_time);
        Ok(())
    }

    /// Mark matching entries stale and refetch in the background.
    ///
    /// Observed keys are refetched with their registered definition. A fetch
    /// already running for a matching key started before the invalidation,
    /// so it is superseded by a new one and its result discarded.
    pub fn invalidate(&self, filter: &QueryFilter) -> usize {
        let count = self.inner.store.invalidate(filter, now());

        let mut refetch: Vec<(QueryKey, ErasedFetcher, QueryOptions)> = Vec::new();
        {
            let definitions = lock(&self.inner.definitions);
            for key in self.inner.store.observed_keys(filter) {
                if let Some(definition) = definitions.get(&key) {
                    refetch.push((key, Arc::clone(&definition.fetcher), definition.options.clone()));
                }
            }
        }
        {
            let in_flight = lock(&self.inner.in_flight);
            for (key, running) in in_flight.iter() {
                if filter.matches(key) && !refetch.iter().any(|(k, _, _)| k == key) {
                    refetch.push((key.clone(), Arc::clone(&running.fetcher), running.options.clone()));
                }
            }
        }

        tracing::debug!(
            filter = ?filter,
            invalidated = count,
            refetching = refetch.len(),
            "Invalidated queries"
        );
        if refetch.is_empty() {
            return count;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            tracing::warn!(filter = ?filter, "Invalidation refetch requested outside a tokio runtime");
            return count;
        }
        for (key, fetcher, options) in refetch {
            drop(self.start_fetch(&key, fetcher, options));
        }
        count
    }

    /// Remove matching entries. In-flight results for them are discarded.
    pub fn remove_queries(&self, filter: &QueryFilter) -> usize {
        let removed = self.inner.store.remove(filter);
        {
            let mut in_flight = lock(&self.inner.in_flight);
            for key in &removed {
                in_flight.remove(key);
            }
        }
        self.forget_definitions(&removed);
        removed.len()
    }

    pub fn clear(&self) -> usize {
        lock(&self.inner.in_flight).clear();
        let keys = self.inner.store.keys();
        let cleared = self.inner.store.clear();
        self.forget_definitions(&keys);
        cleared
    }

    /// Drop definitions for `keys` that no live observer still needs.
    fn forget_definitions(&self, keys: &[QueryKey]) {
        let mut definitions = lock(&self.inner.definitions);
        for key in keys {
            if self.inner.store.observer_count(key) == 0 {
                definitions.remove(key);
            }
        }
    }

    /// Collect expired, unobserved entries.
    pub fn garbage_collect(&self, at: Timestamp) -> usize {
        let removed = self.inner.store.remove_expired(at);
        if !removed.is_empty() {
            self.forget_definitions(&removed);
            tracing::debug!(removed = removed.len(), "Garbage collected queries");
        }
        removed.len()
    }

    /// Seed the store with restored entries. Live data that is as new or newer wins.
    pub fn hydrate<I>(&self, entries: I) -> usize
    where
        I: IntoIterator<Item = CacheEntry>,
    {
        self.inner.store.hydrate(entries)
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.store.stats()
    }

    // ------------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------------

    /// Watch `key`. The definition is kept for background refetches, and a
    /// fetch starts immediately when the entry is missing or stale.
    ///
    /// Must be called within a tokio runtime for the initial fetch to start.
    pub fn observe<T, F, Fut>(&self, key: QueryKey, fetcher: F, options: QueryOptions) -> QueryObserver<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let events = self.inner.store.subscribe();
        let observers = {
            // Held across both steps so a dropping observer cannot remove the new definition.
            let mut definitions = lock(&self.inner.definitions);
            definitions.insert(
                key.clone(),
                QueryDefinition {
                    fetcher: erase(fetcher),
                    options: options.clone(),
                },
            );
            self.inner.store.observe(&key, now(), options.gc_time)
        };
        tracing::debug!(key = %key, observers, "Observer registered");

        let fresh = self
            .inner
            .store
            .get(&key)
            .is_some_and(|entry| entry.is_fresh(now()));
        if !fresh {
            self.refetch_in_background(&key);
        }

        QueryObserver {
            runtime: self.clone(),
            key,
            events,
            _marker: PhantomData,
        }
    }

    /// Start (or join) a refetch of `key` using its registered definition.
    pub fn refetch_in_background(&self, key: &QueryKey) -> bool {
        let Some(definition) = lock(&self.inner.definitions).get(key).cloned() else {
            tracing::debug!(key = %key, "No definition registered, skipping refetch");
            return false;
        };
        if tokio::runtime::Handle::try_current().is_err() {
            tracing::warn!(key = %key, "Refetch requested outside a tokio runtime");
            return false;
        }
        drop(self.start_or_join(key, definition.fetcher, definition.options));
        true
    }

    // ------------------------------------------------------------------------
    // Fetch machinery
    // ------------------------------------------------------------------------

    fn start_or_join(
        &self,
        key: &QueryKey,
        fetcher: ErasedFetcher,
        options: QueryOptions,
    ) -> watch::Receiver<Option<FetchOutcome>> {
        let in_flight = lock(&self.inner.in_flight);
        if let Some(existing) = in_flight.get(key) {
            // A dropped sender means the task died without reporting.
            if existing.outcome.has_changed().is_ok() {
                tracing::trace!(key = %key, request_id = existing.request_id, "Joining in-flight fetch");
                return existing.outcome.clone();
            }
        }
        self.launch(in_flight, key, fetcher, options)
    }

    /// Start a new fetch for `key`, superseding any fetch already in flight.
    fn start_fetch(
        &self,
        key: &QueryKey,
        fetcher: ErasedFetcher,
        options: QueryOptions,
    ) -> watch::Receiver<Option<FetchOutcome>> {
        let in_flight = lock(&self.inner.in_flight);
        self.launch(in_flight, key, fetcher, options)
    }

    fn launch(
        &self,
        mut in_flight: MutexGuard<'_, HashMap<QueryKey, InFlight>>,
        key: &QueryKey,
        fetcher: ErasedFetcher,
        options: QueryOptions,
    ) -> watch::Receiver<Option<FetchOutcome>> {
        let request_id = self.next_request_id();
        let (tx, rx) = watch::channel(None);
        let superseded = in_flight.insert(
            key.clone(),
            InFlight {
                request_id,
                outcome: rx.clone(),
                fetcher: Arc::clone(&fetcher),
                options: options.clone(),
            },
        );
        // The store learns the new id before the in-flight map is released.
        self.inner
            .store
            .begin_fetch(key, request_id, now(), options.gc_time);
        drop(in_flight);

        match superseded {
            Some(old) => tracing::debug!(
                key = %key,
                superseded = old.request_id,
                request_id,
                "Fetch started, superseding in-flight fetch"
            ),
            None => tracing::debug!(key = %key, request_id, "Fetch started"),
        }

        let runtime = self.clone();
        let key = key.clone();
        tokio::spawn(async move {
            let outcome = runtime.execute(&key, request_id, fetcher, &options).await;
            runtime.finish(&key, request_id);
            // Every waiter may have gone away; the store is already updated.
            let _ = tx.send(Some(outcome));
        });
        rx
    }

    async fn wait(mut outcome: watch::Receiver<Option<FetchOutcome>>) -> FetchOutcome {
        match outcome.wait_for(Option::is_some).await {
            Ok(result) => (*result).clone().unwrap_or(Err(FetchError::Aborted)),
            Err(_) => Err(FetchError::Aborted),
        }
    }

    fn finish(&self, key: &QueryKey, request_id: u64) {
        let mut in_flight = lock(&self.inner.in_flight);
        if in_flight.get(key).is_some_and(|f| f.request_id == request_id) {
            in_flight.remove(key);
        }
    }

    async fn execute(
        &self,
        key: &QueryKey,
        request_id: u64,
        fetcher: ErasedFetcher,
        options: &QueryOptions,
    ) -> FetchOutcome {
        let store = &self.inner.store;
        loop {
            match fetcher().await {
                Ok(data) => {
                    let applied = store.complete_success(
                        key,
                        request_id,
                        data.clone(),
                        now(),
                        options.stale_time,
                        options.gc_time,
                    );
                    if applied {
                        tracing::debug!(key = %key, request_id, "Fetch succeeded");
                    } else {
                        tracing::debug!(key = %key, request_id, "Discarding superseded fetch result");
                    }
                    return Ok(data);
                }
                Err(error) => {
                    let Some(failures) = store.record_failed_attempt(key, request_id) else {
                        tracing::debug!(key = %key, request_id, error = %error, "Discarding superseded fetch error");
                        return Err(error);
                    };
                    if options.retry.should_retry(failures, &error) {
                        let delay = options.retry_delay.delay_for(failures - 1);
                        tracing::debug!(
                            key = %key,
                            attempt = failures,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "Fetch failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    tracing::warn!(key = %key, failures, error = %error, "Fetch failed, retries exhausted");
                    store.complete_error(key, request_id, error.clone());
                    return Err(error);
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------------

    pub fn register_mutation(&self, mutation_key: QueryKey, definition: MutationDefinition) {
        self.inner.mutations.register(mutation_key, definition);
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Switch connectivity. Going online resumes paused mutations.
    pub async fn set_online(&self, online: bool) -> ResumeSummary {
        let was_online = self.inner.online.swap(online, Ordering::SeqCst);
        tracing::info!(online, "Connectivity changed");
        if online && !was_online {
            self.resume_paused_mutations().await
        } else {
            ResumeSummary::default()
        }
    }

    /// Submit a mutation. Offline, it is queued as paused instead of run.
    ///
    /// A run that fails after connectivity drops is queued as paused too.
    pub async fn mutate<V: Serialize>(&self, mutation_key: QueryKey, variables: &V) -> QueryResult<MutationOutcome> {
        let definition = self
            .inner
            .mutations
            .definition(&mutation_key)
            .ok_or_else(|| QueryError::MutationNotRegistered {
                key: mutation_key.clone(),
            })?;
        let variables = serde_json::to_value(variables).map_err(|e| QueryError::Serialize {
            key: mutation_key.clone(),
            reason: e.to_string(),
        })?;

        let mut record = MutationRecord::new(mutation_key.clone(), variables.clone(), now());
        let id = record.id;
        if !self.is_online() {
            record.status = MutationStatus::Paused;
            self.inner.mutations.push(record);
            self.inner.store.emit(CacheEvent::MutationsChanged);
            tracing::info!(mutation = %mutation_key, id = %id, "Offline, mutation paused");
            return Ok(MutationOutcome::Paused(id));
        }

        self.inner.mutations.push(record);
        self.inner.store.emit(CacheEvent::MutationsChanged);
        match self.run_mutation(id, &mutation_key, variables, &definition).await? {
            Settled::Completed(result) => Ok(MutationOutcome::Completed(result)),
            Settled::Paused => Ok(MutationOutcome::Paused(id)),
        }
    }

    /// Run paused mutations in submission order.
    ///
    /// Each mutation is claimed before it runs, so overlapping passes never
    /// run the same one twice. The pass stops once the runtime goes offline.
    pub async fn resume_paused_mutations(&self) -> ResumeSummary {
        let mut summary = ResumeSummary::default();
        for record in self.inner.mutations.paused() {
            if !self.is_online() {
                break;
            }
            let Some(definition) = self.inner.mutations.definition(&record.mutation_key) else {
                tracing::warn!(
                    mutation = %record.mutation_key,
                    id = %record.id,
                    "No definition registered, mutation stays paused"
                );
                summary.unregistered += 1;
                continue;
            };
            if !self.inner.mutations.claim(record.id) {
                tracing::debug!(id = %record.id, "Mutation already claimed by another pass");
                continue;
            }
            tracing::info!(mutation = %record.mutation_key, id = %record.id, "Resuming paused mutation");
            match self
                .run_mutation(record.id, &record.mutation_key, record.variables, &definition)
                .await
            {
                Ok(Settled::Completed(_)) => summary.succeeded += 1,
                Ok(Settled::Paused) => {
                    summary.paused += 1;
                    break;
                }
                Err(_) => summary.failed += 1,
            }
        }
        summary
    }

    async fn run_mutation(
        &self,
        id: arda_core::MutationId,
        mutation_key: &QueryKey,
        variables: Value,
        definition: &MutationDefinition,
    ) -> QueryResult<Settled> {
        let mutations = &self.inner.mutations;
        let mut failures = 0u32;
        loop {
            match (definition.run)(variables.clone()).await {
                Ok(result) => {
                    mutations.update(id, |r| {
                        r.status = MutationStatus::Success;
                        r.error = None;
                    });
                    mutations.trim_finished(MAX_FINISHED_MUTATIONS);
                    self.inner.store.emit(CacheEvent::MutationsChanged);
                    tracing::debug!(mutation = %mutation_key, id = %id, "Mutation succeeded");
                    for filter in &definition.invalidates {
                        self.invalidate(filter);
                    }
                    return Ok(Settled::Completed(result));
                }
                Err(error) => {
                    failures += 1;
                    mutations.update(id, |r| r.failure_count = r.failure_count.saturating_add(1));
                    if !self.is_online() {
                        mutations.update(id, |r| {
                            r.status = MutationStatus::Paused;
                            r.error = Some(error.clone());
                        });
                        self.inner.store.emit(CacheEvent::MutationsChanged);
                        tracing::info!(mutation = %mutation_key, id = %id, error = %error, "Went offline, mutation paused");
                        return Ok(Settled::Paused);
                    }
                    if definition.retry.should_retry(failures, &error) {
                        tokio::time::sleep(definition.retry_delay.delay_for(failures - 1)).await;
                        continue;
                    }
                    mutations.update(id, |r| {
                        r.status = MutationStatus::Error;
                        r.error = Some(error.clone());
                    });
                    mutations.trim_finished(MAX_FINISHED_MUTATIONS);
                    self.inner.store.emit(CacheEvent::MutationsChanged);
                    tracing::warn!(mutation = %mutation_key, id = %id, error = %error, "Mutation failed");
                    return Err(QueryError::Mutation {
                        key: mutation_key.clone(),
                        error,
                    });
                }
            }
        }
    }

    pub fn mutations(&self) -> Vec<MutationRecord> {
        self.inner.mutations.records()
    }

    /// Paused mutations in their persisted form.
    pub fn persisted_mutations(&self) -> Vec<PersistedMutation> {
        self.inner.mutations.persisted()
    }

    /// Re-queue mutations from a snapshot as paused. Does not run them.
    pub fn restore_mutations(&self, mutations: Vec<PersistedMutation>) -> usize {
        let restored = self.inner.mutations.restore(mutations);
        if restored > 0 {
            self.inner.store.emit(CacheEvent::MutationsChanged);
        }
        restored
    }

    pub fn prune_finished_mutations(&self) -> usize {
        self.inner.mutations.prune_finished()
    }
}

/// Handle returned by [`QueryRuntime::observe`]. Dropping it unregisters the observer.
pub struct QueryObserver<T> {
    runtime: QueryRuntime,
    key: QueryKey,
    events: broadcast::Receiver<CacheEvent>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> QueryObserver<T> {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn state(&self) -> QueryResult<Option<QueryState<T>>> {
        self.runtime.query_state(&self.key)
    }

    pub fn data(&self) -> QueryResult<Option<T>> {
        self.runtime.get_query_data(&self.key)
    }

    /// Wait for the next change to this key. A lagged feed counts as a change.
    pub async fn changed(&mut self) -> Option<CacheEvent> {
        loop {
            match self.events.recv().await {
                Ok(event) => {
                    let relevant = match &event {
                        CacheEvent::Cleared => true,
                        CacheEvent::MutationsChanged => false,
                        other => other.key() == Some(&self.key),
                    };
                    if relevant {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    return Some(CacheEvent::Updated(self.key.clone()));
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn refetch(&self) -> bool {
        self.runtime.refetch_in_background(&self.key)
    }
}

impl<T> fmt::Debug for QueryObserver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryObserver").field("key", &self.key).finish()
    }
}

impl<T> Drop for QueryObserver<T> {
    fn drop(&mut self) {
        let inner = &self.runtime.inner;
        let mut definitions = lock(&inner.definitions);
        let remaining = inner.store.unobserve(&self.key);
        // A removed key is no longer collected, so its definition goes with the last observer.
        if remaining == 0 && !inner.store.contains(&self.key) {
            definitions.remove(&self.key);
        }
        drop(definitions);
        tracing::debug!(key = %self.key, observers = remaining, "Observer dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::RetryPolicy;
    use arda_core::query_key;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn quick() -> QueryOptions {
        QueryOptions::new()
            .with_stale_time(Duration::from_secs(60))
            .with_retry(RetryPolicy::Never)
    }

    #[tokio::test]
    async fn test_fetch_then_hit() {
        let runtime = QueryRuntime::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let fetcher = move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, FetchError>(vec!["dashboard".to_string()])
            }
        };

        let key = query_key!["menus", "ADMIN"];
        let first: Vec<String> = runtime.fetch(key.clone(), fetcher.clone(), quick()).await.unwrap();
        let second: Vec<String> = runtime.fetch(key.clone(), fetcher, quick()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = runtime.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_decode_mismatch() {
        let runtime = QueryRuntime::new();
        let key = query_key!["menus"];
        runtime.set_query_data(&key, &json!({"a": 1}), &quick()).unwrap();
        let err = runtime.get_query_data::<Vec<u32>>(&key).unwrap_err();
        assert!(matches!(err, QueryError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_mutate_unregistered() {
        let runtime = QueryRuntime::new();
        let err = runtime.mutate(query_key!["menus", "reorder"], &json!({})).await.unwrap_err();
        assert_eq!(
            err,
            QueryError::MutationNotRegistered {
                key: query_key!["menus", "reorder"]
            }
        );
    }

    #[tokio::test]
    async fn test_query_state_reports_status() {
        let runtime = QueryRuntime::new();
        let key = query_key!["tenants"];
        assert!(runtime.query_state::<Value>(&key).unwrap().is_none());

        let err = runtime
            .fetch::<Value, _, _>(key.clone(), || async { Err(FetchError::network("down")) }, quick())
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Fetch { .. }));

        let state = runtime.query_state::<Value>(&key).unwrap().unwrap();
        assert_eq!(state.status, QueryStatus::Error);
        assert_eq!(state.error, Some(FetchError::network("down")));
        assert!(state.data.is_none());
    }

    #[tokio::test]
    async fn test_remove_queries_drops_entries() {
        let runtime = QueryRuntime::new();
        runtime.set_query_data(&query_key!["menus", "ADMIN"], &1, &quick()).unwrap();
        runtime.set_query_data(&query_key!["tenants"], &2, &quick()).unwrap();
        assert_eq!(runtime.remove_queries(&QueryFilter::namespace("menus")), 1);
        assert_eq!(runtime.store().len(), 1);
        assert_eq!(runtime.clear(), 1);
    }
}
