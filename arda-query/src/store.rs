//! In-memory cache store.
//!
//! Entries are keyed structurally by [`QueryKey`]. Each slot tracks the id of
//! the most recent request issued for it; completions carrying an older id are
//! rejected. Observer counts are held per key apart from the slots, so they
//! survive `remove` and `clear` while the observers are still alive.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use arda_core::{CacheEntry, FetchError, QueryKey, QueryStatus, Timestamp};
use serde_json::Value;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

/// Change notification emitted by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// Entry created or its data/status changed.
    Updated(QueryKey),
    /// Entry marked stale.
    Invalidated(QueryKey),
    /// Entry removed (collected or explicitly removed).
    Removed(QueryKey),
    /// Every entry removed.
    Cleared,
    /// The mutation queue changed.
    MutationsChanged,
}

impl CacheEvent {
    /// The key this event concerns, if it concerns a single key.
    pub fn key(&self) -> Option<&QueryKey> {
        match self {
            CacheEvent::Updated(k) | CacheEvent::Invalidated(k) | CacheEvent::Removed(k) => Some(k),
            CacheEvent::Cleared | CacheEvent::MutationsChanged => None,
        }
    }
}

type KeyPredicate = Arc<dyn Fn(&QueryKey) -> bool + Send + Sync>;

/// Predicate over query keys used by invalidation and removal.
#[derive(Clone)]
pub struct QueryFilter {
    kind: FilterKind,
}

#[derive(Clone)]
enum FilterKind {
    All,
    Exact(QueryKey),
    Prefix(QueryKey),
    Predicate(KeyPredicate),
}

impl QueryFilter {
    pub fn all() -> Self {
        Self { kind: FilterKind::All }
    }

    pub fn exact(key: QueryKey) -> Self {
        Self {
            kind: FilterKind::Exact(key),
        }
    }

    /// Every key whose leading parts equal `prefix`.
    pub fn prefix(prefix: QueryKey) -> Self {
        Self {
            kind: FilterKind::Prefix(prefix),
        }
    }

    /// Every key in a namespace, e.g. all `["menus", ..]` keys.
    pub fn namespace(namespace: &str) -> Self {
        Self::prefix(QueryKey::new(namespace))
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&QueryKey) -> bool + Send + Sync + 'static,
    {
        Self {
            kind: FilterKind::Predicate(Arc::new(f)),
        }
    }

    pub fn matches(&self, key: &QueryKey) -> bool {
        match &self.kind {
            FilterKind::All => true,
            FilterKind::Exact(k) => k == key,
            FilterKind::Prefix(p) => key.starts_with(p),
            FilterKind::Predicate(f) => f(key),
        }
    }
}

impl fmt::Debug for QueryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FilterKind::All => f.write_str("QueryFilter::All"),
            FilterKind::Exact(k) => write!(f, "QueryFilter::Exact({})", k),
            FilterKind::Prefix(k) => write!(f, "QueryFilter::Prefix({})", k),
            FilterKind::Predicate(_) => f.write_str("QueryFilter::Predicate(..)"),
        }
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads served from a fresh entry.
    pub hits: u64,
    /// Reads that had to fetch or join a fetch.
    pub misses: u64,
    /// Entries currently held.
    pub entry_count: u64,
    /// Entries with at least one observer.
    pub observed_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    entry: CacheEntry,
    latest_request: u64,
}

impl Slot {
    fn new(entry: CacheEntry) -> Self {
        Self {
            entry,
            latest_request: 0,
        }
    }
}

/// Process-wide keyed store of query results.
pub struct CacheStore {
    slots: RwLock<HashMap<QueryKey, Slot>>,
    /// Live observer registrations. Locked after `slots` when both are held.
    observers: Mutex<HashMap<QueryKey, usize>>,
    events: broadcast::Sender<CacheEvent>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for CacheStore {
    fn default() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            slots: RwLock::new(HashMap::new()),
            observers: Mutex::new(HashMap::new()),
            events,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }
}

impl fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<QueryKey, Slot>> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<QueryKey, Slot>> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn observers(&self) -> MutexGuard<'_, HashMap<QueryKey, usize>> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn emit(&self, event: CacheEvent) {
        // No receivers is normal before anything subscribes.
        let _ = self.events.send(event);
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    pub fn get(&self, key: &QueryKey) -> Option<CacheEntry> {
        self.read().get(key).map(|slot| slot.entry.clone())
    }

    /// Insert or replace an entry, keeping any observer registrations.
    pub fn set(&self, entry: CacheEntry) {
        let key = entry.key.clone();
        {
            let mut slots = self.write();
            match slots.get_mut(&key) {
                Some(slot) => slot.entry = entry,
                None => {
                    slots.insert(key.clone(), Slot::new(entry));
                }
            }
        }
        self.emit(CacheEvent::Updated(key));
    }

    pub fn contains(&self, key: &QueryKey) -> bool {
        self.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn keys(&self) -> Vec<QueryKey> {
        self.read().keys().cloned().collect()
    }

    /// Mark matching entries stale as of `now`. Returns the number affected.
    pub fn invalidate(&self, filter: &QueryFilter, now: Timestamp) -> usize {
        let invalidated: Vec<QueryKey> = {
            let mut slots = self.write();
            slots
                .iter_mut()
                .filter(|(key, _)| filter.matches(key))
                .map(|(key, slot)| {
                    slot.entry.invalidate(now);
                    key.clone()
                })
                .collect()
        };
        let count = invalidated.len();
        for key in invalidated {
            self.emit(CacheEvent::Invalidated(key));
        }
        count
    }

    /// Remove expired, unobserved entries. Returns the number removed.
    pub fn garbage_collect(&self, now: Timestamp) -> usize {
        self.remove_expired(now).len()
    }

    /// Remove expired, unobserved, idle entries and report which keys went.
    ///
    /// Observed entries are kept past `expires_at`, and entries with a fetch
    /// in progress are left for the next pass.
    pub fn remove_expired(&self, now: Timestamp) -> Vec<QueryKey> {
        let removed: Vec<QueryKey> = {
            let mut slots = self.write();
            let observers = self.observers();
            let expired: Vec<QueryKey> = slots
                .iter()
                .filter(|(key, slot)| {
                    !observers.contains_key(*key)
                        && slot.entry.is_expired(now)
                        && slot.entry.status != QueryStatus::Fetching
                })
                .map(|(key, _)| key.clone())
                .collect();
            for key in &expired {
                slots.remove(key);
            }
            expired
        };
        for key in &removed {
            self.emit(CacheEvent::Removed(key.clone()));
        }
        removed
    }

    /// Remove matching entries regardless of observers.
    ///
    /// Observer registrations stay, so a slot recreated for an observed key
    /// is still protected from collection.
    pub fn remove(&self, filter: &QueryFilter) -> Vec<QueryKey> {
        let removed: Vec<QueryKey> = {
            let mut slots = self.write();
            let keys: Vec<QueryKey> = slots
                .keys()
                .filter(|key| filter.matches(key))
                .cloned()
                .collect();
            for key in &keys {
                slots.remove(key);
            }
            keys
        };
        for key in &removed {
            self.emit(CacheEvent::Removed(key.clone()));
        }
        removed
    }

    /// Drop every entry. Returns the number removed.
    pub fn clear(&self) -> usize {
        let count = {
            let mut slots = self.write();
            let count = slots.len();
            slots.clear();
            count
        };
        self.emit(CacheEvent::Cleared);
        count
    }

    /// Register one observer, creating a placeholder entry if needed.
    pub fn observe(&self, key: &QueryKey, now: Timestamp, gc_time: Duration) -> usize {
        let (count, created) = {
            let mut slots = self.write();
            let mut created = false;
            slots.entry(key.clone()).or_insert_with(|| {
                created = true;
                Slot::new(CacheEntry::pending(key.clone(), now, gc_time))
            });
            let mut observers = self.observers();
            let count = observers.entry(key.clone()).or_insert(0);
            *count += 1;
            (*count, created)
        };
        if created {
            self.emit(CacheEvent::Updated(key.clone()));
        }
        count
    }

    /// Drop one observer registration. The entry itself stays until collected.
    pub fn unobserve(&self, key: &QueryKey) -> usize {
        let mut observers = self.observers();
        let Some(count) = observers.get_mut(key) else {
            return 0;
        };
        *count = count.saturating_sub(1);
        let remaining = *count;
        if remaining == 0 {
            observers.remove(key);
        }
        remaining
    }

    pub fn observer_count(&self, key: &QueryKey) -> usize {
        self.observers().get(key).copied().unwrap_or(0)
    }

    /// Observed keys matching `filter` that currently hold an entry.
    pub fn observed_keys(&self, filter: &QueryFilter) -> Vec<QueryKey> {
        let slots = self.read();
        self.observers()
            .keys()
            .filter(|key| filter.matches(key) && slots.contains_key(*key))
            .cloned()
            .collect()
    }

    /// Copies of every entry holding a successful result.
    ///
    /// An entry being refetched still counts, exported as it was before the
    /// refetch started.
    pub fn success_entries(&self) -> Vec<CacheEntry> {
        self.read()
            .values()
            .filter(|slot| match slot.entry.status {
                QueryStatus::Success => true,
                QueryStatus::Fetching => slot.entry.has_data() && slot.entry.error.is_none(),
                QueryStatus::Idle | QueryStatus::Error => false,
            })
            .map(|slot| {
                let mut entry = slot.entry.clone();
                entry.status = QueryStatus::Success;
                entry.retry_count = 0;
                entry
            })
            .collect()
    }

    /// Seed the store from restored entries.
    ///
    /// A restored entry never replaces a live entry that already holds data
    /// fetched at the same time or later. No events are emitted.
    pub fn hydrate<I>(&self, entries: I) -> usize
    where
        I: IntoIterator<Item = CacheEntry>,
    {
        let mut slots = self.write();
        let mut hydrated = 0;
        for entry in entries {
            if entry.status != QueryStatus::Success {
                continue;
            }
            match slots.get_mut(&entry.key) {
                Some(slot) => {
                    let live = &slot.entry;
                    let newer_live = live.has_data() && live.fetched_at >= entry.fetched_at;
                    if !newer_live && live.status != QueryStatus::Fetching {
                        slot.entry = entry;
                        hydrated += 1;
                    }
                }
                None => {
                    slots.insert(entry.key.clone(), Slot::new(entry));
                    hydrated += 1;
                }
            }
        }
        hydrated
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CacheStats {
        let slots = self.read();
        let observers = self.observers();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: slots.len() as u64,
            observed_count: observers.keys().filter(|key| slots.contains_key(*key)).count() as u64,
        }
    }

    // ------------------------------------------------------------------------
    // Request-guarded transitions used by the runtime.
    // ------------------------------------------------------------------------

    /// Record that `request_id` is now the latest request for `key` and mark it fetching.
    pub(crate) fn begin_fetch(
        &self,
        key: &QueryKey,
        request_id: u64,
        now: Timestamp,
        gc_time: Duration,
    ) {
        {
            let mut slots = self.write();
            let slot = slots
                .entry(key.clone())
                .or_insert_with(|| Slot::new(CacheEntry::pending(key.clone(), now, gc_time)));
            slot.latest_request = request_id;
            slot.entry.mark_fetching();
        }
        self.emit(CacheEvent::Updated(key.clone()));
    }

    /// Apply a successful result if `request_id` is still the latest for `key`.
    pub(crate) fn complete_success(
        &self,
        key: &QueryKey,
        request_id: u64,
        data: Value,
        now: Timestamp,
        stale_time: Duration,
        gc_time: Duration,
    ) -> bool {
        let applied = {
            let mut slots = self.write();
            match slots.get_mut(key) {
                Some(slot) if slot.latest_request == request_id => {
                    slot.entry.apply_success(data, now, stale_time, gc_time);
                    true
                }
                _ => false,
            }
        };
        if applied {
            self.emit(CacheEvent::Updated(key.clone()));
        }
        applied
    }

    /// Count a failed attempt; `None` when the request has been superseded.
    pub(crate) fn record_failed_attempt(&self, key: &QueryKey, request_id: u64) -> Option<u32> {
        let mut slots = self.write();
        match slots.get_mut(key) {
            Some(slot) if slot.latest_request == request_id => {
                Some(slot.entry.record_failed_attempt())
            }
            _ => None,
        }
    }

    /// Record exhausted retries if `request_id` is still the latest for `key`.
    pub(crate) fn complete_error(&self, key: &QueryKey, request_id: u64, error: FetchError) -> bool {
        let applied = {
            let mut slots = self.write();
            match slots.get_mut(key) {
                Some(slot) if slot.latest_request == request_id => {
                    slot.entry.apply_error(error);
                    true
                }
                _ => false,
            }
        };
        if applied {
            self.emit(CacheEvent::Updated(key.clone()));
        }
        applied
    }

    /// Write data directly, superseding any request issued before `request_id`.
    pub(crate) fn set_data(
        &self,
        key: &QueryKey,
        request_id: u64,
        data: Value,
        now: Timestamp,
        stale_time: Duration,
        gc_time: Duration,
    ) {
        {
            let mut slots = self.write();
            let slot = slots
                .entry(key.clone())
                .or_insert_with(|| Slot::new(CacheEntry::pending(key.clone(), now, gc_time)));
            slot.latest_request = request_id;
            slot.entry.apply_success(data, now, stale_time, gc_time);
        }
        self.emit(CacheEvent::Updated(key.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arda_core::{now, query_key};
    use serde_json::json;

    fn entry(key: QueryKey, at: Timestamp, gc_secs: u64) -> CacheEntry {
        CacheEntry::with_data(key, json!({"ok": true}), at, Duration::from_secs(10), Duration::from_secs(gc_secs))
    }

    #[test]
    fn test_structural_keying() {
        let store = CacheStore::new();
        let at = now();
        store.set(entry(QueryKey::new("menus").with("ADMIN"), at, 60));
        assert!(store.get(&query_key!["menus", "ADMIN"]).is_some());
        assert!(store.get(&query_key!["menus", "USER"]).is_none());
    }

    #[test]
    fn test_invalidate_by_namespace() {
        let store = CacheStore::new();
        let at = now();
        store.set(entry(query_key!["menus", "ADMIN"], at, 60));
        store.set(entry(query_key!["menus", "USER"], at, 60));
        store.set(entry(query_key!["tenants"], at, 60));

        let count = store.invalidate(&QueryFilter::namespace("menus"), at);
        assert_eq!(count, 2);
        assert!(store.get(&query_key!["menus", "ADMIN"]).unwrap().is_stale(at));
        assert!(store.get(&query_key!["tenants"]).unwrap().is_fresh(at));
    }

    #[test]
    fn test_gc_skips_observed_entries() {
        let store = CacheStore::new();
        let at = now();
        store.set(entry(query_key!["menus", "ADMIN"], at, 1));
        store.set(entry(query_key!["menus", "USER"], at, 1));
        store.observe(&query_key!["menus", "ADMIN"], at, Duration::from_secs(1));

        let later = at + chrono::Duration::seconds(5);
        assert_eq!(store.garbage_collect(later), 1);
        assert!(store.contains(&query_key!["menus", "ADMIN"]));
        assert!(!store.contains(&query_key!["menus", "USER"]));

        assert_eq!(store.unobserve(&query_key!["menus", "ADMIN"]), 0);
        assert_eq!(store.garbage_collect(later), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_removal_keeps_observer_registrations() {
        let store = CacheStore::new();
        let at = now();
        let key = query_key!["menus", "ADMIN"];
        store.observe(&key, at, Duration::from_secs(1));
        assert_eq!(store.clear(), 1);
        assert_eq!(store.observer_count(&key), 1);

        // Recreated by the next fetch, it stays protected while observed.
        store.begin_fetch(&key, 1, at, Duration::from_secs(1));
        let ttl = Duration::from_secs(1);
        assert!(store.complete_success(&key, 1, json!("menu"), at, ttl, ttl));
        let later = at + chrono::Duration::seconds(5);
        assert_eq!(store.garbage_collect(later), 0);
        assert_eq!(store.stats().observed_count, 1);

        assert_eq!(store.unobserve(&key), 0);
        assert_eq!(store.garbage_collect(later), 1);
    }

    #[test]
    fn test_gc_keeps_unexpired() {
        let store = CacheStore::new();
        let at = now();
        store.set(entry(query_key!["menus"], at, 60));
        assert_eq!(store.garbage_collect(at + chrono::Duration::seconds(59)), 0);
    }

    #[test]
    fn test_request_guard_rejects_superseded() {
        let store = CacheStore::new();
        let key = query_key!["menus", "ADMIN"];
        let at = now();
        store.begin_fetch(&key, 1, at, Duration::from_secs(60));
        store.begin_fetch(&key, 2, at, Duration::from_secs(60));

        let ttl = Duration::from_secs(60);
        assert!(!store.complete_success(&key, 1, json!("old"), at, ttl, ttl));
        assert!(store.record_failed_attempt(&key, 1).is_none());
        assert!(store.complete_success(&key, 2, json!("new"), at, ttl, ttl));
        assert_eq!(store.get(&key).unwrap().data, Some(json!("new")));
    }

    #[test]
    fn test_hydrate_does_not_overwrite_newer_data() {
        let store = CacheStore::new();
        let at = now();
        let key = query_key!["menus", "ADMIN"];
        let mut live = entry(key.clone(), at, 60);
        live.data = Some(json!("live"));
        store.set(live);

        let mut restored = entry(key.clone(), at - chrono::Duration::seconds(30), 60);
        restored.data = Some(json!("restored"));
        let other = entry(query_key!["menus", "USER"], at, 60);

        assert_eq!(store.hydrate(vec![restored, other]), 1);
        assert_eq!(store.get(&key).unwrap().data, Some(json!("live")));
    }

    #[test]
    fn test_events_emitted() {
        let store = CacheStore::new();
        let mut rx = store.subscribe();
        let at = now();
        store.set(entry(query_key!["menus"], at, 60));
        store.invalidate(&QueryFilter::all(), at);
        store.clear();

        assert_eq!(rx.try_recv().unwrap(), CacheEvent::Updated(query_key!["menus"]));
        assert_eq!(rx.try_recv().unwrap(), CacheEvent::Invalidated(query_key!["menus"]));
        assert_eq!(rx.try_recv().unwrap(), CacheEvent::Cleared);
    }

    #[test]
    fn test_filter_kinds() {
        let key = query_key!["menus", "ADMIN"];
        assert!(QueryFilter::all().matches(&key));
        assert!(QueryFilter::exact(key.clone()).matches(&key));
        assert!(!QueryFilter::exact(query_key!["menus"]).matches(&key));
        assert!(QueryFilter::prefix(query_key!["menus"]).matches(&key));
        assert!(QueryFilter::predicate(|k| k.len() == 2).matches(&key));
    }

    #[test]
    fn test_stats_hit_rate() {
        let store = CacheStore::new();
        store.record_hit();
        store.record_hit();
        store.record_hit();
        store.record_miss();
        let stats = store.stats();
        assert!((stats.hit_rate() - 0.75).abs() < 0.001);
        assert!((CacheStats::default().hit_rate() - 0.0).abs() < 0.001);
    }
}
