//! ARDA Query
//!
//! Shared query cache for the shell and its federated modules: structural
//! keys, stale-while-revalidate reads with request coalescing, retry with
//! exponential backoff, scoped invalidation, garbage collection, mutations
//! with offline pausing, and throttled durable snapshots.

pub mod error;
pub mod gc;
pub mod mutation;
pub mod options;
pub mod persist;
pub mod runtime;
pub mod store;

pub use error::{QueryError, QueryResult};
pub use gc::{gc_task, spawn_gc_task, DEFAULT_GC_INTERVAL};
pub use mutation::{
    MutationCache, MutationDefinition, MutationOutcome, MutationRecord, MutationStatus,
};
pub use options::{exponential_backoff, QueryOptions, RetryDelay, RetryPolicy};
pub use persist::{
    persister_task, spawn_persister, FileMedium, LmdbMedium, MemoryMedium, PersistenceBridge,
    RestoreOutcome, RestoreReport, StorageMedium, Throttle, DEFAULT_MAP_SIZE_MB,
};
pub use runtime::{QueryObserver, QueryRuntime, QueryState, ResumeSummary, MAX_FINISHED_MUTATIONS};
pub use store::{CacheEvent, CacheStats, CacheStore, QueryFilter};
