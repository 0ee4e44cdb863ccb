//! Durable snapshots of the query cache.
//!
//! A [`PersistenceBridge`] serializes the successful entries of a
//! [`QueryRuntime`](crate::QueryRuntime) plus its paused mutations into one
//! JSON record under a fixed storage key. The persister task keeps that
//! record current through a trailing-edge [`Throttle`].

mod bridge;
mod lmdb;
mod medium;
mod throttle;

pub use bridge::{PersistenceBridge, RestoreOutcome, RestoreReport};
pub use lmdb::{LmdbMedium, DEFAULT_MAP_SIZE_MB};
pub use medium::{FileMedium, MemoryMedium, StorageMedium};
pub use throttle::{persister_task, spawn_persister, Throttle};
