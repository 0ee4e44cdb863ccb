//! Snapshot save/restore between the query runtime and a storage medium.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use arda_core::{now, PersistedSnapshot, PersistenceConfig, PersistenceError, SnapshotRejection};

use super::medium::StorageMedium;
use crate::runtime::{QueryRuntime, ResumeSummary};

/// What was found under the storage key.
#[derive(Debug, Clone, PartialEq)]
pub enum RestoreOutcome {
    Restored(PersistedSnapshot),
    /// Nothing stored.
    Empty,
    /// A record exists but may not be used.
    Rejected(SnapshotRejection),
    /// The medium could not be read.
    Unavailable(PersistenceError),
}

/// Result of [`PersistenceBridge::restore_into`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub entries: usize,
    pub mutations: usize,
    pub resumed: ResumeSummary,
    pub rejected: Option<SnapshotRejection>,
    /// Restore had already run; nothing was done.
    pub already_restored: bool,
}

/// Writes cache snapshots to a medium and reads them back once at boot.
///
/// Writes are best-effort. The first failed write is logged and every later
/// save becomes a no-op, leaving the session in-memory only.
pub struct PersistenceBridge {
    medium: Arc<dyn StorageMedium>,
    config: PersistenceConfig,
    degraded: AtomicBool,
    restored: AtomicBool,
    writes: AtomicU64,
}

impl fmt::Debug for PersistenceBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistenceBridge")
            .field("config", &self.config)
            .field("degraded", &self.is_degraded())
            .field("writes", &self.writes())
            .finish_non_exhaustive()
    }
}

impl PersistenceBridge {
    pub fn new(medium: Arc<dyn StorageMedium>, config: PersistenceConfig) -> Self {
        Self {
            medium,
            config,
            degraded: AtomicBool::new(false),
            restored: AtomicBool::new(false),
            writes: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    /// True once a write has failed; saves are skipped from then on.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Successful writes so far.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Current runtime state as a snapshot: successful entries plus paused mutations.
    pub fn snapshot_of(&self, runtime: &QueryRuntime) -> PersistedSnapshot {
        PersistedSnapshot::from_entries(&*self.config.buster, now(), runtime.store().success_entries())
            .with_mutations(runtime.persisted_mutations())
    }

    /// Write `snapshot`, propagating failures.
    pub async fn try_save(&self, snapshot: &PersistedSnapshot) -> Result<(), PersistenceError> {
        let json = serde_json::to_string(snapshot)?;
        self.medium.set_item(&self.config.storage_key, &json).await?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(
            storage_key = %self.config.storage_key,
            entries = snapshot.len(),
            mutations = snapshot.mutations.len(),
            bytes = json.len(),
            "Snapshot written"
        );
        Ok(())
    }

    /// Best-effort write. Returns whether the snapshot was stored.
    pub async fn save(&self, snapshot: &PersistedSnapshot) -> bool {
        if self.is_degraded() {
            return false;
        }
        match self.try_save(snapshot).await {
            Ok(()) => true,
            Err(e) => {
                self.degraded.store(true, Ordering::SeqCst);
                tracing::warn!(
                    storage_key = %self.config.storage_key,
                    error = %e,
                    "Snapshot write failed, continuing in memory only"
                );
                false
            }
        }
    }

    /// Snapshot the runtime and save it.
    pub async fn persist(&self, runtime: &QueryRuntime) -> bool {
        let snapshot = self.snapshot_of(runtime);
        self.save(&snapshot).await
    }

    /// Read and validate the stored record without side effects.
    pub async fn read_snapshot(&self) -> RestoreOutcome {
        let raw = match self.medium.get_item(&self.config.storage_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return RestoreOutcome::Empty,
            Err(e) => return RestoreOutcome::Unavailable(e),
        };
        let snapshot: PersistedSnapshot = match serde_json::from_str(&raw) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                return RestoreOutcome::Rejected(SnapshotRejection::Corrupt {
                    reason: e.to_string(),
                })
            }
        };
        match snapshot.validate(&self.config.buster, self.config.max_age(), now()) {
            Ok(()) => RestoreOutcome::Restored(snapshot),
            Err(rejection) => RestoreOutcome::Rejected(rejection),
        }
    }

    /// The stored snapshot, if usable. Rejected records are removed.
    pub async fn restore(&self) -> Option<PersistedSnapshot> {
        match self.read_snapshot().await {
            RestoreOutcome::Restored(snapshot) => Some(snapshot),
            RestoreOutcome::Empty => None,
            RestoreOutcome::Rejected(rejection) => {
                self.discard(&rejection).await;
                None
            }
            RestoreOutcome::Unavailable(e) => {
                tracing::warn!(storage_key = %self.config.storage_key, error = %e, "Snapshot read failed");
                None
            }
        }
    }

    async fn discard(&self, rejection: &SnapshotRejection) {
        tracing::info!(storage_key = %self.config.storage_key, reason = %rejection, "Discarding snapshot");
        if let Err(e) = self.medium.remove_item(&self.config.storage_key).await {
            tracing::debug!(error = %e, "Could not remove rejected snapshot");
        }
    }

    /// Seed `runtime` from the stored snapshot. Runs at most once per bridge.
    ///
    /// Entries already expired are skipped. Paused mutations are re-queued
    /// and, if the runtime is online, resumed; nothing else in flight at save
    /// time is restarted.
    pub async fn restore_into(&self, runtime: &QueryRuntime) -> RestoreReport {
        if self.restored.swap(true, Ordering::SeqCst) {
            return RestoreReport {
                already_restored: true,
                ..Default::default()
            };
        }

        let snapshot = match self.read_snapshot().await {
            RestoreOutcome::Restored(snapshot) => snapshot,
            RestoreOutcome::Empty => return RestoreReport::default(),
            RestoreOutcome::Rejected(rejection) => {
                self.discard(&rejection).await;
                return RestoreReport {
                    rejected: Some(rejection),
                    ..Default::default()
                };
            }
            RestoreOutcome::Unavailable(e) => {
                tracing::warn!(storage_key = %self.config.storage_key, error = %e, "Snapshot read failed");
                return RestoreReport::default();
            }
        };

        let at = now();
        let (entries, mutations) = snapshot.into_parts();
        let entries = runtime.hydrate(entries.into_iter().filter(|e| !e.is_expired(at)));
        let mutations = runtime.restore_mutations(mutations);
        tracing::info!(entries, mutations, "Snapshot restored");

        let resumed = if mutations > 0 && runtime.is_online() {
            runtime.resume_paused_mutations().await
        } else {
            ResumeSummary::default()
        };

        RestoreReport {
            entries,
            mutations,
            resumed,
            rejected: None,
            already_restored: false,
        }
    }
}
