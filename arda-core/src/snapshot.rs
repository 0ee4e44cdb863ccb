//! Persisted snapshot document.
//!
//! The durable record is a single JSON document:
//! `{ "version": "...", "savedAt": 1700000000000, "entries": { "<keyHash>": CacheEntry } }`
//! with an optional `mutations` array holding paused writes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::entry::{CacheEntry, QueryStatus};
use crate::error::SnapshotRejection;
use crate::key::QueryKey;
use crate::{age_at, Timestamp};

/// Identifier of a submitted mutation (UUIDv7, sortable by submission time).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MutationId(Uuid);

impl MutationId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MutationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A paused write carried across restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedMutation {
    pub id: MutationId,
    pub mutation_key: QueryKey,
    pub variables: Value,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub submitted_at: Timestamp,
    #[serde(default)]
    pub failure_count: u32,
}

/// Durable copy of the query cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSnapshot {
    pub version: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub saved_at: Timestamp,
    #[serde(default)]
    pub entries: BTreeMap<String, CacheEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mutations: Vec<PersistedMutation>,
}

impl PersistedSnapshot {
    pub fn new(version: impl Into<String>, saved_at: Timestamp) -> Self {
        Self {
            version: version.into(),
            saved_at,
            entries: BTreeMap::new(),
            mutations: Vec::new(),
        }
    }

    /// Build a snapshot keeping only successful entries.
    pub fn from_entries<I>(version: impl Into<String>, saved_at: Timestamp, entries: I) -> Self
    where
        I: IntoIterator<Item = CacheEntry>,
    {
        let mut snapshot = Self::new(version, saved_at);
        for entry in entries {
            snapshot.insert(entry);
        }
        snapshot
    }

    /// Add an entry; anything not in `Success` status is ignored.
    pub fn insert(&mut self, entry: CacheEntry) -> bool {
        if entry.status != QueryStatus::Success {
            return false;
        }
        self.entries.insert(entry.key.hash_key(), entry);
        true
    }

    pub fn with_mutations(mut self, mutations: Vec<PersistedMutation>) -> Self {
        self.mutations = mutations;
        self
    }

    pub fn get(&self, key: &QueryKey) -> Option<&CacheEntry> {
        self.entries.get(&key.hash_key())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.mutations.is_empty()
    }

    /// Check the snapshot against the running build's buster and the age limit.
    pub fn validate(
        &self,
        buster: &str,
        max_age: Duration,
        now: Timestamp,
    ) -> Result<(), SnapshotRejection> {
        if self.version != buster {
            return Err(SnapshotRejection::VersionMismatch {
                expected: buster.to_string(),
                found: self.version.clone(),
            });
        }
        let age = age_at(self.saved_at, now);
        if age > max_age {
            return Err(SnapshotRejection::Expired {
                age_ms: u64::try_from(age.as_millis()).unwrap_or(u64::MAX),
                max_age_ms: u64::try_from(max_age.as_millis()).unwrap_or(u64::MAX),
            });
        }
        Ok(())
    }

    /// Consume the snapshot into its successful entries and paused mutations.
    pub fn into_parts(self) -> (Vec<CacheEntry>, Vec<PersistedMutation>) {
        let entries = self
            .entries
            .into_values()
            .filter(|e| e.status == QueryStatus::Success)
            .collect();
        (entries, self.mutations)
    }
}
