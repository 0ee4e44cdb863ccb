//! LMDB-backed storage medium.
//!
//! Uses the heed crate (Rust bindings for LMDB). All snapshots live in the
//! single unnamed database of the environment, keyed by storage key.

use std::path::Path;

use arda_core::PersistenceError;
use async_trait::async_trait;
use heed::types::Str;
use heed::{Database, Env, EnvOpenOptions, MdbError};

use super::medium::StorageMedium;

/// Default LMDB map size.
pub const DEFAULT_MAP_SIZE_MB: usize = 16;

fn backend_error(e: heed::Error) -> PersistenceError {
    PersistenceError::Backend {
        reason: e.to_string(),
    }
}

pub struct LmdbMedium {
    env: Env,
    db: Database<Str, Str>,
}

impl LmdbMedium {
    /// Open (or create) an environment under `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the
    /// environment or database cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, PersistenceError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(backend_error)?;

        let mut wtxn = env.write_txn().map_err(backend_error)?;
        let db: Database<Str, Str> = env.create_database(&mut wtxn, None).map_err(backend_error)?;
        wtxn.commit().map_err(backend_error)?;

        Ok(Self { env, db })
    }
}

impl std::fmt::Debug for LmdbMedium {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbMedium")
            .field("path", &self.env.path())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StorageMedium for LmdbMedium {
    async fn get_item(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let rtxn = self.env.read_txn().map_err(backend_error)?;
        let value = self.db.get(&rtxn, key).map_err(backend_error)?;
        Ok(value.map(str::to_string))
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        let mut wtxn = self.env.write_txn().map_err(backend_error)?;
        match self.db.put(&mut wtxn, key, value) {
            Ok(()) => {}
            Err(heed::Error::Mdb(MdbError::MapFull)) => {
                return Err(PersistenceError::QuotaExceeded { bytes: value.len() });
            }
            Err(e) => return Err(backend_error(e)),
        }
        wtxn.commit().map_err(|e| match e {
            heed::Error::Mdb(MdbError::MapFull) => PersistenceError::QuotaExceeded { bytes: value.len() },
            other => backend_error(other),
        })
    }

    async fn remove_item(&self, key: &str) -> Result<(), PersistenceError> {
        let mut wtxn = self.env.write_txn().map_err(backend_error)?;
        self.db.delete(&mut wtxn, key).map_err(backend_error)?;
        wtxn.commit().map_err(backend_error)
    }
}
