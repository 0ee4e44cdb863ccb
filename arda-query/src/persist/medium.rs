//! Durable key/value media for snapshots.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use arda_core::PersistenceError;
use async_trait::async_trait;

/// String key/value storage a snapshot is written to.
///
/// Writes replace the whole value for a key.
#[async_trait]
pub trait StorageMedium: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>, PersistenceError>;

    async fn set_item(&self, key: &str, value: &str) -> Result<(), PersistenceError>;

    /// Removing an absent key is not an error.
    async fn remove_item(&self, key: &str) -> Result<(), PersistenceError>;
}

/// Process-local medium, optionally capped at a byte quota per value.
#[derive(Debug, Default)]
pub struct MemoryMedium {
    items: Mutex<HashMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryMedium {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject values larger than `quota_bytes` with `QuotaExceeded`.
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    fn items(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }
}

#[async_trait]
impl StorageMedium for MemoryMedium {
    async fn get_item(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self.items().get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        if let Some(quota) = self.quota_bytes {
            if value.len() > quota {
                return Err(PersistenceError::QuotaExceeded { bytes: value.len() });
            }
        }
        self.items().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), PersistenceError> {
        self.items().remove(key);
        Ok(())
    }
}

/// One JSON file per key under a directory.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// crash mid-write leaves the previous value intact.
#[derive(Debug, Clone)]
pub struct FileMedium {
    dir: PathBuf,
}

impl FileMedium {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", name))
    }
}

#[async_trait]
impl StorageMedium for FileMedium {
    async fn get_item(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), PersistenceError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_medium_quota() {
        let medium = MemoryMedium::with_quota(8);
        medium.set_item("k", "short").await.unwrap();
        let err = medium.set_item("k", "much too long").await.unwrap_err();
        assert_eq!(err, PersistenceError::QuotaExceeded { bytes: 13 });
        assert_eq!(medium.get_item("k").await.unwrap().as_deref(), Some("short"));
    }

    #[tokio::test]
    async fn test_memory_medium_remove_absent() {
        let medium = MemoryMedium::new();
        medium.remove_item("missing").await.unwrap();
        assert!(medium.is_empty());
    }

    #[test]
    fn test_file_names_are_sanitised() {
        let medium = FileMedium::new("/tmp/arda");
        assert_eq!(medium.path_for("arda-menu-cache"), PathBuf::from("/tmp/arda/arda-menu-cache.json"));
        assert_eq!(medium.path_for("../etc"), PathBuf::from("/tmp/arda/___etc.json"));
    }
}
