//! Storage abstraction for custody records and the contact list.
//!
//! This module defines the `SecretStore` trait (get/set/delete by key, with
//! per-key atomicity and nothing more) and two backends: an in-memory map
//! for tests and a directory of files for real installs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

// ============================================================================
// Record keys
// ============================================================================

pub const KEY_IDENTITY_PUBLIC: &str = "identity.public";
pub const KEY_IDENTITY_PRIVATE: &str = "identity.private";
pub const KEY_CONTACTS: &str = "contacts";
pub const KEY_DEVICE_KEK: &str = "device.kek";

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during store operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("invalid record key: {0}")]
    InvalidKey(String),

    #[error("storage operation failed: {0}")]
    Io(String),

    #[error("data corruption detected in {key}: {reason}")]
    DataCorruption { key: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

// ============================================================================
// Store Trait
// ============================================================================

/// Persisted key-value storage.
///
/// Implementations guarantee that a single `set` either fully replaces the
/// value or leaves the previous one in place. No transactions across keys.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Read a record. `Ok(None)` if it does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Create or replace a record.
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Remove a record. Succeeds if it did not exist.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

#[async_trait]
impl<S: SecretStore + ?Sized> SecretStore for Arc<S> {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        (**self).set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        (**self).delete(key).await
    }
}

/// Read and parse a JSON record.
pub async fn load_json<T, S>(store: &S, key: &str) -> Result<Option<T>, StoreError>
where
    T: DeserializeOwned,
    S: SecretStore + ?Sized,
{
    match store.get(key).await? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::DataCorruption {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        None => Ok(None),
    }
}

/// Serialize and write a JSON record.
pub async fn save_json<T, S>(store: &S, key: &str, value: &T) -> Result<(), StoreError>
where
    T: Serialize + ?Sized,
    S: SecretStore + ?Sized,
{
    let bytes = serde_json::to_vec(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
    store.set(key, &bytes).await
}

fn check_key(key: &str) -> Result<(), StoreError> {
    let ok = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

// ============================================================================
// In-Memory Store Implementation
// ============================================================================

/// In-memory store for testing and ephemeral use.
#[derive(Default)]
pub struct InMemoryStore {
    records: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new in-memory store wrapped in an Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl SecretStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        check_key(key)?;
        let records = self.records.read().await;
        Ok(records.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        check_key(key)?;
        let mut records = self.records.write().await;
        records.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        check_key(key)?;
        let mut records = self.records.write().await;
        records.remove(key);
        Ok(())
    }
}

// ============================================================================
// File Store Implementation
// ============================================================================

/// One file per record in a directory.
///
/// Writes go to a temp file that is fsynced and renamed over the target, so
/// a crash leaves either the old or the new record. Files are 0600 on Unix.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Default data directory for this platform.
    pub fn default_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "inkseal", "inkseal")
            .map(|dirs| dirs.data_dir().to_path_buf())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        check_key(key)?;
        Ok(self.dir.join(key))
    }
}

#[async_trait]
impl SecretStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let mut suffix = [0u8; 6];
        getrandom::getrandom(&mut suffix).map_err(|e| StoreError::Io(e.to_string()))?;
        let temp_path = self.dir.join(format!(".{key}.{}.tmp", hex::encode(suffix)));

        let mut file = tokio::fs::File::create(&temp_path).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600)).await?;
        }
        file.write_all(value).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Rec {
        name: String,
        n: u32,
    }

    async fn exercise(store: &dyn SecretStore) {
        assert_eq!(store.get("a").await.unwrap(), None);
        store.set("a", b"one").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(b"one".to_vec()));
        store.set("a", b"two").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(b"two".to_vec()));
        store.delete("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
        // deleting a missing key is fine
        store.delete("a").await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_store_basic() {
        exercise(&InMemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_file_store_basic() {
        let dir = TempDir::new().unwrap();
        exercise(&FileStore::new(dir.path())).await;
    }

    #[tokio::test]
    async fn test_file_store_creates_dir_and_persists() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("nested").join("data");
        FileStore::new(&nested).set(KEY_CONTACTS, b"[]").await.unwrap();

        let reopened = FileStore::new(&nested);
        assert_eq!(reopened.get(KEY_CONTACTS).await.unwrap(), Some(b"[]".to_vec()));

        // no temp files left behind
        let names: Vec<_> = std::fs::read_dir(&nested)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec![KEY_CONTACTS.to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_store_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        store.set(KEY_IDENTITY_PRIVATE, b"{}").await.unwrap();
        let mode = std::fs::metadata(dir.path().join(KEY_IDENTITY_PRIVATE))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_keys_are_restricted() {
        let store = InMemoryStore::new();
        for bad in ["", "../etc", "a/b", ".hidden", "a b"] {
            assert!(matches!(
                store.set(bad, b"x").await,
                Err(StoreError::InvalidKey(_))
            ));
        }
        let dir = TempDir::new().unwrap();
        assert!(FileStore::new(dir.path()).get("../x").await.is_err());
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let store = InMemoryStore::new();
        let rec = Rec { name: "alice".into(), n: 3 };
        save_json(&store, "rec", &rec).await.unwrap();
        let back: Option<Rec> = load_json(&store, "rec").await.unwrap();
        assert_eq!(back, Some(rec));

        let missing: Option<Rec> = load_json(&store, "nope").await.unwrap();
        assert_eq!(missing, None);

        store.set("bad", b"not json").await.unwrap();
        let res: Result<Option<Rec>, _> = load_json(&store, "bad").await;
        assert!(matches!(res, Err(StoreError::DataCorruption { .. })));
    }

    #[tokio::test]
    async fn test_shared_store_through_arc() {
        let store = InMemoryStore::new_shared();
        let handle: Arc<dyn SecretStore> = store.clone();
        handle.set("k", b"v").await.unwrap();
        assert_eq!(store.len().await, 1);
        assert!(!store.is_empty().await);
    }
}
