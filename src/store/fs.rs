//! Filesystem-backed blob store.
//!
//! Maps object keys to paths under a root directory. Keys use `/` separators and
//! may not contain `..` segments; the store creates intermediate directories on
//! write.

use crate::store::{BlobStore, StoreError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Blob store persisting objects as files under a data directory.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|err| StoreError::Unavailable(format!("create {}: {err}", root.display())))?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        if key.is_empty() || key.split('/').any(|segment| segment.is_empty() || segment == "..") {
            return Err(StoreError::Unavailable(format!("invalid blob key: {key}")));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(err) => Err(StoreError::Unavailable(format!("read {key}: {err}"))),
        }
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| StoreError::Unavailable(format!("mkdir for {key}: {err}")))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|err| StoreError::Unavailable(format!("write {key}: {err}")))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StoreError::Unavailable(format!("delete {key}: {err}"))),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => {
                    return Err(StoreError::Unavailable(format!(
                        "list {}: {err}",
                        dir.display()
                    )));
                }
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|err| StoreError::Unavailable(format!("list entry: {err}")))?
            {
                let path = entry.path();
                if path.is_dir() {
                    pending.push(path);
                } else if let Some(key) = relative_key(&self.root, &path) {
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut key = String::new();
    for component in relative.components() {
        if !key.is_empty() {
            key.push('/');
        }
        key.push_str(component.as_os_str().to_str()?);
    }
    Some(key)
}
