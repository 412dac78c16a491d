//! Storage backend abstraction for acquired data objects. The default
//! implementation is a flat filesystem tree rooted at a configured data
//! directory; callers address objects by their data key, which may
//! contain `/` separators that become subdirectories.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::AgentError;

#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), AgentError>;
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AgentError>;
    async fn delete(&self, key: &str) -> Result<(), AgentError>;
    async fn exists(&self, key: &str) -> bool;
}

pub struct FilesystemStorage {
    root: PathBuf,
}

impl FilesystemStorage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, AgentError> {
        let candidate = self.root.join(key);
        // Reject keys that escape the storage root via `..` segments.
        if key.split('/').any(|segment| segment == "..") {
            return Err(AgentError::Validation(format!("data key escapes storage root: {key}")));
        }
        Ok(candidate)
    }
}

#[async_trait]
impl StorageBackend for FilesystemStorage {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), AgentError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(&path).await?;
        file.write_all(bytes).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AgentError> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), AgentError> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> bool {
        match self.resolve(key) {
            Ok(path) => Path::new(&path).exists(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FilesystemStorage::new(dir.path().to_path_buf());
        storage.put("a/b/c.bin", b"payload").await.unwrap();
        assert_eq!(storage.get("a/b/c.bin").await.unwrap(), Some(b"payload".to_vec()));
    }

    #[tokio::test]
    async fn missing_key_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FilesystemStorage::new(dir.path().to_path_buf());
        assert_eq!(storage.get("nothing-here").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FilesystemStorage::new(dir.path().to_path_buf());
        storage.put("k", b"v").await.unwrap();
        storage.delete("k").await.unwrap();
        storage.delete("k").await.unwrap();
        assert!(!storage.exists("k").await);
    }

    #[tokio::test]
    async fn path_traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FilesystemStorage::new(dir.path().to_path_buf());
        assert!(storage.put("../escape.bin", b"x").await.is_err());
    }
}
