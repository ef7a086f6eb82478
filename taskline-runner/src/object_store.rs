//! Object storage used by archive and cache steps
//!
//! Steps address objects by key. The storage record a step carries only
//! contributes a key prefix (`bucket/subfolder`); where the bytes live is
//! up to the `ObjectStore` implementation the runner was started with.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use taskline_core::domain::catalog::ObjectStorage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object {0} not found")]
    NotFound(String),

    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("object store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Uploads a local file under `key`, replacing any existing object
    async fn put_file(&self, local: &Path, key: &str) -> Result<(), ObjectStoreError>;

    /// Downloads the object at `key` into `local`, creating parent directories
    async fn get_file(&self, key: &str, local: &Path) -> Result<(), ObjectStoreError>;

    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError>;
}

/// Builds an object key from the storage prefix and path segments
pub fn object_key(storage: Option<&ObjectStorage>, segments: &[&str]) -> String {
    let prefix = storage
        .map(|s| [s.bucket.as_str(), s.subfolder.as_str()])
        .unwrap_or_default();
    prefix
        .iter()
        .chain(segments.iter())
        .map(|part| part.trim_matches('/'))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Stores objects as files below a root directory
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, ObjectStoreError> {
        let relative = Path::new(key.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if key.trim().is_empty() || escapes {
            return Err(ObjectStoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

async fn copy_creating_parent(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(from, to).await.map(|_| ())
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put_file(&self, local: &Path, key: &str) -> Result<(), ObjectStoreError> {
        let target = self.path_for(key)?;
        copy_creating_parent(local, &target).await?;
        Ok(())
    }

    async fn get_file(&self, key: &str, local: &Path) -> Result<(), ObjectStoreError> {
        let source = self.path_for(key)?;
        if !tokio::fs::try_exists(&source).await? {
            return Err(ObjectStoreError::NotFound(key.to_string()));
        }
        copy_creating_parent(&source, local).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::try_exists(path).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_joins_prefix_and_segments() {
        let storage = ObjectStorage {
            id: "s3".to_string(),
            bucket: "ci".to_string(),
            subfolder: "/cache/".to_string(),
            ..Default::default()
        };
        assert_eq!(
            object_key(Some(&storage), &["release/api", "cache.tar.gz"]),
            "ci/cache/release/api/cache.tar.gz"
        );
        assert_eq!(object_key(None, &["", "a.txt"]), "a.txt");
    }

    #[tokio::test]
    async fn test_put_then_get_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().join("objects"));
        let source = dir.path().join("report.txt");
        tokio::fs::write(&source, "ok").await.unwrap();

        store.put_file(&source, "reports/1/report.txt").await.unwrap();
        assert!(store.exists("reports/1/report.txt").await.unwrap());

        let target = dir.path().join("out/nested/report.txt");
        store.get_file("reports/1/report.txt", &target).await.unwrap();
        assert_eq!(tokio::fs::read_to_string(&target).await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_missing_object_and_escaping_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        let err = store
            .get_file("missing.tar.gz", &dir.path().join("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ObjectStoreError::NotFound(_)));

        let err = store.exists("../etc/passwd").await.unwrap_err();
        assert!(matches!(err, ObjectStoreError::InvalidKey(_)));
    }
}
