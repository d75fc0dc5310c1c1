//! Blob storage for raw uploaded files.
//!
//! The core addresses file content by document id only; the storage
//! path is opaque and never surfaced as a filename. [`FsBlobStore`]
//! keeps one file per id under a root directory; [`MemoryBlobStore`]
//! backs tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Narrow blob storage contract: read and write by document id.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn read(&self, document_id: &str) -> Result<Vec<u8>>;
    /// Stores the bytes and returns the opaque storage path.
    async fn write(&self, document_id: &str, bytes: &[u8]) -> Result<String>;
}

/// One file per document id under `root`.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, document_id: &str) -> Result<PathBuf> {
        // Ids are UUIDs; reject anything that could traverse out of root.
        if document_id.is_empty()
            || document_id
                .chars()
                .any(|c| !c.is_ascii_alphanumeric() && c != '-')
        {
            return Err(Error::Storage(format!(
                "invalid document id: {}",
                document_id
            )));
        }
        Ok(self.root.join(document_id))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn read(&self, document_id: &str) -> Result<Vec<u8>> {
        let path = self.path_for(document_id)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| Error::Storage(format!("blob read {}: {}", document_id, e)))
    }

    async fn write(&self, document_id: &str, bytes: &[u8]) -> Result<String> {
        let path = self.path_for(document_id)?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| Error::Storage(format!("blob write {}: {}", document_id, e)))?;
        Ok(path.display().to_string())
    }
}

/// In-memory blob store for tests.
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn read(&self, document_id: &str) -> Result<Vec<u8>> {
        self.blobs
            .read()
            .unwrap()
            .get(document_id)
            .cloned()
            .ok_or_else(|| Error::Storage(format!("no blob for {}", document_id)))
    }

    async fn write(&self, document_id: &str, bytes: &[u8]) -> Result<String> {
        self.blobs
            .write()
            .unwrap()
            .insert(document_id.to_string(), bytes.to_vec());
        Ok(format!("memory://{}", document_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fs_blob_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(tmp.path().join("blobs")).unwrap();

        let path = store.write("doc-1", b"payload").await.unwrap();
        assert!(path.contains("doc-1"));
        assert_eq!(store.read("doc-1").await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn traversal_ids_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(tmp.path().join("blobs")).unwrap();
        assert!(store.read("../etc/passwd").await.is_err());
    }

    #[tokio::test]
    async fn missing_blob_is_a_storage_error() {
        let store = MemoryBlobStore::new();
        assert!(matches!(
            store.read("nope").await.unwrap_err(),
            Error::Storage(_)
        ));
    }
}
