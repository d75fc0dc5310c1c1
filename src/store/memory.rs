//! In-memory [`MetadataStore`] implementation for tests and embedded
//! use.
//!
//! Uses `HashMap`s behind `std::sync::RwLock`. `replace_chunks` holds
//! the chunk-map write lock for the whole swap, giving the same
//! old-set-or-new-set visibility as the SQLite transaction.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use crate::chunker::ChunkParams;
use crate::error::{Error, Result};
use crate::index::IndexEntry;
use crate::models::{Chunk, DocState, Document, Project};

use super::MetadataStore;

struct StoredChunk {
    chunk: Chunk,
    vector: Vec<f32>,
}

/// In-memory store.
pub struct MemoryStore {
    projects: RwLock<HashMap<String, Project>>,
    documents: RwLock<HashMap<String, Document>>,
    /// document_id → chunks with vectors, in index order.
    chunks: RwLock<HashMap<String, Vec<StoredChunk>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            projects: RwLock::new(HashMap::new()),
            documents: RwLock::new(HashMap::new()),
            chunks: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn ensure_project(&self, project_id: &str) -> Result<Project> {
        let mut projects = self.projects.write().unwrap();
        let project = projects
            .entry(project_id.to_string())
            .or_insert_with(|| Project {
                id: project_id.to_string(),
                created_at: Utc::now(),
            });
        Ok(project.clone())
    }

    async fn create_document(&self, doc: &Document) -> Result<()> {
        let mut docs = self.documents.write().unwrap();
        docs.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn get_document(&self, project_id: &str, document_id: &str) -> Result<Option<Document>> {
        let docs = self.documents.read().unwrap();
        Ok(docs
            .get(document_id)
            .filter(|d| d.project_id == project_id)
            .cloned())
    }

    async fn list_documents(&self, project_id: &str) -> Result<Vec<Document>> {
        let docs = self.documents.read().unwrap();
        let mut result: Vec<Document> = docs
            .values()
            .filter(|d| d.project_id == project_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(result)
    }

    async fn set_document_state(
        &self,
        document_id: &str,
        state: DocState,
        error: Option<&str>,
    ) -> Result<()> {
        let mut docs = self.documents.write().unwrap();
        let doc = docs
            .get_mut(document_id)
            .ok_or_else(|| Error::NotFound(format!("document {}", document_id)))?;
        doc.state = state;
        doc.error = error.map(|s| s.to_string());
        doc.updated_at = Utc::now();
        Ok(())
    }

    async fn replace_chunks(
        &self,
        document_id: &str,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
        params: ChunkParams,
    ) -> Result<()> {
        if chunks.len() != vectors.len() {
            return Err(Error::Storage(format!(
                "{} chunks but {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }

        let stored: Vec<StoredChunk> = chunks
            .iter()
            .zip(vectors.iter())
            .map(|(c, v)| StoredChunk {
                chunk: c.clone(),
                vector: v.clone(),
            })
            .collect();

        {
            let mut map = self.chunks.write().unwrap();
            map.insert(document_id.to_string(), stored);
        }

        let mut docs = self.documents.write().unwrap();
        let doc = docs
            .get_mut(document_id)
            .ok_or_else(|| Error::NotFound(format!("document {}", document_id)))?;
        doc.state = DocState::Processed;
        doc.error = None;
        doc.chunk_size = Some(params.chunk_size);
        doc.overlap_size = Some(params.overlap_size);
        doc.chunk_count = chunks.len();
        doc.updated_at = Utc::now();
        Ok(())
    }

    async fn get_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let map = self.chunks.read().unwrap();
        Ok(map
            .get(document_id)
            .map(|stored| stored.iter().map(|s| s.chunk.clone()).collect())
            .unwrap_or_default())
    }

    async fn get_chunks_by_ids(&self, chunk_ids: &[String]) -> Result<Vec<Chunk>> {
        let map = self.chunks.read().unwrap();
        let mut result = Vec::with_capacity(chunk_ids.len());
        for stored in map.values() {
            for s in stored {
                if chunk_ids.iter().any(|id| *id == s.chunk.id) {
                    result.push(s.chunk.clone());
                }
            }
        }
        Ok(result)
    }

    async fn load_index_entries(&self) -> Result<Vec<IndexEntry>> {
        let docs = self.documents.read().unwrap();
        let map = self.chunks.read().unwrap();
        let mut entries = Vec::new();
        for (doc_id, stored) in map.iter() {
            let Some(doc) = docs.get(doc_id) else {
                continue;
            };
            for s in stored {
                entries.push(IndexEntry {
                    chunk_id: s.chunk.id.clone(),
                    document_id: doc_id.clone(),
                    project_id: doc.project_id.clone(),
                    chunk_index: s.chunk.chunk_index,
                    vector: s.vector.clone(),
                });
            }
        }
        Ok(entries)
    }
}
