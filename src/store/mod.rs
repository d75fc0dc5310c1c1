//! Metadata storage for grist.
//!
//! The [`MetadataStore`] trait defines the durable mapping from
//! documents to processing state, chunk records, and indexed vectors,
//! enabling pluggable backends. Implementations must be `Send + Sync`
//! and must make [`MetadataStore::replace_chunks`] atomic: a reader
//! never observes a document with both its old and new chunk sets
//! present.
//!
//! | Backend | Module | Use |
//! |---------|--------|-----|
//! | SQLite (sqlx, WAL) | [`sqlite`] | durable deployments |
//! | In-memory maps | [`memory`] | tests, embedded use |

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::chunker::ChunkParams;
use crate::error::Result;
use crate::index::IndexEntry;
use crate::models::{Chunk, DocState, Document, Project};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Abstract metadata backend.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Create the project if it does not exist yet.
    async fn ensure_project(&self, project_id: &str) -> Result<Project>;

    /// Insert a freshly uploaded document record.
    async fn create_document(&self, doc: &Document) -> Result<()>;

    /// Fetch one document within a project.
    async fn get_document(&self, project_id: &str, document_id: &str) -> Result<Option<Document>>;

    /// List all documents of a project, newest first.
    async fn list_documents(&self, project_id: &str) -> Result<Vec<Document>>;

    /// Transition a document's processing state, retaining failure
    /// detail when `error` is set.
    async fn set_document_state(
        &self,
        document_id: &str,
        state: DocState,
        error: Option<&str>,
    ) -> Result<()>;

    /// Atomically replace a document's chunk set and mark it processed.
    ///
    /// Deletes prior chunks, inserts the new ones with their vectors,
    /// and records the chunk parameters and count on the document — all
    /// in one transition. `vectors` must be parallel to `chunks`.
    async fn replace_chunks(
        &self,
        document_id: &str,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
        params: ChunkParams,
    ) -> Result<()>;

    /// All chunks of a document, ordered by chunk index.
    async fn get_chunks(&self, document_id: &str) -> Result<Vec<Chunk>>;

    /// Hydrate chunk records by id (retrieval citation path).
    async fn get_chunks_by_ids(&self, chunk_ids: &[String]) -> Result<Vec<Chunk>>;

    /// All indexed vectors as index entries, for rehydrating the
    /// in-process vector index at startup.
    async fn load_index_entries(&self) -> Result<Vec<IndexEntry>>;
}
