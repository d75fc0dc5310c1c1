//! Core data models used throughout grist.
//!
//! These types represent the projects, documents, segments, and chunks
//! that flow through the ingestion and retrieval pipeline.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// A logical namespace for one user's document set.
///
/// Created on first upload under the namespace, never implicitly deleted.
#[derive(Debug, Clone)]
pub struct Project {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

/// Processing state of a document.
///
/// `Uploaded → Processing → Processed` on success, or
/// `Uploaded → Processing → Failed` on any loader/chunker/embedding
/// error (with the error detail retained on the document).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocState {
    Uploaded,
    Processing,
    Processed,
    Failed,
}

impl DocState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocState::Uploaded => "uploaded",
            DocState::Processing => "processing",
            DocState::Processed => "processed",
            DocState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uploaded" => Some(DocState::Uploaded),
            "processing" => Some(DocState::Processing),
            "processed" => Some(DocState::Processed),
            "failed" => Some(DocState::Failed),
            _ => None,
        }
    }
}

/// One ingested file.
///
/// `filename` is the original upload name and is never exposed as a
/// storage path; blobs are addressed by `id` through the blob store.
/// `chunk_size` / `overlap_size` record the parameters of the last
/// processing run so re-chunking decisions and idempotent reprocessing
/// can compare against them.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub project_id: String,
    pub filename: String,
    pub content_hash: String,
    pub state: DocState,
    /// Failure detail, retained for inspection when `state == Failed`.
    pub error: Option<String>,
    pub chunk_size: Option<usize>,
    pub overlap_size: Option<usize>,
    pub chunk_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Ephemeral loader output: a run of text with positional metadata.
///
/// Segments exist only during a single processing run and are never
/// persisted.
#[derive(Debug, Clone)]
pub struct Segment {
    pub text: String,
    /// 1-based page number for paginated formats.
    pub page: Option<u32>,
    pub source_name: String,
}

/// The atomic retrievable unit.
///
/// `chunk_index` is 1-based and contiguous per document across all
/// segments for a given processing run. `hash` is the SHA-256 of the
/// chunk text. `model` is the embedding model version tag, attached
/// when the chunk is indexed.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub char_len: usize,
    pub page: Option<u32>,
    pub source_name: String,
    pub hash: String,
    pub model: Option<String>,
}

/// A ranked retrieval hit: chunk reference plus similarity score.
///
/// Ephemeral, produced per query, never persisted. `rerank_score` is
/// populated only when a reranker ran over the candidate set.
#[derive(Debug, Clone)]
pub struct RetrievalHit {
    pub chunk: Chunk,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f32,
    pub rerank_score: Option<f32>,
}

/// SHA-256 of a byte slice, hex-encoded.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
