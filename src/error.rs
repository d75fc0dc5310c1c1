//! Error taxonomy for the grist pipeline.
//!
//! Caller-input errors ([`Error::UnsupportedFormat`], [`Error::Load`],
//! [`Error::InvalidChunkConfig`]) are reported immediately and never
//! retried. Backend errors ([`Error::EmbeddingBackend`],
//! [`Error::GenerationBackend`]) are transient: the gateway retries them
//! with bounded, jittered exponential backoff before surfacing them.
//! [`Error::EmptyContext`] is a normal "no answer" outcome, not a fault.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// All failure modes surfaced by the grist pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// The file extension has no registered loader variant.
    #[error("unsupported format: .{0}")]
    UnsupportedFormat(String),

    /// The stored file is unreadable or corrupt.
    #[error("failed to load document: {0}")]
    Load(String),

    /// `chunk_size` / `overlap_size` violate the chunker contract.
    #[error("invalid chunk config: {0}")]
    InvalidChunkConfig(String),

    /// The embedding provider failed after all retries.
    #[error("embedding backend: {0}")]
    EmbeddingBackend(String),

    /// The generation provider failed after all retries.
    #[error("generation backend: {0}")]
    GenerationBackend(String),

    /// Another request is already processing this document.
    #[error("document {0} is already being processed")]
    ConcurrentProcessing(String),

    /// Retrieval produced zero usable chunks for the question.
    #[error("no usable context retrieved for the question")]
    EmptyContext,

    /// Invalid or inconsistent configuration, detected at startup.
    #[error("configuration: {0}")]
    Config(String),

    /// Metadata or blob storage failure.
    #[error("storage: {0}")]
    Storage(String),

    /// A referenced project or document does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(e.to_string())
    }
}
