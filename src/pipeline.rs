//! Ingestion and query orchestration.
//!
//! [`Pipeline::process`] drives the ingestion path — blob read → loader
//! → chunker → embedding gateway → atomic store/index commit — and owns
//! the document state machine (`Uploaded → Processing → Processed |
//! Failed`). [`Pipeline::answer`] drives the query path — retriever →
//! answer composer.
//!
//! Loading and chunking are synchronous CPU work and run on the
//! blocking worker pool; embedding, generation, and store I/O are the
//! suspension points. Ingestion of one document is mutually exclusive
//! via a keyed lock registry: a second concurrent `process` for the
//! same `(project_id, file_id)` is rejected with
//! [`Error::ConcurrentProcessing`]. All ingestion side effects are
//! staged and committed at the end (one store transaction, then one
//! atomic index replace), so a cancelled request never leaves a
//! half-applied chunk set.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use uuid::Uuid;

use crate::blob::BlobStore;
use crate::chunker::{chunk_segments, ChunkParams};
use crate::composer::{Answer, AnswerComposer, GenerationBackend};
use crate::config::Config;
use crate::embedding::{EmbeddingBackend, EmbeddingGateway};
use crate::error::{Error, Result};
use crate::index::{IndexEntry, VectorIndex};
use crate::loader::LoaderRegistry;
use crate::models::{content_hash, Chunk, DocState, Document};
use crate::retriever::{LexicalReranker, Reranker, Retriever};
use crate::store::MetadataStore;

/// Result of a `process` call.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub chunk_count: usize,
    pub state: DocState,
    /// Segments skipped during loading (empty or malformed), reported
    /// as a partial-success summary.
    pub segments_skipped: usize,
}

pub struct Pipeline {
    store: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    index: Arc<VectorIndex>,
    gateway: Arc<EmbeddingGateway>,
    retriever: Retriever,
    composer: AnswerComposer,
    registry: Arc<LoaderRegistry>,
    locks: Mutex<HashMap<(String, String), Arc<tokio::sync::Mutex<()>>>>,
    token_budget: usize,
}

impl Pipeline {
    /// Wire up the pipeline from configuration and injected backends.
    ///
    /// Configuration inconsistencies (model mismatch, zero batch size)
    /// fail here, at startup, not at query time.
    pub fn new(
        config: &Config,
        store: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        embedding_backend: Box<dyn EmbeddingBackend>,
        generation_backend: Box<dyn GenerationBackend>,
    ) -> Result<Self> {
        let gateway = Arc::new(EmbeddingGateway::new(embedding_backend, &config.embedding)?);
        let index = Arc::new(VectorIndex::new());

        let reranker: Option<Arc<dyn Reranker>> = if config.retrieval.rerank {
            Some(Arc::new(LexicalReranker))
        } else {
            None
        };
        let retriever = Retriever::new(
            gateway.clone(),
            index.clone(),
            store.clone(),
            reranker,
            config.retrieval.overfetch_factor,
        );
        let composer = AnswerComposer::new(generation_backend, &config.generation);

        Ok(Self {
            store,
            blobs,
            index,
            gateway,
            retriever,
            composer,
            registry: Arc::new(LoaderRegistry::with_defaults()),
            locks: Mutex::new(HashMap::new()),
            token_budget: config.generation.token_budget,
        })
    }

    /// Rebuild the in-process vector index from the metadata store.
    pub async fn rehydrate(&self) -> Result<usize> {
        let entries = self.store.load_index_entries().await?;
        let count = entries.len();
        self.index.upsert(entries);
        tracing::info!(entries = count, "vector index rehydrated");
        Ok(count)
    }

    /// Store an uploaded file and create its document record.
    ///
    /// The project is created on first upload under its id.
    pub async fn upload(
        &self,
        project_id: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Result<Document> {
        self.store.ensure_project(project_id).await?;

        let now = Utc::now();
        let doc = Document {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            filename: filename.to_string(),
            content_hash: content_hash(bytes),
            state: DocState::Uploaded,
            error: None,
            chunk_size: None,
            overlap_size: None,
            chunk_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.blobs.write(&doc.id, bytes).await?;
        self.store.create_document(&doc).await?;
        Ok(doc)
    }

    /// Process an uploaded document into indexed chunks.
    ///
    /// Inputs are validated before any side effect. Reprocessing a
    /// `Processed` document is a no-op unless `reset` is set, in which
    /// case the prior chunk set and index entries are discarded
    /// atomically — a concurrent reader sees the old complete set or
    /// the new complete set, never a mix.
    pub async fn process(
        &self,
        project_id: &str,
        file_id: &str,
        chunk_size: usize,
        overlap_size: usize,
        reset: bool,
    ) -> Result<ProcessOutcome> {
        let params = ChunkParams::new(chunk_size, overlap_size)?;

        let _guard = self.try_lock_document(project_id, file_id)?;

        let doc = self
            .store
            .get_document(project_id, file_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("document {}", file_id)))?;

        if !reset
            && doc.state == DocState::Processed
            && doc.chunk_size == Some(params.chunk_size)
            && doc.overlap_size == Some(params.overlap_size)
        {
            return Ok(ProcessOutcome {
                chunk_count: doc.chunk_count,
                state: DocState::Processed,
                segments_skipped: 0,
            });
        }

        self.store
            .set_document_state(file_id, DocState::Processing, None)
            .await?;

        match self.run_ingestion(&doc, params).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                let detail = e.to_string();
                self.store
                    .set_document_state(file_id, DocState::Failed, Some(&detail))
                    .await?;
                tracing::warn!(document = file_id, error = %detail, "processing failed");
                Err(e)
            }
        }
    }

    async fn run_ingestion(&self, doc: &Document, params: ChunkParams) -> Result<ProcessOutcome> {
        let bytes = self.blobs.read(&doc.id).await?;
        let extension = extension_of(&doc.filename)?;

        // Loading and chunking are CPU-bound; keep them off the I/O
        // executor.
        let registry = self.registry.clone();
        let filename = doc.filename.clone();
        let doc_id = doc.id.clone();
        let (outcome, mut chunks) = tokio::task::spawn_blocking(move || {
            let outcome = registry.load(&extension, &bytes, &filename)?;
            let chunks = chunk_segments(&doc_id, &outcome.segments, params)?;
            Ok::<_, Error>((outcome, chunks))
        })
        .await
        .map_err(|e| Error::Storage(format!("ingestion task failed: {}", e)))??;

        if chunks.is_empty() {
            self.store
                .set_document_state(&doc.id, DocState::Failed, Some("no content"))
                .await?;
            tracing::info!(document = %doc.id, "document has no content");
            return Ok(ProcessOutcome {
                chunk_count: 0,
                state: DocState::Failed,
                segments_skipped: outcome.skipped,
            });
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.gateway.embed_all(&texts).await?;
        let model_tag = self.gateway.model_tag().to_string();
        for chunk in &mut chunks {
            chunk.model = Some(model_tag.clone());
        }

        // Commit point: one store transaction, then one atomic index
        // swap. Everything before this is staged in memory only.
        self.store
            .replace_chunks(&doc.id, &chunks, &vectors, params)
            .await?;
        self.index
            .replace_document(&doc.id, index_entries(doc, &chunks, &vectors));

        tracing::info!(
            document = %doc.id,
            chunks = chunks.len(),
            skipped = outcome.skipped,
            "document processed"
        );

        Ok(ProcessOutcome {
            chunk_count: chunks.len(),
            state: DocState::Processed,
            segments_skipped: outcome.skipped,
        })
    }

    /// Answer a question from a project's indexed documents.
    ///
    /// Returns [`Error::EmptyContext`] when retrieval produced zero
    /// usable chunks — a normal "no relevant information" outcome
    /// raised before any generation call.
    pub async fn answer(
        &self,
        project_id: &str,
        question: &str,
        k: usize,
        min_score: f32,
    ) -> Result<Answer> {
        let hits = self
            .retriever
            .retrieve(question, project_id, k, min_score)
            .await?;
        self.composer
            .compose(question, &hits, self.token_budget)
            .await
    }

    /// Inspect a document's state, retained error, and chunk counts.
    pub async fn status(&self, project_id: &str, file_id: &str) -> Result<Document> {
        self.store
            .get_document(project_id, file_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("document {}", file_id)))
    }

    /// List a project's documents, newest first.
    pub async fn list_documents(&self, project_id: &str) -> Result<Vec<Document>> {
        self.store.list_documents(project_id).await
    }

    /// Number of entries currently in the vector index.
    pub fn indexed_entries(&self) -> usize {
        self.index.len()
    }

    fn try_lock_document(
        &self,
        project_id: &str,
        file_id: &str,
    ) -> Result<tokio::sync::OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self.locks.lock().unwrap();
            locks
                .entry((project_id.to_string(), file_id.to_string()))
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.try_lock_owned()
            .map_err(|_| Error::ConcurrentProcessing(file_id.to_string()))
    }
}

fn extension_of(filename: &str) -> Result<String> {
    std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_string())
        .ok_or_else(|| Error::UnsupportedFormat(String::new()))
}

fn index_entries(doc: &Document, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Vec<IndexEntry> {
    chunks
        .iter()
        .zip(vectors.iter())
        .map(|(c, v)| IndexEntry {
            chunk_id: c.id.clone(),
            document_id: doc.id.clone(),
            project_id: doc.project_id.clone(),
            chunk_index: c.chunk_index,
            vector: v.clone(),
        })
        .collect()
}
