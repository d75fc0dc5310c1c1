//! Similarity-ranked retrieval with optional second-pass reranking.
//!
//! The retriever embeds the query through the same gateway that embeds
//! chunks, searches the vector index scoped to the project, hydrates
//! chunk records from the metadata store (so every hit is traceable to
//! its citation), optionally reranks the over-fetched candidate set,
//! drops hits below `min_score`, and truncates to `k`.
//!
//! `min_score` always thresholds the primary cosine score; a reranker
//! only reorders. Fewer than `k` survivors are returned as-is — the
//! retriever never pads with low-relevance results, and an empty result
//! is valid, distinct from failure.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::embedding::EmbeddingGateway;
use crate::error::{Error, Result};
use crate::index::{SearchFilter, VectorIndex};
use crate::models::RetrievalHit;
use crate::store::MetadataStore;

/// Second-pass relevance scoring over an initial candidate set.
///
/// Typically a more expensive, more accurate model than the embedding
/// similarity. Returns one score per hit, same order.
#[async_trait]
pub trait Reranker: Send + Sync {
    fn name(&self) -> &str;
    async fn rescore(&self, query: &str, hits: &[RetrievalHit]) -> Result<Vec<f32>>;
}

/// Query-term overlap reranker.
///
/// Scores each hit by the fraction of distinct query terms present in
/// the chunk text. Cheap, deterministic, and useful as a lexical
/// tie-breaker on top of embedding similarity.
pub struct LexicalReranker;

#[async_trait]
impl Reranker for LexicalReranker {
    fn name(&self) -> &str {
        "lexical"
    }

    async fn rescore(&self, query: &str, hits: &[RetrievalHit]) -> Result<Vec<f32>> {
        let query_lower = query.to_lowercase();
        let terms: Vec<&str> = query_lower.split_whitespace().collect();
        if terms.is_empty() {
            return Ok(vec![0.0; hits.len()]);
        }

        Ok(hits
            .iter()
            .map(|hit| {
                let text_lower = hit.chunk.text.to_lowercase();
                let matched = terms.iter().filter(|t| text_lower.contains(*t)).count();
                matched as f32 / terms.len() as f32
            })
            .collect())
    }
}

pub struct Retriever {
    gateway: Arc<EmbeddingGateway>,
    index: Arc<VectorIndex>,
    store: Arc<dyn MetadataStore>,
    reranker: Option<Arc<dyn Reranker>>,
    overfetch_factor: usize,
}

impl Retriever {
    pub fn new(
        gateway: Arc<EmbeddingGateway>,
        index: Arc<VectorIndex>,
        store: Arc<dyn MetadataStore>,
        reranker: Option<Arc<dyn Reranker>>,
        overfetch_factor: usize,
    ) -> Self {
        Self {
            gateway,
            index,
            store,
            reranker,
            overfetch_factor: overfetch_factor.max(1),
        }
    }

    /// Retrieve the top-`k` chunks for a question within a project.
    pub async fn retrieve(
        &self,
        question: &str,
        project_id: &str,
        k: usize,
        min_score: f32,
    ) -> Result<Vec<RetrievalHit>> {
        if k == 0 {
            return Err(Error::Config("k must be > 0".into()));
        }
        if !(-1.0..=1.0).contains(&min_score) {
            return Err(Error::Config(
                "min_score must be in [-1.0, 1.0] (cosine similarity)".into(),
            ));
        }

        let query_vec = self.gateway.embed_query(question).await?;

        let fetch = if self.reranker.is_some() {
            k.saturating_mul(self.overfetch_factor)
        } else {
            k
        };
        let scored = self
            .index
            .search(&query_vec, fetch, &SearchFilter::project(project_id));
        if scored.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = scored.iter().map(|s| s.chunk_id.clone()).collect();
        let chunks = self.store.get_chunks_by_ids(&ids).await?;
        let by_id: HashMap<&str, _> = chunks.iter().map(|c| (c.id.as_str(), c)).collect();

        // A chunk can vanish between search and hydration (concurrent
        // delete); such hits are dropped rather than cited blind.
        let mut hits: Vec<RetrievalHit> = scored
            .iter()
            .filter_map(|s| {
                by_id.get(s.chunk_id.as_str()).map(|chunk| RetrievalHit {
                    chunk: (*chunk).clone(),
                    score: s.score,
                    rerank_score: None,
                })
            })
            .collect();

        if let Some(reranker) = &self.reranker {
            match reranker.rescore(question, &hits).await {
                Ok(scores) if scores.len() == hits.len() => {
                    for (hit, score) in hits.iter_mut().zip(scores) {
                        hit.rerank_score = Some(score);
                    }
                    hits.sort_by(|a, b| {
                        b.rerank_score
                            .partial_cmp(&a.rerank_score)
                            .unwrap_or(std::cmp::Ordering::Equal)
                            .then(a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
                            .then(a.chunk.id.cmp(&b.chunk.id))
                    });
                }
                Ok(scores) => {
                    tracing::warn!(
                        reranker = reranker.name(),
                        expected = hits.len(),
                        got = scores.len(),
                        "reranker returned wrong score count; keeping similarity order"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        reranker = reranker.name(),
                        error = %e,
                        "reranker failed; keeping similarity order"
                    );
                }
            }
        }

        hits.retain(|h| h.score >= min_score);
        hits.truncate(k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingConfig;
    use crate::embedding::EmbeddingBackend;
    use crate::index::IndexEntry;
    use crate::models::{Chunk, DocState, Document};
    use crate::retry::BackendError;
    use crate::store::MemoryStore;
    use crate::chunker::ChunkParams;
    use chrono::Utc;

    /// Deterministic test backend: maps known texts to fixed vectors.
    struct TableBackend {
        table: HashMap<String, Vec<f32>>,
    }

    #[async_trait]
    impl EmbeddingBackend for TableBackend {
        fn model_name(&self) -> &str {
            "test-embed-1"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(
            &self,
            texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, BackendError> {
            Ok(texts
                .iter()
                .map(|t| self.table.get(t).cloned().unwrap_or(vec![0.0, 1.0]))
                .collect())
        }
    }

    fn gateway(table: HashMap<String, Vec<f32>>) -> Arc<EmbeddingGateway> {
        let config = EmbeddingConfig {
            provider: "openai".to_string(),
            model: Some("test-embed-1".to_string()),
            dims: Some(2),
            batch_size: 16,
            max_retries: 0,
            timeout_secs: 5,
        };
        Arc::new(EmbeddingGateway::new(Box::new(TableBackend { table }), &config).unwrap())
    }

    async fn seed(
        store: &MemoryStore,
        index: &VectorIndex,
        texts_and_vectors: &[(&str, Vec<f32>)],
    ) -> Vec<String> {
        let doc = Document {
            id: "d1".to_string(),
            project_id: "p1".to_string(),
            filename: "a.txt".to_string(),
            content_hash: "x".to_string(),
            state: DocState::Uploaded,
            error: None,
            chunk_size: None,
            overlap_size: None,
            chunk_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        store.create_document(&doc).await.unwrap();

        let chunks: Vec<Chunk> = texts_and_vectors
            .iter()
            .enumerate()
            .map(|(i, (text, _))| Chunk {
                id: format!("c{}", i + 1),
                document_id: "d1".to_string(),
                chunk_index: i as i64 + 1,
                text: text.to_string(),
                char_len: text.chars().count(),
                page: None,
                source_name: "a.txt".to_string(),
                hash: "h".to_string(),
                model: Some("test-embed-1".to_string()),
            })
            .collect();
        let vectors: Vec<Vec<f32>> = texts_and_vectors.iter().map(|(_, v)| v.clone()).collect();
        store
            .replace_chunks("d1", &chunks, &vectors, ChunkParams::new(1000, 20).unwrap())
            .await
            .unwrap();

        index.upsert(
            chunks
                .iter()
                .zip(vectors.iter())
                .map(|(c, v)| IndexEntry {
                    chunk_id: c.id.clone(),
                    document_id: "d1".to_string(),
                    project_id: "p1".to_string(),
                    chunk_index: c.chunk_index,
                    vector: v.clone(),
                })
                .collect(),
        );
        chunks.into_iter().map(|c| c.id).collect()
    }

    #[tokio::test]
    async fn retrieves_ranked_hits_above_threshold() {
        let store = Arc::new(MemoryStore::new());
        let index = Arc::new(VectorIndex::new());
        seed(
            &store,
            &index,
            &[
                ("about apples", vec![1.0, 0.0]),
                ("about oranges", vec![0.0, 1.0]),
                ("apples and pears", vec![0.9, 0.1]),
            ],
        )
        .await;

        let gw = gateway(HashMap::from([("apples?".to_string(), vec![1.0, 0.0])]));
        let retriever = Retriever::new(gw, index, store, None, 3);

        let hits = retriever.retrieve("apples?", "p1", 2, 0.5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.id, "c1");
        assert_eq!(hits[1].chunk.id, "c3");
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn threshold_can_empty_the_result() {
        let store = Arc::new(MemoryStore::new());
        let index = Arc::new(VectorIndex::new());
        seed(&store, &index, &[("unrelated", vec![0.0, 1.0])]).await;

        let gw = gateway(HashMap::from([("query".to_string(), vec![1.0, 0.0])]));
        let retriever = Retriever::new(gw, index, store, None, 3);

        let hits = retriever.retrieve("query", "p1", 5, 0.9).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn empty_project_returns_empty_not_error() {
        let store = Arc::new(MemoryStore::new());
        let index = Arc::new(VectorIndex::new());
        let gw = gateway(HashMap::new());
        let retriever = Retriever::new(gw, index, store, None, 3);

        let hits = retriever.retrieve("anything", "p1", 5, 0.0).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn invalid_inputs_rejected() {
        let store = Arc::new(MemoryStore::new());
        let index = Arc::new(VectorIndex::new());
        let gw = gateway(HashMap::new());
        let retriever = Retriever::new(gw, index, store, None, 3);

        assert!(retriever.retrieve("q", "p1", 0, 0.0).await.is_err());
        assert!(retriever.retrieve("q", "p1", 5, 2.0).await.is_err());
    }

    #[tokio::test]
    async fn reranker_reorders_but_does_not_readmit() {
        let store = Arc::new(MemoryStore::new());
        let index = Arc::new(VectorIndex::new());
        seed(
            &store,
            &index,
            &[
                // Slightly closer in vector space, no query terms.
                ("completely different topic", vec![1.0, 0.05]),
                // Slightly farther, but lexically on the nose.
                ("rust borrow checker rules", vec![1.0, 0.2]),
                // Below the threshold; the reranker must not rescue it.
                ("rust rust rust", vec![0.0, 1.0]),
            ],
        )
        .await;

        let gw = gateway(HashMap::from([(
            "rust borrow checker".to_string(),
            vec![1.0, 0.0],
        )]));
        let retriever = Retriever::new(gw, index, store, Some(Arc::new(LexicalReranker)), 3);

        let hits = retriever
            .retrieve("rust borrow checker", "p1", 2, 0.5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        // Lexical second pass puts the on-topic chunk first.
        assert_eq!(hits[0].chunk.id, "c2");
        assert!(hits[0].rerank_score.unwrap() > hits[1].rerank_score.unwrap());
        // c3 scored below min_score on similarity and stays out.
        assert!(hits.iter().all(|h| h.chunk.id != "c3"));
    }
}
