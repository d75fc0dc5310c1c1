//! In-process vector index with filtered nearest-neighbor search.
//!
//! An exact brute-force scan over the filtered candidate set is the
//! correctness baseline: every search computes cosine similarity
//! against each matching entry. No approximate structure is
//! substituted, so recall is total by construction and scores are
//! bounded to `[-1.0, 1.0]`.
//!
//! Entries live in per-document maps behind one `std::sync::RwLock`:
//! reads are concurrent, and writes are constant-time map swaps —
//! [`VectorIndex::replace_document`] exchanges a document's whole entry
//! set in one short write-lock critical section, so a concurrent search
//! sees either the old complete entry set or the new one, never a mix,
//! and is never stalled behind another document's rebuild.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use crate::embedding::cosine_similarity;

/// One indexed chunk vector plus the metadata needed for filtering and
/// deterministic ordering.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk_id: String,
    pub document_id: String,
    pub project_id: String,
    pub chunk_index: i64,
    pub vector: Vec<f32>,
}

/// Search scope: a project, optionally narrowed to a document set.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub project_id: String,
    pub document_ids: Option<HashSet<String>>,
}

impl SearchFilter {
    pub fn project(project_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            document_ids: None,
        }
    }

    fn matches(&self, entry: &IndexEntry) -> bool {
        if entry.project_id != self.project_id {
            return false;
        }
        match &self.document_ids {
            Some(ids) => ids.contains(&entry.document_id),
            None => true,
        }
    }
}

/// A scored search result from the index.
#[derive(Debug, Clone)]
pub struct ScoredEntry {
    pub chunk_id: String,
    pub document_id: String,
    pub chunk_index: i64,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f32,
}

/// Exact brute-force vector index.
pub struct VectorIndex {
    /// document id → chunk id → entry.
    entries: RwLock<HashMap<String, HashMap<String, IndexEntry>>>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or replace entries by chunk id.
    ///
    /// Idempotent: upserting the same id and vector twice leaves the
    /// index observably unchanged.
    pub fn upsert(&self, entries: Vec<IndexEntry>) {
        let mut map = self.entries.write().unwrap();
        for entry in entries {
            map.entry(entry.document_id.clone())
                .or_default()
                .insert(entry.chunk_id.clone(), entry);
        }
    }

    /// Remove all entries for a document in one atomic step.
    pub fn delete_by_document(&self, document_id: &str) {
        let mut map = self.entries.write().unwrap();
        map.remove(document_id);
    }

    /// Atomically replace a document's entries with a new set.
    ///
    /// Used by reset reprocessing: the swap happens under a single
    /// write lock, so no search observes a partially replaced document.
    pub fn replace_document(&self, document_id: &str, entries: Vec<IndexEntry>) {
        let new_set: HashMap<String, IndexEntry> = entries
            .into_iter()
            .map(|e| (e.chunk_id.clone(), e))
            .collect();
        let mut map = self.entries.write().unwrap();
        if new_set.is_empty() {
            map.remove(document_id);
        } else {
            map.insert(document_id.to_string(), new_set);
        }
    }

    /// Number of entries currently indexed.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().values().map(|m| m.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Top-`k` entries by cosine similarity within the filter scope.
    ///
    /// Ties break by ascending chunk order index, then chunk id, so
    /// results are deterministic for identical inputs.
    pub fn search(&self, query_vector: &[f32], k: usize, filter: &SearchFilter) -> Vec<ScoredEntry> {
        if k == 0 {
            return Vec::new();
        }

        let map = self.entries.read().unwrap();
        let mut scored: Vec<ScoredEntry> = map
            .values()
            .flat_map(|doc_entries| doc_entries.values())
            .filter(|e| filter.matches(e))
            .map(|e| ScoredEntry {
                chunk_id: e.chunk_id.clone(),
                document_id: e.document_id.clone(),
                chunk_index: e.chunk_index,
                score: cosine_similarity(query_vector, &e.vector),
            })
            .collect();
        drop(map);

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.chunk_index.cmp(&b.chunk_index))
                .then(a.chunk_id.cmp(&b.chunk_id))
        });
        scored.truncate(k);
        scored
    }
}

impl Default for VectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(chunk_id: &str, doc: &str, project: &str, index: i64, vector: Vec<f32>) -> IndexEntry {
        IndexEntry {
            chunk_id: chunk_id.to_string(),
            document_id: doc.to_string(),
            project_id: project.to_string(),
            chunk_index: index,
            vector,
        }
    }

    #[test]
    fn upsert_is_idempotent() {
        let index = VectorIndex::new();
        let e = entry("c1", "d1", "p1", 1, vec![1.0, 0.0]);
        index.upsert(vec![e.clone()]);
        index.upsert(vec![e]);
        assert_eq!(index.len(), 1);

        let hits = index.search(&[1.0, 0.0], 10, &SearchFilter::project("p1"));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "c1");
    }

    #[test]
    fn search_is_scoped_to_project() {
        let index = VectorIndex::new();
        index.upsert(vec![
            entry("c1", "d1", "p1", 1, vec![1.0, 0.0]),
            entry("c2", "d2", "p2", 1, vec![1.0, 0.0]),
        ]);

        let hits = index.search(&[1.0, 0.0], 10, &SearchFilter::project("p1"));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "c1");
    }

    #[test]
    fn document_filter_narrows_results() {
        let index = VectorIndex::new();
        index.upsert(vec![
            entry("c1", "d1", "p1", 1, vec![1.0, 0.0]),
            entry("c2", "d2", "p1", 1, vec![1.0, 0.0]),
        ]);

        let filter = SearchFilter {
            project_id: "p1".to_string(),
            document_ids: Some(["d2".to_string()].into_iter().collect()),
        };
        let hits = index.search(&[1.0, 0.0], 10, &filter);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "c2");
    }

    #[test]
    fn results_ranked_by_similarity() {
        let index = VectorIndex::new();
        index.upsert(vec![
            entry("far", "d1", "p1", 1, vec![0.0, 1.0]),
            entry("near", "d1", "p1", 2, vec![1.0, 0.1]),
            entry("exact", "d1", "p1", 3, vec![1.0, 0.0]),
        ]);

        let hits = index.search(&[1.0, 0.0], 3, &SearchFilter::project("p1"));
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["exact", "near", "far"]);
        for h in &hits {
            assert!((-1.0..=1.0).contains(&h.score));
        }
    }

    #[test]
    fn ties_break_by_chunk_index_then_id() {
        let index = VectorIndex::new();
        index.upsert(vec![
            entry("z", "d1", "p1", 2, vec![1.0, 0.0]),
            entry("b", "d1", "p1", 1, vec![1.0, 0.0]),
            entry("a", "d1", "p1", 2, vec![1.0, 0.0]),
        ]);

        let hits = index.search(&[1.0, 0.0], 3, &SearchFilter::project("p1"));
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "z"]);
    }

    #[test]
    fn increasing_k_extends_results_monotonically() {
        let index = VectorIndex::new();
        for i in 0..10 {
            index.upsert(vec![entry(
                &format!("c{}", i),
                "d1",
                "p1",
                i as i64 + 1,
                vec![1.0, i as f32 / 10.0],
            )]);
        }

        let filter = SearchFilter::project("p1");
        let small = index.search(&[1.0, 0.0], 3, &filter);
        let large = index.search(&[1.0, 0.0], 7, &filter);
        for (a, b) in small.iter().zip(large.iter()) {
            assert_eq!(a.chunk_id, b.chunk_id);
        }
    }

    #[test]
    fn replace_document_swaps_entry_sets_atomically() {
        let index = VectorIndex::new();
        index.upsert(vec![
            entry("old1", "d1", "p1", 1, vec![1.0, 0.0]),
            entry("old2", "d1", "p1", 2, vec![1.0, 0.0]),
            entry("other", "d2", "p1", 1, vec![1.0, 0.0]),
        ]);

        index.replace_document(
            "d1",
            vec![entry("new1", "d1", "p1", 1, vec![0.0, 1.0])],
        );

        let hits = index.search(&[1.0, 1.0], 10, &SearchFilter::project("p1"));
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        assert!(ids.contains(&"new1"));
        assert!(ids.contains(&"other"));
        assert!(!ids.contains(&"old1"));
        assert!(!ids.contains(&"old2"));
    }

    #[test]
    fn delete_by_document_removes_only_that_document() {
        let index = VectorIndex::new();
        index.upsert(vec![
            entry("c1", "d1", "p1", 1, vec![1.0, 0.0]),
            entry("c2", "d2", "p1", 1, vec![1.0, 0.0]),
        ]);
        index.delete_by_document("d1");
        assert_eq!(index.len(), 1);
        let hits = index.search(&[1.0, 0.0], 10, &SearchFilter::project("p1"));
        assert_eq!(hits[0].chunk_id, "c2");
    }
}
