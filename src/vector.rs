//! In-memory dense vector index.
//!
//! A flat index over chunk vectors. Vectors are L2-normalized on insertion
//! and queries are normalized before scoring, so inner-product search is
//! equivalent to cosine similarity. Search returns at most
//! `min(k, index_size)` hits in non-increasing score order; ties keep
//! insertion order (the sort is stable). Rebuilding an index replaces it
//! wholesale — there is no incremental delete.

use crate::embedding::l2_normalize;
use crate::error::{EngineError, Result};

#[derive(Debug, Clone)]
struct Entry {
    chunk_id: String,
    document_id: String,
    vector: Vec<f32>,
}

/// A scored nearest-neighbor hit.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk_id: String,
    pub document_id: String,
    /// Cosine similarity to the query, higher is more similar.
    pub score: f32,
}

/// Flat cosine-similarity index over chunk vectors.
pub struct VectorIndex {
    dims: usize,
    entries: Vec<Entry>,
}

impl VectorIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            entries: Vec::new(),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append one entry. The vector is L2-normalized before storage.
    pub fn add(&mut self, chunk_id: &str, document_id: &str, mut vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.dims {
            return Err(EngineError::Validation(format!(
                "vector dimension {} does not match index dimension {}",
                vector.len(),
                self.dims
            )));
        }
        l2_normalize(&mut vector);
        self.entries.push(Entry {
            chunk_id: chunk_id.to_string(),
            document_id: document_id.to_string(),
            vector,
        });
        Ok(())
    }

    /// Return the `k` nearest neighbors of `query` by cosine similarity,
    /// descending. An empty index yields an empty list.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<VectorHit>> {
        if self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dims {
            return Err(EngineError::Validation(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                self.dims
            )));
        }

        let mut q = query.to_vec();
        l2_normalize(&mut q);

        let mut hits: Vec<VectorHit> = self
            .entries
            .iter()
            .map(|e| VectorHit {
                chunk_id: e.chunk_id.clone(),
                document_id: e.document_id.clone(),
                score: e.vector.iter().zip(q.iter()).map(|(a, b)| a * b).sum(),
            })
            .collect();

        // Stable sort: equal scores keep insertion order.
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);

        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_with(vectors: &[(&str, &str, Vec<f32>)]) -> VectorIndex {
        let dims = vectors[0].2.len();
        let mut idx = VectorIndex::new(dims);
        for (chunk, doc, v) in vectors {
            idx.add(chunk, doc, v.clone()).unwrap();
        }
        idx
    }

    #[test]
    fn test_empty_index_returns_empty() {
        let idx = VectorIndex::new(4);
        let hits = idx.search(&[1.0, 0.0, 0.0, 0.0], 5).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_search_orders_by_similarity() {
        let idx = index_with(&[
            ("c1", "d1", vec![1.0, 0.0]),
            ("c2", "d2", vec![0.0, 1.0]),
            ("c3", "d3", vec![0.7, 0.7]),
        ]);
        let hits = idx.search(&[1.0, 0.0], 3).unwrap();
        assert_eq!(hits[0].chunk_id, "c1");
        assert_eq!(hits[1].chunk_id, "c3");
        assert_eq!(hits[2].chunk_id, "c2");
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_search_caps_at_k_and_index_size() {
        let idx = index_with(&[("c1", "d1", vec![1.0, 0.0]), ("c2", "d2", vec![0.0, 1.0])]);
        assert_eq!(idx.search(&[1.0, 0.0], 1).unwrap().len(), 1);
        assert_eq!(idx.search(&[1.0, 0.0], 10).unwrap().len(), 2);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let idx = index_with(&[
            ("first", "d1", vec![1.0, 0.0]),
            ("second", "d2", vec![1.0, 0.0]),
            ("third", "d3", vec![1.0, 0.0]),
        ]);
        let hits = idx.search(&[1.0, 0.0], 3).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut idx = VectorIndex::new(3);
        assert!(idx.add("c1", "d1", vec![1.0, 0.0]).is_err());
        idx.add("c1", "d1", vec![1.0, 0.0, 0.0]).unwrap();
        assert!(idx.search(&[1.0, 0.0], 1).is_err());
    }

    #[test]
    fn test_vectors_normalized_on_insert() {
        let idx = index_with(&[("c1", "d1", vec![10.0, 0.0]), ("c2", "d2", vec![0.1, 0.0])]);
        let hits = idx.search(&[1.0, 0.0], 2).unwrap();
        // Magnitude must not matter after normalization.
        assert!((hits[0].score - hits[1].score).abs() < 1e-6);
    }
}
