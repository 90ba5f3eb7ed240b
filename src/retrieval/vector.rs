//! Dense retrieval arms: hashed bag-of-words fallback and metadata vectors

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::Chunk;
use crate::ports::{Embedding, ScoredChunk, SearchSource, VectorSearch};
use crate::retrieval::keyword::tokens;

fn cosine(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn normalize(vec: Vec<f64>) -> Vec<f64> {
    let norm = vec.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm <= 0.0 {
        return Vec::new();
    }
    vec.into_iter().map(|v| v / norm).collect()
}

/// Vector-like retrieval using hashed bag-of-words embeddings.
///
/// Self-contained fallback when no external embedding model is wired.
#[derive(Debug, Clone)]
pub struct HashVectorSearch {
    dim: usize,
}

impl Default for HashVectorSearch {
    fn default() -> Self {
        Self { dim: 384 }
    }
}

impl HashVectorSearch {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    fn hashed_embedding(&self, text: &str) -> Vec<f64> {
        let mut vec = vec![0.0f64; self.dim];
        for token in tokens(text) {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let idx = (hasher.finish() % self.dim as u64) as usize;
            vec[idx] += 1.0;
        }
        normalize(vec)
    }
}

#[async_trait]
impl VectorSearch for HashVectorSearch {
    async fn search(
        &self,
        query: &str,
        chunks: &[Chunk],
        top_k: usize,
    ) -> anyhow::Result<Vec<ScoredChunk>> {
        if chunks.is_empty() || query.trim().is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let q_vec = self.hashed_embedding(query);
        if q_vec.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<ScoredChunk> = Vec::new();
        for (idx, chunk) in chunks.iter().enumerate() {
            let c_vec = self.hashed_embedding(&chunk.content_text);
            let score = cosine(&q_vec, &c_vec);
            if score > 0.0 {
                scored.push(ScoredChunk {
                    chunk_index: idx,
                    score,
                    source: SearchSource::Vector,
                });
            }
        }

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }
}

/// Vector search over embeddings persisted in chunk metadata.
///
/// The query is embedded live; chunk vectors come from the `embedding`
/// metadata field written during ingestion.
pub struct MetadataVectorSearch {
    embedding: Arc<dyn Embedding>,
}

impl MetadataVectorSearch {
    pub fn new(embedding: Arc<dyn Embedding>) -> Self {
        Self { embedding }
    }
}

#[async_trait]
impl VectorSearch for MetadataVectorSearch {
    async fn search(
        &self,
        query: &str,
        chunks: &[Chunk],
        top_k: usize,
    ) -> anyhow::Result<Vec<ScoredChunk>> {
        if chunks.is_empty() || query.trim().is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let q_raw = self.embedding.embed_text(query).await?;
        let q_vec = normalize(q_raw.into_iter().map(f64::from).collect());
        if q_vec.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<ScoredChunk> = Vec::new();
        for (idx, chunk) in chunks.iter().enumerate() {
            let Some(raw) = chunk.embedding() else {
                continue;
            };
            let c_vec = normalize(raw.into_iter().map(f64::from).collect());
            let score = cosine(&q_vec, &c_vec);
            if score > 0.0 {
                scored.push(ScoredChunk {
                    chunk_index: idx,
                    score,
                    source: SearchSource::Vector,
                });
            }
        }

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ContentType;

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk::new(id, "d1", ContentType::Text, 1, 1, text).unwrap()
    }

    #[tokio::test]
    async fn test_hash_vectors_prefer_shared_vocabulary() {
        let chunks = vec![
            chunk("c1", "torque specification for output flange"),
            chunk("c2", "unrelated painting instructions"),
        ];
        let hits = HashVectorSearch::default()
            .search("torque specification", &chunks, 5)
            .await
            .unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].chunk_index, 0);
    }

    #[tokio::test]
    async fn test_metadata_vectors_skip_chunks_without_embeddings() {
        struct UnitEmbedding;
        #[async_trait]
        impl Embedding for UnitEmbedding {
            async fn embed_text(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
                Ok(vec![1.0, 0.0])
            }
        }

        let mut with_vec = chunk("c1", "torque data");
        with_vec.set_embedding(&[1.0, 0.0]).unwrap();
        let without_vec = chunk("c2", "torque data");

        let engine = MetadataVectorSearch::new(Arc::new(UnitEmbedding));
        let hits = engine
            .search("torque", &[with_vec, without_vec], 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_index, 0);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }
}
