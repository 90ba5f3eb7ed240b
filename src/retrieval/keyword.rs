//! BM25-like lexical scoring over in-memory chunks

use std::collections::HashMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use crate::domain::Chunk;
use crate::ports::{KeywordSearch, ScoredChunk, SearchSource};

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z0-9]+").expect("token pattern"));

pub(crate) fn tokens(text: &str) -> Vec<String> {
    TOKEN_RE
        .find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

/// BM25 scoring with smoothed IDF
#[derive(Debug, Clone)]
pub struct Bm25KeywordSearch {
    k1: f64,
    b: f64,
}

impl Default for Bm25KeywordSearch {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

impl Bm25KeywordSearch {
    pub fn new(k1: f64, b: f64) -> Self {
        Self { k1, b }
    }
}

#[async_trait]
impl KeywordSearch for Bm25KeywordSearch {
    async fn search(
        &self,
        query: &str,
        chunks: &[Chunk],
        top_k: usize,
    ) -> anyhow::Result<Vec<ScoredChunk>> {
        if chunks.is_empty() || query.trim().is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let q_terms = tokens(query);
        if q_terms.is_empty() {
            return Ok(Vec::new());
        }

        let docs_tokens: Vec<Vec<String>> =
            chunks.iter().map(|c| tokens(&c.content_text)).collect();
        let doc_lens: Vec<usize> = docs_tokens.iter().map(Vec::len).collect();
        let avg_len = doc_lens.iter().sum::<usize>() as f64 / doc_lens.len().max(1) as f64;

        let mut df: HashMap<&str, usize> = HashMap::new();
        for toks in &docs_tokens {
            let mut seen: Vec<&str> = toks.iter().map(String::as_str).collect();
            seen.sort_unstable();
            seen.dedup();
            for term in seen {
                *df.entry(term).or_insert(0) += 1;
            }
        }

        let n_docs = chunks.len() as f64;
        let mut scored: Vec<ScoredChunk> = Vec::new();

        for (idx, (toks, doc_len)) in docs_tokens.iter().zip(doc_lens.iter()).enumerate() {
            let mut tf: HashMap<&str, usize> = HashMap::new();
            for term in toks {
                *tf.entry(term.as_str()).or_insert(0) += 1;
            }

            let mut score = 0.0;
            for term in &q_terms {
                let Some(freq) = tf.get(term.as_str()).copied() else {
                    continue;
                };
                let term_df = df.get(term.as_str()).copied().unwrap_or(0) as f64;
                let idf = (1.0 + (n_docs - term_df + 0.5) / (term_df + 0.5)).ln();
                let num = freq as f64 * (self.k1 + 1.0);
                let den = freq as f64
                    + self.k1
                        * (1.0 - self.b + self.b * (*doc_len as f64 / avg_len.max(1e-9)));
                score += idf * (num / den.max(1e-9));
            }

            if score > 0.0 {
                scored.push(ScoredChunk {
                    chunk_index: idx,
                    score,
                    source: SearchSource::Keyword,
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
    async fn test_ranks_term_matches_first() {
        let chunks = vec![
            chunk("c1", "torque specification is 45 Nm for the output flange"),
            chunk("c2", "lubrication schedule and oil grades"),
            chunk("c3", "torque wrench usage and torque sequence"),
        ];
        let hits = Bm25KeywordSearch::default()
            .search("torque specification", &chunks, 10)
            .await
            .unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].chunk_index, 0);
        assert!(hits.iter().all(|h| h.score > 0.0));
        assert!(hits.iter().all(|h| h.source == SearchSource::Keyword));
    }

    #[tokio::test]
    async fn test_empty_inputs_return_nothing() {
        let chunks = vec![chunk("c1", "text body")];
        let engine = Bm25KeywordSearch::default();
        assert!(engine.search("", &chunks, 10).await.unwrap().is_empty());
        assert!(engine.search("text", &[], 10).await.unwrap().is_empty());
        assert!(engine.search("text", &chunks, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_respects_top_k() {
        let chunks: Vec<Chunk> = (0..10)
            .map(|i| chunk(&format!("c{}", i), "shared torque term"))
            .collect();
        let hits = Bm25KeywordSearch::default()
            .search("torque", &chunks, 4)
            .await
            .unwrap();
        assert_eq!(hits.len(), 4);
    }
}
