//! Collaborator ports consumed by the evidence pipeline core
//!
//! Concrete adapters live in [`crate::adapters`] and [`crate::store`]; tests
//! supply small fakes. All fallible collaborators surface `anyhow::Error` so
//! the core can demote failures to warnings at the component boundary.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{Chunk, ContentType};
use crate::ingest::tables::ExtractedTable;

/// One parsed PDF page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub page_number: u32,
    pub text: String,
}

/// PDF text extraction
#[async_trait]
pub trait PdfParser: Send + Sync {
    async fn parse(&self, path: &Path) -> anyhow::Result<Vec<Page>>;
}

/// OCR over a single page
#[async_trait]
pub trait Ocr: Send + Sync {
    async fn extract_text(&self, path: &Path, page_number: u32) -> anyhow::Result<String>;
}

/// Vision model summarizing a page's visual content
#[async_trait]
pub trait Vision: Send + Sync {
    async fn extract_page_insights(&self, path: &Path, page_number: u32)
        -> anyhow::Result<String>;
}

/// Dense text embedding
#[async_trait]
pub trait Embedding: Send + Sync {
    async fn embed_text(&self, text: &str) -> anyhow::Result<Vec<f32>>;

    /// Last failure detail, when the adapter retains one
    fn last_error(&self) -> Option<String> {
        None
    }
}

/// Evidence record handed to the LLM when drafting an answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmEvidence {
    pub doc_id: String,
    pub page_start: u32,
    pub page_end: u32,
    pub content_type: ContentType,
    pub text: String,
}

/// Answer-drafting language model
#[async_trait]
pub trait Llm: Send + Sync {
    async fn generate_answer(
        &self,
        query: &str,
        intent: &str,
        evidence: &[LlmEvidence],
    ) -> anyhow::Result<String>;
}

/// Raw prompt completion, used by the LLM planner
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String>;
}

/// Table extraction over one page of text
pub trait TableExtract: Send + Sync {
    fn extract(&self, page_text: &str, page_number: u32, doc_id: Option<&str>)
        -> Vec<ExtractedTable>;
}

/// Chunk persistence; returns the asset reference of the written corpus
#[async_trait]
pub trait ChunkStore: Send + Sync {
    async fn persist(&self, doc_id: &str, chunks: &[Chunk]) -> anyhow::Result<String>;
}

/// Chunk corpus loading, optionally scoped to one document
#[async_trait]
pub trait ChunkQuery: Send + Sync {
    async fn list_chunks(&self, doc_id: Option<&str>) -> anyhow::Result<Vec<Chunk>>;
}

/// Origin of a retrieval score
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SearchSource {
    Keyword,
    Vector,
}

/// A chunk scored by one retrieval arm; `chunk_index` points into the
/// caller-provided corpus slice.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk_index: usize,
    pub score: f64,
    pub source: SearchSource,
}

/// Lexical (BM25-like) search over in-memory chunks
#[async_trait]
pub trait KeywordSearch: Send + Sync {
    async fn search(
        &self,
        query: &str,
        chunks: &[Chunk],
        top_k: usize,
    ) -> anyhow::Result<Vec<ScoredChunk>>;
}

/// Dense (cosine) search over in-memory chunks
#[async_trait]
pub trait VectorSearch: Send + Sync {
    async fn search(
        &self,
        query: &str,
        chunks: &[Chunk],
        top_k: usize,
    ) -> anyhow::Result<Vec<ScoredChunk>>;
}

/// Candidate passage handed to the reranker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankCandidate {
    pub chunk_id: String,
    pub doc_id: String,
    pub page_start: u32,
    pub content_type: ContentType,
    pub text: String,
    pub base_score: f64,
}

/// Reranker verdict for one candidate; score is in [0, 1]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub chunk_id: String,
    pub score: f64,
}

/// Cross-encoder style reranking of a candidate pool
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(
        &self,
        query: &str,
        candidates: &[RerankCandidate],
        top_k: usize,
    ) -> anyhow::Result<Vec<RankedCandidate>>;
}

/// Append-only JSON trace sink (retrieval, answer, and agent traces)
pub trait TraceSink: Send + Sync {
    fn log(&self, payload: &serde_json::Value);
}
