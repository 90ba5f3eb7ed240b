//! Grounded question answering over equipment PDF manuals
//!
//! The evidence pipeline turns raw PDFs into a retrievable chunk corpus and
//! answers queries with a grounding guarantee:
//! - Ingestion: per-page parallel extraction of text, table rows, figure
//!   captions/OCR, and optional vision summaries, followed by a two-pass
//!   embedding stage with coverage accounting
//! - Hybrid retrieval: BM25-like keyword search fused with cosine dense
//!   search, intent weighting, anchor-term coverage, optional reranking
//! - Bounded agent graph: planner → execute loop → finalize under strict
//!   iteration, tool-call, and timeout budgets
//! - Answer composition: confidence tiers, citation enforcement,
//!   structured output, and ambiguity follow-ups
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use manualqa::answer::{AnswerComposer, AnswerInput};
//! use manualqa::retrieval::{Bm25KeywordSearch, HashVectorSearch, RetrievalEngine};
//! use manualqa::store::FilesystemChunkQuery;
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = Arc::new(RetrievalEngine::new(
//!         Arc::new(FilesystemChunkQuery::new("data/assets")),
//!         Arc::new(Bm25KeywordSearch::default()),
//!         Arc::new(HashVectorSearch::default()),
//!     ));
//!     let composer = AnswerComposer::new(engine);
//!     let output = composer
//!         .answer(&AnswerInput::new("What is the torque spec in Nm?"))
//!         .await;
//!     println!("{}: {}", output.status, output.answer);
//! }
//! ```

pub mod adapters;
pub mod agent;
pub mod answer;
pub mod config;
pub mod domain;
pub mod error;
pub mod eval;
pub mod ingest;
pub mod jobs;
pub mod ports;
pub mod retrieval;
pub mod store;
pub mod trace;
pub mod visual;

// Re-export main types
pub use agent::{
    AgenticAnswerState, GraphRunLimits, GraphRunOutput, GraphRunner, LlmPlanner, PlanStep,
    Planner, RulePlanner, TerminatedReason, ToolDefinition, ToolExecutor,
};
pub use answer::{
    build_agent_tools, AnswerComposer, AnswerInput, AnswerOutput, NOT_FOUND_TEXT,
};
pub use config::AppConfig;
pub use domain::{AnswerStatus, Chunk, Citation, Confidence, ContentType, Document};
pub use error::{IngestError, PipelineError, Result};
pub use eval::{GoldenQuestion, MultiTurnEvaluator};
pub use ingest::{IngestOptions, IngestPipeline, IngestResult, IngestStage, TableRowExtractor};
pub use jobs::{IngestionJob, IngestionJobManager, JobStatus};
pub use retrieval::{
    Bm25KeywordSearch, EvidenceHit, HashVectorSearch, Intent, MetadataVectorSearch,
    RetrievalEngine, SearchInput, SearchOutput,
};
pub use store::{FilesystemChunkQuery, FilesystemChunkStore};
pub use trace::{init_tracing, JsonlTraceLogger};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.starts_with(char::is_numeric));
    }
}
