//! Boot-time adapter construction from the typed configuration record
//!
//! Providers are tagged enum variants in [`crate::config`], so adapter
//! selection is decided once, at startup, with no string dispatch in the
//! request path.

use std::sync::Arc;

use crate::adapters::ollama::{OllamaEmbedding, OllamaLlm, OllamaReranker, OllamaVision};
use crate::agent::{GraphRunLimits, LlmPlanner, Planner, RulePlanner};
use crate::config::{AppConfig, EmbeddingProvider, PlannerProvider};
use crate::ports::{Embedding, Llm, Reranker, TraceSink, VectorSearch, Vision};
use crate::retrieval::{HashVectorSearch, MetadataVectorSearch};

/// Embedding adapter used during ingestion; `hash` retrieval needs none.
pub fn embedding_from_config(config: &AppConfig) -> Option<Arc<dyn Embedding>> {
    match config.embedding.embedding_provider {
        EmbeddingProvider::Hash => None,
        EmbeddingProvider::Ollama => Some(Arc::new(OllamaEmbedding::new(&config.embedding))),
    }
}

/// Dense retrieval arm matching the embedding provider.
pub fn vector_search_from_config(config: &AppConfig) -> Arc<dyn VectorSearch> {
    match config.embedding.embedding_provider {
        EmbeddingProvider::Hash => Arc::new(HashVectorSearch::default()),
        EmbeddingProvider::Ollama => Arc::new(MetadataVectorSearch::new(Arc::new(
            OllamaEmbedding::new(&config.embedding),
        ))),
    }
}

/// Answer-drafting LLM, when enabled.
pub fn llm_from_config(config: &AppConfig) -> Option<Arc<OllamaLlm>> {
    if config.llm.use_llm_answering {
        Some(Arc::new(OllamaLlm::new(&config.llm)))
    } else {
        None
    }
}

/// Answer-drafting LLM as the port trait object.
pub fn llm_port_from_config(config: &AppConfig) -> Option<Arc<dyn Llm>> {
    llm_from_config(config).map(|llm| llm as Arc<dyn Llm>)
}

/// Vision adapter for ingestion, when enabled.
pub fn vision_from_config(config: &AppConfig) -> Option<Arc<dyn Vision>> {
    if config.ingest.use_vision_ingestion {
        Some(Arc::new(OllamaVision::new(&config.vision)))
    } else {
        None
    }
}

/// Reranker, when enabled.
pub fn reranker_from_config(config: &AppConfig) -> Option<Arc<dyn Reranker>> {
    if config.reranker.use_reranker {
        Some(Arc::new(OllamaReranker::new(&config.reranker)))
    } else {
        None
    }
}

/// Planner variant for the agent graph; the LLM planner reuses the chat
/// model behind the answering LLM.
pub fn planner_from_config(
    config: &AppConfig,
    trace: Option<Arc<dyn TraceSink>>,
) -> Arc<dyn Planner> {
    match config.agentic.planner {
        PlannerProvider::Rule => Arc::new(RulePlanner::new()),
        PlannerProvider::Llm => {
            let model = Arc::new(OllamaLlm::new(&config.llm));
            let mut planner = LlmPlanner::new(model);
            if let Some(trace) = trace {
                planner = planner.with_trace(trace);
            }
            Arc::new(planner)
        }
    }
}

/// Graph limits from the agentic knobs.
pub fn graph_limits_from_config(config: &AppConfig) -> GraphRunLimits {
    GraphRunLimits {
        max_iterations: config.agentic.agentic_max_iterations,
        max_tool_calls: config.agentic.agentic_max_tool_calls,
        timeout_seconds: config.agentic.agentic_timeout_seconds,
    }
}
