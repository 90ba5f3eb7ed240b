//! Concrete collaborator adapters

pub mod factory;
pub mod ollama;

pub use factory::{
    embedding_from_config, graph_limits_from_config, llm_from_config, llm_port_from_config,
    planner_from_config, reranker_from_config, vector_search_from_config, vision_from_config,
};
pub use ollama::{OllamaEmbedding, OllamaLlm, OllamaReranker, OllamaVision};
