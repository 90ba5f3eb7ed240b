//! Configuration management for the evidence pipeline

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Main configuration for the evidence pipeline
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Corpus storage locations
    #[serde(default)]
    pub storage: StorageConfig,

    /// Ingestion pipeline settings
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Embedding provider settings
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// LLM answering settings
    #[serde(default)]
    pub llm: LlmConfig,

    /// Vision ingestion settings
    #[serde(default)]
    pub vision: VisionConfig,

    /// Reranker settings
    #[serde(default)]
    pub reranker: RerankerConfig,

    /// Agentic answering settings
    #[serde(default)]
    pub agentic: AgenticConfig,

    /// Decision trace files
    #[serde(default)]
    pub trace: TraceConfig,
}

/// Corpus storage locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory holding one subdirectory per ingested document
    pub assets_dir: String,

    /// Directory for uploaded PDFs awaiting ingestion
    pub uploads_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            assets_dir: "data/assets".to_string(),
            uploads_dir: "data/uploads".to_string(),
        }
    }
}

/// Ingestion pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Concurrent ingestion jobs in the background manager
    pub ingest_concurrency: usize,

    /// Parallel page workers inside one ingestion run
    pub ingest_page_workers: usize,

    /// Vision call budget per document
    pub vision_max_pages: usize,

    /// Enable vision summaries during ingestion
    pub use_vision_ingestion: bool,

    /// Minimum embedding coverage required when fail-fast is set
    pub embedding_min_coverage: f64,

    /// Abort ingestion when coverage falls below the minimum
    pub embedding_fail_fast: bool,

    /// First truncation candidate for the second embedding pass
    pub embedding_second_pass_max_chars: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            ingest_concurrency: 2,
            ingest_page_workers: 4,
            vision_max_pages: 40,
            use_vision_ingestion: false,
            embedding_min_coverage: 0.85,
            embedding_fail_fast: false,
            embedding_second_pass_max_chars: 2000,
        }
    }
}

/// Embedding provider selection
///
/// `hash` keeps retrieval self-contained with hashed bag-of-words vectors;
/// `ollama` switches dense retrieval to pre-computed metadata embeddings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    Hash,
    Ollama,
}

/// Embedding settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub embedding_provider: EmbeddingProvider,
    pub base_url: String,
    pub model: String,
    /// Request timeout in seconds
    pub timeout: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            embedding_provider: EmbeddingProvider::Hash,
            base_url: "http://localhost:11434".to_string(),
            model: "mxbai-embed-large:latest".to_string(),
            timeout: 60,
        }
    }
}

/// LLM answering settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub use_llm_answering: bool,
    pub base_url: String,
    pub model: String,
    /// Request timeout in seconds
    pub timeout: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            use_llm_answering: false,
            base_url: "http://localhost:11434".to_string(),
            model: "deepseek-r1:8b".to_string(),
            timeout: 90,
        }
    }
}

/// Vision ingestion settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionConfig {
    pub base_url: String,
    pub model: String,
    /// Request timeout in seconds
    pub timeout: u64,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "qwen2.5vl:7b".to_string(),
            timeout: 120,
        }
    }
}

/// Reranker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerConfig {
    pub use_reranker: bool,
    pub reranker_pool_size: usize,
    pub base_url: String,
    pub model: String,
    /// Request timeout in seconds
    pub timeout: u64,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            use_reranker: false,
            reranker_pool_size: 24,
            base_url: "http://localhost:11434".to_string(),
            model: "deepseek-r1:8b".to_string(),
            timeout: 90,
        }
    }
}

/// Planner variant for the agent graph
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlannerProvider {
    Rule,
    Llm,
}

/// Agentic answering settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgenticConfig {
    pub use_agentic_mode: bool,
    pub agentic_max_iterations: usize,
    pub agentic_max_tool_calls: usize,
    pub agentic_timeout_seconds: f64,
    pub planner: PlannerProvider,
}

impl Default for AgenticConfig {
    fn default() -> Self {
        Self {
            use_agentic_mode: false,
            agentic_max_iterations: 4,
            agentic_max_tool_calls: 6,
            agentic_timeout_seconds: 20.0,
            planner: PlannerProvider::Rule,
        }
    }
}

/// Decision trace files (JSON lines, append-only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceConfig {
    pub retrieval_trace_file: String,
    pub answer_trace_file: String,
    pub agentic_trace_file: String,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            retrieval_trace_file: "reports/retrieval_traces.jsonl".to_string(),
            answer_trace_file: "reports/answer_traces.jsonl".to_string(),
            agentic_trace_file: "reports/agentic_traces.jsonl".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON, TOML, or YAML file
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        let config = match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            Some("toml") => toml::from_str(&content)
                .map_err(|e| PipelineError::Config(format!("TOML parse error: {}", e)))?,
            Some("yaml") | Some("yml") => serde_yml::from_str(&content)
                .map_err(|e| PipelineError::Config(format!("YAML parse error: {}", e)))?,
            _ => {
                return Err(PipelineError::Config(
                    "Unsupported config file format".to_string(),
                ))
            }
        };
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.ingest.embedding_min_coverage) {
            return Err(PipelineError::Config(
                "embedding_min_coverage must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.agentic.agentic_max_iterations == 0 {
            return Err(PipelineError::Config(
                "agentic_max_iterations must be greater than 0".to_string(),
            ));
        }
        if self.agentic.agentic_max_tool_calls == 0 {
            return Err(PipelineError::Config(
                "agentic_max_tool_calls must be greater than 0".to_string(),
            ));
        }
        if self.agentic.agentic_timeout_seconds <= 0.0 {
            return Err(PipelineError::Config(
                "agentic_timeout_seconds must be positive".to_string(),
            ));
        }
        for (name, url) in [
            ("embedding.base_url", &self.embedding.base_url),
            ("llm.base_url", &self.llm.base_url),
            ("vision.base_url", &self.vision.base_url),
            ("reranker.base_url", &self.reranker.base_url),
        ] {
            if !url.starts_with("http") {
                return Err(PipelineError::Config(format!("Invalid {}: {}", name, url)));
            }
        }
        if self.reranker.reranker_pool_size == 0 {
            return Err(PipelineError::Config(
                "reranker_pool_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
