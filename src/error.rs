//! Error handling for the evidence pipeline

use thiserror::Error;

/// Result type alias for the evidence pipeline
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Main error type for the evidence pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Ingestion error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Contract violation: {0}")]
    Contract(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Errors raised by the ingestion orchestrator
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("PDF parse failed: {0}")]
    PdfParseFailed(String),

    #[error(
        "Embedding coverage {coverage:.3} below configured minimum {minimum:.3} \
         ({failed} of {total} chunks failed)"
    )]
    EmbeddingCoverage {
        coverage: f64,
        minimum: f64,
        failed: usize,
        total: usize,
    },

    #[error("Chunk persistence failed: {0}")]
    PersistFailed(String),
}

impl PipelineError {
    /// Error category for logging/metrics
    pub fn category(&self) -> &'static str {
        match self {
            PipelineError::Ingest(_) => "ingest",
            PipelineError::InvalidInput(_) => "invalid_input",
            PipelineError::Config(_) => "config",
            PipelineError::Contract(_) => "contract",
            PipelineError::Io(_) => "io",
            PipelineError::Serialization(_) => "serialization",
            PipelineError::Http(_) => "http",
            PipelineError::Generic(_) => "generic",
            PipelineError::NotFound(_) => "not_found",
        }
    }

    /// Short error-kind name used in fallback warnings
    pub fn kind_name(&self) -> &'static str {
        match self {
            PipelineError::Ingest(IngestError::EmbeddingCoverage { .. }) => "EmbeddingCoverage",
            PipelineError::Ingest(_) => "Ingest",
            PipelineError::InvalidInput(_) => "InvalidInput",
            PipelineError::Config(_) => "Config",
            PipelineError::Contract(_) => "Contract",
            PipelineError::Io(_) => "Io",
            PipelineError::Serialization(_) => "Serialization",
            PipelineError::Http(_) => "Http",
            PipelineError::Generic(_) => "Generic",
            PipelineError::NotFound(_) => "NotFound",
        }
    }
}
