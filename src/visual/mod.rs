//! Visual artifact triple: generation and contract validation
//!
//! Every ingested document carries `visual_chunks.jsonl`,
//! `visual_embeddings.jsonl`, and `visual_manifest.json` derived from its
//! persisted chunk file. Generation is a pure function of `chunks.jsonl`;
//! validation checks the triple against the `visual-v1` contract.

pub mod generate;
pub mod validate;

pub use generate::{
    build_visual_artifacts, load_chunk_rows, write_visual_artifacts, VisualArtifacts,
};
pub use validate::{validate_visual_artifacts, validate_visual_artifacts_for_doc, ValidationReport};

/// File names of the per-document artifact triple
pub const VISUAL_CHUNKS_FILE: &str = "visual_chunks.jsonl";
pub const VISUAL_EMBEDDINGS_FILE: &str = "visual_embeddings.jsonl";
pub const VISUAL_MANIFEST_FILE: &str = "visual_manifest.json";

/// Contract version stamped into and expected from manifests
pub const CONTRACT_VERSION: &str = "visual-v1";

/// Vision confidence below this without a fallback marker draws a warning
pub const LOW_CONFIDENCE_THRESHOLD: f64 = 0.45;
