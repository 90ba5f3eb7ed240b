//! Hybrid retrieval over the persisted chunk corpus

pub mod engine;
pub mod keyword;
pub mod vector;

pub use engine::{
    anchor_terms, snippet, EvidenceHit, Intent, RetrievalEngine, SearchInput, SearchOutput,
};
pub use keyword::Bm25KeywordSearch;
pub use vector::{HashVectorSearch, MetadataVectorSearch};
