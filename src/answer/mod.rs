//! Grounded answer composition and structured output

pub mod compose;
pub mod structured;

pub use compose::{
    build_agent_tools, compose_from_hits, confidence_from_hits, AgenticRunInfo, AnswerCitation,
    AnswerComposer, AnswerInput, AnswerOutput, CLOSEST_EVIDENCE_PREFIX, NOT_FOUND_TEXT,
};
pub use structured::enforce_structured_output;
