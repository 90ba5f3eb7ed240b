//! Mutable state threaded through the agent state graph

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{AnswerStatus, Confidence};
use crate::retrieval::{EvidenceHit, Intent};

/// Why a state-graph run stopped
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TerminatedReason {
    #[default]
    Completed,
    MaxIterations,
    MaxToolCalls,
    Timeout,
    EmptyPlan,
}

impl TerminatedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminatedReason::Completed => "completed",
            TerminatedReason::MaxIterations => "max_iterations",
            TerminatedReason::MaxToolCalls => "max_tool_calls",
            TerminatedReason::Timeout => "timeout",
            TerminatedReason::EmptyPlan => "empty_plan",
        }
    }
}

/// Bounds on one state-graph run
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GraphRunLimits {
    pub max_iterations: usize,
    pub max_tool_calls: usize,
    pub timeout_seconds: f64,
}

impl Default for GraphRunLimits {
    fn default() -> Self {
        Self {
            max_iterations: 4,
            max_tool_calls: 6,
            timeout_seconds: 20.0,
        }
    }
}

/// One scheduled tool invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub step_id: String,
    pub tool_name: String,
    pub objective: String,
}

impl PlanStep {
    pub fn new(
        step_id: impl Into<String>,
        tool_name: impl Into<String>,
        objective: impl Into<String>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            tool_name: tool_name.into(),
            objective: objective.into(),
        }
    }
}

/// Log entry for one executed tool call; argument values are never recorded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    pub payload_keys: Vec<String>,
}

/// State threaded through plan → execute → finalize
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgenticAnswerState {
    pub query: String,
    pub doc_id: Option<String>,
    pub intent: Intent,
    pub top_n: usize,
    pub top_k_keyword: usize,
    pub top_k_vector: usize,
    pub rerank_pool_size: usize,
    pub plan_steps: Vec<PlanStep>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub evidence_hits: Vec<EvidenceHit>,
    pub retrieved_chunk_ids: Vec<String>,
    pub answer_draft: String,
    pub status: AnswerStatus,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub confidence: Confidence,
    pub reasoning_summary: Option<String>,
    pub total_chunks_scanned: usize,
    pub metadata: Map<String, Value>,

    // Bookkeeping counters; not part of the public answer payload.
    #[serde(skip)]
    pub(crate) iterations: usize,
    #[serde(skip)]
    pub(crate) tool_call_count: usize,
    #[serde(skip)]
    pub(crate) plan_index: usize,
    #[serde(skip)]
    pub(crate) done: bool,
    #[serde(skip)]
    pub(crate) terminated_reason: TerminatedReason,
}

impl AgenticAnswerState {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            top_n: 6,
            top_k_keyword: 20,
            top_k_vector: 20,
            rerank_pool_size: 24,
            ..Self::default()
        }
    }

    pub fn with_doc_id(mut self, doc_id: impl Into<String>) -> Self {
        self.doc_id = Some(doc_id.into());
        self
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n.max(1);
        self
    }
}

/// Final state plus run accounting
#[derive(Debug, Clone)]
pub struct GraphRunOutput {
    pub state: AgenticAnswerState,
    pub iterations: usize,
    pub tool_calls: usize,
    pub terminated_reason: TerminatedReason,
}
