//! Plan generation for the agent graph
//!
//! The rule planner is deterministic and always available; the LLM planner
//! wraps it, parsing a JSON-array plan out of a model completion and
//! falling back to the rules whenever the response is unusable.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use crate::agent::state::PlanStep;
use crate::ports::{ChatModel, TraceSink};
use crate::retrieval::Intent;

pub const TOOL_SEARCH_EVIDENCE: &str = "search_evidence";
pub const TOOL_DRAFT_ANSWER: &str = "draft_answer";

/// Produces a bounded plan of tool invocations
#[async_trait]
pub trait Planner: Send + Sync {
    async fn create_plan(
        &self,
        query: &str,
        intent: Intent,
        doc_id: Option<&str>,
        max_steps: usize,
    ) -> Vec<PlanStep>;
}

/// Deterministic planner driven by query surface features
#[derive(Debug, Clone, Default)]
pub struct RulePlanner;

impl RulePlanner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Planner for RulePlanner {
    async fn create_plan(
        &self,
        query: &str,
        _intent: Intent,
        _doc_id: Option<&str>,
        max_steps: usize,
    ) -> Vec<PlanStep> {
        let budget = max_steps.max(1);
        let lower = query.to_lowercase();
        let padded = format!(" {} ", lower);
        let is_comparison = lower.contains("compare")
            || lower.contains("difference")
            || padded.contains(" versus ")
            || padded.contains(" vs ");
        let wants_visual = ["diagram", "figure", "image", "callout", "visual", "multimodal"]
            .iter()
            .any(|token| lower.contains(token));
        let wants_table = ["table", "spec", "parameter", "setting"]
            .iter()
            .any(|token| lower.contains(token));

        let mut steps = vec![PlanStep::new(
            "step_1",
            TOOL_SEARCH_EVIDENCE,
            "Retrieve top evidence for the query.",
        )];

        if budget >= steps.len() + 1 && (wants_visual || wants_table) {
            let focus = if wants_visual && wants_table {
                "visual and table evidence"
            } else if wants_visual {
                "visual evidence"
            } else {
                "table evidence"
            };
            steps.push(PlanStep::new(
                format!("step_{}", steps.len() + 1),
                TOOL_SEARCH_EVIDENCE,
                format!("Run a focused retrieval pass for {}.", focus),
            ));
        }

        if budget >= steps.len() + 1 && is_comparison {
            steps.push(PlanStep::new(
                format!("step_{}", steps.len() + 1),
                TOOL_SEARCH_EVIDENCE,
                "Run a second retrieval pass to improve comparison coverage.",
            ));
        }

        if budget >= steps.len() + 1 {
            steps.push(PlanStep::new(
                format!("step_{}", steps.len() + 1),
                TOOL_DRAFT_ANSWER,
                "Draft grounded answer from retrieved evidence.",
            ));
        }

        steps.truncate(budget);
        steps
    }
}

/// LLM-backed planner with a JSON-array protocol and deterministic fallback
pub struct LlmPlanner {
    model: Arc<dyn ChatModel>,
    fallback: RulePlanner,
    trace: Option<Arc<dyn TraceSink>>,
}

impl LlmPlanner {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self {
            model,
            fallback: RulePlanner::new(),
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: Arc<dyn TraceSink>) -> Self {
        self.trace = Some(trace);
        self
    }

    fn prompt(query: &str, intent: Intent, doc_id: Option<&str>, budget: usize) -> String {
        format!(
            "You are a planning component for a manual QA agent.\n\
             Return ONLY a JSON array of steps.\n\
             Each step object must have: step_id, tool_name, objective.\n\
             Allowed tool_name values: search_evidence, draft_answer.\n\
             Max steps: {}.\n\
             Intent: {}.\n\
             Doc filter: {}.\n\
             Question: {}\n",
            budget,
            intent,
            doc_id.unwrap_or("none"),
            query
        )
    }

    fn extract_first_json_array(text: &str) -> Option<Vec<Value>> {
        let start = text.find('[')?;
        let end = text.rfind(']')?;
        if end <= start {
            return None;
        }
        let parsed: Value = serde_json::from_str(&text[start..=end]).ok()?;
        match parsed {
            Value::Array(rows) => Some(rows.into_iter().filter(|row| row.is_object()).collect()),
            _ => None,
        }
    }

    fn as_plan_steps(rows: &[Value], max_steps: usize) -> Vec<PlanStep> {
        let mut out = Vec::new();
        for (idx, row) in rows.iter().enumerate() {
            let tool_name = row
                .get("tool_name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_string();
            if tool_name.is_empty() {
                continue;
            }
            let objective = row
                .get("objective")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("Run {}", tool_name));
            let step_id = row
                .get("step_id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("step_{}", idx + 1));
            out.push(PlanStep::new(step_id, tool_name, objective));
            if out.len() >= max_steps {
                break;
            }
        }
        out
    }

    fn log_discarded(&self, query: &str, response: &str) {
        if let Some(trace) = &self.trace {
            trace.log(&json!({
                "ts": Utc::now().to_rfc3339(),
                "event": "planner_response_discarded",
                "query": query,
                "response_preview": response.chars().take(240).collect::<String>(),
            }));
        }
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn create_plan(
        &self,
        query: &str,
        intent: Intent,
        doc_id: Option<&str>,
        max_steps: usize,
    ) -> Vec<PlanStep> {
        let budget = max_steps.max(1);
        let prompt = Self::prompt(query, intent, doc_id, budget);

        match self.model.complete(&prompt).await {
            Ok(response) => {
                if let Some(rows) = Self::extract_first_json_array(&response) {
                    let parsed = Self::as_plan_steps(&rows, budget);
                    if !parsed.is_empty() {
                        return parsed;
                    }
                }
                self.log_discarded(query, &response);
            }
            Err(e) => {
                self.log_discarded(query, &format!("<completion failed: {}>", e));
            }
        }

        self.fallback
            .create_plan(query, intent, doc_id, budget)
            .await
    }
}
