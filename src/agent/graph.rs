//! Bounded state graph: plan → execute loop → finalize
//!
//! The runner drives the node graph through a small in-crate executor; if
//! graph assembly or invocation fails it re-executes the identical node
//! logic as a direct loop, so callers always get a shape-identical output
//! and never see an error.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::agent::planner::{Planner, TOOL_DRAFT_ANSWER, TOOL_SEARCH_EVIDENCE};
use crate::agent::state::{
    AgenticAnswerState, GraphRunLimits, GraphRunOutput, PlanStep, TerminatedReason, ToolCallRecord,
};
use crate::agent::tools::{ToolExecutionResult, ToolExecutor};
use crate::answer::compose::{compose_from_hits, confidence_from_hits};
use crate::ports::{Llm, LlmEvidence, TraceSink};
use crate::retrieval::EvidenceHit;

const END: &str = "__end__";

type NodeFn =
    Box<dyn Fn(AgenticAnswerState) -> BoxFuture<'static, anyhow::Result<AgenticAnswerState>> + Send + Sync>;
type RouterFn = Box<dyn Fn(&AgenticAnswerState) -> String + Send + Sync>;

/// Minimal node-graph executor: named nodes, unconditional edges, and
/// per-node routers for conditional transitions.
pub(crate) struct StateGraph {
    entry: String,
    nodes: HashMap<String, NodeFn>,
    edges: HashMap<String, String>,
    routers: HashMap<String, RouterFn>,
    max_transitions: usize,
}

impl StateGraph {
    pub(crate) fn new(entry: &str) -> Self {
        Self {
            entry: entry.to_string(),
            nodes: HashMap::new(),
            edges: HashMap::new(),
            routers: HashMap::new(),
            max_transitions: 10_000,
        }
    }

    pub(crate) fn add_node(&mut self, name: &str, node: NodeFn) {
        self.nodes.insert(name.to_string(), node);
    }

    pub(crate) fn add_edge(&mut self, from: &str, to: &str) {
        self.edges.insert(from.to_string(), to.to_string());
    }

    pub(crate) fn add_router(&mut self, from: &str, router: RouterFn) {
        self.routers.insert(from.to_string(), router);
    }

    pub(crate) async fn invoke(
        &self,
        state: AgenticAnswerState,
    ) -> anyhow::Result<AgenticAnswerState> {
        let mut current = self.entry.clone();
        let mut state = state;
        let mut transitions = 0usize;

        while current != END {
            let node = self
                .nodes
                .get(&current)
                .ok_or_else(|| anyhow::anyhow!("unknown graph node `{}`", current))?;
            state = node(state).await?;

            transitions += 1;
            if transitions > self.max_transitions {
                anyhow::bail!("graph transition limit exceeded at node `{}`", current);
            }

            current = if let Some(router) = self.routers.get(&current) {
                router(&state)
            } else if let Some(next) = self.edges.get(&current) {
                next.clone()
            } else {
                END.to_string()
            };
        }
        Ok(state)
    }
}

/// Shared node logic used by both the graph path and the direct fallback
struct GraphCore {
    planner: Arc<dyn Planner>,
    tools: Arc<ToolExecutor>,
    llm: Option<Arc<dyn Llm>>,
    trace: Option<Arc<dyn TraceSink>>,
    limits: GraphRunLimits,
}

impl GraphCore {
    fn log(&self, event: &str, payload: Value) {
        if let Some(trace) = &self.trace {
            let mut record = json!({
                "ts": Utc::now().to_rfc3339(),
                "event": event,
            });
            if let (Some(record_map), Value::Object(extra)) = (record.as_object_mut(), payload) {
                for (key, value) in extra {
                    record_map.insert(key, value);
                }
            }
            trace.log(&record);
        }
    }

    async fn apply_plan(&self, mut state: AgenticAnswerState) -> AgenticAnswerState {
        let max_steps = self
            .limits
            .max_iterations
            .min(self.limits.max_tool_calls)
            .max(1);
        let mut plan = self
            .planner
            .create_plan(&state.query, state.intent, state.doc_id.as_deref(), max_steps)
            .await;

        if !plan.iter().any(|step| step.tool_name == TOOL_SEARCH_EVIDENCE) {
            // Retrieval must precede drafting to preserve grounding.
            plan.insert(
                0,
                PlanStep::new(
                    "auto_search",
                    TOOL_SEARCH_EVIDENCE,
                    "Retrieve evidence before drafting the answer.",
                ),
            );
            plan.truncate(max_steps);
        }

        state.plan_steps = plan;
        state.plan_index = 0;
        state.done = state.plan_steps.is_empty();
        if state.done {
            state.terminated_reason = TerminatedReason::EmptyPlan;
        }

        self.log(
            "plan_generated",
            json!({
                "query": state.query,
                "doc_id": state.doc_id,
                "plan_steps": state.plan_steps,
            }),
        );
        state
    }

    fn build_tool_args(state: &AgenticAnswerState) -> Map<String, Value> {
        let mut args = Map::new();
        args.insert("query".to_string(), json!(state.query));
        args.insert("doc_id".to_string(), json!(state.doc_id));
        args.insert("top_n".to_string(), json!(state.top_n));
        args.insert("top_k_keyword".to_string(), json!(state.top_k_keyword));
        args.insert("top_k_vector".to_string(), json!(state.top_k_vector));
        args.insert(
            "rerank_pool_size".to_string(),
            json!(state.rerank_pool_size),
        );
        args
    }

    fn merge_hits(existing: Vec<EvidenceHit>, incoming: Vec<EvidenceHit>) -> Vec<EvidenceHit> {
        let mut order: Vec<String> = Vec::new();
        let mut by_chunk: HashMap<String, EvidenceHit> = HashMap::new();

        for hit in existing.into_iter().chain(incoming) {
            if hit.chunk_id.is_empty() {
                continue;
            }
            match by_chunk.get(&hit.chunk_id) {
                Some(current) if current.score >= hit.score => {}
                Some(_) => {
                    by_chunk.insert(hit.chunk_id.clone(), hit);
                }
                None => {
                    order.push(hit.chunk_id.clone());
                    by_chunk.insert(hit.chunk_id.clone(), hit);
                }
            }
        }

        let mut merged: Vec<EvidenceHit> = order
            .into_iter()
            .filter_map(|chunk_id| by_chunk.remove(&chunk_id))
            .collect();
        merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        merged
    }

    fn apply_tool_result(state: &mut AgenticAnswerState, result: &ToolExecutionResult) {
        let mut payload_keys: Vec<String> = result.payload.keys().cloned().collect();
        payload_keys.sort();
        state.tool_calls.push(ToolCallRecord {
            tool_name: result.tool_name.clone(),
            success: result.success,
            error: result.error.clone(),
            payload_keys,
        });

        if !result.success {
            let detail = result.error.clone().unwrap_or_else(|| "unknown error".to_string());
            state.errors.push(detail.clone());
            state
                .warnings
                .push(format!("Tool failed: {}: {}", result.tool_name, detail));
            return;
        }

        if result.tool_name == TOOL_SEARCH_EVIDENCE {
            let incoming: Vec<EvidenceHit> = result
                .payload
                .get("hits")
                .and_then(Value::as_array)
                .map(|rows| {
                    rows.iter()
                        .filter_map(|row| serde_json::from_value(row.clone()).ok())
                        .collect()
                })
                .unwrap_or_default();

            let merged = Self::merge_hits(std::mem::take(&mut state.evidence_hits), incoming);
            let keep = state.top_n.max(1) * 2;
            state.evidence_hits = merged.into_iter().take(keep.max(state.top_n)).collect();
            state.retrieved_chunk_ids = state
                .evidence_hits
                .iter()
                .map(|hit| hit.chunk_id.clone())
                .collect();
            let scanned = result
                .payload
                .get("total_chunks_scanned")
                .and_then(Value::as_u64)
                .unwrap_or(0) as usize;
            state.total_chunks_scanned = state.total_chunks_scanned.max(scanned);
            if let Some(intent) = result
                .payload
                .get("intent")
                .and_then(Value::as_str)
                .and_then(|s| s.parse().ok())
            {
                state.intent = intent;
            }
        }

        if result.tool_name == TOOL_DRAFT_ANSWER {
            if let Some(draft) = result.payload.get("answer_draft").and_then(Value::as_str) {
                let draft = draft.trim();
                if !draft.is_empty() {
                    state.answer_draft = draft.to_string();
                }
            }
        }
    }

    async fn execute_step(
        &self,
        mut state: AgenticAnswerState,
        started: Instant,
    ) -> AgenticAnswerState {
        if state.iterations >= self.limits.max_iterations {
            state.done = true;
            state.terminated_reason = TerminatedReason::MaxIterations;
            return state;
        }
        if state.tool_call_count >= self.limits.max_tool_calls {
            state.done = true;
            state.terminated_reason = TerminatedReason::MaxToolCalls;
            return state;
        }
        if state.plan_index >= state.plan_steps.len() {
            state.done = true;
            state.terminated_reason = TerminatedReason::Completed;
            return state;
        }
        if started.elapsed().as_secs_f64() >= self.limits.timeout_seconds {
            state.done = true;
            state.terminated_reason = TerminatedReason::Timeout;
            return state;
        }

        let step = state.plan_steps[state.plan_index].clone();
        let tool_name = step.tool_name.trim().to_string();
        if tool_name.is_empty() {
            state.plan_index += 1;
            state.iterations += 1;
            return state;
        }

        let args = Self::build_tool_args(&state);
        let mut argument_keys: Vec<String> = args.keys().cloned().collect();
        argument_keys.sort();

        let result = self.tools.execute(&tool_name, &args).await;
        Self::apply_tool_result(&mut state, &result);

        state.plan_index += 1;
        state.iterations += 1;
        state.tool_call_count += 1;
        if state.plan_index >= state.plan_steps.len() {
            state.done = true;
            state.terminated_reason = TerminatedReason::Completed;
        }

        self.log(
            "tool_executed",
            json!({
                "query": state.query,
                "step": step,
                "argument_keys": argument_keys,
                "success": result.success,
                "error": result.error,
                "tool_calls": state.tool_call_count,
                "iterations": state.iterations,
            }),
        );
        state
    }

    fn llm_evidence(hits: &[EvidenceHit]) -> Vec<LlmEvidence> {
        hits.iter()
            .take(12)
            .map(|hit| LlmEvidence {
                doc_id: hit.doc_id.clone(),
                page_start: hit.page_start,
                page_end: hit.page_end,
                content_type: hit.content_type,
                text: hit.snippet.clone(),
            })
            .collect()
    }

    async fn finalize(&self, mut state: AgenticAnswerState) -> AgenticAnswerState {
        let mut draft = state.answer_draft.trim().to_string();

        if draft.is_empty() && !state.evidence_hits.is_empty() {
            if let Some(llm) = &self.llm {
                match llm
                    .generate_answer(
                        &state.query,
                        state.intent.as_str(),
                        &Self::llm_evidence(&state.evidence_hits),
                    )
                    .await
                {
                    Ok(text) => draft = text.trim().to_string(),
                    Err(e) => {
                        state.warnings.push(format!("LLM draft failed: {}", e));
                    }
                }
            }
        }

        if draft.is_empty() {
            draft = compose_from_hits(&state.evidence_hits);
        }

        if state.evidence_hits.is_empty() && state.status == crate::domain::AnswerStatus::Ok {
            state.status = crate::domain::AnswerStatus::NotFound;
        }

        state.answer_draft = draft;
        state.confidence = confidence_from_hits(&state.evidence_hits, state.status);

        if state.reasoning_summary.is_none() {
            let tools: Vec<&str> = state
                .plan_steps
                .iter()
                .map(|step| step.tool_name.as_str())
                .filter(|name| !name.is_empty())
                .collect();
            if !tools.is_empty() {
                state.reasoning_summary =
                    Some(format!("Plan executed with tools: {}", tools.join(", ")));
            }
        }

        self.log(
            "graph_finalized",
            json!({
                "query": state.query,
                "status": state.status,
                "confidence": state.confidence,
                "iterations": state.iterations,
                "tool_calls": state.tool_call_count,
                "terminated_reason": state.terminated_reason,
            }),
        );
        state
    }
}

/// Runs the bounded agent graph for one request
pub struct GraphRunner {
    core: Arc<GraphCore>,
}

impl GraphRunner {
    pub fn new(
        planner: Arc<dyn Planner>,
        tools: Arc<ToolExecutor>,
        llm: Option<Arc<dyn Llm>>,
        limits: GraphRunLimits,
    ) -> Self {
        Self {
            core: Arc::new(GraphCore {
                planner,
                tools,
                llm,
                trace: None,
                limits,
            }),
        }
    }

    pub fn with_trace(mut self, trace: Arc<dyn TraceSink>) -> Self {
        let core = Arc::get_mut(&mut self.core).expect("runner not yet shared");
        core.trace = Some(trace);
        self
    }

    /// Execute plan → execute loop → finalize. Never fails: a graph error
    /// falls back to the direct loop over the same node logic.
    pub async fn run(&self, initial_state: AgenticAnswerState) -> GraphRunOutput {
        match self.run_with_graph(initial_state.clone()).await {
            Ok(state) => Self::into_output(state),
            Err(e) => {
                warn!("graph execution failed, using direct loop: {}", e);
                let state = self.run_direct(initial_state).await;
                Self::into_output(state)
            }
        }
    }

    async fn run_with_graph(
        &self,
        initial_state: AgenticAnswerState,
    ) -> anyhow::Result<AgenticAnswerState> {
        let mut graph = StateGraph::new("plan");
        // Execution timer starts after planning so planner latency does not
        // count toward the run timeout.
        let timer: Arc<StdMutex<Instant>> = Arc::new(StdMutex::new(Instant::now()));

        let core = self.core.clone();
        let plan_timer = timer.clone();
        graph.add_node(
            "plan",
            Box::new(move |state| {
                let core = core.clone();
                let plan_timer = plan_timer.clone();
                Box::pin(async move {
                    let state = core.apply_plan(state).await;
                    *plan_timer.lock().expect("timer lock") = Instant::now();
                    Ok(state)
                })
            }),
        );

        let core = self.core.clone();
        let exec_timer = timer.clone();
        graph.add_node(
            "execute",
            Box::new(move |state| {
                let core = core.clone();
                let started = *exec_timer.lock().expect("timer lock");
                Box::pin(async move { Ok(core.execute_step(state, started).await) })
            }),
        );

        let core = self.core.clone();
        graph.add_node(
            "finalize",
            Box::new(move |state| {
                let core = core.clone();
                Box::pin(async move { Ok(core.finalize(state).await) })
            }),
        );

        graph.add_edge("plan", "execute");
        graph.add_router(
            "execute",
            Box::new(|state| {
                if state.done {
                    "finalize".to_string()
                } else {
                    "execute".to_string()
                }
            }),
        );
        graph.add_edge("finalize", END);

        graph.invoke(initial_state).await
    }

    async fn run_direct(&self, initial_state: AgenticAnswerState) -> AgenticAnswerState {
        debug!("running agent loop without graph executor");
        let mut state = self.core.apply_plan(initial_state).await;
        let started = Instant::now();
        while !state.done {
            state = self.core.execute_step(state, started).await;
        }
        self.core.finalize(state).await
    }

    fn into_output(state: AgenticAnswerState) -> GraphRunOutput {
        GraphRunOutput {
            iterations: state.iterations,
            tool_calls: state.tool_call_count,
            terminated_reason: state.terminated_reason,
            state,
        }
    }
}
