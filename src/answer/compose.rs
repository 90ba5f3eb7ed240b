//! Grounded answer composition
//!
//! Applies the grounding policy over retrieval (or agent-graph) output:
//! ambiguity follow-ups, the insufficient-evidence test, citation
//! thresholding and minimum-field enforcement, confidence tiers, optional
//! LLM drafting, structured output, and answer tracing.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::agent::graph::GraphRunner;
use crate::agent::state::{AgenticAnswerState, TerminatedReason};
use crate::agent::tools::ToolDefinition;
use crate::answer::structured::enforce_structured_output;
use crate::domain::{
    has_minimum_citation_fields, is_answer_grounded, AnswerStatus, Citation, Confidence,
};
use crate::ports::{Llm, LlmEvidence, TraceSink};
use crate::retrieval::{EvidenceHit, Intent, RetrievalEngine, SearchInput, SearchOutput};

/// Fixed sentinel for answers with no grounded evidence
pub const NOT_FOUND_TEXT: &str = "Not found in provided manuals based on retrieved evidence.";

/// Lead-in for insufficient-evidence summaries
pub const CLOSEST_EVIDENCE_PREFIX: &str =
    "Direct answer is not explicitly stated. Closest grounded evidence:";

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z0-9]+").expect("token pattern"));

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "do", "does", "for", "from", "how", "i",
    "in", "is", "it", "mean", "of", "on", "or", "recommended", "should", "that", "the", "to",
    "what", "when", "where", "which", "why", "with",
];

const AMBIGUOUS_HINTS: &[&str] = &[
    "my equipment",
    "my unit",
    "my machine",
    "this equipment",
    "this unit",
    "it trips",
    "it fails",
    "it alarms",
    "it will not",
    "it won't",
];

/// Stop-filtered, alias-normalized, singularized content tokens
pub(crate) fn content_tokens(text: &str) -> HashSet<String> {
    let mut out = HashSet::new();
    for m in TOKEN_RE.find_iter(&text.to_lowercase()) {
        let raw = m.as_str();
        let aliased = match raw {
            "vs" => "versus",
            "meaning" | "mean" => "description",
            "parameter" => "setting",
            "parameters" => "settings",
            other => other,
        };
        let token = if aliased.len() > 4 && aliased.ends_with('s') {
            &aliased[..aliased.len() - 1]
        } else {
            aliased
        };
        if token.len() <= 1 || STOPWORDS.contains(&token) {
            continue;
        }
        out.insert(token.to_string());
    }
    out
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Compose a short answer from the top three hit snippets.
pub fn compose_from_hits(hits: &[EvidenceHit]) -> String {
    let points: Vec<&str> = hits
        .iter()
        .take(3)
        .map(|hit| hit.snippet.trim())
        .filter(|snippet| !snippet.is_empty())
        .collect();
    match points.len() {
        0 => NOT_FOUND_TEXT.to_string(),
        1 => points[0].to_string(),
        _ => points
            .iter()
            .enumerate()
            .map(|(idx, value)| format!("{}. {}", idx + 1, value))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Confidence tier from the best fused score.
pub fn confidence_from_hits(hits: &[EvidenceHit], status: AnswerStatus) -> Confidence {
    if status != AnswerStatus::Ok || hits.is_empty() {
        return Confidence::Low;
    }
    let best = hits[0].score;
    if best >= 0.60 {
        Confidence::High
    } else if best >= 0.35 {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}

/// Citation payload with a display label
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerCitation {
    pub doc_id: String,
    pub page: u32,
    #[serde(default)]
    pub section_path: Option<String>,
    #[serde(default)]
    pub figure_id: Option<String>,
    #[serde(default)]
    pub table_id: Option<String>,
    pub label: String,
}

impl From<&Citation> for AnswerCitation {
    fn from(citation: &Citation) -> Self {
        Self {
            doc_id: citation.doc_id.clone(),
            page: citation.page,
            section_path: citation.section_path.clone(),
            figure_id: citation.figure_id.clone(),
            table_id: citation.table_id.clone(),
            label: citation.label(),
        }
    }
}

/// Accounting block present when the agent graph answered the request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgenticRunInfo {
    pub iterations: usize,
    pub tool_calls: usize,
    pub terminated_reason: TerminatedReason,
}

/// Question-answering request
#[derive(Debug, Clone)]
pub struct AnswerInput {
    pub query: String,
    pub doc_id: Option<String>,
    pub top_n: usize,
    pub top_k_keyword: usize,
    pub top_k_vector: usize,
    pub rerank_pool_size: usize,
    pub enforce_structured_output: bool,
}

impl AnswerInput {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            doc_id: None,
            top_n: 6,
            top_k_keyword: 20,
            top_k_vector: 20,
            rerank_pool_size: 24,
            enforce_structured_output: false,
        }
    }

    pub fn with_doc_id(mut self, doc_id: impl Into<String>) -> Self {
        self.doc_id = Some(doc_id.into());
        self
    }

    pub fn structured(mut self) -> Self {
        self.enforce_structured_output = true;
        self
    }
}

/// Composed answer response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerOutput {
    pub query: String,
    pub intent: Intent,
    pub status: AnswerStatus,
    pub confidence: Confidence,
    pub answer: String,
    pub follow_up_question: Option<String>,
    pub warnings: Vec<String>,
    pub total_chunks_scanned: usize,
    pub retrieved_chunk_ids: Vec<String>,
    pub citations: Vec<AnswerCitation>,
    pub reasoning_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agentic: Option<AgenticRunInfo>,
}

/// Builds the search/draft tool set the agent graph dispatches to.
pub fn build_agent_tools(retrieval: Arc<RetrievalEngine>) -> Vec<ToolDefinition> {
    let search_retrieval = retrieval;
    let search = ToolDefinition::new(
        "search_evidence",
        "Hybrid retrieval over the manual corpus",
        &["query"],
        Arc::new(move |args: Map<String, Value>| {
            let retrieval = search_retrieval.clone();
            Box::pin(async move {
                let query = args
                    .get("query")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let mut input = SearchInput::new(query);
                input.doc_id = args
                    .get("doc_id")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                if let Some(top_n) = args.get("top_n").and_then(Value::as_u64) {
                    input.top_n = top_n as usize;
                }
                if let Some(k) = args.get("top_k_keyword").and_then(Value::as_u64) {
                    input.top_k_keyword = k as usize;
                }
                if let Some(k) = args.get("top_k_vector").and_then(Value::as_u64) {
                    input.top_k_vector = k as usize;
                }
                if let Some(pool) = args.get("rerank_pool_size").and_then(Value::as_u64) {
                    input.rerank_pool_size = pool as usize;
                }
                let output = retrieval.search(&input).await;
                Ok(serde_json::to_value(output)?)
            })
        }),
    );

    let draft = ToolDefinition::new(
        "draft_answer",
        "Draft the grounded answer from accumulated evidence",
        &["query"],
        // Drafting happens at finalize where the evidence lives; the step
        // exists so plans express the retrieve-then-draft ordering.
        Arc::new(|_args| Box::pin(async move { Ok(json!({})) })),
    );

    vec![search, draft]
}

/// Grounded question answering over hybrid retrieval, with optional
/// agent-graph orchestration
pub struct AnswerComposer {
    retrieval: Arc<RetrievalEngine>,
    llm: Option<Arc<dyn Llm>>,
    graph: Option<Arc<GraphRunner>>,
    trace: Option<Arc<dyn TraceSink>>,
}

impl AnswerComposer {
    pub fn new(retrieval: Arc<RetrievalEngine>) -> Self {
        Self {
            retrieval,
            llm: None,
            graph: None,
            trace: None,
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn Llm>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Injecting a graph runner engages agentic mode for every request.
    pub fn with_graph_runner(mut self, graph: Arc<GraphRunner>) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn with_trace(mut self, trace: Arc<dyn TraceSink>) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Answer a question. Adapter failures surface as warnings; this method
    /// never fails a request.
    pub async fn answer(&self, input: &AnswerInput) -> AnswerOutput {
        let mut warnings: Vec<String> = Vec::new();
        let mut agentic: Option<AgenticRunInfo> = None;
        let mut external_draft: Option<String> = None;
        let mut reasoning_summary: Option<String> = None;

        let evidence: SearchOutput = match &self.graph {
            Some(graph) => {
                let state = AgenticAnswerState {
                    query: input.query.clone(),
                    doc_id: input.doc_id.clone(),
                    top_n: input.top_n,
                    top_k_keyword: input.top_k_keyword,
                    top_k_vector: input.top_k_vector,
                    rerank_pool_size: input.rerank_pool_size,
                    ..AgenticAnswerState::new(input.query.clone())
                };
                let run = graph.run(state).await;
                warnings.extend(run.state.warnings.clone());
                agentic = Some(AgenticRunInfo {
                    iterations: run.iterations,
                    tool_calls: run.tool_calls,
                    terminated_reason: run.terminated_reason,
                });
                reasoning_summary = run.state.reasoning_summary.clone();
                let draft = run.state.answer_draft.trim().to_string();
                if !draft.is_empty() {
                    external_draft = Some(draft);
                }
                SearchOutput {
                    query: run.state.query,
                    intent: run.state.intent,
                    total_chunks_scanned: run.state.total_chunks_scanned,
                    hits: run.state.evidence_hits,
                }
            }
            None => {
                let mut search = SearchInput::new(input.query.clone());
                search.doc_id = input.doc_id.clone();
                search.top_n = input.top_n;
                search.top_k_keyword = input.top_k_keyword;
                search.top_k_vector = input.top_k_vector;
                search.rerank_pool_size = input.rerank_pool_size;
                self.retrieval.search(&search).await
            }
        };

        let hits = &evidence.hits;
        let follow_up = build_follow_up_question(&input.query, hits, input.doc_id.as_deref());
        let insufficient = is_insufficient_evidence(&input.query, hits);

        let mut status = AnswerStatus::Ok;
        let mut answer_text = external_draft
            .clone()
            .unwrap_or_else(|| compose_from_hits(hits));

        if insufficient {
            status = AnswerStatus::NotFound;
            answer_text = closest_evidence_answer(hits);
            warnings.push("Insufficient evidence to provide a grounded direct answer.".to_string());
        }

        if follow_up.is_some() {
            status = AnswerStatus::NeedsFollowUp;
            warnings
                .push("Query appears ambiguous across manuals or equipment variants.".to_string());
        }

        if status == AnswerStatus::Ok && external_draft.is_none() {
            if let Some(llm) = &self.llm {
                match llm
                    .generate_answer(&input.query, evidence.intent.as_str(), &llm_evidence(hits))
                    .await
                {
                    Ok(text) if !text.trim().is_empty() => answer_text = text.trim().to_string(),
                    Ok(_) => {}
                    Err(e) => {
                        warnings.push(format!("LLM draft failed: {}", e));
                    }
                }
            }
        }

        // Citation thresholding, then minimum-field enforcement.
        let mut citations = build_citations(hits);
        if !has_minimum_citation_fields(&citations) {
            citations.retain(|c| !c.doc_id.is_empty() && c.page > 0);
            warnings.push("Dropped invalid citations failing minimum schema checks.".to_string());
        }

        if status == AnswerStatus::Ok && !is_answer_grounded(&citations) {
            status = AnswerStatus::NotFound;
            answer_text = NOT_FOUND_TEXT.to_string();
            warnings.push("No citations available for grounded answer.".to_string());
        }

        let mut confidence = confidence_from_hits(hits, status);
        if status == AnswerStatus::Ok && confidence == Confidence::Low {
            let q_tokens = content_tokens(&input.query);
            let upgraded = hits.iter().take(5).any(|hit| {
                hit.rerank_score.unwrap_or(0.0) >= 0.60
                    && jaccard(&q_tokens, &content_tokens(&hit.snippet)) >= 0.20
            });
            if upgraded {
                confidence = Confidence::Medium;
            }
        }

        if input.enforce_structured_output {
            answer_text = enforce_structured_output(&answer_text, status, hits, &warnings);
        }

        let output = AnswerOutput {
            query: evidence.query.clone(),
            intent: evidence.intent,
            status,
            confidence,
            answer: answer_text,
            follow_up_question: follow_up,
            warnings,
            total_chunks_scanned: evidence.total_chunks_scanned,
            retrieved_chunk_ids: hits.iter().map(|h| h.chunk_id.clone()).collect(),
            citations: citations.iter().map(AnswerCitation::from).collect(),
            reasoning_summary,
            agentic,
        };

        self.log_answer(&output, input.doc_id.as_deref());
        output
    }

    fn log_answer(&self, output: &AnswerOutput, doc_id: Option<&str>) {
        let Some(trace) = &self.trace else {
            return;
        };
        let mut payload = json!({
            "ts": Utc::now().to_rfc3339(),
            "query": output.query,
            "intent": output.intent,
            "status": output.status,
            "confidence": output.confidence,
            "doc_id": doc_id,
            "retrieved_chunk_ids": output.retrieved_chunk_ids,
            "citations": output.citations.iter().map(|c| json!({
                "doc_id": c.doc_id,
                "page": c.page,
                "section_path": c.section_path,
                "figure_id": c.figure_id,
                "table_id": c.table_id,
            })).collect::<Vec<_>>(),
            "follow_up_question": output.follow_up_question,
        });
        if let Some(agentic) = &output.agentic {
            if let Some(map) = payload.as_object_mut() {
                map.insert(
                    "agentic".to_string(),
                    json!({
                        "iterations": agentic.iterations,
                        "tool_calls": agentic.tool_calls,
                        "terminated_reason": agentic.terminated_reason,
                    }),
                );
            }
        }
        trace.log(&payload);
    }
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

fn build_follow_up_question(
    query: &str,
    hits: &[EvidenceHit],
    doc_id: Option<&str>,
) -> Option<String> {
    if doc_id.is_some() {
        return None;
    }

    let q = query.to_lowercase();
    let has_hint = AMBIGUOUS_HINTS.iter().any(|hint| q.contains(hint));

    let mut unique_docs: Vec<&str> = hits
        .iter()
        .take(5)
        .map(|hit| hit.doc_id.as_str())
        .filter(|doc| !doc.is_empty())
        .collect();
    unique_docs.sort();
    unique_docs.dedup();
    let multi_doc = unique_docs.len() > 1;

    if !has_hint && !multi_doc {
        return None;
    }
    if multi_doc {
        let preview = unique_docs
            .iter()
            .take(3)
            .copied()
            .collect::<Vec<_>>()
            .join(", ");
        return Some(format!("Which manual/model should I use ({})", preview) + "?");
    }
    Some("Which exact model/manual should I use for this issue?".to_string())
}

fn is_comparison_query(query: &str) -> bool {
    let q = query.to_lowercase();
    let padded = format!(" {} ", q);
    q.contains("compare")
        || q.contains("difference")
        || padded.contains(" vs ")
        || padded.contains(" versus ")
}

struct OverlapStats {
    best: f64,
    best_count: usize,
    aggregate: f64,
}

fn overlap_stats(query: &str, hits: &[EvidenceHit]) -> OverlapStats {
    let q_tokens = content_tokens(query);
    if q_tokens.is_empty() || hits.is_empty() {
        return OverlapStats {
            best: 0.0,
            best_count: 0,
            aggregate: 0.0,
        };
    }

    let mut best = 0.0f64;
    let mut best_count = 0usize;
    let mut union_tokens: HashSet<String> = HashSet::new();
    for hit in hits.iter().take(5) {
        let h_tokens = content_tokens(&hit.snippet);
        let count = q_tokens.intersection(&h_tokens).count();
        best = best.max(jaccard(&q_tokens, &h_tokens));
        best_count = best_count.max(count);
        union_tokens.extend(h_tokens);
    }

    OverlapStats {
        best,
        best_count,
        aggregate: jaccard(&q_tokens, &union_tokens),
    }
}

/// The insufficient-evidence test driving `not_found` demotion.
fn is_insufficient_evidence(query: &str, hits: &[EvidenceHit]) -> bool {
    if hits.is_empty() {
        return true;
    }

    let best_score = hits[0].score;
    let best_keyword = hits
        .iter()
        .take(5)
        .map(|h| h.keyword_score)
        .fold(0.0f64, f64::max);
    let best_vector = hits
        .iter()
        .take(5)
        .map(|h| h.vector_score)
        .fold(0.0f64, f64::max);
    let overlap = overlap_stats(query, hits);
    let q_token_count = content_tokens(query).len();

    if best_score < 0.22 && best_keyword < 0.35 && best_vector < 0.60 {
        return true;
    }
    if is_comparison_query(query) {
        if overlap.aggregate < 0.22
            && overlap.best < 0.10
            && best_vector < 0.70
            && best_keyword < 0.45
        {
            return true;
        }
    } else if overlap.best < 0.15
        && overlap.aggregate < 0.25
        && best_vector < 0.75
        && best_keyword < 0.55
    {
        return true;
    }
    if q_token_count >= 6 && overlap.best_count < 2 && overlap.aggregate < 0.30 {
        return true;
    }
    false
}

fn closest_evidence_answer(hits: &[EvidenceHit]) -> String {
    if hits.is_empty() {
        return NOT_FOUND_TEXT.to_string();
    }
    let points: Vec<String> = hits
        .iter()
        .take(3)
        .map(|hit| hit.snippet.trim())
        .filter(|snippet| !snippet.is_empty())
        .enumerate()
        .map(|(idx, snippet)| format!("{}. {}", idx + 1, snippet))
        .collect();
    if points.is_empty() {
        return NOT_FOUND_TEXT.to_string();
    }
    format!("{}\n{}", CLOSEST_EVIDENCE_PREFIX, points.join("\n"))
}

/// Citations for hits above `max(0.18, top_score * 0.35)`, deduplicated;
/// when nothing clears the threshold the top hit is kept so grounded
/// answers never lose their best reference. Unbounded past thresholding.
fn build_citations(hits: &[EvidenceHit]) -> Vec<Citation> {
    if hits.is_empty() {
        return Vec::new();
    }
    let top_score = hits[0].score;
    let threshold = 0.18f64.max(top_score * 0.35);

    let mut seen: HashSet<(String, u32, Option<String>, Option<String>, Option<String>)> =
        HashSet::new();
    let mut citations: Vec<Citation> = Vec::new();

    for hit in hits {
        if hit.score < threshold {
            continue;
        }
        let citation = citation_from_hit(hit);
        let key = (
            citation.doc_id.clone(),
            citation.page,
            citation.section_path.clone(),
            citation.figure_id.clone(),
            citation.table_id.clone(),
        );
        if seen.insert(key) {
            citations.push(citation);
        }
    }

    if citations.is_empty() {
        citations.push(citation_from_hit(&hits[0]));
    }
    citations
}

fn citation_from_hit(hit: &EvidenceHit) -> Citation {
    let page = if hit.page_start > 0 {
        hit.page_start
    } else {
        hit.page_end.max(1)
    };
    Citation {
        doc_id: hit.doc_id.clone(),
        page,
        section_path: hit.section_path.clone(),
        figure_id: hit.figure_id.clone(),
        table_id: hit.table_id.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ContentType;

    fn hit(chunk_id: &str, doc_id: &str, score: f64, snippet: &str) -> EvidenceHit {
        EvidenceHit {
            chunk_id: chunk_id.to_string(),
            doc_id: doc_id.to_string(),
            content_type: ContentType::Text,
            page_start: 3,
            page_end: 3,
            score,
            keyword_score: score,
            vector_score: score,
            snippet: snippet.to_string(),
            ..EvidenceHit::default()
        }
    }

    #[test]
    fn test_compose_from_hits_shapes() {
        assert_eq!(compose_from_hits(&[]), NOT_FOUND_TEXT);
        let single = compose_from_hits(&[hit("c1", "d1", 0.9, "only point")]);
        assert_eq!(single, "only point");
        let multi = compose_from_hits(&[
            hit("c1", "d1", 0.9, "first"),
            hit("c2", "d1", 0.8, "second"),
        ]);
        assert_eq!(multi, "1. first\n2. second");
    }

    #[test]
    fn test_confidence_tiers() {
        let high = vec![hit("c1", "d1", 0.7, "x")];
        let medium = vec![hit("c1", "d1", 0.4, "x")];
        let low = vec![hit("c1", "d1", 0.1, "x")];
        assert_eq!(confidence_from_hits(&high, AnswerStatus::Ok), Confidence::High);
        assert_eq!(
            confidence_from_hits(&medium, AnswerStatus::Ok),
            Confidence::Medium
        );
        assert_eq!(confidence_from_hits(&low, AnswerStatus::Ok), Confidence::Low);
        assert_eq!(
            confidence_from_hits(&high, AnswerStatus::NotFound),
            Confidence::Low
        );
        assert_eq!(confidence_from_hits(&[], AnswerStatus::Ok), Confidence::Low);
    }

    #[test]
    fn test_follow_up_requires_unscoped_query() {
        let hits = vec![hit("c1", "pump_x", 0.9, "torque value")];
        assert!(build_follow_up_question("my equipment trips", &hits, Some("pump_x")).is_none());
        let question = build_follow_up_question("my equipment trips", &hits, None).unwrap();
        assert_eq!(question.matches('?').count(), 1);
    }

    #[test]
    fn test_follow_up_on_multi_doc_hits() {
        let hits = vec![
            hit("c1", "pump_x", 0.9, "torque value"),
            hit("c2", "press_y", 0.8, "torque value"),
        ];
        let question = build_follow_up_question("torque spec", &hits, None).unwrap();
        assert!(question.contains("press_y"));
        assert!(question.contains("pump_x"));
        assert_eq!(question.matches('?').count(), 1);
    }

    #[test]
    fn test_insufficient_when_no_hits() {
        assert!(is_insufficient_evidence("any question", &[]));
    }

    #[test]
    fn test_insufficient_low_scores() {
        let hits = vec![EvidenceHit {
            score: 0.1,
            keyword_score: 0.2,
            vector_score: 0.3,
            snippet: "torque spec details".to_string(),
            chunk_id: "c1".to_string(),
            doc_id: "d1".to_string(),
            page_start: 1,
            ..EvidenceHit::default()
        }];
        assert!(is_insufficient_evidence("torque spec", &hits));
    }

    #[test]
    fn test_sufficient_with_strong_overlap() {
        let hits = vec![hit(
            "c1",
            "d1",
            0.9,
            "torque specification 45 Nm output flange",
        )];
        assert!(!is_insufficient_evidence("torque specification", &hits));
    }

    #[test]
    fn test_long_gibberish_query_is_insufficient() {
        let hits = vec![hit("c1", "d1", 0.9, "terminal pin enable input wiring")];
        assert!(is_insufficient_evidence(
            "quantum flux capacitor calibration constant arc control input",
            &hits
        ));
    }

    #[test]
    fn test_citation_threshold_and_fallback() {
        let hits = vec![
            hit("c1", "d1", 1.0, "a"),
            hit("c2", "d2", 0.5, "b"),
            hit("c3", "d3", 0.2, "c"),
        ];
        // threshold = max(0.18, 0.35) = 0.35 keeps c1 and c2
        let citations = build_citations(&hits);
        assert_eq!(citations.len(), 2);

        let weak = vec![
            EvidenceHit {
                chunk_id: "c9".to_string(),
                doc_id: "d9".to_string(),
                page_start: 7,
                score: 0.1,
                ..EvidenceHit::default()
            },
            EvidenceHit {
                chunk_id: "c8".to_string(),
                doc_id: "d8".to_string(),
                page_start: 8,
                score: 0.05,
                ..EvidenceHit::default()
            },
        ];
        // threshold = 0.18, nothing clears it, top hit kept
        let citations = build_citations(&weak);
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].doc_id, "d9");
        assert_eq!(citations[0].page, 7);
    }

    #[test]
    fn test_citation_dedup() {
        let a = hit("c1", "d1", 0.9, "a");
        let mut b = hit("c2", "d1", 0.8, "b");
        b.page_start = 3;
        let citations = build_citations(&[a, b]);
        assert_eq!(citations.len(), 1);
    }

    #[test]
    fn test_closest_evidence_answer_prefix() {
        let answer = closest_evidence_answer(&[hit("c1", "d1", 0.5, "nearest snippet")]);
        assert!(answer.starts_with(CLOSEST_EVIDENCE_PREFIX));
        assert!(answer.contains("nearest snippet"));
        assert_eq!(closest_evidence_answer(&[]), NOT_FOUND_TEXT);
    }

    #[test]
    fn test_content_tokens_alias_and_singularize() {
        let tokens = content_tokens("compare parameters meaning of bearings");
        assert!(tokens.contains("setting"));
        assert!(tokens.contains("description"));
        assert!(tokens.contains("bearing"));
        assert!(!tokens.contains("of"));
    }
}
