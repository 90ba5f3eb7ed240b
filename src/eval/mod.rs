//! Multi-turn golden-question evaluation mechanics
//!
//! Decomposes a multi-turn prompt into per-turn queries, threads prior
//! answers into each turn, rolls the structured answers up into one
//! combined record, and scores grounding / follow-up / keyword
//! expectations.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::answer::{AnswerComposer, AnswerInput, AnswerOutput};
use crate::domain::{AnswerStatus, Document};
use crate::error::{PipelineError, Result};

static STEP_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bstep\s*\d+\s*:\s*").expect("step split pattern"));
static THEN_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bthen\b").expect("then split pattern"));
static SENTENCE_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.?!]\s+").expect("sentence split pattern"));
static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern"));

/// One golden question from the evaluation set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoldenQuestion {
    pub question_id: String,
    pub doc: String,
    #[serde(default)]
    pub intent: String,
    #[serde(default)]
    pub question_type: String,
    #[serde(default)]
    pub difficulty: String,
    #[serde(default)]
    pub rag_mode: String,
    #[serde(default = "default_turn_count")]
    pub turn_count: usize,
    pub question: String,
    #[serde(default)]
    pub expected_keywords: Vec<String>,
    #[serde(default = "default_min_keyword_hits")]
    pub min_keyword_hits: usize,
}

fn default_turn_count() -> usize {
    1
}

fn default_min_keyword_hits() -> usize {
    1
}

#[derive(Debug, Deserialize)]
struct GoldenQuestionFile {
    #[serde(default)]
    questions: Vec<GoldenQuestion>,
}

/// Load golden questions from YAML (either a top-level list or a
/// `questions:` mapping).
pub fn load_golden_questions(path: &Path) -> Result<Vec<GoldenQuestion>> {
    let content = std::fs::read_to_string(path)?;
    if let Ok(questions) = serde_yml::from_str::<Vec<GoldenQuestion>>(&content) {
        return Ok(questions);
    }
    let file: GoldenQuestionFile = serde_yml::from_str(&content)
        .map_err(|e| PipelineError::Config(format!("golden questions YAML: {}", e)))?;
    Ok(file.questions)
}

/// Per-question evaluation record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoldenQuestionEvaluation {
    pub question_id: String,
    pub doc: String,
    pub intent: String,
    pub turn_count: usize,
    pub question: String,
    pub answer_status: String,
    pub has_citation_doc_page: bool,
    pub grounded: bool,
    pub follow_up_expected: bool,
    pub follow_up_ok: bool,
    pub expected_keyword_hits: usize,
    pub expected_keyword_total: usize,
    pub expected_match: bool,
    pub missing_expected_keywords: Vec<String>,
    pub citation_count: usize,
    pub pass_result: bool,
    pub reasons: Vec<String>,
    pub follow_up_question: Option<String>,
    pub planned_turns: usize,
    pub executed_turns: usize,
    pub turn_prompts: Vec<String>,
    pub turn_statuses: Vec<String>,
}

/// Aggregate rollup over an evaluation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub total_questions: usize,
    pub passed_questions: usize,
    pub failed_questions: usize,
    pub pass_rate: f64,
    pub missing_docs: Vec<String>,
    pub results: Vec<GoldenQuestionEvaluation>,
}

/// Split a multi-turn prompt into per-turn prompts.
///
/// Prefers explicit `Step N:` decomposition, then `->` chains, then
/// `then` clauses, then sentences; pads or merges to the planned turn
/// count.
pub fn extract_turn_prompts(question: &GoldenQuestion) -> Vec<String> {
    let planned_turns = question.turn_count.max(1);
    let base = WS_RE.replace_all(question.question.trim(), " ").to_string();
    if base.is_empty() {
        return vec![String::new()];
    }
    if planned_turns == 1 {
        return vec![base];
    }

    let clean = |parts: Vec<&str>| -> Vec<String> {
        parts
            .into_iter()
            .map(|p| p.trim_matches([' ', '.', ';']).to_string())
            .filter(|p| !p.is_empty())
            .collect()
    };

    let mut candidates: Vec<String> = clean(STEP_SPLIT_RE.split(&base).collect());
    if candidates.len() < 2 && base.contains("->") {
        candidates = clean(base.split("->").collect());
    }
    if candidates.len() < 2 {
        let parts = clean(THEN_SPLIT_RE.split(&base).collect());
        if parts.len() >= 2 {
            candidates = parts;
        }
    }
    if candidates.len() < 2 {
        let parts = clean(SENTENCE_SPLIT_RE.split(&base).collect());
        if parts.len() >= 2 {
            candidates = parts;
        }
    }
    if candidates.len() < 2 {
        candidates = vec![base.clone()];
    }

    let mut prompts: Vec<String> = candidates
        .into_iter()
        .map(|p| WS_RE.replace_all(&p, " ").trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    if prompts.is_empty() {
        prompts = vec![base.clone()];
    }

    if prompts.len() > planned_turns {
        let tail = prompts.split_off(planned_turns - 1).join("; ");
        prompts.push(tail);
    }
    while prompts.len() < planned_turns {
        let idx = prompts.len() + 1;
        prompts.push(format!(
            "Continue the same task with step {}. Base task: {}",
            idx, base
        ));
    }
    prompts
}

/// Thread the last two turns of history into the current prompt.
pub fn compose_turn_query(prompt: &str, history: &[(String, String)], turn_index: usize) -> String {
    if turn_index == 0 || history.is_empty() {
        return prompt.to_string();
    }

    let start = history.len().saturating_sub(2);
    let mut lines = vec!["Conversation context from earlier turns:".to_string()];
    for (offset, (prior_prompt, prior_answer)) in history[start..].iter().enumerate() {
        let idx = start + offset + 1;
        let clipped: String = prior_answer.chars().take(800).collect();
        lines.push(format!("Prior turn {} user: {}", idx, prior_prompt));
        lines.push(format!("Prior turn {} assistant: {}", idx, clipped));
    }
    lines.push(format!("Current turn user: {}", prompt));
    lines.join("\n")
}

fn normalize(text: &str) -> String {
    text.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Count expected-keyword hits in the rolled-up answer.
pub fn evaluate_expected_keywords(
    answer_text: &str,
    question: &GoldenQuestion,
) -> (usize, usize, bool, Vec<String>) {
    let expected: Vec<&String> = question
        .expected_keywords
        .iter()
        .filter(|k| !k.is_empty())
        .collect();
    if expected.is_empty() {
        return (0, 0, true, Vec::new());
    }

    let normalized_answer = normalize(answer_text);
    let matched: Vec<&String> = expected
        .iter()
        .filter(|keyword| normalized_answer.contains(&normalize(keyword)))
        .copied()
        .collect();

    let required = question.min_keyword_hits.max(1).min(expected.len());
    let expected_match = matched.len() >= required;
    let missing = expected
        .iter()
        .filter(|k| !matched.contains(*k))
        .map(|k| (*k).clone())
        .collect();
    (matched.len(), expected.len(), expected_match, missing)
}

/// Runs golden questions turn by turn through the answer composer
pub struct MultiTurnEvaluator {
    composer: Arc<AnswerComposer>,
    top_n: usize,
}

impl MultiTurnEvaluator {
    pub fn new(composer: Arc<AnswerComposer>) -> Self {
        Self { composer, top_n: 6 }
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n.max(1);
        self
    }

    async fn run_turn(&self, query: String, doc_id: Option<&str>) -> AnswerOutput {
        let mut input = AnswerInput::new(query).structured();
        input.doc_id = doc_id.map(str::to_string);
        input.top_n = self.top_n;
        self.composer.answer(&input).await
    }

    /// Evaluate one question end to end.
    pub async fn evaluate_question(&self, question: &GoldenQuestion) -> GoldenQuestionEvaluation {
        let doc_id = if question.doc == "multiple" {
            None
        } else {
            Some(question.doc.as_str())
        };

        let turn_prompts = extract_turn_prompts(question);
        let planned_turns = question.turn_count.max(1);
        let mut history: Vec<(String, String)> = Vec::new();
        let mut turn_outputs: Vec<AnswerOutput> = Vec::new();
        let mut turn_statuses: Vec<String> = Vec::new();

        for (idx, prompt) in turn_prompts.iter().enumerate() {
            let turn_query = compose_turn_query(prompt, &history, idx);
            let output = self.run_turn(turn_query, doc_id).await;
            turn_statuses.push(output.status.as_str().to_string());
            history.push((prompt.clone(), output.answer.clone()));
            turn_outputs.push(output);
        }

        let last = turn_outputs.last().expect("at least one turn");
        let combined_answer = if turn_outputs.len() > 1 {
            turn_outputs
                .iter()
                .enumerate()
                .filter(|(_, o)| !o.answer.trim().is_empty())
                .map(|(idx, o)| format!("Turn {} answer: {}", idx + 1, o.answer))
                .collect::<Vec<_>>()
                .join("\n")
        } else {
            last.answer.clone()
        };

        let has_citation_doc_page = !last.citations.is_empty()
            && last
                .citations
                .iter()
                .all(|c| !c.doc_id.is_empty() && c.page > 0);
        let grounded = has_citation_doc_page;
        let follow_up_expected = question.intent == "follow_up_required";
        let follow_up_ok = if follow_up_expected {
            last.status == AnswerStatus::NeedsFollowUp
        } else {
            true
        };

        let (expected_hits, expected_total, expected_match, missing_keywords) =
            evaluate_expected_keywords(&combined_answer, question);

        let mut reasons: Vec<String> = Vec::new();
        if !has_citation_doc_page {
            reasons.push("missing doc/page citation".to_string());
        }
        if !grounded {
            reasons.push("answer not grounded".to_string());
        }
        if follow_up_expected && !follow_up_ok {
            reasons.push("follow-up expected but not returned".to_string());
        }
        if !expected_match {
            reasons.push("expected answer keywords not matched".to_string());
        }
        if turn_outputs.len() < planned_turns {
            reasons.push("insufficient turns executed for multi-turn scenario".to_string());
        }

        GoldenQuestionEvaluation {
            question_id: question.question_id.clone(),
            doc: question.doc.clone(),
            intent: question.intent.clone(),
            turn_count: question.turn_count,
            question: question.question.clone(),
            answer_status: last.status.as_str().to_string(),
            has_citation_doc_page,
            grounded,
            follow_up_expected,
            follow_up_ok,
            expected_keyword_hits: expected_hits,
            expected_keyword_total: expected_total,
            expected_match,
            missing_expected_keywords: missing_keywords,
            citation_count: last.citations.len(),
            pass_result: reasons.is_empty(),
            reasons,
            follow_up_question: last.follow_up_question.clone(),
            planned_turns,
            executed_turns: turn_outputs.len(),
            turn_prompts,
            turn_statuses,
        }
    }

    /// Evaluate a question set against a document catalog; questions whose
    /// document is absent (or not `present`) are recorded as missing.
    pub async fn evaluate_all(
        &self,
        questions: &[GoldenQuestion],
        catalog: Option<&[Document]>,
        doc_id_filter: Option<&str>,
        limit: Option<usize>,
    ) -> EvaluationSummary {
        let mut selected: Vec<&GoldenQuestion> = questions
            .iter()
            .filter(|q| doc_id_filter.map(|d| q.doc == d).unwrap_or(true))
            .collect();
        if let Some(limit) = limit {
            if limit > 0 {
                selected.truncate(limit);
            }
        }

        let available: Option<HashSet<&str>> = catalog.map(|docs| {
            docs.iter()
                .filter(|doc| doc.status == "present")
                .map(|doc| doc.doc_id.as_str())
                .collect()
        });

        let mut missing_docs: HashSet<String> = HashSet::new();
        let mut results: Vec<GoldenQuestionEvaluation> = Vec::new();

        for question in selected {
            if question.doc != "multiple" {
                if let Some(available) = &available {
                    if !available.contains(question.doc.as_str()) {
                        missing_docs.insert(question.doc.clone());
                        results.push(missing_doc_result(question));
                        continue;
                    }
                }
            }
            results.push(self.evaluate_question(question).await);
        }

        let total = results.len();
        let passed = results.iter().filter(|r| r.pass_result).count();
        let pass_rate = if total > 0 {
            ((passed as f64 / total as f64) * 100.0 * 100.0).round() / 100.0
        } else {
            0.0
        };
        let mut missing: Vec<String> = missing_docs.into_iter().collect();
        missing.sort();

        EvaluationSummary {
            total_questions: total,
            passed_questions: passed,
            failed_questions: total - passed,
            pass_rate,
            missing_docs: missing,
            results,
        }
    }
}

fn missing_doc_result(question: &GoldenQuestion) -> GoldenQuestionEvaluation {
    GoldenQuestionEvaluation {
        question_id: question.question_id.clone(),
        doc: question.doc.clone(),
        intent: question.intent.clone(),
        turn_count: question.turn_count,
        question: question.question.clone(),
        answer_status: "missing_doc".to_string(),
        has_citation_doc_page: false,
        grounded: false,
        follow_up_expected: question.intent == "follow_up_required",
        follow_up_ok: false,
        expected_keyword_hits: 0,
        expected_keyword_total: question.expected_keywords.len(),
        expected_match: question.expected_keywords.is_empty(),
        missing_expected_keywords: question.expected_keywords.clone(),
        citation_count: 0,
        pass_result: false,
        reasons: vec!["document not available in catalog".to_string()],
        follow_up_question: None,
        planned_turns: question.turn_count.max(1),
        executed_turns: 0,
        turn_prompts: Vec::new(),
        turn_statuses: Vec::new(),
    }
}
