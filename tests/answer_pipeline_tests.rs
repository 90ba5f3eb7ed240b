//! End-to-end answer composition over the filesystem corpus

use std::sync::Arc;

use manualqa::answer::{AnswerComposer, AnswerInput, CLOSEST_EVIDENCE_PREFIX};
use manualqa::domain::{AnswerStatus, Chunk, Confidence, ContentType};
use manualqa::eval::{GoldenQuestion, MultiTurnEvaluator};
use manualqa::ports::ChunkStore;
use manualqa::retrieval::{Bm25KeywordSearch, HashVectorSearch, RetrievalEngine};
use manualqa::store::{FilesystemChunkQuery, FilesystemChunkStore};
use manualqa::trace::JsonlTraceLogger;

fn scenario_chunks() -> Vec<Chunk> {
    vec![
        Chunk::new(
            "c1",
            "pump_x",
            ContentType::Table,
            10,
            10,
            "Torque | 45 Nm\nClearance | 0.2 mm",
        )
        .unwrap()
        .with_table_id("tbl-1"),
        Chunk::new(
            "c2",
            "pump_x",
            ContentType::Text,
            11,
            11,
            "General installation and setup notes",
        )
        .unwrap(),
        Chunk::new(
            "c3",
            "pump_x",
            ContentType::FigureOcr,
            4,
            4,
            "Terminal X1 pin 3 connects to enable input",
        )
        .unwrap(),
    ]
}

async fn composer_over(chunks: Vec<Chunk>) -> (AnswerComposer, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let store = FilesystemChunkStore::new(tmp.path());
    store.persist("pump_x", &chunks).await.unwrap();

    let engine = Arc::new(RetrievalEngine::new(
        Arc::new(FilesystemChunkQuery::new(tmp.path())),
        Arc::new(Bm25KeywordSearch::default()),
        Arc::new(HashVectorSearch::default()),
    ));
    (AnswerComposer::new(engine), tmp)
}

#[tokio::test]
async fn test_table_intent_answer_is_grounded() {
    let (composer, _tmp) = composer_over(scenario_chunks()).await;
    let output = composer
        .answer(&AnswerInput::new("What is the torque spec in Nm?"))
        .await;

    assert_eq!(output.intent.as_str(), "table");
    assert_eq!(output.status, AnswerStatus::Ok);
    assert_eq!(output.confidence, Confidence::High);
    assert!(output.answer.contains("Torque | 45 Nm"));
    assert!(!output.citations.is_empty());
    let citation = &output.citations[0];
    assert_eq!(citation.doc_id, "pump_x");
    assert_eq!(citation.page, 10);
    assert_eq!(citation.table_id.as_deref(), Some("tbl-1"));
    assert!(citation.label.contains("pump_x p.10"));
    assert_eq!(output.retrieved_chunk_ids[0], "c1");
}

#[tokio::test]
async fn test_ambiguous_query_needs_follow_up() {
    let (composer, _tmp) = composer_over(scenario_chunks()).await;
    let output = composer
        .answer(&AnswerInput::new(
            "My equipment trips immediately after start. What should I check first?",
        ))
        .await;

    assert_eq!(output.status, AnswerStatus::NeedsFollowUp);
    let follow_up = output.follow_up_question.unwrap();
    assert_eq!(follow_up.matches('?').count(), 1);
    assert!(output
        .warnings
        .iter()
        .any(|w| w.contains("ambiguous")));
}

#[tokio::test]
async fn test_scoped_query_suppresses_follow_up() {
    let (composer, _tmp) = composer_over(scenario_chunks()).await;
    let output = composer
        .answer(
            &AnswerInput::new("My equipment trips immediately after start. What should I check?")
                .with_doc_id("pump_x"),
        )
        .await;
    assert!(output.follow_up_question.is_none());
    assert_ne!(output.status, AnswerStatus::NeedsFollowUp);
}

#[tokio::test]
async fn test_gibberish_query_returns_closest_evidence() {
    let (composer, _tmp) = composer_over(scenario_chunks()).await;
    let output = composer
        .answer(&AnswerInput::new(
            "quantum flux capacitor calibration constant for arc control input",
        ))
        .await;

    assert_eq!(output.status, AnswerStatus::NotFound);
    assert!(output.answer.starts_with(CLOSEST_EVIDENCE_PREFIX));
    assert!(!output.citations.is_empty());
    assert!(output
        .warnings
        .iter()
        .any(|w| w.contains("Insufficient evidence")));
    assert_eq!(output.confidence, Confidence::Low);
}

#[tokio::test]
async fn test_structured_output_has_three_sections() {
    let (composer, _tmp) = composer_over(scenario_chunks()).await;
    let output = composer
        .answer(&AnswerInput::new("What is the torque spec in Nm?").structured())
        .await;

    assert!(output.answer.contains("Direct answer:"));
    assert!(output.answer.contains("Key details:"));
    assert!(output.answer.contains("If missing data:"));
    // Grounded content survives the rewrite.
    assert!(output.answer.contains("45 Nm"));
}

#[tokio::test]
async fn test_answer_trace_is_written() {
    let tmp = tempfile::tempdir().unwrap();
    let store = FilesystemChunkStore::new(tmp.path());
    store.persist("pump_x", &scenario_chunks()).await.unwrap();

    let trace_path = tmp.path().join("reports").join("answer_traces.jsonl");
    let engine = Arc::new(RetrievalEngine::new(
        Arc::new(FilesystemChunkQuery::new(tmp.path())),
        Arc::new(Bm25KeywordSearch::default()),
        Arc::new(HashVectorSearch::default()),
    ));
    let composer = AnswerComposer::new(engine)
        .with_trace(Arc::new(JsonlTraceLogger::new(&trace_path)));

    composer
        .answer(&AnswerInput::new("What is the torque spec in Nm?"))
        .await;

    let content = std::fs::read_to_string(&trace_path).unwrap();
    let record: serde_json::Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
    assert_eq!(record["status"], "ok");
    assert_eq!(record["intent"], "table");
    assert!(record["citations"].as_array().unwrap().len() >= 1);
    assert!(record["ts"].is_string());
}

#[tokio::test]
async fn test_multi_turn_golden_question_rollup() {
    let (composer, _tmp) = composer_over(scenario_chunks()).await;
    let evaluator = MultiTurnEvaluator::new(Arc::new(composer));

    let question = GoldenQuestion {
        question_id: "g1".to_string(),
        doc: "pump_x".to_string(),
        intent: "lookup".to_string(),
        question_type: "procedural".to_string(),
        difficulty: "medium".to_string(),
        rag_mode: "hybrid".to_string(),
        turn_count: 2,
        question: "Step 1: What is the torque spec in Nm? Step 2: What is the clearance value?"
            .to_string(),
        expected_keywords: vec!["45".to_string()],
        min_keyword_hits: 1,
    };

    let evaluation = evaluator.evaluate_question(&question).await;
    assert_eq!(evaluation.planned_turns, 2);
    assert_eq!(evaluation.executed_turns, 2);
    assert_eq!(evaluation.turn_statuses.len(), 2);
    assert!(evaluation.expected_match);
    assert!(evaluation.has_citation_doc_page);
    assert!(evaluation.pass_result, "reasons: {:?}", evaluation.reasons);
}

#[tokio::test]
async fn test_missing_doc_is_reported_in_summary() {
    let (composer, _tmp) = composer_over(scenario_chunks()).await;
    let evaluator = MultiTurnEvaluator::new(Arc::new(composer));

    let questions = vec![GoldenQuestion {
        question_id: "g2".to_string(),
        doc: "ghost_doc".to_string(),
        intent: "lookup".to_string(),
        question_type: String::new(),
        difficulty: String::new(),
        rag_mode: String::new(),
        turn_count: 1,
        question: "anything".to_string(),
        expected_keywords: Vec::new(),
        min_keyword_hits: 1,
    }];
    let catalog = vec![manualqa::Document {
        doc_id: "pump_x".to_string(),
        title: "Pump X Service Manual".to_string(),
        filename: "pump_x.pdf".to_string(),
        status: "present".to_string(),
    }];

    let summary = evaluator
        .evaluate_all(&questions, Some(&catalog), None, None)
        .await;
    assert_eq!(summary.total_questions, 1);
    assert_eq!(summary.passed_questions, 0);
    assert_eq!(summary.missing_docs, vec!["ghost_doc".to_string()]);
    assert_eq!(summary.results[0].answer_status, "missing_doc");
}
