//! Hybrid retrieval: keyword + dense fusion with intent weighting,
//! anchor-term coverage, and optional reranking

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::domain::{Chunk, ContentType};
use crate::ports::{
    ChunkQuery, KeywordSearch, Reranker, RerankCandidate, ScoredChunk, TraceSink, VectorSearch,
};

static WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[a-z0-9]+").expect("word pattern"));

const TABLE_TERMS: &[&str] = &[
    "table",
    "parameter",
    "spec",
    "specification",
    "torque",
    "clearance",
    "gap",
    "tolerance",
    "dimension",
    "mm",
    "nm",
    "schedule",
    "interval",
    "fault code",
];

const DIAGRAM_TERMS: &[&str] = &[
    "diagram",
    "schematic",
    "wiring",
    "terminal",
    "pin",
    "connector",
    "figure",
    "signal",
    "block diagram",
    "connection",
];

const QUERY_NOISE_TERMS: &[&str] = &[
    "what",
    "which",
    "when",
    "where",
    "why",
    "how",
    "explain",
    "describe",
    "show",
    "compare",
    "difference",
    "versus",
    "vs",
    "purpose",
    "required",
    "requirement",
    "setting",
    "settings",
    "limitation",
    "limitations",
    "mode",
];

/// Coarse query class used to weight content types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Table,
    Diagram,
    #[default]
    General,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Table => "table",
            Intent::Diagram => "diagram",
            Intent::General => "general",
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Intent {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "table" => Ok(Intent::Table),
            "diagram" => Ok(Intent::Diagram),
            _ => Ok(Intent::General),
        }
    }
}

/// Retrieval request
#[derive(Debug, Clone)]
pub struct SearchInput {
    pub query: String,
    pub doc_id: Option<String>,
    pub top_k_keyword: usize,
    pub top_k_vector: usize,
    pub top_n: usize,
    pub rerank_pool_size: usize,
}

impl SearchInput {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            doc_id: None,
            top_k_keyword: 20,
            top_k_vector: 20,
            top_n: 8,
            rerank_pool_size: 24,
        }
    }

    pub fn with_doc_id(mut self, doc_id: impl Into<String>) -> Self {
        self.doc_id = Some(doc_id.into());
        self
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }
}

/// One retrieval result with fused scores and a short snippet
///
/// Deserialization is permissive so tool payloads carrying partial hit
/// records still merge into agent state.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EvidenceHit {
    pub chunk_id: String,
    #[serde(default)]
    pub doc_id: String,
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default)]
    pub page_start: u32,
    #[serde(default)]
    pub page_end: u32,
    #[serde(default)]
    pub section_path: Option<String>,
    #[serde(default)]
    pub figure_id: Option<String>,
    #[serde(default)]
    pub table_id: Option<String>,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub keyword_score: f64,
    #[serde(default)]
    pub vector_score: f64,
    #[serde(default)]
    pub rerank_score: Option<f64>,
    #[serde(default)]
    pub snippet: String,
}

/// Retrieval response
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SearchOutput {
    pub query: String,
    pub intent: Intent,
    pub total_chunks_scanned: usize,
    pub hits: Vec<EvidenceHit>,
}

/// Hybrid retrieval engine over the in-memory chunk corpus
pub struct RetrievalEngine {
    chunk_query: Arc<dyn ChunkQuery>,
    keyword: Arc<dyn KeywordSearch>,
    vector: Arc<dyn VectorSearch>,
    reranker: Option<Arc<dyn Reranker>>,
    trace: Option<Arc<dyn TraceSink>>,
}

impl RetrievalEngine {
    pub fn new(
        chunk_query: Arc<dyn ChunkQuery>,
        keyword: Arc<dyn KeywordSearch>,
        vector: Arc<dyn VectorSearch>,
    ) -> Self {
        Self {
            chunk_query,
            keyword,
            vector,
            reranker: None,
            trace: None,
        }
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn with_trace(mut self, trace: Arc<dyn TraceSink>) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Run hybrid retrieval. Adapter failures degrade to empty arms; this
    /// method never fails a request.
    pub async fn search(&self, input: &SearchInput) -> SearchOutput {
        let query = input.query.trim().to_string();
        if query.is_empty() {
            return SearchOutput {
                query: input.query.clone(),
                intent: Intent::General,
                total_chunks_scanned: 0,
                hits: Vec::new(),
            };
        }

        let chunks = match self.chunk_query.list_chunks(input.doc_id.as_deref()).await {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!("chunk query failed: {}", e);
                Vec::new()
            }
        };

        let intent = detect_intent(&query);
        let expanded_query = expand_query(&query);
        let anchors = anchor_terms(&query);

        let keyword_hits = match self
            .keyword
            .search(&expanded_query, &chunks, input.top_k_keyword)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!("keyword search failed: {}", e);
                Vec::new()
            }
        };
        let vector_hits = match self.vector.search(&query, &chunks, input.top_k_vector).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!("vector search failed: {}", e);
                Vec::new()
            }
        };

        let keyword_norm = normalize_scores(&keyword_hits);
        let vector_norm = normalize_scores(&vector_hits);

        // Fusion map keyed by chunk index, first-seen order preserved.
        let mut order: Vec<usize> = Vec::new();
        let mut fused: HashMap<usize, (f64, f64)> = HashMap::new();
        for item in &keyword_hits {
            fused.entry(item.chunk_index).or_insert_with(|| {
                order.push(item.chunk_index);
                (0.0, 0.0)
            });
            if let Some(entry) = fused.get_mut(&item.chunk_index) {
                entry.0 = keyword_norm.get(&item.chunk_index).copied().unwrap_or(0.0);
            }
        }
        for item in &vector_hits {
            fused.entry(item.chunk_index).or_insert_with(|| {
                order.push(item.chunk_index);
                (0.0, 0.0)
            });
            if let Some(entry) = fused.get_mut(&item.chunk_index) {
                entry.1 = vector_norm.get(&item.chunk_index).copied().unwrap_or(0.0);
            }
        }

        let mut scored: Vec<(f64, EvidenceHit)> = Vec::new();
        for idx in order {
            let Some(chunk) = chunks.get(idx) else {
                continue;
            };
            let (keyword_score, vector_score) = fused.get(&idx).copied().unwrap_or((0.0, 0.0));
            let base = 0.5 * keyword_score + 0.5 * vector_score;
            let coverage = anchor_coverage(&chunk.content_text, &anchors);
            let coverage_weight = 0.70 + 0.60 * coverage;
            let weighted =
                base * content_type_weight(chunk.content_type, intent) * coverage_weight;

            scored.push((
                coverage,
                EvidenceHit {
                    chunk_id: chunk.chunk_id.clone(),
                    doc_id: chunk.doc_id.clone(),
                    content_type: chunk.content_type,
                    page_start: chunk.page_start,
                    page_end: chunk.page_end,
                    section_path: chunk.section_path.clone(),
                    figure_id: chunk.figure_id.clone(),
                    table_id: chunk.table_id.clone(),
                    score: round6(weighted),
                    keyword_score: round6(keyword_score),
                    vector_score: round6(vector_score),
                    rerank_score: None,
                    snippet: snippet(&chunk.content_text),
                },
            ));
        }

        // Anchor coverage gate, bypassed when it would empty the result.
        if anchors.len() >= 2 {
            let filtered: Vec<(f64, EvidenceHit)> = scored
                .iter()
                .filter(|(coverage, _)| *coverage >= 0.15)
                .cloned()
                .collect();
            if !filtered.is_empty() {
                scored = filtered;
            }
        }

        let mut hits: Vec<EvidenceHit> = scored.into_iter().map(|(_, hit)| hit).collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        if let Some(reranker) = &self.reranker {
            hits = self
                .apply_rerank(reranker.as_ref(), &query, hits, input)
                .await;
        }

        hits.truncate(input.top_n);

        let output = SearchOutput {
            query: query.clone(),
            intent,
            total_chunks_scanned: chunks.len(),
            hits,
        };

        if let Some(trace) = &self.trace {
            trace.log(&json!({
                "ts": Utc::now().to_rfc3339(),
                "query": output.query,
                "intent": output.intent,
                "doc_id": input.doc_id,
                "expanded_query": expanded_query,
                "anchor_terms": anchors,
                "total_chunks_scanned": output.total_chunks_scanned,
                "top_hits": output.hits.iter().map(|h| json!({
                    "chunk_id": h.chunk_id,
                    "doc_id": h.doc_id,
                    "content_type": h.content_type,
                    "page_start": h.page_start,
                    "section_path": h.section_path,
                    "figure_id": h.figure_id,
                    "table_id": h.table_id,
                    "score": h.score,
                })).collect::<Vec<_>>(),
            }));
        }

        output
    }

    /// Blend reranker scores into the head of the ranking; the tail past the
    /// pool stays untouched.
    async fn apply_rerank(
        &self,
        reranker: &dyn Reranker,
        query: &str,
        hits: Vec<EvidenceHit>,
        input: &SearchInput,
    ) -> Vec<EvidenceHit> {
        if hits.is_empty() {
            return hits;
        }
        let pool_len = input
            .top_n
            .max(input.rerank_pool_size.min(hits.len()))
            .min(hits.len());
        let (pool, tail) = hits.split_at(pool_len);
        let mut pool: Vec<EvidenceHit> = pool.to_vec();

        let candidates: Vec<RerankCandidate> = pool
            .iter()
            .map(|hit| RerankCandidate {
                chunk_id: hit.chunk_id.clone(),
                doc_id: hit.doc_id.clone(),
                page_start: hit.page_start,
                content_type: hit.content_type,
                text: hit.snippet.clone(),
                base_score: hit.score,
            })
            .collect();

        match reranker.rerank(query, &candidates, pool_len).await {
            Ok(ranked) => {
                let by_id: HashMap<&str, f64> = ranked
                    .iter()
                    .map(|row| (row.chunk_id.as_str(), row.score.clamp(0.0, 1.0)))
                    .collect();
                for hit in pool.iter_mut() {
                    if let Some(score) = by_id.get(hit.chunk_id.as_str()) {
                        hit.rerank_score = Some(round6(*score));
                        hit.score = round6(0.35 * hit.score + 0.65 * score);
                    }
                }
                pool.sort_by(|a, b| {
                    b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal)
                });
            }
            Err(e) => {
                warn!("rerank failed, keeping fused order: {}", e);
            }
        }

        pool.extend_from_slice(tail);
        pool
    }
}

pub(crate) fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

fn detect_intent(query: &str) -> Intent {
    let q = query.to_lowercase();
    let table_hits = TABLE_TERMS.iter().filter(|term| q.contains(*term)).count();
    let diagram_hits = DIAGRAM_TERMS.iter().filter(|term| q.contains(*term)).count();

    if table_hits > 0 && table_hits >= diagram_hits {
        Intent::Table
    } else if diagram_hits > 0 {
        Intent::Diagram
    } else {
        Intent::General
    }
}

fn expand_query(query: &str) -> String {
    let q = query.trim().to_lowercase();
    if q.is_empty() {
        return q;
    }

    let words: Vec<&str> = q.split_whitespace().collect();
    let mut expanded: Vec<String> = words.iter().map(|w| w.to_string()).collect();

    for word in &words {
        let mapped = match *word {
            "vs" => Some("versus"),
            "meaning" | "mean" => Some("description"),
            "parameter" => Some("setting"),
            "parameters" => Some("settings"),
            _ => None,
        };
        if let Some(mapped) = mapped {
            expanded.push(mapped.to_string());
        }
    }

    let padded = format!(" {} ", q);
    if q.contains("compare") || padded.contains(" vs ") || q.contains("difference") {
        expanded.push("difference".to_string());
        expanded.push("comparison".to_string());
    }

    let mut seen: HashSet<&str> = HashSet::new();
    let mut out: Vec<&str> = Vec::new();
    for token in &expanded {
        if seen.insert(token.as_str()) {
            out.push(token.as_str());
        }
    }
    out.join(" ")
}

/// Content tokens of length >= 3, singularized and stop-filtered, used to
/// gate chunks by query coverage.
pub fn anchor_terms(query: &str) -> Vec<String> {
    let mut out: HashSet<String> = HashSet::new();
    for m in WORD_RE.find_iter(&query.to_lowercase()) {
        let raw = m.as_str();
        let token = if raw.len() > 4 && raw.ends_with('s') {
            &raw[..raw.len() - 1]
        } else {
            raw
        };
        if token.len() < 3 {
            continue;
        }
        if QUERY_NOISE_TERMS.contains(&token) {
            continue;
        }
        out.insert(token.to_string());
    }
    let mut sorted: Vec<String> = out.into_iter().collect();
    sorted.sort();
    sorted
}

fn anchor_coverage(text: &str, anchors: &[String]) -> f64 {
    if anchors.is_empty() {
        return 1.0;
    }
    let tokens: HashSet<String> = WORD_RE
        .find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect();
    if tokens.is_empty() {
        return 0.0;
    }
    let matched = anchors
        .iter()
        .filter(|anchor| tokens.contains(anchor.as_str()))
        .count();
    matched as f64 / anchors.len().max(1) as f64
}

fn normalize_scores(results: &[ScoredChunk]) -> HashMap<usize, f64> {
    if results.is_empty() {
        return HashMap::new();
    }
    let lo = results.iter().map(|r| r.score).fold(f64::INFINITY, f64::min);
    let hi = results
        .iter()
        .map(|r| r.score)
        .fold(f64::NEG_INFINITY, f64::max);

    if hi <= lo {
        return results.iter().map(|r| (r.chunk_index, 1.0)).collect();
    }
    results
        .iter()
        .map(|r| (r.chunk_index, (r.score - lo) / (hi - lo)))
        .collect()
}

fn content_type_weight(content_type: ContentType, intent: Intent) -> f64 {
    match intent {
        Intent::Table => {
            if matches!(content_type, ContentType::Table | ContentType::TableRow) {
                1.35
            } else if content_type.is_figure() {
                1.10
            } else {
                1.0
            }
        }
        Intent::Diagram => {
            if content_type.is_figure() {
                1.40
            } else if matches!(content_type, ContentType::Table | ContentType::TableRow) {
                1.10
            } else {
                1.0
            }
        }
        Intent::General => 1.0,
    }
}

/// Whitespace-collapsed snippet, ellipsized past 420 characters.
pub fn snippet(text: &str) -> String {
    const MAX_LEN: usize = 420;
    let compact = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if compact.chars().count() <= MAX_LEN {
        return compact;
    }
    let clipped: String = compact.chars().take(MAX_LEN - 3).collect();
    format!("{}...", clipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::RankedCandidate;
    use crate::retrieval::keyword::Bm25KeywordSearch;
    use crate::retrieval::vector::HashVectorSearch;
    use async_trait::async_trait;

    struct FixedCorpus(Vec<Chunk>);

    #[async_trait]
    impl ChunkQuery for FixedCorpus {
        async fn list_chunks(&self, doc_id: Option<&str>) -> anyhow::Result<Vec<Chunk>> {
            Ok(self
                .0
                .iter()
                .filter(|c| doc_id.map(|d| c.doc_id == d).unwrap_or(true))
                .cloned()
                .collect())
        }
    }

    fn corpus() -> Vec<Chunk> {
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

    fn engine(chunks: Vec<Chunk>) -> RetrievalEngine {
        RetrievalEngine::new(
            Arc::new(FixedCorpus(chunks)),
            Arc::new(Bm25KeywordSearch::default()),
            Arc::new(HashVectorSearch::default()),
        )
    }

    #[tokio::test]
    async fn test_empty_query_returns_empty_output() {
        let output = engine(corpus())
            .search(&SearchInput::new("   "))
            .await;
        assert_eq!(output.intent, Intent::General);
        assert_eq!(output.total_chunks_scanned, 0);
        assert!(output.hits.is_empty());
    }

    #[tokio::test]
    async fn test_table_intent_boosts_table_chunk() {
        let output = engine(corpus())
            .search(&SearchInput::new("What is the torque spec in Nm?"))
            .await;
        assert_eq!(output.intent, Intent::Table);
        assert_eq!(output.total_chunks_scanned, 3);
        assert!(!output.hits.is_empty());
        assert_eq!(output.hits[0].chunk_id, "c1");
        assert_eq!(output.hits[0].table_id.as_deref(), Some("tbl-1"));
        for window in output.hits.windows(2) {
            assert!(window[0].score >= window[1].score);
        }
    }

    #[tokio::test]
    async fn test_diagram_intent_detection() {
        let output = engine(corpus())
            .search(&SearchInput::new("show the wiring diagram for terminal X1"))
            .await;
        assert_eq!(output.intent, Intent::Diagram);
        assert_eq!(output.hits[0].chunk_id, "c3");
    }

    #[tokio::test]
    async fn test_doc_scope_filters_corpus() {
        let mut chunks = corpus();
        chunks.push(
            Chunk::new("d1", "other_doc", ContentType::Text, 1, 1, "torque torque torque")
                .unwrap(),
        );
        let output = engine(chunks)
            .search(&SearchInput::new("torque").with_doc_id("pump_x"))
            .await;
        assert_eq!(output.total_chunks_scanned, 3);
        assert!(output.hits.iter().all(|h| h.doc_id == "pump_x"));
    }

    #[tokio::test]
    async fn test_anchor_filter_bypassed_when_result_would_be_empty() {
        let chunks = vec![Chunk::new(
            "c1",
            "pump_x",
            ContentType::Text,
            1,
            1,
            "torque values for the main shaft",
        )
        .unwrap()];
        // Seven anchors with a single match put coverage below 15%; the
        // filter must not produce an empty result.
        let output = engine(chunks)
            .search(&SearchInput::new(
                "torque flux hyperdrive quantum resonance calibration destabilizer",
            ))
            .await;
        assert!(!output.hits.is_empty());
    }

    #[tokio::test]
    async fn test_top_n_bound() {
        let chunks: Vec<Chunk> = (0..20)
            .map(|i| {
                Chunk::new(
                    format!("c{}", i),
                    "pump_x",
                    ContentType::Text,
                    1,
                    1,
                    format!("torque value number {}", i),
                )
                .unwrap()
            })
            .collect();
        let output = engine(chunks)
            .search(&SearchInput::new("torque").with_top_n(5))
            .await;
        assert_eq!(output.hits.len(), 5);
    }

    #[tokio::test]
    async fn test_constant_scores_normalize_to_one() {
        let hits = vec![
            ScoredChunk {
                chunk_index: 0,
                score: 2.5,
                source: crate::ports::SearchSource::Keyword,
            },
            ScoredChunk {
                chunk_index: 1,
                score: 2.5,
                source: crate::ports::SearchSource::Keyword,
            },
        ];
        let norm = normalize_scores(&hits);
        assert_eq!(norm.get(&0), Some(&1.0));
        assert_eq!(norm.get(&1), Some(&1.0));
    }

    #[tokio::test]
    async fn test_rerank_blends_and_keeps_tail() {
        struct FlipReranker;
        #[async_trait]
        impl Reranker for FlipReranker {
            async fn rerank(
                &self,
                _query: &str,
                candidates: &[RerankCandidate],
                top_k: usize,
            ) -> anyhow::Result<Vec<RankedCandidate>> {
                // Score candidates in reverse of their incoming order.
                Ok(candidates
                    .iter()
                    .rev()
                    .take(top_k)
                    .enumerate()
                    .map(|(rank, c)| RankedCandidate {
                        chunk_id: c.chunk_id.clone(),
                        score: 1.0 - rank as f64 * 0.1,
                    })
                    .collect())
            }
        }

        let chunks: Vec<Chunk> = (0..4)
            .map(|i| {
                Chunk::new(
                    format!("c{}", i),
                    "pump_x",
                    ContentType::Text,
                    1,
                    1,
                    format!("torque entry {}", i),
                )
                .unwrap()
            })
            .collect();
        let engine = engine(chunks).with_reranker(Arc::new(FlipReranker));
        let mut input = SearchInput::new("torque");
        input.top_n = 3;
        input.rerank_pool_size = 3;
        let output = engine.search(&input).await;

        assert_eq!(output.hits.len(), 3);
        assert!(output.hits[0].rerank_score.is_some());
        for window in output.hits.windows(2) {
            assert!(window[0].score >= window[1].score);
        }
    }

    #[test]
    fn test_query_expansion_aliases() {
        let expanded = expand_query("parameter P4 vs P5 meaning");
        assert!(expanded.contains("setting"));
        assert!(expanded.contains("versus"));
        assert!(expanded.contains("description"));
        assert!(expanded.contains("comparison"));
        // Dedup keeps first occurrence only.
        assert_eq!(
            expanded.split_whitespace().count(),
            expanded
                .split_whitespace()
                .collect::<HashSet<_>>()
                .len()
        );
    }

    #[test]
    fn test_anchor_terms_singularize_and_filter() {
        let anchors = anchor_terms("What are the torque settings for bearings?");
        assert!(anchors.contains(&"torque".to_string()));
        assert!(anchors.contains(&"bearing".to_string()));
        assert!(!anchors.iter().any(|a| a == "settings" || a == "setting"));
        assert!(!anchors.iter().any(|a| a == "what"));
        let mut sorted = anchors.clone();
        sorted.sort();
        assert_eq!(anchors, sorted);
    }

    #[test]
    fn test_snippet_collapse_and_ellipsis() {
        let text = format!("lead   text\nwith\nbreaks {}", "x".repeat(500));
        let s = snippet(&text);
        assert!(s.starts_with("lead text with breaks"));
        assert_eq!(s.chars().count(), 420);
        assert!(s.ends_with("..."));
    }
}
