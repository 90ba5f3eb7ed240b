//! Ollama-backed adapters for answering, planning, embedding, vision,
//! and reranking

use std::path::Path;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{EmbeddingConfig, LlmConfig, RerankerConfig, VisionConfig};
use crate::ports::{
    ChatModel, Embedding, Llm, LlmEvidence, RankedCandidate, Reranker, RerankCandidate, Vision,
};

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    stream: bool,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ChatResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

fn build_client(timeout_seconds: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_seconds))
        .build()
        .unwrap_or_default()
}

fn api_url(base_url: &str, endpoint: &str) -> String {
    format!("{}/api/{}", base_url.trim_end_matches('/'), endpoint)
}

async fn chat(
    client: &reqwest::Client,
    base_url: &str,
    model: &str,
    system: &str,
    user: &str,
) -> anyhow::Result<String> {
    let request = ChatRequest {
        model,
        stream: false,
        messages: vec![
            ChatMessage {
                role: "system",
                content: system,
            },
            ChatMessage {
                role: "user",
                content: user,
            },
        ],
    };
    let response: ChatResponse = client
        .post(api_url(base_url, "chat"))
        .json(&request)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(response.message.map(|m| m.content).unwrap_or_default())
}

/// Answer drafting and raw completions via an Ollama chat model
pub struct OllamaLlm {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaLlm {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            client: build_client(config.timeout),
            base_url: config.base_url.clone(),
            model: config.model.clone(),
        }
    }

    fn answer_prompt(query: &str, intent: &str, evidence: &[LlmEvidence]) -> String {
        let mut lines = vec![
            "Answer the question using ONLY the evidence passages below.".to_string(),
            "Cite nothing outside the evidence; say when the evidence is insufficient.".to_string(),
            format!("Question intent: {}", intent),
            format!("Question: {}", query),
            "Evidence:".to_string(),
        ];
        for row in evidence {
            let text = row.text.replace('\n', " ");
            lines.push(format!(
                "- doc={} pages={}-{} type={} text={}",
                row.doc_id,
                row.page_start,
                row.page_end,
                row.content_type,
                text.chars().take(420).collect::<String>()
            ));
        }
        lines.join("\n")
    }
}

#[async_trait]
impl Llm for OllamaLlm {
    async fn generate_answer(
        &self,
        query: &str,
        intent: &str,
        evidence: &[LlmEvidence],
    ) -> anyhow::Result<String> {
        debug!("drafting answer with {} evidence rows", evidence.len());
        chat(
            &self.client,
            &self.base_url,
            &self.model,
            "You answer equipment-manual questions strictly from provided evidence.",
            &Self::answer_prompt(query, intent, evidence),
        )
        .await
    }
}

#[async_trait]
impl ChatModel for OllamaLlm {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        chat(
            &self.client,
            &self.base_url,
            &self.model,
            "Follow the instructions exactly.",
            prompt,
        )
        .await
    }
}

/// Text embeddings via the Ollama embeddings endpoint; keeps the last
/// failure detail for ingestion's coverage accounting.
pub struct OllamaEmbedding {
    client: reqwest::Client,
    base_url: String,
    model: String,
    last_error: StdMutex<Option<String>>,
}

impl OllamaEmbedding {
    pub fn new(config: &EmbeddingConfig) -> Self {
        Self {
            client: build_client(config.timeout),
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            last_error: StdMutex::new(None),
        }
    }
}

#[async_trait]
impl Embedding for OllamaEmbedding {
    async fn embed_text(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let request = EmbedRequest {
            model: &self.model,
            prompt: text,
        };
        let result = async {
            let response: EmbedResponse = self
                .client
                .post(api_url(&self.base_url, "embeddings"))
                .json(&request)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            anyhow::Ok(response.embedding)
        }
        .await;

        match result {
            Ok(embedding) => {
                *self.last_error.lock().expect("last_error lock") = if embedding.is_empty() {
                    Some("embedding-returned-empty-vector".to_string())
                } else {
                    None
                };
                Ok(embedding)
            }
            Err(e) => {
                *self.last_error.lock().expect("last_error lock") = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.lock().expect("last_error lock").clone()
    }
}

/// Page-level visual insights via an Ollama vision model
pub struct OllamaVision {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaVision {
    pub fn new(config: &VisionConfig) -> Self {
        Self {
            client: build_client(config.timeout),
            base_url: config.base_url.clone(),
            model: config.model.clone(),
        }
    }
}

#[async_trait]
impl Vision for OllamaVision {
    async fn extract_page_insights(
        &self,
        path: &Path,
        page_number: u32,
    ) -> anyhow::Result<String> {
        let prompt = format!(
            "Summarize the diagrams, callouts, and tables visible on page {} of {}. \
             List part labels, terminal names, and numeric values you can read. \
             Reply with plain text only; reply with nothing if the page has no visual content.",
            page_number,
            path.display()
        );
        chat(
            &self.client,
            &self.base_url,
            &self.model,
            "You describe technical drawings from equipment manuals.",
            &prompt,
        )
        .await
    }
}

/// LLM reranker speaking a strict JSON scores protocol, with a lexical
/// overlap fallback when the model output is unusable
pub struct OllamaReranker {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaReranker {
    pub fn new(config: &RerankerConfig) -> Self {
        Self {
            client: build_client(config.timeout),
            base_url: config.base_url.clone(),
            model: config.model.clone(),
        }
    }

    fn prompt(query: &str, candidates: &[RerankCandidate]) -> String {
        let mut lines = vec![
            "Re-rank candidate passages by relevance to the query.".to_string(),
            "Return JSON only in this format:".to_string(),
            r#"{"scores":[{"chunk_id":"...","score":0.0}]}"#.to_string(),
            "Score range is 0.0 to 1.0.".to_string(),
            format!("Query: {}", query),
            "Candidates:".to_string(),
        ];
        for row in candidates {
            let text = row.text.replace('\n', " ");
            lines.push(format!(
                "- chunk_id={} doc={} page={} type={} text={}",
                row.chunk_id,
                row.doc_id,
                row.page_start,
                row.content_type,
                text.chars().take(420).collect::<String>()
            ));
        }
        lines.join("\n")
    }

    fn parse_scores(content: &str, candidates: &[RerankCandidate]) -> Option<Vec<RankedCandidate>> {
        let parsed: Value = serde_json::from_str(content.trim()).ok()?;
        let rows = parsed.get("scores")?.as_array()?;

        let valid_ids: Vec<&str> = candidates.iter().map(|c| c.chunk_id.as_str()).collect();
        let mut out: Vec<RankedCandidate> = Vec::new();
        for row in rows {
            let Some(chunk_id) = row.get("chunk_id").and_then(Value::as_str) else {
                continue;
            };
            if !valid_ids.contains(&chunk_id) {
                continue;
            }
            let score = row
                .get("score")
                .and_then(Value::as_f64)
                .unwrap_or(0.0)
                .clamp(0.0, 1.0);
            out.push(RankedCandidate {
                chunk_id: chunk_id.to_string(),
                score,
            });
        }
        if out.is_empty() {
            None
        } else {
            Some(out)
        }
    }

    fn overlap_score(query: &str, text: &str) -> f64 {
        let q: std::collections::HashSet<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        let t: std::collections::HashSet<String> = text
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if q.is_empty() || t.is_empty() {
            return 0.0;
        }
        q.intersection(&t).count() as f64 / q.len().max(1) as f64
    }

    fn lexical_fallback(
        query: &str,
        candidates: &[RerankCandidate],
        top_k: usize,
    ) -> Vec<RankedCandidate> {
        let mut ranked: Vec<(f64, &RerankCandidate)> = candidates
            .iter()
            .map(|row| (Self::overlap_score(query, &row.text), row))
            .collect();
        ranked.sort_by(|a, b| {
            (b.0, b.1.base_score)
                .partial_cmp(&(a.0, a.1.base_score))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked
            .into_iter()
            .take(top_k)
            .map(|(overlap, row)| RankedCandidate {
                chunk_id: row.chunk_id.clone(),
                score: ((0.6 * overlap + 0.4 * row.base_score) * 1e6).round() / 1e6,
            })
            .collect()
    }
}

#[async_trait]
impl Reranker for OllamaReranker {
    async fn rerank(
        &self,
        query: &str,
        candidates: &[RerankCandidate],
        top_k: usize,
    ) -> anyhow::Result<Vec<RankedCandidate>> {
        if query.trim().is_empty() || candidates.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        match chat(
            &self.client,
            &self.base_url,
            &self.model,
            "You are a strict ranking engine. Output JSON only.",
            &Self::prompt(query, candidates),
        )
        .await
        {
            Ok(content) => {
                if let Some(mut scores) = Self::parse_scores(&content, candidates) {
                    scores.sort_by(|a, b| {
                        b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal)
                    });
                    scores.truncate(top_k);
                    return Ok(scores);
                }
                warn!("reranker response unusable, falling back to lexical overlap");
            }
            Err(e) => {
                warn!("reranker call failed, falling back to lexical overlap: {}", e);
            }
        }

        Ok(Self::lexical_fallback(query, candidates, top_k))
    }
}
