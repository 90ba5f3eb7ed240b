//! Per-page chunk extraction
//!
//! Fuses page text, OCR, table rows, figure captions, and optional vision
//! summaries into the chunk set for a single page. All pages of a document
//! share one mutex-guarded vision-call budget.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{Chunk, ContentType};
use crate::ingest::figures::FigureRegion;
use crate::ports::{Ocr, Page, TableExtract, Vision};

static CAPTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(figure|fig\.)\s*\d+").expect("caption pattern"));
static NUMERIC_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-+]?\d+(?:\.\d+)?").expect("numeric token pattern"));
static PROSE_WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z]{4,}").expect("prose word pattern"));

/// Pages shorter than this (collapsed) trigger OCR
const OCR_MIN_TEXT_CHARS: usize = 80;
/// Pages where both text and OCR are shorter than this are vision candidates
const VISION_SPARSE_CHARS: usize = 400;

/// Remaining vision calls for the whole document
#[derive(Debug)]
pub struct VisionBudget {
    pub remaining: usize,
}

impl VisionBudget {
    pub fn new(remaining: usize) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self { remaining }))
    }
}

/// Chunks extracted from one page, plus non-fatal adapter warnings
#[derive(Debug, Default)]
pub struct PageOutput {
    pub page_number: u32,
    pub chunks: Vec<Chunk>,
    pub warnings: Vec<String>,
}

/// Extracts the chunk set for one page
pub struct PageProcessor {
    doc_id: String,
    pdf_path: PathBuf,
    ocr: Option<Arc<dyn Ocr>>,
    tables: Arc<dyn TableExtract>,
    vision: Option<Arc<dyn Vision>>,
    vision_budget: Arc<Mutex<VisionBudget>>,
}

impl PageProcessor {
    pub fn new(
        doc_id: impl Into<String>,
        pdf_path: impl Into<PathBuf>,
        ocr: Option<Arc<dyn Ocr>>,
        tables: Arc<dyn TableExtract>,
        vision: Option<Arc<dyn Vision>>,
        vision_budget: Arc<Mutex<VisionBudget>>,
    ) -> Self {
        Self {
            doc_id: doc_id.into(),
            pdf_path: pdf_path.into(),
            ocr,
            tables,
            vision,
            vision_budget,
        }
    }

    pub async fn process(&self, page: &Page, regions: &[FigureRegion]) -> PageOutput {
        // Parser contract says pages are 1-based; clamp rather than panic on
        // a misbehaving adapter.
        let page_number = page.page_number.max(1);
        let mut out = PageOutput {
            page_number,
            ..PageOutput::default()
        };
        let page_text = page.text.trim().to_string();

        let mut ocr_text: Option<String> = None;
        if collapse(&page_text).len() < OCR_MIN_TEXT_CHARS {
            ocr_text = Some(self.run_ocr(page_number, &mut out.warnings).await);
        }

        if !page_text.is_empty() {
            out.chunks
                .push(self.chunk(ContentType::Text, page_number, &page_text));
        }
        if let Some(text) = ocr_text.as_deref() {
            if !text.is_empty() {
                out.chunks
                    .push(self.chunk(ContentType::FigureOcr, page_number, text));
            }
        }

        let table_source = if page_text.is_empty() {
            ocr_text.clone().unwrap_or_default()
        } else {
            page_text.clone()
        };
        for table in self
            .tables
            .extract(&table_source, page_number, Some(&self.doc_id))
        {
            for row in &table.rows {
                let content = if !row.headers.is_empty() && row.headers.len() == row.row_cells.len()
                {
                    row.headers
                        .iter()
                        .zip(row.row_cells.iter())
                        .map(|(header, cell)| format!("{}: {}", header, cell))
                        .collect::<Vec<_>>()
                        .join("; ")
                } else {
                    row.raw_text.clone()
                };
                let chunk = self
                    .chunk(ContentType::TableRow, page_number, &content)
                    .with_table_id(table.table_id.clone())
                    .with_metadata("table_id", json!(table.table_id))
                    .with_metadata("row_index", json!(row.row_index))
                    .with_metadata("headers", json!(row.headers))
                    .with_metadata("units", json!(row.units));
                out.chunks.push(chunk);
            }
        }

        let captions: Vec<String> = page_text
            .lines()
            .map(str::trim)
            .filter(|line| CAPTION_RE.is_match(line))
            .map(str::to_string)
            .collect();

        for (idx, caption) in captions.iter().enumerate() {
            let figure_id = format!("fig-p{:04}-{:03}", page_number, idx + 1);
            let bbox: Option<Value> = regions.get(idx).map(|region| json!(region.bbox));

            let mut caption_chunk = self
                .chunk(ContentType::FigureCaption, page_number, caption)
                .with_figure_id(figure_id.clone())
                .with_caption(caption.clone());
            if let Some(bbox) = bbox.clone() {
                caption_chunk = caption_chunk.with_metadata("bbox", bbox);
            }
            out.chunks.push(caption_chunk);

            if ocr_text.is_none() {
                ocr_text = Some(self.run_ocr(page_number, &mut out.warnings).await);
            }
            if let Some(text) = ocr_text.as_deref() {
                if !text.is_empty() {
                    let mut linked = self
                        .chunk(ContentType::FigureOcr, page_number, text)
                        .with_figure_id(figure_id);
                    if let Some(bbox) = bbox {
                        linked = linked.with_metadata("bbox", bbox);
                    }
                    out.chunks.push(linked);
                }
            }
        }

        if self.vision.is_some()
            && self.should_attempt_vision(&page_text, ocr_text.as_deref(), !captions.is_empty())
        {
            self.attempt_vision(page_number, &mut out).await;
        }

        out
    }

    async fn run_ocr(&self, page_number: u32, warnings: &mut Vec<String>) -> String {
        let Some(ocr) = self.ocr.as_ref() else {
            return String::new();
        };
        match ocr.extract_text(&self.pdf_path, page_number).await {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                warnings.push(format!("OCR failed on page {}: {}", page_number, e));
                String::new()
            }
        }
    }

    fn should_attempt_vision(
        &self,
        page_text: &str,
        ocr_text: Option<&str>,
        has_caption: bool,
    ) -> bool {
        if has_caption {
            return true;
        }
        let numeric_tokens = NUMERIC_TOKEN_RE.find_iter(page_text).count();
        let prose_words = PROSE_WORD_RE.find_iter(page_text).count();
        if numeric_tokens >= 5 && prose_words <= 8 {
            return true;
        }
        let text_len = collapse(page_text).len();
        let ocr_len = collapse(ocr_text.unwrap_or_default()).len();
        text_len < VISION_SPARSE_CHARS && ocr_len < VISION_SPARSE_CHARS
    }

    async fn attempt_vision(&self, page_number: u32, out: &mut PageOutput) {
        let Some(vision) = self.vision.as_ref() else {
            return;
        };

        {
            let mut budget = self.vision_budget.lock().await;
            if budget.remaining == 0 {
                debug!("vision budget exhausted, skipping page {}", page_number);
                return;
            }
            budget.remaining -= 1;
        }

        match vision
            .extract_page_insights(&self.pdf_path, page_number)
            .await
        {
            Ok(text) => {
                let text = text.trim().to_string();
                if text.is_empty() {
                    // Empty answers do not consume the document budget.
                    self.vision_budget.lock().await.remaining += 1;
                } else {
                    out.chunks
                        .push(self.chunk(ContentType::VisionSummary, page_number, &text));
                }
            }
            Err(e) => {
                self.vision_budget.lock().await.remaining += 1;
                out.warnings
                    .push(format!("Vision failed on page {}: {}", page_number, e));
            }
        }
    }

    fn chunk(&self, content_type: ContentType, page_number: u32, text: &str) -> Chunk {
        Chunk::new(
            Uuid::new_v4().to_string(),
            self.doc_id.clone(),
            content_type,
            page_number,
            page_number,
            text,
        )
        .expect("page-scoped chunk construction cannot fail")
    }
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
