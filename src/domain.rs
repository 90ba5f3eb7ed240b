//! Domain model: chunks, citations, answers, and grounding policies

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{PipelineError, Result};

/// Content type of a retrievable chunk
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    #[default]
    Text,
    TableRow,
    /// Legacy whole-table chunks; readable from old corpora, never produced
    Table,
    FigureCaption,
    FigureOcr,
    VisionSummary,
    VisualFigure,
    VisualTable,
    VisualImage,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::TableRow => "table_row",
            ContentType::Table => "table",
            ContentType::FigureCaption => "figure_caption",
            ContentType::FigureOcr => "figure_ocr",
            ContentType::VisionSummary => "vision_summary",
            ContentType::VisualFigure => "visual_figure",
            ContentType::VisualTable => "visual_table",
            ContentType::VisualImage => "visual_image",
        }
    }

    /// Figure-flavored content carrying caption or OCR text
    pub fn is_figure(&self) -> bool {
        matches!(self, ContentType::FigureCaption | ContentType::FigureOcr)
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable unit of retrievable evidence
///
/// Chunks are allocated by the ingestion orchestrator, persisted once, and
/// never mutated in place; downstream components receive read-only views.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub content_type: ContentType,
    pub page_start: u32,
    pub page_end: u32,
    pub content_text: String,
    #[serde(default)]
    pub section_path: Option<String>,
    #[serde(default)]
    pub figure_id: Option<String>,
    #[serde(default)]
    pub table_id: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub asset_ref: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Chunk {
    /// Construct a chunk, enforcing page ordering and embedding shape.
    pub fn new(
        chunk_id: impl Into<String>,
        doc_id: impl Into<String>,
        content_type: ContentType,
        page_start: u32,
        page_end: u32,
        content_text: impl Into<String>,
    ) -> Result<Self> {
        if page_start < 1 {
            return Err(PipelineError::InvalidInput(
                "page_start must be >= 1".to_string(),
            ));
        }
        if page_start > page_end {
            return Err(PipelineError::InvalidInput(format!(
                "page_start {} exceeds page_end {}",
                page_start, page_end
            )));
        }
        Ok(Self {
            chunk_id: chunk_id.into(),
            doc_id: doc_id.into(),
            content_type,
            page_start,
            page_end,
            content_text: content_text.into(),
            section_path: None,
            figure_id: None,
            table_id: None,
            caption: None,
            asset_ref: None,
            metadata: Map::new(),
        })
    }

    pub fn with_figure_id(mut self, figure_id: impl Into<String>) -> Self {
        self.figure_id = Some(figure_id.into());
        self
    }

    pub fn with_table_id(mut self, table_id: impl Into<String>) -> Self {
        self.table_id = Some(table_id.into());
        self
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    pub fn with_section_path(mut self, section_path: impl Into<String>) -> Self {
        self.section_path = Some(section_path.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Attach a dense embedding to chunk metadata.
    ///
    /// The vector must be non-empty; dimension consistency within a document
    /// is the orchestrator's responsibility.
    pub fn set_embedding(&mut self, embedding: &[f32]) -> Result<()> {
        if embedding.is_empty() {
            return Err(PipelineError::InvalidInput(
                "embedding must be non-empty".to_string(),
            ));
        }
        let values: Vec<Value> = embedding
            .iter()
            .map(|v| {
                serde_json::Number::from_f64(f64::from(*v))
                    .map(Value::Number)
                    .unwrap_or(Value::from(0.0))
            })
            .collect();
        self.metadata
            .insert("embedding".to_string(), Value::Array(values));
        Ok(())
    }

    /// Read the dense embedding back out of metadata, if present and numeric.
    pub fn embedding(&self) -> Option<Vec<f32>> {
        let values = self.metadata.get("embedding")?.as_array()?;
        if values.is_empty() {
            return None;
        }
        let mut out = Vec::with_capacity(values.len());
        for value in values {
            out.push(value.as_f64()? as f32);
        }
        Some(out)
    }

    pub fn has_embedding(&self) -> bool {
        self.embedding().is_some()
    }
}

/// Equality is by chunk id.
impl PartialEq for Chunk {
    fn eq(&self, other: &Self) -> bool {
        self.chunk_id == other.chunk_id
    }
}

impl Eq for Chunk {}

/// Reference to the evidence supporting part of an answer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Citation {
    pub doc_id: String,
    pub page: u32,
    #[serde(default)]
    pub section_path: Option<String>,
    #[serde(default)]
    pub figure_id: Option<String>,
    #[serde(default)]
    pub table_id: Option<String>,
}

impl Citation {
    pub fn new(doc_id: impl Into<String>, page: u32) -> Self {
        Self {
            doc_id: doc_id.into(),
            page,
            section_path: None,
            figure_id: None,
            table_id: None,
        }
    }

    /// Human-readable citation label, e.g. `pump_x p.12 | table tbl-1`
    pub fn label(&self) -> String {
        let mut parts = vec![format!("{} p.{}", self.doc_id, self.page)];
        if let Some(section) = &self.section_path {
            parts.push(format!("section {}", section));
        }
        if let Some(figure) = &self.figure_id {
            parts.push(format!("figure {}", figure));
        }
        if let Some(table) = &self.table_id {
            parts.push(format!("table {}", table));
        }
        parts.join(" | ")
    }
}

/// Grounding policy: an answer is grounded only when at least one citation
/// is present.
pub fn is_answer_grounded(citations: &[Citation]) -> bool {
    !citations.is_empty()
}

/// Every citation must include a document id and a positive page number.
pub fn has_minimum_citation_fields(citations: &[Citation]) -> bool {
    citations
        .iter()
        .all(|citation| !citation.doc_id.is_empty() && citation.page > 0)
}

/// Answer lifecycle status surfaced to callers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    #[default]
    Ok,
    NotFound,
    NeedsFollowUp,
}

impl AnswerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerStatus::Ok => "ok",
            AnswerStatus::NotFound => "not_found",
            AnswerStatus::NeedsFollowUp => "needs_follow_up",
        }
    }
}

impl std::fmt::Display for AnswerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Confidence tier of a composed answer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    #[default]
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Catalog record for a manual
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: String,
    pub title: String,
    pub filename: String,
    #[serde(default = "default_doc_status")]
    pub status: String,
}

fn default_doc_status() -> String {
    "present".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chunk_page_invariants() {
        assert!(Chunk::new("c1", "d1", ContentType::Text, 0, 1, "x").is_err());
        assert!(Chunk::new("c1", "d1", ContentType::Text, 3, 2, "x").is_err());
        let chunk = Chunk::new("c1", "d1", ContentType::Text, 2, 2, "x").unwrap();
        assert_eq!(chunk.page_start, 2);
        assert_eq!(chunk.page_end, 2);
    }

    #[test]
    fn test_chunk_equality_is_by_id() {
        let a = Chunk::new("c1", "d1", ContentType::Text, 1, 1, "left").unwrap();
        let b = Chunk::new("c1", "d2", ContentType::TableRow, 4, 5, "right").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_embedding_round_trip() {
        let mut chunk = Chunk::new("c1", "d1", ContentType::Text, 1, 1, "x").unwrap();
        assert!(chunk.set_embedding(&[]).is_err());
        chunk.set_embedding(&[0.25, -0.5, 1.0]).unwrap();
        let restored = chunk.embedding().unwrap();
        assert_eq!(restored.len(), 3);
        assert!((restored[1] + 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_embedding_rejects_non_numeric_metadata() {
        let chunk = Chunk::new("c1", "d1", ContentType::Text, 1, 1, "x")
            .unwrap()
            .with_metadata("embedding", json!(["not", "numbers"]));
        assert!(chunk.embedding().is_none());
    }

    #[test]
    fn test_content_type_serde_names() {
        let value = serde_json::to_value(ContentType::TableRow).unwrap();
        assert_eq!(value, json!("table_row"));
        let parsed: ContentType = serde_json::from_value(json!("figure_ocr")).unwrap();
        assert_eq!(parsed, ContentType::FigureOcr);
    }

    #[test]
    fn test_citation_label() {
        let mut citation = Citation::new("pump_x", 12);
        citation.table_id = Some("tbl-1".to_string());
        assert_eq!(citation.label(), "pump_x p.12 | table tbl-1");
    }

    #[test]
    fn test_grounding_policies() {
        let mut citations: Vec<Citation> = vec![];
        assert!(!is_answer_grounded(&citations));
        citations.push(Citation::new("d1", 3));
        assert!(is_answer_grounded(&citations));
        assert!(has_minimum_citation_fields(&citations));
        citations.push(Citation::new("", 3));
        assert!(!has_minimum_citation_fields(&citations));
    }
}
