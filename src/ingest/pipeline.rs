//! Ingestion orchestration
//!
//! Parses a PDF into pages, fans the pages across a bounded worker pool,
//! aggregates chunks in page order, runs the two-pass embedding stage with
//! coverage accounting, persists the corpus, and emits progress events.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::Chunk;
use crate::error::{IngestError, Result};
use crate::ingest::figures::{FigureRegion, FigureRegionExtractor, RasterScan};
use crate::ingest::page::{PageProcessor, VisionBudget};
use crate::ports::{ChunkStore, Embedding, Ocr, PdfParser, TableExtract, Vision};

/// Pipeline stage names shared with ingestion job records
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IngestStage {
    Queued,
    Running,
    Extracting,
    Embedding,
    Persisted,
    VisualArtifacts,
    ContractValidation,
    Completed,
    Failed,
}

impl IngestStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestStage::Queued => "queued",
            IngestStage::Running => "running",
            IngestStage::Extracting => "extracting",
            IngestStage::Embedding => "embedding",
            IngestStage::Persisted => "persisted",
            IngestStage::VisualArtifacts => "visual_artifacts",
            IngestStage::ContractValidation => "contract_validation",
            IngestStage::Completed => "completed",
            IngestStage::Failed => "failed",
        }
    }
}

/// Progress payload delivered to the optional observer callback
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: IngestStage,
    pub processed_pages: usize,
    pub total_pages: usize,
    pub message: String,
}

/// Synchronous progress observer; invocations preserve pipeline ordering
pub type ProgressFn = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Ingestion knobs, mirrored from [`crate::config::IngestConfig`]
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub vision_max_pages: usize,
    pub page_workers: usize,
    pub embedding_min_coverage: f64,
    pub embedding_fail_fast: bool,
    pub embedding_second_pass_max_chars: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        let config = crate::config::IngestConfig::default();
        Self {
            vision_max_pages: config.vision_max_pages,
            page_workers: config.ingest_page_workers,
            embedding_min_coverage: config.embedding_min_coverage,
            embedding_fail_fast: config.embedding_fail_fast,
            embedding_second_pass_max_chars: config.embedding_second_pass_max_chars,
        }
    }
}

/// Result record of one ingestion run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResult {
    pub doc_id: String,
    pub asset_ref: String,
    pub total_pages: usize,
    pub total_chunks: usize,
    pub by_type: HashMap<String, usize>,
    pub embedding_attempted: bool,
    pub embedding_success_count: usize,
    pub embedding_failed_count: usize,
    pub embedding_coverage: f64,
    pub embedding_second_pass_attempted: bool,
    pub embedding_second_pass_recovered: usize,
    pub embedding_failures: Vec<String>,
    pub warnings: Vec<String>,
}

/// Orchestrates extraction, embedding, and persistence for one document
pub struct IngestPipeline {
    pdf_parser: Arc<dyn PdfParser>,
    tables: Arc<dyn TableExtract>,
    chunk_store: Arc<dyn ChunkStore>,
    ocr: Option<Arc<dyn Ocr>>,
    vision: Option<Arc<dyn Vision>>,
    raster_scan: Option<Arc<dyn RasterScan>>,
    embedding: Option<Arc<dyn Embedding>>,
    progress: Option<ProgressFn>,
    options: IngestOptions,
}

impl IngestPipeline {
    pub fn new(
        pdf_parser: Arc<dyn PdfParser>,
        tables: Arc<dyn TableExtract>,
        chunk_store: Arc<dyn ChunkStore>,
        options: IngestOptions,
    ) -> Self {
        Self {
            pdf_parser,
            tables,
            chunk_store,
            ocr: None,
            vision: None,
            raster_scan: None,
            embedding: None,
            progress: None,
            options,
        }
    }

    pub fn with_ocr(mut self, ocr: Arc<dyn Ocr>) -> Self {
        self.ocr = Some(ocr);
        self
    }

    pub fn with_vision(mut self, vision: Arc<dyn Vision>) -> Self {
        self.vision = Some(vision);
        self
    }

    pub fn with_raster_scan(mut self, raster_scan: Arc<dyn RasterScan>) -> Self {
        self.raster_scan = Some(raster_scan);
        self
    }

    pub fn with_embedding(mut self, embedding: Arc<dyn Embedding>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    fn emit(&self, stage: IngestStage, processed: usize, total: usize, message: &str) {
        if let Some(progress) = &self.progress {
            progress(&ProgressEvent {
                stage,
                processed_pages: processed,
                total_pages: total,
                message: message.to_string(),
            });
        }
    }

    pub async fn run(&self, doc_id: &str, pdf_path: &Path) -> Result<IngestResult> {
        info!("ingesting {} from {}", doc_id, pdf_path.display());
        let mut warnings: Vec<String> = Vec::new();

        let pages = self
            .pdf_parser
            .parse(pdf_path)
            .await
            .map_err(|e| IngestError::PdfParseFailed(e.to_string()))?;
        let total_pages = pages.len();

        let regions = self.scan_regions(doc_id, pdf_path, &mut warnings).await;

        self.emit(IngestStage::Extracting, 0, total_pages, "Extracting pages");
        let budget = VisionBudget::new(if self.vision.is_some() {
            self.options.vision_max_pages
        } else {
            0
        });
        let processor = Arc::new(PageProcessor::new(
            doc_id,
            pdf_path,
            self.ocr.clone(),
            self.tables.clone(),
            self.vision.clone(),
            budget,
        ));

        let workers = self.options.page_workers.max(1);
        let mut outputs = Vec::with_capacity(total_pages);
        if workers == 1 || total_pages <= 1 {
            for page in &pages {
                let page_regions = regions
                    .get(&page.page_number)
                    .cloned()
                    .unwrap_or_default();
                let output = processor.process(page, &page_regions).await;
                outputs.push(output);
                self.emit(
                    IngestStage::Extracting,
                    outputs.len(),
                    total_pages,
                    "Extracting pages",
                );
            }
        } else {
            let mut stream = futures::stream::iter(pages.iter().map(|page| {
                let processor = processor.clone();
                let page_regions = regions
                    .get(&page.page_number)
                    .cloned()
                    .unwrap_or_default();
                async move { processor.process(page, &page_regions).await }
            }))
            .buffer_unordered(workers);

            let mut processed = 0usize;
            while let Some(output) = stream.next().await {
                processed += 1;
                self.emit(
                    IngestStage::Extracting,
                    processed,
                    total_pages,
                    "Extracting pages",
                );
                outputs.push(output);
            }
        }

        // Workers finish out of order; the persisted corpus is page-ordered.
        outputs.sort_by_key(|output| output.page_number);
        let mut chunks: Vec<Chunk> = Vec::new();
        for mut output in outputs {
            warnings.append(&mut output.warnings);
            chunks.append(&mut output.chunks);
        }

        let embedding_report = match &self.embedding {
            Some(embedding) => {
                self.emit(
                    IngestStage::Embedding,
                    total_pages,
                    total_pages,
                    "Embedding chunks",
                );
                self.embed_chunks(embedding.as_ref(), &mut chunks).await
            }
            None => EmbeddingReport::skipped(chunks.len()),
        };

        if embedding_report.second_pass_recovered > 0 {
            warnings.push(format!(
                "Second-pass embedding recovered {} chunks.",
                embedding_report.second_pass_recovered
            ));
        }

        let coverage = embedding_report.coverage();
        if self.embedding.is_some()
            && self.options.embedding_fail_fast
            && coverage < self.options.embedding_min_coverage
        {
            return Err(IngestError::EmbeddingCoverage {
                coverage,
                minimum: self.options.embedding_min_coverage,
                failed: embedding_report.failures.len(),
                total: chunks.len(),
            }
            .into());
        }

        let asset_ref = self
            .chunk_store
            .persist(doc_id, &chunks)
            .await
            .map_err(|e| IngestError::PersistFailed(e.to_string()))?;
        self.emit(
            IngestStage::Persisted,
            total_pages,
            total_pages,
            "Corpus persisted",
        );

        let mut by_type: HashMap<String, usize> = HashMap::new();
        for chunk in &chunks {
            *by_type
                .entry(chunk.content_type.as_str().to_string())
                .or_insert(0) += 1;
        }

        info!(
            "ingested {}: {} chunks over {} pages (embedding coverage {:.3})",
            doc_id,
            chunks.len(),
            total_pages,
            coverage
        );

        Ok(IngestResult {
            doc_id: doc_id.to_string(),
            asset_ref,
            total_pages,
            total_chunks: chunks.len(),
            by_type,
            embedding_attempted: self.embedding.is_some(),
            embedding_success_count: embedding_report.success_count,
            embedding_failed_count: embedding_report.failures.len(),
            embedding_coverage: coverage,
            embedding_second_pass_attempted: embedding_report.second_pass_attempted,
            embedding_second_pass_recovered: embedding_report.second_pass_recovered,
            embedding_failures: embedding_report.failures,
            warnings,
        })
    }

    async fn scan_regions(
        &self,
        doc_id: &str,
        pdf_path: &Path,
        warnings: &mut Vec<String>,
    ) -> HashMap<u32, Vec<FigureRegion>> {
        let Some(raster_scan) = &self.raster_scan else {
            return HashMap::new();
        };
        match raster_scan.scan(pdf_path).await {
            Ok(rasters) => {
                let extractor = FigureRegionExtractor::new();
                let mut map: HashMap<u32, Vec<FigureRegion>> = HashMap::new();
                for raster in &rasters {
                    let regions = extractor.extract(doc_id, raster);
                    if !regions.is_empty() {
                        map.insert(raster.page_number, regions);
                    }
                }
                map
            }
            Err(e) => {
                warnings.push(format!("Figure region scan unavailable: {}", e));
                HashMap::new()
            }
        }
    }

    async fn embed_chunks(
        &self,
        embedding: &dyn Embedding,
        chunks: &mut [Chunk],
    ) -> EmbeddingReport {
        let mut report = EmbeddingReport::default();
        let mut failed_indices: Vec<usize> = Vec::new();

        for (idx, chunk) in chunks.iter_mut().enumerate() {
            match Self::try_embed(embedding, &chunk.content_text).await {
                Ok(vector) => {
                    if chunk.set_embedding(&vector).is_ok() {
                        report.success_count += 1;
                    }
                }
                Err(reason) => {
                    debug!("embedding failed for {}: {}", chunk.chunk_id, reason);
                    report
                        .failures
                        .push(format!("chunk {}: {}", chunk.chunk_id, reason));
                    failed_indices.push(idx);
                }
            }
        }

        if !failed_indices.is_empty() {
            report.second_pass_attempted = true;
            let mut still_failed: Vec<String> = Vec::new();
            for idx in failed_indices {
                let chunk = &mut chunks[idx];
                if self.second_pass_embed(embedding, chunk).await {
                    report.second_pass_recovered += 1;
                    report.success_count += 1;
                } else {
                    still_failed.push(chunk.chunk_id.clone());
                }
            }
            report
                .failures
                .retain(|entry| still_failed.iter().any(|id| entry.contains(id.as_str())));
        }

        report.total = chunks.len();
        report
    }

    /// Retry with progressively shorter truncations of the chunk text.
    async fn second_pass_embed(&self, embedding: &dyn Embedding, chunk: &mut Chunk) -> bool {
        let text_len = chunk.content_text.chars().count();
        let mut candidates: Vec<usize> = Vec::new();
        for limit in [
            self.options.embedding_second_pass_max_chars,
            1536,
            1024,
            768,
        ] {
            let bounded = limit.min(text_len);
            if bounded > 0 && !candidates.contains(&bounded) {
                candidates.push(bounded);
            }
        }

        for limit in candidates {
            let truncated: String = chunk.content_text.chars().take(limit).collect();
            if let Ok(vector) = Self::try_embed(embedding, &truncated).await {
                if chunk.set_embedding(&vector).is_ok() {
                    return true;
                }
            }
        }
        false
    }

    async fn try_embed(
        embedding: &dyn Embedding,
        text: &str,
    ) -> std::result::Result<Vec<f32>, String> {
        match embedding.embed_text(text).await {
            Ok(vector) if !vector.is_empty() => Ok(vector),
            Ok(_) => Err(embedding
                .last_error()
                .unwrap_or_else(|| "embedding-returned-empty-vector".to_string())),
            Err(e) => Err(embedding.last_error().unwrap_or_else(|| e.to_string())),
        }
    }
}

#[derive(Debug, Default)]
struct EmbeddingReport {
    total: usize,
    success_count: usize,
    failures: Vec<String>,
    second_pass_attempted: bool,
    second_pass_recovered: usize,
}

impl EmbeddingReport {
    fn skipped(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    fn coverage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.success_count as f64 / self.total as f64
    }
}
