//! Ingestion pipeline: per-page extraction, embedding, persistence

pub mod figures;
pub mod page;
pub mod pipeline;
pub mod tables;

pub use figures::{FigureRegion, FigureRegionExtractor, PageRasterBlocks, RasterBlock, RasterScan};
pub use page::{PageOutput, PageProcessor, VisionBudget};
pub use pipeline::{
    IngestOptions, IngestPipeline, IngestResult, IngestStage, ProgressEvent, ProgressFn,
};
pub use tables::{ExtractedTable, ExtractedTableRow, TableRowExtractor};
