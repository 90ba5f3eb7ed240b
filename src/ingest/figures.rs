//! Figure region detection from raster-image page blocks

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One layout block on a page, as reported by the page raster scanner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RasterBlock {
    /// True for raster-image blocks; text blocks are skipped
    pub is_image: bool,
    /// Raw bbox in page units: (x0, y0, x1, y1)
    pub bbox: [f64; 4],
}

/// Raster layout of one page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRasterBlocks {
    pub page_number: u32,
    pub width: f64,
    pub height: f64,
    pub blocks: Vec<RasterBlock>,
}

/// A detected figure region with a device-independent bbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FigureRegion {
    pub figure_id: String,
    /// Normalized to [0, 1] relative to page dimensions, 4 decimals
    pub bbox: [f64; 4],
    pub page_number: u32,
}

/// Page raster scanning collaborator; absent when no image library is wired
#[async_trait]
pub trait RasterScan: Send + Sync {
    async fn scan(&self, path: &Path) -> anyhow::Result<Vec<PageRasterBlocks>>;
}

/// Extracts raster-image regions per page and normalizes their bounding
/// boxes so coordinates are portable to downstream consumers.
#[derive(Debug, Clone, Default)]
pub struct FigureRegionExtractor;

impl FigureRegionExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, doc_id: &str, page: &PageRasterBlocks) -> Vec<FigureRegion> {
        if page.width <= 0.0 || page.height <= 0.0 {
            return Vec::new();
        }

        let mut regions = Vec::new();
        for (idx, block) in page.blocks.iter().enumerate() {
            if !block.is_image {
                continue;
            }
            let [x0, y0, x1, y1] = block.bbox;
            let bbox = [
                round4(x0 / page.width),
                round4(y0 / page.height),
                round4(x1 / page.width),
                round4(y1 / page.height),
            ];
            regions.push(FigureRegion {
                figure_id: format!("fig_{}_p{:04}_{:03}", doc_id, page.page_number, idx),
                bbox,
                page_number: page.page_number,
            });
        }
        regions
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(blocks: Vec<RasterBlock>) -> PageRasterBlocks {
        PageRasterBlocks {
            page_number: 7,
            width: 600.0,
            height: 800.0,
            blocks,
        }
    }

    #[test]
    fn test_normalizes_image_blocks() {
        let regions = FigureRegionExtractor::new().extract(
            "pump_x",
            &page(vec![
                RasterBlock {
                    is_image: false,
                    bbox: [0.0, 0.0, 600.0, 100.0],
                },
                RasterBlock {
                    is_image: true,
                    bbox: [150.0, 200.0, 450.0, 600.0],
                },
            ]),
        );
        assert_eq!(regions.len(), 1);
        let region = &regions[0];
        assert_eq!(region.figure_id, "fig_pump_x_p0007_001");
        assert_eq!(region.bbox, [0.25, 0.25, 0.75, 0.75]);
        assert_eq!(region.page_number, 7);
    }

    #[test]
    fn test_rounds_to_four_decimals() {
        let regions = FigureRegionExtractor::new().extract(
            "pump_x",
            &page(vec![RasterBlock {
                is_image: true,
                bbox: [100.0, 100.0, 200.0, 300.0],
            }]),
        );
        assert_eq!(regions[0].bbox, [0.1667, 0.125, 0.3333, 0.375]);
    }

    #[test]
    fn test_empty_when_no_image_blocks() {
        let regions = FigureRegionExtractor::new().extract(
            "pump_x",
            &page(vec![RasterBlock {
                is_image: false,
                bbox: [0.0, 0.0, 10.0, 10.0],
            }]),
        );
        assert!(regions.is_empty());
    }

    #[test]
    fn test_empty_when_page_dimensions_invalid() {
        let mut raster = page(vec![RasterBlock {
            is_image: true,
            bbox: [0.0, 0.0, 10.0, 10.0],
        }]);
        raster.width = 0.0;
        let regions = FigureRegionExtractor::new().extract("pump_x", &raster);
        assert!(regions.is_empty());
    }
}
