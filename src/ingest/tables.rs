//! Heuristic table-row extraction from page text
//!
//! Detects table-like blocks using pipe delimiters, multi-column spacing
//! (2+ spaces), key-value rows with numeric values, and numeric-heavy lines,
//! then converts each block into structured rows with headers, cells, and
//! per-cell units.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::ports::TableExtract;

static KEY_VALUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9\-/()\s]{2,}:\s*[-+]?\d+(?:\.\d+)?\s*(?:[A-Za-z%/]+)?$")
        .expect("key-value pattern")
});
static MULTI_SPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s{2,}").expect("multi-space pattern"));
static NUMERIC_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-+]?\d+(?:\.\d+)?").expect("numeric token pattern"));
static ALPHA_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z]{2,}").expect("alpha token pattern"));
static UNIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(([^()]{1,20})\)").expect("unit pattern"));

/// One structured data row of an extracted table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedTableRow {
    pub row_index: usize,
    pub headers: Vec<String>,
    pub row_cells: Vec<String>,
    /// Same length as `row_cells`, empty string where no unit was found
    pub units: Vec<String>,
    pub raw_text: String,
}

/// A table detected on one page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedTable {
    pub table_id: String,
    pub page_number: u32,
    pub rows: Vec<ExtractedTableRow>,
}

/// Heuristic row-level table extractor for mixed PDF/manual text
#[derive(Debug, Clone, Default)]
pub struct TableRowExtractor;

/// How a line was split into cells
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SplitKind {
    Pipe,
    Colon,
    Spacing,
}

impl TableRowExtractor {
    pub fn new() -> Self {
        Self
    }

    fn looks_tabular(line: &str) -> bool {
        let s = line.trim();
        if s.is_empty() {
            return false;
        }
        if s.contains('|') {
            return true;
        }
        if Self::is_key_value(s) {
            return true;
        }
        let cols = MULTI_SPACE_RE.split(s).filter(|c| !c.is_empty()).count();
        if cols >= 3 {
            return true;
        }
        let numeric_tokens = NUMERIC_TOKEN_RE.find_iter(s).count();
        let alpha_tokens = ALPHA_TOKEN_RE.find_iter(s).count();
        numeric_tokens >= 2 && alpha_tokens >= 1
    }

    fn is_key_value(line: &str) -> bool {
        // URL-like colons (http://) are not key-value separators.
        if line.contains("://") {
            return false;
        }
        KEY_VALUE_RE.is_match(line)
    }

    fn split_row(line: &str) -> (Vec<String>, SplitKind) {
        if line.contains('|') {
            let cells = line
                .split('|')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect();
            return (cells, SplitKind::Pipe);
        }
        if Self::is_key_value(line) {
            if let Some(pos) = line.find(':') {
                let (label, value) = line.split_at(pos);
                let cells = vec![label.trim().to_string(), value[1..].trim().to_string()];
                return (cells, SplitKind::Colon);
            }
        }
        let cells = MULTI_SPACE_RE
            .split(line)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        (cells, SplitKind::Spacing)
    }

    /// Value-like cells start with a signed number; everything else is a
    /// candidate header cell.
    fn is_numeric_cell(cell: &str) -> bool {
        let trimmed = cell.trim_start_matches(['-', '+']);
        trimmed.starts_with(|c: char| c.is_ascii_digit())
    }

    fn cell_unit(cell: &str) -> String {
        UNIT_RE
            .captures(cell)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default()
    }

    fn table_id(doc_id: Option<&str>, page_number: u32, table_index: usize) -> String {
        match doc_id {
            Some(doc_id) if !doc_id.is_empty() => {
                format!("tbl_{}_{}_{:03}", doc_id, page_number, table_index)
            }
            _ => format!("table-p{:04}-{:03}", page_number, table_index),
        }
    }

    fn build_table(
        group: &[String],
        table_id: String,
        page_number: u32,
    ) -> ExtractedTable {
        let split: Vec<(Vec<String>, SplitKind)> =
            group.iter().map(|line| Self::split_row(line)).collect();

        // Key-value table: most rows are exactly two cells from a colon split.
        let colon_pairs = split
            .iter()
            .filter(|(cells, kind)| *kind == SplitKind::Colon && cells.len() == 2)
            .count();
        let is_key_value_table =
            !split.is_empty() && (colon_pairs as f64 / split.len() as f64) >= 0.80;

        let mut headers: Vec<String> = Vec::new();
        let mut data_start = 0usize;
        if !is_key_value_table {
            if let Some((first_cells, _)) = split.first() {
                if !first_cells.is_empty() {
                    let header_like = first_cells
                        .iter()
                        .filter(|cell| !Self::is_numeric_cell(cell) && cell.len() < 30)
                        .count();
                    if (header_like as f64 / first_cells.len() as f64) >= 0.50 {
                        headers = first_cells.clone();
                        data_start = 1;
                    }
                }
            }
        }

        let mut rows: Vec<ExtractedTableRow> = Vec::new();
        for (line, (cells, _)) in group.iter().zip(split.iter()).skip(data_start) {
            if cells.is_empty() {
                continue;
            }
            let units: Vec<String> = cells.iter().map(|cell| Self::cell_unit(cell)).collect();
            rows.push(ExtractedTableRow {
                row_index: rows.len(),
                headers: headers.clone(),
                row_cells: cells.clone(),
                units,
                raw_text: line.clone(),
            });
        }

        if rows.is_empty() {
            let block = group.join("\n");
            rows.push(ExtractedTableRow {
                row_index: 0,
                headers: Vec::new(),
                row_cells: vec![block.clone()],
                units: vec![String::new()],
                raw_text: block,
            });
        }

        ExtractedTable {
            table_id,
            page_number,
            rows,
        }
    }
}

impl TableExtract for TableRowExtractor {
    fn extract(
        &self,
        page_text: &str,
        page_number: u32,
        doc_id: Option<&str>,
    ) -> Vec<ExtractedTable> {
        let lines: Vec<String> = page_text
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect();
        if lines.is_empty() {
            return Vec::new();
        }

        let mut groups: Vec<Vec<String>> = Vec::new();
        let mut current: Vec<String> = Vec::new();
        for line in lines {
            if Self::looks_tabular(&line) {
                current.push(line);
            } else {
                if current.len() >= 2 {
                    groups.push(std::mem::take(&mut current));
                }
                current.clear();
            }
        }
        if current.len() >= 2 {
            groups.push(current);
        }

        groups
            .iter()
            .enumerate()
            .map(|(idx, group)| {
                let table_id = Self::table_id(doc_id, page_number, idx + 1);
                Self::build_table(group, table_id, page_number)
            })
            .collect()
    }
}
