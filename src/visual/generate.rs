//! Visual artifact generation from persisted chunk rows

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde_json::{json, Map, Value};

use crate::error::Result;
use crate::visual::{
    CONTRACT_VERSION, VISUAL_CHUNKS_FILE, VISUAL_EMBEDDINGS_FILE, VISUAL_MANIFEST_FILE,
};

/// The generated triple for one document
#[derive(Debug, Clone)]
pub struct VisualArtifacts {
    pub visual_rows: Vec<Value>,
    pub embedding_rows: Vec<Value>,
    pub manifest: Value,
}

/// Read `chunks.jsonl` rows as JSON objects, skipping blank lines.
pub fn load_chunk_rows(chunks_path: &Path) -> Result<Vec<Map<String, Value>>> {
    let mut rows = Vec::new();
    if !chunks_path.exists() {
        return Ok(rows);
    }
    let content = fs::read_to_string(chunks_path)?;
    for line in content.lines() {
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        let payload: Value = serde_json::from_str(text)?;
        if let Value::Object(map) = payload {
            rows.push(map);
        }
    }
    Ok(rows)
}

fn str_field(row: &Map<String, Value>, key: &str) -> String {
    row.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn int_field(row: &Map<String, Value>, key: &str) -> i64 {
    row.get(key).and_then(Value::as_i64).unwrap_or(0)
}

fn is_numeric_list(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Array(items)) if !items.is_empty() => {
            items.iter().all(|item| item.is_number())
        }
        _ => false,
    }
}

/// Derive the visual rows, embedding rows, and manifest for one document.
///
/// Pure over the chunk rows: running it twice on the same input produces
/// identical output.
pub fn build_visual_artifacts(doc_id: &str, chunk_rows: &[Map<String, Value>]) -> VisualArtifacts {
    let mut text_chunk_ids_by_page: HashMap<i64, Vec<String>> = HashMap::new();
    for row in chunk_rows {
        if str_field(row, "content_type") != "text" {
            continue;
        }
        let page = int_field(row, "page_start");
        let chunk_id = str_field(row, "chunk_id");
        if page <= 0 || chunk_id.is_empty() {
            continue;
        }
        text_chunk_ids_by_page.entry(page).or_default().push(chunk_id);
    }

    let mut visual_rows: Vec<Value> = Vec::new();
    let mut embedding_rows: Vec<Value> = Vec::new();
    let mut visual_index = 0usize;

    for row in chunk_rows {
        let content_type = str_field(row, "content_type").to_lowercase();
        if !matches!(
            content_type.as_str(),
            "figure_caption" | "figure_ocr" | "vision_summary" | "table" | "table_row"
        ) {
            continue;
        }
        let source_chunk_id = str_field(row, "chunk_id");
        if source_chunk_id.is_empty() {
            continue;
        }

        visual_index += 1;
        let mut page = int_field(row, "page_start");
        if page <= 0 {
            page = int_field(row, "page_end").max(1);
        }
        let figure_id = row.get("figure_id").cloned().filter(|v| !v.is_null());
        let table_id = row.get("table_id").cloned().filter(|v| !v.is_null());

        let modality = if content_type == "table" || content_type == "table_row" {
            "table"
        } else if content_type.contains("figure") {
            "figure"
        } else {
            "image"
        };
        let region_id = figure_id
            .as_ref()
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| {
                table_id
                    .as_ref()
                    .and_then(Value::as_str)
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
            })
            .unwrap_or_else(|| format!("r{:04}", visual_index));
        let visual_chunk_id = format!("{}:visual:{:05}", doc_id, visual_index);

        let snippet = str_field(row, "content_text");
        let mut caption_text = str_field(row, "caption");
        if caption_text.is_empty() && modality == "figure" {
            caption_text = snippet.chars().take(240).collect();
        }

        let metadata = row.get("metadata").and_then(Value::as_object);
        let bbox = metadata
            .and_then(|m| m.get("bbox"))
            .cloned()
            .filter(|v| !v.is_null())
            .unwrap_or_else(|| json!([0, 0, 1, 1]));

        let linked: Vec<String> = text_chunk_ids_by_page
            .get(&page)
            .map(|ids| ids.iter().take(3).cloned().collect())
            .unwrap_or_default();

        visual_rows.push(json!({
            "chunk_id": visual_chunk_id,
            "doc_id": doc_id,
            "page": page,
            "region_id": region_id,
            "bbox": bbox,
            "modality": modality,
            "figure_id": figure_id,
            "table_id": table_id,
            "caption_text": caption_text,
            "ocr_text": if content_type == "figure_ocr" || content_type == "vision_summary" {
                snippet.clone()
            } else {
                String::new()
            },
            "linked_text_chunk_ids": linked,
            "asset_relpath": format!("generated/page_{:04}_{}.png", page, region_id),
            "vision_confidence": 0.5,
            "fallback_used": false,
            "source_chunk_id": source_chunk_id,
        }));

        let embedding = metadata.and_then(|m| m.get("embedding"));
        if is_numeric_list(embedding) {
            let embedding = embedding.cloned().unwrap_or(Value::Null);
            let dim = embedding.as_array().map(Vec::len).unwrap_or(0);
            let provider = metadata
                .and_then(|m| m.get("embedding_provider"))
                .and_then(Value::as_str)
                .unwrap_or("derived");
            let model = metadata
                .and_then(|m| m.get("embedding_model"))
                .and_then(Value::as_str)
                .unwrap_or("chunk-metadata");
            embedding_rows.push(json!({
                "chunk_id": visual_chunk_id,
                "doc_id": doc_id,
                "provider": provider,
                "model": model,
                "dim": dim,
                "embedding": embedding,
            }));
        }
    }

    let mut dims: Vec<usize> = embedding_rows
        .iter()
        .filter_map(|row| row.get("dim").and_then(Value::as_u64))
        .map(|dim| dim as usize)
        .collect();
    dims.sort_unstable();
    dims.dedup();

    let mut manifest = json!({
        "contract_version": CONTRACT_VERSION,
        "doc_id": doc_id,
        "visual_chunk_count": visual_rows.len(),
        "embedding_count": embedding_rows.len(),
        "provider": "derived",
        "model": "chunk-metadata",
    });
    let manifest_map = manifest.as_object_mut().expect("manifest is an object");
    if !embedding_rows.is_empty() && dims.len() == 1 {
        manifest_map.insert("embedding_dim".to_string(), json!(dims[0]));
        manifest_map.insert(
            "provider".to_string(),
            embedding_rows[0]
                .get("provider")
                .cloned()
                .unwrap_or_else(|| json!("derived")),
        );
        manifest_map.insert(
            "model".to_string(),
            embedding_rows[0]
                .get("model")
                .cloned()
                .unwrap_or_else(|| json!("chunk-metadata")),
        );
    } else {
        manifest_map.insert("embedding_dim".to_string(), json!(0));
        if dims.len() > 1 {
            manifest_map.insert(
                "warnings".to_string(),
                json!(["inconsistent embedding dimensions in source metadata"]),
            );
        }
    }

    VisualArtifacts {
        visual_rows,
        embedding_rows,
        manifest,
    }
}

/// Write the artifact triple into the document's asset directory.
pub fn write_visual_artifacts(doc_assets_dir: &Path, artifacts: &VisualArtifacts) -> Result<()> {
    fs::create_dir_all(doc_assets_dir)?;

    let mut chunk_lines = String::new();
    for row in &artifacts.visual_rows {
        chunk_lines.push_str(&serde_json::to_string(row)?);
        chunk_lines.push('\n');
    }
    fs::write(doc_assets_dir.join(VISUAL_CHUNKS_FILE), chunk_lines)?;

    let mut embed_lines = String::new();
    for row in &artifacts.embedding_rows {
        embed_lines.push_str(&serde_json::to_string(row)?);
        embed_lines.push('\n');
    }
    fs::write(doc_assets_dir.join(VISUAL_EMBEDDINGS_FILE), embed_lines)?;

    fs::write(
        doc_assets_dir.join(VISUAL_MANIFEST_FILE),
        serde_json::to_string_pretty(&artifacts.manifest)?,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_row(
        chunk_id: &str,
        content_type: &str,
        page: i64,
        metadata: Value,
    ) -> Map<String, Value> {
        let value = json!({
            "chunk_id": chunk_id,
            "doc_id": "pump_x",
            "content_type": content_type,
            "page_start": page,
            "page_end": page,
            "content_text": format!("{} content", chunk_id),
            "figure_id": if content_type.starts_with("figure") { json!("fig-1") } else { Value::Null },
            "table_id": if content_type == "table_row" { json!("tbl-1") } else { Value::Null },
            "metadata": metadata,
        });
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_modality_and_region_mapping() {
        let rows = vec![
            chunk_row("c1", "text", 1, json!({})),
            chunk_row("c2", "table_row", 1, json!({})),
            chunk_row("c3", "figure_caption", 2, json!({})),
            chunk_row("c4", "vision_summary", 2, json!({})),
        ];
        let artifacts = build_visual_artifacts("pump_x", &rows);
        assert_eq!(artifacts.visual_rows.len(), 3);
        assert_eq!(artifacts.visual_rows[0]["modality"], "table");
        assert_eq!(artifacts.visual_rows[0]["region_id"], "tbl-1");
        assert_eq!(artifacts.visual_rows[1]["modality"], "figure");
        assert_eq!(artifacts.visual_rows[1]["region_id"], "fig-1");
        assert_eq!(artifacts.visual_rows[2]["modality"], "image");
        assert_eq!(artifacts.visual_rows[2]["region_id"], "r0003");
        assert_eq!(artifacts.manifest["visual_chunk_count"], 3);
    }

    #[test]
    fn test_links_text_chunks_from_same_page() {
        let rows = vec![
            chunk_row("t1", "text", 2, json!({})),
            chunk_row("t2", "text", 2, json!({})),
            chunk_row("c1", "figure_caption", 2, json!({})),
        ];
        let artifacts = build_visual_artifacts("pump_x", &rows);
        let linked = artifacts.visual_rows[0]["linked_text_chunk_ids"]
            .as_array()
            .unwrap();
        assert_eq!(linked.len(), 2);
        assert_eq!(linked[0], "t1");
    }

    #[test]
    fn test_embedding_rows_require_numeric_metadata() {
        let rows = vec![
            chunk_row("c1", "table_row", 1, json!({"embedding": [0.1, 0.2]})),
            chunk_row("c2", "table_row", 1, json!({"embedding": ["bad"]})),
            chunk_row("c3", "table_row", 1, json!({})),
        ];
        let artifacts = build_visual_artifacts("pump_x", &rows);
        assert_eq!(artifacts.embedding_rows.len(), 1);
        assert_eq!(artifacts.embedding_rows[0]["dim"], 2);
        assert_eq!(artifacts.manifest["embedding_dim"], 2);
        assert_eq!(artifacts.manifest["embedding_count"], 1);
    }

    #[test]
    fn test_inconsistent_dims_zero_out_manifest_dim() {
        let rows = vec![
            chunk_row("c1", "table_row", 1, json!({"embedding": [0.1, 0.2]})),
            chunk_row("c2", "table_row", 1, json!({"embedding": [0.1, 0.2, 0.3]})),
        ];
        let artifacts = build_visual_artifacts("pump_x", &rows);
        assert_eq!(artifacts.manifest["embedding_dim"], 0);
        let warnings = artifacts.manifest["warnings"].as_array().unwrap();
        assert_eq!(
            warnings[0],
            "inconsistent embedding dimensions in source metadata"
        );
    }

    #[test]
    fn test_generation_is_deterministic() {
        let rows = vec![
            chunk_row("t1", "text", 1, json!({})),
            chunk_row("c1", "figure_ocr", 1, json!({"embedding": [0.5, 0.5]})),
        ];
        let dir = tempfile::tempdir().unwrap();
        let first = build_visual_artifacts("pump_x", &rows);
        write_visual_artifacts(dir.path(), &first).unwrap();
        let first_bytes = std::fs::read(dir.path().join(VISUAL_CHUNKS_FILE)).unwrap();

        let second = build_visual_artifacts("pump_x", &rows);
        write_visual_artifacts(dir.path(), &second).unwrap();
        let second_bytes = std::fs::read(dir.path().join(VISUAL_CHUNKS_FILE)).unwrap();
        assert_eq!(first_bytes, second_bytes);
    }
}
