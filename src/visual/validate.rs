//! Contract validation for the visual artifact triple

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use serde_json::{Map, Value};

use crate::visual::{
    CONTRACT_VERSION, LOW_CONFIDENCE_THRESHOLD, VISUAL_CHUNKS_FILE, VISUAL_EMBEDDINGS_FILE,
    VISUAL_MANIFEST_FILE,
};

/// Structured validation outcome; never raises
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

fn as_int(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i)
            } else {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0)
                    .map(|f| f as i64)
            }
        }
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn as_float(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn str_field(row: &Map<String, Value>, key: &str) -> String {
    row.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn load_json_lines(path: &Path, report: &mut ValidationReport, label: &str) -> Vec<Map<String, Value>> {
    let mut rows = Vec::new();
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => {
            report.errors.push(format!("{} missing: {}", label, path.display()));
            return rows;
        }
    };
    for (line_no, raw) in content.lines().enumerate() {
        let text = raw.trim();
        if text.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => rows.push(map),
            Ok(_) => report
                .errors
                .push(format!("{}:{} must be a JSON object", label, line_no + 1)),
            Err(e) => report
                .errors
                .push(format!("{}:{} invalid JSON: {}", label, line_no + 1, e)),
        }
    }
    rows
}

fn load_manifest(path: &Path, report: &mut ValidationReport) -> Map<String, Value> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => {
            report.errors.push(format!("manifest missing: {}", path.display()));
            return Map::new();
        }
    };
    match serde_json::from_str::<Value>(&content) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            report.errors.push("manifest must be a JSON object".to_string());
            Map::new()
        }
        Err(e) => {
            report.errors.push(format!("manifest invalid JSON: {}", e));
            Map::new()
        }
    }
}

/// Validate one document's artifact triple.
///
/// In strict mode missing files are errors; otherwise they are warnings and
/// the rest of the checks are skipped.
pub fn validate_visual_artifacts_for_doc(doc_assets_dir: &Path, strict: bool) -> ValidationReport {
    let mut report = ValidationReport::default();
    let doc_id = doc_assets_dir
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();

    let chunk_path = doc_assets_dir.join(VISUAL_CHUNKS_FILE);
    let embed_path = doc_assets_dir.join(VISUAL_EMBEDDINGS_FILE);
    let manifest_path = doc_assets_dir.join(VISUAL_MANIFEST_FILE);

    let mut missing = Vec::new();
    for (name, path) in [
        (VISUAL_CHUNKS_FILE, &chunk_path),
        (VISUAL_EMBEDDINGS_FILE, &embed_path),
        (VISUAL_MANIFEST_FILE, &manifest_path),
    ] {
        if !path.exists() {
            missing.push(name);
        }
    }
    for name in &missing {
        let message = format!("{}: missing required artifact file `{}`", doc_id, name);
        if strict {
            report.errors.push(message);
        } else {
            report.warnings.push(message);
        }
    }
    if !missing.is_empty() {
        return report;
    }

    let chunk_label = format!("{}:{}", doc_id, VISUAL_CHUNKS_FILE);
    let embed_label = format!("{}:{}", doc_id, VISUAL_EMBEDDINGS_FILE);
    let chunk_rows = load_json_lines(&chunk_path, &mut report, &chunk_label);
    let embed_rows = load_json_lines(&embed_path, &mut report, &embed_label);
    let manifest = load_manifest(&manifest_path, &mut report);

    let mut chunk_ids: HashSet<String> = HashSet::new();
    for (idx, row) in chunk_rows.iter().enumerate() {
        let prefix = format!("{}:{}", chunk_label, idx + 1);

        let chunk_id = str_field(row, "chunk_id");
        if chunk_id.is_empty() {
            report.errors.push(format!("{} missing chunk_id", prefix));
        } else if !chunk_ids.insert(chunk_id.clone()) {
            report
                .errors
                .push(format!("{} duplicate chunk_id `{}`", prefix, chunk_id));
        }

        let row_doc_id = str_field(row, "doc_id");
        if row_doc_id != doc_id {
            report.errors.push(format!(
                "{} doc_id mismatch `{}` != `{}`",
                prefix, row_doc_id, doc_id
            ));
        }

        match as_int(row.get("page")) {
            Some(page) if page >= 1 => {}
            _ => report
                .errors
                .push(format!("{} page must be integer >= 1", prefix)),
        }

        if str_field(row, "region_id").is_empty() {
            report.errors.push(format!("{} missing region_id", prefix));
        }

        let bbox_ok = row
            .get("bbox")
            .and_then(Value::as_array)
            .map(|items| items.len() == 4 && items.iter().all(Value::is_number))
            .unwrap_or(false);
        if !bbox_ok {
            report
                .errors
                .push(format!("{} bbox must be [x1, y1, x2, y2] numeric", prefix));
        }

        let modality = str_field(row, "modality").to_lowercase();
        if !matches!(modality.as_str(), "figure" | "table" | "image") {
            report.errors.push(format!(
                "{} modality must be one of figure|table|image",
                prefix
            ));
        }

        if str_field(row, "asset_relpath").is_empty() {
            report
                .errors
                .push(format!("{} missing asset_relpath", prefix));
        }

        if let Some(linked) = row.get("linked_text_chunk_ids") {
            if !linked.is_null() {
                let ok = linked
                    .as_array()
                    .map(|items| {
                        items
                            .iter()
                            .all(|item| item.as_str().map(|s| !s.trim().is_empty()).unwrap_or(false))
                    })
                    .unwrap_or(false);
                if !ok {
                    report.errors.push(format!(
                        "{} linked_text_chunk_ids must be a non-empty string list",
                        prefix
                    ));
                }
            }
        }

        let confidence = as_float(row.get("vision_confidence"));
        let fallback_used = row
            .get("fallback_used")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if let Some(confidence) = confidence {
            if confidence < LOW_CONFIDENCE_THRESHOLD && !fallback_used {
                report.warnings.push(format!(
                    "{} low vision_confidence={:.3} without fallback_used=true",
                    prefix, confidence
                ));
            }
        }
    }

    let mut embed_ids: HashSet<String> = HashSet::new();
    let mut embed_dims: BTreeMap<i64, usize> = BTreeMap::new();
    for (idx, row) in embed_rows.iter().enumerate() {
        let prefix = format!("{}:{}", embed_label, idx + 1);

        let chunk_id = str_field(row, "chunk_id");
        if chunk_id.is_empty() {
            report.errors.push(format!("{} missing chunk_id", prefix));
        } else if !embed_ids.insert(chunk_id.clone()) {
            report
                .errors
                .push(format!("{} duplicate chunk_id `{}`", prefix, chunk_id));
        }

        let row_doc_id = str_field(row, "doc_id");
        if row_doc_id != doc_id {
            report.errors.push(format!(
                "{} doc_id mismatch `{}` != `{}`",
                prefix, row_doc_id, doc_id
            ));
        }

        if str_field(row, "provider").is_empty() {
            report.errors.push(format!("{} missing provider", prefix));
        }
        if str_field(row, "model").is_empty() {
            report.errors.push(format!("{} missing model", prefix));
        }

        let dim = match as_int(row.get("dim")) {
            Some(dim) if dim > 0 => Some(dim),
            _ => {
                report
                    .errors
                    .push(format!("{} dim must be integer > 0", prefix));
                None
            }
        };

        let embedding = row.get("embedding").and_then(Value::as_array);
        match embedding {
            Some(items) if !items.is_empty() => {
                if items.iter().any(|item| !item.is_number()) {
                    report
                        .errors
                        .push(format!("{} embedding values must be numeric", prefix));
                }
                if let Some(dim) = dim {
                    if items.len() as i64 != dim {
                        report.errors.push(format!(
                            "{} embedding length {} != dim {}",
                            prefix,
                            items.len(),
                            dim
                        ));
                    }
                }
            }
            _ => report
                .errors
                .push(format!("{} embedding must be non-empty list", prefix)),
        }

        if let Some(dim) = dim {
            *embed_dims.entry(dim).or_insert(0) += 1;
        }

        if !chunk_id.is_empty() && !chunk_ids.is_empty() && !chunk_ids.contains(&chunk_id) {
            report.errors.push(format!(
                "{} chunk_id `{}` not present in {}",
                prefix, chunk_id, VISUAL_CHUNKS_FILE
            ));
        }
    }

    if embed_dims.len() > 1 {
        let dims: Vec<i64> = embed_dims.keys().copied().collect();
        report.errors.push(format!(
            "{} has inconsistent dimensions: {:?}",
            embed_label, dims
        ));
    }

    let manifest_label = format!("{}:{}", doc_id, VISUAL_MANIFEST_FILE);
    let manifest_doc = str_field(&manifest, "doc_id");
    if !manifest_doc.is_empty() && manifest_doc != doc_id {
        report.errors.push(format!(
            "{} doc_id mismatch `{}` != `{}`",
            manifest_label, manifest_doc, doc_id
        ));
    }

    let contract_version = str_field(&manifest, "contract_version");
    if !contract_version.is_empty() && contract_version != CONTRACT_VERSION {
        report.warnings.push(format!(
            "{} contract_version should be `{}`",
            manifest_label, CONTRACT_VERSION
        ));
    }

    match as_int(manifest.get("visual_chunk_count")) {
        Some(count) if count >= 0 => {
            if count as usize != chunk_rows.len() {
                report.errors.push(format!(
                    "{} visual_chunk_count {} != actual {}",
                    manifest_label,
                    count,
                    chunk_rows.len()
                ));
            }
        }
        _ => report.errors.push(format!(
            "{} visual_chunk_count must be integer >= 0",
            manifest_label
        )),
    }

    match as_int(manifest.get("embedding_count")) {
        Some(count) if count >= 0 => {
            if count as usize != embed_rows.len() {
                report.errors.push(format!(
                    "{} embedding_count {} != actual {}",
                    manifest_label,
                    count,
                    embed_rows.len()
                ));
            }
        }
        _ => report.errors.push(format!(
            "{} embedding_count must be integer >= 0",
            manifest_label
        )),
    }

    if !embed_rows.is_empty() {
        match as_int(manifest.get("embedding_dim")) {
            Some(dim) if dim > 0 => {
                if !embed_dims.is_empty() && !embed_dims.contains_key(&dim) {
                    let dims: Vec<i64> = embed_dims.keys().copied().collect();
                    report.errors.push(format!(
                        "{} embedding_dim {} != actual {:?}",
                        manifest_label, dim, dims
                    ));
                }
            }
            _ => report.errors.push(format!(
                "{} embedding_dim must be integer > 0",
                manifest_label
            )),
        }

        if str_field(&manifest, "provider").is_empty() {
            report.errors.push(format!(
                "{} provider is required when embeddings exist",
                manifest_label
            ));
        }
        if str_field(&manifest, "model").is_empty() {
            report.errors.push(format!(
                "{} model is required when embeddings exist",
                manifest_label
            ));
        }
    }

    report
}

/// Validate every document directory under the assets root (or a selected
/// subset), keyed by doc id.
pub fn validate_visual_artifacts(
    assets_dir: &Path,
    doc_ids: Option<&[String]>,
    strict: bool,
) -> BTreeMap<String, ValidationReport> {
    let mut results = BTreeMap::new();

    if !assets_dir.exists() {
        let mut report = ValidationReport::default();
        let message = format!("assets_dir does not exist: {}", assets_dir.display());
        if strict {
            report.errors.push(message);
        } else {
            report.warnings.push(message);
        }
        results.insert("<all>".to_string(), report);
        return results;
    }

    let selected: Vec<String> = match doc_ids {
        Some(ids) => {
            let mut ids: Vec<String> = ids
                .iter()
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .collect();
            ids.sort();
            ids.dedup();
            ids
        }
        None => {
            let mut found = Vec::new();
            if let Ok(entries) = fs::read_dir(assets_dir) {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.is_dir() && path.join("chunks.jsonl").exists() {
                        if let Some(name) = path.file_name().and_then(|s| s.to_str()) {
                            found.push(name.to_string());
                        }
                    }
                }
            }
            found.sort();
            found
        }
    };

    for doc_id in selected {
        let report = validate_visual_artifacts_for_doc(&assets_dir.join(&doc_id), strict);
        results.insert(doc_id, report);
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visual::generate::{build_visual_artifacts, write_visual_artifacts};
    use serde_json::json;

    fn seed_valid_doc(dir: &Path) {
        let rows = vec![
            json!({
                "chunk_id": "t1", "doc_id": "pump_x", "content_type": "text",
                "page_start": 1, "page_end": 1, "content_text": "intro", "metadata": {}
            }),
            json!({
                "chunk_id": "c1", "doc_id": "pump_x", "content_type": "table_row",
                "page_start": 1, "page_end": 1, "content_text": "Torque | 45",
                "table_id": "tbl-1", "metadata": {"embedding": [0.1, 0.2, 0.3]}
            }),
        ];
        let maps: Vec<_> = rows
            .into_iter()
            .map(|v| v.as_object().unwrap().clone())
            .collect();
        let artifacts = build_visual_artifacts("pump_x", &maps);
        write_visual_artifacts(dir, &artifacts).unwrap();
    }

    #[test]
    fn test_generated_triple_passes_validation() {
        let tmp = tempfile::tempdir().unwrap();
        let doc_dir = tmp.path().join("pump_x");
        seed_valid_doc(&doc_dir);
        let report = validate_visual_artifacts_for_doc(&doc_dir, true);
        assert!(report.is_valid(), "errors: {:?}", report.errors);
    }

    #[test]
    fn test_missing_files_warn_or_error_by_mode() {
        let tmp = tempfile::tempdir().unwrap();
        let doc_dir = tmp.path().join("pump_x");
        std::fs::create_dir_all(&doc_dir).unwrap();

        let lenient = validate_visual_artifacts_for_doc(&doc_dir, false);
        assert!(lenient.is_valid());
        assert_eq!(lenient.warnings.len(), 3);

        let strict = validate_visual_artifacts_for_doc(&doc_dir, true);
        assert_eq!(strict.errors.len(), 3);
    }

    #[test]
    fn test_manifest_count_mismatch_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        let doc_dir = tmp.path().join("pump_x");
        seed_valid_doc(&doc_dir);

        let manifest_path = doc_dir.join(VISUAL_MANIFEST_FILE);
        let mut manifest: Value =
            serde_json::from_str(&std::fs::read_to_string(&manifest_path).unwrap()).unwrap();
        manifest["visual_chunk_count"] = json!(99);
        std::fs::write(&manifest_path, serde_json::to_string(&manifest).unwrap()).unwrap();

        let report = validate_visual_artifacts_for_doc(&doc_dir, true);
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("visual_chunk_count 99")));
    }

    #[test]
    fn test_orphan_embedding_row_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        let doc_dir = tmp.path().join("pump_x");
        seed_valid_doc(&doc_dir);

        let embed_path = doc_dir.join(VISUAL_EMBEDDINGS_FILE);
        let mut content = std::fs::read_to_string(&embed_path).unwrap();
        content.push_str(
            &serde_json::to_string(&json!({
                "chunk_id": "ghost", "doc_id": "pump_x", "provider": "derived",
                "model": "chunk-metadata", "dim": 3, "embedding": [0.1, 0.2, 0.3]
            }))
            .unwrap(),
        );
        content.push('\n');
        std::fs::write(&embed_path, content).unwrap();

        let report = validate_visual_artifacts_for_doc(&doc_dir, true);
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("`ghost` not present")));
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("embedding_count")));
    }

    #[test]
    fn test_low_confidence_without_fallback_warns() {
        let tmp = tempfile::tempdir().unwrap();
        let doc_dir = tmp.path().join("pump_x");
        std::fs::create_dir_all(&doc_dir).unwrap();
        let row = json!({
            "chunk_id": "v1", "doc_id": "pump_x", "page": 1, "region_id": "r0001",
            "bbox": [0, 0, 1, 1], "modality": "figure", "asset_relpath": "generated/p1.png",
            "vision_confidence": 0.2, "fallback_used": false
        });
        std::fs::write(
            doc_dir.join(VISUAL_CHUNKS_FILE),
            format!("{}\n", serde_json::to_string(&row).unwrap()),
        )
        .unwrap();
        std::fs::write(doc_dir.join(VISUAL_EMBEDDINGS_FILE), "").unwrap();
        std::fs::write(
            doc_dir.join(VISUAL_MANIFEST_FILE),
            serde_json::to_string(&json!({
                "contract_version": "visual-v0",
                "doc_id": "pump_x",
                "visual_chunk_count": 1,
                "embedding_count": 0
            }))
            .unwrap(),
        )
        .unwrap();

        let report = validate_visual_artifacts_for_doc(&doc_dir, true);
        assert!(report.is_valid(), "errors: {:?}", report.errors);
        assert!(report
            .warnings
            .iter()
            .any(|w| w.contains("low vision_confidence")));
        assert!(report
            .warnings
            .iter()
            .any(|w| w.contains("contract_version should be")));
    }
}
