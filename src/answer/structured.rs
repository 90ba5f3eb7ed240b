//! Structured answer formatting for golden evaluation
//!
//! Rewrites a composed answer into the fixed three-section layout:
//! `Direct answer:`, `Key details:` bullets, and `If missing data:` bullets.

use crate::domain::AnswerStatus;
use crate::retrieval::EvidenceHit;

const DIRECT_HEADER: &str = "Direct answer:";
const DETAILS_HEADER: &str = "Key details:";
const MISSING_HEADER: &str = "If missing data:";

const NO_DETAILS_BULLET: &str = "- No additional supporting details were retrieved.";
const DEFAULT_MISSING_BULLET: &str =
    "- Share the exact manual or model identifier to narrow the search.";

/// Rewrite `answer` into the three fixed sections, reusing any structured
/// text it already carries and synthesizing the rest from hits and warnings.
pub fn enforce_structured_output(
    answer: &str,
    status: AnswerStatus,
    hits: &[EvidenceHit],
    warnings: &[String],
) -> String {
    let (mut direct, mut details, mut missing) = parse_sections(answer);

    if direct.is_empty() {
        direct = first_line(answer).to_string();
    }
    if details.is_empty() {
        details = detail_bullets(answer, hits);
    }
    if missing.is_empty() {
        missing = missing_bullets(status, warnings);
    }

    let mut out = String::new();
    out.push_str(DIRECT_HEADER);
    out.push(' ');
    out.push_str(&direct);
    out.push('\n');
    out.push_str(DETAILS_HEADER);
    out.push('\n');
    out.push_str(&details.join("\n"));
    out.push('\n');
    out.push_str(MISSING_HEADER);
    out.push('\n');
    out.push_str(&missing.join("\n"));
    out
}

fn first_line(text: &str) -> &str {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or(text)
}

/// Pull already-structured sections out of the answer when present.
fn parse_sections(answer: &str) -> (String, Vec<String>, Vec<String>) {
    if !answer.contains(DIRECT_HEADER) {
        return (String::new(), Vec::new(), Vec::new());
    }

    let mut direct = String::new();
    let mut details: Vec<String> = Vec::new();
    let mut missing: Vec<String> = Vec::new();
    let mut section = 0;

    for line in answer.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix(DIRECT_HEADER) {
            direct = rest.trim().to_string();
            section = 1;
            continue;
        }
        if trimmed.starts_with(DETAILS_HEADER) {
            section = 2;
            continue;
        }
        if trimmed.starts_with(MISSING_HEADER) {
            section = 3;
            continue;
        }
        if trimmed.is_empty() {
            continue;
        }
        match section {
            1 => {
                if !direct.is_empty() {
                    direct.push(' ');
                }
                direct.push_str(trimmed);
            }
            2 => details.push(as_bullet(trimmed)),
            3 => missing.push(as_bullet(trimmed)),
            _ => {}
        }
    }
    (direct, details, missing)
}

fn as_bullet(line: &str) -> String {
    if line.starts_with('-') {
        line.to_string()
    } else {
        format!("- {}", line)
    }
}

fn detail_bullets(answer: &str, hits: &[EvidenceHit]) -> Vec<String> {
    // Numbered compose-from-hits points become bullets directly.
    let numbered: Vec<String> = answer
        .lines()
        .map(str::trim)
        .filter(|line| line.len() > 3 && line.chars().next().is_some_and(|c| c.is_ascii_digit()))
        .filter_map(|line| line.split_once(". ").map(|(_, rest)| format!("- {}", rest)))
        .collect();
    if !numbered.is_empty() {
        return numbered;
    }

    let from_hits: Vec<String> = hits
        .iter()
        .take(3)
        .filter(|hit| !hit.snippet.trim().is_empty())
        .map(|hit| {
            let clipped: String = hit.snippet.chars().take(200).collect();
            format!("- {} p.{}: {}", hit.doc_id, hit.page_start.max(1), clipped)
        })
        .collect();
    if from_hits.is_empty() {
        vec![NO_DETAILS_BULLET.to_string()]
    } else {
        from_hits
    }
}

fn missing_bullets(status: AnswerStatus, warnings: &[String]) -> Vec<String> {
    let mut bullets: Vec<String> = warnings.iter().map(|w| format!("- {}", w)).collect();
    if bullets.is_empty() {
        if status == AnswerStatus::Ok {
            bullets.push("- None; the retrieved evidence covers the question.".to_string());
        } else {
            bullets.push(DEFAULT_MISSING_BULLET.to_string());
        }
    }
    bullets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ContentType;

    fn hit(doc_id: &str, page: u32, snippet: &str) -> EvidenceHit {
        EvidenceHit {
            chunk_id: "c1".to_string(),
            doc_id: doc_id.to_string(),
            content_type: ContentType::Text,
            page_start: page,
            page_end: page,
            snippet: snippet.to_string(),
            score: 0.9,
            ..EvidenceHit::default()
        }
    }

    #[test]
    fn test_synthesizes_three_sections() {
        let out = enforce_structured_output(
            "Torque is 45 Nm.",
            AnswerStatus::Ok,
            &[hit("pump_x", 10, "Torque | 45 Nm")],
            &[],
        );
        assert!(out.starts_with("Direct answer: Torque is 45 Nm."));
        assert!(out.contains("Key details:\n- pump_x p.10: Torque | 45 Nm"));
        assert!(out.contains("If missing data:\n- None;"));
    }

    #[test]
    fn test_numbered_points_become_bullets() {
        let out = enforce_structured_output(
            "1. first point\n2. second point",
            AnswerStatus::Ok,
            &[],
            &[],
        );
        assert!(out.contains("- first point"));
        assert!(out.contains("- second point"));
    }

    #[test]
    fn test_existing_structure_is_parsed() {
        let existing = "Direct answer: use 45 Nm.\nKey details:\n- torque table row\nIf missing data:\n- none";
        let out = enforce_structured_output(existing, AnswerStatus::Ok, &[], &[]);
        assert!(out.starts_with("Direct answer: use 45 Nm."));
        assert!(out.contains("- torque table row"));
        assert!(out.contains("- none"));
    }

    #[test]
    fn test_not_found_carries_warnings() {
        let out = enforce_structured_output(
            "Not found in provided manuals based on retrieved evidence.",
            AnswerStatus::NotFound,
            &[],
            &["Insufficient evidence to provide a grounded direct answer.".to_string()],
        );
        assert!(out.contains("If missing data:\n- Insufficient evidence"));
        assert!(out.contains("Key details:\n- No additional supporting details were retrieved."));
    }
}
