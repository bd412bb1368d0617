//! Explainability blocks and user-facing messages

use serde::{Deserialize, Serialize};

use crate::ocr::{CandidateSource, OcrCandidate};

const EXPLAIN_TITLE: &str = "How we got this number";
const FALLBACK_TITLE: &str = "Fallback used";
const FALLBACK_LINE: &str = "We switched to Surprise Me so training starts immediately.";
pub const FALLBACK_MESSAGE: &str = "Photo scan could not complete in time. Using Surprise Me seed.";

/// A titled group of lines explaining how a seed was chosen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplainBlock {
    pub title: String,
    pub lines: Vec<String>,
}

pub fn ocr_explainability(seed: &str, candidates: &[OcrCandidate], diagnostics: &[String]) -> Vec<ExplainBlock> {
    let source = candidates
        .iter()
        .find(|c| c.digits == seed)
        .map(|c| c.source)
        .unwrap_or(CandidateSource::StructuralDetector);

    let others: Vec<&str> = candidates
        .iter()
        .map(|c| c.digits.as_str())
        .filter(|digits| *digits != seed)
        .collect();
    let alternates = if others.is_empty() {
        "No alternate digit groups found.".to_string()
    } else {
        format!("Alternates: {}", others.join(", "))
    };

    let mut lines = vec![
        format!("OCR found digits: {}", seed),
        format!("OCR engine: {}", source),
        alternates,
    ];
    lines.extend(diagnostics.iter().cloned());

    vec![ExplainBlock {
        title: EXPLAIN_TITLE.to_string(),
        lines,
    }]
}

pub fn palette_explainability(legend: &[String], brightness_tweak: i32, diagnostics: &[String]) -> Vec<ExplainBlock> {
    let mut lines = vec![
        "OCR did not produce a usable result, so we used palette mapping.".to_string(),
        format!("Brightness tweak: {}", brightness_tweak),
    ];
    lines.extend(diagnostics.iter().cloned());
    lines.extend(legend.iter().cloned());

    vec![ExplainBlock {
        title: EXPLAIN_TITLE.to_string(),
        lines,
    }]
}

pub fn fallback_explainability(error: &str, diagnostics: &[String]) -> Vec<ExplainBlock> {
    let mut lines = vec![error.to_string(), FALLBACK_LINE.to_string()];
    lines.extend(diagnostics.iter().cloned());

    vec![ExplainBlock {
        title: FALLBACK_TITLE.to_string(),
        lines,
    }]
}

pub fn ocr_message(seed: &str) -> String {
    format!("Using OCR seed {}.", seed)
}

/// Palette message, with the first OCR failure appended when there was one
pub fn palette_message(seed: &str, diagnostics: &[String]) -> String {
    let first_failure = diagnostics
        .iter()
        .find(|line| line.contains("found no valid digit groups.") || line.contains("error:"));

    match first_failure {
        Some(failure) => format!("Using palette-derived seed {}. {}", seed, failure),
        None => format!("Using palette-derived seed {}.", seed),
    }
}
