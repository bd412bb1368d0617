//! Digit recognition
//!
//! A three-stage cascade over two recognition engines:
//! - Structural detector: pure-Rust connected-component glyph matcher
//! - Trained recognizer: PaddleOCR CRNN model via ONNX Runtime
//!
//! Raw engine text is reduced to digit-run candidates by [`parse`] and
//! ranked by [`select`].

pub mod cascade;
pub mod engine;
pub mod glyphs;
pub mod models;
pub mod parse;
pub mod select;
pub mod structural;
pub mod trained;
pub mod variants;

pub use cascade::OcrCascade;
pub use engine::{DefaultEngineFactory, EngineCache, EngineFactory, Recognition, RecognitionEngine};
pub use parse::extract_digits_from_text;
pub use select::{pick_best_ocr_candidate, score_candidate};

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Which engine produced a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CandidateSource {
    StructuralDetector,
    TrainedRecognizer,
}

impl CandidateSource {
    /// Human-readable engine name used in diagnostics
    pub fn engine_name(self) -> &'static str {
        match self {
            Self::StructuralDetector => "structural detector",
            Self::TrainedRecognizer => "trained recognizer",
        }
    }
}

impl fmt::Display for CandidateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StructuralDetector => write!(f, "structural-detector"),
            Self::TrainedRecognizer => write!(f, "trained-recognizer"),
        }
    }
}

/// A plausible digit string extracted from OCR output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrCandidate {
    pub digits: String,
    /// Heuristic confidence in [0, 1]
    pub confidence: f32,
    pub source: CandidateSource,
}

impl OcrCandidate {
    pub fn new(digits: impl Into<String>, confidence: f32, source: CandidateSource) -> Self {
        Self {
            digits: digits.into(),
            confidence,
            source,
        }
    }
}

/// Candidates keyed by digit string, keeping the most confident of each
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    by_digits: BTreeMap<String, OcrCandidate>,
}

impl CandidateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert, replacing an existing entry only when strictly more confident
    pub fn insert(&mut self, candidate: OcrCandidate) {
        match self.by_digits.get(&candidate.digits) {
            Some(previous) if previous.confidence >= candidate.confidence => {}
            _ => {
                self.by_digits.insert(candidate.digits.clone(), candidate);
            }
        }
    }

    /// Merge another set into this one
    pub fn merge(&mut self, other: CandidateSet) {
        for candidate in other.by_digits.into_values() {
            self.insert(candidate);
        }
    }

    pub fn len(&self) -> usize {
        self.by_digits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_digits.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OcrCandidate> {
        self.by_digits.values()
    }

    /// Any candidate with at least `min_digits` digits
    pub fn has_strong(&self, min_digits: usize) -> bool {
        self.iter().any(|c| c.digits.len() >= min_digits)
    }

    /// Any candidate scoring at least `min_score`
    pub fn has_high_quality(&self, min_score: f32) -> bool {
        self.iter().any(|c| score_candidate(c) >= min_score)
    }

    /// Longer first, then more confident, then lexicographic
    pub fn into_sorted(self) -> Vec<OcrCandidate> {
        let mut candidates: Vec<OcrCandidate> = self.by_digits.into_values().collect();
        candidates.sort_by(|a, b| {
            b.digits
                .len()
                .cmp(&a.digits.len())
                .then(b.confidence.total_cmp(&a.confidence))
                .then(a.digits.cmp(&b.digits))
        });
        candidates
    }
}

/// Outcome of one cascade run
#[derive(Debug, Clone, Default)]
pub struct OcrRunResult {
    pub candidates: Vec<OcrCandidate>,
    /// Ordered, display-only trail of what each stage did
    pub diagnostics: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_set_keeps_best_confidence() {
        let mut set = CandidateSet::new();
        set.insert(OcrCandidate::new("1234", 0.5, CandidateSource::StructuralDetector));
        set.insert(OcrCandidate::new("1234", 0.8, CandidateSource::TrainedRecognizer));
        set.insert(OcrCandidate::new("1234", 0.6, CandidateSource::StructuralDetector));

        assert_eq!(set.len(), 1);
        let best = set.iter().next().unwrap();
        assert!((best.confidence - 0.8).abs() < f32::EPSILON);
        assert_eq!(best.source, CandidateSource::TrainedRecognizer);
    }

    #[test]
    fn test_into_sorted_orders_length_then_confidence() {
        let mut set = CandidateSet::new();
        set.insert(OcrCandidate::new("12", 0.99, CandidateSource::StructuralDetector));
        set.insert(OcrCandidate::new("4321", 0.4, CandidateSource::StructuralDetector));
        set.insert(OcrCandidate::new("9876", 0.7, CandidateSource::StructuralDetector));
        set.insert(OcrCandidate::new("500072", 0.3, CandidateSource::TrainedRecognizer));

        let digits: Vec<String> = set.into_sorted().into_iter().map(|c| c.digits).collect();
        assert_eq!(digits, vec!["500072", "9876", "4321", "12"]);
    }

    #[test]
    fn test_strong_and_high_quality_predicates() {
        let mut set = CandidateSet::new();
        set.insert(OcrCandidate::new("1234", 0.5, CandidateSource::StructuralDetector));
        assert!(!set.has_strong(5));
        assert!(set.has_strong(4));

        set.insert(OcrCandidate::new("50072", 0.9, CandidateSource::StructuralDetector));
        assert!(set.has_strong(5));
        assert!(set.has_high_quality(0.78));
    }

    #[test]
    fn test_source_serializes_kebab_case() {
        let json = serde_json::to_string(&CandidateSource::StructuralDetector).unwrap();
        assert_eq!(json, "\"structural-detector\"");
        assert_eq!(CandidateSource::TrainedRecognizer.to_string(), "trained-recognizer");
    }
}
