//! Candidate scoring and selection

use super::parse::{MAX_CANDIDATE_DIGITS, MIN_CANDIDATE_DIGITS};
use super::{CandidateSource, OcrCandidate};

/// Scores closer than this are treated as equal
const SCORE_EPSILON: f32 = 0.0001;

/// Plausibility of a seed by digit count; six digits is the sweet spot
fn length_score(len: usize) -> f32 {
    match len {
        2 => 0.28,
        3 => 0.56,
        4 => 0.72,
        5 => 0.92,
        6 => 1.0,
        7 => 0.95,
        8 => 0.85,
        9 => 0.70,
        10 => 0.55,
        _ => 0.40,
    }
}

/// Blend confidence, length plausibility, digit diversity and source
pub fn score_candidate(candidate: &OcrCandidate) -> f32 {
    let digits = &candidate.digits;
    if digits.is_empty() {
        return 0.0;
    }

    let mut seen = [false; 10];
    for b in digits.bytes().filter(u8::is_ascii_digit) {
        seen[(b - b'0') as usize] = true;
    }
    let diversity = seen.iter().filter(|&&s| s).count() as f32 / digits.len() as f32;
    let source_bonus = match candidate.source {
        CandidateSource::StructuralDetector => 0.02,
        CandidateSource::TrainedRecognizer => 0.0,
    };

    candidate.confidence * 0.35 + length_score(digits.len()) * 0.55 + diversity * 0.08 + source_bonus
}

fn is_valid_seed(digits: &str) -> bool {
    (MIN_CANDIDATE_DIGITS..=MAX_CANDIDATE_DIGITS).contains(&digits.len())
        && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Highest-scoring valid candidate; ties go to the longer, then the more confident
pub fn pick_best_ocr_candidate(candidates: &[OcrCandidate]) -> Option<OcrCandidate> {
    let mut best: Option<(&OcrCandidate, f32)> = None;

    for candidate in candidates.iter().filter(|c| is_valid_seed(&c.digits)) {
        let score = score_candidate(candidate);
        let better = match best {
            None => true,
            Some((current, current_score)) => {
                if (score - current_score).abs() > SCORE_EPSILON {
                    score > current_score
                } else if candidate.digits.len() != current.digits.len() {
                    candidate.digits.len() > current.digits.len()
                } else {
                    candidate.confidence > current.confidence
                }
            }
        };
        if better {
            best = Some((candidate, score));
        }
    }

    best.map(|(candidate, _)| candidate.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trained(digits: &str, confidence: f32) -> OcrCandidate {
        OcrCandidate::new(digits, confidence, CandidateSource::TrainedRecognizer)
    }

    fn structural(digits: &str, confidence: f32) -> OcrCandidate {
        OcrCandidate::new(digits, confidence, CandidateSource::StructuralDetector)
    }

    #[test]
    fn test_picks_longest_then_most_confident() {
        let best = pick_best_ocr_candidate(&[
            trained("1234", 0.5),
            trained("987654", 0.5),
            trained("111111", 0.7),
        ]);
        assert_eq!(best.unwrap().digits, "111111");
    }

    #[test]
    fn test_returns_none_without_valid_candidates() {
        assert!(pick_best_ocr_candidate(&[trained("1", 0.9)]).is_none());
        assert!(pick_best_ocr_candidate(&[trained("12345678901", 0.9)]).is_none());
        assert!(pick_best_ocr_candidate(&[]).is_none());
    }

    #[test]
    fn test_length_plausibility_beats_raw_confidence() {
        let best = pick_best_ocr_candidate(&[structural("12", 0.99), trained("500072", 0.42)]);
        assert_eq!(best.unwrap().digits, "500072");
    }

    #[test]
    fn test_tie_prefers_longer() {
        // Raise the 7-digit confidence until both scores land within the epsilon
        let a = trained("123456", 0.5);
        let mut b = trained("1234567", 0.5);
        let gap = score_candidate(&a) - score_candidate(&b);
        b.confidence += gap / 0.35;
        assert!((score_candidate(&a) - score_candidate(&b)).abs() <= SCORE_EPSILON);

        let best = pick_best_ocr_candidate(&[a, b]);
        assert_eq!(best.unwrap().digits, "1234567");
    }

    #[test]
    fn test_structural_source_bonus() {
        let diff = score_candidate(&structural("4821", 0.6)) - score_candidate(&trained("4821", 0.6));
        assert!((diff - 0.02).abs() < 1e-6);
    }

    #[test]
    fn test_score_components() {
        // 0.5 * 0.35 + 1.0 * 0.55 + (6 / 6) * 0.08
        let score = score_candidate(&trained("123456", 0.5));
        assert!((score - 0.805).abs() < 1e-6);
    }
}
