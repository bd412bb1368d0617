//! Staged OCR cascade
//!
//! Stage A runs the structural detector over a few whole-image variants.
//! Stage B sweeps grid regions with the structural detector when Stage A found
//! no strong candidate. Stage C runs the trained recognizer unless a
//! high-quality candidate already exists. Every engine call is raced against
//! its slice of the budget; a failed or timed-out call only adds a diagnostic.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use super::engine::{recognize_with_timeout, EngineCache, RecognitionEngine};
use super::parse::extract_digits_from_text;
use super::variants::{build_grid_regions, crop_and_upscale_region, structural_variants, trained_variants};
use super::{CandidateSet, CandidateSource, OcrCandidate, OcrRunResult};
use crate::config::CascadeSettings;
use crate::raster::Raster;

const STRUCTURAL_STAGE: &str = "Structural detector";
const GRID_STAGE: &str = "Structural detector grid pass";
const TRAINED_STAGE: &str = "Trained recognizer";
const SKIPPED_TRAINED: &str =
    "Skipped trained recognizer because the structural detector produced a high-quality candidate.";

/// Confidence penalty for candidates found in a grid region
const GRID_CONFIDENCE_PENALTY: f32 = 0.03;
const MAX_CONFIDENCE: f32 = 0.99;

fn report_stage(stage: &str, found: usize, diagnostics: &mut Vec<String>) {
    if found > 0 {
        diagnostics.push(format!("{} found {} candidate(s).", stage, found));
    } else {
        diagnostics.push(format!("{} found no valid digit groups.", stage));
    }
}

fn remaining_ms(deadline: Instant) -> u64 {
    deadline.saturating_duration_since(Instant::now()).as_millis() as u64
}

/// Confidence of a structural candidate: derived from its length unless the
/// engine reports one
fn structural_confidence(digits: &str, engine_confidence: Option<f32>, adjust: f32) -> f32 {
    match engine_confidence {
        Some(confidence) => confidence.clamp(0.0, MAX_CONFIDENCE),
        None => (0.45 + digits.len() as f32 / 12.0 + adjust).min(MAX_CONFIDENCE),
    }
}

fn trained_confidence(digits: &str, engine_confidence: Option<f32>, adjust: f32) -> f32 {
    let base = engine_confidence.unwrap_or(0.0).clamp(0.1, MAX_CONFIDENCE);
    (base + digits.len() as f32 / 30.0 + adjust).min(MAX_CONFIDENCE)
}

/// Runs the three recognition stages against shared engines
pub struct OcrCascade {
    engines: Arc<EngineCache>,
    settings: CascadeSettings,
}

impl OcrCascade {
    pub fn new(engines: Arc<EngineCache>, settings: CascadeSettings) -> Self {
        Self { engines, settings }
    }

    /// Run every stage that is still needed.
    ///
    /// `ocr_timeout_ms` is a target rather than a hard cap: per-call timeouts
    /// never drop below `min_call_timeout_ms`, and the trained stage always
    /// gets at least `min_trained_budget_ms`.
    pub async fn run(&self, raster: &Raster, ocr_timeout_ms: u64) -> OcrRunResult {
        let started = Instant::now();
        let deadline = started + Duration::from_millis(ocr_timeout_ms);
        let mut candidates = CandidateSet::new();
        let mut diagnostics = Vec::new();

        let stage = self.structural_stage(raster, ocr_timeout_ms, &mut diagnostics).await;
        report_stage(STRUCTURAL_STAGE, stage.len(), &mut diagnostics);
        candidates.merge(stage);
        debug!("Stage A done in {:?}", started.elapsed());

        if !candidates.has_strong(self.settings.strong_candidate_digits) {
            let stage = self.grid_stage(raster, deadline, &mut diagnostics).await;
            report_stage(GRID_STAGE, stage.len(), &mut diagnostics);
            candidates.merge(stage);
            debug!("Stage B done in {:?}", started.elapsed());
        }

        if candidates.has_high_quality(self.settings.high_quality_score) {
            diagnostics.push(SKIPPED_TRAINED.to_string());
        } else {
            let budget_ms = self.settings.min_trained_budget_ms.max(remaining_ms(deadline));
            let stage = self.trained_stage(raster, budget_ms, &mut diagnostics).await;
            report_stage(TRAINED_STAGE, stage.len(), &mut diagnostics);
            candidates.merge(stage);
            debug!("Stage C done in {:?}", started.elapsed());
        }

        OcrRunResult {
            candidates: candidates.into_sorted(),
            diagnostics,
        }
    }

    async fn structural_stage(&self, raster: &Raster, budget_ms: u64, diagnostics: &mut Vec<String>) -> CandidateSet {
        match self.engines.get(CandidateSource::StructuralDetector).await {
            Ok(engine) => self.structural_pass(&engine, raster, budget_ms, diagnostics).await,
            Err(e) => {
                diagnostics.push(e.to_string());
                CandidateSet::new()
            }
        }
    }

    /// All structural variants of one raster
    async fn structural_pass(
        &self,
        engine: &Arc<dyn RecognitionEngine>,
        raster: &Raster,
        budget_ms: u64,
        diagnostics: &mut Vec<String>,
    ) -> CandidateSet {
        let variants = structural_variants(raster);
        let per_call_ms = self
            .settings
            .min_call_timeout_ms
            .max(budget_ms / variants.len().max(1) as u64);
        let mut found = CandidateSet::new();

        for variant in variants {
            let timeout = Duration::from_millis(per_call_ms);
            match recognize_with_timeout(Arc::clone(engine), variant.raster, timeout, variant.label).await {
                Ok(recognition) => {
                    for digits in extract_digits_from_text(&recognition.text) {
                        let confidence =
                            structural_confidence(&digits, recognition.confidence, variant.confidence_adjust);
                        found.insert(OcrCandidate::new(digits, confidence, CandidateSource::StructuralDetector));
                    }
                }
                Err(e) => diagnostics.push(e.to_string()),
            }
        }

        found
    }

    async fn grid_stage(&self, raster: &Raster, deadline: Instant, diagnostics: &mut Vec<String>) -> CandidateSet {
        let engine = match self.engines.get(CandidateSource::StructuralDetector).await {
            Ok(engine) => engine,
            Err(e) => {
                diagnostics.push(e.to_string());
                return CandidateSet::new();
            }
        };

        let regions = build_grid_regions(raster.width(), raster.height(), &self.settings);
        let per_region_ms = (remaining_ms(deadline) / regions.len().max(1) as u64).clamp(
            self.settings.min_call_timeout_ms,
            self.settings.max_region_timeout_ms.max(self.settings.min_call_timeout_ms),
        );
        let mut merged = CandidateSet::new();

        for (index, region) in regions.into_iter().enumerate() {
            if Instant::now() >= deadline {
                debug!("OCR deadline reached after {} grid region(s)", index);
                break;
            }

            let region_raster = crop_and_upscale_region(raster, region, self.settings.region_max_dimension);
            // Per-region call failures are expected on empty cells
            let mut region_diagnostics = Vec::new();
            let found = self
                .structural_pass(&engine, &region_raster, per_region_ms, &mut region_diagnostics)
                .await;

            for mut candidate in found.iter().cloned() {
                candidate.confidence = (candidate.confidence - GRID_CONFIDENCE_PENALTY).clamp(0.05, MAX_CONFIDENCE);
                merged.insert(candidate);
            }

            if merged.has_strong(self.settings.strong_candidate_digits) {
                debug!("Strong candidate in grid region {}, stopping sweep", index);
                break;
            }
        }

        merged
    }

    async fn trained_stage(&self, raster: &Raster, budget_ms: u64, diagnostics: &mut Vec<String>) -> CandidateSet {
        let engine = match self.engines.get(CandidateSource::TrainedRecognizer).await {
            Ok(engine) => engine,
            Err(e) => {
                diagnostics.push(e.to_string());
                return CandidateSet::new();
            }
        };

        let variants = trained_variants(raster, budget_ms, &self.settings);
        let per_call_ms = self
            .settings
            .trained_min_call_timeout_ms
            .max(budget_ms / variants.len().max(1) as u64);
        let mut found = CandidateSet::new();

        for variant in variants {
            let timeout = Duration::from_millis(per_call_ms);
            match recognize_with_timeout(Arc::clone(&engine), variant.raster, timeout, variant.label).await {
                Ok(recognition) => {
                    for digits in extract_digits_from_text(&recognition.text) {
                        let confidence =
                            trained_confidence(&digits, recognition.confidence, variant.confidence_adjust);
                        found.insert(OcrCandidate::new(digits, confidence, CandidateSource::TrainedRecognizer));
                    }
                }
                Err(e) => diagnostics.push(e.to_string()),
            }
        }

        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::engine::tests::{FakeEngine, FakeFactory};
    use std::sync::atomic::Ordering;

    fn white() -> Raster {
        Raster::filled(64, 64, [255, 255, 255, 255])
    }

    fn cascade(factory: Arc<FakeFactory>) -> (OcrCascade, Arc<EngineCache>) {
        let engines = Arc::new(EngineCache::new(factory));
        (OcrCascade::new(Arc::clone(&engines), CascadeSettings::default()), engines)
    }

    #[test]
    fn test_candidate_confidence() {
        assert!((structural_confidence("123456", None, 0.05) - 0.99).abs() < 1e-6);
        assert!((structural_confidence("12", None, 0.0) - (0.45 + 2.0 / 12.0)).abs() < 1e-6);
        assert!((structural_confidence("12", Some(0.6), 0.05) - 0.6).abs() < 1e-6);
        assert!((trained_confidence("1234", Some(0.5), 0.0) - (0.5 + 4.0 / 30.0)).abs() < 1e-6);
        assert!((trained_confidence("1234", None, 0.0) - (0.1 + 4.0 / 30.0)).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_strong_structural_hit_skips_later_stages() {
        let structural = Arc::new(FakeEngine::new(CandidateSource::StructuralDetector, "Order 500072"));
        let factory = Arc::new(FakeFactory::new(Some(structural.clone()), None));
        let (cascade, engines) = cascade(factory);

        let result = cascade.run(&white(), 6000).await;

        assert_eq!(result.candidates[0].digits, "500072");
        assert_eq!(result.candidates[0].source, CandidateSource::StructuralDetector);
        assert_eq!(
            result.diagnostics,
            vec!["Structural detector found 1 candidate(s).".to_string(), SKIPPED_TRAINED.to_string()]
        );
        assert!(!engines.is_initialized(CandidateSource::TrainedRecognizer));
        // Base and center-crop variants only; no grid sweep
        assert_eq!(structural.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_falls_through_to_trained_recognizer() {
        let structural = Arc::new(FakeEngine::new(CandidateSource::StructuralDetector, "no digits"));
        let mut trained = FakeEngine::new(CandidateSource::TrainedRecognizer, "4821");
        trained.confidence = Some(0.9);
        let factory = Arc::new(FakeFactory::new(Some(structural.clone()), Some(Arc::new(trained))));
        let (cascade, _) = cascade(factory);

        let result = cascade.run(&white(), 6000).await;

        assert_eq!(result.candidates.len(), 1);
        assert_eq!(result.candidates[0].digits, "4821");
        assert_eq!(result.candidates[0].source, CandidateSource::TrainedRecognizer);
        assert!((result.candidates[0].confidence - 0.99).abs() < 1e-6);
        assert_eq!(
            result.diagnostics,
            vec![
                "Structural detector found no valid digit groups.".to_string(),
                "Structural detector grid pass found no valid digit groups.".to_string(),
                "Trained recognizer found 1 candidate(s).".to_string(),
            ]
        );
        // Grid sweep ran over every region after the whole-image pass
        assert!(structural.calls.load(Ordering::SeqCst) > 2);
    }

    #[tokio::test]
    async fn test_grid_candidates_are_penalized() {
        let structural = Arc::new(FakeEngine::new(CandidateSource::StructuralDetector, "77"));
        let factory = Arc::new(FakeFactory::new(Some(structural), None));
        let (cascade, _) = cascade(factory);

        let result = cascade.run(&white(), 6000).await;

        // Whole-image pass is at least as confident as any grid region
        let expected = structural_confidence("77", None, 0.03);
        assert_eq!(result.candidates.len(), 1);
        assert!((result.candidates[0].confidence - expected).abs() < 1e-6);
        assert!(result
            .diagnostics
            .contains(&"Structural detector grid pass found 1 candidate(s).".to_string()));
    }

    #[tokio::test]
    async fn test_unavailable_engines_become_diagnostics() {
        let factory = Arc::new(FakeFactory::new(None, None));
        let (cascade, _) = cascade(factory);

        let result = cascade.run(&white(), 1000).await;

        assert!(result.candidates.is_empty());
        assert_eq!(
            result.diagnostics,
            vec![
                "structural detector unavailable: not installed".to_string(),
                "Structural detector found no valid digit groups.".to_string(),
                "structural detector unavailable: not installed".to_string(),
                "Structural detector grid pass found no valid digit groups.".to_string(),
                "trained recognizer unavailable: not installed".to_string(),
                "Trained recognizer found no valid digit groups.".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_slow_structural_calls_time_out() {
        let mut slow = FakeEngine::new(CandidateSource::StructuralDetector, "123456");
        slow.delay = Duration::from_millis(400);
        let factory = Arc::new(FakeFactory::new(Some(Arc::new(slow)), None));
        let (cascade, _) = cascade(factory);

        let result = cascade.run(&white(), 300).await;

        assert!(result.candidates.is_empty());
        assert_eq!(
            result.diagnostics[0],
            "structural detector timed out after 220ms (base)"
        );
        assert!(result
            .diagnostics
            .contains(&"Structural detector grid pass found no valid digit groups.".to_string()));
    }

    #[tokio::test]
    async fn test_exhausted_budget_still_runs_minimum_calls() {
        let structural = Arc::new(FakeEngine::new(CandidateSource::StructuralDetector, "no digits"));
        let trained = FakeEngine::new(CandidateSource::TrainedRecognizer, "4821");
        let factory = Arc::new(FakeFactory::new(Some(structural.clone()), Some(Arc::new(trained))));
        let (cascade, _) = cascade(factory);

        let result = cascade.run(&white(), 0).await;

        // Whole-image variants still get their minimum call time; the grid sweep is cut
        assert_eq!(structural.calls.load(Ordering::SeqCst), 2);
        assert_eq!(result.candidates[0].digits, "4821");
        assert!(result
            .diagnostics
            .contains(&"Trained recognizer found 1 candidate(s).".to_string()));
    }
}
