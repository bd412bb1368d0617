//! Photo-to-seed orchestration
//!
//! Prepares the photo, runs the OCR cascade while the palette is extracted on
//! a worker, then picks a seed: an OCR hit with enough digits, else the
//! palette-derived digits, else a weighted-random fallback. Every call
//! returns a result.

pub mod explain;
pub mod fallback;

pub use explain::ExplainBlock;
pub use fallback::{generate_weighted_seed, weighted_seed_from};

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::ocr::{pick_best_ocr_candidate, EngineCache, OcrCandidate, OcrCascade};
use crate::palette::{derive_seed_from_palette, extract_palette, Swatch};
use crate::preprocess::{clamp_brightness_tweak, prepare_photo, PreparedPhoto};

/// Length range of a palette-derived seed
const PALETTE_SEED_DIGITS: std::ops::RangeInclusive<usize> = 2..=8;

/// Per-invocation overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhotoPipelineOptions {
    /// Brightness slider value, clamped to [-40, 40]
    pub brightness_tweak: i32,
    /// Overall OCR budget; the configured default when `None`
    pub ocr_timeout_ms: Option<u64>,
    /// Palette worker budget; the configured default when `None`
    pub palette_timeout_ms: Option<u64>,
}

/// Where a seed came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SeedSource {
    PhotoOcr,
    PhotoPalette,
    SurpriseFallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SeedStatus {
    Done,
    Fallback,
}

/// Output contract of one scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoSeedResult {
    pub seed: String,
    pub seed_source: SeedSource,
    pub status: SeedStatus,
    /// Every OCR candidate, best-ranked first
    pub candidates: Vec<OcrCandidate>,
    pub swatches: Vec<Swatch>,
    pub explainability: Vec<ExplainBlock>,
    pub message: String,
}

impl PhotoSeedResult {
    fn fallback(error: &PipelineError, diagnostics: &[String]) -> Self {
        Self {
            seed: generate_weighted_seed(),
            seed_source: SeedSource::SurpriseFallback,
            status: SeedStatus::Fallback,
            candidates: Vec::new(),
            swatches: Vec::new(),
            explainability: explain::fallback_explainability(&error.to_string(), diagnostics),
            message: explain::FALLBACK_MESSAGE.to_string(),
        }
    }
}

fn is_palette_seed(seed: &str) -> bool {
    PALETTE_SEED_DIGITS.contains(&seed.len()) && seed.bytes().all(|b| b.is_ascii_digit())
}

/// Photo-to-seed pipeline holding the configuration and shared engines
pub struct PhotoSeedPipeline {
    config: AppConfig,
    cascade: OcrCascade,
}

impl PhotoSeedPipeline {
    /// Pipeline with engines built from the model settings on first use
    pub fn new(config: AppConfig) -> Self {
        let engines = Arc::new(EngineCache::with_settings(&config.models));
        Self::with_engines(config, engines)
    }

    /// Pipeline sharing an existing engine cache
    pub fn with_engines(config: AppConfig, engines: Arc<EngineCache>) -> Self {
        let cascade = OcrCascade::new(engines, config.cascade.clone());
        Self { config, cascade }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Extract a seed from photo bytes. Never fails: any fatal error turns
    /// into a weighted-random fallback seed.
    pub async fn process_photo_for_seed(
        &self,
        bytes: &[u8],
        mime_type: &str,
        options: &PhotoPipelineOptions,
    ) -> PhotoSeedResult {
        let run_id = Uuid::new_v4();
        let span = info_span!("photo_scan", %run_id);

        async {
            let started = Instant::now();
            let mut diagnostics = Vec::new();
            let result = match self.run(bytes, mime_type, options, &mut diagnostics).await {
                Ok(result) => result,
                Err(error) => {
                    warn!("Photo scan failed, using fallback seed: {}", error);
                    PhotoSeedResult::fallback(&error, &diagnostics)
                }
            };
            info!(
                "Seed {} from {:?} in {:?}",
                result.seed,
                result.seed_source,
                started.elapsed()
            );
            result
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        bytes: &[u8],
        mime_type: &str,
        options: &PhotoPipelineOptions,
        diagnostics: &mut Vec<String>,
    ) -> Result<PhotoSeedResult, PipelineError> {
        let settings = &self.config.pipeline;
        let tweak = clamp_brightness_tweak(options.brightness_tweak);
        let ocr_timeout_ms = options.ocr_timeout_ms.unwrap_or(settings.ocr_timeout_ms);
        let palette_timeout = Duration::from_millis(options.palette_timeout_ms.unwrap_or(settings.palette_timeout_ms));

        let owned = bytes.to_vec();
        let mime = mime_type.to_string();
        let binarize = self.config.binarize.clone();
        let (ocr_max, palette_max) = (settings.ocr_max_dimension, settings.palette_max_dimension);
        let PreparedPhoto { ocr, palette, .. } = tokio::task::spawn_blocking(move || {
            prepare_photo(&owned, &mime, tweak, &binarize, ocr_max, palette_max)
        })
        .await
        .map_err(|e| PipelineError::Decode(e.to_string()))??;

        let swatch_count = settings.swatch_count;
        let palette_task =
            tokio::task::spawn_blocking(move || extract_palette(&palette, swatch_count, palette_timeout));

        let ocr_result = self.cascade.run(&ocr, ocr_timeout_ms).await;
        diagnostics.extend(ocr_result.diagnostics.iter().cloned());
        let candidates = ocr_result.candidates;

        let swatches = palette_task.await.unwrap_or_else(|e| {
            warn!("Palette task failed: {}", e);
            Vec::new()
        });

        let best = pick_best_ocr_candidate(&candidates).filter(|c| c.digits.len() >= settings.min_ocr_seed_digits);
        if let Some(best) = best {
            debug!("Best OCR candidate {} ({:.2})", best.digits, best.confidence);
            return Ok(PhotoSeedResult {
                explainability: explain::ocr_explainability(&best.digits, &candidates, diagnostics),
                message: explain::ocr_message(&best.digits),
                seed: best.digits,
                seed_source: SeedSource::PhotoOcr,
                status: SeedStatus::Done,
                candidates,
                swatches,
            });
        }

        let mapped = derive_seed_from_palette(&swatches, tweak, settings.palette_max_digits);
        if !is_palette_seed(&mapped.seed) {
            return Err(PipelineError::Mapping(mapped.seed));
        }

        Ok(PhotoSeedResult {
            explainability: explain::palette_explainability(&mapped.legend, tweak, diagnostics),
            message: explain::palette_message(&mapped.seed, diagnostics),
            seed: mapped.seed,
            seed_source: SeedSource::PhotoPalette,
            status: SeedStatus::Done,
            candidates,
            swatches,
        })
    }
}
