//! Application Configuration
//!
//! Pipeline budgets and hand-tuned thresholds stored in TOML format.
//! Every threshold has a named default so benchmark runs can override it
//! without touching code.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default overall OCR budget
pub const DEFAULT_OCR_TIMEOUT_MS: u64 = 6000;
/// Default palette worker budget
pub const DEFAULT_PALETTE_TIMEOUT_MS: u64 = 1200;
/// Dark-pixel ratio at or above which a binarized image is inverted
pub const DEFAULT_INVERSION_DARK_RATIO: f32 = 0.55;
/// Quadrant mean spread above which adaptive tiling is used
pub const DEFAULT_ADAPTIVE_SPREAD: f32 = 60.0;
/// Score at or above which the trained recognizer is skipped
pub const DEFAULT_HIGH_QUALITY_SCORE: f32 = 0.78;
/// Overlap between neighbouring grid cells, as a fraction of a cell
pub const DEFAULT_GRID_OVERLAP: f32 = 0.2;
/// Digit count at which a candidate ends the structural sweeps
pub const DEFAULT_STRONG_CANDIDATE_DIGITS: usize = 5;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Orchestrator budgets and sizes
    pub pipeline: PipelineSettings,
    /// Binarization thresholds
    pub binarize: BinarizeSettings,
    /// OCR cascade thresholds and timeouts
    pub cascade: CascadeSettings,
    /// Trained model locations
    pub models: ModelSettings,
}

/// Orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Overall OCR budget in milliseconds
    pub ocr_timeout_ms: u64,
    /// Palette extraction budget in milliseconds
    pub palette_timeout_ms: u64,
    /// Shortest OCR hit accepted as a seed
    pub min_ocr_seed_digits: usize,
    /// Longest palette-derived seed
    pub palette_max_digits: usize,
    /// Number of swatches extracted
    pub swatch_count: usize,
    /// Largest side of the OCR raster
    pub ocr_max_dimension: u32,
    /// Largest side of the palette raster
    pub palette_max_dimension: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            ocr_timeout_ms: DEFAULT_OCR_TIMEOUT_MS,
            palette_timeout_ms: DEFAULT_PALETTE_TIMEOUT_MS,
            min_ocr_seed_digits: 3,
            palette_max_digits: 8,
            swatch_count: 6,
            ocr_max_dimension: 1024,
            palette_max_dimension: 512,
        }
    }
}

/// Binarization settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BinarizeSettings {
    /// Dark ratio at or above which the result is inverted
    pub inversion_dark_ratio: f32,
    /// Quadrant luma spread that switches on adaptive tiling
    pub adaptive_spread: f32,
    /// Below this dark ratio the morphology pass is skipped
    pub morphology_min_ratio: f32,
    /// Above this dark ratio the morphology pass is skipped
    pub morphology_max_ratio: f32,
    /// Percentile range under which contrast stretching is skipped
    pub stretch_min_range: u8,
}

impl Default for BinarizeSettings {
    fn default() -> Self {
        Self {
            inversion_dark_ratio: DEFAULT_INVERSION_DARK_RATIO,
            adaptive_spread: DEFAULT_ADAPTIVE_SPREAD,
            morphology_min_ratio: 0.001,
            morphology_max_ratio: 0.2,
            stretch_min_range: 30,
        }
    }
}

/// OCR cascade settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeSettings {
    /// Digit count that counts as a strong structural hit
    pub strong_candidate_digits: usize,
    /// Candidate score that skips the trained recognizer
    pub high_quality_score: f32,
    /// Grid columns for the region sweep
    pub grid_columns: u32,
    /// Grid rows for the region sweep
    pub grid_rows: u32,
    /// Overlap between grid cells
    pub grid_overlap: f32,
    /// Long-edge bound for upscaled grid regions
    pub region_max_dimension: u32,
    /// Floor for any structural call timeout
    pub min_call_timeout_ms: u64,
    /// Ceiling for a single grid region
    pub max_region_timeout_ms: u64,
    /// Minimum budget granted to the trained stage
    pub min_trained_budget_ms: u64,
    /// Floor for any trained recognizer call timeout
    pub trained_min_call_timeout_ms: u64,
    /// Trained budget needed before the upscaled variant is tried
    pub upscale_budget_ms: u64,
    /// Trained budget needed before the inverted variant is tried
    pub invert_budget_ms: u64,
}

impl Default for CascadeSettings {
    fn default() -> Self {
        Self {
            strong_candidate_digits: DEFAULT_STRONG_CANDIDATE_DIGITS,
            high_quality_score: DEFAULT_HIGH_QUALITY_SCORE,
            grid_columns: 3,
            grid_rows: 2,
            grid_overlap: DEFAULT_GRID_OVERLAP,
            region_max_dimension: 960,
            min_call_timeout_ms: 220,
            max_region_timeout_ms: 900,
            min_trained_budget_ms: 1200,
            trained_min_call_timeout_ms: 500,
            upscale_budget_ms: 1800,
            invert_budget_ms: 2600,
        }
    }
}

/// Trained recognizer model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Override for the models directory
    pub models_dir: Option<PathBuf>,
    /// Download URL of the recognition model
    pub recognition_url: String,
    /// Download URL of the character dictionary
    pub dictionary_url: String,
    /// ONNX Runtime intra-op threads
    pub intra_threads: usize,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            models_dir: None,
            recognition_url:
                "https://huggingface.co/monkt/paddleocr-onnx/resolve/main/languages/english/rec.onnx"
                    .to_string(),
            dictionary_url:
                "https://huggingface.co/monkt/paddleocr-onnx/resolve/main/languages/english/dict.txt"
                    .to_string(),
            intra_threads: 4,
        }
    }
}

impl ModelSettings {
    /// Resolve the directory holding model files
    pub fn resolve_models_dir(&self) -> Result<PathBuf> {
        match &self.models_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(data_dir()?.join("models")),
        }
    }
}

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "photoseed", "PhotoSeed")
        .context("Could not determine platform directories")
}

/// Get the application data directory
pub fn data_dir() -> Result<PathBuf> {
    let data_dir = project_dirs()?.data_dir().to_path_buf();
    std::fs::create_dir_all(&data_dir)?;
    Ok(data_dir)
}

/// Get the configuration directory
pub fn config_dir() -> Result<PathBuf> {
    let config_dir = project_dirs()?.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;
    Ok(config_dir)
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {:?}", path))?;
    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config {:?}", path))?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();

        assert_eq!(config.pipeline.ocr_timeout_ms, 6000);
        assert_eq!(config.pipeline.palette_timeout_ms, 1200);
        assert_eq!(config.pipeline.min_ocr_seed_digits, 3);
        assert_eq!(config.pipeline.swatch_count, 6);

        assert!((config.binarize.inversion_dark_ratio - 0.55).abs() < f32::EPSILON);
        assert!((config.cascade.high_quality_score - 0.78).abs() < f32::EPSILON);
        assert!((config.cascade.grid_overlap - 0.2).abs() < f32::EPSILON);
        assert!(config.models.models_dir.is_none());
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let mut config = AppConfig::default();
        config.cascade.high_quality_score = 0.7;
        config.pipeline.ocr_timeout_ms = 3000;

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();

        assert!((parsed.cascade.high_quality_score - 0.7).abs() < f32::EPSILON);
        assert_eq!(parsed.pipeline.ocr_timeout_ms, 3000);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: AppConfig = toml::from_str("[binarize]\nadaptive_spread = 45.0\n").unwrap();

        assert!((parsed.binarize.adaptive_spread - 45.0).abs() < f32::EPSILON);
        assert!((parsed.binarize.inversion_dark_ratio - 0.55).abs() < f32::EPSILON);
        assert_eq!(parsed.pipeline.ocr_timeout_ms, 6000);
        assert_eq!(parsed.cascade.grid_columns, 3);
    }

    #[test]
    fn test_save_and_load_config() {
        let config = AppConfig::default();
        let temp_file = NamedTempFile::new().unwrap();

        save_config(&config, temp_file.path()).unwrap();
        let loaded = load_config(temp_file.path()).unwrap();

        assert_eq!(config.pipeline.ocr_max_dimension, loaded.pipeline.ocr_max_dimension);
        assert_eq!(config.models.recognition_url, loaded.models.recognition_url);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();

        let result = load_config(temp_file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_models_dir_override() {
        let settings = ModelSettings {
            models_dir: Some(PathBuf::from("/tmp/photo-seed-models")),
            ..Default::default()
        };
        assert_eq!(
            settings.resolve_models_dir().unwrap(),
            PathBuf::from("/tmp/photo-seed-models")
        );
    }
}
