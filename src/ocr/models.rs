//! Model files for the trained recognizer
//!
//! Handles locating, downloading and recording the PaddleOCR recognition
//! model and its character dictionary. Downloads only happen on explicit
//! request; a scan never touches the network.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::ModelSettings;

/// Set to any value to refuse model downloads
pub const OFFLINE_ENV: &str = "PHOTO_SEED_OFFLINE";

const MANIFEST_FILE: &str = "manifest.json";

/// Files the trained recognizer needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// CRNN text recognition model
    Recognition,
    /// Character dictionary mapping output classes to characters
    Dictionary,
}

impl ModelKind {
    pub const ALL: [ModelKind; 2] = [ModelKind::Recognition, ModelKind::Dictionary];

    pub fn filename(&self) -> &'static str {
        match self {
            ModelKind::Recognition => "rec.onnx",
            ModelKind::Dictionary => "dict.txt",
        }
    }

    /// Plausible file size range, used as a cheap integrity check
    pub fn expected_size_range(&self) -> (u64, u64) {
        match self {
            ModelKind::Recognition => (7_000_000, 10_000_000),
            ModelKind::Dictionary => (100, 10_000),
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ModelKind::Recognition => "Text Recognition",
            ModelKind::Dictionary => "Character Dictionary",
        }
    }

    fn download_url<'a>(&self, settings: &'a ModelSettings) -> &'a str {
        match self {
            ModelKind::Recognition => &settings.recognition_url,
            ModelKind::Dictionary => &settings.dictionary_url,
        }
    }
}

/// Record of downloaded model files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelManifest {
    pub version: String,
    pub models: Vec<ModelInfo>,
}

impl Default for ModelManifest {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            models: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub filename: String,
    pub size_bytes: u64,
    pub sha256: String,
    pub source_url: String,
    /// Unix seconds
    pub downloaded_at: u64,
}

/// Availability of one model file
#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub filename: &'static str,
    pub available: bool,
    pub size_bytes: Option<u64>,
}

/// Locates and downloads model files
pub struct ModelManager {
    models_dir: PathBuf,
    settings: ModelSettings,
}

impl ModelManager {
    /// Manager for the configured (or default) models directory
    pub fn new(settings: &ModelSettings) -> Result<Self> {
        let models_dir = settings.resolve_models_dir()?;
        Ok(Self {
            models_dir,
            settings: settings.clone(),
        })
    }

    /// Manager for an explicit directory
    pub fn with_dir(models_dir: PathBuf, settings: &ModelSettings) -> Self {
        Self {
            models_dir,
            settings: settings.clone(),
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn model_path(&self, kind: ModelKind) -> PathBuf {
        self.models_dir.join(kind.filename())
    }

    /// Whether a model file exists with a plausible size
    pub fn is_model_available(&self, kind: ModelKind) -> bool {
        match std::fs::metadata(self.model_path(kind)) {
            Ok(metadata) => {
                let (min, max) = kind.expected_size_range();
                (min..=max).contains(&metadata.len())
            }
            Err(_) => false,
        }
    }

    /// Whether every file the recognizer needs is present
    pub fn are_models_ready(&self) -> bool {
        ModelKind::ALL.iter().all(|&kind| self.is_model_available(kind))
    }

    pub fn model_status(&self) -> Vec<ModelStatus> {
        ModelKind::ALL
            .iter()
            .map(|&kind| ModelStatus {
                filename: kind.filename(),
                available: self.is_model_available(kind),
                size_bytes: std::fs::metadata(self.model_path(kind)).ok().map(|m| m.len()),
            })
            .collect()
    }

    /// Download every missing model file
    pub async fn fetch_missing(&self) -> Result<Vec<PathBuf>> {
        let mut fetched = Vec::new();
        for kind in ModelKind::ALL {
            if self.is_model_available(kind) {
                info!("{} already available, skipping download", kind.display_name());
                continue;
            }
            fetched.push(self.fetch(kind).await?);
        }
        Ok(fetched)
    }

    /// Download one model file
    pub async fn fetch(&self, kind: ModelKind) -> Result<PathBuf> {
        let url = kind.download_url(&self.settings).to_string();
        let path = self.model_path(kind);

        if std::env::var_os(OFFLINE_ENV).is_some() {
            anyhow::bail!(
                "Offline mode: cannot download models. Please download {} manually and place it at {:?}",
                url,
                path
            );
        }

        std::fs::create_dir_all(&self.models_dir)
            .with_context(|| format!("Failed to create models directory {:?}", self.models_dir))?;

        info!("Downloading {} model from {}", kind.display_name(), url);
        let sha256 = download_file(&url, &path).await?;

        if !self.is_model_available(kind) {
            anyhow::bail!("Download completed but {} failed the size check", kind.filename());
        }

        self.record_download(kind, &url, sha256)?;
        info!("Successfully downloaded {} model", kind.display_name());
        Ok(path)
    }

    fn record_download(&self, kind: ModelKind, url: &str, sha256: String) -> Result<()> {
        let mut manifest = self.load_manifest().unwrap_or_default();
        let size_bytes = std::fs::metadata(self.model_path(kind))?.len();
        let downloaded_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let info = ModelInfo {
            filename: kind.filename().to_string(),
            size_bytes,
            sha256,
            source_url: url.to_string(),
            downloaded_at,
        };

        match manifest.models.iter_mut().find(|m| m.filename == info.filename) {
            Some(existing) => *existing = info,
            None => manifest.models.push(info),
        }

        self.save_manifest(&manifest)
    }

    pub fn load_manifest(&self) -> Result<ModelManifest> {
        let manifest_path = self.models_dir.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            return Ok(ModelManifest::default());
        }
        let content = std::fs::read_to_string(&manifest_path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save_manifest(&self, manifest: &ModelManifest) -> Result<()> {
        let content = serde_json::to_string_pretty(manifest)?;
        std::fs::write(self.models_dir.join(MANIFEST_FILE), content)?;
        Ok(())
    }
}

/// Stream `url` into `path` via a temp file, returning the SHA-256 hex digest
async fn download_file(url: &str, path: &Path) -> Result<String> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(300))
        .build()
        .context("Failed to create HTTP client")?;

    let response = client
        .get(url)
        .send()
        .await
        .context("Failed to send download request")?;

    if !response.status().is_success() {
        anyhow::bail!("Download failed with status {}: {}", response.status(), url);
    }

    debug!("Download size: {:?} bytes", response.content_length());

    let temp_path = path.with_extension("tmp");
    let mut file = std::fs::File::create(&temp_path).context("Failed to create temp file")?;
    let mut hasher = Sha256::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Error reading download stream")?;
        file.write_all(&chunk).context("Failed to write to temp file")?;
        hasher.update(&chunk);
    }

    file.flush().context("Failed to flush temp file")?;
    drop(file);

    std::fs::rename(&temp_path, path).context("Failed to move downloaded file to final location")?;
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> ModelManager {
        ModelManager::with_dir(dir.path().to_path_buf(), &ModelSettings::default())
    }

    #[test]
    fn test_model_filenames() {
        assert_eq!(ModelKind::Recognition.filename(), "rec.onnx");
        assert_eq!(ModelKind::Dictionary.filename(), "dict.txt");
    }

    #[test]
    fn test_missing_models_are_not_ready() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        assert!(!manager.are_models_ready());

        let status = manager.model_status();
        assert_eq!(status.len(), 2);
        assert!(status.iter().all(|s| !s.available && s.size_bytes.is_none()));
    }

    #[test]
    fn test_size_check() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);

        std::fs::write(manager.model_path(ModelKind::Dictionary), "0\n").unwrap();
        assert!(!manager.is_model_available(ModelKind::Dictionary));

        let dict: String = (0..200).map(|i| format!("{}\n", i % 10)).collect();
        std::fs::write(manager.model_path(ModelKind::Dictionary), dict).unwrap();
        assert!(manager.is_model_available(ModelKind::Dictionary));
        assert!(!manager.are_models_ready());
    }

    #[test]
    fn test_manifest_roundtrip() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        assert!(manager.load_manifest().unwrap().models.is_empty());

        let mut manifest = ModelManifest::default();
        manifest.models.push(ModelInfo {
            filename: "dict.txt".to_string(),
            size_bytes: 400,
            sha256: "abc".to_string(),
            source_url: "https://example.invalid/dict.txt".to_string(),
            downloaded_at: 1,
        });
        manager.save_manifest(&manifest).unwrap();

        let loaded = manager.load_manifest().unwrap();
        assert_eq!(loaded.models.len(), 1);
        assert_eq!(loaded.models[0].sha256, "abc");
    }
}
