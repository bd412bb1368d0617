//! Benchmark harness
//!
//! Runs the pipeline over a directory of labelled photos. A photo's expected
//! seed is encoded in its file name after the last hyphen, e.g.
//! `receipt-500072.jpg`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::pipeline::{PhotoPipelineOptions, PhotoSeedPipeline, SeedSource, SeedStatus};

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];

/// One image found in a benchmark directory
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TuneItem {
    pub file: String,
    pub path: PathBuf,
    pub expected: Option<String>,
}

/// Outcome for one benchmark image
#[derive(Debug, Clone, Serialize)]
pub struct BenchRow {
    pub file: String,
    pub expected: Option<String>,
    pub detected: String,
    pub exact_match: bool,
    pub seed_source: SeedSource,
    pub status: SeedStatus,
    pub elapsed_ms: u64,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BenchTotals {
    pub count: usize,
    pub labelled_count: usize,
    pub exact_matches: usize,
    /// Percentage of labelled images whose seed matched exactly
    pub accuracy: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchReport {
    pub totals: BenchTotals,
    pub rows: Vec<BenchRow>,
}

impl BenchReport {
    fn from_rows(rows: Vec<BenchRow>) -> Self {
        let labelled_count = rows.iter().filter(|r| r.expected.is_some()).count();
        let exact_matches = rows.iter().filter(|r| r.exact_match).count();
        let accuracy = if labelled_count > 0 {
            exact_matches as f64 / labelled_count as f64 * 100.0
        } else {
            0.0
        };

        Self {
            totals: BenchTotals {
                count: rows.len(),
                labelled_count,
                exact_matches,
                accuracy,
            },
            rows,
        }
    }

    /// Labelled rows whose seed did not match
    pub fn mismatches(&self) -> impl Iterator<Item = &BenchRow> {
        self.rows.iter().filter(|r| r.expected.is_some() && !r.exact_match)
    }

    /// CSV export, one line per image
    pub fn to_csv(&self) -> String {
        let mut out = String::from("file,expected,detected,exact_match,seed_source,status,elapsed_ms,message\n");
        for row in &self.rows {
            let fields = [
                escape_csv(&row.file),
                escape_csv(row.expected.as_deref().unwrap_or("")),
                escape_csv(&row.detected),
                row.exact_match.to_string(),
                enum_label(&row.seed_source),
                enum_label(&row.status),
                row.elapsed_ms.to_string(),
                escape_csv(&row.message),
            ];
            out.push_str(&fields.join(","));
            out.push('\n');
        }
        out
    }
}

fn enum_label<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

fn escape_csv(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Expected seed from a file name: the digits after the last hyphen of the stem
pub fn parse_expected_from_filename(file: &str) -> Option<String> {
    let stem = match file.rfind('.') {
        Some(dot) => &file[..dot],
        None => file,
    };
    let (_, tail) = stem.rsplit_once('-')?;
    let tail = tail.trim();
    if !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()) {
        Some(tail.to_string())
    } else {
        None
    }
}

fn image_extension(path: &Path) -> Option<String> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    IMAGE_EXTENSIONS.contains(&extension.as_str()).then_some(extension)
}

/// MIME type for a photo path, by extension
pub fn mime_type_for_path(path: &Path) -> &'static str {
    match image_extension(path).as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Image files in `dir`, sorted by name
pub fn list_tune_images(dir: &Path) -> Result<Vec<TuneItem>> {
    let entries = std::fs::read_dir(dir).with_context(|| format!("Failed to read benchmark directory {:?}", dir))?;

    let mut items = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        if image_extension(&path).is_none() {
            continue;
        }
        let file = entry.file_name().to_string_lossy().into_owned();
        items.push(TuneItem {
            expected: parse_expected_from_filename(&file),
            file,
            path,
        });
    }

    items.sort_by(|a, b| a.file.cmp(&b.file));
    Ok(items)
}

/// Run the pipeline over every image in `dir`
pub async fn run_benchmark(
    pipeline: &PhotoSeedPipeline,
    dir: &Path,
    options: &PhotoPipelineOptions,
) -> Result<BenchReport> {
    let items = list_tune_images(dir)?;
    info!("Benchmarking {} image(s) in {:?}", items.len(), dir);

    let mut rows = Vec::with_capacity(items.len());
    for item in items {
        let bytes = tokio::fs::read(&item.path)
            .await
            .with_context(|| format!("Failed to read {:?}", item.path))?;

        let started = Instant::now();
        let result = pipeline
            .process_photo_for_seed(&bytes, mime_type_for_path(&item.path), options)
            .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let exact_match = item.expected.as_deref() == Some(result.seed.as_str());
        debug!("{}: {} (expected {:?})", item.file, result.seed, item.expected);

        rows.push(BenchRow {
            file: item.file,
            expected: item.expected,
            detected: result.seed,
            exact_match,
            seed_source: result.seed_source,
            status: result.status,
            elapsed_ms,
            message: result.message,
        });
    }

    let report = BenchReport::from_rows(rows);
    info!(
        "Benchmark: {}/{} exact ({:.1}%)",
        report.totals.exact_matches, report.totals.labelled_count, report.totals.accuracy
    );
    Ok(report)
}
