//! Trained recognizer
//!
//! PaddleOCR CRNN recognition model run through ONNX Runtime. Text lines are
//! found by horizontal ink projection and recognized one at a time; CTC
//! decoding only considers the blank class and the digit classes.

use anyhow::{Context, Result};
use ndarray::Array4;
use ort::session::builder::GraphOptimizationLevel;
use ort::{session::Session, value::Value};
use parking_lot::Mutex;
use std::path::Path;
use tracing::{debug, info};

use super::engine::{Recognition, RecognitionEngine};
use super::CandidateSource;
use crate::error::PipelineError;
use crate::raster::Raster;

/// Input height expected by the recognition model
pub const REC_INPUT_HEIGHT: u32 = 48;
/// Widest line fed to the model
pub const REC_MAX_WIDTH: u32 = 640;
const REC_MIN_WIDTH: u32 = 16;
/// CTC blank class
const BLANK_CLASS: usize = 0;
const MIN_LINE_HEIGHT: u32 = 8;
/// Rows merged across when splitting lines
const LINE_GAP_TOLERANCE: u32 = 2;
const LINE_PADDING: u32 = 4;

/// Output class index of every single-digit dictionary entry.
///
/// Class 0 is the CTC blank, so dictionary line `i` is class `i + 1`.
pub fn digit_classes(dictionary: &[String]) -> Vec<(usize, char)> {
    dictionary
        .iter()
        .enumerate()
        .filter_map(|(i, entry)| {
            let mut chars = entry.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii_digit() => Some((i + 1, c)),
                _ => None,
            }
        })
        .collect()
}

/// Greedy CTC decode of `[steps, classes]` probabilities restricted to the
/// given classes. Returns the text and the mean probability of the emitted
/// characters.
pub fn ctc_greedy_decode(
    probabilities: &[f32],
    steps: usize,
    classes: usize,
    allowed: &[(usize, char)],
) -> (String, Option<f32>) {
    let mut text = String::new();
    let mut emitted = Vec::new();
    let mut previous = BLANK_CLASS;

    for t in 0..steps {
        let row = &probabilities[t * classes..(t + 1) * classes];
        let mut best = (BLANK_CLASS, row.get(BLANK_CLASS).copied().unwrap_or(0.0), None);
        for &(class, c) in allowed {
            if let Some(&p) = row.get(class) {
                if p > best.1 {
                    best = (class, p, Some(c));
                }
            }
        }

        let (class, probability, c) = best;
        if class != BLANK_CLASS && class != previous {
            if let Some(c) = c {
                text.push(c);
                emitted.push(probability);
            }
        }
        previous = class;
    }

    let confidence = if emitted.is_empty() {
        None
    } else {
        Some(emitted.iter().sum::<f32>() / emitted.len() as f32)
    };
    (text, confidence)
}

/// Row bands `(top, bottom_exclusive)` holding ink, padded; the whole image
/// when no band qualifies
pub fn find_text_lines(raster: &Raster) -> Vec<(u32, u32)> {
    let (width, height) = raster.dimensions();
    let min_ink = (width / 200).max(1);
    let rows: Vec<bool> = (0..height)
        .map(|y| (0..width).filter(|&x| raster.is_dark_at(x, y)).count() as u32 >= min_ink)
        .collect();

    let mut bands: Vec<(u32, u32)> = Vec::new();
    let mut y = 0u32;
    while y < height {
        if !rows[y as usize] {
            y += 1;
            continue;
        }
        let start = y;
        while y < height && rows[y as usize] {
            y += 1;
        }
        match bands.last_mut() {
            Some(last) if start - last.1 <= LINE_GAP_TOLERANCE => last.1 = y,
            _ => bands.push((start, y)),
        }
    }

    let lines: Vec<(u32, u32)> = bands
        .into_iter()
        .filter(|(top, bottom)| bottom - top >= MIN_LINE_HEIGHT)
        .map(|(top, bottom)| {
            (
                top.saturating_sub(LINE_PADDING),
                (bottom + LINE_PADDING).min(height),
            )
        })
        .collect();

    if lines.is_empty() {
        vec![(0, height)]
    } else {
        lines
    }
}

/// Resize a line to the model height and convert to a `[1, 3, H, W]`
/// tensor normalized to [-1, 1]
pub fn line_tensor(line: &Raster) -> Array4<f32> {
    let (width, height) = line.dimensions();
    let scale = REC_INPUT_HEIGHT as f32 / height.max(1) as f32;
    let target_width = ((width as f32 * scale).round() as u32).clamp(REC_MIN_WIDTH, REC_MAX_WIDTH);
    let resized = line.resize(target_width, REC_INPUT_HEIGHT);
    let image = resized.image();

    Array4::from_shape_fn(
        (1, 3, REC_INPUT_HEIGHT as usize, target_width as usize),
        |(_, c, y, x)| image.get_pixel(x as u32, y as u32).0[c] as f32 / 127.5 - 1.0,
    )
}

/// ONNX Runtime digit recognizer
pub struct OnnxDigitRecognizer {
    session: Mutex<Session>,
    digit_classes: Vec<(usize, char)>,
}

impl OnnxDigitRecognizer {
    /// Load the recognition model and its dictionary
    pub fn load(model_path: &Path, dictionary_path: &Path, intra_threads: usize) -> Result<Self> {
        info!("Loading recognition model from {:?}", model_path);

        let dictionary: Vec<String> = std::fs::read_to_string(dictionary_path)
            .with_context(|| format!("Failed to read dictionary {:?}", dictionary_path))?
            .lines()
            .map(|line| line.trim_end_matches('\r').to_string())
            .collect();

        let digit_classes = digit_classes(&dictionary);
        if digit_classes.is_empty() {
            anyhow::bail!("Dictionary {:?} has no digit entries", dictionary_path);
        }

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(intra_threads.max(1))?
            .commit_from_file(model_path)
            .context("Failed to load recognition model")?;

        info!(
            "Recognition model loaded: {} dictionary entries, {} digit classes",
            dictionary.len(),
            digit_classes.len()
        );

        Ok(Self {
            session: Mutex::new(session),
            digit_classes,
        })
    }

    fn recognize_line(&self, line: &Raster) -> Result<(String, Option<f32>)> {
        let tensor = line_tensor(line);
        let shape: [usize; 4] = {
            let dims = tensor.dim();
            [dims.0, dims.1, dims.2, dims.3]
        };
        let (data, _offset) = tensor.into_raw_vec_and_offset();
        let input = Value::from_array((shape, data))?;

        // Copy the output out before releasing the session
        let (dims, probabilities) = {
            let mut session = self.session.lock();
            let outputs = session.run(ort::inputs!["x" => input])?;
            let first_key = outputs.keys().next().context("No outputs from recognition model")?;
            let (shape, data) = outputs[first_key].try_extract_tensor::<f32>()?;
            let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
            (dims, data.to_vec())
        };

        // [1, steps, classes]
        let (steps, classes) = match dims.as_slice() {
            [_, steps, classes] => (*steps, *classes),
            [steps, classes] => (*steps, *classes),
            other => anyhow::bail!("Unexpected recognition output shape {:?}", other),
        };
        if probabilities.len() < steps * classes {
            anyhow::bail!("Recognition output shorter than its shape");
        }

        Ok(ctc_greedy_decode(&probabilities, steps, classes, &self.digit_classes))
    }
}

impl RecognitionEngine for OnnxDigitRecognizer {
    fn source(&self) -> CandidateSource {
        CandidateSource::TrainedRecognizer
    }

    fn recognize(&self, raster: &Raster) -> Result<Recognition, PipelineError> {
        let engine = self.source().engine_name();
        let (width, height) = raster.dimensions();
        if width == 0 || height == 0 {
            return Err(PipelineError::recognition(engine, "empty raster"));
        }

        let mut lines = Vec::new();
        let mut confidences = Vec::new();
        for (top, bottom) in find_text_lines(raster) {
            let line = raster
                .crop(0, top, width, bottom - top)
                .unwrap_or_else(|| raster.clone());
            let (text, confidence) = self
                .recognize_line(&line)
                .map_err(|e| PipelineError::recognition(engine, format!("{:#}", e)))?;
            if !text.is_empty() {
                lines.push(text);
            }
            confidences.extend(confidence);
        }

        debug!("Trained recognizer read {} line(s)", lines.len());
        let confidence = if confidences.is_empty() {
            None
        } else {
            Some(confidences.iter().sum::<f32>() / confidences.len() as f32)
        };

        Ok(Recognition {
            text: lines.join("\n"),
            confidence,
        })
    }
}
