//! Structural digit detector
//!
//! Classical recognizer that needs no model files: dark-pixel mask,
//! 8-connected components, glyph filtering, grouping into text lines and
//! per-glyph template matching.

use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};
use tracing::debug;

use super::engine::{Recognition, RecognitionEngine};
use super::glyphs::GlyphTemplates;
use super::CandidateSource;
use crate::error::PipelineError;
use crate::raster::Raster;

/// Luma under which a pixel is ink
const INK_LEVEL: u8 = 128;
const MIN_GLYPH_HEIGHT: u32 = 8;
const MIN_GLYPH_AREA: u32 = 12;
/// Glyphs taller than this fraction of the image are frames or borders
const MAX_GLYPH_HEIGHT_RATIO: f32 = 0.95;
/// Wider blobs are underlines or rules, not digits
const MAX_GLYPH_ASPECT: f32 = 1.6;
/// Gap (in median glyph heights) that separates words
const WORD_GAP_RATIO: f32 = 0.6;

/// A connected component that looks like a character
#[derive(Debug, Clone)]
struct Glyph {
    label: u32,
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
    area: u32,
}

impl Glyph {
    fn width(&self) -> u32 {
        self.x1 - self.x0 + 1
    }

    fn height(&self) -> u32 {
        self.y1 - self.y0 + 1
    }
}

/// Pure-Rust glyph matcher for printed and neatly written digits
pub struct StructuralDetector {
    templates: GlyphTemplates,
}

impl Default for StructuralDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl StructuralDetector {
    pub fn new() -> Self {
        Self {
            templates: GlyphTemplates::new(),
        }
    }

    /// Recognize text lines in a raster
    pub fn read_text(&self, raster: &Raster) -> String {
        let mask = raster.dark_mask(INK_LEVEL);
        let labels = connected_components(&mask, Connectivity::Eight, Luma([0u8]));
        let glyphs = collect_glyphs(&labels, raster.height());

        let lines = group_into_lines(glyphs);
        debug!("Structural detector found {} text line(s)", lines.len());

        lines
            .iter()
            .map(|line| self.read_line(&labels, line))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn read_line(&self, labels: &image::ImageBuffer<Luma<u32>, Vec<u32>>, line: &[Glyph]) -> String {
        let mut heights: Vec<u32> = line.iter().map(Glyph::height).collect();
        heights.sort_unstable();
        let median_height = heights[heights.len() / 2] as f32;

        let mut text = String::with_capacity(line.len() * 2);
        for (i, glyph) in line.iter().enumerate() {
            if i > 0 {
                let gap = glyph.x0.saturating_sub(line[i - 1].x1 + 1) as f32;
                if gap > median_height * WORD_GAP_RATIO {
                    text.push(' ');
                }
            }
            let (c, _) = self.templates.classify(&glyph_mask(labels, glyph));
            text.push(c);
        }
        text
    }
}

impl RecognitionEngine for StructuralDetector {
    fn source(&self) -> CandidateSource {
        CandidateSource::StructuralDetector
    }

    fn recognize(&self, raster: &Raster) -> Result<Recognition, PipelineError> {
        if raster.width() == 0 || raster.height() == 0 {
            return Err(PipelineError::recognition(
                self.source().engine_name(),
                "empty raster",
            ));
        }
        Ok(Recognition {
            text: self.read_text(raster),
            confidence: None,
        })
    }
}

fn collect_glyphs(labels: &image::ImageBuffer<Luma<u32>, Vec<u32>>, image_height: u32) -> Vec<Glyph> {
    let mut by_label: Vec<Option<Glyph>> = Vec::new();

    for (x, y, pixel) in labels.enumerate_pixels() {
        let label = pixel.0[0];
        if label == 0 {
            continue;
        }
        let index = label as usize;
        if by_label.len() <= index {
            by_label.resize(index + 1, None);
        }
        match &mut by_label[index] {
            Some(glyph) => {
                glyph.x0 = glyph.x0.min(x);
                glyph.y0 = glyph.y0.min(y);
                glyph.x1 = glyph.x1.max(x);
                glyph.y1 = glyph.y1.max(y);
                glyph.area += 1;
            }
            slot => {
                *slot = Some(Glyph {
                    label,
                    x0: x,
                    y0: y,
                    x1: x,
                    y1: y,
                    area: 1,
                })
            }
        }
    }

    let max_height = image_height as f32 * MAX_GLYPH_HEIGHT_RATIO;
    by_label
        .into_iter()
        .flatten()
        .filter(|g| {
            g.height() >= MIN_GLYPH_HEIGHT
                && g.height() as f32 <= max_height
                && g.area >= MIN_GLYPH_AREA
                && g.width() as f32 <= g.height() as f32 * MAX_GLYPH_ASPECT
        })
        .collect()
}

/// Vertical overlap of two spans as a fraction of the shorter one
fn vertical_overlap(a: (u32, u32), b: (u32, u32)) -> f32 {
    let top = a.0.max(b.0);
    let bottom = a.1.min(b.1);
    if bottom < top {
        return 0.0;
    }
    let shorter = (a.1 - a.0 + 1).min(b.1 - b.0 + 1);
    (bottom - top + 1) as f32 / shorter as f32
}

/// Group glyphs into lines of similar height and overlapping rows, each
/// sorted left to right; lines are ordered top to bottom
fn group_into_lines(mut glyphs: Vec<Glyph>) -> Vec<Vec<Glyph>> {
    glyphs.sort_by_key(|g| (g.y0 + g.y1, g.x0));

    let mut lines: Vec<(u32, u32, Vec<Glyph>)> = Vec::new();
    for glyph in glyphs {
        let span = (glyph.y0, glyph.y1);
        let found = lines.iter_mut().find(|(top, bottom, _)| {
            let line_height = (bottom - top + 1) as f32;
            let ratio = glyph.height() as f32 / line_height;
            vertical_overlap((*top, *bottom), span) >= 0.5 && (0.5..=2.0).contains(&ratio)
        });

        match found {
            Some((top, bottom, members)) => {
                *top = (*top).min(glyph.y0);
                *bottom = (*bottom).max(glyph.y1);
                members.push(glyph);
            }
            None => lines.push((glyph.y0, glyph.y1, vec![glyph])),
        }
    }

    lines.sort_by_key(|(top, _, _)| *top);
    lines
        .into_iter()
        .map(|(_, _, mut members)| {
            members.sort_by_key(|g| g.x0);
            members
        })
        .collect()
}

/// Mask of exactly one component, cropped to its bounding box
fn glyph_mask(labels: &image::ImageBuffer<Luma<u32>, Vec<u32>>, glyph: &Glyph) -> GrayImage {
    GrayImage::from_fn(glyph.width(), glyph.height(), |x, y| {
        if labels.get_pixel(glyph.x0 + x, glyph.y0 + y).0[0] == glyph.label {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}
