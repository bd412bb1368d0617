//! Digit glyph templates and matching
//!
//! Glyph masks (ink = 255) are normalized to a fixed square: tight crop,
//! centered square padding, bilinear resize. Templates are rendered from a
//! 5x7 digit font through the same normalization and compared with
//! zero-mean normalized cross-correlation.

use image::{imageops, imageops::FilterType, GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};

/// Side of a normalized glyph
pub const GLYPH_SIZE: u32 = 20;
/// Best matches scoring below this are reported as unknown
pub const MIN_MATCH_SCORE: f32 = 0.45;
/// Added to the score when the glyph's hole count matches the template's
const HOLE_BONUS: f32 = 0.1;
/// Glyphs narrower than this fraction of their height read as `1`
const THIN_GLYPH_ASPECT: f32 = 0.25;
const TEMPLATE_SCALE: u32 = 4;

/// 5x7 digit font, one string per row
pub const DIGIT_FONT: [[&str; 7]; 10] = [
    ["01110", "10001", "10001", "10001", "10001", "10001", "01110"],
    ["00100", "01100", "00100", "00100", "00100", "00100", "01110"],
    ["01110", "10001", "00001", "00010", "00100", "01000", "11111"],
    ["11111", "00010", "00100", "00010", "00001", "10001", "01110"],
    ["00010", "00110", "01010", "10010", "11111", "00010", "00010"],
    ["11111", "10000", "11110", "00001", "00001", "10001", "01110"],
    ["00110", "01000", "10000", "11110", "10001", "10001", "01110"],
    ["11111", "00001", "00010", "00100", "01000", "01000", "01000"],
    ["01110", "10001", "10001", "01110", "10001", "10001", "01110"],
    ["01110", "10001", "10001", "01111", "00001", "00010", "01100"],
];

/// Render a font digit as an ink mask, each font cell `scale` pixels square
pub fn render_digit(digit: usize, scale: u32) -> GrayImage {
    let rows = &DIGIT_FONT[digit % 10];
    let mut mask = GrayImage::new(5 * scale, 7 * scale);
    for (row, bits) in rows.iter().enumerate() {
        for (col, bit) in bits.chars().enumerate() {
            if bit != '1' {
                continue;
            }
            for dy in 0..scale {
                for dx in 0..scale {
                    mask.put_pixel(col as u32 * scale + dx, row as u32 * scale + dy, Luma([255]));
                }
            }
        }
    }
    mask
}

/// Bounding box `(x, y, width, height)` of the ink in a mask
fn ink_bounds(mask: &GrayImage) -> Option<(u32, u32, u32, u32)> {
    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for (x, y, pixel) in mask.enumerate_pixels() {
        if pixel.0[0] == 0 {
            continue;
        }
        bounds = Some(match bounds {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        });
    }
    bounds.map(|(x0, y0, x1, y1)| (x0, y0, x1 - x0 + 1, y1 - y0 + 1))
}

/// Tight-crop, pad to a centered square and resize to [`GLYPH_SIZE`]
pub fn normalize_glyph(mask: &GrayImage) -> GrayImage {
    let Some((x, y, width, height)) = ink_bounds(mask) else {
        return GrayImage::new(GLYPH_SIZE, GLYPH_SIZE);
    };

    let cropped = imageops::crop_imm(mask, x, y, width, height).to_image();
    let side = width.max(height);
    let mut square = GrayImage::new(side, side);
    imageops::replace(
        &mut square,
        &cropped,
        ((side - width) / 2) as i64,
        ((side - height) / 2) as i64,
    );

    imageops::resize(&square, GLYPH_SIZE, GLYPH_SIZE, FilterType::Triangle)
}

/// Enclosed background regions (4-connected, not touching the border)
pub fn count_holes(mask: &GrayImage) -> u32 {
    let (width, height) = mask.dimensions();
    if width < 3 || height < 3 {
        return 0;
    }

    // Ink is the "background" here so the labels are the empty regions
    let labels = connected_components(mask, Connectivity::Four, Luma([255u8]));
    let max_label = labels.pixels().map(|p| p.0[0]).max().unwrap_or(0) as usize;
    let mut touches_border = vec![false; max_label + 1];
    let mut area = vec![0u32; max_label + 1];

    for (x, y, pixel) in labels.enumerate_pixels() {
        let label = pixel.0[0] as usize;
        if label == 0 {
            continue;
        }
        area[label] += 1;
        if x == 0 || y == 0 || x == width - 1 || y == height - 1 {
            touches_border[label] = true;
        }
    }

    (1..=max_label)
        .filter(|&label| !touches_border[label] && area[label] >= 2)
        .count() as u32
}

/// Zero-mean normalized cross-correlation of two equally sized images, in [0, 1]
pub fn normalized_cross_correlation(image: &GrayImage, template: &GrayImage) -> f32 {
    if image.dimensions() != template.dimensions() {
        return 0.0;
    }

    let mut sum_it = 0.0f64;
    let mut sum_i2 = 0.0f64;
    let mut sum_t2 = 0.0f64;
    let mut sum_i = 0.0f64;
    let mut sum_t = 0.0f64;
    let count = (image.width() * image.height()) as f64;
    if count == 0.0 {
        return 0.0;
    }

    for (i, t) in image.pixels().zip(template.pixels()) {
        let i = i.0[0] as f64;
        let t = t.0[0] as f64;
        sum_it += i * t;
        sum_i2 += i * i;
        sum_t2 += t * t;
        sum_i += i;
        sum_t += t;
    }

    let mean_i = sum_i / count;
    let mean_t = sum_t / count;
    let numerator = sum_it - count * mean_i * mean_t;
    let denominator = (sum_i2 - count * mean_i * mean_i).sqrt() * (sum_t2 - count * mean_t * mean_t).sqrt();

    if denominator < 1e-10 {
        return 0.0;
    }

    (numerator / denominator).clamp(0.0, 1.0) as f32
}

struct DigitTemplate {
    digit: char,
    glyph: GrayImage,
    holes: u32,
}

/// The ten normalized digit templates
pub struct GlyphTemplates {
    templates: Vec<DigitTemplate>,
}

impl Default for GlyphTemplates {
    fn default() -> Self {
        Self::new()
    }
}

impl GlyphTemplates {
    pub fn new() -> Self {
        let templates = (0..10)
            .map(|digit| {
                let mask = render_digit(digit, TEMPLATE_SCALE);
                DigitTemplate {
                    digit: char::from(b'0' + digit as u8),
                    glyph: normalize_glyph(&mask),
                    holes: count_holes(&mask),
                }
            })
            .collect();
        Self { templates }
    }

    /// Best digit for a glyph mask and its match score; `?` when nothing
    /// scores at least [`MIN_MATCH_SCORE`]
    pub fn classify(&self, mask: &GrayImage) -> (char, f32) {
        let Some((_, _, width, height)) = ink_bounds(mask) else {
            return ('?', 0.0);
        };
        if (width as f32) < height as f32 * THIN_GLYPH_ASPECT {
            return ('1', 1.0);
        }

        let glyph = normalize_glyph(mask);
        let holes = count_holes(mask);

        let mut best = ('?', 0.0f32);
        for template in &self.templates {
            let mut score = normalized_cross_correlation(&glyph, &template.glyph);
            if holes == template.holes {
                score += HOLE_BONUS;
            }
            if score > best.1 {
                best = (template.digit, score);
            }
        }

        if best.1 < MIN_MATCH_SCORE {
            return ('?', best.1);
        }
        best
    }
}
