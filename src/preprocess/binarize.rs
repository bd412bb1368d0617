//! Binarization for OCR
//!
//! Contrast stretch, Otsu thresholding (global or per-tile), light-on-dark
//! inversion and a dilate/erode pass that reconnects thin handwritten strokes.

use tracing::debug;

use crate::config::BinarizeSettings;
use crate::raster::{luma, luma_bin, Raster, ALPHA_CUTOFF, DARK_LEVEL};

/// Threshold used when a histogram has no opaque pixels
const FALLBACK_THRESHOLD: u8 = 160;
const MIN_THRESHOLD: i32 = 40;
const MAX_THRESHOLD: i32 = 230;
/// Images smaller than this on either side always use the global threshold
const MIN_ADAPTIVE_SIDE: u32 = 64;

/// Binarize a brightness-adjusted raster into pure black/white for OCR.
///
/// Rasters that are already pure black/white skip the stroke-repair pass, so
/// feeding an output back in returns it unchanged.
pub fn binarize_for_ocr(raster: &Raster, brightness_tweak: i32, settings: &BinarizeSettings) -> Raster {
    let tweak = super::clamp_brightness_tweak(brightness_tweak);
    let already_binary = is_binary(raster);

    let stretched = contrast_stretch(raster, settings.stretch_min_range);
    let adaptive = should_use_adaptive(&stretched, settings.adaptive_spread);

    let mut binary = if adaptive {
        adaptive_threshold(&stretched, tweak)
    } else {
        let threshold = clamp_threshold(otsu_threshold(&stretched) as i32 + tweak);
        global_threshold(&stretched, threshold)
    };

    let mut dark_ratio = dark_pixel_ratio(&binary);
    debug!(
        "Binarized {}x{} (adaptive={}, dark ratio {:.3})",
        binary.width(),
        binary.height(),
        adaptive,
        dark_ratio
    );

    if dark_ratio >= settings.inversion_dark_ratio {
        binary.invert_in_place();
        dark_ratio = dark_pixel_ratio(&binary);
        debug!("Inverted light-on-dark image (dark ratio now {:.3})", dark_ratio);
    }

    if already_binary || dark_ratio <= settings.morphology_min_ratio || dark_ratio >= settings.morphology_max_ratio {
        return binary;
    }

    erode_dark(&dilate_dark(&binary))
}

fn clamp_threshold(value: i32) -> u8 {
    value.clamp(MIN_THRESHOLD, MAX_THRESHOLD) as u8
}

/// Stretch luma so the 1st/99th percentiles map to 0/255.
///
/// Skipped when the percentile range is under `min_range`.
pub fn contrast_stretch(raster: &Raster, min_range: u8) -> Raster {
    let (hist, total) = luma_histogram(raster, 0, 0, raster.width(), raster.height());
    if total == 0 {
        return raster.clone();
    }

    let p1 = total / 100;
    let p99 = total * 99 / 100;
    let mut lo: Option<usize> = None;
    let mut hi = 0usize;
    let mut cumulative = 0u64;
    for (value, &count) in hist.iter().enumerate() {
        cumulative += count;
        if lo.is_none() && cumulative >= p1 {
            lo = Some(value);
        }
        if cumulative >= p99 {
            hi = value;
            break;
        }
    }
    let lo = lo.unwrap_or(0);

    let range = hi.saturating_sub(lo);
    if range < min_range as usize {
        return raster.clone();
    }

    let mut out = raster.clone();
    let scale = 255.0 / range as f32;
    for pixel in out.image_mut().pixels_mut() {
        for c in 0..3 {
            let value = (pixel.0[c] as f32 - lo as f32) * scale;
            pixel.0[c] = value.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// 256-bin luma histogram over opaque pixels of a region
fn luma_histogram(raster: &Raster, x0: u32, y0: u32, x1: u32, y1: u32) -> ([u64; 256], u64) {
    let mut hist = [0u64; 256];
    let mut total = 0u64;
    let image = raster.image();

    for y in y0..y1 {
        for x in x0..x1 {
            let [r, g, b, a] = image.get_pixel(x, y).0;
            if a < ALPHA_CUTOFF {
                continue;
            }
            hist[luma_bin(r, g, b)] += 1;
            total += 1;
        }
    }

    (hist, total)
}

/// Otsu's method: the cut maximizing between-class variance
fn otsu_from_histogram(hist: &[u64; 256], total: u64) -> u8 {
    if total == 0 {
        return FALLBACK_THRESHOLD;
    }

    let sum: f64 = hist.iter().enumerate().map(|(i, &c)| i as f64 * c as f64).sum();
    let total = total as f64;

    let mut sum_b = 0.0f64;
    let mut weight_b = 0.0f64;
    let mut best_variance = -1.0f64;
    let mut threshold = FALLBACK_THRESHOLD;

    for (t, &count) in hist.iter().enumerate() {
        weight_b += count as f64;
        if weight_b == 0.0 {
            continue;
        }
        let weight_f = total - weight_b;
        if weight_f == 0.0 {
            break;
        }

        sum_b += t as f64 * count as f64;
        let mean_b = sum_b / weight_b;
        let mean_f = (sum - sum_b) / weight_f;
        let between = weight_b * weight_f * (mean_b - mean_f) * (mean_b - mean_f);
        if between > best_variance {
            best_variance = between;
            threshold = t as u8;
        }
    }

    threshold
}

/// Global Otsu threshold over the whole raster
pub fn otsu_threshold(raster: &Raster) -> u8 {
    let (hist, total) = luma_histogram(raster, 0, 0, raster.width(), raster.height());
    otsu_from_histogram(&hist, total)
}

/// Otsu threshold over the region `[x0, x1) x [y0, y1)`
pub fn otsu_threshold_region(raster: &Raster, x0: u32, y0: u32, x1: u32, y1: u32) -> u8 {
    let (hist, total) = luma_histogram(raster, x0, y0, x1, y1);
    otsu_from_histogram(&hist, total)
}

/// Compare quadrant mean luma; a wide spread means uneven lighting
pub fn should_use_adaptive(raster: &Raster, spread: f32) -> bool {
    let (width, height) = raster.dimensions();
    if width < MIN_ADAPTIVE_SIDE || height < MIN_ADAPTIVE_SIDE {
        return false;
    }

    let half_w = width / 2;
    let half_h = height / 2;
    let quadrants = [
        (0, 0, half_w, half_h),
        (half_w, 0, width, half_h),
        (0, half_h, half_w, height),
        (half_w, half_h, width, height),
    ];
    let image = raster.image();

    let means: Vec<f32> = quadrants
        .iter()
        .map(|&(x0, y0, x1, y1)| {
            let mut sum = 0.0f32;
            let mut count = 0u32;
            // Every 4th pixel is plenty for a mean
            for y in (y0..y1).step_by(4) {
                for x in (x0..x1).step_by(4) {
                    let [r, g, b, a] = image.get_pixel(x, y).0;
                    if a < ALPHA_CUTOFF {
                        continue;
                    }
                    sum += luma(r, g, b);
                    count += 1;
                }
            }
            if count > 0 {
                sum / count as f32
            } else {
                128.0
            }
        })
        .collect();

    let min = means.iter().copied().fold(f32::INFINITY, f32::min);
    let max = means.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    max - min > spread
}

/// Map every pixel to black or white against a single threshold
pub fn global_threshold(raster: &Raster, threshold: u8) -> Raster {
    let mut out = raster.clone();
    for pixel in out.image_mut().pixels_mut() {
        let [r, g, b, a] = pixel.0;
        let v = if luma(r, g, b) >= threshold as f32 { 255 } else { 0 };
        pixel.0 = [v, v, v, a];
    }
    out
}

/// Per-tile Otsu thresholds for unevenly lit images
pub fn adaptive_threshold(raster: &Raster, tweak: i32) -> Raster {
    let (width, height) = raster.dimensions();
    let tile = (width.max(height) / 8).clamp(16, 64);
    let tiles_x = width.div_ceil(tile);
    let tiles_y = height.div_ceil(tile);

    let mut thresholds = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile;
            let y0 = ty * tile;
            let x1 = (x0 + tile).min(width);
            let y1 = (y0 + tile).min(height);
            let t = otsu_threshold_region(raster, x0, y0, x1, y1);
            thresholds.push(clamp_threshold(t as i32 + tweak));
        }
    }

    let mut out = raster.clone();
    for (x, y, pixel) in out.image_mut().enumerate_pixels_mut() {
        let tx = (x / tile).min(tiles_x - 1);
        let ty = (y / tile).min(tiles_y - 1);
        let threshold = thresholds[(ty * tiles_x + tx) as usize];
        let [r, g, b, a] = pixel.0;
        let v = if luma(r, g, b) >= threshold as f32 { 255 } else { 0 };
        pixel.0 = [v, v, v, a];
    }
    out
}

/// Whether every pixel is pure black or pure white
pub fn is_binary(raster: &Raster) -> bool {
    raster
        .image()
        .pixels()
        .all(|p| matches!([p.0[0], p.0[1], p.0[2]], [0, 0, 0] | [255, 255, 255]))
}

/// Fraction of opaque pixels that are dark
pub fn dark_pixel_ratio(raster: &Raster) -> f32 {
    let mut opaque = 0u64;
    let mut dark = 0u64;
    for pixel in raster.image().pixels() {
        if pixel.0[3] < ALPHA_CUTOFF {
            continue;
        }
        opaque += 1;
        if pixel.0[0] < DARK_LEVEL {
            dark += 1;
        }
    }
    if opaque == 0 {
        return 0.0;
    }
    dark as f32 / opaque as f32
}

/// Grow every dark pixel into its 8-neighborhood
pub fn dilate_dark(raster: &Raster) -> Raster {
    let (width, height) = raster.dimensions();
    let source = raster.image();
    let mut out = raster.clone();
    let target = out.image_mut();

    for y in 0..height {
        for x in 0..width {
            let src = source.get_pixel(x, y).0;
            if src[0] >= DARK_LEVEL {
                continue;
            }
            for ny in y.saturating_sub(1)..=(y + 1).min(height - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(width - 1) {
                    let dst = target.get_pixel_mut(nx, ny);
                    dst.0 = [0, 0, 0, dst.0[3].max(src[3])];
                }
            }
        }
    }

    out
}

/// Keep a dark pixel only if at least 3 of its 4 cardinal neighbors are dark
pub fn erode_dark(raster: &Raster) -> Raster {
    let (width, height) = raster.dimensions();
    if width < 3 || height < 3 {
        return raster.clone();
    }
    let source = raster.image();
    let mut out = raster.clone();
    let target = out.image_mut();
    let dark = |x: u32, y: u32| source.get_pixel(x, y).0[0] < DARK_LEVEL;

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            if !dark(x, y) {
                continue;
            }
            let neighbors = [dark(x, y - 1), dark(x, y + 1), dark(x - 1, y), dark(x + 1, y)]
                .iter()
                .filter(|&&d| d)
                .count();
            if neighbors < 3 {
                let dst = target.get_pixel_mut(x, y);
                dst.0 = [255, 255, 255, dst.0[3]];
            }
        }
    }

    out
}
