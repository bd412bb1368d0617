//! Palette extraction
//!
//! Quantizes opaque pixels into 16 levels per channel and reports the most
//! populated buckets as swatches. Extraction runs on a worker thread bounded
//! by a timeout; if the worker cannot answer in time the same computation
//! runs on the calling thread.

pub mod mapping;

pub use mapping::{derive_seed_from_palette, PaletteSeed};

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::raster::{Raster, ALPHA_CUTOFF};

/// A dominant color of the photo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Swatch {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    /// Lowercase `#rrggbb`
    pub hex: String,
    /// Share of opaque pixels in this bucket, in [0, 1]
    pub prominence: f32,
    /// Hue in degrees, [0, 360)
    pub hue: f32,
    /// HSL lightness, [0, 100]
    pub lightness: f32,
}

impl Swatch {
    /// Build a swatch from an averaged color
    pub fn from_rgb(r: u8, g: u8, b: u8, prominence: f32) -> Self {
        let (hue, lightness) = rgb_to_hsl(r, g, b);
        Self {
            r,
            g,
            b,
            hex: format!("#{:02x}{:02x}{:02x}", r, g, b),
            prominence,
            hue,
            lightness,
        }
    }
}

#[derive(Default)]
struct Bucket {
    count: u64,
    r: u64,
    g: u64,
    b: u64,
}

/// Hue (degrees) and lightness (0-100) of an RGB color
pub fn rgb_to_hsl(r: u8, g: u8, b: u8) -> (f32, f32) {
    let rn = r as f32 / 255.0;
    let gn = g as f32 / 255.0;
    let bn = b as f32 / 255.0;

    let max = rn.max(gn).max(bn);
    let min = rn.min(gn).min(bn);
    let delta = max - min;

    let mut hue = 0.0;
    if delta > 0.0 {
        hue = if max == rn {
            ((gn - bn) / delta) % 6.0
        } else if max == gn {
            (bn - rn) / delta + 2.0
        } else {
            (rn - gn) / delta + 4.0
        };
        hue *= 60.0;
        if hue < 0.0 {
            hue += 360.0;
        }
    }

    let lightness = (max + min) / 2.0 * 100.0;
    (hue, lightness)
}

/// Compute the `count` most prominent swatches on the calling thread
pub fn compute_palette(raster: &Raster, count: usize) -> Vec<Swatch> {
    let mut buckets: HashMap<u16, Bucket> = HashMap::new();
    let mut total = 0u64;

    for pixel in raster.image().pixels() {
        let [r, g, b, a] = pixel.0;
        if a < ALPHA_CUTOFF {
            continue;
        }
        let key = ((r as u16 >> 4) << 8) | ((g as u16 >> 4) << 4) | (b as u16 >> 4);
        let bucket = buckets.entry(key).or_default();
        bucket.count += 1;
        bucket.r += r as u64;
        bucket.g += g as u64;
        bucket.b += b as u64;
        total += 1;
    }

    let mut ranked: Vec<(u16, Bucket)> = buckets.into_iter().collect();
    ranked.sort_by(|a, b| b.1.count.cmp(&a.1.count).then(a.0.cmp(&b.0)));

    ranked
        .into_iter()
        .take(count.max(1))
        .map(|(_, bucket)| {
            let average = |sum: u64| (sum as f64 / bucket.count as f64).round() as u8;
            let prominence = if total > 0 {
                bucket.count as f32 / total as f32
            } else {
                0.0
            };
            Swatch::from_rgb(average(bucket.r), average(bucket.g), average(bucket.b), prominence)
        })
        .collect()
}

/// Extract swatches on a worker thread, falling back to the calling thread
/// when the worker cannot be started or misses `timeout`.
pub fn extract_palette(raster: &Raster, count: usize, timeout: Duration) -> Vec<Swatch> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    let worker_raster = raster.clone();

    let spawned = std::thread::Builder::new()
        .name("palette-worker".to_string())
        .spawn(move || {
            let swatches = compute_palette(&worker_raster, count);
            // Receiver may already have given up
            let _ = tx.send(swatches);
        });

    if let Err(e) = spawned {
        warn!("Palette worker failed to start: {}", e);
        return compute_palette(raster, count);
    }

    match rx.recv_timeout(timeout) {
        Ok(swatches) => {
            debug!("Palette worker returned {} swatches", swatches.len());
            swatches
        }
        Err(e) => {
            warn!("Palette worker did not answer ({}), computing inline", e);
            compute_palette(raster, count)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn two_tone() -> Raster {
        // 75% red, 25% blue, plus a transparent column that must be ignored
        Raster::from_image(RgbaImage::from_fn(5, 4, |x, _| match x {
            0..=2 => Rgba([255, 0, 0, 255]),
            3 => Rgba([0, 0, 255, 255]),
            _ => Rgba([0, 255, 0, 0]),
        }))
    }

    #[test]
    fn test_rgb_to_hsl() {
        let (h, l) = rgb_to_hsl(255, 0, 0);
        assert_eq!(h, 0.0);
        assert!((l - 50.0).abs() < 0.01);

        let (h, _) = rgb_to_hsl(0, 0, 255);
        assert!((h - 240.0).abs() < 0.01);

        let (h, l) = rgb_to_hsl(255, 255, 255);
        assert_eq!(h, 0.0);
        assert!((l - 100.0).abs() < 0.01);

        // Negative modulo branch wraps into [0, 360)
        let (h, _) = rgb_to_hsl(255, 0, 128);
        assert!(h > 300.0 && h < 360.0);
    }

    #[test]
    fn test_compute_palette_orders_by_prominence() {
        let swatches = compute_palette(&two_tone(), 6);
        assert_eq!(swatches.len(), 2);
        assert_eq!(swatches[0].hex, "#ff0000");
        assert!((swatches[0].prominence - 0.75).abs() < 1e-6);
        assert_eq!(swatches[1].hex, "#0000ff");
        assert!((swatches[1].prominence - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_compute_palette_limits_count() {
        let swatches = compute_palette(&two_tone(), 1);
        assert_eq!(swatches.len(), 1);
        // Zero still yields one swatch
        assert_eq!(compute_palette(&two_tone(), 0).len(), 1);
    }

    #[test]
    fn test_fully_transparent_image_has_no_swatches() {
        let raster = Raster::filled(8, 8, [10, 20, 30, 0]);
        assert!(compute_palette(&raster, 6).is_empty());
    }

    #[test]
    fn test_bucket_average_is_rounded() {
        let raster = Raster::from_image(RgbaImage::from_fn(2, 1, |x, _| {
            if x == 0 {
                Rgba([16, 16, 16, 255])
            } else {
                Rgba([17, 17, 17, 255])
            }
        }));
        let swatches = compute_palette(&raster, 6);
        assert_eq!(swatches.len(), 1);
        // 16.5 rounds away from zero
        assert_eq!(swatches[0].r, 17);
    }

    #[test]
    fn test_extract_palette_matches_inline() {
        let raster = two_tone();
        let threaded = extract_palette(&raster, 6, Duration::from_millis(2000));
        assert_eq!(threaded, compute_palette(&raster, 6));
    }

    #[test]
    fn test_extract_palette_zero_timeout_falls_back() {
        let raster = two_tone();
        let swatches = extract_palette(&raster, 6, Duration::ZERO);
        assert_eq!(swatches, compute_palette(&raster, 6));
    }
}
