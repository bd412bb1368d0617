//! Palette-to-seed mapping
//!
//! Each swatch becomes one digit: six hue buckets times a brightness flag,
//! folded into 0-9.

use serde::{Deserialize, Serialize};

use super::Swatch;
use crate::preprocess::clamp_brightness_tweak;

const HUE_BUCKET_COUNT: u32 = 6;

/// Digits derived from a palette plus one legend line per digit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaletteSeed {
    pub seed: String,
    pub legend: Vec<String>,
}

/// Map swatches, most prominent first, to at most `max_digits` digits
pub fn derive_seed_from_palette(swatches: &[Swatch], brightness_tweak: i32, max_digits: usize) -> PaletteSeed {
    let threshold = 50.0 + clamp_brightness_tweak(brightness_tweak) as f32;

    let mut sorted: Vec<&Swatch> = swatches.iter().collect();
    sorted.sort_by(|a, b| b.prominence.total_cmp(&a.prominence));

    let mut seed = String::new();
    let mut legend = Vec::new();

    for swatch in sorted.into_iter().take(max_digits) {
        let bucket = swatch_digit_bucket(swatch.hue);
        let high = swatch.lightness >= threshold;
        let digit = (bucket * 2 + high as u32) % 10;

        seed.push(char::from_digit(digit, 10).unwrap_or('0'));
        legend.push(format!(
            "{}: hue bucket {}, brightness {} -> {}",
            swatch.hex,
            bucket,
            if high { "high" } else { "low" },
            digit
        ));
    }

    PaletteSeed { seed, legend }
}

fn swatch_digit_bucket(hue: f32) -> u32 {
    let bucket = (hue.max(0.0) / (360.0 / HUE_BUCKET_COUNT as f32)).floor() as u32;
    bucket.min(HUE_BUCKET_COUNT - 1)
}
