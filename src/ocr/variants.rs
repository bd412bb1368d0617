//! Image variants and grid regions for the OCR cascade
//!
//! Each builder returns `None` when it would reproduce its input, so variant
//! lists never carry duplicates.

use crate::config::CascadeSettings;
use crate::raster::Raster;

/// Fraction of dark pixels that makes a row part of a bottom band
const BAND_ROW_DARK_RATIO: f32 = 0.75;
/// Long-edge bound for the upscaled trained variant
pub const UPSCALE_MAX_DIMENSION: u32 = 1800;
/// Center-crop ratio for both axes
pub const CENTER_CROP_RATIO: f32 = 0.86;

/// A raster plus the confidence bonus its candidates earn
#[derive(Debug, Clone)]
pub struct Variant {
    pub label: &'static str,
    pub raster: Raster,
    pub confidence_adjust: f32,
}

impl Variant {
    fn new(label: &'static str, raster: Raster, confidence_adjust: f32) -> Self {
        Self {
            label,
            raster,
            confidence_adjust,
        }
    }
}

/// A rectangle of the OCR raster swept in the grid pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

fn dark_count_row(raster: &Raster, y: u32) -> u32 {
    (0..raster.width()).filter(|&x| raster.is_dark_at(x, y)).count() as u32
}

/// Remove a solid dark band along the bottom edge (table borders, shadows)
pub fn trim_bottom_band(raster: &Raster) -> Option<Raster> {
    let (width, height) = raster.dimensions();
    if width < 8 || height < 8 {
        return None;
    }

    let mut band = 0u32;
    for y in (0..height).rev() {
        let ratio = dark_count_row(raster, y) as f32 / width as f32;
        if ratio >= BAND_ROW_DARK_RATIO {
            band += 1;
            continue;
        }
        if band > 0 {
            break;
        }
    }

    let min_band = 6u32.max(height * 3 / 100);
    let max_band = min_band.max(height * 28 / 100);
    if band < min_band || band > max_band {
        return None;
    }

    raster.crop(0, 0, width, height - band)
}

/// Contiguous run of values at or above `threshold` with the largest sum
pub fn find_dominant_band(values: &[u32], threshold: u32) -> Option<(usize, usize)> {
    let mut best: Option<(usize, usize, u64)> = None;
    let mut run: Option<(usize, u64)> = None;

    for (i, &value) in values.iter().enumerate() {
        if value >= threshold {
            let (start, score) = run.unwrap_or((i, 0));
            run = Some((start, score + value as u64));
            continue;
        }
        if let Some((start, score)) = run.take() {
            if best.map_or(true, |(_, _, best_score)| score > best_score) {
                best = Some((start, i - 1, score));
            }
        }
    }
    if let Some((start, score)) = run {
        if best.map_or(true, |(_, _, best_score)| score > best_score) {
            best = Some((start, values.len() - 1, score));
        }
    }

    best.filter(|&(_, _, score)| score > 0).map(|(start, end, _)| (start, end))
}

/// Crop to the densest block of ink, padded
pub fn crop_dense_ink(raster: &Raster) -> Option<Raster> {
    let (width, height) = raster.dimensions();
    if width < 24 || height < 24 {
        return None;
    }

    let mut rows = vec![0u32; height as usize];
    let mut cols = vec![0u32; width as usize];
    for y in 0..height {
        for x in 0..width {
            if raster.is_dark_at(x, y) {
                rows[y as usize] += 1;
                cols[x as usize] += 1;
            }
        }
    }

    let row_threshold = 4u32.max(width * 12 / 1000);
    let col_threshold = 4u32.max(height * 12 / 1000);
    let (y_start, y_end) = find_dominant_band(&rows, row_threshold)?;
    let (x_start, x_end) = find_dominant_band(&cols, col_threshold)?;

    let band_width = (x_end - x_start + 1) as u32;
    let band_height = (y_end - y_start + 1) as u32;
    if band_width < width / 5 || band_height < height * 14 / 100 {
        return None;
    }

    let pad_x = 6u32.max(band_width * 8 / 100);
    let pad_y = 6u32.max(band_height / 10);
    let x = (x_start as u32).saturating_sub(pad_x);
    let y = (y_start as u32).saturating_sub(pad_y);
    let w = (width - x).min(band_width + pad_x * 2);
    let h = (height - y).min(band_height + pad_y * 2);

    raster.crop(x, y, w, h)
}

/// Centered crop keeping `ratio` of each side
pub fn crop_center(raster: &Raster, width_ratio: f32, height_ratio: f32) -> Option<Raster> {
    let (width, height) = raster.dimensions();
    if width < 16 || height < 16 {
        return None;
    }

    let target_w = 8u32.max((width as f32 * width_ratio).floor() as u32);
    let target_h = 8u32.max((height as f32 * height_ratio).floor() as u32);
    if target_w >= width || target_h >= height {
        return None;
    }

    raster.crop((width - target_w) / 2, (height - target_h) / 2, target_w, target_h)
}

/// Variants for the structural detector
pub fn structural_variants(raster: &Raster) -> Vec<Variant> {
    let mut variants = vec![Variant::new("base", raster.clone(), 0.0)];

    let trimmed = trim_bottom_band(raster);
    if let Some(trimmed) = &trimmed {
        variants.push(Variant::new("trimmed-bottom", trimmed.clone(), 0.05));
    }

    if let Some(dense) = crop_dense_ink(trimmed.as_ref().unwrap_or(raster)) {
        if Some(&dense) != trimmed.as_ref() && dense != *raster {
            variants.push(Variant::new("dense-ink-crop", dense, 0.07));
        }
    }

    if let Some(centered) = crop_center(raster, CENTER_CROP_RATIO, CENTER_CROP_RATIO) {
        variants.push(Variant::new("center-crop", centered, 0.03));
    }

    variants
}

/// Variants for the trained recognizer; the larger ones only when the
/// stage budget can afford them
pub fn trained_variants(raster: &Raster, budget_ms: u64, settings: &CascadeSettings) -> Vec<Variant> {
    let mut variants = vec![Variant::new("base", raster.clone(), 0.0)];

    let trimmed = trim_bottom_band(raster);
    if let Some(trimmed) = &trimmed {
        variants.push(Variant::new("trimmed-bottom", trimmed.clone(), 0.06));
    }

    let primary_base = trimmed.as_ref().unwrap_or(raster);
    let dense = crop_dense_ink(primary_base);
    if let Some(dense) = &dense {
        variants.push(Variant::new("dense-ink-crop", dense.clone(), 0.08));
    }

    let primary = dense.as_ref().unwrap_or(primary_base);
    if budget_ms < settings.upscale_budget_ms {
        return variants;
    }

    if let Some(upscaled) = primary.scale_by(2.0, UPSCALE_MAX_DIMENSION) {
        variants.push(Variant::new("upscaled", upscaled.unsharp_mask(1.0, 1.0), 0.03));
        if budget_ms >= settings.invert_budget_ms {
            variants.push(Variant::new("inverted-upscaled", upscaled.inverted(), 0.01));
        }
    }

    variants
}

/// Overlapping grid cells plus the bottom half of the image
pub fn build_grid_regions(width: u32, height: u32, settings: &CascadeSettings) -> Vec<GridRegion> {
    if width < 2 || height < 2 {
        return vec![GridRegion {
            x: 0,
            y: 0,
            width: width.max(1),
            height: height.max(1),
        }];
    }

    let columns = settings.grid_columns.max(1);
    let rows = settings.grid_rows.max(1);
    let cell_w = width as f32 / columns as f32;
    let cell_h = height as f32 / rows as f32;
    let overlap_x = cell_w * settings.grid_overlap;
    let overlap_y = cell_h * settings.grid_overlap;
    let mut regions = Vec::with_capacity((columns * rows + 1) as usize);

    for row in 0..rows {
        for col in 0..columns {
            let left_pad = if col > 0 { overlap_x / 2.0 } else { 0.0 };
            let right_pad = if col < columns - 1 { overlap_x / 2.0 } else { 0.0 };
            let top_pad = if row > 0 { overlap_y / 2.0 } else { 0.0 };
            let bottom_pad = if row < rows - 1 { overlap_y / 2.0 } else { 0.0 };

            let x0 = (col as f32 * cell_w - left_pad).floor().max(0.0) as u32;
            let y0 = (row as f32 * cell_h - top_pad).floor().max(0.0) as u32;
            let x1 = (((col + 1) as f32 * cell_w + right_pad).ceil() as u32).min(width);
            let y1 = (((row + 1) as f32 * cell_h + bottom_pad).ceil() as u32).min(height);

            regions.push(GridRegion {
                x: x0,
                y: y0,
                width: x1.saturating_sub(x0).max(1),
                height: y1.saturating_sub(y0).max(1),
            });
        }
    }

    let half = height / 2;
    regions.push(GridRegion {
        x: 0,
        y: half,
        width,
        height: (height - half).max(1),
    });

    regions
}

/// Crop a region and upscale it toward `max_dimension` (at most 3x)
pub fn crop_and_upscale_region(raster: &Raster, region: GridRegion, max_dimension: u32) -> Raster {
    let cropped = raster
        .crop(region.x, region.y, region.width, region.height)
        .unwrap_or_else(|| raster.clone());

    let long_edge = cropped.width().max(cropped.height()).max(1) as f32;
    let scale = (max_dimension as f32 / long_edge).clamp(1.0, 3.0);
    if scale <= 1.0 {
        return cropped;
    }

    let width = ((cropped.width() as f32 * scale).round() as u32).max(1);
    let height = ((cropped.height() as f32 * scale).round() as u32).max(1);
    cropped.resize(width, height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn raster_from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> bool) -> Raster {
        Raster::from_image(RgbaImage::from_fn(width, height, |x, y| {
            if f(x, y) {
                Rgba([0, 0, 0, 255])
            } else {
                Rgba([255, 255, 255, 255])
            }
        }))
    }

    #[test]
    fn test_trim_bottom_band() {
        // 10-row solid band at the bottom of a 100-row image
        let raster = raster_from_fn(60, 100, |_, y| y >= 90);
        let trimmed = trim_bottom_band(&raster).unwrap();
        assert_eq!(trimmed.dimensions(), (60, 90));
    }

    #[test]
    fn test_trim_bottom_band_rejects_thin_or_thick_bands() {
        let thin = raster_from_fn(60, 100, |_, y| y >= 97);
        assert!(trim_bottom_band(&thin).is_none());

        let thick = raster_from_fn(60, 100, |_, y| y >= 60);
        assert!(trim_bottom_band(&thick).is_none());

        assert!(trim_bottom_band(&raster_from_fn(7, 7, |_, _| true)).is_none());
    }

    #[test]
    fn test_find_dominant_band() {
        assert_eq!(find_dominant_band(&[0, 5, 6, 0, 9, 9, 9, 0], 4), Some((4, 6)));
        assert_eq!(find_dominant_band(&[0, 5, 5, 5], 4), Some((1, 3)));
        assert_eq!(find_dominant_band(&[1, 2, 3], 4), None);
        // Earlier run wins a tie
        assert_eq!(find_dominant_band(&[5, 5, 0, 10], 4), Some((0, 1)));
    }

    #[test]
    fn test_crop_dense_ink() {
        // Ink block 40x20 at (30, 40) in a 200x100 page
        let raster = raster_from_fn(200, 100, |x, y| (30..70).contains(&x) && (40..60).contains(&y));
        let cropped = crop_dense_ink(&raster).unwrap();
        // pad_x = max(6, 3) = 6, pad_y = max(6, 2) = 6
        assert_eq!(cropped.dimensions(), (52, 32));
        assert!(cropped.is_dark_at(6, 6));
        assert!(!cropped.is_dark_at(5, 5));
    }

    #[test]
    fn test_crop_dense_ink_requires_wide_band() {
        let raster = raster_from_fn(200, 100, |x, y| (30..40).contains(&x) && (40..60).contains(&y));
        assert!(crop_dense_ink(&raster).is_none());
    }

    #[test]
    fn test_crop_center() {
        let raster = raster_from_fn(100, 50, |_, _| false);
        let centered = crop_center(&raster, 0.86, 0.86).unwrap();
        assert_eq!(centered.dimensions(), (86, 43));
        assert!(crop_center(&raster_from_fn(15, 40, |_, _| false), 0.86, 0.86).is_none());
    }

    #[test]
    fn test_structural_variants_labels() {
        let raster = raster_from_fn(200, 100, |x, y| y >= 92 || ((30..70).contains(&x) && (20..50).contains(&y)));
        let labels: Vec<&str> = structural_variants(&raster).iter().map(|v| v.label).collect();
        assert_eq!(labels, vec!["base", "trimmed-bottom", "dense-ink-crop", "center-crop"]);

        let blank = raster_from_fn(10, 10, |_, _| false);
        assert_eq!(structural_variants(&blank).len(), 1);
    }

    #[test]
    fn test_trained_variants_depend_on_budget() {
        let raster = raster_from_fn(120, 60, |x, y| (20..90).contains(&x) && (20..40).contains(&y));
        let settings = CascadeSettings::default();

        let labels = |budget| -> Vec<&'static str> {
            trained_variants(&raster, budget, &settings).iter().map(|v| v.label).collect()
        };
        assert_eq!(labels(1200), vec!["base", "dense-ink-crop"]);
        assert_eq!(labels(2000), vec!["base", "dense-ink-crop", "upscaled"]);
        assert_eq!(labels(6000), vec!["base", "dense-ink-crop", "upscaled", "inverted-upscaled"]);
    }

    #[test]
    fn test_grid_regions() {
        let regions = build_grid_regions(300, 200, &CascadeSettings::default());
        assert_eq!(regions.len(), 7);
        // cell 100x100, overlap 20 -> 10 each side
        assert_eq!(regions[0], GridRegion { x: 0, y: 0, width: 110, height: 110 });
        assert_eq!(regions[1], GridRegion { x: 90, y: 0, width: 120, height: 110 });
        assert_eq!(regions[5], GridRegion { x: 190, y: 90, width: 110, height: 110 });
        assert_eq!(regions[6], GridRegion { x: 0, y: 100, width: 300, height: 100 });
    }

    #[test]
    fn test_grid_regions_degenerate() {
        let regions = build_grid_regions(1, 40, &CascadeSettings::default());
        assert_eq!(regions, vec![GridRegion { x: 0, y: 0, width: 1, height: 40 }]);
    }

    #[test]
    fn test_crop_and_upscale_region_is_bounded() {
        let raster = raster_from_fn(300, 200, |_, _| false);
        let region = GridRegion { x: 0, y: 0, width: 110, height: 110 };
        // 960 / 110 > 3, so the scale caps at 3
        assert_eq!(crop_and_upscale_region(&raster, region, 960).dimensions(), (330, 330));

        let large = raster_from_fn(1200, 100, |_, _| false);
        let wide = GridRegion { x: 0, y: 0, width: 1000, height: 50 };
        assert_eq!(crop_and_upscale_region(&large, wide, 960).dimensions(), (1000, 50));
    }
}
