//! Photo preprocessing
//!
//! Decodes the uploaded bytes, downscales to the OCR and palette working
//! sizes, applies the user's brightness tweak and binarizes the OCR copy.

pub mod binarize;

pub use binarize::binarize_for_ocr;

use image::DynamicImage;
use tracing::debug;

use crate::config::BinarizeSettings;
use crate::error::PipelineError;
use crate::raster::Raster;

/// Limit of the user-facing brightness slider
pub const MAX_BRIGHTNESS_TWEAK: i32 = 40;

/// Rasters derived from one photo
#[derive(Debug, Clone)]
pub struct PreparedPhoto {
    /// Binarized OCR working copy
    pub ocr: Raster,
    /// Brightness-adjusted palette working copy
    pub palette: Raster,
    /// Size of the decoded photo before downscaling
    pub source_dimensions: (u32, u32),
}

/// Clamp a brightness tweak to the slider range
pub fn clamp_brightness_tweak(tweak: i32) -> i32 {
    tweak.clamp(-MAX_BRIGHTNESS_TWEAK, MAX_BRIGHTNESS_TWEAK)
}

/// Shift RGB channels by twice the clamped tweak (alpha unchanged)
pub fn apply_brightness(raster: &Raster, tweak: i32) -> Raster {
    let delta = clamp_brightness_tweak(tweak) * 2;
    let mut out = raster.clone();
    if delta == 0 {
        return out;
    }

    for pixel in out.image_mut().pixels_mut() {
        for c in 0..3 {
            pixel.0[c] = (pixel.0[c] as i32 + delta).clamp(0, 255) as u8;
        }
    }
    out
}

/// Decode photo bytes, rejecting anything not declared as an image
pub fn decode_photo(bytes: &[u8], mime_type: &str) -> Result<DynamicImage, PipelineError> {
    if !mime_type.trim().to_ascii_lowercase().starts_with("image/") {
        return Err(PipelineError::UnsupportedMedia(mime_type.to_string()));
    }

    image::load_from_memory(bytes).map_err(|e| PipelineError::Decode(e.to_string()))
}

/// Decode and prepare both working copies of a photo
pub fn prepare_photo(
    bytes: &[u8],
    mime_type: &str,
    brightness_tweak: i32,
    settings: &BinarizeSettings,
    ocr_max_dimension: u32,
    palette_max_dimension: u32,
) -> Result<PreparedPhoto, PipelineError> {
    let decoded = decode_photo(bytes, mime_type)?;
    let source = Raster::from_dynamic(&decoded);
    let source_dimensions = source.dimensions();
    if source_dimensions.0 == 0 || source_dimensions.1 == 0 {
        return Err(PipelineError::Decode("image has no pixels".to_string()));
    }

    let brightened = apply_brightness(&source.fit_within(ocr_max_dimension), brightness_tweak);
    let ocr = binarize_for_ocr(&brightened, brightness_tweak, settings);
    let palette = apply_brightness(&source.fit_within(palette_max_dimension), brightness_tweak);

    debug!(
        "Prepared photo {}x{}: OCR raster {}x{}, palette raster {}x{}",
        source_dimensions.0,
        source_dimensions.1,
        ocr.width(),
        ocr.height(),
        palette.width(),
        palette.height()
    );

    Ok(PreparedPhoto {
        ocr,
        palette,
        source_dimensions,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageFormat, RgbaImage};
    use std::io::Cursor;

    pub(crate) fn encode_png(image: RgbaImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_clamp_brightness_tweak() {
        assert_eq!(clamp_brightness_tweak(0), 0);
        assert_eq!(clamp_brightness_tweak(55), 40);
        assert_eq!(clamp_brightness_tweak(-99), -40);
        assert_eq!(clamp_brightness_tweak(-12), -12);
    }

    #[test]
    fn test_apply_brightness_clamps_channels() {
        let raster = Raster::filled(2, 2, [10, 128, 250, 77]);
        let brighter = apply_brightness(&raster, 10);
        assert_eq!(brighter.image().get_pixel(0, 0).0, [30, 148, 255, 77]);

        let darker = apply_brightness(&raster, -100);
        assert_eq!(darker.image().get_pixel(1, 1).0, [0, 48, 170, 77]);
    }

    #[test]
    fn test_decode_rejects_non_image_mime() {
        let err = decode_photo(b"hello", "text/plain").unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedMedia(_)));
    }

    #[test]
    fn test_decode_reports_corrupt_bytes() {
        let err = decode_photo(b"definitely not a png", "image/png").unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)));
    }

    #[test]
    fn test_prepare_photo_downscales_both_copies() {
        let bytes = encode_png(RgbaImage::from_pixel(2000, 1000, image::Rgba([200, 200, 200, 255])));
        let prepared =
            prepare_photo(&bytes, "image/png", 0, &BinarizeSettings::default(), 1024, 512).unwrap();

        assert_eq!(prepared.source_dimensions, (2000, 1000));
        assert_eq!(prepared.ocr.dimensions(), (1024, 512));
        assert_eq!(prepared.palette.dimensions(), (512, 256));
    }

    #[test]
    fn test_prepare_photo_keeps_small_images() {
        let bytes = encode_png(RgbaImage::from_pixel(40, 30, image::Rgba([90, 20, 200, 255])));
        let prepared =
            prepare_photo(&bytes, "image/png", 5, &BinarizeSettings::default(), 1024, 512).unwrap();

        assert_eq!(prepared.ocr.dimensions(), (40, 30));
        assert_eq!(prepared.palette.image().get_pixel(0, 0).0, [100, 30, 210, 255]);
    }
}
