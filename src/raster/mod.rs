//! Raster utilities
//!
//! An owned RGBA pixel buffer with the crop/scale/invert/color operations
//! the preprocessor, the variant builders and the engines share. Every
//! transformation returns a new raster; only [`Raster::invert_in_place`]
//! mutates.

use image::{imageops, imageops::FilterType, DynamicImage, GrayImage, Luma, Rgba, RgbaImage};

/// Pixels with alpha below this are ignored by all statistics
pub const ALPHA_CUTOFF: u8 = 32;
/// Channel value under which a binarized pixel counts as dark
pub const DARK_LEVEL: u8 = 64;

/// Perceptual brightness (Rec. 709 weights)
#[inline]
pub fn luma(r: u8, g: u8, b: u8) -> f32 {
    0.2126 * r as f32 + 0.7152 * g as f32 + 0.0722 * b as f32
}

/// Luma rounded into a 256-bin histogram index
#[inline]
pub fn luma_bin(r: u8, g: u8, b: u8) -> usize {
    luma(r, g, b).round().clamp(0.0, 255.0) as usize
}

/// Scale `width x height` so the larger side fits `max_dimension`, never upscaling
pub fn scaled_dimensions(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width.max(1), height.max(1));
    }
    let scale = (max_dimension as f32 / width.max(height) as f32).min(1.0);
    (
        ((width as f32 * scale).round() as u32).max(1),
        ((height as f32 * scale).round() as u32).max(1),
    )
}

/// Owned RGBA raster
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    image: RgbaImage,
}

impl Raster {
    /// Wrap an RGBA image
    pub fn from_image(image: RgbaImage) -> Self {
        Self { image }
    }

    /// Convert any decoded image to RGBA
    pub fn from_dynamic(image: &DynamicImage) -> Self {
        Self {
            image: image.to_rgba8(),
        }
    }

    /// Create a raster filled with a single color
    pub fn filled(width: u32, height: u32, color: [u8; 4]) -> Self {
        Self {
            image: RgbaImage::from_pixel(width, height, Rgba(color)),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Get raster dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbaImage {
        &mut self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    /// Whether the binarized pixel at (x, y) is dark
    pub fn is_dark_at(&self, x: u32, y: u32) -> bool {
        self.image.get_pixel(x, y).0[0] < DARK_LEVEL
    }

    /// Crop a region, clamped to the raster bounds.
    ///
    /// Returns `None` when the clamped region covers the whole raster, so
    /// callers can tell a real crop from a no-op.
    pub fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> Option<Raster> {
        let (img_w, img_h) = self.dimensions();
        let x = x.min(img_w.saturating_sub(1));
        let y = y.min(img_h.saturating_sub(1));
        let width = width.min(img_w - x).max(1);
        let height = height.min(img_h - y).max(1);

        if width >= img_w && height >= img_h {
            return None;
        }

        Some(Self {
            image: imageops::crop_imm(&self.image, x, y, width, height).to_image(),
        })
    }

    /// Resize with bilinear filtering
    pub fn resize(&self, width: u32, height: u32) -> Raster {
        Self {
            image: imageops::resize(&self.image, width.max(1), height.max(1), FilterType::Triangle),
        }
    }

    /// Resize without smoothing (keeps binarized edges hard)
    pub fn resize_nearest(&self, width: u32, height: u32) -> Raster {
        Self {
            image: imageops::resize(&self.image, width.max(1), height.max(1), FilterType::Nearest),
        }
    }

    /// Downscale so the larger side is at most `max_dimension`
    pub fn fit_within(&self, max_dimension: u32) -> Raster {
        let (width, height) = scaled_dimensions(self.width(), self.height(), max_dimension);
        if (width, height) == self.dimensions() {
            return self.clone();
        }
        self.resize(width, height)
    }

    /// Nearest-neighbor upscale by `factor`, bounded so the larger side stays within `max_dimension`.
    ///
    /// Returns `None` when the effective scale would not enlarge the raster.
    pub fn scale_by(&self, factor: f32, max_dimension: u32) -> Option<Raster> {
        if factor <= 1.0 {
            return None;
        }
        let long_edge = self.width().max(self.height()).max(1) as f32;
        let scale = factor.min(max_dimension as f32 / long_edge);
        if !scale.is_finite() || scale <= 1.0 {
            return None;
        }
        let width = ((self.width() as f32 * scale).round() as u32).max(1);
        let height = ((self.height() as f32 * scale).round() as u32).max(1);
        Some(self.resize_nearest(width, height))
    }

    /// Inverted copy (alpha unchanged)
    pub fn inverted(&self) -> Raster {
        let mut copy = self.clone();
        copy.invert_in_place();
        copy
    }

    /// Invert RGB channels in place (alpha unchanged)
    pub fn invert_in_place(&mut self) {
        for pixel in self.image.pixels_mut() {
            pixel.0[0] = 255 - pixel.0[0];
            pixel.0[1] = 255 - pixel.0[1];
            pixel.0[2] = 255 - pixel.0[2];
        }
    }

    /// Unsharp mask: `original + amount * (original - blurred)`, alpha unchanged
    pub fn unsharp_mask(&self, sigma: f32, amount: f32) -> Raster {
        let blurred = imageproc::filter::gaussian_blur_f32(&self.image, sigma);
        let mut out = self.image.clone();

        for (dst, (src, blur)) in out
            .pixels_mut()
            .zip(self.image.pixels().zip(blurred.pixels()))
        {
            for c in 0..3 {
                let original = src.0[c] as f32;
                let detail = original - blur.0[c] as f32;
                dst.0[c] = (original + amount * detail).round().clamp(0.0, 255.0) as u8;
            }
        }

        Self { image: out }
    }

    /// Foreground mask: 255 where an opaque pixel's luma is under `level`, 0 elsewhere
    pub fn dark_mask(&self, level: u8) -> GrayImage {
        let mut mask = GrayImage::new(self.width(), self.height());
        for (x, y, pixel) in self.image.enumerate_pixels() {
            let [r, g, b, a] = pixel.0;
            if a >= ALPHA_CUTOFF && luma(r, g, b) < level as f32 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        mask
    }
}
