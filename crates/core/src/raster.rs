//! Self-contained raster buffers that cross process boundaries.

use crate::error::{PipelineError, Result};
use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// Pixel layout of a [`RawImageBuffer`]. Every layout is 8 bits per sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorMode {
    /// Grayscale.
    L,
    /// Grayscale with alpha.
    La,
    Rgb,
    Rgba,
    /// Palette indices.
    P,
    /// Palette indices with alpha.
    Pa,
}

impl ColorMode {
    /// Bytes per pixel.
    pub fn channels(self) -> usize {
        match self {
            ColorMode::L | ColorMode::P => 1,
            ColorMode::La | ColorMode::Pa => 2,
            ColorMode::Rgb => 3,
            ColorMode::Rgba => 4,
        }
    }

    pub fn is_indexed(self) -> bool {
        matches!(self, ColorMode::P | ColorMode::Pa)
    }
}

/// Raw pixels plus their shape. Never a live handle.
#[derive(Clone, PartialEq, Eq)]
pub struct RawImageBuffer {
    pixels: Vec<u8>,
    mode: ColorMode,
    width: u32,
    height: u32,
    /// RGBA palette entries, only present for indexed layouts.
    palette: Option<Vec<[u8; 4]>>,
}

impl std::fmt::Debug for RawImageBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawImageBuffer")
            .field("mode", &self.mode)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .field("palette", &self.palette.as_ref().map(Vec::len))
            .finish()
    }
}

impl RawImageBuffer {
    /// Build a direct-color buffer, checking that the byte count matches the shape.
    pub fn new(pixels: Vec<u8>, mode: ColorMode, width: u32, height: u32) -> Result<Self> {
        if mode.is_indexed() {
            return Err(PipelineError::InvalidImage(format!(
                "{:?} needs a palette, use RawImageBuffer::indexed",
                mode
            )));
        }
        Self::checked(pixels, mode, width, height, None)
    }

    /// Build an indexed buffer. Every index must be inside the palette.
    pub fn indexed(
        pixels: Vec<u8>,
        mode: ColorMode,
        width: u32,
        height: u32,
        palette: Vec<[u8; 4]>,
    ) -> Result<Self> {
        if !mode.is_indexed() {
            return Err(PipelineError::InvalidImage(format!(
                "{:?} is not an indexed layout",
                mode
            )));
        }
        let stride = mode.channels();
        if let Some(bad) = pixels
            .iter()
            .step_by(stride)
            .find(|&&index| index as usize >= palette.len())
        {
            return Err(PipelineError::InvalidImage(format!(
                "palette index {} out of range for {} entries",
                bad,
                palette.len()
            )));
        }
        Self::checked(pixels, mode, width, height, Some(palette))
    }

    fn checked(
        pixels: Vec<u8>,
        mode: ColorMode,
        width: u32,
        height: u32,
        palette: Option<Vec<[u8; 4]>>,
    ) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(mode.channels()))
            .ok_or_else(|| {
                PipelineError::InvalidImage(format!("{}x{} overflows", width, height))
            })?;
        if pixels.len() != expected {
            return Err(PipelineError::InvalidImage(format!(
                "expected {} bytes for {}x{} {:?}, got {}",
                expected,
                width,
                height,
                mode,
                pixels.len()
            )));
        }
        Ok(Self {
            pixels,
            mode,
            width,
            height,
            palette,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    pub fn mode(&self) -> ColorMode {
        self.mode
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn palette(&self) -> Option<&[[u8; 4]]> {
        self.palette.as_deref()
    }

    /// Expand indexed layouts to RGBA. Direct layouts are returned unchanged.
    pub fn depalette(self) -> Self {
        let Some(palette) = self.palette else {
            return self;
        };
        let has_alpha = self.mode == ColorMode::Pa;
        let stride = self.mode.channels();
        let mut rgba = Vec::with_capacity(self.width as usize * self.height as usize * 4);
        for px in self.pixels.chunks_exact(stride) {
            let [r, g, b, a] = palette[px[0] as usize];
            let alpha = if has_alpha {
                ((a as u16 * px[1] as u16) / 255) as u8
            } else {
                a
            };
            rgba.extend_from_slice(&[r, g, b, alpha]);
        }
        Self {
            pixels: rgba,
            mode: ColorMode::Rgba,
            width: self.width,
            height: self.height,
            palette: None,
        }
    }

    /// Convert a decoded image. Layouts deeper than 8 bits collapse to RGBA8.
    pub fn from_dynamic(image: DynamicImage) -> Self {
        let (width, height) = (image.width(), image.height());
        let (pixels, mode) = match image {
            DynamicImage::ImageLuma8(buf) => (buf.into_raw(), ColorMode::L),
            DynamicImage::ImageLumaA8(buf) => (buf.into_raw(), ColorMode::La),
            DynamicImage::ImageRgb8(buf) => (buf.into_raw(), ColorMode::Rgb),
            DynamicImage::ImageRgba8(buf) => (buf.into_raw(), ColorMode::Rgba),
            other => (other.into_rgba8().into_raw(), ColorMode::Rgba),
        };
        Self {
            pixels,
            mode,
            width,
            height,
            palette: None,
        }
    }

    /// Convert into an `image` crate buffer, expanding palettes first.
    pub fn into_dynamic(self) -> Result<DynamicImage> {
        let image = self.depalette();
        let (width, height, mode) = (image.width, image.height, image.mode);
        let pixels = image.pixels;
        let shape_error =
            || PipelineError::InvalidImage(format!("{}x{} {:?} buffer mismatch", width, height, mode));
        let dynamic = match mode {
            ColorMode::L => DynamicImage::ImageLuma8(
                image::GrayImage::from_raw(width, height, pixels).ok_or_else(shape_error)?,
            ),
            ColorMode::La => DynamicImage::ImageLumaA8(
                image::GrayAlphaImage::from_raw(width, height, pixels).ok_or_else(shape_error)?,
            ),
            ColorMode::Rgb => DynamicImage::ImageRgb8(
                image::RgbImage::from_raw(width, height, pixels).ok_or_else(shape_error)?,
            ),
            ColorMode::Rgba | ColorMode::P | ColorMode::Pa => DynamicImage::ImageRgba8(
                image::RgbaImage::from_raw(width, height, pixels).ok_or_else(shape_error)?,
            ),
        };
        Ok(dynamic)
    }
}

/// Box an image must fit inside after resampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaxBounds {
    pub width: u32,
    pub height: u32,
}

impl MaxBounds {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn contains(&self, width: u32, height: u32) -> bool {
        width <= self.width && height <= self.height
    }

    /// Largest size fitting inside the bounds with the source aspect ratio.
    ///
    /// Never enlarges, and never returns a zero side.
    pub fn fit_within(&self, width: u32, height: u32) -> (u32, u32) {
        if self.contains(width, height) || width == 0 || height == 0 {
            return (width, height);
        }
        let scale_w = self.width as f64 / width as f64;
        let scale_h = self.height as f64 / height as f64;
        if scale_w <= scale_h {
            let h = (height as f64 * scale_w).round() as u32;
            (self.width.max(1), h.clamp(1, self.height.max(1)))
        } else {
            let w = (width as f64 * scale_h).round() as u32;
            (w.clamp(1, self.width.max(1)), self.height.max(1))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ========== RawImageBuffer tests ==========

    #[test]
    fn test_new_validates_length() {
        assert!(RawImageBuffer::new(vec![0; 12], ColorMode::Rgb, 2, 2).is_ok());
        assert!(RawImageBuffer::new(vec![0; 11], ColorMode::Rgb, 2, 2).is_err());
        assert!(RawImageBuffer::new(vec![0; 8], ColorMode::La, 2, 2).is_ok());
    }

    #[test]
    fn test_new_rejects_indexed_without_palette() {
        let result = RawImageBuffer::new(vec![0; 4], ColorMode::P, 2, 2);
        assert!(matches!(result, Err(PipelineError::InvalidImage(_))));
    }

    #[test]
    fn test_indexed_rejects_out_of_range() {
        let palette = vec![[0, 0, 0, 255]];
        let result = RawImageBuffer::indexed(vec![0, 1], ColorMode::P, 2, 1, palette);
        assert!(result.is_err());
    }

    #[test]
    fn test_depalette_expands_to_rgba() {
        let palette = vec![[255, 0, 0, 255], [0, 0, 255, 128]];
        let image = RawImageBuffer::indexed(vec![0, 1, 1, 0], ColorMode::P, 2, 2, palette).unwrap();

        let rgba = image.depalette();
        assert_eq!(rgba.mode(), ColorMode::Rgba);
        assert_eq!(rgba.dimensions(), (2, 2));
        assert!(rgba.palette().is_none());
        assert_eq!(&rgba.pixels()[0..4], &[255, 0, 0, 255]);
        assert_eq!(&rgba.pixels()[4..8], &[0, 0, 255, 128]);
    }

    #[test]
    fn test_depalette_applies_pixel_alpha() {
        let palette = vec![[10, 20, 30, 255]];
        let image = RawImageBuffer::indexed(vec![0, 0], ColorMode::Pa, 1, 1, palette).unwrap();
        let rgba = image.depalette();
        assert_eq!(rgba.pixels(), &[10, 20, 30, 0]);
    }

    #[test]
    fn test_depalette_keeps_direct_layouts() {
        let image = RawImageBuffer::new(vec![7; 3], ColorMode::Rgb, 1, 1).unwrap();
        let same = image.clone().depalette();
        assert_eq!(same, image);
    }

    #[test]
    fn test_dynamic_round_trip_preserves_layout() {
        let image = RawImageBuffer::new(vec![1, 2, 3, 4, 5, 6, 7, 8], ColorMode::La, 2, 2).unwrap();
        let back = RawImageBuffer::from_dynamic(image.clone().into_dynamic().unwrap());
        assert_eq!(back, image);
    }

    #[test]
    fn test_from_dynamic_collapses_deep_layouts() {
        let deep = DynamicImage::new_rgb16(3, 2);
        let image = RawImageBuffer::from_dynamic(deep);
        assert_eq!(image.mode(), ColorMode::Rgba);
        assert_eq!(image.pixels().len(), 3 * 2 * 4);
    }

    // ========== MaxBounds tests ==========

    #[test]
    fn test_fit_within_leaves_small_images() {
        let bounds = MaxBounds::new(100, 100);
        assert_eq!(bounds.fit_within(50, 80), (50, 80));
        assert_eq!(bounds.fit_within(100, 100), (100, 100));
    }

    #[test]
    fn test_fit_within_preserves_aspect() {
        let bounds = MaxBounds::new(100, 100);
        assert_eq!(bounds.fit_within(400, 200), (100, 50));
        assert_eq!(bounds.fit_within(200, 400), (50, 100));
    }

    #[test]
    fn test_fit_within_never_zero() {
        let bounds = MaxBounds::new(10, 10);
        assert_eq!(bounds.fit_within(10_000, 1), (10, 1));
        assert_eq!(bounds.fit_within(1, 10_000), (1, 10));
    }
}
