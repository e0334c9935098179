//! In-process image shrinking, run inside the resample worker.

use crate::config::ResampleAlgorithm;
use crate::error::{PipelineError, Result};
use crate::raster::{ColorMode, MaxBounds, RawImageBuffer};
use fast_image_resize::{self as fir, FilterType, MulDiv, PixelType, ResizeAlg, ResizeOptions};
use std::path::Path;

fn resize_alg(algorithm: ResampleAlgorithm) -> ResizeAlg {
    match algorithm {
        ResampleAlgorithm::Nearest => ResizeAlg::Nearest,
        ResampleAlgorithm::Box => ResizeAlg::Convolution(FilterType::Box),
        ResampleAlgorithm::Bilinear => ResizeAlg::Convolution(FilterType::Bilinear),
        ResampleAlgorithm::Hamming => ResizeAlg::Convolution(FilterType::Hamming),
        ResampleAlgorithm::Bicubic => ResizeAlg::Convolution(FilterType::CatmullRom),
        ResampleAlgorithm::Lanczos => ResizeAlg::Convolution(FilterType::Lanczos3),
    }
}

fn pixel_type(mode: ColorMode) -> PixelType {
    match mode {
        ColorMode::L | ColorMode::P => PixelType::U8,
        ColorMode::La | ColorMode::Pa => PixelType::U8x2,
        ColorMode::Rgb => PixelType::U8x3,
        ColorMode::Rgba => PixelType::U8x4,
    }
}

fn has_alpha(mode: ColorMode) -> bool {
    matches!(mode, ColorMode::La | ColorMode::Rgba)
}

/// Shrink `image` to fit inside `bounds`, keeping its aspect ratio.
///
/// Indexed images are expanded to RGBA first. Images already inside the
/// bounds are returned unchanged (never enlarged).
pub fn thumbnail(
    image: RawImageBuffer,
    bounds: MaxBounds,
    algorithm: ResampleAlgorithm,
) -> Result<RawImageBuffer> {
    let image = image.depalette();
    let (width, height) = image.dimensions();
    let (dst_width, dst_height) = bounds.fit_within(width, height);
    if (dst_width, dst_height) == (width, height) {
        return Ok(image);
    }

    let mode = image.mode();
    let pixel_type = pixel_type(mode);
    let mut src = fir::images::Image::from_vec_u8(width, height, image.into_pixels(), pixel_type)
        .map_err(|e| PipelineError::ResampleFailed(format!("source image: {e:?}")))?;
    let mut dst = fir::images::Image::new(dst_width, dst_height, pixel_type);

    // Convolution filters bleed colour out of transparent pixels unless
    // alpha is premultiplied.
    let premultiply = has_alpha(mode) && algorithm != ResampleAlgorithm::Nearest;
    let mul_div = MulDiv::default();
    if premultiply {
        mul_div
            .multiply_alpha_inplace(&mut src)
            .map_err(|e| PipelineError::ResampleFailed(format!("premultiply alpha: {e}")))?;
    }

    let options = ResizeOptions::new().resize_alg(resize_alg(algorithm));
    fir::Resizer::new()
        .resize(&src, &mut dst, &options)
        .map_err(|e| PipelineError::ResampleFailed(format!("{e:?}")))?;

    if premultiply {
        mul_div
            .divide_alpha_inplace(&mut dst)
            .map_err(|e| PipelineError::ResampleFailed(format!("unpremultiply alpha: {e}")))?;
    }

    RawImageBuffer::new(dst.into_vec(), mode, dst_width, dst_height)
}

/// Open and decode an image file.
pub fn decode_file(path: &Path) -> Result<RawImageBuffer> {
    let image = image::open(path).map_err(|e| PipelineError::ImageDecode {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(RawImageBuffer::from_dynamic(image))
}
