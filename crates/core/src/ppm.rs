//! Demultiplexer for the concatenated binary PPM stream `pdftoppm` writes to stdout.
//!
//! Each embedded image is framed as
//!
//! ```text
//! P6\n<width> <height>\n<maxval>\n<width * height * 3 raw bytes>
//! ```
//!
//! with the next image starting on the byte right after the pixel data.

use crate::error::{PipelineError, Result};
use crate::raster::{ColorMode, RawImageBuffer};

/// Binary PPM magic.
const MAGIC: &[u8; 2] = b"P6";

/// Bytes searched for the three header lines of one image.
///
/// `pdftoppm` headers are at most ~25 bytes (`P6\n` + two 10-digit sizes +
/// `255\n`). 64 leaves room for any dimensions that fit in `u32`.
pub const HEADER_WINDOW: usize = 64;

/// Bytes shown in the dump attached to a [`PipelineError::MalformedStream`].
const DUMP_LEN: usize = 16;

/// Split a concatenated PPM stream into images, front to back.
///
/// An empty buffer is an empty list. Anything that is not a complete P6
/// frame at the current position fails with the byte offset of that frame.
pub fn parse_ppm_stream(data: &[u8]) -> Result<Vec<RawImageBuffer>> {
    let mut images = Vec::new();
    let mut offset = 0;

    while offset < data.len() {
        let (image, consumed) = parse_one(data, offset)?;
        images.push(image);
        offset += consumed;
    }

    Ok(images)
}

fn parse_one(data: &[u8], offset: usize) -> Result<(RawImageBuffer, usize)> {
    let rest = &data[offset..];
    if !rest.starts_with(MAGIC) {
        return Err(malformed(data, offset, "expected PPM magic 'P6'"));
    }

    let window = &rest[..rest.len().min(HEADER_WINDOW)];
    let mut lines = window.split(|&b| b == b'\n');
    let (Some(code), Some(size), Some(maxval)) = (lines.next(), lines.next(), lines.next()) else {
        return Err(malformed(data, offset, "incomplete header"));
    };
    let header_len = code.len() + size.len() + maxval.len() + 3;
    // The third line must itself be newline-terminated inside the window.
    if header_len > window.len() || code != MAGIC {
        return Err(malformed(data, offset, "incomplete header"));
    }

    let (width, height) =
        parse_size(size).ok_or_else(|| malformed(data, offset, "bad size line"))?;
    match parse_ascii_u32(maxval) {
        Some(1..=255) => {}
        _ => return Err(malformed(data, offset, "unsupported max sample value")),
    }

    let pixel_len = (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(3))
        .ok_or_else(|| malformed(data, offset, "image size overflows"))?;
    let frame_len = header_len + pixel_len;
    if rest.len() < frame_len {
        return Err(malformed(data, offset, "truncated pixel data"));
    }

    let pixels = rest[header_len..frame_len].to_vec();
    let image = RawImageBuffer::new(pixels, ColorMode::Rgb, width, height)?;
    Ok((image, frame_len))
}

fn parse_size(line: &[u8]) -> Option<(u32, u32)> {
    let mut parts = line
        .split(|b| b.is_ascii_whitespace())
        .filter(|part| !part.is_empty());
    let width = parse_ascii_u32(parts.next()?)?;
    let height = parse_ascii_u32(parts.next()?)?;
    if parts.next().is_some() {
        return None;
    }
    Some((width, height))
}

fn parse_ascii_u32(bytes: &[u8]) -> Option<u32> {
    std::str::from_utf8(bytes).ok()?.trim().parse().ok()
}

fn malformed(data: &[u8], offset: usize, reason: &str) -> PipelineError {
    PipelineError::MalformedStream {
        offset,
        dump: format!("{}: {}", reason, dump(&data[offset..])),
    }
}

/// Hex and printable-ASCII view of the first few bytes.
fn dump(bytes: &[u8]) -> String {
    let head = &bytes[..bytes.len().min(DUMP_LEN)];
    let hex = head
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ");
    let ascii: String = head
        .iter()
        .map(|&b| if b.is_ascii_graphic() { b as char } else { '.' })
        .collect();
    format!("[{}] |{}|", hex, ascii)
}

/// Append one RGB image to `out` in the same framing `pdftoppm` uses.
pub fn write_ppm(image: &RawImageBuffer, out: &mut Vec<u8>) -> Result<()> {
    if image.mode() != ColorMode::Rgb {
        return Err(PipelineError::InvalidImage(format!(
            "PPM frames carry RGB, got {:?}",
            image.mode()
        )));
    }
    out.extend_from_slice(format!("P6\n{} {}\n255\n", image.width(), image.height()).as_bytes());
    out.extend_from_slice(image.pixels());
    Ok(())
}
