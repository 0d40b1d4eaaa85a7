//! Decoding of single `RT_ICON` images into RGBA bitmaps.
//!
//! An icon image is either a complete PNG stream (Vista-style jumbo icons)
//! or a headerless DIB: a `BITMAPINFOHEADER` with doubled height, an
//! optional palette, the XOR color plane and a 1-bpp AND transparency mask.

use crate::error::{AppCtrlError, Result};
use image::{ImageFormat, RgbaImage};
use std::io::Cursor;
use std::path::Path;

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";
const BI_RGB: u32 = 0;
const BI_BITFIELDS: u32 = 3;

/// Whether the resource holds a PNG stream rather than a DIB.
pub fn is_png(data: &[u8]) -> bool {
    data.starts_with(PNG_SIGNATURE)
}

/// Pixel dimensions declared by an icon image, without decoding it.
pub fn dimensions(data: &[u8]) -> Option<(u32, u32)> {
    if is_png(data) {
        // IHDR is always the first chunk.
        let w = u32::from_be_bytes(data.get(16..20)?.try_into().ok()?);
        let h = u32::from_be_bytes(data.get(20..24)?.try_into().ok()?);
        return Some((w, h));
    }
    let w = i32::from_le_bytes(data.get(4..8)?.try_into().ok()?);
    let h = i32::from_le_bytes(data.get(8..12)?.try_into().ok()?);
    Some((w.unsigned_abs(), h.unsigned_abs() / 2))
}

/// Decode one icon image.
pub fn decode_icon(data: &[u8], path: &Path) -> Result<RgbaImage> {
    let invalid = |message: String| AppCtrlError::InvalidIcon {
        path: path.to_path_buf(),
        message,
    };

    if is_png(data) {
        return image::load_from_memory_with_format(data, ImageFormat::Png)
            .map(|img| img.to_rgba8())
            .map_err(|e| invalid(format!("bad PNG icon: {e}")));
    }

    decode_dib(data).map_err(invalid)
}

/// Encode a bitmap as a PNG stream.
pub fn encode_png(image: &RgbaImage, path: &Path) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|e| AppCtrlError::InvalidIcon {
            path: path.to_path_buf(),
            message: format!("PNG encoding failed: {e}"),
        })?;
    Ok(out.into_inner())
}

fn read_u16(data: &[u8], at: usize) -> std::result::Result<u16, String> {
    data.get(at..at + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| format!("DIB truncated at {at}"))
}

fn read_u32(data: &[u8], at: usize) -> std::result::Result<u32, String> {
    data.get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| format!("DIB truncated at {at}"))
}

fn stride(width: usize, bits: usize) -> usize {
    (width * bits).div_ceil(32) * 4
}

fn decode_dib(data: &[u8]) -> std::result::Result<RgbaImage, String> {
    let header_size = read_u32(data, 0)? as usize;
    if header_size < 40 {
        return Err(format!("unsupported DIB header size {header_size}"));
    }
    let raw_width = read_u32(data, 4)? as i32;
    let raw_height = read_u32(data, 8)? as i32;
    let bit_count = read_u16(data, 14)? as usize;
    let compression = read_u32(data, 16)?;
    let colors_used = read_u32(data, 32)? as usize;

    let width = raw_width.unsigned_abs() as usize;
    let height = (raw_height.unsigned_abs() / 2) as usize;
    let top_down = raw_height < 0;
    if width == 0 || height == 0 || width > 1024 || height > 1024 {
        return Err(format!("implausible icon size {width}x{height}"));
    }
    match (compression, bit_count) {
        (BI_RGB, 1 | 4 | 8 | 24 | 32) | (BI_BITFIELDS, 32) => {}
        _ => return Err(format!("unsupported DIB format {bit_count}bpp/{compression}")),
    }

    let palette_len = if bit_count <= 8 {
        if colors_used == 0 {
            1 << bit_count
        } else {
            colors_used.min(256)
        }
    } else {
        0
    };
    // BI_BITFIELDS carries three color masks after the header.
    let masks_len = if compression == BI_BITFIELDS && header_size == 40 { 12 } else { 0 };
    let palette_at = header_size + masks_len;
    let palette = data
        .get(palette_at..palette_at + palette_len * 4)
        .ok_or("DIB palette truncated")?;

    let xor_at = palette_at + palette_len * 4;
    let xor_stride = stride(width, bit_count);
    let and_at = xor_at + xor_stride * height;
    let and_stride = stride(width, 1);
    let xor = data
        .get(xor_at..and_at)
        .ok_or("DIB color plane truncated")?;
    // Some 32-bpp icons omit the mask entirely.
    let and = data.get(and_at..and_at + and_stride * height);

    let mut rgba = vec![0u8; width * height * 4];
    let mut any_alpha = false;

    for row in 0..height {
        let src_row = if top_down { row } else { height - 1 - row };
        let line = &xor[src_row * xor_stride..(src_row + 1) * xor_stride];

        for x in 0..width {
            let [r, g, b, a] = match bit_count {
                32 => [line[x * 4 + 2], line[x * 4 + 1], line[x * 4], line[x * 4 + 3]],
                24 => [line[x * 3 + 2], line[x * 3 + 1], line[x * 3], 255],
                _ => {
                    let per_byte = 8 / bit_count;
                    let byte = line[x / per_byte];
                    let shift = 8 - bit_count * (x % per_byte + 1);
                    let index = ((byte >> shift) as usize) & ((1 << bit_count) - 1);
                    match palette.get(index * 4..index * 4 + 3) {
                        Some(c) => [c[2], c[1], c[0], 255],
                        None => [0, 0, 0, 255],
                    }
                }
            };
            if bit_count == 32 && a != 0 {
                any_alpha = true;
            }
            let at = (row * width + x) * 4;
            rgba[at..at + 4].copy_from_slice(&[r, g, b, a]);
        }
    }

    // Without a real alpha channel the AND mask decides transparency.
    if bit_count < 32 || !any_alpha {
        for row in 0..height {
            let src_row = if top_down { row } else { height - 1 - row };
            for x in 0..width {
                let transparent = and.is_some_and(|mask| {
                    let byte = mask[src_row * and_stride + x / 8];
                    byte & (0x80 >> (x % 8)) != 0
                });
                rgba[(row * width + x) * 4 + 3] = if transparent { 0 } else { 255 };
            }
        }
    }

    RgbaImage::from_raw(width as u32, height as u32, rgba)
        .ok_or_else(|| "pixel buffer size mismatch".to_string())
}
