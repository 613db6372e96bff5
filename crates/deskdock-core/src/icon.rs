//! LVGL icon encoding
//!
//! Device icons are stored as LVGL true-color images: a 9-byte header (`"LVGL"`,
//! little-endian u16 width, u16 height, u8 color format) followed by one little-endian
//! RGB565 word per pixel in row-major order.
//!
//! The same image is also written as an 8-bit RGB PNG preview for desktop-side UIs.

use flate2::{write::ZlibEncoder, Compression};
use std::io::{self, Write};

use crate::errors::ProtocolError;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

pub const LVGL_MAGIC: &[u8; 4] = b"LVGL";

/// `LV_IMG_CF_TRUE_COLOR` (RGB565)
pub const LV_IMG_CF_TRUE_COLOR: u8 = 0x02;

pub const HEADER_LEN: usize = 9;

pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

// ----------------------------------------------------------------------------
// Image Types
// ----------------------------------------------------------------------------

/// Decoded RGB image handed over by an icon extractor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IconImage {
    pub width: u16,
    pub height: u16,
    /// Row-major RGB triplets, `width * height` entries
    pub pixels: Vec<[u8; 3]>,
}

impl IconImage {
    /// Image filled with one color
    pub fn solid(width: u16, height: u16, rgb: [u8; 3]) -> Self {
        Self {
            width,
            height,
            pixels: vec![rgb; usize::from(width) * usize::from(height)],
        }
    }

    /// Whether the pixel buffer matches the declared dimensions
    pub fn is_consistent(&self) -> bool {
        self.pixels.len() == usize::from(self.width) * usize::from(self.height)
    }
}

/// Parsed header of an encoded icon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IconHeader {
    pub width: u16,
    pub height: u16,
    pub color_format: u8,
}

impl IconHeader {
    /// Parse the header of a complete encoded icon.
    ///
    /// The blob must be exactly as long as the header says.
    pub fn parse(blob: &[u8]) -> Result<Self, ProtocolError> {
        if blob.len() < HEADER_LEN {
            return Err(ProtocolError::InvalidIconHeader {
                reason: format!("{} bytes is shorter than the header", blob.len()),
            });
        }
        if &blob[..4] != LVGL_MAGIC {
            return Err(ProtocolError::InvalidIconHeader {
                reason: "missing LVGL magic".to_string(),
            });
        }
        let header = Self {
            width: u16::from_le_bytes([blob[4], blob[5]]),
            height: u16::from_le_bytes([blob[6], blob[7]]),
            color_format: blob[8],
        };
        if blob.len() != header.encoded_len() {
            return Err(ProtocolError::InvalidIconHeader {
                reason: format!(
                    "{}x{} icon needs {} bytes, got {}",
                    header.width,
                    header.height,
                    header.encoded_len(),
                    blob.len()
                ),
            });
        }
        Ok(header)
    }

    /// Expected total blob length for RGB565 data
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + usize::from(self.width) * usize::from(self.height) * 2
    }
}

// ----------------------------------------------------------------------------
// Encoding
// ----------------------------------------------------------------------------

/// Pack an RGB888 pixel into RGB565
pub fn rgb565(rgb: [u8; 3]) -> u16 {
    let [r, g, b] = rgb;
    (u16::from(r & 0xF8) << 8) | (u16::from(g & 0xFC) << 3) | u16::from(b >> 3)
}

/// Encode an image as an LVGL true-color blob
pub fn encode_icon(image: &IconImage) -> Vec<u8> {
    let mut blob = Vec::with_capacity(HEADER_LEN + image.pixels.len() * 2);
    blob.extend_from_slice(LVGL_MAGIC);
    blob.extend_from_slice(&image.width.to_le_bytes());
    blob.extend_from_slice(&image.height.to_le_bytes());
    blob.push(LV_IMG_CF_TRUE_COLOR);
    for pixel in &image.pixels {
        blob.extend_from_slice(&rgb565(*pixel).to_le_bytes());
    }
    blob
}

// ----------------------------------------------------------------------------
// PNG Preview
// ----------------------------------------------------------------------------

/// Encode an image as an 8-bit truecolor PNG without filtering or interlacing
pub fn encode_png(image: &IconImage) -> io::Result<Vec<u8>> {
    if image.width == 0 || image.height == 0 || !image.is_consistent() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "cannot encode {} pixels as a {}x{} PNG",
                image.pixels.len(),
                image.width,
                image.height
            ),
        ));
    }

    let mut ihdr = Vec::with_capacity(13);
    ihdr.extend_from_slice(&u32::from(image.width).to_be_bytes());
    ihdr.extend_from_slice(&u32::from(image.height).to_be_bytes());
    // bit depth 8, color type 2 (RGB), deflate, adaptive filtering, no interlace
    ihdr.extend_from_slice(&[8, 2, 0, 0, 0]);

    let width = usize::from(image.width);
    let mut scanlines = Vec::with_capacity((width * 3 + 1) * usize::from(image.height));
    for row in image.pixels.chunks(width) {
        scanlines.push(0);
        for pixel in row {
            scanlines.extend_from_slice(pixel);
        }
    }
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&scanlines)?;
    let idat = encoder.finish()?;

    let mut png = Vec::with_capacity(PNG_SIGNATURE.len() + idat.len() + 3 * 12 + 13);
    png.extend_from_slice(&PNG_SIGNATURE);
    push_png_chunk(&mut png, b"IHDR", &ihdr);
    push_png_chunk(&mut png, b"IDAT", &idat);
    push_png_chunk(&mut png, b"IEND", &[]);
    Ok(png)
}

fn push_png_chunk(png: &mut Vec<u8>, kind: &[u8; 4], data: &[u8]) {
    png.extend_from_slice(&(data.len() as u32).to_be_bytes());
    png.extend_from_slice(kind);
    png.extend_from_slice(data);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(kind);
    hasher.update(data);
    png.extend_from_slice(&hasher.finalize().to_be_bytes());
}
