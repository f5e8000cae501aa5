//! Image format detection, header-only dimension probing and content digests.
//!
//! Nothing in here decodes pixel data: formats are identified by their magic
//! bytes and dimensions are read from the fixed header fields of each format.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Image formats the extractor recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
    Bmp,
    WebP,
    /// Vector image, passed through as an opaque payload.
    Svg,
}

impl ImageFormat {
    /// Identify a raster image by its leading bytes.
    ///
    /// This is the signature table used for MOBI records, where anything that
    /// does not match is padding, a font or a resource record.
    pub fn sniff_raster(data: &[u8]) -> Option<Self> {
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(ImageFormat::Jpeg)
        } else if data.starts_with(b"\x89PNG\r\n\x1a\n") {
            Some(ImageFormat::Png)
        } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
            Some(ImageFormat::Gif)
        } else if data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
            Some(ImageFormat::WebP)
        } else if is_bmp(data) {
            Some(ImageFormat::Bmp)
        } else {
            None
        }
    }

    /// Identify any supported image, including SVG documents.
    pub fn sniff(data: &[u8]) -> Option<Self> {
        Self::sniff_raster(data).or_else(|| is_svg(data).then_some(ImageFormat::Svg))
    }

    /// Canonical file extension, without the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
            ImageFormat::Gif => "gif",
            ImageFormat::Bmp => "bmp",
            ImageFormat::WebP => "webp",
            ImageFormat::Svg => "svg",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Gif => "image/gif",
            ImageFormat::Bmp => "image/bmp",
            ImageFormat::WebP => "image/webp",
            ImageFormat::Svg => "image/svg+xml",
        }
    }
}

/// "BM" alone is too weak: compressed text records start with it often
/// enough. Require a known DIB header size as well.
fn is_bmp(data: &[u8]) -> bool {
    if data.len() < 18 || !data.starts_with(b"BM") {
        return false;
    }
    let dib_size = u32::from_le_bytes([data[14], data[15], data[16], data[17]]);
    matches!(dib_size, 12 | 40 | 52 | 56 | 64 | 108 | 124)
}

fn is_svg(data: &[u8]) -> bool {
    let head = &data[..data.len().min(512)];
    let trimmed = head
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map(|i| &head[i..])
        .unwrap_or(&[]);
    let text_like = trimmed.starts_with(b"<") || trimmed.starts_with(&[0xEF, 0xBB, 0xBF]);
    text_like && memchr::memmem::find(head, b"<svg").is_some()
}

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width / height, or `None` for a degenerate image.
    pub fn aspect_ratio(self) -> Option<f64> {
        (self.width > 0 && self.height > 0).then(|| self.width as f64 / self.height as f64)
    }

    /// Aspect ratio folded so that it is always ≥ 1.0 (portrait and landscape
    /// strips compare the same).
    pub fn elongation(self) -> Option<f64> {
        self.aspect_ratio().map(|r| if r < 1.0 { 1.0 / r } else { r })
    }
}

/// Read the pixel dimensions of an image from its header bytes.
///
/// Returns `None` for vector images and for headers too short or too
/// corrupt to carry dimensions.
pub fn probe_dimensions(format: ImageFormat, data: &[u8]) -> Option<Dimensions> {
    let dims = match format {
        ImageFormat::Png => png_dimensions(data),
        ImageFormat::Gif => gif_dimensions(data),
        ImageFormat::Bmp => bmp_dimensions(data),
        ImageFormat::WebP => webp_dimensions(data),
        ImageFormat::Jpeg => jpeg_dimensions(data),
        ImageFormat::Svg => None,
    }?;
    (dims.width > 0 && dims.height > 0).then_some(dims)
}

fn png_dimensions(data: &[u8]) -> Option<Dimensions> {
    // IHDR is always the first chunk: width/height at 16..24, big-endian.
    if data.len() < 24 || &data[12..16] != b"IHDR" {
        return None;
    }
    let width = u32::from_be_bytes([data[16], data[17], data[18], data[19]]);
    let height = u32::from_be_bytes([data[20], data[21], data[22], data[23]]);
    Some(Dimensions::new(width, height))
}

fn gif_dimensions(data: &[u8]) -> Option<Dimensions> {
    if data.len() < 10 {
        return None;
    }
    let width = u16::from_le_bytes([data[6], data[7]]) as u32;
    let height = u16::from_le_bytes([data[8], data[9]]) as u32;
    Some(Dimensions::new(width, height))
}

fn bmp_dimensions(data: &[u8]) -> Option<Dimensions> {
    if data.len() < 26 {
        return None;
    }
    let dib_size = u32::from_le_bytes([data[14], data[15], data[16], data[17]]);
    if dib_size == 12 {
        // BITMAPCOREHEADER: 16-bit fields
        let width = u16::from_le_bytes([data[18], data[19]]) as u32;
        let height = u16::from_le_bytes([data[20], data[21]]) as u32;
        return Some(Dimensions::new(width, height));
    }
    let width = i32::from_le_bytes([data[18], data[19], data[20], data[21]]);
    // Negative height marks a top-down bitmap.
    let height = i32::from_le_bytes([data[22], data[23], data[24], data[25]]);
    Some(Dimensions::new(width.unsigned_abs(), height.unsigned_abs()))
}

fn webp_dimensions(data: &[u8]) -> Option<Dimensions> {
    if data.len() < 30 {
        return None;
    }
    match &data[12..16] {
        b"VP8X" => {
            let width = 1 + u32::from_le_bytes([data[24], data[25], data[26], 0]);
            let height = 1 + u32::from_le_bytes([data[27], data[28], data[29], 0]);
            Some(Dimensions::new(width, height))
        }
        b"VP8L" => {
            if data[20] != 0x2F {
                return None;
            }
            let (b0, b1, b2, b3) = (
                data[21] as u32,
                data[22] as u32,
                data[23] as u32,
                data[24] as u32,
            );
            let width = 1 + (((b1 & 0x3F) << 8) | b0);
            let height = 1 + (((b3 & 0x0F) << 10) | (b2 << 2) | ((b1 & 0xC0) >> 6));
            Some(Dimensions::new(width, height))
        }
        b"VP8 " => {
            // Key frame start code 9D 01 2A, then 14-bit width/height.
            if data[23..26] != [0x9D, 0x01, 0x2A] {
                return None;
            }
            let width = u16::from_le_bytes([data[26], data[27]]) as u32 & 0x3FFF;
            let height = u16::from_le_bytes([data[28], data[29]]) as u32 & 0x3FFF;
            Some(Dimensions::new(width, height))
        }
        _ => None,
    }
}

/// Walk JPEG marker segments up to the first start-of-frame.
fn jpeg_dimensions(data: &[u8]) -> Option<Dimensions> {
    let mut i = 2;
    while i + 3 < data.len() {
        if data[i] != 0xFF {
            i += 1;
            continue;
        }
        let marker = data[i + 1];
        match marker {
            // Fill bytes and standalone markers carry no length.
            0xFF => {
                i += 1;
                continue;
            }
            0x01 | 0xD0..=0xD8 => {
                i += 2;
                continue;
            }
            0xD9 | 0xDA => return None,
            _ => {}
        }

        let length = u16::from_be_bytes([data[i + 2], data[i + 3]]) as usize;
        if length < 2 {
            return None;
        }

        if matches!(
            marker,
            0xC0 | 0xC1 | 0xC2 | 0xC3 | 0xC5 | 0xC6 | 0xC7 | 0xC9 | 0xCA | 0xCB | 0xCD | 0xCE | 0xCF
        ) {
            if i + 9 > data.len() {
                return None;
            }
            let height = u16::from_be_bytes([data[i + 5], data[i + 6]]) as u32;
            let width = u16::from_be_bytes([data[i + 7], data[i + 8]]) as u32;
            return Some(Dimensions::new(width, height));
        }

        i += 2 + length;
    }
    None
}

/// Lowercase hex SHA-256 of a payload.
pub fn digest_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Everything the filtering stage needs to know about one payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageMetrics {
    pub format: ImageFormat,
    pub bytes: usize,
    pub dimensions: Option<Dimensions>,
    pub hash: String,
}

impl ImageMetrics {
    pub fn measure(format: ImageFormat, data: &[u8]) -> Self {
        Self {
            format,
            bytes: data.len(),
            dimensions: probe_dimensions(format, data),
            hash: digest_hex(data),
        }
    }
}
