//! Image encoding: pixels or raw image bytes → base64 [`EncodedImage`].
//!
//! Rendered PDF pages are flattened to RGB and PNG-encoded; PNG is lossless,
//! so small print survives intact. Native raster images (`.jpg`, `.png`, …)
//! are passed through byte-for-byte and only base64-wrapped.
//!
//! The MIME type travels with the payload so the data URI sent to the model
//! names the real format instead of assuming JPEG.

use crate::error::VisionParserError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use tracing::debug;

/// MIME type assumed when the bytes of a caller-supplied image are unrecognisable.
pub const FALLBACK_MIME: &str = "image/jpeg";

/// A base64 image payload ready for a multimodal request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedImage {
    /// Standard (padded) base64, no `data:` prefix.
    pub data: String,
    /// e.g. `image/png`.
    pub mime_type: String,
}

impl EncodedImage {
    pub fn new(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }

    /// `data:<mime>;base64,<data>`
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// Encode a rasterised page as a base64 RGB PNG.
pub fn encode_page(img: &DynamicImage) -> Result<EncodedImage, image::ImageError> {
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());

    let mut buf = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!(
        "Encoded {}x{} page → {} bytes base64",
        rgb.width(),
        rgb.height(),
        b64.len()
    );

    Ok(EncodedImage::new(b64, "image/png"))
}

/// Base64-wrap raw image bytes without touching them.
pub fn encode_raw(bytes: &[u8], mime_type: &str) -> EncodedImage {
    EncodedImage::new(STANDARD.encode(bytes), mime_type)
}

/// Accept a caller-supplied image: bare base64 or a `data:` URI.
///
/// Line breaks and other ASCII whitespace in the payload are dropped, so
/// wrapped output of `base64(1)` is accepted. The payload is decoded once to
/// prove it is valid and to sniff the real MIME type from its magic bytes.
pub fn from_base64(input: &str) -> Result<EncodedImage, VisionParserError> {
    let trimmed = input.trim();
    let (declared_mime, payload) = split_data_uri(trimmed);

    if payload.is_empty() {
        return Err(VisionParserError::InvalidBase64 {
            detail: "payload is empty".into(),
        });
    }

    let payload: String = payload
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    let bytes = STANDARD
        .decode(&payload)
        .map_err(|e| VisionParserError::InvalidBase64 {
            detail: e.to_string(),
        })?;

    let mime_type = match sniff_mime(&bytes) {
        Some(m) => m.to_string(),
        None => declared_mime.unwrap_or(FALLBACK_MIME).to_string(),
    };

    Ok(EncodedImage::new(payload, mime_type))
}

/// Identify common image formats by magic bytes.
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    match image::guess_format(bytes).ok()? {
        ImageFormat::Png => Some("image/png"),
        ImageFormat::Jpeg => Some("image/jpeg"),
        ImageFormat::Gif => Some("image/gif"),
        ImageFormat::Bmp => Some("image/bmp"),
        ImageFormat::WebP => Some("image/webp"),
        ImageFormat::Tiff => Some("image/tiff"),
        _ => None,
    }
}

/// Split `data:<mime>;base64,<payload>` into its parts; bare base64 passes through.
fn split_data_uri(input: &str) -> (Option<&str>, &str) {
    let Some(rest) = input.strip_prefix("data:") else {
        return (None, input);
    };
    match rest.split_once(',') {
        Some((header, payload)) => {
            let mime = header.strip_suffix(";base64").unwrap_or(header);
            ((!mime.is_empty()).then_some(mime), payload)
        }
        None => (None, input),
    }
}
