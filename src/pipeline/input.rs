//! Input resolution: classify a document by extension and check it is readable.
//!
//! Format detection is purely extension-based (case-insensitive): `.pdf` is
//! rasterised, the raster image extensions are passed through, anything else
//! is rejected before any file is opened for real.

use crate::error::VisionParserError;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Raster formats accepted as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Gif,
    Bmp,
}

impl ImageKind {
    pub fn mime_type(self) -> &'static str {
        match self {
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Png => "image/png",
            ImageKind::Gif => "image/gif",
            ImageKind::Bmp => "image/bmp",
        }
    }
}

/// What kind of document a path points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Image(ImageKind),
}

/// Classify by file extension.
pub fn detect_format(path: &Path) -> Result<DocumentFormat, VisionParserError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let format = match ext.as_str() {
        "pdf" => DocumentFormat::Pdf,
        "jpg" | "jpeg" => DocumentFormat::Image(ImageKind::Jpeg),
        "png" => DocumentFormat::Image(ImageKind::Png),
        "gif" => DocumentFormat::Image(ImageKind::Gif),
        "bmp" => DocumentFormat::Image(ImageKind::Bmp),
        _ => {
            return Err(VisionParserError::UnsupportedFormat {
                path: path.to_path_buf(),
                extension: if ext.is_empty() {
                    "(none)".to_string()
                } else {
                    format!(".{ext}")
                },
            })
        }
    };
    Ok(format)
}

/// Check that a local document exists and is readable.
pub fn resolve_local(path: &Path) -> Result<PathBuf, VisionParserError> {
    if !path.exists() {
        return Err(VisionParserError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    match std::fs::File::open(path) {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(VisionParserError::PermissionDenied {
                path: path.to_path_buf(),
            });
        }
        Err(_) => {
            return Err(VisionParserError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
    }

    debug!("Resolved local document: {}", path.display());
    Ok(path.to_path_buf())
}
