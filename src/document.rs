//! Document rendering: one page of a PDF or raster image → base64 image.
//!
//! The async functions here are the renderer's public face. PDF work is
//! moved onto the blocking pool; raster images are read with `tokio::fs` and
//! base64-wrapped without being decoded.
//!
//! For images the page number is ignored: an image is a single page.

use crate::config::RenderOptions;
use crate::error::VisionParserError;
use crate::pipeline::encode::{self, EncodedImage};
use crate::pipeline::input::{self, DocumentFormat};
use crate::pipeline::render;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Page count plus a rendered page, for showing a document before parsing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentPreview {
    /// Pages in the document (1 for raster images).
    pub page_count: usize,
    /// MIME type of `preview`.
    pub mime_type: String,
    /// Base64 of the rendered page.
    pub preview: String,
}

/// Render one page (1-indexed) of a document to an [`EncodedImage`].
///
/// # Errors
/// - [`VisionParserError::FileNotFound`] / [`VisionParserError::PermissionDenied`]
/// - [`VisionParserError::UnsupportedFormat`] for anything but PDF and
///   `.jpg .jpeg .png .gif .bmp`
/// - [`VisionParserError::PageOutOfRange`] for page 0 or past the last page
pub async fn render_page(
    path: impl AsRef<Path>,
    page_number: usize,
    options: &RenderOptions,
) -> Result<EncodedImage, VisionParserError> {
    let format = input::detect_format(path.as_ref())?;
    let path = input::resolve_local(path.as_ref())?;

    match format {
        DocumentFormat::Pdf => {
            let options = options.clone();
            let path_for_task = path.clone();
            let image = tokio::task::spawn_blocking(move || {
                render::render_pdf_page(&path_for_task, page_number, &options)
            })
            .await
            .map_err(|e| VisionParserError::Internal(format!("Render task panicked: {e}")))??;

            encode::encode_page(&image).map_err(|e| VisionParserError::RasterisationFailed {
                page: page_number,
                detail: format!("Image encoding failed: {e}"),
            })
        }
        DocumentFormat::Image(kind) => {
            let bytes = read_file(&path).await?;
            debug!("{}: {} bytes passed through as {}", path.display(), bytes.len(), kind.mime_type());
            Ok(encode::encode_raw(&bytes, kind.mime_type()))
        }
    }
}

/// Synchronous wrapper around [`render_page`].
///
/// Creates a temporary tokio runtime internally; do not call from inside one.
pub fn render_page_blocking(
    path: impl AsRef<Path>,
    page_number: usize,
    options: &RenderOptions,
) -> Result<EncodedImage, VisionParserError> {
    runtime()?.block_on(render_page(path, page_number, options))
}

/// Render one page and return only the base64 payload.
pub async fn render_to_base64(
    path: impl AsRef<Path>,
    page_number: usize,
    options: &RenderOptions,
) -> Result<String, VisionParserError> {
    Ok(render_page(path, page_number, options).await?.data)
}

/// Render one page of an in-memory document. `file_name` decides the format
/// and names the document in errors.
pub async fn render_bytes(
    bytes: Vec<u8>,
    file_name: &str,
    page_number: usize,
    options: &RenderOptions,
) -> Result<EncodedImage, VisionParserError> {
    let label = PathBuf::from(file_name);
    match input::detect_format(&label)? {
        DocumentFormat::Pdf => {
            let options = options.clone();
            let image = tokio::task::spawn_blocking(move || {
                render::render_pdf_bytes_page(&bytes, &label, page_number, &options)
            })
            .await
            .map_err(|e| VisionParserError::Internal(format!("Render task panicked: {e}")))??;

            encode::encode_page(&image).map_err(|e| VisionParserError::RasterisationFailed {
                page: page_number,
                detail: format!("Image encoding failed: {e}"),
            })
        }
        DocumentFormat::Image(kind) => Ok(encode::encode_raw(&bytes, kind.mime_type())),
    }
}

/// Number of pages in a document. Raster images have one.
pub async fn page_count(
    path: impl AsRef<Path>,
    password: Option<&str>,
) -> Result<usize, VisionParserError> {
    let format = input::detect_format(path.as_ref())?;
    let path = input::resolve_local(path.as_ref())?;
    match format {
        DocumentFormat::Pdf => {
            let password = password.map(str::to_string);
            tokio::task::spawn_blocking(move || render::pdf_page_count(&path, password.as_deref()))
                .await
                .map_err(|e| VisionParserError::Internal(format!("Page count task panicked: {e}")))?
        }
        DocumentFormat::Image(_) => Ok(1),
    }
}

/// Page count and one rendered page.
pub async fn preview(
    path: impl AsRef<Path>,
    page_number: usize,
    options: &RenderOptions,
) -> Result<DocumentPreview, VisionParserError> {
    let path = path.as_ref();
    let page_count = page_count(path, options.password.as_deref()).await?;
    let image = render_page(path, page_number, options).await?;
    info!(
        "Preview of {}: page {}/{} ({})",
        path.display(),
        page_number,
        page_count,
        image.mime_type
    );

    Ok(DocumentPreview {
        page_count,
        mime_type: image.mime_type,
        preview: image.data,
    })
}

async fn read_file(path: &Path) -> Result<Vec<u8>, VisionParserError> {
    tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => VisionParserError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => VisionParserError::FileNotFound {
            path: path.to_path_buf(),
        },
    })
}

pub(crate) fn runtime() -> Result<tokio::runtime::Runtime, VisionParserError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| VisionParserError::Internal(format!("Failed to create tokio runtime: {e}")))
}
