//! PDF rasterisation: render one page to a `DynamicImage` via pdfium.
//!
//! Everything here is blocking. The async entry points in
//! [`crate::document`] move these calls onto `spawn_blocking` because pdfium
//! is CPU-bound and must not stall the runtime's worker threads.
//!
//! The pdfium library is bound per call and released on return, together
//! with the document handle. Dropping a binding tears the library down, so
//! calls are serialised on a process-wide lock.

use crate::config::RenderOptions;
use crate::error::VisionParserError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Path to the pdfium shared library, or to the directory containing it.
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

static PDFIUM_LOCK: Mutex<()> = Mutex::new(());

fn pdfium_lock() -> MutexGuard<'static, ()> {
    PDFIUM_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Bind to pdfium: `PDFIUM_LIB_PATH` first, then the system library, then the
/// working directory.
fn bind_pdfium() -> Result<Pdfium, VisionParserError> {
    let bindings = match std::env::var(PDFIUM_LIB_PATH_ENV) {
        Ok(p) if !p.trim().is_empty() => {
            let path = PathBuf::from(p);
            let lib = if path.is_dir() {
                Pdfium::pdfium_platform_library_name_at_path(&path)
            } else {
                path
            };
            debug!("Binding pdfium from {}", lib.display());
            Pdfium::bind_to_library(&lib)
        }
        _ => Pdfium::bind_to_system_library().or_else(|_| {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        }),
    }
    .map_err(|e| VisionParserError::PdfiumBindingFailed(format!("{:?}", e)))?;

    Ok(Pdfium::new(bindings))
}

/// Whether a pdfium library can be bound in this process.
pub fn pdfium_available() -> bool {
    let _guard = pdfium_lock();
    bind_pdfium().is_ok()
}

/// Rasterise one page (1-indexed) of a PDF file.
pub fn render_pdf_page(
    pdf_path: &Path,
    page_number: usize,
    options: &RenderOptions,
) -> Result<DynamicImage, VisionParserError> {
    let _guard = pdfium_lock();
    let pdfium = bind_pdfium()?;
    let password = options.password.as_deref();

    let document = pdfium
        .load_pdf_from_file(pdf_path, password)
        .map_err(|e| map_load_error(pdf_path, password.is_some(), e))?;

    rasterise_page(&document, page_number, options)
}

/// Rasterise one page (1-indexed) of an in-memory PDF. `label` names the
/// document in errors.
pub fn render_pdf_bytes_page(
    bytes: &[u8],
    label: &Path,
    page_number: usize,
    options: &RenderOptions,
) -> Result<DynamicImage, VisionParserError> {
    let _guard = pdfium_lock();
    let pdfium = bind_pdfium()?;
    let password = options.password.as_deref();

    let document = pdfium
        .load_pdf_from_byte_slice(bytes, password)
        .map_err(|e| map_load_error(label, password.is_some(), e))?;

    rasterise_page(&document, page_number, options)
}

/// Number of pages in a PDF file.
pub fn pdf_page_count(pdf_path: &Path, password: Option<&str>) -> Result<usize, VisionParserError> {
    let _guard = pdfium_lock();
    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_file(pdf_path, password)
        .map_err(|e| map_load_error(pdf_path, password.is_some(), e))?;

    let total = document.pages().len() as usize;
    info!("PDF loaded: {} pages", total);
    Ok(total)
}

fn rasterise_page(
    document: &PdfDocument<'_>,
    page_number: usize,
    options: &RenderOptions,
) -> Result<DynamicImage, VisionParserError> {
    let pages = document.pages();
    let total_pages = pages.len() as usize;

    if page_number == 0 || page_number > total_pages {
        return Err(VisionParserError::PageOutOfRange {
            page: page_number,
            total: total_pages,
        });
    }

    let page = pages
        .get((page_number - 1) as PdfPageIndex)
        .map_err(|e| VisionParserError::RasterisationFailed {
            page: page_number,
            detail: format!("{:?}", e),
        })?;

    let bitmap = page
        .render_with_config(&render_config(options))
        .map_err(|e| VisionParserError::RasterisationFailed {
            page: page_number,
            detail: format!("{:?}", e),
        })?;

    let image = bitmap.as_image();
    debug!(
        "Rendered page {}/{} → {}x{} px",
        page_number,
        total_pages,
        image.width(),
        image.height()
    );

    Ok(image)
}

/// Scale from points (1/72 inch) to the requested DPI, capped on both edges.
fn render_config(options: &RenderOptions) -> PdfRenderConfig {
    let scale = options.dpi as f32 / 72.0;
    let max = max_edge_pixels(options);
    PdfRenderConfig::new()
        .scale_page_by_factor(scale)
        .set_maximum_width(max)
        .set_maximum_height(max)
}

/// Longest-edge cap as pdfium takes it; values past `i32::MAX` saturate.
fn max_edge_pixels(options: &RenderOptions) -> i32 {
    i32::try_from(options.max_rendered_pixels).unwrap_or(i32::MAX)
}

fn map_load_error(path: &Path, had_password: bool, e: PdfiumError) -> VisionParserError {
    let err_str = format!("{:?}", e);
    if err_str.contains("Password") || err_str.contains("password") {
        if had_password {
            VisionParserError::WrongPassword {
                path: path.to_path_buf(),
            }
        } else {
            VisionParserError::PasswordRequired {
                path: path.to_path_buf(),
            }
        }
    } else {
        VisionParserError::CorruptPdf {
            path: path.to_path_buf(),
            detail: err_str,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_cap_saturates_instead_of_wrapping() {
        let options = RenderOptions {
            max_rendered_pixels: 4000,
            ..RenderOptions::default()
        };
        assert_eq!(max_edge_pixels(&options), 4000);

        // set directly, past the builder's clamp
        let options = RenderOptions {
            max_rendered_pixels: u32::MAX,
            ..RenderOptions::default()
        };
        assert_eq!(max_edge_pixels(&options), i32::MAX);
    }
}
