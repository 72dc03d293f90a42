//! Text watermarks on PDF documents via pdfium.
//!
//! Every page receives the same diagonal label: Helvetica 50 pt, light grey
//! at 30 % opacity, rotated 45° and centred on the page. The source is never
//! modified; a new `watermarked_<timestamp>_<millis>.pdf` is written to the
//! output directory.
//!
//! pdfium is not async-safe, so all document work runs in `spawn_blocking`.
//! The library is bound from `PDFIUM_LIB_PATH` when set, otherwise from the
//! system library search path.

use crate::error::WatermarkError;
use crate::input::{resolve_source, unix_millis};
use crate::job::SourceLocator;
use chrono::Local;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const FONT_SIZE: f32 = 50.0;
const OPACITY: u8 = 77; // 30 % of 255
const GREY: u8 = 192;
const ANGLE_DEGREES: f32 = 45.0;

/// Whether `url` looks like it points at a PDF.
pub fn is_pdf_locator(url: &str) -> bool {
    let lower = url.to_lowercase();
    lower.ends_with(".pdf") || lower.contains(".pdf?")
}

/// Stamp `text` onto every page of the PDF at `source`.
///
/// # Returns
/// Path of the new PDF inside `output_dir`.
pub async fn add_text_watermark(
    source: &Path,
    text: &str,
    output_dir: &Path,
) -> Result<PathBuf, WatermarkError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(WatermarkError::EmptyText);
    }
    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(|source| WatermarkError::Write {
            path: output_dir.to_path_buf(),
            source,
        })?;

    let output = output_dir.join(format!(
        "watermarked_{}_{}.pdf",
        Local::now().format("%Y%m%d_%H%M%S"),
        unix_millis()
    ));
    let src = source.to_path_buf();
    let dest = output.clone();
    let label = text.to_string();

    tokio::task::spawn_blocking(move || watermark_blocking(&src, &label, &dest))
        .await
        .map_err(|e| WatermarkError::Internal(format!("Watermark task panicked: {}", e)))??;

    info!("Watermark applied: {} → {}", source.display(), output.display());
    Ok(output)
}

/// Fetch the PDF behind `locator` (local or remote), then watermark it.
pub async fn watermark_locator(
    locator: &SourceLocator,
    text: &str,
    output_dir: &Path,
    download_timeout_secs: u64,
) -> Result<PathBuf, WatermarkError> {
    if text.trim().is_empty() {
        return Err(WatermarkError::EmptyText);
    }
    if !is_pdf_locator(&locator.to_string()) {
        return Err(WatermarkError::NotAPdf(locator.to_string()));
    }
    let resolved = resolve_source(locator, download_timeout_secs)
        .await
        .map_err(|e| WatermarkError::Fetch {
            source_ref: locator.to_string(),
            reason: e.to_string(),
        })?;
    add_text_watermark(resolved.path(), text, output_dir).await
}

fn bind_pdfium() -> Result<Pdfium, WatermarkError> {
    let bindings = match std::env::var_os("PDFIUM_LIB_PATH") {
        Some(path) => {
            let path = PathBuf::from(path);
            if path.is_dir() {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&path))
            } else {
                Pdfium::bind_to_library(&path)
            }
        }
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| WatermarkError::PdfiumUnavailable(e.to_string()))?;
    Ok(Pdfium::new(bindings))
}

fn watermark_blocking(source: &Path, text: &str, output: &Path) -> Result<(), WatermarkError> {
    let pdf_error = |e: PdfiumError| WatermarkError::Pdf {
        path: source.to_path_buf(),
        detail: format!("{:?}", e),
    };

    let pdfium = bind_pdfium()?;
    let mut document = pdfium.load_pdf_from_file(source, None).map_err(pdf_error)?;
    let font = document.fonts_mut().helvetica();
    debug!("Watermarking {} pages of {}", document.pages().len(), source.display());

    // Rough text extent for centring; Helvetica averages ~0.5 em per glyph.
    let text_width = text.chars().count() as f32 * FONT_SIZE * 0.5;
    let (cos, sin) = {
        let r = ANGLE_DEGREES.to_radians();
        (r.cos(), r.sin())
    };

    document
        .pages()
        .watermark(|group, _index, width, height| {
            let mut label =
                PdfPageTextObject::new(&document, text, font, PdfPoints::new(FONT_SIZE))?;
            label.set_fill_color(PdfColor::new(GREY, GREY, GREY, OPACITY))?;
            label.rotate_counter_clockwise_degrees(ANGLE_DEGREES)?;

            // Shift so the midpoint of the rotated baseline lands on the page centre.
            let dx = width.value / 2.0 - (text_width / 2.0) * cos + (FONT_SIZE / 2.0) * sin;
            let dy = height.value / 2.0 - (text_width / 2.0) * sin - (FONT_SIZE / 2.0) * cos;
            label.translate(PdfPoints::new(dx), PdfPoints::new(dy))?;

            group.push(&mut label.into())?;
            Ok(())
        })
        .map_err(pdf_error)?;

    document.save_to_file(output).map_err(pdf_error)?;
    Ok(())
}
