//! Page rasterisation for OCR: render every page to a `DynamicImage`.
//!
//! Runs inside `spawn_blocking` like all pdfium work. The longest edge of a
//! rendered page is capped at `max_rendered_pixels` regardless of physical
//! page size, which keeps memory bounded on oversized pages.

use super::parse::{bind_pdfium, load_document, looks_like_pdf};
use crate::config::OcrConfig;
use crate::error::StageError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use tracing::{debug, info};

/// PDF user-space units per inch.
const POINTS_PER_INCH: f32 = 72.0;

/// Rasterise all pages of the PDF in `bytes`.
///
/// # Returns
/// `(page_index_0based, image)` pairs in page order.
pub async fn render_pages(
    bytes: &[u8],
    config: &OcrConfig,
) -> Result<Vec<(usize, DynamicImage)>, StageError> {
    if !looks_like_pdf(bytes) {
        return Err(StageError::OcrFailed {
            detail: "cannot rasterise: missing %PDF header".into(),
        });
    }
    let bytes = bytes.to_vec();
    let dpi = config.dpi;
    let max_pixels = config.max_rendered_pixels;
    let password = config.password.clone();

    tokio::task::spawn_blocking(move || {
        render_pages_blocking(&bytes, dpi, max_pixels, password.as_deref())
    })
    .await
    .map_err(|e| StageError::OcrFailed {
        detail: format!("render task panicked: {}", e),
    })?
}

fn render_pages_blocking(
    bytes: &[u8],
    dpi: u32,
    max_pixels: u32,
    password: Option<&str>,
) -> Result<Vec<(usize, DynamicImage)>, StageError> {
    let pdfium = bind_pdfium().map_err(|e| StageError::OcrFailed {
        detail: e.to_string(),
    })?;
    let document = load_document(&pdfium, bytes, password).map_err(|e| StageError::OcrFailed {
        detail: e.to_string(),
    })?;

    let pages = document.pages();
    info!("Rendering {} pages at {} dpi", pages.len(), dpi);

    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(dpi as f32 / POINTS_PER_INCH)
        .set_maximum_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut images = Vec::with_capacity(pages.len() as usize);
    for (idx, page) in pages.iter().enumerate() {
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| StageError::OcrFailed {
                detail: format!("page {}: render failed: {:?}", idx + 1, e),
            })?;
        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            image.width(),
            image.height()
        );
        images.push((idx, image));
    }

    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn non_pdf_fails_before_binding() {
        let err = render_pages(b"GIF89a", &OcrConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::OcrFailed { .. }));
    }
}
