//! Worksheet PDFs through Google PDFium: the text layer for born-digital
//! sheets, page rasters for scanned ones.
//!
//! `Pdfium` is `!Send`, so every call binds its own instance.

use std::io::Cursor;
use std::path::Path;

use image::ImageOutputFormat;
use pdfium_render::prelude::*;
use tracing::{debug, warn};

use super::types::{PdfPageRenderer, PdfTextLayer};
use super::ExtractionError;

/// Longest rendered edge, in pixels. Worksheets scanned as posters or at
/// absurd DPI are scaled down to fit.
const MAX_EDGE_PX: u32 = 4096;

const POINTS_PER_INCH: f32 = 72.0;

/// Reads worksheet text layers and rasterizes scanned pages with PDFium.
pub struct PdfiumBackend;

impl PdfiumBackend {
    /// Fails when no PDFium library can be bound.
    pub fn new() -> Result<Self, ExtractionError> {
        bind_pdfium()?;
        Ok(Self)
    }

    /// Bind PDFium, open `pdf_bytes`, and hand the document to `read`.
    fn with_document<T>(
        pdf_bytes: &[u8],
        read: impl FnOnce(&PdfDocument<'_>) -> Result<T, ExtractionError>,
    ) -> Result<T, ExtractionError> {
        let pdfium = bind_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf_bytes, None)
            .map_err(open_error)?;
        read(&document)
    }
}

/// `PDFIUM_DYNAMIC_LIB_PATH` first, then next to the executable
/// (or its `pdfium/lib`), then the system search path.
fn bind_pdfium() -> Result<Pdfium, ExtractionError> {
    if let Ok(path) = std::env::var("PDFIUM_DYNAMIC_LIB_PATH") {
        let bindings = Pdfium::bind_to_library(&path).map_err(|e| {
            ExtractionError::PdfParsing(format!("Failed to load PDFium from {path}: {e}"))
        })?;
        debug!(path = %path, "Bound PDFium from environment");
        return Ok(Pdfium::new(bindings));
    }

    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));
    for dir in exe_dir.iter().flat_map(|d| [d.clone(), d.join("pdfium").join("lib")]) {
        let lib = Pdfium::pdfium_platform_library_name_at_path(dir.to_string_lossy().as_ref());
        if let Ok(bindings) = Pdfium::bind_to_library(&lib) {
            debug!(dir = %dir.display(), "Bound PDFium next to executable");
            return Ok(Pdfium::new(bindings));
        }
    }

    Pdfium::bind_to_system_library()
        .map(Pdfium::new)
        .map_err(|e| {
            ExtractionError::PdfParsing(format!(
                "PDFium library not found. Set PDFIUM_DYNAMIC_LIB_PATH or install PDFium: {e}"
            ))
        })
}

fn open_error(e: PdfiumError) -> ExtractionError {
    let msg = e.to_string();
    let lower = msg.to_lowercase();
    if lower.contains("password") || lower.contains("encrypt") {
        ExtractionError::PdfEncrypted
    } else {
        ExtractionError::PdfParsing(format!("Failed to load PDF: {msg}"))
    }
}

/// Pixel size of a page of `width_pt` x `height_pt` points at `dpi`.
/// Never zero; the longer edge is capped at [`MAX_EDGE_PX`] keeping aspect.
fn page_pixels(width_pt: f32, height_pt: f32, dpi: u32) -> (u32, u32) {
    let scale = dpi as f32 / POINTS_PER_INCH;
    let (w, h) = ((width_pt * scale).max(1.0), (height_pt * scale).max(1.0));
    let shrink = (MAX_EDGE_PX as f32 / w.max(h)).min(1.0);
    let px = |v: f32| ((v * shrink) as u32).clamp(1, MAX_EDGE_PX);
    (px(w), px(h))
}

impl PdfTextLayer for PdfiumBackend {
    fn page_texts(&self, pdf_bytes: &[u8]) -> Result<Vec<String>, ExtractionError> {
        Self::with_document(pdf_bytes, |document| {
            let texts: Vec<String> = document
                .pages()
                .iter()
                .enumerate()
                .map(|(index, page)| match page.text() {
                    Ok(text) => text.all(),
                    Err(e) => {
                        warn!(page = index, error = %e, "Text layer unreadable, treating page as empty");
                        String::new()
                    }
                })
                .collect();
            debug!(pages = texts.len(), "Read PDF text layer");
            Ok(texts)
        })
    }
}

impl PdfPageRenderer for PdfiumBackend {
    fn page_count(&self, pdf_bytes: &[u8]) -> Result<usize, ExtractionError> {
        Self::with_document(pdf_bytes, |document| Ok(document.pages().len() as usize))
    }

    fn render_page(
        &self,
        pdf_bytes: &[u8],
        page_number: usize,
        dpi: u32,
    ) -> Result<Vec<u8>, ExtractionError> {
        let render_error = |reason: String| ExtractionError::PdfRendering {
            page: page_number,
            reason,
        };

        Self::with_document(pdf_bytes, |document| {
            let pages = document.pages();
            let page = u16::try_from(page_number)
                .ok()
                .and_then(|index| pages.get(index).ok())
                .ok_or_else(|| render_error(format!("page out of range ({} pages)", pages.len())))?;

            let (width, height) = page_pixels(page.width().value, page.height().value, dpi);
            let config = PdfRenderConfig::new()
                .set_target_width(width as i32)
                .set_maximum_height(height as i32);
            let bitmap = page
                .render_with_config(&config)
                .map_err(|e| render_error(format!("rendering failed: {e}")))?;

            let mut png = Cursor::new(Vec::new());
            bitmap
                .as_image()
                .write_to(&mut png, ImageOutputFormat::Png)
                .map_err(|e| ExtractionError::ImageProcessing(format!("PNG encoding failed: {e}")))?;
            let png = png.into_inner();

            debug!(page = page_number, width, height, bytes = png.len(), "Rendered page for OCR");
            Ok(png)
        })
    }
}

// ── Mocks for testing ──────────────────────────────────────

/// Mock text layer returning fixed page texts.
pub struct MockPdfTextLayer {
    pages: Vec<String>,
    fail: bool,
}

impl MockPdfTextLayer {
    pub fn new<S: Into<String>>(pages: impl IntoIterator<Item = S>) -> Self {
        Self {
            pages: pages.into_iter().map(Into::into).collect(),
            fail: false,
        }
    }

    /// A text layer that cannot parse anything.
    pub fn failing() -> Self {
        Self {
            pages: Vec::new(),
            fail: true,
        }
    }
}

impl PdfTextLayer for MockPdfTextLayer {
    fn page_texts(&self, _pdf_bytes: &[u8]) -> Result<Vec<String>, ExtractionError> {
        if self.fail {
            return Err(ExtractionError::PdfParsing("mock text layer failure".into()));
        }
        Ok(self.pages.clone())
    }
}

/// Mock PDF page renderer returning a minimal PNG for each valid page.
pub struct MockPdfPageRenderer {
    page_count: usize,
}

impl MockPdfPageRenderer {
    pub fn new(page_count: usize) -> Self {
        Self { page_count }
    }
}

impl PdfPageRenderer for MockPdfPageRenderer {
    fn page_count(&self, _pdf_bytes: &[u8]) -> Result<usize, ExtractionError> {
        Ok(self.page_count)
    }

    fn render_page(
        &self,
        _pdf_bytes: &[u8],
        page_number: usize,
        _dpi: u32,
    ) -> Result<Vec<u8>, ExtractionError> {
        if page_number >= self.page_count {
            return Err(ExtractionError::PdfRendering {
                page: page_number,
                reason: format!(
                    "Page {page_number} out of range (mock has {} pages)",
                    self.page_count
                ),
            });
        }
        let mut png = minimal_png();
        // Tag the page so OCR mocks can tell pages apart.
        png.push(page_number as u8);
        Ok(png)
    }
}

/// Minimal valid 1x1 white pixel PNG for mock testing.
pub(crate) fn minimal_png() -> Vec<u8> {
    vec![
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, // PNG signature
        0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52, // IHDR chunk
        0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, // 1x1
        0x08, 0x02, 0x00, 0x00, 0x00, 0x90, 0x77, 0x53, // 8-bit RGB
        0xDE, // IHDR CRC
        0x00, 0x00, 0x00, 0x0C, 0x49, 0x44, 0x41, 0x54, // IDAT chunk
        0x08, 0xD7, 0x63, 0xF8, 0xCF, 0xC0, 0x00, 0x00, // compressed
        0x00, 0x02, 0x00, 0x01, 0xE2, 0x21, 0xBC, 0x33, // IDAT CRC
        0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, // IEND chunk
        0xAE, 0x42, 0x60, 0x82, // IEND CRC
    ]
}
