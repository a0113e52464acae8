use std::path::Path;

use super::sanitize::sanitize_extracted_text;
use super::types::{
    DocumentFormat, ExtractionMethod, OcrEngine, PdfPageRenderer, PdfTextLayer, TextExtraction,
};
use super::ExtractionError;
use crate::config::ExtractionSettings;

/// Turns a worksheet or IEP file into plain text.
/// Uses trait objects for the PDF and OCR backends, enabling dependency injection.
pub struct DocumentExtractor {
    settings: ExtractionSettings,
    text_layer: Option<Box<dyn PdfTextLayer>>,
    pdf_renderer: Option<Box<dyn PdfPageRenderer>>,
    ocr_engine: Option<Box<dyn OcrEngine>>,
}

impl DocumentExtractor {
    /// An extractor that reads plain-text files only until backends are added.
    pub fn new(settings: ExtractionSettings) -> Self {
        Self {
            settings,
            text_layer: None,
            pdf_renderer: None,
            ocr_engine: None,
        }
    }

    pub fn with_text_layer(mut self, text_layer: Box<dyn PdfTextLayer>) -> Self {
        self.text_layer = Some(text_layer);
        self
    }

    /// Add a PDF page renderer for per-page OCR of scanned PDFs.
    pub fn with_pdf_renderer(mut self, renderer: Box<dyn PdfPageRenderer>) -> Self {
        self.pdf_renderer = Some(renderer);
        self
    }

    pub fn with_ocr_engine(mut self, engine: Box<dyn OcrEngine>) -> Self {
        self.ocr_engine = Some(engine);
        self
    }

    pub fn can_ocr(&self) -> bool {
        self.pdf_renderer.is_some() && self.ocr_engine.is_some()
    }

    /// Extract text, reporting which method produced it.
    pub fn extract(&self, path: &Path) -> Result<TextExtraction, ExtractionError> {
        let format = DocumentFormat::detect(path)
            .ok_or_else(|| ExtractionError::UnsupportedFormat(path.display().to_string()))?;

        let _span = tracing::info_span!("extract_document", path = %path.display()).entered();
        let start = std::time::Instant::now();

        let result = match format {
            DocumentFormat::PlainText => {
                let bytes = std::fs::read(path)?;
                let text = String::from_utf8(bytes)
                    .map_err(|e| ExtractionError::EncodingError(e.to_string()))?;
                TextExtraction {
                    text: sanitize_extracted_text(&text),
                    method: ExtractionMethod::PlainText,
                    page_count: 1,
                    ocr_pages: 0,
                }
            }
            DocumentFormat::Pdf => {
                let bytes = std::fs::read(path)?;
                self.extract_pdf(&bytes)?
            }
        };

        tracing::info!(
            method = ?result.method,
            pages = result.page_count,
            ocr_pages = result.ocr_pages,
            text_length = result.text.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Text extraction complete"
        );

        Ok(result)
    }

    /// Never-failing contract: any error degrades to an empty string.
    pub fn extract_text(&self, path: &Path) -> String {
        match self.extract(path) {
            Ok(result) => result.text,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Extraction failed, using empty text");
                String::new()
            }
        }
    }

    fn extract_pdf(&self, pdf_bytes: &[u8]) -> Result<TextExtraction, ExtractionError> {
        if self.text_layer.is_none() && !self.can_ocr() {
            return Err(ExtractionError::NoPdfBackend);
        }

        let page_texts = match &self.text_layer {
            Some(layer) => match layer.page_texts(pdf_bytes) {
                Ok(pages) => pages,
                Err(e) => {
                    tracing::warn!(error = %e, "PDF text layer failed, treating as empty");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let direct = sanitize_extracted_text(page_texts.join("\n").trim());
        let direct_pages = page_texts.len();

        if direct.chars().count() >= self.settings.min_direct_text_chars {
            return Ok(TextExtraction {
                text: direct,
                method: ExtractionMethod::PdfDirect,
                page_count: direct_pages,
                ocr_pages: 0,
            });
        }

        let (Some(renderer), Some(engine)) = (&self.pdf_renderer, &self.ocr_engine) else {
            tracing::debug!(chars = direct.chars().count(), "Short text layer and no OCR backend");
            return Ok(TextExtraction {
                text: direct,
                method: ExtractionMethod::PdfDirect,
                page_count: direct_pages,
                ocr_pages: 0,
            });
        };

        tracing::info!(
            chars = direct.chars().count(),
            threshold = self.settings.min_direct_text_chars,
            "Performing OCR for (probably scanned) PDF"
        );

        let (ocr_text, ocr_pages, page_count) =
            ocr_pdf_pages(pdf_bytes, renderer.as_ref(), engine.as_ref(), &self.settings);

        if ocr_text.is_empty() {
            // Keep whatever the text layer had rather than nothing.
            return Ok(TextExtraction {
                text: direct,
                method: ExtractionMethod::PdfDirect,
                page_count: page_count.max(direct_pages),
                ocr_pages: 0,
            });
        }

        Ok(TextExtraction {
            text: ocr_text,
            method: ExtractionMethod::Ocr,
            page_count: page_count.max(direct_pages),
            ocr_pages,
        })
    }
}

/// OCR a PDF page by page. Failed pages are skipped.
///
/// Returns (joined text, pages that produced text, page count).
fn ocr_pdf_pages(
    pdf_bytes: &[u8],
    renderer: &dyn PdfPageRenderer,
    engine: &dyn OcrEngine,
    settings: &ExtractionSettings,
) -> (String, usize, usize) {
    let page_count = match renderer.page_count(pdf_bytes) {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!(error = %e, "OCR failed: could not count pages");
            return (String::new(), 0, 0);
        }
    };
    let limit = settings.ocr_page_limit.map_or(page_count, |l| l.min(page_count));

    let mut chunks = Vec::with_capacity(limit);
    for page in 0..limit {
        let text = renderer
            .render_page(pdf_bytes, page, settings.ocr_dpi)
            .and_then(|png| engine.ocr_image(&png));
        match text {
            Ok(text) => {
                let clean = sanitize_extracted_text(&text);
                if !clean.is_empty() {
                    chunks.push(clean);
                }
            }
            Err(e) => {
                tracing::warn!(page = page + 1, error = %e, "OCR failed for page, skipping");
            }
        }
    }

    let ocr_pages = chunks.len();
    (chunks.join("\n"), ocr_pages, page_count)
}
