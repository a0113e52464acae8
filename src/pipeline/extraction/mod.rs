pub mod types;
pub mod sanitize;
pub mod pdfium;
pub mod ocr;
pub mod vision_ocr;
pub mod orchestrator;
pub mod materials;

pub use types::*;
pub use sanitize::*;
pub use pdfium::*;
pub use ocr::*;
pub use vision_ocr::*;
pub use orchestrator::*;
pub use materials::*;

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tesseract OCR initialization failed: {0}")]
    OcrInit(String),

    #[error("OCR processing failed: {0}")]
    OcrProcessing(String),

    #[error("PDF parsing failed: {0}")]
    PdfParsing(String),

    #[error("PDF rendering failed on page {page}: {reason}")]
    PdfRendering { page: usize, reason: String },

    #[error("PDF is password-protected")]
    PdfEncrypted,

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("Text encoding error: {0}")]
    EncodingError(String),

    #[error("Tessdata not found at: {0}")]
    TessdataNotFound(PathBuf),

    #[error("Unsupported format for extraction: {0}")]
    UnsupportedFormat(String),

    #[error("No PDF backend configured")]
    NoPdfBackend,
}
