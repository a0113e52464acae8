use super::types::OcrEngine;
use super::ExtractionError;

/// Tesseract OCR engine.
/// Only available when compiled with the `ocr` feature flag.
#[cfg(feature = "ocr")]
pub struct TesseractOcr {
    tessdata_dir: std::path::PathBuf,
    lang: String,
}

#[cfg(feature = "ocr")]
impl TesseractOcr {
    /// Initialize with a tessdata directory containing at least `eng.traineddata`.
    pub fn new(tessdata_dir: &std::path::Path) -> Result<Self, ExtractionError> {
        if !tessdata_dir.join("eng.traineddata").exists() {
            return Err(ExtractionError::TessdataNotFound(tessdata_dir.to_path_buf()));
        }
        Ok(Self {
            tessdata_dir: tessdata_dir.to_path_buf(),
            lang: "eng".to_string(),
        })
    }

    /// Set language(s) for OCR (e.g., "eng", "eng+fra")
    pub fn with_languages(mut self, langs: &str) -> Self {
        self.lang = langs.to_string();
        self
    }
}

#[cfg(feature = "ocr")]
impl OcrEngine for TesseractOcr {
    fn ocr_image(&self, image_bytes: &[u8]) -> Result<String, ExtractionError> {
        let tessdata_str = self
            .tessdata_dir
            .to_str()
            .ok_or_else(|| ExtractionError::OcrInit("Invalid tessdata path".into()))?;

        let tess = tesseract::Tesseract::new(Some(tessdata_str), Some(&self.lang))
            .map_err(|e| ExtractionError::OcrInit(format!("{e:?}")))?;

        let mut tess = tess
            .set_image_from_mem(image_bytes)
            .map_err(|e| ExtractionError::OcrProcessing(format!("{e:?}")))?;

        tess.get_text()
            .map_err(|e| ExtractionError::OcrProcessing(format!("{e:?}")))
    }
}

/// Mock OCR engine for unit testing without Tesseract or a vision model.
///
/// Returns `text` for every image, except images whose trailing tag byte
/// (see `MockPdfPageRenderer`) is listed in `failing_pages`.
pub struct MockOcrEngine {
    pub text: String,
    pub failing_pages: Vec<u8>,
}

impl MockOcrEngine {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            failing_pages: Vec::new(),
        }
    }

    pub fn failing_on(mut self, page: u8) -> Self {
        self.failing_pages.push(page);
        self
    }
}

impl OcrEngine for MockOcrEngine {
    fn ocr_image(&self, image_bytes: &[u8]) -> Result<String, ExtractionError> {
        if let Some(tag) = image_bytes.last() {
            if self.failing_pages.contains(tag) {
                return Err(ExtractionError::OcrProcessing(format!("mock failure on page {tag}")));
            }
        }
        Ok(self.text.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_returns_configured_text() {
        let engine = MockOcrEngine::new("Unit 3: Ratios");
        assert_eq!(engine.ocr_image(&[0x89, 0]).unwrap(), "Unit 3: Ratios");
    }

    #[test]
    fn mock_fails_on_tagged_page() {
        let engine = MockOcrEngine::new("x").failing_on(1);
        assert!(engine.ocr_image(&[0x89, 1]).is_err());
        assert!(engine.ocr_image(&[0x89, 2]).is_ok());
    }

    #[cfg(feature = "ocr")]
    #[test]
    fn tesseract_requires_tessdata() {
        let dir = tempfile::tempdir().unwrap();
        let err = TesseractOcr::new(dir.path()).err().unwrap();
        assert!(matches!(err, ExtractionError::TessdataNotFound(_)));
    }
}
