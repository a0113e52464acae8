//! Vision OCR engine: extracts text from rendered pages via an Ollama vision model.
//!
//! Two prompt strategies:
//! - **DeepSeek-OCR**: `<|grounding|>` token, no system prompt
//! - **Generic vision models**: system prompt + extraction instruction

use std::sync::Arc;

use base64::Engine as _;

use super::types::OcrEngine;
use super::ExtractionError;
use crate::pipeline::llm::VisionClient;

/// DeepSeek-OCR is prompt-sensitive and takes no system prompt.
const DEEPSEEK_OCR_PROMPT: &str = "<|grounding|>Convert the document to markdown.";

const GENERIC_SYSTEM_PROMPT: &str = "\
You are a document text extractor. Extract ALL visible text from the provided \
page image of a school worksheet or form. Output plain text, one line per printed line.";

const GENERIC_USER_PROMPT: &str = "\
Extract all visible text from this page image. Preserve the reading order. \
Do not describe the image and do not add commentary.";

/// Production vision OCR engine backed by Ollama.
pub struct OllamaVisionOcr {
    vision_client: Arc<dyn VisionClient>,
    model_name: String,
}

impl OllamaVisionOcr {
    pub fn new(vision_client: Arc<dyn VisionClient>, model_name: String) -> Self {
        Self {
            vision_client,
            model_name,
        }
    }

    fn is_deepseek_ocr(&self) -> bool {
        model_component(&self.model_name).starts_with("deepseek-ocr")
    }
}

/// `registry/namespace/deepseek-ocr:latest` → `deepseek-ocr`
fn model_component(model_name: &str) -> String {
    let base = model_name.rsplit('/').next().unwrap_or(model_name);
    base.split(':').next().unwrap_or(base).to_lowercase()
}

impl OcrEngine for OllamaVisionOcr {
    fn ocr_image(&self, image_bytes: &[u8]) -> Result<String, ExtractionError> {
        let _span = tracing::info_span!(
            "vision_ocr_extract",
            model = %self.model_name,
            image_size = image_bytes.len(),
        )
        .entered();
        let start = std::time::Instant::now();

        let images = vec![base64::engine::general_purpose::STANDARD.encode(image_bytes)];

        let (prompt, system) = if self.is_deepseek_ocr() {
            (DEEPSEEK_OCR_PROMPT, None)
        } else {
            (GENERIC_USER_PROMPT, Some(GENERIC_SYSTEM_PROMPT))
        };

        let text = self
            .vision_client
            .chat_with_images(&self.model_name, prompt, &images, system)
            .map_err(|e| ExtractionError::OcrProcessing(format!("Vision OCR failed: {e}")))?;

        tracing::info!(
            model = %self.model_name,
            elapsed_ms = %start.elapsed().as_millis(),
            text_len = text.len(),
            "Vision OCR extraction complete"
        );

        Ok(text.trim().to_string())
    }
}
