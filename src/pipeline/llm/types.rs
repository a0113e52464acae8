use super::LlmError;
use crate::config::GenerationOptions;

/// Text generation capability (allows mocking).
///
/// Prompt in, raw text out. No structural contract: all JSON-shape
/// enforcement happens in the parser and schema layers.
pub trait LlmClient: Send + Sync {
    fn generate(
        &self,
        model: &str,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, LlmError>;

    fn is_model_available(&self, model: &str) -> Result<bool, LlmError>;

    fn list_models(&self) -> Result<Vec<String>, LlmError>;
}

/// Vision-capable chat, used for OCR of rendered pages.
pub trait VisionClient: Send + Sync {
    /// `images` are base64-encoded PNG or JPEG bytes.
    fn chat_with_images(
        &self,
        model: &str,
        prompt: &str,
        images: &[String],
        system: Option<&str>,
    ) -> Result<String, LlmError>;
}
