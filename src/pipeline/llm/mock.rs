use std::collections::VecDeque;
use std::sync::Mutex;

use super::types::{LlmClient, VisionClient};
use super::LlmError;
use crate::config::GenerationOptions;

/// Mock LLM client that always returns the same response.
pub struct MockLlmClient {
    response: String,
    available_models: Vec<String>,
}

impl MockLlmClient {
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            available_models: vec!["phi3:latest".to_string()],
        }
    }

    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.available_models = models;
        self
    }
}

impl LlmClient for MockLlmClient {
    fn generate(
        &self,
        _model: &str,
        _prompt: &str,
        _options: &GenerationOptions,
    ) -> Result<String, LlmError> {
        Ok(self.response.clone())
    }

    fn is_model_available(&self, model: &str) -> Result<bool, LlmError> {
        Ok(self.available_models.iter().any(|m| m.starts_with(model)))
    }

    fn list_models(&self) -> Result<Vec<String>, LlmError> {
        Ok(self.available_models.clone())
    }
}

impl VisionClient for MockLlmClient {
    fn chat_with_images(
        &self,
        _model: &str,
        _prompt: &str,
        _images: &[String],
        _system: Option<&str>,
    ) -> Result<String, LlmError> {
        Ok(self.response.clone())
    }
}

/// Replays a queue of canned responses in call order and records every
/// prompt it receives. Once the queue is drained it answers with the
/// fallback response (an empty-response error unless one is set).
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    fallback: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlmClient {
    pub fn new(script: Vec<Result<String, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Convenience for scripts with only successful responses.
    pub fn from_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(responses.into_iter().map(|r| Ok(r.into())).collect())
    }

    pub fn with_fallback(mut self, response: &str) -> Self {
        self.fallback = Some(response.to_string());
        self
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl LlmClient for ScriptedLlmClient {
    fn generate(
        &self,
        _model: &str,
        prompt: &str,
        _options: &GenerationOptions,
    ) -> Result<String, LlmError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match next {
            Some(result) => result,
            None => self.fallback.clone().ok_or(LlmError::EmptyResponse),
        }
    }

    fn is_model_available(&self, _model: &str) -> Result<bool, LlmError> {
        Ok(true)
    }

    fn list_models(&self) -> Result<Vec<String>, LlmError> {
        Ok(vec!["scripted".to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_client_returns_configured_response() {
        let client = MockLlmClient::new("test response");
        let result = client
            .generate("model", "prompt", &GenerationOptions::default())
            .unwrap();
        assert_eq!(result, "test response");
    }

    #[test]
    fn mock_client_lists_models() {
        let client = MockLlmClient::new("").with_models(vec!["phi3:latest".into(), "llama3:8b".into()]);
        let models = client.list_models().unwrap();
        assert_eq!(models.len(), 2);
        assert!(client.is_model_available("phi3").unwrap());
    }

    #[test]
    fn mock_client_model_not_available() {
        let client = MockLlmClient::new("").with_models(vec!["llama3:8b".into()]);
        assert!(!client.is_model_available("phi3").unwrap());
    }

    #[test]
    fn scripted_client_replays_in_order_and_records_prompts() {
        let client = ScriptedLlmClient::new(vec![
            Ok("first".into()),
            Err(LlmError::Timeout(std::time::Duration::from_secs(1))),
            Ok("third".into()),
        ]);
        let opts = GenerationOptions::default();
        assert_eq!(client.generate("m", "p1", &opts).unwrap(), "first");
        assert!(client.generate("m", "p2", &opts).is_err());
        assert_eq!(client.generate("m", "p3", &opts).unwrap(), "third");
        assert_eq!(client.prompts(), vec!["p1", "p2", "p3"]);
        assert_eq!(client.remaining(), 0);
    }

    #[test]
    fn scripted_client_drained_uses_fallback() {
        let opts = GenerationOptions::default();
        let bare = ScriptedLlmClient::from_responses(Vec::<String>::new());
        assert_eq!(bare.generate("m", "p", &opts), Err(LlmError::EmptyResponse));

        let with_fallback = ScriptedLlmClient::from_responses(["a"]).with_fallback("b");
        assert_eq!(with_fallback.generate("m", "p", &opts).unwrap(), "a");
        assert_eq!(with_fallback.generate("m", "p", &opts).unwrap(), "b");
        assert_eq!(with_fallback.call_count(), 2);
    }
}
