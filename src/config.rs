use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "Instructive";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "instructive_lib=info,instructive=info,warn"
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generation options forwarded to the model on every call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationOptions {
    /// None = model default. Sampling relies on the model being stochastic.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Maximum tokens generated per call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<i32>,
    /// Context window size.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_ctx: Option<u32>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: None,
            top_p: None,
            num_predict: Some(512),
            num_ctx: Some(2048),
        }
    }
}

/// Which model answers prompts, and where it lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub model_name: String,
    pub ollama_url: String,
    pub options: GenerationOptions,
    /// Vision model used for OCR of scanned pages. None disables vision OCR.
    pub vision_model: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_name: "phi3".to_string(),
            ollama_url: "http://localhost:11434".to_string(),
            options: GenerationOptions::default(),
            vision_model: None,
        }
    }
}

/// Repeated-sampling and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Independent model samples per work unit (N).
    pub generations: u32,
    /// Model requests allowed for one sample (or the consolidation pass)
    /// before it is counted as failed.
    pub max_attempts: u32,
    /// Per-call timeout. A timed-out call is an ordinary failed attempt.
    pub call_timeout_secs: u64,
    /// Work units evaluated concurrently. Ollama on CPU serves one request at
    /// a time, so the default is sequential.
    pub workers: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            generations: 3,
            max_attempts: 3,
            call_timeout_secs: 300,
            workers: 1,
        }
    }
}

impl SamplingConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// Truncation budgets that keep prompts bounded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptLimits {
    /// Characters of material text embedded in a prompt.
    pub material_chars: usize,
    /// Indicator statements listed per competency.
    pub indicator_lines: usize,
    /// Goal / accommodation entries listed per student.
    pub profile_entries: usize,
    /// Cap for any other free-text field (narratives, descriptions).
    pub field_chars: usize,
}

impl Default for PromptLimits {
    fn default() -> Self {
        Self {
            material_chars: 2500,
            indicator_lines: 8,
            profile_entries: 3,
            field_chars: 400,
        }
    }
}

/// Output schema bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaLimits {
    pub explanation_chars: usize,
    pub competency_text_chars: usize,
    /// Allowed distance between overall_alignment and the sub-score mean.
    pub overall_tolerance: u8,
}

impl Default for SchemaLimits {
    fn default() -> Self {
        Self {
            explanation_chars: 260,
            competency_text_chars: 160,
            overall_tolerance: 6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    /// Direct PDF text shorter than this (in characters) triggers OCR.
    pub min_direct_text_chars: usize,
    pub ocr_dpi: u32,
    /// OCR only the first N pages. None = every page.
    pub ocr_page_limit: Option<usize>,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            min_direct_text_chars: 50,
            ocr_dpi: 300,
            ocr_page_limit: None,
        }
    }
}

/// Everything the alignment engine needs, passed explicitly to its entry point.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    pub model: ModelConfig,
    pub sampling: SamplingConfig,
    pub prompt: PromptLimits,
    pub schema: SchemaLimits,
    pub extraction: ExtractionSettings,
    /// Grade band used by the competency normalizer. None = first available.
    pub grade_band: Option<String>,
}

impl AlignmentConfig {
    /// Load a (possibly partial) JSON config file. Missing fields take defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        tracing::debug!(path = %path.display(), "Loaded alignment config");
        Ok(config)
    }

    /// Apply `INSTRUCTIVE_*` environment overrides.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(model) = lookup("INSTRUCTIVE_MODEL") {
            self.model.model_name = model;
        }
        if let Some(url) = lookup("INSTRUCTIVE_OLLAMA_URL") {
            self.model.ollama_url = url;
        }
        if let Some(raw) = lookup("INSTRUCTIVE_GENERATIONS") {
            match raw.trim().parse() {
                Ok(n) => self.sampling.generations = n,
                Err(_) => tracing::warn!(value = %raw, "Ignoring non-numeric INSTRUCTIVE_GENERATIONS"),
            }
        }
        if let Some(raw) = lookup("INSTRUCTIVE_WORKERS") {
            match raw.trim().parse() {
                Ok(n) => self.sampling.workers = n,
                Err(_) => tracing::warn!(value = %raw, "Ignoring non-numeric INSTRUCTIVE_WORKERS"),
            }
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sampling.generations == 0 {
            return Err(ConfigError::Invalid("generations must be at least 1".into()));
        }
        if self.sampling.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        if self.sampling.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.sampling.call_timeout_secs == 0 {
            return Err(ConfigError::Invalid("call_timeout_secs must be positive".into()));
        }
        if self.prompt.material_chars == 0 {
            return Err(ConfigError::Invalid("prompt.material_chars must be positive".into()));
        }
        if self.model.model_name.trim().is_empty() {
            return Err(ConfigError::Invalid("model_name must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_original_constants() {
        let config = AlignmentConfig::default();
        assert_eq!(config.sampling.generations, 3);
        assert_eq!(config.prompt.material_chars, 2500);
        assert_eq!(config.prompt.indicator_lines, 8);
        assert_eq!(config.schema.overall_tolerance, 6);
        assert_eq!(config.extraction.min_direct_text_chars, 50);
        assert_eq!(config.model.options.num_predict, Some(512));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"sampling": {"generations": 5}, "grade_band": "6-9"}"#).unwrap();

        let config = AlignmentConfig::load(&path).unwrap();
        assert_eq!(config.sampling.generations, 5);
        assert_eq!(config.sampling.max_attempts, 3);
        assert_eq!(config.grade_band.as_deref(), Some("6-9"));
        assert_eq!(config.model.model_name, "phi3");
    }

    #[test]
    fn malformed_file_is_json_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(AlignmentConfig::load(&path), Err(ConfigError::Json(_))));
    }

    #[test]
    fn env_overrides_apply_and_skip_garbage() {
        let env: HashMap<&str, &str> = [
            ("INSTRUCTIVE_MODEL", "llama3:8b"),
            ("INSTRUCTIVE_GENERATIONS", "7"),
            ("INSTRUCTIVE_WORKERS", "many"),
        ]
        .into_iter()
        .collect();

        let config = AlignmentConfig::default()
            .with_overrides_from(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.model.model_name, "llama3:8b");
        assert_eq!(config.sampling.generations, 7);
        assert_eq!(config.sampling.workers, 1);
    }

    #[test]
    fn zero_generations_rejected() {
        let mut config = AlignmentConfig::default();
        config.sampling.generations = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn zero_workers_rejected() {
        let mut config = AlignmentConfig::default();
        config.sampling.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn app_name_is_instructive() {
        assert_eq!(APP_NAME, "Instructive");
    }
}
