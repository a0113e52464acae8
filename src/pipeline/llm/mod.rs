pub mod types;
pub mod ollama;
pub mod timeout;
pub mod mock;

pub use types::*;
pub use ollama::*;
pub use timeout::*;
pub use mock::*;

use std::time::Duration;

use thiserror::Error;

/// Failures of the model-invocation capability.
///
/// Every variant is treated the same way by the consensus builder: the
/// attempt failed and may be retried within the configured bound.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("Ollama is not running at {0}")]
    Connection(String),

    #[error("Ollama returned error (status {status}): {body}")]
    Status { status: u16, body: String },

    #[error("Model call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Model returned an empty response")]
    EmptyResponse,

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Malformed model response: {0}")]
    MalformedResponse(String),
}
