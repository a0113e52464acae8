use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::types::LlmClient;
use super::LlmError;
use crate::config::GenerationOptions;

/// Run one blocking `generate` call with an explicit deadline.
///
/// The call runs on a helper thread. On timeout the helper is detached and
/// its eventual result discarded; the caller sees `LlmError::Timeout`.
pub fn generate_with_timeout(
    llm: &Arc<dyn LlmClient>,
    model: &str,
    prompt: &str,
    options: &GenerationOptions,
    timeout: Duration,
) -> Result<String, LlmError> {
    let (tx, rx) = mpsc::channel();
    let llm = Arc::clone(llm);
    let model = model.to_string();
    let prompt = prompt.to_string();
    let options = options.clone();

    let spawned = std::thread::Builder::new()
        .name("llm-call".into())
        .spawn(move || {
            let result = llm.generate(&model, &prompt, &options);
            // Receiver may be gone after a timeout.
            let _ = tx.send(result);
        });

    if let Err(e) = spawned {
        return Err(LlmError::HttpClient(format!("Failed to spawn model call thread: {e}")));
    }

    let start = Instant::now();
    match rx.recv_timeout(timeout) {
        Ok(result) => {
            tracing::trace!(elapsed_ms = start.elapsed().as_millis() as u64, "Model call returned");
            result
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            tracing::warn!(timeout_secs = timeout.as_secs(), "Model call timed out");
            Err(LlmError::Timeout(timeout))
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(LlmError::MalformedResponse(
            "model call thread exited without a result".into(),
        )),
    }
}
