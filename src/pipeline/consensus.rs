//! Consensus builder: N independent samples, one consolidation pass, and a
//! deterministic statistical fallback.
//!
//! Per work unit the state runs SAMPLING → CONSENSUS → FINALIZED. Every model
//! request is retried at most `max_attempts` times, so a unit always
//! terminates with a result even when the model never produces valid JSON.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use super::llm::{generate_with_timeout, LlmClient, LlmError};
use crate::config::{GenerationOptions, ModelConfig, SamplingConfig};

/// Parses, validates and merges one kind of model response.
pub trait ResponseSchema {
    type Output: Clone + Serialize;

    /// Parse and enforce one raw response. `None` means re-request.
    fn accept(&self, raw: &str) -> Option<Self::Output>;

    /// Whether an accepted consolidation covers everything expected.
    fn is_complete(&self, output: &Self::Output) -> bool;

    /// Deterministic merge of accepted candidates (never called with none).
    fn fallback(&self, candidates: &[Self::Output]) -> Self::Output;

    /// Result used when no candidate was ever accepted.
    fn empty(&self) -> Self::Output;
}

/// How the final result of a work unit was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizedBy {
    /// The consolidation response was accepted and complete.
    Consensus,
    /// Only one candidate survived sampling; it is the result.
    SingleCandidate,
    /// Consolidation failed or was incomplete; candidates were merged.
    Fallback,
    /// No candidate survived; the empty result was used.
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct ConsensusOutcome<T> {
    pub result: T,
    pub finalized_by: FinalizedBy,
    /// Samples requested (N).
    pub requested: u32,
    /// Samples that parsed and passed the schema.
    pub accepted: u32,
    /// Model requests that failed or were rejected, consolidation included.
    pub failed_attempts: u32,
}

/// Runs the sampling/consolidation state machine against a model.
pub struct ConsensusBuilder {
    llm: Arc<dyn LlmClient>,
    model: String,
    options: GenerationOptions,
    sampling: SamplingConfig,
}

impl ConsensusBuilder {
    pub fn new(llm: Arc<dyn LlmClient>, model: &ModelConfig, sampling: &SamplingConfig) -> Self {
        Self {
            llm,
            model: model.model_name.clone(),
            options: model.options.clone(),
            sampling: sampling.clone(),
        }
    }

    /// Evaluate one work unit.
    ///
    /// `prompt` is sent N times unchanged. `consolidation_prompt` receives
    /// the accepted candidates serialized as JSON.
    pub fn run<S: ResponseSchema>(
        &self,
        schema: &S,
        prompt: &str,
        consolidation_prompt: impl FnOnce(&[String]) -> String,
    ) -> ConsensusOutcome<S::Output> {
        let start = Instant::now();
        let requested = self.sampling.generations;
        let mut failed_attempts = 0;

        // SAMPLING
        let mut candidates = Vec::with_capacity(requested as usize);
        for generation in 0..requested {
            match self.request(schema, prompt, &mut failed_attempts) {
                Some(candidate) => candidates.push(candidate),
                None => tracing::warn!(generation, "Sample exhausted its attempts"),
            }
        }
        let accepted = candidates.len() as u32;

        let (result, finalized_by) = match candidates.len() {
            0 => (schema.empty(), FinalizedBy::Exhausted),
            1 => (candidates.remove(0), FinalizedBy::SingleCandidate),
            _ => self.consolidate(schema, &candidates, consolidation_prompt, &mut failed_attempts),
        };

        tracing::info!(
            requested,
            accepted,
            failed_attempts,
            finalized_by = ?finalized_by,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Work unit finalized"
        );

        ConsensusOutcome {
            result,
            finalized_by,
            requested,
            accepted,
            failed_attempts,
        }
    }

    // CONSENSUS → FINALIZED
    fn consolidate<S: ResponseSchema>(
        &self,
        schema: &S,
        candidates: &[S::Output],
        consolidation_prompt: impl FnOnce(&[String]) -> String,
        failed_attempts: &mut u32,
    ) -> (S::Output, FinalizedBy) {
        let blobs: Vec<String> = candidates
            .iter()
            .filter_map(|c| serde_json::to_string(c).ok())
            .collect();
        let prompt = consolidation_prompt(&blobs);

        match self.request(schema, &prompt, failed_attempts) {
            Some(merged) if schema.is_complete(&merged) => (merged, FinalizedBy::Consensus),
            Some(_) => {
                tracing::warn!("Consolidated response incomplete, merging candidates");
                (schema.fallback(candidates), FinalizedBy::Fallback)
            }
            None => {
                tracing::warn!("Consolidation exhausted its attempts, merging candidates");
                (schema.fallback(candidates), FinalizedBy::Fallback)
            }
        }
    }

    /// One logical request: up to `max_attempts` model calls until a
    /// response passes the schema.
    fn request<S: ResponseSchema>(
        &self,
        schema: &S,
        prompt: &str,
        failed_attempts: &mut u32,
    ) -> Option<S::Output> {
        for attempt in 1..=self.sampling.max_attempts {
            match self.call(prompt) {
                Ok(raw) => {
                    if let Some(output) = schema.accept(&raw) {
                        return Some(output);
                    }
                    tracing::debug!(
                        attempt,
                        preview = %preview(&raw),
                        "Model response rejected by schema"
                    );
                }
                Err(e) => tracing::warn!(attempt, error = %e, "Model call failed"),
            }
            *failed_attempts += 1;
        }
        None
    }

    fn call(&self, prompt: &str) -> Result<String, LlmError> {
        let raw = generate_with_timeout(
            &self.llm,
            &self.model,
            prompt,
            &self.options,
            self.sampling.call_timeout(),
        )?;
        if raw.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(raw)
    }
}

/// Bounded single-line preview of model output for debug logs.
fn preview(raw: &str) -> String {
    let flat = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    super::prompt::truncate_chars(&flat, 120)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchemaLimits;
    use crate::models::{CompetencyEntry, StudentEvaluation};
    use crate::pipeline::llm::ScriptedLlmClient;
    use crate::pipeline::schema::{CompetencySchema, StudentSchema};

    fn student_json(score: u8, explanation: &str) -> String {
        format!(
            r#"{{"understanding_fit": {score}, "accessibility_fit": {score}, "accommodation_fit": {score}, "engagement_fit": {score}, "overall_alignment": {score}, "explanation": "{explanation}"}}"#
        )
    }

    fn builder(client: &Arc<ScriptedLlmClient>, generations: u32) -> ConsensusBuilder {
        let sampling = SamplingConfig {
            generations,
            max_attempts: 2,
            call_timeout_secs: 5,
            workers: 1,
        };
        let llm: Arc<dyn LlmClient> = client.clone();
        ConsensusBuilder::new(llm, &ModelConfig::default(), &sampling)
    }

    fn consolidation(blobs: &[String]) -> String {
        format!("CONSOLIDATE\n{}", blobs.join("\n\n"))
    }

    #[test]
    fn consolidation_result_is_used_when_valid() {
        let client = Arc::new(ScriptedLlmClient::from_responses([
            student_json(60, "a"),
            student_json(70, "b"),
            student_json(80, "c"),
            student_json(72, "consolidated"),
        ]));
        let schema = StudentSchema::new(SchemaLimits::default());
        let outcome = builder(&client, 3).run(&schema, "PROMPT", consolidation);

        assert_eq!(outcome.finalized_by, FinalizedBy::Consensus);
        assert_eq!(outcome.result.overall_alignment, 72);
        assert_eq!(outcome.result.explanation, "consolidated");
        assert_eq!(outcome.accepted, 3);
        assert_eq!(outcome.failed_attempts, 0);

        let prompts = client.prompts();
        assert_eq!(prompts.len(), 4);
        assert!(prompts[..3].iter().all(|p| p == "PROMPT"));
        assert!(prompts[3].starts_with("CONSOLIDATE"));
        assert!(prompts[3].contains(r#""explanation":"b""#));
    }

    #[test]
    fn malformed_samples_are_retried_within_bound() {
        let client = Arc::new(ScriptedLlmClient::new(vec![
            Ok("not json".into()),
            Ok(student_json(50, "second try")),
            Err(LlmError::Connection("x".into())),
            Err(LlmError::EmptyResponse),
        ]));
        let schema = StudentSchema::new(SchemaLimits::default());
        let outcome = builder(&client, 2).run(&schema, "P", consolidation);

        // First sample succeeds on retry, second exhausts both attempts.
        assert_eq!(outcome.finalized_by, FinalizedBy::SingleCandidate);
        assert_eq!(outcome.result.explanation, "second try");
        assert_eq!(outcome.accepted, 1);
        assert_eq!(outcome.failed_attempts, 3);
        assert_eq!(client.call_count(), 4);
    }

    #[test]
    fn never_valid_model_terminates_with_empty_result() {
        let client = Arc::new(ScriptedLlmClient::new(vec![]).with_fallback("I cannot help with that."));
        let schema = StudentSchema::new(SchemaLimits::default());
        let outcome = builder(&client, 3).run(&schema, "P", consolidation);

        assert_eq!(outcome.finalized_by, FinalizedBy::Exhausted);
        assert_eq!(outcome.result, StudentEvaluation::default());
        assert_eq!(client.call_count(), 6);
        assert_eq!(outcome.failed_attempts, 6);
    }

    #[test]
    fn failed_consolidation_falls_back_deterministically() {
        let run = || {
            let client = Arc::new(
                ScriptedLlmClient::from_responses([
                    student_json(40, ""),
                    student_json(90, "Clear steps."),
                    student_json(60, "Other."),
                ])
                .with_fallback("garbage"),
            );
            let schema = StudentSchema::new(SchemaLimits::default());
            builder(&client, 3).run(&schema, "P", consolidation)
        };
        let first = run();
        let second = run();

        assert_eq!(first.finalized_by, FinalizedBy::Fallback);
        assert_eq!(first.result.overall_alignment, 60);
        assert_eq!(first.result.explanation, "Clear steps.");
        assert_eq!(first.failed_attempts, 2);
        assert_eq!(
            serde_json::to_string(&first.result).unwrap(),
            serde_json::to_string(&second.result).unwrap()
        );
    }

    #[test]
    fn incomplete_competency_consolidation_is_discarded() {
        let client = Arc::new(ScriptedLlmClient::from_responses([
            r#"[{"id": "a", "alignment_score": 30, "evidence": "e1", "recommendation": "r1"},
                {"id": "b", "alignment_score": 50, "evidence": "", "recommendation": "r2"}]"#,
            r#"[{"id": "a", "alignment_score": 70, "evidence": "", "recommendation": "r1"}]"#,
            r#"[{"id": "a", "alignment_score": 99, "evidence": "x", "recommendation": "y"}]"#,
        ]));
        let schema = CompetencySchema::new(vec!["a".into(), "b".into()], SchemaLimits::default());
        let outcome = builder(&client, 2).run(&schema, "P", consolidation);

        assert_eq!(outcome.finalized_by, FinalizedBy::Fallback);
        assert_eq!(
            outcome.result,
            vec![
                CompetencyEntry {
                    id: "a".into(),
                    alignment_score: 30,
                    evidence: "e1".into(),
                    recommendation: "r1".into(),
                },
                CompetencyEntry {
                    id: "b".into(),
                    alignment_score: 50,
                    evidence: String::new(),
                    recommendation: "r2".into(),
                },
            ]
        );
    }

    #[test]
    fn preview_is_bounded_and_flat() {
        let p = preview(&"line\n".repeat(100));
        assert!(p.chars().count() <= 120);
        assert!(!p.contains('\n'));
    }
}
