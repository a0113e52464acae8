//! Pipeline orchestrator: extraction and normalization once, then every work
//! unit through the consensus builder, then matrix and summary assembly.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;

use super::consensus::ConsensusBuilder;
use super::extraction::{collect_materials, DocumentExtractor};
use super::llm::LlmClient;
use super::matrix::ScoreMatrix;
use super::normalize::{load_competencies, load_students};
use super::prompt::{competency_consensus_prompt, competency_prompt, student_consensus_prompt, student_prompt};
use super::schema::{CompetencySchema, StudentSchema};
use super::summary::{summarize_units, unit_ids, OrderedTable, UnitSummary};
use super::workers::{run_bounded, CancelFlag};
use crate::config::AlignmentConfig;
use crate::models::{
    CompetencyEntry, CompetencyEvaluation, CompetencyRequirement, MaterialText, Scored, StudentEvaluation,
    StudentRequirement,
};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Alignment run cancelled")]
    Cancelled,

    #[error("I/O error writing payload: {0}")]
    Io(#[from] std::io::Error),

    #[error("Payload serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    Student,
    Competency,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayloadMeta {
    pub variant: Variant,
    pub entities: Vec<String>,
    pub materials: Vec<String>,
    pub units: Vec<String>,
    pub generations: u32,
}

/// The handoff surface to persistence and reporting.
#[derive(Debug, Clone, Serialize)]
pub struct AlignmentPayload<T> {
    pub meta: PayloadMeta,
    pub matrix: ScoreMatrix,
    /// `material id → entity id → evaluation`.
    pub details: OrderedTable<T>,
    pub unit_summary: UnitSummary,
}

pub type StudentPayload = AlignmentPayload<StudentEvaluation>;
pub type CompetencyPayload = AlignmentPayload<CompetencyEvaluation>;

impl<T: Serialize> AlignmentPayload<T> {
    /// Write pretty JSON via a temporary sibling file and a rename, so a
    /// reader never sees a half-written payload.
    pub fn write(&self, path: &Path) -> Result<(), PipelineError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        tracing::info!(path = %path.display(), "Payload written");
        Ok(())
    }
}

/// Assemble a payload from finalized details. Pure.
pub fn build_payload<T: Scored>(
    variant: Variant,
    entities: Vec<String>,
    materials: &[MaterialText],
    details: OrderedTable<T>,
    generations: u32,
) -> AlignmentPayload<T> {
    let material_ids: Vec<String> = materials.iter().map(|m| m.id.clone()).collect();
    let matrix = ScoreMatrix::assemble(&entities, &material_ids, |m, e| {
        details.get(m, e).map(Scored::overall)
    });
    let unit_summary = summarize_units(materials, &entities, &details);

    AlignmentPayload {
        meta: PayloadMeta {
            variant,
            entities,
            materials: material_ids,
            units: unit_ids(materials),
            generations,
        },
        matrix,
        details,
        unit_summary,
    }
}

pub struct AlignmentPipeline {
    llm: Arc<dyn LlmClient>,
    extractor: DocumentExtractor,
    config: AlignmentConfig,
    cancel: CancelFlag,
}

impl AlignmentPipeline {
    pub fn new(llm: Arc<dyn LlmClient>, extractor: DocumentExtractor, config: AlignmentConfig) -> Self {
        Self {
            llm,
            extractor,
            config,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    fn consensus(&self) -> ConsensusBuilder {
        ConsensusBuilder::new(Arc::clone(&self.llm), &self.config.model, &self.config.sampling)
    }

    fn empty_payload<T: Scored>(&self, variant: Variant) -> AlignmentPayload<T> {
        build_payload(variant, Vec::new(), &[], OrderedTable::new(), self.config.sampling.generations)
    }

    /// Evaluate every (student, material) pair.
    pub fn run_students(
        &self,
        students: &[StudentRequirement],
        materials: &[MaterialText],
    ) -> Result<StudentPayload, PipelineError> {
        if students.is_empty() || materials.is_empty() {
            tracing::warn!(
                students = students.len(),
                materials = materials.len(),
                "Nothing to evaluate"
            );
            return Ok(self.empty_payload(Variant::Student));
        }

        let start = Instant::now();
        let consensus = self.consensus();
        let schema = StudentSchema::new(self.config.schema.clone());
        let limits = &self.config.prompt;

        // Material-major, matching the row order of the details table.
        let pairs: Vec<(&MaterialText, &StudentRequirement)> = materials
            .iter()
            .flat_map(|m| students.iter().map(move |s| (m, s)))
            .collect();

        let results = run_bounded(&pairs, self.config.sampling.workers, &self.cancel, |_, &(material, student)| {
            let _span = tracing::info_span!(
                "evaluate_pair",
                material_id = %material.id,
                entity_id = %student.id
            )
            .entered();
            let prompt = student_prompt(student, material, limits);
            consensus
                .run(&schema, &prompt, |blobs| {
                    student_consensus_prompt(student, material, blobs, limits)
                })
                .result
        })
        .ok_or(PipelineError::Cancelled)?;

        let mut details = OrderedTable::new();
        let mut results = results.into_iter();
        for material in materials {
            let cells = students
                .iter()
                .map(|s| (s.id.clone(), results.next().unwrap_or_default()))
                .collect();
            details.push_row(material.id.clone(), cells);
        }

        tracing::info!(
            students = students.len(),
            materials = materials.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Student alignment run complete"
        );

        let entities = students.iter().map(|s| s.id.clone()).collect();
        Ok(build_payload(
            Variant::Student,
            entities,
            materials,
            details,
            self.config.sampling.generations,
        ))
    }

    /// Evaluate each material against all competencies in one array response.
    pub fn run_competencies(
        &self,
        competencies: &[CompetencyRequirement],
        materials: &[MaterialText],
    ) -> Result<CompetencyPayload, PipelineError> {
        if competencies.is_empty() || materials.is_empty() {
            tracing::warn!(
                competencies = competencies.len(),
                materials = materials.len(),
                "Nothing to evaluate"
            );
            return Ok(self.empty_payload(Variant::Competency));
        }

        let start = Instant::now();
        let consensus = self.consensus();
        let ids: Vec<String> = competencies.iter().map(|c| c.id.clone()).collect();
        let schema = CompetencySchema::new(ids.clone(), self.config.schema.clone());
        let limits = &self.config.prompt;

        let results = run_bounded(materials, self.config.sampling.workers, &self.cancel, |_, material| {
            let _span = tracing::info_span!(
                "evaluate_material",
                material_id = %material.id,
                competencies = competencies.len()
            )
            .entered();
            let prompt = competency_prompt(competencies, material, limits);
            let outcome = consensus.run(&schema, &prompt, |blobs| {
                competency_consensus_prompt(competencies, material, blobs)
            });
            schema.align(&outcome.result)
        })
        .ok_or(PipelineError::Cancelled)?;

        let mut details = OrderedTable::new();
        for (material, entries) in materials.iter().zip(results) {
            let cells = entries.into_iter().map(CompetencyEntry::into_evaluation).collect();
            details.push_row(material.id.clone(), cells);
        }

        tracing::info!(
            competencies = competencies.len(),
            materials = materials.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Competency alignment run complete"
        );

        Ok(build_payload(
            Variant::Competency,
            ids,
            materials,
            details,
            self.config.sampling.generations,
        ))
    }

    /// Load students from a directory and materials from a path, then run.
    pub fn run_student_dirs(&self, students_dir: &Path, materials_root: &Path) -> Result<StudentPayload, PipelineError> {
        let students = load_students(students_dir, &self.extractor).unwrap_or_else(|e| {
            tracing::error!(dir = %students_dir.display(), error = %e, "Could not load students");
            Vec::new()
        });
        let materials = collect_materials(materials_root, &self.extractor);
        self.run_students(&students, &materials)
    }

    /// Load competencies from directive files and materials from a path, then run.
    pub fn run_competency_files(
        &self,
        directive_files: &[PathBuf],
        materials_root: &Path,
    ) -> Result<CompetencyPayload, PipelineError> {
        let competencies = load_competencies(directive_files, self.config.grade_band.as_deref());
        let materials = collect_materials(materials_root, &self.extractor);
        self.run_competencies(&competencies, &materials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractionSettings;
    use crate::pipeline::llm::{LlmError, MockLlmClient, ScriptedLlmClient};

    const STUDENT_RESPONSE: &str = r#"{"understanding_fit": 80, "accessibility_fit": 70, "accommodation_fit": 60, "engagement_fit": 50, "overall_alignment": 65, "explanation": "Good fit."}"#;

    fn student(id: &str) -> StudentRequirement {
        StudentRequirement {
            id: id.into(),
            name: id.into(),
            grade: "7".into(),
            designation: String::new(),
            strengths: String::new(),
            challenges: String::new(),
            education_goals: vec![],
            accommodations: vec![],
        }
    }

    fn competency(id: &str) -> CompetencyRequirement {
        CompetencyRequirement {
            id: id.into(),
            title: id.into(),
            description: format!("{id} description"),
            indicators: vec![],
            subject: "Math".into(),
            grade_band: "6-9".into(),
        }
    }

    fn materials() -> Vec<MaterialText> {
        vec![
            MaterialText::new("unit1_a.pdf", "a.pdf", "Ratios worksheet").with_group("unit1"),
            MaterialText::new("unit2_a.pdf", "a.pdf", "").with_group("unit2"),
        ]
    }

    fn config(generations: u32, workers: usize) -> AlignmentConfig {
        let mut config = AlignmentConfig::default();
        config.sampling.generations = generations;
        config.sampling.max_attempts = 2;
        config.sampling.call_timeout_secs = 5;
        config.sampling.workers = workers;
        config
    }

    fn pipeline(llm: Arc<dyn LlmClient>, config: AlignmentConfig) -> AlignmentPipeline {
        AlignmentPipeline::new(llm, DocumentExtractor::new(ExtractionSettings::default()), config)
    }

    #[test]
    fn student_run_is_dense_and_ordered() {
        let llm = Arc::new(MockLlmClient::new(STUDENT_RESPONSE));
        let payload = pipeline(llm, config(1, 3))
            .run_students(&[student("Maya"), student("Leo")], &materials())
            .unwrap();

        assert_eq!(payload.meta.entities, vec!["Maya", "Leo"]);
        assert_eq!(payload.meta.materials, vec!["unit1_a.pdf", "unit2_a.pdf"]);
        assert_eq!(payload.meta.units, vec!["unit1", "unit2"]);
        assert_eq!(payload.matrix.matrix, vec![vec![65, 65], vec![65, 65]]);
        // Empty-text material still has an entry for every student.
        let cell = payload.details.get("unit2_a.pdf", "Leo").unwrap();
        assert_eq!(cell.explanation, "Good fit.");
    }

    #[test]
    fn empty_text_material_is_scored_not_dropped() {
        let response = r#"{"understanding_fit": 0, "accessibility_fit": 5, "accommodation_fit": 0, "engagement_fit": 0, "overall_alignment": 1, "explanation": "No worksheet content."}"#;
        let llm = Arc::new(ScriptedLlmClient::new(vec![Ok(response.to_string())]));
        let blank = vec![MaterialText::new("unit3_scan.pdf", "scan.pdf", "").with_group("unit3")];
        let payload = pipeline(llm.clone(), config(1, 1))
            .run_students(&[student("Maya")], &blank)
            .unwrap();

        assert_eq!(payload.meta.materials, vec!["unit3_scan.pdf"]);
        assert_eq!(payload.matrix.matrix, vec![vec![1]]);
        let cell = payload.details.get("unit3_scan.pdf", "Maya").unwrap();
        assert_eq!(cell.explanation, "No worksheet content.");
        assert_eq!(payload.unit_summary.get("unit3", "Maya").unwrap().average_score, 1);
        assert_eq!(llm.prompts().len(), 1);
    }

    #[test]
    fn failing_model_degrades_cells_to_zero() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![Err(LlmError::Connection("x".into()))]));
        let payload = pipeline(llm, config(2, 1))
            .run_students(&[student("Maya")], &materials())
            .unwrap();

        assert_eq!(payload.matrix.matrix, vec![vec![0], vec![0]]);
        let cell = payload.details.get("unit1_a.pdf", "Maya").unwrap();
        assert_eq!(cell, &StudentEvaluation::default());
        assert_eq!(payload.matrix.row_averages, vec![0.0, 0.0]);
    }

    #[test]
    fn empty_inputs_yield_well_formed_empty_payload() {
        let llm = Arc::new(MockLlmClient::new(STUDENT_RESPONSE));
        let p = pipeline(llm, config(1, 1));

        let payload = p.run_students(&[], &materials()).unwrap();
        assert!(payload.meta.entities.is_empty());
        assert!(payload.meta.materials.is_empty());
        assert!(payload.matrix.matrix.is_empty());

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["details"], serde_json::json!({}));
        assert_eq!(json["meta"]["variant"], "student");

        let payload = p.run_competencies(&[competency("c")], &[]).unwrap();
        assert!(payload.matrix.matrix.is_empty());
    }

    #[test]
    fn competency_run_fills_missing_ids_with_zero() {
        let response = r#"```json
[{"id": "c1", "alignment_score": 70, "evidence": "ratio tasks", "recommendation": "add visuals"}]
```"#;
        let llm = Arc::new(MockLlmClient::new(response));
        let payload = pipeline(llm, config(1, 2))
            .run_competencies(&[competency("c1"), competency("c2")], &materials())
            .unwrap();

        assert_eq!(payload.meta.variant, Variant::Competency);
        assert_eq!(payload.matrix.matrix, vec![vec![70, 0], vec![70, 0]]);
        assert_eq!(payload.matrix.column_averages, vec![70.0, 0.0]);
        let cell = payload.details.get("unit1_a.pdf", "c2").unwrap();
        assert_eq!(cell, &CompetencyEvaluation::default());

        let summary = payload.unit_summary.get("unit1", "c1").unwrap();
        assert_eq!(summary.average_score, 70);
        assert_eq!(summary.top_recommendations, vec!["add visuals"]);
    }

    #[test]
    fn repeated_runs_have_identical_shape() {
        let run = || {
            let llm = Arc::new(MockLlmClient::new(STUDENT_RESPONSE));
            pipeline(llm, config(2, 4))
                .run_students(&[student("Maya"), student("Leo")], &materials())
                .unwrap()
        };
        let (a, b) = (run(), run());
        assert_eq!(a.meta, b.meta);
        assert_eq!(a.matrix.matrix.len(), b.matrix.matrix.len());
        assert_eq!(a.matrix.entities, b.matrix.entities);
    }

    #[test]
    fn cancelled_run_is_an_error() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let llm = Arc::new(MockLlmClient::new(STUDENT_RESPONSE));
        let result = pipeline(llm, config(1, 1))
            .with_cancel(cancel)
            .run_students(&[student("Maya")], &materials());
        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }

    #[test]
    fn payload_write_replaces_file_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("reports").join("alignment.json");
        let llm = Arc::new(MockLlmClient::new(STUDENT_RESPONSE));
        let payload = pipeline(llm, config(1, 1))
            .run_students(&[student("Maya")], &materials())
            .unwrap();

        payload.write(&out).unwrap();
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(written["matrix"]["matrix"][0][0], 65);
        assert_eq!(written["details"]["unit1_a.pdf"]["Maya"]["overall_alignment"], 65);
        assert!(!out.with_extension("json.tmp").exists());
    }

    #[test]
    fn directory_run_loads_sources() {
        let dir = tempfile::tempdir().unwrap();
        let students = dir.path().join("students");
        let materials = dir.path().join("materials").join("unit1");
        std::fs::create_dir_all(&students).unwrap();
        std::fs::create_dir_all(&materials).unwrap();
        std::fs::write(
            students.join("maya.json"),
            r#"{"student": {"student_name": "Maya", "grade": "7"}, "performance_progress": "Strong at pattern work."}"#,
        )
        .unwrap();
        std::fs::write(materials.join("ratios.txt"), "Ratios and rates practice.").unwrap();

        let llm = Arc::new(MockLlmClient::new(STUDENT_RESPONSE));
        let payload = pipeline(llm, config(1, 1))
            .run_student_dirs(&students, &dir.path().join("materials"))
            .unwrap();
        assert_eq!(payload.meta.entities, vec!["Maya"]);
        assert_eq!(payload.meta.materials, vec!["unit1_ratios.txt"]);
    }
}
