pub mod student;
pub mod competency;
pub mod iep_form;

pub use student::*;
pub use competency::*;
pub use iep_form::*;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;

use crate::models::{disambiguate_ids, CompetencyRequirement, StudentRequirement};
use crate::pipeline::extraction::{DocumentExtractor, DocumentFormat};

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unrecognized document structure: {0}")]
    Structure(String),
}

/// Flatten a JSON value into prompt-ready text.
pub(crate) fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .map(value_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("; "),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| format!("{k}: {}", value_text(v)))
            .collect::<Vec<_>>()
            .join("; "),
    }
}

/// Normalize in-memory student records, skipping any that fail.
pub fn normalize_students(docs: &[Value]) -> Vec<StudentRequirement> {
    let mut students: Vec<StudentRequirement> = docs
        .iter()
        .enumerate()
        .filter_map(|(index, doc)| match normalize_student(doc) {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!(index, error = %e, "Skipping student record");
                None
            }
        })
        .collect();
    disambiguate_ids(students.iter_mut().map(|s| &mut s.id));
    students
}

/// Normalize in-memory competency documents, skipping any that fail.
pub fn normalize_competencies(docs: &[Value], grade_band: Option<&str>) -> Vec<CompetencyRequirement> {
    let mut competencies: Vec<CompetencyRequirement> = docs
        .iter()
        .enumerate()
        .flat_map(|(index, doc)| match normalize_competency_document(doc, grade_band) {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!(index, error = %e, "Skipping competency document");
                Vec::new()
            }
        })
        .collect();
    disambiguate_ids(competencies.iter_mut().map(|c| &mut c.id));
    competencies
}

/// Read a student source file: a JSON record, or an IEP form (`.pdf`/`.txt`).
pub fn read_student_source(path: &Path, extractor: &DocumentExtractor) -> Result<Value, NormalizeError> {
    if is_json(path) {
        let raw = std::fs::read_to_string(path)?;
        return Ok(serde_json::from_str(&raw)?);
    }
    let form = parse_iep_text(&extractor.extract_text(path));
    if form.is_blank() {
        return Err(NormalizeError::Structure("no IEP fields found in form text".into()));
    }
    Ok(form.to_json())
}

/// Load every student in `dir` (sorted by file name; `index.json` is skipped).
///
/// Only an unreadable directory is an error; bad files are logged and skipped.
pub fn load_students(dir: &Path, extractor: &DocumentExtractor) -> Result<Vec<StudentRequirement>, NormalizeError> {
    let mut students = load_student_records(dir, extractor, |_| true)?;
    disambiguate_ids(students.iter_mut().map(|s| &mut s.id));
    Ok(students)
}

/// Load only students whose name matches one of `names` (case-insensitive).
pub fn load_students_by_names(
    dir: &Path,
    names: &[String],
    extractor: &DocumentExtractor,
) -> Result<Vec<StudentRequirement>, NormalizeError> {
    let wanted: HashSet<String> = names
        .iter()
        .map(|n| n.trim().to_lowercase())
        .filter(|n| !n.is_empty())
        .collect();
    if wanted.is_empty() {
        return Ok(Vec::new());
    }

    let mut students = load_student_records(dir, extractor, |raw| {
        let name = raw
            .get("student")
            .and_then(|s| s.get("student_name"))
            .map(value_text)
            .unwrap_or_default();
        wanted.contains(&name.to_lowercase())
    })?;
    disambiguate_ids(students.iter_mut().map(|s| &mut s.id));
    Ok(students)
}

fn load_student_records(
    dir: &Path,
    extractor: &DocumentExtractor,
    keep: impl Fn(&Value) -> bool,
) -> Result<Vec<StudentRequirement>, NormalizeError> {
    let mut students = Vec::new();
    for path in student_files(dir)? {
        let raw = match read_student_source(&path, extractor) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping student source");
                continue;
            }
        };
        if !keep(&raw) {
            continue;
        }
        match normalize_student(&raw) {
            Ok(student) => students.push(student),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping student record"),
        }
    }
    tracing::info!(dir = %dir.display(), count = students.len(), "Loaded students");
    Ok(students)
}

fn student_files(dir: &Path) -> Result<Vec<PathBuf>, NormalizeError> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter(|p| {
            let is_index = p
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.eq_ignore_ascii_case("index.json"));
            !is_index && (is_json(p) || DocumentFormat::detect(p).is_some())
        })
        .collect();
    files.sort();
    Ok(files)
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

/// Load competency documents from files. Unreadable or unrecognized files
/// are logged and skipped.
pub fn load_competencies(paths: &[PathBuf], grade_band: Option<&str>) -> Vec<CompetencyRequirement> {
    let docs: Vec<Value> = paths
        .iter()
        .filter_map(|path| {
            let parsed = std::fs::read_to_string(path)
                .map_err(NormalizeError::from)
                .and_then(|raw| serde_json::from_str::<Value>(&raw).map_err(NormalizeError::from));
            match parsed {
                Ok(doc) => Some(doc),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping competency document");
                    None
                }
            }
        })
        .collect();
    let competencies = normalize_competencies(&docs, grade_band);
    tracing::info!(documents = docs.len(), count = competencies.len(), "Loaded competencies");
    competencies
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractionSettings;
    use serde_json::json;

    fn extractor() -> DocumentExtractor {
        DocumentExtractor::new(ExtractionSettings::default())
    }

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn value_text_flattens() {
        assert_eq!(value_text(&json!(null)), "");
        assert_eq!(value_text(&json!(" a ")), "a");
        assert_eq!(value_text(&json!(7)), "7");
        assert_eq!(value_text(&json!(["x", "", "y"])), "x; y");
        assert_eq!(value_text(&json!({"k": "v"})), "k: v");
    }

    #[test]
    fn bad_document_does_not_abort_siblings() {
        let docs = vec![
            json!({"student": {"student_name": "Maya"}}),
            json!("not a record"),
            json!({"student": {"student_name": "Leo"}}),
        ];
        let students = normalize_students(&docs);
        let ids: Vec<&str> = students.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["Maya", "Leo"]);
    }

    #[test]
    fn duplicate_student_names_are_disambiguated() {
        let docs = vec![
            json!({"student": {"student_name": "Maya"}}),
            json!({"student": {"student_name": "Maya"}}),
        ];
        let students = normalize_students(&docs);
        assert_eq!(students[0].id, "Maya");
        assert_eq!(students[1].id, "Maya (2)");
        assert_eq!(students[1].name, "Maya");
    }

    #[test]
    fn load_students_reads_json_and_forms_and_skips_index() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.json", r#"{"student": {"student_name": "Leo"}}"#);
        write(dir.path(), "index.json", r#"[{"student": {"student_name": "Ghost"}}]"#);
        write(dir.path(), "a.txt", "STUDENT NAME: Maya\nPERFORMANCE_PROGRESS\nLoves math.");
        write(dir.path(), "broken.json", "{oops");
        write(dir.path(), "blank.txt", "\n\n");

        let students = load_students(dir.path(), &extractor()).unwrap();
        let ids: Vec<&str> = students.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["Maya", "Leo"]);
        assert!(students[0].strengths.contains("math and science"));
    }

    #[test]
    fn load_students_missing_dir_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_students(&dir.path().join("nope"), &extractor()).is_err());
    }

    #[test]
    fn load_by_names_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "1.json", r#"{"student": {"student_name": "Maya Chen"}}"#);
        write(dir.path(), "2.json", r#"{"student": {"student_name": "Leo"}}"#);

        let names = vec!["  maya chen ".to_string()];
        let students = load_students_by_names(dir.path(), &names, &extractor()).unwrap();
        assert_eq!(students.len(), 1);
        assert_eq!(students[0].name, "Maya Chen");

        assert!(load_students_by_names(dir.path(), &[" ".to_string()], &extractor())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn load_competencies_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        let good = write(
            dir.path(),
            "math.json",
            r#"{"subject": "Math", "grade_bands": {"6-9": {"criteria_categories": {"Reasoning": {"grades": {"7": ["a"]}}}}}}"#,
        );
        let bad = write(dir.path(), "bad.json", "[");
        let odd = write(dir.path(), "odd.json", r#"{"subject": "x"}"#);

        let comps = load_competencies(&[bad, good, odd, dir.path().join("missing.json")], Some("6-9"));
        assert_eq!(comps.len(), 1);
        assert_eq!(comps[0].id, "math_reasoning");
    }
}
