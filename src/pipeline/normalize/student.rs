use serde_json::Value;

use super::{value_text, NormalizeError};
use crate::models::StudentRequirement;

const PATTERN_STRENGTH: &str = "demonstrates strengths in pattern recognition and problem-solving";
const MATH_SCIENCE_STRENGTH: &str =
    "strong understanding in math and science when instructions are broken down";
const SENSORY_CHALLENGE: &str = "sensitivity to sensory input and difficulty with unexpected changes";
const ATTENTION_CHALLENGE: &str = "challenges with attention and impulsivity";

/// Coarse keyword summary of a performance narrative: (strengths, challenges).
///
/// Approximate by nature. Never fails; either side may be empty.
pub fn summarize_performance(performance: &str) -> (String, String) {
    let perf = performance.trim();
    let lower = perf.to_lowercase();
    let mentions = |words: &[&str]| words.iter().any(|w| lower.contains(w));

    let mut strengths: Vec<&str> = Vec::new();
    let mut challenges: Vec<&str> = Vec::new();

    if mentions(&["problem", "pattern"]) {
        strengths.push(PATTERN_STRENGTH);
    }
    if mentions(&["math", "science"]) {
        strengths.push(MATH_SCIENCE_STRENGTH);
    }
    if mentions(&["overwhelm", "noise"]) {
        challenges.push(SENSORY_CHALLENGE);
    }
    if mentions(&["impulsivity", "attention"]) {
        challenges.push(ATTENTION_CHALLENGE);
    }

    let first_sentence = perf.split('.').next().unwrap_or("").trim();
    if strengths.is_empty() && !perf.is_empty() {
        strengths.push(first_sentence);
    }
    if challenges.is_empty() && !perf.is_empty() && mentions(&["strug", "challeng"]) {
        challenges.push(first_sentence);
    }

    let join = |parts: &[&str]| {
        parts
            .iter()
            .filter(|p| !p.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ; ")
    };

    let strengths_text = join(&strengths);
    let mut challenges_text = join(&challenges);
    if challenges_text.is_empty() {
        challenges_text = perf.to_string();
    }
    (strengths_text, challenges_text)
}

/// Normalize one student record.
///
/// Shape: `{student: {student_name, grade, designation, ...}, performance_progress,
/// education_goals: {category: text}, accommodations: {category: text}}`.
pub fn normalize_student(raw: &Value) -> Result<StudentRequirement, NormalizeError> {
    let record = raw
        .as_object()
        .ok_or_else(|| NormalizeError::Structure("student record is not a JSON object".into()))?;

    let student = match record.get("student") {
        None | Some(Value::Null) => serde_json::Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => {
            return Err(NormalizeError::Structure("`student` must be an object".into()));
        }
    };

    let field = |key: &str| student.get(key).map(value_text).unwrap_or_default();

    let name = match field("student_name") {
        n if n.is_empty() => "Unknown".to_string(),
        n => n,
    };

    let performance = record.get("performance_progress").map(value_text).unwrap_or_default();
    let (strengths, challenges) = summarize_performance(&performance);

    Ok(StudentRequirement {
        id: name.clone(),
        name,
        grade: field("grade"),
        designation: field("designation"),
        strengths,
        challenges,
        education_goals: category_pairs(record.get("education_goals"), "education_goals")?,
        accommodations: category_pairs(record.get("accommodations"), "accommodations")?,
    })
}

/// `{category: text}` in document order. A bare string becomes one `general` entry.
fn category_pairs(value: Option<&Value>, field: &str) -> Result<Vec<(String, String)>, NormalizeError> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Object(map)) => Ok(map
            .iter()
            .map(|(k, v)| (k.clone(), value_text(v)))
            .collect()),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(vec![("general".to_string(), s.trim().to_string())]),
        Some(_) => Err(NormalizeError::Structure(format!(
            "`{field}` must be an object of category → text"
        ))),
    }
}
