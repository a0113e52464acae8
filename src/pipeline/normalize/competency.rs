use std::collections::HashSet;

use serde_json::{Map, Value};

use super::{value_text, NormalizeError};
use crate::models::CompetencyRequirement;

/// Band label recorded when indicators were unioned across every band.
pub const ALL_BANDS: &str = "all";

/// Lowercase identifier fragment: runs of non-alphanumerics collapse to `_`.
pub fn slug(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_sep = false;
    for c in s.chars() {
        if c.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.extend(c.to_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

/// Normalize one competency document of either accepted shape.
///
/// - Directive list: `{directives: [{id|code|title, title, description, ...}]}`
///   (or a bare array of directives); each directive becomes one entity.
/// - Curriculum schema: `{subject, grade_bands: {band: {criteria_categories:
///   {category: {description, grades: {grade: [statements]}}}}}}`; each
///   category becomes one entity.
pub fn normalize_competency_document(
    raw: &Value,
    grade_band: Option<&str>,
) -> Result<Vec<CompetencyRequirement>, NormalizeError> {
    match raw {
        Value::Array(items) => Ok(directive_list(items, "")),
        Value::Object(doc) => {
            let subject = doc.get("subject").map(value_text).unwrap_or_default();
            if let Some(directives) = doc.get("directives") {
                let items = directives.as_array().ok_or_else(|| {
                    NormalizeError::Structure("`directives` must be an array".into())
                })?;
                return Ok(directive_list(items, &subject));
            }
            match doc.get("grade_bands") {
                Some(Value::Object(bands)) => Ok(curriculum_schema(&subject, bands, grade_band)),
                Some(_) => Err(NormalizeError::Structure("`grade_bands` must be an object".into())),
                None => Err(NormalizeError::Structure(
                    "document has neither `directives` nor `grade_bands`".into(),
                )),
            }
        }
        _ => Err(NormalizeError::Structure(
            "competency document must be a JSON object or array".into(),
        )),
    }
}

fn directive_list(items: &[Value], subject: &str) -> Vec<CompetencyRequirement> {
    items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| {
            let Some(d) = item.as_object() else {
                tracing::warn!(index, "Directive is not an object, skipping");
                return None;
            };
            let text = |key: &str| d.get(key).map(value_text).unwrap_or_default();
            let first_of = |keys: &[&str]| {
                keys.iter()
                    .map(|k| text(k))
                    .find(|v| !v.is_empty())
                    .unwrap_or_default()
            };

            let id = first_of(&["id", "code", "title"]);
            if id.is_empty() {
                tracing::warn!(index, "Directive has no id, code or title, skipping");
                return None;
            }
            let subject = match text("subject") {
                s if s.is_empty() => subject.to_string(),
                s => s,
            };
            let indicators = d
                .get("indicators")
                .and_then(Value::as_array)
                .map(|list| list.iter().map(value_text).filter(|s| !s.is_empty()).collect())
                .unwrap_or_default();

            Some(CompetencyRequirement {
                title: first_of(&["title", "id"]),
                id,
                description: text("description"),
                indicators,
                subject,
                grade_band: first_of(&["grade_band", "grades"]),
            })
        })
        .collect()
}

fn curriculum_schema(
    subject: &str,
    bands: &Map<String, Value>,
    requested: Option<&str>,
) -> Vec<CompetencyRequirement> {
    let subject = if subject.is_empty() { "Unknown Subject" } else { subject };

    let chosen: Option<&str> = match requested {
        Some(band) if bands.contains_key(band) => Some(band),
        Some(band) => {
            tracing::warn!(grade_band = %band, "Requested grade band not found, unioning all bands");
            None
        }
        None => bands.keys().next().map(String::as_str),
    };

    // Chosen band's categories first, then those found only in other bands.
    let mut order: Vec<&str> = Vec::new();
    let mut seen = HashSet::new();
    let band_order = chosen.into_iter().chain(bands.keys().map(String::as_str));
    for band in band_order {
        for category in categories_of(bands, band).into_iter().flat_map(|c| c.keys()) {
            if seen.insert(category.as_str()) {
                order.push(category.as_str());
            }
        }
    }

    order
        .into_iter()
        .map(|category| {
            let in_chosen = chosen
                .and_then(|b| categories_of(bands, b))
                .and_then(|cats| cats.get(category));

            let (indicators, band_label, description) = match in_chosen {
                Some(entry) => (
                    statements(entry),
                    chosen.unwrap_or(ALL_BANDS).to_string(),
                    entry.get("description").map(value_text).unwrap_or_default(),
                ),
                None => {
                    let entries: Vec<&Value> = bands
                        .keys()
                        .filter_map(|b| categories_of(bands, b)?.get(category))
                        .collect();
                    let mut unioned = Vec::new();
                    for entry in &entries {
                        unioned.extend(statements(entry));
                    }
                    let description = entries
                        .iter()
                        .filter_map(|e| e.get("description").map(value_text))
                        .find(|d| !d.is_empty())
                        .unwrap_or_default();
                    (dedupe(unioned), ALL_BANDS.to_string(), description)
                }
            };

            CompetencyRequirement {
                id: format!("{}_{}", slug(subject), slug(category)),
                title: category.to_string(),
                description,
                indicators,
                subject: subject.to_string(),
                grade_band: band_label,
            }
        })
        .collect()
}

fn categories_of<'a>(bands: &'a Map<String, Value>, band: &str) -> Option<&'a Map<String, Value>> {
    bands
        .get(band)?
        .as_object()?
        .get("criteria_categories")?
        .as_object()
}

/// Statements of one category entry, grade by grade, de-duplicated.
fn statements(entry: &Value) -> Vec<String> {
    let mut out = Vec::new();
    match entry.get("grades") {
        Some(Value::Object(grades)) => {
            for list in grades.values() {
                match list {
                    Value::Array(items) => out.extend(items.iter().map(value_text)),
                    other => out.push(value_text(other)),
                }
            }
        }
        Some(Value::Array(items)) => out.extend(items.iter().map(value_text)),
        _ => {}
    }
    dedupe(out.into_iter().filter(|s| !s.is_empty()).collect())
}

/// Order-preserving de-duplication.
fn dedupe(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|s| seen.insert(s.clone())).collect()
}
