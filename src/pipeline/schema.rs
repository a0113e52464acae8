//! Schema enforcement for model responses.
//!
//! Turns a parsed JSON value into a clamped, bounded evaluation. Also holds
//! the deterministic merge used when consolidation fails.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use super::consensus::ResponseSchema;
use super::normalize::value_text;
use super::parser::{extract_json_array, extract_json_object};
use super::prompt::truncate_chars;
use crate::config::SchemaLimits;
use crate::models::{CompetencyEntry, StudentEvaluation};

static DIGIT_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("valid regex"));

pub const STUDENT_SCORE_KEYS: [&str; 5] = [
    "understanding_fit",
    "accessibility_fit",
    "accommodation_fit",
    "engagement_fit",
    "overall_alignment",
];

/// Coerce any JSON value to an integer score in [0, 100].
///
/// Numbers are rounded. Strings are parsed as a float, falling back to the
/// first run of digits. Anything else scores 0.
pub fn coerce_score(value: &Value) -> u8 {
    let raw = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => parse_score_text(s),
        _ => 0.0,
    };
    clamp_score(raw)
}

fn parse_score_text(s: &str) -> f64 {
    let trimmed = s.trim();
    if let Ok(v) = trimmed.parse::<f64>() {
        if v.is_finite() {
            return v;
        }
    }
    DIGIT_RUN
        .find(trimmed)
        // A digit run too long for f64 still parses (to a huge value) and clamps.
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .unwrap_or(0.0)
}

fn clamp_score(v: f64) -> u8 {
    if v.is_nan() {
        return 0;
    }
    v.round().clamp(0.0, 100.0) as u8
}

/// Collapse whitespace runs and cap the length in characters.
pub fn normalize_text(value: &Value, max_chars: usize) -> String {
    let text = value_text(value);
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&collapsed, max_chars)
}

/// Overwrite `overall_alignment` with the rounded sub-score mean when it
/// strays further than `tolerance` from it.
pub fn apply_tolerance(eval: &mut StudentEvaluation, tolerance: u8) {
    let mean = eval.sub_score_mean();
    if (f64::from(eval.overall_alignment) - mean).abs() > f64::from(tolerance) {
        let corrected = clamp_score(mean);
        tracing::debug!(
            reported = eval.overall_alignment,
            corrected,
            "Overall alignment outside tolerance, using sub-score mean"
        );
        eval.overall_alignment = corrected;
    }
}

/// Enforce the student schema on a parsed object. `None` when any expected
/// key is missing; extra keys are ignored.
pub fn enforce_student(obj: &Map<String, Value>, limits: &SchemaLimits) -> Option<StudentEvaluation> {
    if let Some(missing) = STUDENT_SCORE_KEYS
        .iter()
        .chain(std::iter::once(&"explanation"))
        .find(|k| !obj.contains_key(**k))
    {
        tracing::debug!(missing_key = *missing, "Student response rejected");
        return None;
    }

    let mut eval = StudentEvaluation {
        understanding_fit: coerce_score(&obj["understanding_fit"]),
        accessibility_fit: coerce_score(&obj["accessibility_fit"]),
        accommodation_fit: coerce_score(&obj["accommodation_fit"]),
        engagement_fit: coerce_score(&obj["engagement_fit"]),
        overall_alignment: coerce_score(&obj["overall_alignment"]),
        explanation: normalize_text(&obj["explanation"], limits.explanation_chars),
    };
    apply_tolerance(&mut eval, limits.overall_tolerance);
    Some(eval)
}

/// Enforce the competency element schema. Elements without an id or score
/// are dropped; a repeated id keeps its first occurrence.
pub fn enforce_competency_entries(items: &[Value], limits: &SchemaLimits) -> Vec<CompetencyEntry> {
    let mut seen = HashSet::new();
    let mut entries = Vec::with_capacity(items.len());

    for item in items {
        let Some(obj) = item.as_object() else {
            continue;
        };
        let id = obj.get("id").map(value_text).unwrap_or_default();
        let Some(score) = obj.get("alignment_score") else {
            continue;
        };
        if id.is_empty() || !seen.insert(id.clone()) {
            continue;
        }
        let text = |key: &str| {
            obj.get(key)
                .map(|v| normalize_text(v, limits.competency_text_chars))
                .unwrap_or_default()
        };
        entries.push(CompetencyEntry {
            alignment_score: coerce_score(score),
            evidence: text("evidence"),
            recommendation: text("recommendation"),
            id,
        });
    }
    entries
}

// ═══════════════════════════════════════════════════════════
// Deterministic merge helpers
// ═══════════════════════════════════════════════════════════

/// Median of the values, taking the lower middle element on even counts.
/// Empty input yields 0.
pub fn median_lower(values: &[u8]) -> u8 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    sorted[(sorted.len() - 1) / 2]
}

/// First non-empty string in order.
pub fn first_non_empty<'a>(values: impl IntoIterator<Item = &'a str>) -> String {
    values
        .into_iter()
        .find(|s| !s.is_empty())
        .unwrap_or_default()
        .to_string()
}

/// Non-empty strings ordered by descending frequency, ties by first appearance.
pub fn by_frequency<'a>(values: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut order: Vec<&str> = Vec::new();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for v in values.into_iter().filter(|s| !s.is_empty()) {
        let count = counts.entry(v).or_insert(0);
        if *count == 0 {
            order.push(v);
        }
        *count += 1;
    }
    // Stable sort keeps first-seen order among equal counts.
    order.sort_by(|a, b| counts[b].cmp(&counts[a]));
    order.into_iter().map(str::to_string).collect()
}

// ═══════════════════════════════════════════════════════════
// Student schema
// ═══════════════════════════════════════════════════════════

pub struct StudentSchema {
    limits: SchemaLimits,
}

impl StudentSchema {
    pub fn new(limits: SchemaLimits) -> Self {
        Self { limits }
    }
}

impl ResponseSchema for StudentSchema {
    type Output = StudentEvaluation;

    fn accept(&self, raw: &str) -> Option<StudentEvaluation> {
        match extract_json_object(raw) {
            Ok(obj) => enforce_student(&obj, &self.limits),
            Err(e) => {
                tracing::debug!(error = %e, "Student response not parseable");
                None
            }
        }
    }

    fn is_complete(&self, _output: &StudentEvaluation) -> bool {
        true
    }

    fn fallback(&self, candidates: &[StudentEvaluation]) -> StudentEvaluation {
        let median_of = |f: fn(&StudentEvaluation) -> u8| {
            median_lower(&candidates.iter().map(f).collect::<Vec<_>>())
        };
        let mut merged = StudentEvaluation {
            understanding_fit: median_of(|c| c.understanding_fit),
            accessibility_fit: median_of(|c| c.accessibility_fit),
            accommodation_fit: median_of(|c| c.accommodation_fit),
            engagement_fit: median_of(|c| c.engagement_fit),
            overall_alignment: median_of(|c| c.overall_alignment),
            explanation: first_non_empty(candidates.iter().map(|c| c.explanation.as_str())),
        };
        apply_tolerance(&mut merged, self.limits.overall_tolerance);
        merged
    }

    fn empty(&self) -> StudentEvaluation {
        StudentEvaluation::default()
    }
}

// ═══════════════════════════════════════════════════════════
// Competency schema
// ═══════════════════════════════════════════════════════════

/// Array schema for one material evaluated against several competencies.
pub struct CompetencySchema {
    expected_ids: Vec<String>,
    limits: SchemaLimits,
}

impl CompetencySchema {
    pub fn new(expected_ids: Vec<String>, limits: SchemaLimits) -> Self {
        Self { expected_ids, limits }
    }

    /// Reorder entries to the expected id order, filling gaps with empty entries.
    pub fn align(&self, entries: &[CompetencyEntry]) -> Vec<CompetencyEntry> {
        self.expected_ids
            .iter()
            .map(|id| {
                entries
                    .iter()
                    .find(|e| &e.id == id)
                    .cloned()
                    .unwrap_or_else(|| CompetencyEntry::empty(id))
            })
            .collect()
    }
}

impl ResponseSchema for CompetencySchema {
    type Output = Vec<CompetencyEntry>;

    fn accept(&self, raw: &str) -> Option<Vec<CompetencyEntry>> {
        let items = match extract_json_array(raw) {
            Ok(items) => items,
            Err(e) => {
                tracing::debug!(error = %e, "Competency response not parseable");
                return None;
            }
        };
        let entries = enforce_competency_entries(&items, &self.limits);
        if entries.is_empty() {
            tracing::debug!(elements = items.len(), "Competency response had no usable entries");
            return None;
        }
        Some(entries)
    }

    /// The id set must match the expected set exactly.
    fn is_complete(&self, output: &Vec<CompetencyEntry>) -> bool {
        let got: HashSet<&str> = output.iter().map(|e| e.id.as_str()).collect();
        let expected: HashSet<&str> = self.expected_ids.iter().map(String::as_str).collect();
        got == expected
    }

    fn fallback(&self, candidates: &[Vec<CompetencyEntry>]) -> Vec<CompetencyEntry> {
        self.expected_ids
            .iter()
            .map(|id| {
                let matches: Vec<&CompetencyEntry> = candidates
                    .iter()
                    .filter_map(|entries| entries.iter().find(|e| &e.id == id))
                    .collect();
                if matches.is_empty() {
                    return CompetencyEntry::empty(id);
                }
                let scores: Vec<u8> = matches.iter().map(|e| e.alignment_score).collect();
                CompetencyEntry {
                    id: id.clone(),
                    alignment_score: median_lower(&scores),
                    evidence: first_non_empty(matches.iter().map(|e| e.evidence.as_str())),
                    recommendation: by_frequency(matches.iter().map(|e| e.recommendation.as_str()))
                        .into_iter()
                        .next()
                        .unwrap_or_default(),
                }
            })
            .collect()
    }

    fn empty(&self) -> Vec<CompetencyEntry> {
        self.expected_ids.iter().map(|id| CompetencyEntry::empty(id)).collect()
    }
}
