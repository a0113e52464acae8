use serde::{Deserialize, Serialize};

/// A student's IEP-derived needs, normalized for prompt compilation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentRequirement {
    /// Matrix key. The student name, disambiguated when two records share one.
    pub id: String,
    pub name: String,
    pub grade: String,
    pub designation: String,
    /// Heuristic summary of the performance narrative. Never scored.
    pub strengths: String,
    pub challenges: String,
    /// (category, goal text) in document order.
    pub education_goals: Vec<(String, String)>,
    /// (category, accommodation text) in document order.
    pub accommodations: Vec<(String, String)>,
}

/// One curriculum competency category with its grade-appropriate indicators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetencyRequirement {
    pub id: String,
    pub title: String,
    pub description: String,
    pub indicators: Vec<String>,
    pub subject: String,
    /// Band the indicators were taken from, or "all" when they were unioned.
    pub grade_band: String,
}

/// Make identifiers unique in load order: the second "Maya" becomes "Maya (2)".
///
/// Deterministic for a given input order, so repeated runs produce the same keys.
pub fn disambiguate_ids<'a>(ids: impl IntoIterator<Item = &'a mut String>) {
    let mut seen: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    let mut taken: std::collections::HashSet<String> = std::collections::HashSet::new();

    for id in ids {
        let count = seen.entry(id.clone()).or_insert(0);
        *count += 1;
        if *count > 1 || taken.contains(id.as_str()) {
            let mut n = (*count).max(2);
            let mut candidate = format!("{id} ({n})");
            while taken.contains(&candidate) {
                n += 1;
                candidate = format!("{id} ({n})");
            }
            tracing::warn!(original = %id, renamed = %candidate, "Duplicate identifier");
            *id = candidate;
        }
        taken.insert(id.clone());
    }
}
