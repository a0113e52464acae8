//! Per-material detail records and per-unit summaries.

use std::collections::BTreeSet;

use serde::ser::{Serialize, SerializeMap, Serializer};

use super::schema::by_frequency;
use crate::models::{MaterialText, Scored};

/// Recommendations kept per (unit, entity).
pub const TOP_RECOMMENDATIONS: usize = 3;

/// Two-level map `outer id → inner id → value` that keeps insertion order.
///
/// Serializes as nested JSON objects.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedTable<T> {
    rows: Vec<(String, Vec<(String, T)>)>,
}

impl<T> Default for OrderedTable<T> {
    fn default() -> Self {
        Self { rows: Vec::new() }
    }
}

impl<T> OrderedTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_row(&mut self, key: impl Into<String>, cells: Vec<(String, T)>) {
        self.rows.push((key.into(), cells));
    }

    pub fn get(&self, row: &str, column: &str) -> Option<&T> {
        self.row(row)?
            .iter()
            .find(|(id, _)| id == column)
            .map(|(_, value)| value)
    }

    pub fn row(&self, row: &str) -> Option<&[(String, T)]> {
        self.rows
            .iter()
            .find(|(id, _)| id == row)
            .map(|(_, cells)| cells.as_slice())
    }

    pub fn rows(&self) -> impl Iterator<Item = (&str, &[(String, T)])> {
        self.rows.iter().map(|(id, cells)| (id.as_str(), cells.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

struct Cells<'a, T>(&'a [(String, T)]);

impl<T: Serialize> Serialize for Cells<'_, T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (id, value) in self.0 {
            map.serialize_entry(id, value)?;
        }
        map.end()
    }
}

impl<T: Serialize> Serialize for OrderedTable<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.rows.len()))?;
        for (id, cells) in &self.rows {
            map.serialize_entry(id, &Cells(cells))?;
        }
        map.end()
    }
}

/// Aggregate for one entity across the materials of one unit.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct EntitySummary {
    pub average_score: u8,
    pub top_recommendations: Vec<String>,
}

/// `unit → entity → summary`, units sorted by name.
pub type UnitSummary = OrderedTable<EntitySummary>;

/// Distinct material groups in sorted order.
pub fn unit_ids(materials: &[MaterialText]) -> Vec<String> {
    materials
        .iter()
        .map(|m| m.group.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Summarize details per unit and entity: rounded average score and the
/// most frequent distinct recommendations.
pub fn summarize_units<T: Scored>(
    materials: &[MaterialText],
    entities: &[String],
    details: &OrderedTable<T>,
) -> UnitSummary {
    let mut summary = UnitSummary::new();

    for unit in unit_ids(materials) {
        let unit_materials: Vec<&str> = materials
            .iter()
            .filter(|m| m.group == unit)
            .map(|m| m.id.as_str())
            .collect();

        let cells = entities
            .iter()
            .map(|entity| {
                let evaluations: Vec<&T> = unit_materials
                    .iter()
                    .filter_map(|m| details.get(m, entity))
                    .collect();
                let top_recommendations = by_frequency(evaluations.iter().filter_map(|e| e.recommendation()))
                    .into_iter()
                    .take(TOP_RECOMMENDATIONS)
                    .collect();
                let entry = EntitySummary {
                    average_score: rounded_mean(evaluations.iter().map(|e| e.overall())),
                    top_recommendations,
                };
                (entity.clone(), entry)
            })
            .collect();

        summary.push_row(unit, cells);
    }
    summary
}

fn rounded_mean(scores: impl Iterator<Item = u8>) -> u8 {
    let (sum, count) = scores.fold((0u32, 0u32), |(s, c), v| (s + u32::from(v), c + 1));
    if count == 0 {
        return 0;
    }
    (f64::from(sum) / f64::from(count)).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CompetencyEvaluation, StudentEvaluation};

    fn eval(score: u8, rec: &str) -> CompetencyEvaluation {
        CompetencyEvaluation {
            alignment_score: score,
            evidence: String::new(),
            recommendation: rec.into(),
        }
    }

    fn materials() -> Vec<MaterialText> {
        vec![
            MaterialText::new("unit2_a.pdf", "a.pdf", "").with_group("unit2"),
            MaterialText::new("unit1_b.pdf", "b.pdf", "").with_group("unit1"),
            MaterialText::new("unit1_c.pdf", "c.pdf", "").with_group("unit1"),
        ]
    }

    #[test]
    fn table_preserves_insertion_order_in_json() {
        let mut table = OrderedTable::new();
        table.push_row("zeta", vec![("b".to_string(), 1), ("a".to_string(), 2)]);
        table.push_row("alpha", vec![]);
        let json = serde_json::to_string(&table).unwrap();
        assert_eq!(json, r#"{"zeta":{"b":1,"a":2},"alpha":{}}"#);
        assert_eq!(table.get("zeta", "a"), Some(&2));
        assert_eq!(table.get("alpha", "a"), None);
    }

    #[test]
    fn units_are_sorted_and_distinct() {
        assert_eq!(unit_ids(&materials()), vec!["unit1", "unit2"]);
    }

    #[test]
    fn summary_averages_and_ranks_recommendations() {
        let entities = vec!["c1".to_string()];
        let mut details = OrderedTable::new();
        details.push_row("unit2_a.pdf", vec![("c1".to_string(), eval(90, "x"))]);
        details.push_row("unit1_b.pdf", vec![("c1".to_string(), eval(41, "visuals"))]);
        details.push_row("unit1_c.pdf", vec![("c1".to_string(), eval(50, ""))]);

        let summary = summarize_units(&materials(), &entities, &details);
        let unit1 = summary.get("unit1", "c1").unwrap();
        assert_eq!(unit1.average_score, 46);
        assert_eq!(unit1.top_recommendations, vec!["visuals"]);
        assert_eq!(summary.get("unit2", "c1").unwrap().average_score, 90);
    }

    #[test]
    fn at_most_three_recommendations() {
        let mats: Vec<MaterialText> = (0..5)
            .map(|i| MaterialText::new(format!("m{i}"), "t", "").with_group("u"))
            .collect();
        let recs = ["a", "b", "b", "c", "d"];
        let mut details = OrderedTable::new();
        for (m, r) in mats.iter().zip(recs) {
            details.push_row(m.id.clone(), vec![("c".to_string(), eval(10, r))]);
        }
        let summary = summarize_units(&mats, &["c".to_string()], &details);
        assert_eq!(summary.get("u", "c").unwrap().top_recommendations, vec!["b", "a", "c"]);
    }

    #[test]
    fn student_summary_has_no_recommendations() {
        let mut details = OrderedTable::new();
        let e = StudentEvaluation {
            overall_alignment: 70,
            ..Default::default()
        };
        details.push_row("unit1_b.pdf", vec![("Maya".to_string(), e)]);
        let summary = summarize_units(&materials(), &["Maya".to_string()], &details);
        let entry = summary.get("unit1", "Maya").unwrap();
        assert_eq!(entry.average_score, 70);
        assert!(entry.top_recommendations.is_empty());
        // unit2 has no detail for Maya at all
        assert_eq!(summary.get("unit2", "Maya").unwrap().average_score, 0);
    }
}
