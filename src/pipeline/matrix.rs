use serde::{Deserialize, Serialize};

/// Dense materials × entities grid of overall scores.
///
/// `matrix[i][j]` is the score of material `i` against entity `j`. A pair
/// with no result is 0, never absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreMatrix {
    pub entities: Vec<String>,
    pub materials: Vec<String>,
    pub matrix: Vec<Vec<u8>>,
    /// Per material, across entities.
    pub row_averages: Vec<f64>,
    /// Per entity, across materials.
    pub column_averages: Vec<f64>,
}

impl ScoreMatrix {
    /// Build the matrix from a score lookup keyed by (material id, entity id).
    pub fn assemble(
        entities: &[String],
        materials: &[String],
        score: impl Fn(&str, &str) -> Option<u8>,
    ) -> Self {
        let matrix: Vec<Vec<u8>> = materials
            .iter()
            .map(|m| entities.iter().map(|e| score(m, e).unwrap_or(0)).collect())
            .collect();

        let row_averages = matrix.iter().map(|row| average(row.iter().copied())).collect();
        let column_averages = (0..entities.len())
            .map(|j| average(matrix.iter().map(|row| row[j])))
            .collect();

        Self {
            entities: entities.to_vec(),
            materials: materials.to_vec(),
            matrix,
            row_averages,
            column_averages,
        }
    }
}

/// Unweighted mean rounded to two decimals; 0 for no values.
fn average(values: impl Iterator<Item = u8>) -> f64 {
    let (sum, count) = values.fold((0u64, 0u64), |(s, c), v| (s + u64::from(v), c + 1));
    if count == 0 {
        return 0.0;
    }
    round2(sum as f64 / count as f64)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
