use serde::{Deserialize, Serialize};

/// Anything that can occupy a cell of the score matrix.
pub trait Scored {
    /// Overall alignment in [0, 100].
    fn overall(&self) -> u8;

    /// Actionable suggestion, for variants that produce one.
    fn recommendation(&self) -> Option<&str> {
        None
    }
}

/// Student-variant evaluation of one (student, material) pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentEvaluation {
    pub understanding_fit: u8,
    pub accessibility_fit: u8,
    pub accommodation_fit: u8,
    pub engagement_fit: u8,
    pub overall_alignment: u8,
    pub explanation: String,
}

impl StudentEvaluation {
    pub fn sub_scores(&self) -> [u8; 4] {
        [
            self.understanding_fit,
            self.accessibility_fit,
            self.accommodation_fit,
            self.engagement_fit,
        ]
    }

    /// Exact arithmetic mean of the four sub-scores.
    pub fn sub_score_mean(&self) -> f64 {
        self.sub_scores().iter().map(|&s| f64::from(s)).sum::<f64>() / 4.0
    }
}

impl Scored for StudentEvaluation {
    fn overall(&self) -> u8 {
        self.overall_alignment
    }
}

/// Competency-variant evaluation of one (competency, material) pair.
///
/// The single sub-score is also the overall score (exact pass-through).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompetencyEvaluation {
    pub alignment_score: u8,
    pub evidence: String,
    pub recommendation: String,
}

impl Scored for CompetencyEvaluation {
    fn overall(&self) -> u8 {
        self.alignment_score
    }

    fn recommendation(&self) -> Option<&str> {
        Some(&self.recommendation)
    }
}

/// One element of a competency array response, keyed by competency id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompetencyEntry {
    pub id: String,
    pub alignment_score: u8,
    pub evidence: String,
    pub recommendation: String,
}

impl CompetencyEntry {
    pub fn empty(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Self::default()
        }
    }

    pub fn into_evaluation(self) -> (String, CompetencyEvaluation) {
        (
            self.id,
            CompetencyEvaluation {
                alignment_score: self.alignment_score,
                evidence: self.evidence,
                recommendation: self.recommendation,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn student_mean_is_exact() {
        let e = StudentEvaluation {
            understanding_fit: 80,
            accessibility_fit: 95,
            accommodation_fit: 90,
            engagement_fit: 75,
            overall_alignment: 85,
            explanation: String::new(),
        };
        assert!((e.sub_score_mean() - 85.0).abs() < f64::EPSILON);
        assert_eq!(e.overall(), 85);
        assert!(e.recommendation().is_none());
    }

    #[test]
    fn competency_overall_is_alignment_score() {
        let (id, eval) = CompetencyEntry {
            id: "c1".into(),
            alignment_score: 42,
            evidence: "ratios".into(),
            recommendation: "add a visual".into(),
        }
        .into_evaluation();
        assert_eq!(id, "c1");
        assert_eq!(eval.overall(), 42);
        assert_eq!(eval.recommendation(), Some("add a visual"));
    }
}
