use serde::{Deserialize, Serialize};

/// Per-item outcome on one axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemCheck {
    pub item_index: usize,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AxisReport {
    pub valid: bool,
    /// Always finite, in `[0, 1]`.
    pub score: f64,
    pub message: String,
    pub details: Vec<ItemCheck>,
    /// Requirements the item set did not meet (e.g. uncovered points).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
}

impl AxisReport {
    pub fn vacuous(message: impl Into<String>) -> Self {
        Self {
            valid: true,
            score: 1.0,
            message: message.into(),
            details: vec![],
            missing: vec![],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub valid: bool,
    pub overall_score: f64,
    pub knowledge_coverage: AxisReport,
    pub difficulty_match: AxisReport,
    pub structural_compliance: AxisReport,
    pub goal_relevance: AxisReport,
}

impl ValidationReport {
    pub fn axes(&self) -> [(&'static str, &AxisReport); 4] {
        [
            ("knowledgeCoverage", &self.knowledge_coverage),
            ("difficultyMatch", &self.difficulty_match),
            ("structuralCompliance", &self.structural_compliance),
            ("goalRelevance", &self.goal_relevance),
        ]
    }

    pub fn failed_axes(&self) -> impl Iterator<Item = (&'static str, &AxisReport)> {
        self.axes().into_iter().filter(|(_, axis)| !axis.valid)
    }
}
