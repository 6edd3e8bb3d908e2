use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusKind {
    Concept,
    Application,
    Analysis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicFocus {
    #[serde(rename = "type")]
    pub kind: FocusKind,
    pub weight: f64,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Distribution {
    pub point: String,
    pub weight: f64,
    pub min_count: usize,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRequirement {
    pub text: String,
    pub priority: Priority,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DifficultyProfile {
    pub complexity: String,
    pub depth: String,
    pub scope: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationCriterion {
    pub criterion: String,
    pub level: String,
    pub profile: DifficultyProfile,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRules {
    pub topic_focus: Vec<TopicFocus>,
    /// One entry per knowledge point or domain, in parse order.
    pub question_distribution: Vec<Distribution>,
    pub content_requirements: Vec<ContentRequirement>,
    pub validation_criteria: Vec<ValidationCriterion>,
}
