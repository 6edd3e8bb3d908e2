use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Difficulty {
    #[serde(rename = "简单")]
    Easy,
    #[default]
    #[serde(rename = "中等")]
    Medium,
    #[serde(rename = "困难")]
    Hard,
}

impl Difficulty {
    /// Unknown labels fall back to `Medium`.
    pub fn parse(label: &str) -> Self {
        match label.trim() {
            "简单" | "easy" | "Easy" => Difficulty::Easy,
            "困难" | "hard" | "Hard" => Difficulty::Hard,
            _ => Difficulty::Medium,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Difficulty::Easy => "简单",
            Difficulty::Medium => "中等",
            Difficulty::Hard => "困难",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningGoals {
    pub has_goals: bool,
    pub goals: Vec<String>,
    pub capabilities: Vec<String>,
    pub skills: Vec<String>,
    pub assessment_criteria: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgePoints {
    pub has_points: bool,
    pub points: Vec<String>,
    pub domains: Vec<String>,
    pub boundaries: Vec<String>,
}

impl KnowledgePoints {
    /// Points followed by domains, the set coverage is measured against.
    pub fn required(&self) -> impl Iterator<Item = &String> {
        self.points.iter().chain(self.domains.iter())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completeness {
    pub has_learning_goals: bool,
    pub has_knowledge_points: bool,
    pub score: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedParameters {
    pub learning_goals: LearningGoals,
    pub knowledge_points: KnowledgePoints,
    pub difficulty: Difficulty,
    pub completeness: Completeness,
}
