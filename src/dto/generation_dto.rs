use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::job::GenerationRequest;

fn default_subject() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GeneratePayload {
    #[validate(length(min = 1, max = 200))]
    pub topic: String,
    #[validate(length(min = 1))]
    pub difficulty: String,
    /// Upper bound is `QuestionLimits::max_count`, checked when the job is created.
    #[validate(range(min = 1))]
    pub count: usize,
    #[serde(default = "default_subject")]
    pub subject: String,
    #[validate(length(max = 2000))]
    pub learning_goals: Option<String>,
    #[validate(length(max = 2000))]
    pub knowledge_points: Option<String>,
}

impl From<GeneratePayload> for GenerationRequest {
    fn from(payload: GeneratePayload) -> Self {
        Self {
            topic: payload.topic.trim().to_string(),
            difficulty: payload.difficulty,
            count: payload.count,
            subject: payload.subject,
            learning_goals: payload.learning_goals.filter(|s| !s.trim().is_empty()),
            knowledge_points: payload.knowledge_points.filter(|s| !s.trim().is_empty()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateAccepted {
    pub task_id: String,
    pub message: String,
}
