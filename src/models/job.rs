use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::item::StoredItem;
use super::validation::ValidationReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub topic: String,
    pub difficulty: String,
    pub count: usize,
    pub subject: String,
    #[serde(default)]
    pub learning_goals: Option<String>,
    #[serde(default)]
    pub knowledge_points: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    pub cards: Vec<StoredItem>,
    pub validation: ValidationReport,
    pub regenerated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationJob {
    pub id: String,
    pub owner: String,
    pub request: GenerationRequest,
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    pub result: Option<GenerationResult>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// What a polling client sees.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub task_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    pub result: Option<GenerationResult>,
    pub error: Option<String>,
}

impl From<GenerationJob> for JobView {
    fn from(job: GenerationJob) -> Self {
        Self {
            task_id: job.id,
            status: job.status,
            progress: job.progress,
            message: job.message,
            result: job.result,
            error: job.error,
        }
    }
}
