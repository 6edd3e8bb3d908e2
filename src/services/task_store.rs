//! In-memory job tracking for polling clients.
//!
//! Jobs live only as long as the process. Terminal jobs are removed by
//! [`TaskSweeper`] once their retention window has passed; pending and
//! processing jobs are never removed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::models::job::{GenerationJob, GenerationRequest, GenerationResult, JobStatus};

const EVENT_CAPACITY: usize = 256;

/// A job's state right after an accepted transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
}

impl From<&GenerationJob> for ProgressEvent {
    fn from(job: &GenerationJob) -> Self {
        Self {
            job_id: job.id.clone(),
            status: job.status,
            progress: job.progress,
            message: job.message.clone(),
        }
    }
}

pub struct TaskStore {
    jobs: DashMap<String, GenerationJob>,
    retention: Duration,
    events: broadcast::Sender<ProgressEvent>,
}

impl TaskStore {
    pub fn new(retention: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            jobs: DashMap::new(),
            retention,
            events,
        }
    }

    /// Every accepted create, progress, complete and fail from now on.
    /// Rejected updates publish nothing.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: ProgressEvent) {
        // no receivers is fine
        let _ = self.events.send(event);
    }

    pub fn create(&self, id: &str, owner: &str, request: GenerationRequest) -> GenerationJob {
        let job = GenerationJob {
            id: id.to_string(),
            owner: owner.to_string(),
            request,
            status: JobStatus::Pending,
            progress: 0,
            message: "任务已创建".to_string(),
            result: None,
            error: None,
            created_at: Utc::now(),
            finished_at: None,
        };
        self.jobs.insert(id.to_string(), job.clone());
        tracing::info!(job_id = %id, owner = %owner, "task created");
        self.publish(ProgressEvent::from(&job));
        job
    }

    /// Moves the job to `Processing`. Progress never goes backwards and this
    /// never completes a job, even at 100.
    pub fn update_progress(&self, id: &str, progress: i32, message: &str) -> bool {
        let Some(mut job) = self.jobs.get_mut(id) else {
            tracing::warn!(job_id = %id, "progress update for unknown task");
            return false;
        };
        if job.status.is_terminal() {
            tracing::debug!(job_id = %id, status = ?job.status, "ignoring progress on finished task");
            return false;
        }

        let clamped = progress.clamp(0, 100) as u8;
        job.progress = job.progress.max(clamped);
        if !message.is_empty() {
            job.message = message.to_string();
        }
        job.status = JobStatus::Processing;
        tracing::debug!(job_id = %id, progress = job.progress, message = %job.message, "task progress");
        let event = ProgressEvent::from(&*job);
        drop(job);
        self.publish(event);
        true
    }

    /// The only transition into `Completed`; result and progress land together.
    pub fn complete(&self, id: &str, result: GenerationResult) -> bool {
        let Some(mut job) = self.jobs.get_mut(id) else {
            tracing::warn!(job_id = %id, "completion for unknown task");
            return false;
        };
        if job.status.is_terminal() {
            return false;
        }
        job.status = JobStatus::Completed;
        job.progress = 100;
        job.result = Some(result);
        job.error = None;
        job.message = "任务完成".to_string();
        job.finished_at = Some(Utc::now());
        tracing::info!(job_id = %id, "task completed");
        let event = ProgressEvent::from(&*job);
        drop(job);
        self.publish(event);
        true
    }

    pub fn fail(&self, id: &str, error: &str) -> bool {
        let Some(mut job) = self.jobs.get_mut(id) else {
            tracing::warn!(job_id = %id, "failure for unknown task");
            return false;
        };
        if job.status.is_terminal() {
            return false;
        }
        job.status = JobStatus::Failed;
        job.result = None;
        job.error = Some(error.to_string());
        job.message = format!("任务失败: {}", error);
        job.finished_at = Some(Utc::now());
        tracing::error!(job_id = %id, error = %error, "task failed");
        let event = ProgressEvent::from(&*job);
        drop(job);
        self.publish(event);
        true
    }

    pub fn get(&self, id: &str) -> Option<GenerationJob> {
        self.jobs.get(id).map(|job| job.clone())
    }

    /// Removes terminal jobs that finished more than `retention` before `now`.
    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> usize {
        let retention = chrono::Duration::from_std(self.retention).unwrap_or_else(|_| chrono::Duration::max_value());
        let before = self.jobs.len();
        self.jobs.retain(|_, job| match (job.status.is_terminal(), job.finished_at) {
            (true, Some(finished)) => now.signed_duration_since(finished) <= retention,
            _ => true,
        });
        let removed = before.saturating_sub(self.jobs.len());
        if removed > 0 {
            tracing::info!(removed, "swept expired tasks");
        }
        removed
    }

    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Utc::now())
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Periodic sweep of a [`TaskStore`], stopped through its cancellation token.
pub struct TaskSweeper {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl TaskSweeper {
    pub fn start(store: Arc<TaskStore>, interval: Duration) -> Self {
        let token = CancellationToken::new();
        let child = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {
                        store.sweep_expired();
                    }
                }
            }
            tracing::debug!("task sweeper stopped");
        });
        Self { token, handle }
    }

    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!(error = ?e, "task sweeper join failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::validation::{AxisReport, ValidationReport};

    fn request() -> GenerationRequest {
        GenerationRequest {
            topic: "二次函数".into(),
            difficulty: "中等".into(),
            count: 5,
            subject: "math".into(),
            learning_goals: None,
            knowledge_points: None,
        }
    }

    fn result() -> GenerationResult {
        let axis = AxisReport::vacuous("ok");
        GenerationResult {
            cards: vec![],
            validation: ValidationReport {
                valid: true,
                overall_score: 1.0,
                knowledge_coverage: axis.clone(),
                difficulty_match: axis.clone(),
                structural_compliance: axis.clone(),
                goal_relevance: axis,
            },
            regenerated: false,
        }
    }

    #[test]
    fn create_then_get_is_pending_at_zero() {
        let store = TaskStore::new(Duration::from_secs(300));
        store.create("t1", "u1", request());
        let job = store.get("t1").unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert!(job.result.is_none() && job.error.is_none());
    }

    #[test]
    fn progress_is_clamped_monotonic_and_never_completes() {
        let store = TaskStore::new(Duration::from_secs(300));
        store.create("t1", "u1", request());
        assert!(store.update_progress("t1", 30, "calling"));
        assert!(store.update_progress("t1", 20, "late update"));
        let job = store.get("t1").unwrap();
        assert_eq!(job.progress, 30);
        assert_eq!(job.message, "late update");

        store.update_progress("t1", 250, "");
        let job = store.get("t1").unwrap();
        assert_eq!(job.progress, 100);
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.result.is_none());
        assert_eq!(job.message, "late update");
    }

    #[test]
    fn complete_carries_result_and_full_progress() {
        let store = TaskStore::new(Duration::from_secs(300));
        store.create("t1", "u1", request());
        store.update_progress("t1", 60, "parsed");
        assert!(store.complete("t1", result()));
        let job = store.get("t1").unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert!(job.result.is_some());

        assert!(!store.fail("t1", "too late"));
        assert!(!store.update_progress("t1", 10, "too late"));
        assert_eq!(store.get("t1").unwrap().status, JobStatus::Completed);
    }

    #[test]
    fn fail_sets_error_without_result() {
        let store = TaskStore::new(Duration::from_secs(300));
        store.create("t1", "u1", request());
        assert!(store.fail("t1", "boom"));
        let job = store.get("t1").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("boom"));
        assert!(job.result.is_none());
        assert!(job.message.contains("boom"));
    }

    #[test]
    fn accepted_transitions_are_published_in_order() {
        let store = TaskStore::new(Duration::from_secs(300));
        let mut events = store.subscribe();
        store.create("t1", "u1", request());
        store.update_progress("t1", 30, "calling");
        store.update_progress("t1", 20, "late update");
        store.complete("t1", result());
        assert!(!store.update_progress("t1", 40, "too late"));
        assert!(!store.fail("t1", "too late"));

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            assert_eq!(event.job_id, "t1");
            seen.push((event.status, event.progress));
        }
        assert_eq!(
            seen,
            vec![
                (JobStatus::Pending, 0),
                (JobStatus::Processing, 30),
                (JobStatus::Processing, 30),
                (JobStatus::Completed, 100),
            ]
        );
    }

    #[test]
    fn unknown_ids_are_rejected() {
        let store = TaskStore::new(Duration::from_secs(300));
        assert!(!store.update_progress("nope", 10, "x"));
        assert!(!store.complete("nope", result()));
        assert!(!store.fail("nope", "x"));
        assert!(store.get("nope").is_none());
    }

    #[test]
    fn sweep_removes_only_expired_terminal_jobs() {
        let store = TaskStore::new(Duration::from_secs(300));
        store.create("done", "u1", request());
        store.create("failed", "u1", request());
        store.create("running", "u1", request());
        store.create("pending", "u1", request());
        store.complete("done", result());
        store.fail("failed", "boom");
        store.update_progress("running", 40, "working");

        assert_eq!(store.sweep_expired_at(Utc::now()), 0);
        assert_eq!(store.len(), 4);

        let later = Utc::now() + chrono::Duration::seconds(301);
        assert_eq!(store.sweep_expired_at(later), 2);
        assert!(store.get("done").is_none());
        assert!(store.get("failed").is_none());
        assert!(store.get("running").is_some());
        assert!(store.get("pending").is_some());
    }

    #[tokio::test]
    async fn sweeper_runs_until_stopped() {
        let store = Arc::new(TaskStore::new(Duration::ZERO));
        store.create("t1", "u1", request());
        store.complete("t1", result());

        let sweeper = TaskSweeper::start(store.clone(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        sweeper.stop().await;

        assert!(store.get("t1").is_none());
    }
}
