use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::config::{ApiTimeouts, Config, QuestionLimits, RetrySettings, ValidationConfig};
use crate::error::{Error, Result};
use crate::models::job::{GenerationRequest, GenerationResult, JobView};
use crate::services::ai_service::AIService;
use crate::services::api_client::RetryPolicy;
use crate::services::content_validator::{annotate, needs_regeneration, validate_all};
use crate::services::item_store::ItemStore;
use crate::services::parameter_parser::parse_all;
use crate::services::prompt_builder::{build_prompt, build_regeneration_prompt};
use crate::services::rule_mapper::map_parameters_to_rules;
use crate::services::task_store::TaskStore;

/// Progress points reported while a job runs.
pub mod progress {
    pub const INITIALIZING: i32 = 5;
    pub const PARAMETERS_PARSED: i32 = 15;
    pub const PROMPT_READY: i32 = 25;
    pub const REQUEST_ISSUED: i32 = 30;
    pub const REQUEST_RETRY: (i32, i32) = (35, 55);
    pub const RESPONSE_PARSED: i32 = 60;
    pub const VALIDATING: i32 = 70;
    pub const REGENERATING: i32 = 75;
    pub const REGENERATION_RETRY: (i32, i32) = (76, 80);
    pub const VALIDATED: i32 = 85;
    pub const PERSISTING: i32 = 95;

    /// Spreads retries `1..=max_retries` evenly over `band`.
    pub fn for_retry(band: (i32, i32), attempt: u32, max_retries: u32) -> i32 {
        let (start, end) = band;
        let steps = max_retries.saturating_sub(1).max(1) as i32;
        let step = attempt.saturating_sub(1) as i32;
        (start + (end - start) * step / steps).clamp(start, end)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GenerationSettings {
    pub timeouts: ApiTimeouts,
    pub retry: RetrySettings,
    pub limits: QuestionLimits,
    pub validation: ValidationConfig,
}

impl GenerationSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeouts: config.timeouts,
            retry: config.retry,
            limits: config.question,
            validation: config.validation,
        }
    }
}

#[derive(Clone)]
pub struct GenerationService {
    tasks: Arc<TaskStore>,
    ai: AIService,
    items: Arc<dyn ItemStore>,
    settings: GenerationSettings,
}

impl GenerationService {
    pub fn new(
        tasks: Arc<TaskStore>,
        ai: AIService,
        items: Arc<dyn ItemStore>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            tasks,
            ai,
            items,
            settings,
        }
    }

    pub fn tasks(&self) -> &Arc<TaskStore> {
        &self.tasks
    }

    /// Registers a job for `owner` and starts the pipeline in the background.
    /// Returns as soon as the job exists.
    pub fn create(&self, owner: &str, request: GenerationRequest) -> Result<String> {
        if request.topic.trim().is_empty() {
            return Err(Error::BadRequest("主题不能为空".to_string()));
        }
        let limits = self.settings.limits;
        if request.count < limits.min_count || request.count > limits.max_count {
            return Err(Error::BadRequest(format!(
                "题目数量必须在{}到{}之间",
                limits.min_count, limits.max_count
            )));
        }

        let id = format!(
            "generate_{}_{}_{}",
            owner,
            Utc::now().timestamp_millis(),
            Uuid::new_v4()
        );
        self.tasks.create(&id, owner, request.clone());

        let service = self.clone();
        let job_id = id.clone();
        tokio::spawn(async move {
            service.run(&job_id, request).await;
        });

        Ok(id)
    }

    pub fn poll(&self, owner: &str, id: &str) -> Result<JobView> {
        let job = self
            .tasks
            .get(id)
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;
        if job.owner != owner {
            tracing::warn!(job_id = %id, owner = %owner, "task polled by another user");
            return Err(Error::TaskForbidden(id.to_string()));
        }
        Ok(job.into())
    }

    /// Drives one job to a terminal state.
    pub async fn run(&self, id: &str, request: GenerationRequest) {
        match self.pipeline(id, &request).await {
            Ok(result) => {
                self.tasks.complete(id, result);
            }
            Err(err) => {
                self.tasks.fail(id, &err.to_string());
            }
        }
    }

    fn retry_reporter(
        &self,
        id: &str,
        band: (i32, i32),
        max_retries: u32,
        label: &'static str,
    ) -> impl FnMut(u32, std::time::Duration) + Send + 'static {
        let tasks = Arc::clone(&self.tasks);
        let id = id.to_string();
        move |attempt, _delay| {
            tasks.update_progress(
                &id,
                progress::for_retry(band, attempt, max_retries),
                &format!("{}，正在第{}次重试...", label, attempt),
            );
        }
    }

    async fn pipeline(&self, id: &str, request: &GenerationRequest) -> Result<GenerationResult> {
        let tasks = &self.tasks;
        tasks.update_progress(id, progress::INITIALIZING, "正在初始化生成任务...");

        let parsed = parse_all(
            request.learning_goals.as_deref(),
            request.knowledge_points.as_deref(),
            &request.difficulty,
        );
        tasks.update_progress(id, progress::PARAMETERS_PARSED, "参数解析完成");

        let rules = map_parameters_to_rules(&parsed);
        let prompt = build_prompt(
            &request.topic,
            parsed.difficulty.label(),
            request.count,
            &parsed,
            &rules,
        );
        tasks.update_progress(id, progress::PROMPT_READY, "提示词构建完成");

        let timeouts = self.settings.timeouts;
        let policy = RetryPolicy::new(&self.settings.retry, timeouts.timeout_for(request.count));
        tracing::info!(
            job_id = %id,
            topic = %request.topic,
            count = request.count,
            difficulty = parsed.difficulty.label(),
            timeout_ms = policy.timeout.as_millis() as u64,
            "generation started"
        );
        tasks.update_progress(id, progress::REQUEST_ISSUED, "正在调用AI生成题目...");

        let mut items = self
            .ai
            .generate_items(
                &prompt,
                &self.ai.config().default_params,
                &policy,
                request.count,
                parsed.difficulty,
                self.retry_reporter(id, progress::REQUEST_RETRY, policy.max_retries, "AI服务暂时不可用"),
            )
            .await?;
        tasks.update_progress(id, progress::RESPONSE_PARSED, "AI响应解析完成");

        tasks.update_progress(id, progress::VALIDATING, "正在验证题目质量...");
        let validation = self.settings.validation;
        let mut report = validate_all(&items, &parsed, &validation);
        let mut regenerated = false;

        if needs_regeneration(&report, request.count, &validation) {
            tracing::warn!(
                job_id = %id,
                overall = report.overall_score,
                threshold = validation.min_overall_score,
                "quality below threshold, regenerating"
            );
            tasks.update_progress(id, progress::REGENERATING, "题目质量未达标，正在重新生成...");

            let retry_prompt = build_regeneration_prompt(&prompt, &report, &parsed);
            let retry_policy =
                policy.for_regeneration(timeouts.regeneration_timeout_for(request.count));
            let outcome = self
                .ai
                .generate_items(
                    &retry_prompt,
                    &self.ai.config().retry_params,
                    &retry_policy,
                    request.count,
                    parsed.difficulty,
                    self.retry_reporter(
                        id,
                        progress::REGENERATION_RETRY,
                        retry_policy.max_retries,
                        "重新生成请求失败",
                    ),
                )
                .await;

            match outcome {
                Ok(candidates) => {
                    let candidate_report = validate_all(&candidates, &parsed, &validation);
                    tracing::info!(
                        job_id = %id,
                        before = report.overall_score,
                        after = candidate_report.overall_score,
                        "regeneration scored"
                    );
                    if candidate_report.overall_score > report.overall_score {
                        items = candidates;
                        report = candidate_report;
                        regenerated = true;
                    }
                }
                Err(err) => {
                    tracing::warn!(job_id = %id, error = %err, "regeneration failed, keeping first result");
                }
            }
        }

        annotate(&mut items, &report);
        tasks.update_progress(id, progress::VALIDATED, "题目验证完成");

        tasks.update_progress(id, progress::PERSISTING, "正在保存题目...");
        let cards = self.items.store(&request.topic, items).await?;

        tracing::info!(
            job_id = %id,
            stored = cards.len(),
            overall = report.overall_score,
            regenerated,
            "generation finished"
        );
        Ok(GenerationResult {
            cards,
            validation: report,
            regenerated,
        })
    }
}
