pub mod config;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::config::Config;
use crate::services::{
    ai_service::AIService,
    api_client::ApiClient,
    api_monitor::ApiMonitor,
    generation_service::{GenerationService, GenerationSettings},
    item_store::{InMemoryItemStore, ItemStore},
    task_store::TaskStore,
};

#[derive(Clone)]
pub struct AppState {
    pub generation: GenerationService,
    pub monitor: Arc<ApiMonitor>,
    pub jwt_secret: Arc<str>,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        Self::with_item_store(config, Arc::new(InMemoryItemStore::new()))
    }

    pub fn with_item_store(config: &Config, items: Arc<dyn ItemStore>) -> Self {
        let monitor = Arc::new(ApiMonitor::new(config.monitor.thresholds));
        let api = ApiClient::new(
            Arc::clone(&monitor),
            config.monitor.response_time_warning_ratio,
        );
        let ai_service = AIService::new(config.ai.clone(), api);
        let tasks = Arc::new(TaskStore::new(config.task.retention));
        let generation = GenerationService::new(
            tasks,
            ai_service,
            items,
            GenerationSettings::from_config(config),
        );

        Self {
            generation,
            monitor,
            jwt_secret: Arc::from(config.jwt_secret.as_str()),
        }
    }
}

/// Every route; callers add the outer tower layers.
pub fn router(state: AppState) -> Router {
    let generation_api = Router::new()
        .route(
            "/api/ai-qa/generate",
            post(routes::generation::create_generation),
        )
        .route(
            "/api/ai-qa/progress/:task_id",
            get(routes::generation::get_progress),
        )
        .route("/api/monitor/reset", post(routes::monitor::reset_stats))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_bearer_auth,
        ));

    Router::new()
        .route("/health", get(routes::health::health))
        .route("/api/monitor/health", get(routes::monitor::api_health))
        .merge(generation_api)
        .with_state(state)
}
