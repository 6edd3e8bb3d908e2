use crate::error::{Error, Result};
use dotenvy::dotenv;
use serde::Serialize;
use std::env;
use std::sync::OnceLock;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_address: String,
    pub jwt_secret: String,
    pub ai: AiConfig,
    pub timeouts: ApiTimeouts,
    pub retry: RetrySettings,
    pub question: QuestionLimits,
    pub validation: ValidationConfig,
    pub task: TaskConfig,
    pub monitor: MonitorConfig,
}

/// Text-generation endpoint and its sampling profiles.
#[derive(Debug, Clone)]
pub struct AiConfig {
    pub api_key: String,
    pub api_url: String,
    pub model: String,
    pub default_params: SamplingParams,
    /// Used for the validation-triggered regeneration.
    pub retry_params: SamplingParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl SamplingParams {
    pub fn standard() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.95,
            max_tokens: 4048,
        }
    }

    pub fn conservative() -> Self {
        Self {
            temperature: 0.5,
            top_p: 0.9,
            max_tokens: 2048,
        }
    }
}

impl AiConfig {
    pub fn new(api_key: impl Into<String>, api_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_url: api_url.into(),
            model: DEFAULT_MODEL.to_string(),
            default_params: SamplingParams::standard(),
            retry_params: SamplingParams::conservative(),
        }
    }
}

const DEFAULT_API_URL: &str =
    "https://dashscope.aliyuncs.com/api/v1/services/aigc/text-generation/generation";
const DEFAULT_MODEL: &str = "qwen-plus-2025-01-25";

#[derive(Debug, Clone, Copy)]
pub struct ApiTimeouts {
    pub base: Duration,
    pub per_item: Duration,
    pub ceiling: Duration,
    pub regeneration_multiplier: f64,
}

impl Default for ApiTimeouts {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(60),
            per_item: Duration::from_secs(8),
            ceiling: Duration::from_secs(120),
            regeneration_multiplier: 0.75,
        }
    }
}

impl ApiTimeouts {
    /// `min(max(base, count * per_item), ceiling)`
    pub fn timeout_for(&self, count: usize) -> Duration {
        let scaled = self.per_item.saturating_mul(count.min(u32::MAX as usize) as u32);
        self.base.max(scaled).min(self.ceiling)
    }

    pub fn regeneration_timeout_for(&self, count: usize) -> Duration {
        self.timeout_for(count).mul_f64(self.regeneration_multiplier)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(2000),
            max_delay: Duration::from_millis(10_000),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QuestionLimits {
    pub min_count: usize,
    pub max_count: usize,
}

impl Default for QuestionLimits {
    fn default() -> Self {
        Self {
            min_count: 1,
            max_count: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ValidationConfig {
    /// Below this overall score one regeneration is attempted.
    pub min_overall_score: f64,
    /// Requests asking for more items than this never regenerate.
    pub max_regeneration_count: usize,
    pub min_knowledge_coverage: f64,
    pub min_difficulty_match: f64,
    pub min_structural_compliance: f64,
    pub min_goal_relevance: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_overall_score: 0.6,
            max_regeneration_count: 10,
            min_knowledge_coverage: 0.8,
            min_difficulty_match: 0.7,
            min_structural_compliance: 0.9,
            min_goal_relevance: 0.8,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TaskConfig {
    pub cleanup_interval: Duration,
    pub retention: Duration,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(5 * 60),
            retention: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MonitorThresholds {
    pub error_rate: f64,
    pub average_latency_ms: f64,
    pub timeout_rate: f64,
    pub consecutive_failures: u32,
}

impl Default for MonitorThresholds {
    fn default() -> Self {
        Self {
            error_rate: 0.3,
            average_latency_ms: 60_000.0,
            timeout_rate: 0.2,
            consecutive_failures: 3,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MonitorConfig {
    pub thresholds: MonitorThresholds,
    /// Successful calls slower than `timeout * ratio` are logged as slow.
    pub response_time_warning_ratio: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            thresholds: MonitorThresholds::default(),
            response_time_warning_ratio: 0.8,
        }
    }
}

pub static CONFIG: OnceLock<Config> = OnceLock::new();

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let mut ai = AiConfig::new(
            get_env("QWEN_API_KEY")?,
            get_env_or("QWEN_API_URL", DEFAULT_API_URL),
        );
        ai.model = get_env_or("QWEN_MODEL", DEFAULT_MODEL);

        let timeouts = ApiTimeouts {
            base: Duration::from_millis(get_env_parse_or("AI_BASE_TIMEOUT_MS", 60_000)?),
            per_item: Duration::from_millis(get_env_parse_or("AI_PER_ITEM_TIMEOUT_MS", 8_000)?),
            ceiling: Duration::from_millis(get_env_parse_or("AI_MAX_TIMEOUT_MS", 120_000)?),
            ..ApiTimeouts::default()
        };

        let retry = RetrySettings {
            max_retries: get_env_parse_or("API_MAX_RETRIES", 3)?,
            base_delay: Duration::from_millis(get_env_parse_or("API_BASE_DELAY_MS", 2_000)?),
            max_delay: Duration::from_millis(get_env_parse_or("API_MAX_DELAY_MS", 10_000)?),
        };

        let question = QuestionLimits {
            max_count: get_env_parse_or("MAX_QUESTION_COUNT", 50)?,
            ..QuestionLimits::default()
        };

        let validation = ValidationConfig {
            min_overall_score: get_env_parse_or("VALIDATION_MIN_OVERALL", 0.6)?,
            max_regeneration_count: get_env_parse_or("VALIDATION_MAX_REGEN_COUNT", 10)?,
            ..ValidationConfig::default()
        };

        let task = TaskConfig {
            cleanup_interval: Duration::from_secs(get_env_parse_or(
                "TASK_CLEANUP_INTERVAL_SECS",
                300,
            )?),
            retention: Duration::from_secs(get_env_parse_or("TASK_RETENTION_SECS", 300)?),
        };

        Ok(Self {
            server_address: get_env("SERVER_ADDRESS")?,
            jwt_secret: get_env("JWT_SECRET")?,
            ai,
            timeouts,
            retry,
            question,
            validation,
            task,
            monitor: MonitorConfig::default(),
        })
    }
}

fn get_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::Config(format!("Missing environment variable: {}", name)))
}

fn get_env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn get_env_parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

pub fn init_config() -> Result<()> {
    let config = Config::from_env()?;
    CONFIG
        .set(config)
        .map_err(|_| Error::Config("Configuration has already been initialized".to_string()))?;
    Ok(())
}

pub fn get_config() -> Result<&'static Config> {
    CONFIG
        .get()
        .ok_or_else(|| Error::Config("Configuration has not been initialized".to_string()))
}
