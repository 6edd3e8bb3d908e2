use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use reqwest::{Client, StatusCode};
use serde_json::Value;

use crate::config::RetrySettings;
use crate::services::api_monitor::{ApiMonitor, CallRecord};

const MAX_JITTER: f64 = 0.3;
const CAUSE_PREVIEW: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Timeout,
    /// Refused, reset or unresolvable host.
    Connection,
    RateLimited,
    Server(u16),
    Auth(u16),
    Client(u16),
    /// The endpoint answered 2xx with a body that is not JSON.
    Decode,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout | ErrorKind::Connection | ErrorKind::RateLimited | ErrorKind::Server(_)
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Connection => "connection",
            ErrorKind::RateLimited => "rate_limit",
            ErrorKind::Server(_) => "server",
            ErrorKind::Auth(_) => "auth",
            ErrorKind::Client(_) => "client",
            ErrorKind::Decode => "decode",
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ErrorKind::RateLimited => Some(429),
            ErrorKind::Server(s) | ErrorKind::Auth(s) | ErrorKind::Client(s) => Some(*s),
            _ => None,
        }
    }

    fn from_status(status: StatusCode) -> Self {
        let code = status.as_u16();
        match code {
            429 => ErrorKind::RateLimited,
            401 | 403 => ErrorKind::Auth(code),
            500..=599 => ErrorKind::Server(code),
            _ => ErrorKind::Client(code),
        }
    }

    fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            ErrorKind::Timeout
        } else if err.is_decode() {
            ErrorKind::Decode
        } else {
            ErrorKind::Connection
        }
    }
}

/// A logical request that failed for good.
#[derive(Debug, Clone)]
pub struct ApiCallError {
    pub kind: ErrorKind,
    pub attempts: u32,
    pub duration: Duration,
    pub last_cause: String,
}

impl fmt::Display for ApiCallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let retries = self.attempts.saturating_sub(1);
        match self.kind {
            ErrorKind::Timeout => write!(
                f,
                "API请求超时：已重试{}次，请检查网络连接或稍后重试",
                retries
            ),
            ErrorKind::Connection => write!(f, "无法连接到API服务器，请检查网络连接"),
            ErrorKind::RateLimited => write!(f, "API请求频率过高，请稍后重试"),
            ErrorKind::Server(status) => write!(
                f,
                "API服务器错误 ({})，已重试{}次，请稍后重试",
                status, retries
            ),
            ErrorKind::Auth(401) => write!(f, "API认证失败，请检查API密钥"),
            ErrorKind::Auth(_) => write!(f, "API访问被拒绝，请检查权限"),
            ErrorKind::Client(status) => {
                write!(f, "API请求失败 ({}): {}", status, self.last_cause)
            }
            ErrorKind::Decode => write!(
                f,
                "API请求失败: {} (已重试{}次)",
                self.last_cause, retries
            ),
        }
    }
}

impl std::error::Error for ApiCallError {}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Per attempt.
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn new(settings: &RetrySettings, timeout: Duration) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: settings.base_delay,
            max_delay: settings.max_delay,
            timeout,
        }
    }

    /// Same retry budget with half the base delay and the given timeout.
    pub fn for_regeneration(&self, timeout: Duration) -> Self {
        Self {
            base_delay: self.base_delay / 2,
            timeout,
            ..*self
        }
    }
}

/// `min(base * 2^attempt, max)` grown by `jitter` (0..=0.3), never above `max`.
pub fn backoff_delay_with_jitter(
    attempt: u32,
    base: Duration,
    max: Duration,
    jitter: f64,
) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    let raw = base.saturating_mul(factor).min(max);
    raw.mul_f64(1.0 + jitter.clamp(0.0, MAX_JITTER)).min(max)
}

pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let jitter = rand::thread_rng().gen_range(0.0..=MAX_JITTER);
    backoff_delay_with_jitter(attempt, base, max, jitter)
}

#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub url: String,
    pub bearer_token: String,
    pub body: Value,
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

struct AttemptError {
    kind: ErrorKind,
    cause: String,
}

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    monitor: Arc<ApiMonitor>,
    warning_ratio: f64,
}

impl ApiClient {
    pub fn new(monitor: Arc<ApiMonitor>, warning_ratio: f64) -> Self {
        Self {
            client: Client::new(),
            monitor,
            warning_ratio,
        }
    }

    pub fn monitor(&self) -> &Arc<ApiMonitor> {
        &self.monitor
    }

    /// Runs up to `max_retries + 1` attempts, sleeping with backoff between
    /// retryable failures. `on_retry(attempt, delay)` fires before each sleep.
    /// The monitor sees exactly one record for the whole call.
    pub async fn request_with_retry<F>(
        &self,
        spec: &RequestSpec,
        policy: &RetryPolicy,
        mut on_retry: F,
    ) -> Result<ApiResponse, ApiCallError>
    where
        F: FnMut(u32, Duration) + Send,
    {
        let started = Instant::now();
        let path = url::Url::parse(&spec.url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        let mut attempt = 0u32;
        loop {
            if attempt > 0 {
                let delay = backoff_delay(attempt - 1, policy.base_delay, policy.max_delay);
                on_retry(attempt, delay);
                tracing::info!(
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "retrying api request"
                );
                tokio::time::sleep(delay).await;
            }

            match self.attempt(spec, policy.timeout).await {
                Ok(response) => {
                    let elapsed = started.elapsed();
                    tracing::info!(
                        attempt = attempt + 1,
                        status = response.status,
                        duration_ms = elapsed.as_millis() as u64,
                        path = %path,
                        "api request succeeded"
                    );
                    if elapsed > policy.timeout.mul_f64(self.warning_ratio) {
                        tracing::warn!(
                            duration_ms = elapsed.as_millis() as u64,
                            timeout_ms = policy.timeout.as_millis() as u64,
                            "api request close to timeout"
                        );
                    }
                    self.monitor
                        .record(CallRecord::success(path, elapsed, response.status));
                    return Ok(response);
                }
                Err(err) => {
                    let elapsed = started.elapsed();
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_attempts = policy.max_retries + 1,
                        kind = err.kind.label(),
                        status = ?err.kind.status(),
                        duration_ms = elapsed.as_millis() as u64,
                        cause = %err.cause,
                        "api request attempt failed"
                    );

                    if attempt < policy.max_retries && err.kind.is_retryable() {
                        attempt += 1;
                        continue;
                    }

                    let failure = ApiCallError {
                        kind: err.kind,
                        attempts: attempt + 1,
                        duration: elapsed,
                        last_cause: err.cause,
                    };
                    tracing::error!(
                        attempts = failure.attempts,
                        kind = failure.kind.label(),
                        duration_ms = elapsed.as_millis() as u64,
                        error = %failure,
                        "api request failed"
                    );
                    self.monitor.record(CallRecord::failure(
                        path,
                        elapsed,
                        failure.kind.status(),
                        failure.kind == ErrorKind::Timeout,
                        failure.to_string(),
                    ));
                    return Err(failure);
                }
            }
        }
    }

    async fn attempt(
        &self,
        spec: &RequestSpec,
        timeout: Duration,
    ) -> Result<ApiResponse, AttemptError> {
        let response = self
            .client
            .post(&spec.url)
            .bearer_auth(&spec.bearer_token)
            .timeout(timeout)
            .json(&spec.body)
            .send()
            .await
            .map_err(|e| AttemptError {
                kind: ErrorKind::from_transport(&e),
                cause: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AttemptError {
                kind: ErrorKind::from_status(status),
                cause: error_cause(&body, status),
            });
        }

        let body = response.json::<Value>().await.map_err(|e| AttemptError {
            kind: if e.is_timeout() {
                ErrorKind::Timeout
            } else {
                ErrorKind::Decode
            },
            cause: e.to_string(),
        })?;

        Ok(ApiResponse {
            status: status.as_u16(),
            body,
        })
    }
}

/// The upstream `message` field when present, otherwise a body preview.
fn error_cause(body: &str, status: StatusCode) -> String {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string));
    match message {
        Some(m) => m,
        None if body.trim().is_empty() => status.to_string(),
        None => body.chars().take(CAUSE_PREVIEW).collect(),
    }
}
