//! Rolling health statistics for the outbound generation API.
//!
//! Fed once per logical request by the API client. Threshold breaches are
//! logged and kept in a bounded alert log; they never fail a request.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::MonitorThresholds;

const WINDOW_SIZE: usize = 100;
const ALERT_LOG_SIZE: usize = 50;
const RECENT_ALERTS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub success: bool,
    pub duration_ms: u64,
    pub status: Option<u16>,
    pub path: String,
    pub timed_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl CallRecord {
    pub fn success(path: impl Into<String>, duration: Duration, status: u16) -> Self {
        Self {
            success: true,
            duration_ms: duration.as_millis() as u64,
            status: Some(status),
            path: path.into(),
            timed_out: false,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(
        path: impl Into<String>,
        duration: Duration,
        status: Option<u16>,
        timed_out: bool,
        error: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            duration_ms: duration.as_millis() as u64,
            status,
            path: path.into(),
            timed_out,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    HighErrorRate,
    SlowResponse,
    HighTimeoutRate,
    ConsecutiveFailures,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub message: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastError {
    pub message: String,
    pub status: Option<u16>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStats {
    pub total_calls: u64,
    pub success_calls: u64,
    pub failed_calls: u64,
    pub timeout_calls: u64,
    /// Computed over the recent-call window.
    pub window_size: usize,
    pub average_response_ms: f64,
    pub min_response_ms: Option<u64>,
    pub max_response_ms: Option<u64>,
    pub error_rate: f64,
    pub timeout_rate: f64,
    pub success_rate: f64,
    pub consecutive_failures: u32,
    pub last_error: Option<LastError>,
    pub last_success: Option<DateTime<Utc>>,
    pub recent_alerts: Vec<Alert>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub healthy: bool,
    pub stats: MonitorStats,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Default)]
struct MonitorState {
    total_calls: u64,
    success_calls: u64,
    failed_calls: u64,
    timeout_calls: u64,
    recent: VecDeque<CallRecord>,
    consecutive_failures: u32,
    last_error: Option<LastError>,
    last_success: Option<DateTime<Utc>>,
    alerts: VecDeque<Alert>,
}

impl MonitorState {
    fn snapshot(&self) -> MonitorStats {
        let window = self.recent.len();
        let (mut sum, mut min, mut max) = (0u64, None::<u64>, None::<u64>);
        let (mut failed, mut timed_out) = (0usize, 0usize);
        for call in &self.recent {
            sum += call.duration_ms;
            min = Some(min.map_or(call.duration_ms, |m| m.min(call.duration_ms)));
            max = Some(max.map_or(call.duration_ms, |m| m.max(call.duration_ms)));
            if !call.success {
                failed += 1;
            }
            if call.timed_out {
                timed_out += 1;
            }
        }

        let ratio = |n: usize| if window == 0 { 0.0 } else { n as f64 / window as f64 };
        let error_rate = ratio(failed);

        MonitorStats {
            total_calls: self.total_calls,
            success_calls: self.success_calls,
            failed_calls: self.failed_calls,
            timeout_calls: self.timeout_calls,
            window_size: window,
            average_response_ms: if window == 0 { 0.0 } else { sum as f64 / window as f64 },
            min_response_ms: min,
            max_response_ms: max,
            error_rate,
            timeout_rate: ratio(timed_out),
            success_rate: if window == 0 { 0.0 } else { 1.0 - error_rate },
            consecutive_failures: self.consecutive_failures,
            last_error: self.last_error.clone(),
            last_success: self.last_success,
            recent_alerts: self
                .alerts
                .iter()
                .skip(self.alerts.len().saturating_sub(RECENT_ALERTS))
                .cloned()
                .collect(),
        }
    }
}

pub struct ApiMonitor {
    thresholds: MonitorThresholds,
    state: Mutex<MonitorState>,
}

impl ApiMonitor {
    pub fn new(thresholds: MonitorThresholds) -> Self {
        Self {
            thresholds,
            state: Mutex::new(MonitorState::default()),
        }
    }

    pub fn record(&self, call: CallRecord) {
        let fired = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.total_calls += 1;
            if call.success {
                state.success_calls += 1;
                state.consecutive_failures = 0;
                state.last_success = Some(call.timestamp);
            } else {
                state.failed_calls += 1;
                state.consecutive_failures += 1;
                state.last_error = Some(LastError {
                    message: call.error.clone().unwrap_or_else(|| "Unknown error".to_string()),
                    status: call.status,
                    timestamp: call.timestamp,
                });
            }
            if call.timed_out {
                state.timeout_calls += 1;
            }

            state.recent.push_back(call);
            while state.recent.len() > WINDOW_SIZE {
                state.recent.pop_front();
            }

            let fired = self.check(&state.snapshot());
            for alert in &fired {
                state.alerts.push_back(alert.clone());
            }
            while state.alerts.len() > ALERT_LOG_SIZE {
                state.alerts.pop_front();
            }
            fired
        };

        for alert in fired {
            match alert.severity {
                Severity::Error => {
                    tracing::error!(alert = ?alert.kind, message = %alert.message, "api alert")
                }
                Severity::Warning => {
                    tracing::warn!(alert = ?alert.kind, message = %alert.message, "api alert")
                }
            }
        }
    }

    fn check(&self, stats: &MonitorStats) -> Vec<Alert> {
        let t = &self.thresholds;
        let now = Utc::now();
        let mut alerts = Vec::new();
        let mut raise = |kind, severity, message: String| {
            alerts.push(Alert {
                kind,
                message,
                severity,
                timestamp: now,
            })
        };

        if stats.error_rate > t.error_rate {
            raise(
                AlertKind::HighErrorRate,
                Severity::Warning,
                format!(
                    "API错误率过高: {:.1}% (阈值: {}%)",
                    stats.error_rate * 100.0,
                    t.error_rate * 100.0
                ),
            );
        }
        if stats.average_response_ms > t.average_latency_ms {
            raise(
                AlertKind::SlowResponse,
                Severity::Warning,
                format!(
                    "API平均响应时间过长: {:.1}秒 (阈值: {}秒)",
                    stats.average_response_ms / 1000.0,
                    t.average_latency_ms / 1000.0
                ),
            );
        }
        if stats.timeout_rate > t.timeout_rate {
            raise(
                AlertKind::HighTimeoutRate,
                Severity::Error,
                format!(
                    "API超时率过高: {:.1}% (阈值: {}%)",
                    stats.timeout_rate * 100.0,
                    t.timeout_rate * 100.0
                ),
            );
        }
        if stats.consecutive_failures >= t.consecutive_failures {
            raise(
                AlertKind::ConsecutiveFailures,
                Severity::Error,
                format!("API连续失败{}次", stats.consecutive_failures),
            );
        }
        alerts
    }

    pub fn stats(&self) -> MonitorStats {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .snapshot()
    }

    pub fn health(&self) -> HealthReport {
        let stats = self.stats();
        let t = &self.thresholds;
        // Unhealthy exactly when `check` would raise an alert.
        let healthy = stats.error_rate <= t.error_rate
            && stats.average_response_ms <= t.average_latency_ms
            && stats.timeout_rate <= t.timeout_rate
            && stats.consecutive_failures < t.consecutive_failures;

        let mut recommendations = Vec::new();
        if stats.error_rate > 0.1 {
            recommendations.push("错误率较高，建议检查网络连接和API服务状态".to_string());
        }
        if stats.average_response_ms > 30_000.0 {
            recommendations.push("响应时间较长，建议优化请求参数或考虑使用更快的模型".to_string());
        }
        if stats.timeout_rate > 0.1 {
            recommendations.push("超时率较高，建议增加超时时间或减少请求复杂度".to_string());
        }
        if stats.consecutive_failures >= 2 {
            recommendations.push("连续失败，建议检查API服务是否正常运行".to_string());
        }

        HealthReport {
            healthy,
            stats,
            recommendations,
        }
    }

    pub fn reset(&self) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = MonitorState::default();
        tracing::info!("api monitor reset");
    }
}

impl Default for ApiMonitor {
    fn default() -> Self {
        Self::new(MonitorThresholds::default())
    }
}
