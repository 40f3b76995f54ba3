//! Configuration module

use std::env;
use std::path::PathBuf;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// HTTP API port
    pub http_port: u16,

    /// Swipe-command dispatcher (TCP) port
    pub dispatcher_port: u16,

    /// Path of the persisted classifier blob
    pub model_path: PathBuf,

    /// Alert gateway webhook; alerts are log-only when unset
    pub alert_webhook_url: Option<String>,

    /// Minimum stored strokes before a user counts toward training
    pub min_strokes: u32,

    /// Maximum swipe rows accepted per user
    pub max_rows_per_user: u32,

    /// Sliding window for failed-attempt counting, seconds
    pub alert_time_window_secs: i64,

    /// Failures inside the window that trigger an alert
    pub min_failed_attempts: usize,

    /// Minimum gap between two alerts for the same user, seconds
    pub alert_cooldown_secs: i64,

    /// Dispatcher idle read timeout, seconds
    pub idle_timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://touchalytics.db?mode=rwc".to_string()),

            http_port: env::var("HTTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(5000),

            dispatcher_port: env::var("DISPATCHER_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(7000),

            model_path: env::var("MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("swipe_model.json")),

            alert_webhook_url: env::var("ALERT_WEBHOOK_URL").ok().filter(|u| !u.is_empty()),

            min_strokes: env::var("MIN_STROKES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(90),

            max_rows_per_user: env::var("MAX_SWIPE_ROWS_PER_USER")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),

            alert_time_window_secs: env::var("ALERT_TIME_WINDOW")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),

            min_failed_attempts: env::var("MIN_FAILED_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),

            alert_cooldown_secs: env::var("ALERT_EMAIL_COOLDOWN")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),

            idle_timeout_secs: env::var("IDLE_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
        }
    }
}

#[cfg(test)]
impl Config {
    /// Small thresholds so tests do not need 90 samples per user
    pub fn for_tests() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            http_port: 0,
            dispatcher_port: 0,
            model_path: std::env::temp_dir()
                .join(format!("touchalytics-test-model-{}.json", std::process::id())),
            alert_webhook_url: None,
            min_strokes: 3,
            max_rows_per_user: 5,
            alert_time_window_secs: 10,
            min_failed_attempts: 3,
            alert_cooldown_secs: 300,
            idle_timeout_secs: 5,
        }
    }
}
