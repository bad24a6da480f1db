use std::time::Duration;

use serde::Deserialize;

use crate::types::DeliveryWindow;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Push gateway hosts, primary first (default: production then sandbox gateway)
    pub push_endpoints: Vec<String>,

    /// Topic (bundle identifier) sent with every push
    pub push_topic: String,

    /// Optional provider bearer token
    pub push_auth_token: Option<String>,

    /// Rejection reasons that trigger failover to the next endpoint (default: BadDeviceToken)
    pub push_retryable_reasons: Vec<String>,

    /// Per-request timeout against a push gateway in seconds (default: 30)
    pub push_request_timeout_secs: u64,

    /// Attempts allowed to start per second across all endpoints (default: 100)
    pub max_notifications_per_second: u32,

    /// Attempts allowed in flight at once (default: 50)
    pub max_outstanding_notifications: u32,

    /// First local hour of the daily delivery window (default: 10)
    pub delivery_min_hour: u32,

    /// Local hour at which the daily delivery window closes (default: 20)
    pub delivery_max_hour: u32,

    /// Seconds between scheduling passes (default: 60)
    pub scheduler_interval_secs: u64,

    /// Resample interval while waiting for in-flight attempts to drain (default: 5)
    pub quiescence_poll_secs: u64,

    /// How long the in-flight count must stay at zero before a pass ends (default: 30)
    pub quiescence_tolerance_secs: u64,
}

/// Budgets handed to the dispatch engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub max_per_second: u32,
    pub max_outstanding: u32,
}

/// Timing of the drain check at the end of a scheduling pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuiescenceConfig {
    pub poll_interval: Duration,
    pub tolerance: Duration,
}

impl Default for QuiescenceConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            tolerance: Duration::from_secs(30),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a valid u32"))?,
            push_endpoints: split_list(
                &std::env::var("PUSH_ENDPOINTS").unwrap_or_else(|_| {
                    "api.push.apple.com,api.sandbox.push.apple.com".to_string()
                }),
            ),
            push_topic: std::env::var("PUSH_TOPIC")
                .map_err(|_| anyhow::anyhow!("PUSH_TOPIC environment variable is required"))?,
            push_auth_token: std::env::var("PUSH_AUTH_TOKEN").ok(),
            push_retryable_reasons: split_list(
                &std::env::var("PUSH_RETRYABLE_REASONS")
                    .unwrap_or_else(|_| "BadDeviceToken".to_string()),
            ),
            push_request_timeout_secs: std::env::var("PUSH_REQUEST_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PUSH_REQUEST_TIMEOUT_SECS must be a valid u64"))?,
            max_notifications_per_second: std::env::var("MAX_NOTIFICATIONS_PER_SECOND")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("MAX_NOTIFICATIONS_PER_SECOND must be a valid u32"))?,
            max_outstanding_notifications: std::env::var("MAX_OUTSTANDING_NOTIFICATIONS")
                .unwrap_or_else(|_| "50".to_string())
                .parse()
                .map_err(|_| {
                    anyhow::anyhow!("MAX_OUTSTANDING_NOTIFICATIONS must be a valid u32")
                })?,
            delivery_min_hour: std::env::var("DELIVERY_MIN_HOUR")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DELIVERY_MIN_HOUR must be a valid u32"))?,
            delivery_max_hour: std::env::var("DELIVERY_MAX_HOUR")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DELIVERY_MAX_HOUR must be a valid u32"))?,
            scheduler_interval_secs: std::env::var("SCHEDULER_INTERVAL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("SCHEDULER_INTERVAL_SECS must be a valid u64"))?,
            quiescence_poll_secs: std::env::var("QUIESCENCE_POLL_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("QUIESCENCE_POLL_SECS must be a valid u64"))?,
            quiescence_tolerance_secs: std::env::var("QUIESCENCE_TOLERANCE_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("QUIESCENCE_TOLERANCE_SECS must be a valid u64"))?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.push_endpoints.is_empty() {
            anyhow::bail!("PUSH_ENDPOINTS must name at least one host");
        }
        if self.max_notifications_per_second == 0 {
            anyhow::bail!("MAX_NOTIFICATIONS_PER_SECOND must be greater than zero");
        }
        if self.max_outstanding_notifications == 0 {
            anyhow::bail!("MAX_OUTSTANDING_NOTIFICATIONS must be greater than zero");
        }
        DeliveryWindow::new(self.delivery_min_hour, self.delivery_max_hour)
            .map_err(|e| anyhow::anyhow!("invalid delivery window: {e}"))?;
        Ok(())
    }

    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            max_per_second: self.max_notifications_per_second,
            max_outstanding: self.max_outstanding_notifications,
        }
    }

    pub fn quiescence(&self) -> QuiescenceConfig {
        QuiescenceConfig {
            poll_interval: Duration::from_secs(self.quiescence_poll_secs),
            tolerance: Duration::from_secs(self.quiescence_tolerance_secs),
        }
    }
}

/// Split a comma-separated environment value, dropping blanks.
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
