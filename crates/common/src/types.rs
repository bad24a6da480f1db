use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PushError;

/// A device's push-eligibility record.
///
/// Created and edited by the registration API. The scheduler only touches the
/// delivery bookkeeping columns and may flip `active` off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Registration {
    pub id: Uuid,
    /// Provider device token. Case-insensitive at the provider.
    pub token: String,
    /// IANA zone name, e.g. `Europe/Berlin`
    pub timezone: String,
    pub locale: Option<String>,
    pub next_planned_delivery: DateTime<Utc>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error_code: Option<String>,
    pub success_count: i64,
    pub failure_count: i64,
    pub active: bool,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl Registration {
    /// A registration is eligible for dispatch iff it is active, not deleted and due.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.active && !self.deleted && self.next_planned_delivery <= now
    }
}

/// Result of a single send through one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Accepted,
    Rejected { reason: String },
    TransportError { message: String },
}

/// Terminal result of a delivery attempt after endpoint failover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalOutcome {
    /// An endpoint accepted the notification.
    Accepted { endpoint: String },
    /// A rejection outside the retryable set. No further endpoints were tried.
    RejectedTerminal { endpoint: String, reason: String },
    /// Every configured endpoint returned a retryable rejection.
    /// `reason` is the last endpoint's reason; `rejections` holds one entry per endpoint tried.
    RejectedExhausted {
        reason: String,
        rejections: Vec<(String, String)>,
    },
    /// The provider could not be reached at all.
    TransportError { endpoint: String, message: String },
}

impl FinalOutcome {
    /// Short label used in structured log fields.
    pub fn label(&self) -> &'static str {
        match self {
            FinalOutcome::Accepted { .. } => "accepted",
            FinalOutcome::RejectedTerminal { .. } => "rejected_terminal",
            FinalOutcome::RejectedExhausted { .. } => "rejected_exhausted",
            FinalOutcome::TransportError { .. } => "transport_error",
        }
    }

    /// Endpoint that produced the terminal result.
    pub fn endpoint(&self) -> &str {
        match self {
            FinalOutcome::Accepted { endpoint }
            | FinalOutcome::RejectedTerminal { endpoint, .. }
            | FinalOutcome::TransportError { endpoint, .. } => endpoint,
            FinalOutcome::RejectedExhausted { rejections, .. } => rejections
                .last()
                .map(|(endpoint, _)| endpoint.as_str())
                .unwrap_or(""),
        }
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        match self {
            FinalOutcome::RejectedTerminal { reason, .. }
            | FinalOutcome::RejectedExhausted { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

/// Daily local-time window in which deliveries are planned, `[min_hour, max_hour)`.
///
/// `max_hour < min_hour` wraps past midnight, e.g. `23..2` covers 23:00, 00:00 and 01:00.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryWindow {
    min_hour: u32,
    max_hour: u32,
}

impl DeliveryWindow {
    pub fn new(min_hour: u32, max_hour: u32) -> Result<Self, PushError> {
        let window = Self { min_hour, max_hour };
        if min_hour > 23 || max_hour > 24 || window.span() == 0 {
            return Err(PushError::InvalidWindow { min_hour, max_hour });
        }
        Ok(window)
    }

    pub fn min_hour(&self) -> u32 {
        self.min_hour
    }

    pub fn max_hour(&self) -> u32 {
        self.max_hour
    }

    /// Number of whole hours in the window.
    pub fn span(&self) -> u32 {
        if self.max_hour < self.min_hour {
            24 - self.min_hour + self.max_hour
        } else {
            self.max_hour - self.min_hour
        }
    }

    /// Whether `hour` lies inside the window, accounting for wraparound.
    pub fn contains(&self, hour: u32) -> bool {
        let offset = (hour + 24 - self.min_hour) % 24;
        offset < self.span()
    }
}

/// Alert body of a silent wake-up push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Aps {
    #[serde(rename = "content-available")]
    pub content_available: u8,
    pub badge: u32,
}

/// The fixed minimal payload sent to every device.
///
/// Only `aps` goes into the request body; priority, push type and expiration
/// travel as request headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SilentPayload {
    pub aps: Aps,
    #[serde(skip)]
    pub push_type: &'static str,
    #[serde(skip)]
    pub priority: u8,
    #[serde(skip)]
    pub expiration: Duration,
}

impl SilentPayload {
    /// Background wake-up: content-available, zero badge, low priority, 24h expiration.
    pub fn wake_up() -> Self {
        Self {
            aps: Aps {
                content_available: 1,
                badge: 0,
            },
            push_type: "background",
            priority: 5,
            expiration: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Absolute expiry as a unix timestamp, relative to `now`.
    pub fn expires_at(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp() + self.expiration.as_secs() as i64
    }
}
