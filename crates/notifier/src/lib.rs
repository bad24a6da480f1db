//! HTTP push gateway provider.
//!
//! Sends the silent wake-up payload to an APNs-style HTTP/2 gateway:
//! `POST {base}/3/device/{token}` with push metadata in headers. A 2xx
//! response is an acceptance, any other status is a rejection carrying the
//! gateway's `reason`, and a request that never gets a response is a
//! transport error.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use serde::Deserialize;

use nudge_common::error::PushError;
use nudge_common::types::{Outcome, SilentPayload};
use nudge_engine::provider::PushProvider;

/// Error body returned by the gateway on rejection.
#[derive(Debug, Deserialize)]
struct RejectionBody {
    reason: Option<String>,
}

/// Push provider bound to a single gateway host.
#[derive(Debug, Clone)]
pub struct HttpPushProvider {
    client: reqwest::Client,
    base_url: String,
    topic: String,
    auth_token: Option<String>,
}

impl HttpPushProvider {
    /// `host` is a bare host name (`api.push.apple.com`) or a full base URL.
    pub fn new(
        host: &str,
        topic: impl Into<String>,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, PushError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PushError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url(host),
            topic: topic.into(),
            auth_token,
        })
    }

    fn device_url(&self, token: &str) -> String {
        format!("{}/3/device/{}", self.base_url, token)
    }
}

#[async_trait]
impl PushProvider for HttpPushProvider {
    async fn send(&self, token: &str, payload: &SilentPayload) -> Outcome {
        let mut request = self
            .client
            .post(self.device_url(token))
            .header("apns-push-type", payload.push_type)
            .header("apns-priority", payload.priority.to_string())
            .header("apns-expiration", payload.expires_at(Utc::now()).to_string())
            .header("apns-topic", &self.topic)
            .json(payload);

        if let Some(auth) = &self.auth_token {
            request = request.header("authorization", format!("bearer {auth}"));
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(gateway = %self.base_url, error = %e, "Push gateway unreachable");
                return Outcome::TransportError {
                    message: e.to_string(),
                };
            }
        };

        let status = response.status();
        if status.is_success() {
            return Outcome::Accepted;
        }

        match response.text().await {
            Ok(body) => classify_rejection(status, &body),
            Err(e) => Outcome::TransportError {
                message: format!("failed to read {status} response: {e}"),
            },
        }
    }
}

fn base_url(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

/// Map a non-success response to a rejection.
///
/// Falls back to the status' canonical reason when the body carries none.
fn classify_rejection(status: StatusCode, body: &str) -> Outcome {
    let reason = serde_json::from_str::<RejectionBody>(body)
        .ok()
        .and_then(|b| b.reason)
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .map(str::to_string)
                .unwrap_or_else(|| status.as_u16().to_string())
        });

    Outcome::Rejected { reason }
}
