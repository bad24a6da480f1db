//! Endpoint failover policy.
//!
//! Walks the configured endpoints in order (primary first) for one logical
//! notification:
//! - `Accepted` ends the walk successfully.
//! - A rejection outside the endpoint's retryable set ends it as terminal.
//!   Such rejections do not depend on the endpoint, so trying the next one
//!   would only repeat them.
//! - A retryable rejection moves on to the next endpoint, or ends as
//!   exhausted when none remain.
//! - A transport error ends the walk immediately without failover.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use nudge_common::error::PushError;
use nudge_common::types::{FinalOutcome, Outcome, SilentPayload};

use crate::provider::PushProvider;

/// One configured provider connection.
#[derive(Clone)]
pub struct Endpoint {
    name: String,
    provider: Arc<dyn PushProvider>,
    retryable_reasons: HashSet<String>,
}

impl Endpoint {
    pub fn new<I, S>(name: impl Into<String>, provider: Arc<dyn PushProvider>, retryable: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            provider,
            retryable_reasons: retryable.into_iter().map(Into::into).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether `reason` means "try the next endpoint" for this provider.
    pub fn is_retryable(&self, reason: &str) -> bool {
        self.retryable_reasons.contains(reason)
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("retryable_reasons", &self.retryable_reasons)
            .finish_non_exhaustive()
    }
}

/// A single send through one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointAttempt {
    pub endpoint: String,
    pub outcome: Outcome,
    pub duration: Duration,
}

/// Terminal outcome plus the per-endpoint trail that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub outcome: FinalOutcome,
    pub attempts: Vec<EndpointAttempt>,
}

impl DeliveryReport {
    pub fn duration(&self) -> Duration {
        self.attempts.iter().map(|a| a.duration).sum()
    }
}

/// Ordered endpoint chain.
#[derive(Debug, Clone)]
pub struct FailoverPolicy {
    endpoints: Vec<Endpoint>,
}

impl FailoverPolicy {
    pub fn new(endpoints: Vec<Endpoint>) -> Result<Self, PushError> {
        if endpoints.is_empty() {
            return Err(PushError::Config(
                "at least one push endpoint is required".to_string(),
            ));
        }
        Ok(Self { endpoints })
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Deliver `payload` to `token`, failing over on retryable rejections.
    pub async fn deliver(&self, token: &str, payload: &SilentPayload) -> DeliveryReport {
        let mut attempts = Vec::with_capacity(self.endpoints.len());
        let mut rejections: Vec<(String, String)> = Vec::new();

        for (index, endpoint) in self.endpoints.iter().enumerate() {
            let started = Instant::now();
            let outcome = endpoint.provider.send(token, payload).await;
            attempts.push(EndpointAttempt {
                endpoint: endpoint.name.clone(),
                outcome: outcome.clone(),
                duration: started.elapsed(),
            });

            let remaining = self.endpoints.len() - index - 1;

            match outcome {
                Outcome::Accepted => {
                    return DeliveryReport {
                        outcome: FinalOutcome::Accepted {
                            endpoint: endpoint.name.clone(),
                        },
                        attempts,
                    };
                }
                Outcome::TransportError { message } => {
                    return DeliveryReport {
                        outcome: FinalOutcome::TransportError {
                            endpoint: endpoint.name.clone(),
                            message,
                        },
                        attempts,
                    };
                }
                Outcome::Rejected { reason } if !endpoint.is_retryable(&reason) => {
                    return DeliveryReport {
                        outcome: FinalOutcome::RejectedTerminal {
                            endpoint: endpoint.name.clone(),
                            reason,
                        },
                        attempts,
                    };
                }
                Outcome::Rejected { reason } => {
                    tracing::debug!(
                        endpoint = %endpoint.name,
                        reason = %reason,
                        remaining,
                        "Retryable rejection"
                    );
                    rejections.push((endpoint.name.clone(), reason));
                }
            }
        }

        // Every endpoint returned a retryable rejection.
        let reason = rejections
            .last()
            .map(|(_, reason)| reason.clone())
            .unwrap_or_default();

        DeliveryReport {
            outcome: FinalOutcome::RejectedExhausted { reason, rejections },
            attempts,
        }
    }
}
