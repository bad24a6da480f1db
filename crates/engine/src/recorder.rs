//! Outcome recorder — turns a terminal delivery outcome into a storage write.
//!
//! Counters grow by exactly one per attempt no matter how many endpoints the
//! failover policy tried. The reschedule write is separate and has already
//! happened by the time an outcome is recorded.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use nudge_common::error::PushError;
use nudge_common::types::{FinalOutcome, Registration};

use crate::store::RegistrationStore;

/// Longest error code persisted for a transport failure.
pub const MAX_ERROR_CODE_CHARS: usize = 255;

/// Storage mutation derived from a terminal outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeMutation {
    Success {
        at: DateTime<Utc>,
        success_count: i64,
    },
    Failure {
        active: bool,
        at: DateTime<Utc>,
        failure_count: i64,
        error_code: String,
    },
}

impl OutcomeMutation {
    /// Compute the mutation for `registration` as snapshotted before the send.
    pub fn for_outcome(
        registration: &Registration,
        outcome: &FinalOutcome,
        now: DateTime<Utc>,
    ) -> Self {
        match outcome {
            FinalOutcome::Accepted { .. } => OutcomeMutation::Success {
                at: now,
                success_count: registration.success_count + 1,
            },
            FinalOutcome::RejectedTerminal { reason, .. } => OutcomeMutation::Failure {
                active: registration.active,
                at: now,
                failure_count: registration.failure_count + 1,
                error_code: reason.clone(),
            },
            // Rejected as invalid on every endpoint: the device is unreachable.
            FinalOutcome::RejectedExhausted { reason, .. } => OutcomeMutation::Failure {
                active: false,
                at: now,
                failure_count: registration.failure_count + 1,
                error_code: reason.clone(),
            },
            FinalOutcome::TransportError { message, .. } => OutcomeMutation::Failure {
                active: registration.active,
                at: now,
                failure_count: registration.failure_count + 1,
                error_code: truncate_chars(message, MAX_ERROR_CODE_CHARS),
            },
        }
    }
}

/// Applies terminal outcomes to persisted registrations.
#[derive(Clone)]
pub struct OutcomeRecorder {
    store: Arc<dyn RegistrationStore>,
}

impl OutcomeRecorder {
    pub fn new(store: Arc<dyn RegistrationStore>) -> Self {
        Self { store }
    }

    pub async fn record(
        &self,
        registration: &Registration,
        outcome: &FinalOutcome,
        now: DateTime<Utc>,
    ) -> Result<OutcomeMutation, PushError> {
        let mutation = OutcomeMutation::for_outcome(registration, outcome, now);

        match &mutation {
            OutcomeMutation::Success { at, success_count } => {
                self.store
                    .persist_success(registration.id, *at, *success_count)
                    .await?;
            }
            OutcomeMutation::Failure {
                active,
                at,
                failure_count,
                error_code,
            } => {
                self.store
                    .persist_failure(registration.id, *active, *at, *failure_count, error_code)
                    .await?;

                if registration.active && !active {
                    tracing::info!(
                        registration_id = %registration.id,
                        reason = %error_code,
                        "Registration deactivated"
                    );
                }
            }
        }

        Ok(mutation)
    }
}

/// Keep at most `max` characters, never splitting a UTF-8 sequence.
fn truncate_chars(message: &str, max: usize) -> String {
    match message.char_indices().nth(max) {
        Some((cut, _)) => message[..cut].to_string(),
        None => message.to_string(),
    }
}
