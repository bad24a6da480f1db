//! Dispatch engine — paces, sends and records one delivery attempt per submission.
//!
//! `submit` waits on the rate limiter, then on the admission controller, and
//! then spawns the attempt. The spawned task walks the endpoint chain, records
//! the outcome and releases its admission permit when it ends. Business
//! outcomes never surface as errors; `submit` fails only when shutdown
//! interrupts one of the waits.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use nudge_common::config::EngineConfig;
use nudge_common::error::PushError;
use nudge_common::types::{FinalOutcome, Registration, SilentPayload};

use crate::admission::{AdmissionController, AdmissionPermit};
use crate::failover::FailoverPolicy;
use crate::rate_limiter::RateLimiter;
use crate::recorder::OutcomeRecorder;
use crate::store::RegistrationStore;

/// Running totals of terminal outcomes since the engine started.
#[derive(Debug, Default)]
pub struct EngineStats {
    submitted: AtomicU64,
    accepted: AtomicU64,
    rejected_terminal: AtomicU64,
    rejected_exhausted: AtomicU64,
    transport_errors: AtomicU64,
    recorder_failures: AtomicU64,
}

/// Point-in-time copy of [`EngineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub submitted: u64,
    pub accepted: u64,
    pub rejected_terminal: u64,
    pub rejected_exhausted: u64,
    pub transport_errors: u64,
    pub recorder_failures: u64,
}

impl StatsSnapshot {
    /// Attempts that have reached a terminal outcome.
    pub fn completed(&self) -> u64 {
        self.accepted + self.rejected_terminal + self.rejected_exhausted + self.transport_errors
    }
}

impl EngineStats {
    fn record(&self, outcome: &FinalOutcome) {
        let counter = match outcome {
            FinalOutcome::Accepted { .. } => &self.accepted,
            FinalOutcome::RejectedTerminal { .. } => &self.rejected_terminal,
            FinalOutcome::RejectedExhausted { .. } => &self.rejected_exhausted,
            FinalOutcome::TransportError { .. } => &self.transport_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected_terminal: self.rejected_terminal.load(Ordering::Relaxed),
            rejected_exhausted: self.rejected_exhausted.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            recorder_failures: self.recorder_failures.load(Ordering::Relaxed),
        }
    }
}

/// Shared state handed to every spawned attempt.
struct AttemptContext {
    policy: FailoverPolicy,
    recorder: OutcomeRecorder,
    payload: SilentPayload,
    stats: EngineStats,
    admission: AdmissionController,
}

/// Composes rate limiting, admission, failover and outcome recording.
pub struct DispatchEngine {
    rate_limiter: RateLimiter,
    ctx: Arc<AttemptContext>,
    cancel: CancellationToken,
}

impl DispatchEngine {
    /// Build an engine on the current tokio runtime.
    ///
    /// `cancel` interrupts pending rate-limit and admission waits; attempts
    /// already spawned run to completion.
    pub fn new(
        config: EngineConfig,
        policy: FailoverPolicy,
        store: Arc<dyn RegistrationStore>,
        cancel: CancellationToken,
    ) -> Self {
        tracing::info!(
            max_per_second = config.max_per_second,
            max_outstanding = config.max_outstanding,
            endpoints = policy.endpoints().len(),
            "Dispatch engine started"
        );

        Self {
            rate_limiter: RateLimiter::start(config.max_per_second, &cancel),
            ctx: Arc::new(AttemptContext {
                policy,
                recorder: OutcomeRecorder::new(store),
                payload: SilentPayload::wake_up(),
                stats: EngineStats::default(),
                admission: AdmissionController::new(config.max_outstanding),
            }),
            cancel,
        }
    }

    /// Start a delivery attempt for `registration`.
    ///
    /// Returns once the attempt has been admitted; it completes in the background.
    pub async fn submit(&self, registration: Registration) -> Result<(), PushError> {
        self.rate_limiter.acquire(&self.cancel).await?;
        let permit = self.ctx.admission.acquire(&self.cancel).await?;

        self.ctx.stats.submitted.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(run_attempt(self.ctx.clone(), registration, permit));
        Ok(())
    }

    /// Attempts admitted but not yet recorded.
    pub fn in_flight(&self) -> usize {
        self.ctx.admission.in_flight()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.ctx.stats.snapshot()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

async fn run_attempt(ctx: Arc<AttemptContext>, registration: Registration, permit: AdmissionPermit) {
    // Released when this task ends, whatever path it takes.
    let _permit = permit;

    let token = registration.token.to_ascii_lowercase();
    let report = ctx.policy.deliver(&token, &ctx.payload).await;
    ctx.stats.record(&report.outcome);

    if let Err(e) = ctx
        .recorder
        .record(&registration, &report.outcome, Utc::now())
        .await
    {
        ctx.stats.recorder_failures.fetch_add(1, Ordering::Relaxed);
        tracing::error!(
            registration_id = %registration.id,
            outcome = report.outcome.label(),
            error = %e,
            "Failed to record delivery outcome"
        );
    }

    tracing::info!(
        registration_id = %registration.id,
        endpoint = report.outcome.endpoint(),
        outcome = report.outcome.label(),
        reason = report.outcome.rejection_reason().unwrap_or("none"),
        endpoints_tried = report.attempts.len(),
        duration_ms = report.duration().as_millis() as u64,
        in_flight = ctx.admission.in_flight(),
        "Delivery attempt finished"
    );
}
