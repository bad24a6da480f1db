//! Scheduling loop — one pass over the due registrations.
//!
//! `Idle → Streaming → Draining → Idle`. While streaming, every due
//! registration is given its next delivery slot, the slot is persisted, and
//! only then is the registration submitted to the dispatch engine. Persisting
//! first means a slow send or a crash can never cause a second attempt on the
//! same local day. After the stream ends the pass waits for the engine to
//! drain before returning.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::time::{Instant, MissedTickBehavior};

use nudge_common::config::QuiescenceConfig;
use nudge_common::error::PushError;

use crate::dispatch::{DispatchEngine, StatsSnapshot};
use crate::quiescence::wait_for_quiescence;
use crate::reschedule::next_delivery_instant;
use crate::store::RegistrationStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Streaming,
    Draining,
}

impl SchedulerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SchedulerState::Streaming,
            2 => SchedulerState::Draining,
            _ => SchedulerState::Idle,
        }
    }
}

/// What a completed pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Due registrations read from storage.
    pub scanned: u64,
    /// Registrations handed to the dispatch engine.
    pub submitted: u64,
    /// Registrations left for the next pass (reschedule failed).
    pub skipped: u64,
    /// Engine totals at the end of the pass.
    pub stats: StatsSnapshot,
}

pub struct SchedulingLoop {
    store: Arc<dyn RegistrationStore>,
    engine: DispatchEngine,
    min_hour: u32,
    max_hour: u32,
    quiescence: QuiescenceConfig,
    state: AtomicU8,
    running: AtomicBool,
}

/// Returns the loop to `Idle` however the pass ends.
struct PassGuard<'a> {
    state: &'a AtomicU8,
    running: &'a AtomicBool,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.state.store(SchedulerState::Idle as u8, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }
}

impl SchedulingLoop {
    pub fn new(
        store: Arc<dyn RegistrationStore>,
        engine: DispatchEngine,
        min_hour: u32,
        max_hour: u32,
        quiescence: QuiescenceConfig,
    ) -> Self {
        Self {
            store,
            engine,
            min_hour,
            max_hour,
            quiescence,
            state: AtomicU8::new(SchedulerState::Idle as u8),
            running: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn engine(&self) -> &DispatchEngine {
        &self.engine
    }

    fn set_state(&self, state: SchedulerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Run one pass. Returns only after the dispatch engine is quiescent.
    ///
    /// Fails with [`PushError::Cancelled`] on shutdown, with
    /// [`PushError::PassInProgress`] if another pass is running, and with the
    /// storage error if the due-registration stream breaks.
    pub async fn run_scheduling_pass(&self) -> Result<PassSummary, PushError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(PushError::PassInProgress);
        }
        let _guard = PassGuard {
            state: &self.state,
            running: &self.running,
        };

        let started = Instant::now();
        let mut summary = PassSummary::default();
        let mut stream_error = None;

        self.set_state(SchedulerState::Streaming);
        tracing::info!("Scheduling pass started");

        let mut due = self.store.stream_due(Utc::now());
        while let Some(item) = due.next().await {
            let registration = match item {
                Ok(registration) => registration,
                Err(e) => {
                    tracing::error!(error = %e, "Due registration stream failed");
                    stream_error = Some(e);
                    break;
                }
            };
            summary.scanned += 1;

            let planned = next_delivery_instant(
                &registration.timezone,
                self.min_hour,
                self.max_hour,
                Utc::now(),
                &mut rand::thread_rng(),
            );
            let next = match planned {
                Ok(next) => next,
                Err(e) => {
                    // Left due; it will be picked up again by the next pass.
                    tracing::error!(
                        registration_id = %registration.id,
                        error = %e,
                        "Cannot reschedule registration, skipping"
                    );
                    summary.skipped += 1;
                    continue;
                }
            };

            if let Err(e) = self.store.persist_reschedule(registration.id, next).await {
                tracing::error!(
                    registration_id = %registration.id,
                    error = %e,
                    "Failed to persist reschedule, skipping"
                );
                summary.skipped += 1;
                continue;
            }

            tracing::debug!(
                registration_id = %registration.id,
                next_planned_delivery = %next,
                "Registration rescheduled"
            );

            if let Err(e) = self.engine.submit(registration).await {
                tracing::warn!(
                    error = %e,
                    scanned = summary.scanned,
                    submitted = summary.submitted,
                    "Scheduling pass interrupted"
                );
                return Err(e);
            }
            summary.submitted += 1;
        }
        drop(due);

        self.set_state(SchedulerState::Draining);
        tracing::info!(
            submitted = summary.submitted,
            in_flight = self.engine.in_flight(),
            "Streaming finished, draining"
        );

        wait_for_quiescence(
            || self.engine.in_flight(),
            self.quiescence,
            self.engine.cancellation_token(),
        )
        .await
        .inspect_err(|e| tracing::warn!(error = %e, "Scheduling pass interrupted while draining"))?;

        summary.stats = self.engine.stats();

        if let Some(e) = stream_error {
            return Err(e);
        }

        tracing::info!(
            scanned = summary.scanned,
            submitted = summary.submitted,
            skipped = summary.skipped,
            completed_total = summary.stats.completed(),
            accepted_total = summary.stats.accepted,
            rejected_terminal_total = summary.stats.rejected_terminal,
            rejected_exhausted_total = summary.stats.rejected_exhausted,
            transport_errors_total = summary.stats.transport_errors,
            duration_ms = started.elapsed().as_millis() as u64,
            "Scheduling pass finished"
        );

        Ok(summary)
    }

    /// Run passes on a fixed interval until the engine's cancellation token fires.
    ///
    /// A pass that overruns the interval delays the next tick instead of
    /// triggering a burst of back-to-back passes.
    pub async fn run(&self, interval: Duration) {
        let cancel = self.engine.cancellation_token().clone();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = interval.as_secs(),
            min_hour = self.min_hour,
            max_hour = self.max_hour,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.run_scheduling_pass().await {
                Ok(_) => {}
                Err(PushError::Cancelled) => break,
                Err(e) => tracing::error!(error = %e, "Scheduling pass failed"),
            }
        }

        tracing::info!("Scheduler stopped");
    }
}
