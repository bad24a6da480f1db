//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use nudge_common::config::{EngineConfig, QuiescenceConfig};
use nudge_common::types::{Outcome, Registration, SilentPayload};
use nudge_engine::dispatch::DispatchEngine;
use nudge_engine::failover::{Endpoint, FailoverPolicy};
use nudge_engine::memory::InMemoryRegistrationStore;
use nudge_engine::provider::PushProvider;
use nudge_engine::scheduler::SchedulingLoop;

// ============================================================
// Fake provider
// ============================================================

/// Provider answering from a per-token script, recording every call.
pub struct ScriptedProvider {
    default: Outcome,
    script: HashMap<String, Outcome>,
    delay: Duration,
    calls: Mutex<Vec<String>>,
    concurrent: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedProvider {
    pub fn accepting() -> Self {
        Self::answering(Outcome::Accepted)
    }

    pub fn answering(default: Outcome) -> Self {
        Self {
            default,
            script: HashMap::new(),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            concurrent: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with(mut self, token: &str, outcome: Outcome) -> Self {
        self.script.insert(token.to_string(), outcome);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Highest number of sends observed running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushProvider for ScriptedProvider {
    async fn send(&self, token: &str, _payload: &SilentPayload) -> Outcome {
        self.calls.lock().unwrap().push(token.to_string());
        let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.concurrent.fetch_sub(1, Ordering::SeqCst);
        self.script
            .get(token)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}

pub fn rejected(reason: &str) -> Outcome {
    Outcome::Rejected {
        reason: reason.to_string(),
    }
}

pub fn endpoint(name: &str, provider: Arc<ScriptedProvider>) -> Endpoint {
    Endpoint::new(name, provider, ["BadDeviceToken", "Unregistered"])
}

// ============================================================
// Registrations
// ============================================================

pub fn registration(token: &str, next: DateTime<Utc>) -> Registration {
    Registration {
        id: Uuid::new_v4(),
        token: token.to_string(),
        timezone: "Europe/Berlin".to_string(),
        locale: Some("de".to_string()),
        next_planned_delivery: next,
        last_success: None,
        last_failure: None,
        last_error_code: None,
        success_count: 0,
        failure_count: 0,
        active: true,
        deleted: false,
        created_at: next - chrono::Duration::days(30),
    }
}

// ============================================================
// Wiring
// ============================================================

pub fn engine_config(max_per_second: u32, max_outstanding: u32) -> EngineConfig {
    EngineConfig {
        max_per_second,
        max_outstanding,
    }
}

pub fn quiescence() -> QuiescenceConfig {
    QuiescenceConfig {
        poll_interval: Duration::from_millis(500),
        tolerance: Duration::from_secs(2),
    }
}

pub fn engine(
    store: Arc<InMemoryRegistrationStore>,
    endpoints: Vec<Endpoint>,
    config: EngineConfig,
    cancel: CancellationToken,
) -> DispatchEngine {
    DispatchEngine::new(config, FailoverPolicy::new(endpoints).unwrap(), store, cancel)
}

pub fn scheduler(
    store: Arc<InMemoryRegistrationStore>,
    endpoints: Vec<Endpoint>,
    cancel: CancellationToken,
) -> SchedulingLoop {
    let engine = engine(store.clone(), endpoints, engine_config(100, 10), cancel);
    SchedulingLoop::new(store, engine, 10, 20, quiescence())
}
