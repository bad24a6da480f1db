//! Scheduling pass integration tests against the in-memory store and a
//! scripted provider. Time is paused so drain waits complete instantly.

mod support;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use nudge_common::error::PushError;
use nudge_common::types::Outcome;
use nudge_engine::memory::InMemoryRegistrationStore;
use nudge_engine::scheduler::{SchedulerState, SchedulingLoop};

use support::{ScriptedProvider, endpoint, engine, engine_config, quiescence, registration, rejected};

// ============================================================
// Outcome bookkeeping
// ============================================================

#[tokio::test(start_paused = true)]
async fn test_accepted_by_first_endpoint() {
    let store = Arc::new(InMemoryRegistrationStore::new());
    let reg = registration("aaaa", Utc::now());
    store.insert(reg.clone());

    let primary = Arc::new(ScriptedProvider::accepting());
    let secondary = Arc::new(ScriptedProvider::accepting());
    let scheduler = support::scheduler(
        store.clone(),
        vec![endpoint("primary", primary.clone()), endpoint("secondary", secondary.clone())],
        CancellationToken::new(),
    );

    let summary = scheduler.run_scheduling_pass().await.unwrap();
    assert_eq!(summary.scanned, 1);
    assert_eq!(summary.submitted, 1);
    assert_eq!(summary.stats.accepted, 1);

    let stored = store.get(reg.id).unwrap();
    assert_eq!(stored.success_count, 1);
    assert_eq!(stored.failure_count, 0);
    assert!(stored.active);
    assert!(stored.last_error_code.is_none());
    assert!(stored.last_success.is_some());
    assert!(stored.next_planned_delivery > Utc::now());
    assert_eq!(secondary.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_retryable_on_every_endpoint_deactivates() {
    let store = Arc::new(InMemoryRegistrationStore::new());
    let reg = registration("bbbb", Utc::now());
    store.insert(reg.clone());

    let primary = Arc::new(ScriptedProvider::answering(rejected("BadDeviceToken")));
    let secondary = Arc::new(ScriptedProvider::answering(rejected("Unregistered")));
    let scheduler = support::scheduler(
        store.clone(),
        vec![endpoint("primary", primary.clone()), endpoint("secondary", secondary.clone())],
        CancellationToken::new(),
    );

    scheduler.run_scheduling_pass().await.unwrap();

    let stored = store.get(reg.id).unwrap();
    assert!(!stored.active);
    // Once per attempt, not once per endpoint.
    assert_eq!(stored.failure_count, 1);
    assert_eq!(stored.last_error_code.as_deref(), Some("Unregistered"));
    assert_eq!(primary.call_count(), 1);
    assert_eq!(secondary.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retryable_then_accepted_is_success() {
    let store = Arc::new(InMemoryRegistrationStore::new());
    let reg = registration("cccc", Utc::now());
    store.insert(reg.clone());

    let primary = Arc::new(ScriptedProvider::answering(rejected("BadDeviceToken")));
    let secondary = Arc::new(ScriptedProvider::accepting());
    let scheduler = support::scheduler(
        store.clone(),
        vec![endpoint("primary", primary), endpoint("secondary", secondary)],
        CancellationToken::new(),
    );

    scheduler.run_scheduling_pass().await.unwrap();

    let stored = store.get(reg.id).unwrap();
    assert!(stored.active);
    assert_eq!(stored.success_count, 1);
    assert_eq!(stored.failure_count, 0);
    assert!(stored.last_error_code.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_terminal_rejection_stops_failover() {
    let store = Arc::new(InMemoryRegistrationStore::new());
    let reg = registration("dddd", Utc::now());
    store.insert(reg.clone());

    let primary = Arc::new(ScriptedProvider::answering(rejected("TopicDisallowed")));
    let secondary = Arc::new(ScriptedProvider::accepting());
    let scheduler = support::scheduler(
        store.clone(),
        vec![endpoint("primary", primary), endpoint("secondary", secondary.clone())],
        CancellationToken::new(),
    );

    scheduler.run_scheduling_pass().await.unwrap();

    let stored = store.get(reg.id).unwrap();
    assert!(stored.active);
    assert_eq!(stored.failure_count, 1);
    assert_eq!(stored.last_error_code.as_deref(), Some("TopicDisallowed"));
    assert_eq!(secondary.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_transport_error_recorded_without_failover() {
    let store = Arc::new(InMemoryRegistrationStore::new());
    let reg = registration("eeee", Utc::now());
    store.insert(reg.clone());

    let primary = Arc::new(ScriptedProvider::answering(Outcome::TransportError {
        message: "x".repeat(400),
    }));
    let secondary = Arc::new(ScriptedProvider::accepting());
    let scheduler = support::scheduler(
        store.clone(),
        vec![endpoint("primary", primary), endpoint("secondary", secondary.clone())],
        CancellationToken::new(),
    );

    scheduler.run_scheduling_pass().await.unwrap();

    let stored = store.get(reg.id).unwrap();
    assert!(stored.active);
    assert_eq!(stored.failure_count, 1);
    assert_eq!(stored.last_error_code.map(|c| c.len()), Some(255));
    assert_eq!(secondary.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_end_to_end_three_registrations() {
    let now = Utc::now();
    let store = Arc::new(InMemoryRegistrationStore::new());
    let accepted = registration("token-ok", now);
    let tomorrow = registration("token-later", now + chrono::Duration::days(1));
    let bad = registration("token-bad", now);
    for r in [&accepted, &tomorrow, &bad] {
        store.insert(r.clone());
    }

    let gateway = Arc::new(
        ScriptedProvider::accepting().with("token-bad", rejected("BadDeviceToken")),
    );
    let scheduler = support::scheduler(
        store.clone(),
        vec![endpoint("gateway", gateway.clone())],
        CancellationToken::new(),
    );

    let summary = scheduler.run_scheduling_pass().await.unwrap();
    assert_eq!(summary.scanned, 2);

    let first = store.get(accepted.id).unwrap();
    assert_eq!(first.success_count, 1);
    assert!(first.active);

    assert_eq!(store.get(tomorrow.id).unwrap(), tomorrow);

    let third = store.get(bad.id).unwrap();
    assert!(!third.active);
    assert_eq!(third.failure_count, 1);
    assert_eq!(third.last_error_code.as_deref(), Some("BadDeviceToken"));

    let mut calls = gateway.calls();
    calls.sort();
    assert_eq!(calls, vec!["token-bad".to_string(), "token-ok".to_string()]);
}

// ============================================================
// Rescheduling
// ============================================================

#[tokio::test(start_paused = true)]
async fn test_second_pass_finds_nothing_due() {
    let store = Arc::new(InMemoryRegistrationStore::new());
    for i in 0..5 {
        store.insert(registration(&format!("t{i}"), Utc::now()));
    }

    let gateway = Arc::new(ScriptedProvider::accepting());
    let scheduler = support::scheduler(
        store.clone(),
        vec![endpoint("gateway", gateway.clone())],
        CancellationToken::new(),
    );

    assert_eq!(scheduler.run_scheduling_pass().await.unwrap().submitted, 5);
    let second = scheduler.run_scheduling_pass().await.unwrap();
    assert_eq!(second.scanned, 0);
    assert_eq!(gateway.call_count(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_failed_registration_still_rescheduled() {
    let store = Arc::new(InMemoryRegistrationStore::new());
    let reg = registration("ffff", Utc::now());
    store.insert(reg.clone());

    let gateway = Arc::new(ScriptedProvider::answering(rejected("TopicDisallowed")));
    let scheduler = support::scheduler(
        store.clone(),
        vec![endpoint("gateway", gateway)],
        CancellationToken::new(),
    );
    scheduler.run_scheduling_pass().await.unwrap();

    let stored = store.get(reg.id).unwrap();
    assert!(stored.next_planned_delivery > Utc::now());
}

#[tokio::test(start_paused = true)]
async fn test_invalid_window_leaves_registrations_due() {
    let store = Arc::new(InMemoryRegistrationStore::new());
    let reg = registration("gggg", Utc::now() - chrono::Duration::minutes(5));
    store.insert(reg.clone());

    let gateway = Arc::new(ScriptedProvider::accepting());
    let cancel = CancellationToken::new();
    let engine = engine(
        store.clone(),
        vec![endpoint("gateway", gateway.clone())],
        engine_config(100, 10),
        cancel,
    );
    let scheduler = SchedulingLoop::new(store.clone(), engine, 9, 9, quiescence());

    let summary = scheduler.run_scheduling_pass().await.unwrap();
    assert_eq!(summary.scanned, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.submitted, 0);
    assert_eq!(gateway.call_count(), 0);
    assert_eq!(store.get(reg.id).unwrap(), reg);
}

#[tokio::test(start_paused = true)]
async fn test_tokens_are_sent_lower_cased() {
    let store = Arc::new(InMemoryRegistrationStore::new());
    store.insert(registration("ABCDEF01", Utc::now()));

    let gateway = Arc::new(ScriptedProvider::accepting());
    let scheduler = support::scheduler(
        store.clone(),
        vec![endpoint("gateway", gateway.clone())],
        CancellationToken::new(),
    );
    scheduler.run_scheduling_pass().await.unwrap();

    assert_eq!(gateway.calls(), vec!["abcdef01".to_string()]);
}

// ============================================================
// Pass lifecycle
// ============================================================

#[tokio::test(start_paused = true)]
async fn test_overlapping_pass_is_refused() {
    let store = Arc::new(InMemoryRegistrationStore::new());
    store.insert(registration("slow", Utc::now()));

    let gateway = Arc::new(ScriptedProvider::accepting().with_delay(Duration::from_secs(3)));
    let scheduler = Arc::new(support::scheduler(
        store.clone(),
        vec![endpoint("gateway", gateway)],
        CancellationToken::new(),
    ));
    assert_eq!(scheduler.state(), SchedulerState::Idle);

    let running = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run_scheduling_pass().await })
    };

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(scheduler.state(), SchedulerState::Draining);
    assert!(matches!(
        scheduler.run_scheduling_pass().await,
        Err(PushError::PassInProgress)
    ));

    let summary = running.await.unwrap().unwrap();
    assert_eq!(summary.stats.accepted, 1);
    assert_eq!(scheduler.state(), SchedulerState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_while_streaming() {
    let store = Arc::new(InMemoryRegistrationStore::new());
    for i in 0..5 {
        store.insert(registration(&format!("token-{i}"), Utc::now()));
    }

    let gateway = Arc::new(ScriptedProvider::accepting());
    let cancel = CancellationToken::new();
    let engine = engine(
        store.clone(),
        vec![endpoint("gateway", gateway.clone())],
        engine_config(1, 10),
        cancel.clone(),
    );
    let scheduler = SchedulingLoop::new(store.clone(), engine, 10, 20, quiescence());

    // One token at t=0, one at t=1s; the third submit is still waiting at 1.5s.
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1500)).await;
        trigger.cancel();
    });

    let result = scheduler.run_scheduling_pass().await;
    assert!(matches!(result, Err(PushError::Cancelled)));
    assert_eq!(scheduler.state(), SchedulerState::Idle);
    assert_eq!(scheduler.engine().stats().submitted, 2);
    assert_eq!(gateway.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_while_draining() {
    let store = Arc::new(InMemoryRegistrationStore::new());
    store.insert(registration("slow", Utc::now()));

    let gateway = Arc::new(ScriptedProvider::accepting().with_delay(Duration::from_secs(60)));
    let cancel = CancellationToken::new();
    let scheduler = support::scheduler(
        store.clone(),
        vec![endpoint("gateway", gateway)],
        cancel.clone(),
    );

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        trigger.cancel();
    });

    let result = scheduler.run_scheduling_pass().await;
    assert!(matches!(result, Err(PushError::Cancelled)));
    assert_eq!(scheduler.state(), SchedulerState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_run_stops_on_cancel() {
    let store = Arc::new(InMemoryRegistrationStore::new());
    store.insert(registration("hhhh", Utc::now()));

    let gateway = Arc::new(ScriptedProvider::accepting());
    let cancel = CancellationToken::new();
    let scheduler = support::scheduler(
        store.clone(),
        vec![endpoint("gateway", gateway.clone())],
        cancel.clone(),
    );

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(150)).await;
        trigger.cancel();
    });

    scheduler.run(Duration::from_secs(60)).await;
    assert_eq!(gateway.call_count(), 1);
    assert_eq!(scheduler.state(), SchedulerState::Idle);
}
