//! In-memory registration store.
//!
//! Backs the engine's tests and local dry runs. Holds registrations in a
//! mutex-guarded map; `stream_due` snapshots the due rows at call time.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use uuid::Uuid;

use nudge_common::error::PushError;
use nudge_common::types::Registration;

use crate::store::RegistrationStore;

#[derive(Debug, Default)]
pub struct InMemoryRegistrationStore {
    rows: Mutex<HashMap<Uuid, Registration>>,
}

impl InMemoryRegistrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a registration.
    pub fn insert(&self, registration: Registration) {
        self.rows().insert(registration.id, registration);
    }

    pub fn get(&self, id: Uuid) -> Option<Registration> {
        self.rows().get(&id).cloned()
    }

    fn rows(&self) -> MutexGuard<'_, HashMap<Uuid, Registration>> {
        // A panic while holding the lock cannot leave a row half-written.
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn update<F>(&self, id: Uuid, apply: F) -> Result<(), PushError>
    where
        F: FnOnce(&mut Registration),
    {
        let mut rows = self.rows();
        let registration = rows
            .get_mut(&id)
            .ok_or_else(|| PushError::Storage(format!("registration {id} not found")))?;
        apply(registration);
        Ok(())
    }
}

#[async_trait]
impl RegistrationStore for InMemoryRegistrationStore {
    fn stream_due(&self, now: DateTime<Utc>) -> BoxStream<'_, Result<Registration, PushError>> {
        let due: Vec<Registration> = self
            .rows()
            .values()
            .filter(|r| r.is_due(now))
            .cloned()
            .collect();

        stream::iter(due.into_iter().map(Ok)).boxed()
    }

    async fn persist_reschedule(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), PushError> {
        self.update(id, |r| r.next_planned_delivery = at)
    }

    async fn persist_success(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        success_count: i64,
    ) -> Result<(), PushError> {
        self.update(id, |r| {
            r.last_success = Some(at);
            r.success_count = success_count;
        })
    }

    async fn persist_failure(
        &self,
        id: Uuid,
        active: bool,
        at: DateTime<Utc>,
        failure_count: i64,
        error_code: &str,
    ) -> Result<(), PushError> {
        self.update(id, |r| {
            r.active = active;
            r.last_failure = Some(at);
            r.failure_count = failure_count;
            r.last_error_code = Some(error_code.to_string());
        })
    }
}
