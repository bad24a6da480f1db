//! Admission controller — caps the number of attempts in flight.
//!
//! An attempt is in flight from the moment it is admitted until its outcome
//! has been recorded. Release is tied to dropping the [`AdmissionPermit`], so
//! it happens exactly once on every exit path, including panics and aborted
//! tasks.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use nudge_common::error::PushError;

/// Counting permit pool with an observable in-flight gauge.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    permits: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
}

/// Proof of admission. Dropping it releases the slot.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl AdmissionController {
    pub fn new(max_outstanding: u32) -> Self {
        let max_outstanding = max_outstanding.max(1) as usize;
        Self {
            permits: Arc::new(Semaphore::new(max_outstanding)),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wait until fewer than `max_outstanding` attempts are in flight, then admit one.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<AdmissionPermit, PushError> {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PushError::Cancelled),
            permit = self.permits.clone().acquire_owned() => {
                permit.map_err(|_| PushError::Cancelled)?
            }
        };

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Ok(AdmissionPermit {
            _permit: permit,
            in_flight: self.in_flight.clone(),
        })
    }

    /// Current number of admitted, not yet released attempts.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        // Decrement before the semaphore permit is returned (fields drop after
        // this body), so the gauge never reads above the cap.
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
