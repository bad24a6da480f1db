//! Global token bucket bounding how many send attempts may start per second.
//!
//! The bucket holds up to `capacity` tokens and is topped back up to full on
//! every tick of a fixed interval. Callers burst up to `capacity` attempts per
//! interval, then wait for the next refill. Tokens are semaphore permits that
//! are consumed (forgotten) rather than returned.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use nudge_common::error::PushError;

/// Refill interval of the bucket.
pub const REFILL_PERIOD: Duration = Duration::from_secs(1);

/// Shared token bucket, safe for any number of concurrent callers.
#[derive(Debug)]
pub struct RateLimiter {
    tokens: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl RateLimiter {
    /// Create a full bucket and spawn its refill task on the current runtime.
    ///
    /// The refill task stops when `cancel` fires or the limiter is dropped;
    /// waiting callers then fail with [`PushError::Cancelled`].
    pub fn start(capacity: u32, cancel: &CancellationToken) -> Self {
        Self::with_period(capacity, REFILL_PERIOD, cancel)
    }

    pub fn with_period(capacity: u32, period: Duration, cancel: &CancellationToken) -> Self {
        let capacity = capacity.max(1) as usize;
        let tokens = Arc::new(Semaphore::new(capacity));
        let shutdown = cancel.child_token();

        tokio::spawn(refill(tokens.clone(), capacity, period, shutdown.clone()));

        tracing::debug!(capacity, period_ms = period.as_millis() as u64, "Rate limiter started");

        Self { tokens, shutdown }
    }

    /// Wait for one token and consume it.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), PushError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PushError::Cancelled),
            permit = self.tokens.acquire() => {
                // Closed only when the refill task has shut down.
                permit.map_err(|_| PushError::Cancelled)?.forget();
                Ok(())
            }
        }
    }

    /// Tokens left in the current interval.
    pub fn available(&self) -> usize {
        self.tokens.available_permits()
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn refill(
    tokens: Arc<Semaphore>,
    capacity: usize,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tokens.close();
                tracing::debug!("Rate limiter stopped");
                return;
            }
            _ = ticker.tick() => {
                // Only this task adds tokens, so the bucket never exceeds capacity.
                let missing = capacity.saturating_sub(tokens.available_permits());
                if missing > 0 {
                    tokens.add_permits(missing);
                }
            }
        }
    }
}
