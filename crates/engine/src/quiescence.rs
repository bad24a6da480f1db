//! Quiescence detection for the end of a scheduling pass.
//!
//! Polls the in-flight gauge until it reads zero, then waits one full
//! tolerance window and samples again. Only a second zero confirms
//! quiescence; anything else restarts detection. This is a best-effort drain
//! signal, not a barrier: work submitted between the two samples and finished
//! before the second one goes unnoticed.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use nudge_common::config::QuiescenceConfig;
use nudge_common::error::PushError;

/// Block until `in_flight` has stayed at zero across a tolerance window.
///
/// Fails with [`PushError::Cancelled`] if `cancel` fires while waiting.
pub async fn wait_for_quiescence<F>(
    in_flight: F,
    config: QuiescenceConfig,
    cancel: &CancellationToken,
) -> Result<(), PushError>
where
    F: Fn() -> usize,
{
    loop {
        let mut current = in_flight();
        while current != 0 {
            tracing::debug!(in_flight = current, "Waiting for in-flight attempts");
            sleep_or_cancel(config.poll_interval, cancel).await?;
            current = in_flight();
        }

        sleep_or_cancel(config.tolerance, cancel).await?;

        let rechecked = in_flight();
        if rechecked == 0 {
            tracing::debug!(
                tolerance_ms = config.tolerance.as_millis() as u64,
                "Dispatch engine quiescent"
            );
            return Ok(());
        }

        tracing::debug!(in_flight = rechecked, "New attempts during tolerance window");
    }
}

async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> Result<(), PushError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PushError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}
