//! Reschedule calculator — picks the next delivery slot for a registration.
//!
//! The slot is a random minute inside the configured daily window, on the
//! registration's local "tomorrow". Randomising hour and minute spreads the
//! population's deliveries so they don't all land on the window's first minute.
//!
//! Computed before the send is attempted, so a registration gets at most one
//! attempt per local calendar day even if the send is slow or the process dies.

use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use rand::Rng;

use nudge_common::error::PushError;
use nudge_common::types::DeliveryWindow;

/// Compute the next delivery instant for a registration in `timezone`.
///
/// Fails with [`PushError::InvalidWindow`] when `min_hour..max_hour` is empty.
/// Unknown zone names fall back to UTC.
pub fn next_delivery_instant<R: Rng + ?Sized>(
    timezone: &str,
    min_hour: u32,
    max_hour: u32,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Result<DateTime<Utc>, PushError> {
    let window = DeliveryWindow::new(min_hour, max_hour)?;
    Ok(next_in_window(timezone, window, now, rng))
}

/// Same as [`next_delivery_instant`] for an already validated window.
pub fn next_in_window<R: Rng + ?Sized>(
    timezone: &str,
    window: DeliveryWindow,
    now: DateTime<Utc>,
    rng: &mut R,
) -> DateTime<Utc> {
    let tz = parse_timezone(timezone);

    let hour = (window.min_hour() + rng.gen_range(0..window.span())) % 24;
    let minute = rng.gen_range(0..60);

    let local_today = now.with_timezone(&tz).date_naive();
    let tomorrow = local_today.succ_opt().unwrap_or(local_today);
    // hour < 24 and minute < 60, so and_hms_opt always succeeds.
    let naive = tomorrow
        .and_hms_opt(hour, minute, 0)
        .unwrap_or_else(|| tomorrow.and_time(chrono::NaiveTime::default()));

    resolve_local(&tz, naive).with_timezone(&Utc)
}

fn parse_timezone(timezone: &str) -> Tz {
    timezone.parse::<Tz>().unwrap_or_else(|_| {
        tracing::warn!(timezone, "Unknown timezone, scheduling in UTC");
        Tz::UTC
    })
}

/// Map a local wall-clock time to an instant.
///
/// Ambiguous times (DST fall-back) take the earlier instant. Times inside a
/// DST gap move forward by the gap, which is at most an hour in practice.
fn resolve_local(tz: &Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => {
            let shifted = naive + Duration::hours(1);
            match tz.from_local_datetime(&shifted) {
                LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt,
                LocalResult::None => tz.from_utc_datetime(&naive),
            }
        }
    }
}
