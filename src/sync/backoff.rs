use chrono::{DateTime, Utc};
use rand::Rng;
use std::time::Duration;

use crate::store::FeedHealth;

/// Delay after the first failure; doubles with each further one.
pub const BASE_FEED_BACKOFF: Duration = Duration::from_secs(30 * 60);

/// 30 min * 2^6 is roughly a day and a half.
const MAX_EXPONENT: u32 = 6;

/// Exponential backoff with ±30% jitter so broken feeds sharing a host do
/// not all come due in the same tick.
pub fn backoff_delay(failures: i32, base: Duration) -> Duration {
    let exponent = (failures.max(1) as u32 - 1).min(MAX_EXPONENT);
    let delay_secs = base.as_secs().saturating_mul(2_u64.pow(exponent));

    let jitter_factor = rand::thread_rng().gen_range(0.7..1.3);
    Duration::from_secs((delay_secs as f64 * jitter_factor).round() as u64)
}

/// Health to store after an attempt on a feed that had `previous_failures`.
pub fn next_health(previous_failures: i32, succeeded: bool, now: DateTime<Utc>) -> FeedHealth {
    if succeeded {
        return FeedHealth::healthy();
    }

    let failures = previous_failures.max(0).saturating_add(1);
    let delay = backoff_delay(failures, BASE_FEED_BACKOFF);
    let retry_after = chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d));

    FeedHealth {
        consecutive_failures: failures,
        retry_after,
    }
}

/// Whether a scheduled run should leave the feed alone for now.
pub fn in_backoff(retry_after: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    retry_after.is_some_and(|at| at > now)
}
