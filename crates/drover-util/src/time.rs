//! Time helpers for drover
//!
//! Wall-clock time is used for persisted timeouts and log timestamps;
//! scheduling itself uses `std::time::Instant`.

use chrono::{DateTime, Utc};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current UTC time, used for everything persisted
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Seconds since the unix epoch
pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Deadline `after` from `from`, saturating instead of overflowing
pub fn deadline_after(from: DateTime<Utc>, after: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(after)
        .ok()
        .and_then(|d| from.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Format a duration for log messages (e.g. "12.3s", "450ms")
pub fn format_elapsed(elapsed: Duration) -> String {
    if elapsed >= Duration::from_secs(1) {
        format!("{:.1}s", elapsed.as_secs_f64())
    } else {
        format!("{}ms", elapsed.as_millis())
    }
}
