//! Wall-clock helpers.
//!
//! Scheduling and execution passes take `now` as an argument so they stay
//! reproducible; these helpers are only used at the outer edges (control
//! loops, audit timestamps).

use chrono::{DateTime, Utc};

/// Current UTC time.
#[must_use]
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> u128 {
    u128::try_from(Utc::now().timestamp_millis()).unwrap_or_default()
}
