//! Attendance decisions: lateness and overtime.
//!
//! Pure functions over the one timestamp captured per request; the store
//! applies the resulting writes transactionally.

use chrono::{Duration, NaiveDateTime, NaiveTime};

/// Minutes of tolerance after the required check-in time before an arrival
/// is classified late.
pub const DEFAULT_GRACE_MINUTES: i64 = 10;

/// Whether a check-in at `now` is late.
///
/// Exactly at `required + grace` is still on time; lateness requires a
/// strictly later instant. A staff member with no required check-in time is
/// never late.
pub fn is_late(now: NaiveDateTime, required_check_in: Option<NaiveTime>, grace: Duration) -> bool {
    match required_check_in {
        Some(required) => now > now.date().and_time(required) + grace,
        None => false,
    }
}

/// Overtime earned by checking out at `now`, in hours rounded to two
/// decimals.
///
/// `None` (not 0.00) when there is no required check-out time or the
/// check-out is not strictly after it — absence of overtime is distinct
/// from zero overtime.
pub fn overtime_hours(now: NaiveDateTime, required_check_out: Option<NaiveTime>) -> Option<f64> {
    let required = required_check_out?;
    let scheduled = now.date().and_time(required);
    if now <= scheduled {
        return None;
    }
    let hours = (now - scheduled).num_seconds() as f64 / 3600.0;
    Some((hours * 100.0).round() / 100.0)
}
