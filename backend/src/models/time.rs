//! Service-date and departure-instant handling in a corridor's local timezone.
//!
//! Boards are always computed against the corridor's wall clock, never UTC:
//! at 23:30 in Woods Hole it is already tomorrow in UTC.

use chrono::{DateTime, Duration, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

use super::identity::DepartureTime;

/// The service date `now` falls on in `timezone`.
pub fn service_date(now: DateTime<Utc>, timezone: Tz) -> NaiveDate {
    now.with_timezone(&timezone).date_naive()
}

/// A departure pinned to a concrete instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepartureInstant {
    pub local: DateTime<Tz>,
    pub utc: DateTime<Utc>,
}

impl DepartureInstant {
    /// Resolve a wall-clock departure on `date`.
    ///
    /// Ambiguous local times (DST fall-back) take the earlier instant;
    /// times inside a spring-forward gap move one hour later.
    pub fn resolve(date: NaiveDate, departure: DepartureTime, timezone: Tz) -> Self {
        let naive = date.and_time(departure.as_naive());
        let local = match timezone.from_local_datetime(&naive) {
            LocalResult::Single(dt) => dt,
            LocalResult::Ambiguous(a, b) => a.min(b),
            LocalResult::None => timezone
                .from_local_datetime(&(naive + Duration::hours(1)))
                .earliest()
                .unwrap_or_else(|| timezone.from_utc_datetime(&naive)),
        };

        Self {
            local,
            utc: local.with_timezone(&Utc),
        }
    }
}

#[cfg(test)]
#[path = "time_tests.rs"]
mod time_tests;
