//! The daily ordering window.
//!
//! Orders for a date close at a fixed local time on the day before it. All
//! calculations take `now` explicitly so they can be checked against any clock.

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Offset, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// India Standard Time, UTC+5:30.
pub const DEFAULT_UTC_OFFSET_SECS: i32 = (5 * 60 + 30) * 60;
pub const DEFAULT_CUTOFF_HOUR: u32 = 21;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CutoffPolicy {
    pub offset: FixedOffset,
    pub cutoff_time: NaiveTime,
}

impl Default for CutoffPolicy {
    fn default() -> Self {
        Self {
            offset: FixedOffset::east_opt(DEFAULT_UTC_OFFSET_SECS).unwrap_or(Utc.fix()),
            cutoff_time: NaiveTime::from_hms_opt(DEFAULT_CUTOFF_HOUR, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

impl CutoffPolicy {
    pub fn new(offset: FixedOffset, cutoff_time: NaiveTime) -> Self {
        Self { offset, cutoff_time }
    }

    /// The instant orders for `target` close: cutoff time, local, on the previous day.
    pub fn cutoff_instant(&self, target: NaiveDate) -> DateTime<Utc> {
        let day_before = target.pred_opt().unwrap_or(NaiveDate::MIN);
        let local = day_before.and_time(self.cutoff_time);
        let utc = local - TimeDelta::seconds(i64::from(self.offset.local_minus_utc()));
        DateTime::from_naive_utc_and_offset(utc, Utc)
    }

    /// Whole seconds left before orders for `target` close. Zero once closed.
    pub fn seconds_remaining(&self, now: DateTime<Utc>, target: NaiveDate) -> u64 {
        let left = self.cutoff_instant(target) - now;
        if left <= TimeDelta::zero() {
            0
        } else {
            left.num_seconds().unsigned_abs()
        }
    }

    pub fn mutations_allowed(&self, now: DateTime<Utc>, target: NaiveDate) -> bool {
        self.seconds_remaining(now, target) > 0
    }

    /// The calendar day `now` falls on in the canteen's zone.
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.offset).date_naive()
    }

    /// The date employees are ordering for right now: tomorrow, locally.
    pub fn service_date(&self, now: DateTime<Utc>) -> NaiveDate {
        let today = self.local_date(now);
        today.succ_opt().unwrap_or(today)
    }

    pub fn countdown(&self, now: DateTime<Utc>, target: NaiveDate) -> Countdown {
        Countdown::from_secs(self.seconds_remaining(now, target))
    }

    /// Human label for the cutoff, e.g. "21:00 UTC+05:30".
    pub fn describe(&self) -> String {
        format!("{} UTC{}", self.cutoff_time.format("%H:%M"), self.offset)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Open,
    Warning,
    Urgent,
    Closed,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Countdown {
    pub remaining_secs: u64,
    pub hours: u64,
    pub minutes: u64,
    pub seconds: u64,
    pub urgency: Urgency,
}

impl Countdown {
    pub fn from_secs(remaining_secs: u64) -> Self {
        let urgency = match remaining_secs {
            0 => Urgency::Closed,
            1..=3599 => Urgency::Urgent,
            3600..=7199 => Urgency::Warning,
            _ => Urgency::Open,
        };
        Self {
            remaining_secs,
            hours: remaining_secs / 3600,
            minutes: (remaining_secs % 3600) / 60,
            seconds: remaining_secs % 60,
            urgency,
        }
    }
}

impl fmt::Display for Countdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hours, self.minutes, self.seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_cutoff_is_nine_pm_ist_on_previous_day() {
        let policy = CutoffPolicy::default();
        // 21:00 IST == 15:30 UTC
        assert_eq!(
            policy.cutoff_instant(date(2026, 10, 20)),
            utc("2026-10-19T15:30:00Z")
        );
    }

    #[test]
    fn test_exact_seconds_before_cutoff() {
        let policy = CutoffPolicy::default();
        let target = date(2026, 10, 20);
        let cutoff = policy.cutoff_instant(target);

        for k in [1_i64, 59, 3600, 43_210, 86_399, 86_400] {
            let now = cutoff - TimeDelta::seconds(k);
            assert_eq!(policy.seconds_remaining(now, target), k as u64, "k = {k}");
            assert!(policy.mutations_allowed(now, target));
        }
    }

    #[test]
    fn test_after_cutoff_is_zero() {
        let policy = CutoffPolicy::default();
        let target = date(2026, 10, 20);
        let cutoff = policy.cutoff_instant(target);

        assert_eq!(policy.seconds_remaining(cutoff, target), 0);
        for later in [TimeDelta::milliseconds(1), TimeDelta::seconds(1), TimeDelta::days(3)] {
            assert_eq!(policy.seconds_remaining(cutoff + later, target), 0);
            assert!(!policy.mutations_allowed(cutoff + later, target));
        }
    }

    #[test]
    fn test_sub_second_remainder_rounds_down() {
        let policy = CutoffPolicy::default();
        let target = date(2026, 10, 20);
        let now = policy.cutoff_instant(target) - TimeDelta::milliseconds(1500);
        assert_eq!(policy.seconds_remaining(now, target), 1);

        let now = policy.cutoff_instant(target) - TimeDelta::milliseconds(400);
        assert_eq!(policy.seconds_remaining(now, target), 0);
    }

    #[test]
    fn test_far_future_target_is_not_clamped() {
        let policy = CutoffPolicy::default();
        let now = utc("2026-10-18T00:00:00Z");
        let target = date(2026, 10, 30);
        let expected = (policy.cutoff_instant(target) - now).num_seconds() as u64;
        assert!(expected > 86_400 * 10);
        assert_eq!(policy.seconds_remaining(now, target), expected);
    }

    #[test]
    fn test_configurable_zone_and_time() {
        let policy = CutoffPolicy::new(
            FixedOffset::west_opt(5 * 3600).unwrap(),
            NaiveTime::from_hms_opt(18, 30, 0).unwrap(),
        );
        // 18:30 at UTC-5 == 23:30 UTC
        assert_eq!(
            policy.cutoff_instant(date(2026, 3, 1)),
            utc("2026-02-28T23:30:00Z")
        );
        assert_eq!(policy.describe(), "18:30 UTC-05:00");
    }

    #[test]
    fn test_service_date_uses_local_calendar() {
        let policy = CutoffPolicy::default();
        // 20:00 UTC on the 18th is already 01:30 on the 19th in IST
        let now = utc("2026-10-18T20:00:00Z");
        assert_eq!(policy.local_date(now), date(2026, 10, 19));
        assert_eq!(policy.service_date(now), date(2026, 10, 20));
    }

    #[test]
    fn test_countdown_breakdown_and_urgency() {
        let countdown = Countdown::from_secs(2 * 3600 + 5 * 60 + 9);
        assert_eq!(countdown.to_string(), "02:05:09");
        assert_eq!(countdown.urgency, Urgency::Open);

        assert_eq!(Countdown::from_secs(7199).urgency, Urgency::Warning);
        assert_eq!(Countdown::from_secs(3599).urgency, Urgency::Urgent);
        assert_eq!(Countdown::from_secs(0).urgency, Urgency::Closed);
        assert_eq!(Countdown::from_secs(0).to_string(), "00:00:00");
    }
}
