use chrono::{
    DateTime, Datelike, Days, Duration, LocalResult, Months, NaiveDate, NaiveDateTime, NaiveTime,
    TimeZone, Timelike, Utc,
};
use chrono_tz::Tz;

use crate::{error::ScheduleError, types::Frequency, types::Subscription};

/// Upper bound on the length of a DST gap we are willing to step across.
const MAX_GAP_MINUTES: u32 = 24 * 60;

/// Periods skipped when advancing after a long outage before giving up.
const MAX_SKIPPED_PERIODS: u32 = 10_000;

/// Parse an IANA zone identifier.
pub fn parse_time_zone(time_zone: &str) -> Result<Tz, ScheduleError> {
    time_zone
        .trim()
        .parse::<Tz>()
        .map_err(|_| ScheduleError::InvalidTimeZone(time_zone.to_string()))
}

/// Parse `HH:MM` (or `HH:MM:SS`, seconds dropped) into a wall-clock time.
pub fn parse_time_of_day(s: &str) -> Result<NaiveTime, ScheduleError> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map(truncate_to_minute)
        .map_err(|_| ScheduleError::InvalidTimeOfDay(s.to_string()))
}

/// Compute the first run strictly after `reference` for a subscription with
/// no prior occurrence.
///
/// Walks local dates starting at the reference's local date and returns the
/// first `date + preferred_time` that resolves to an instant after
/// `reference`. Every frequency bootstraps this way: the first weekly or
/// monthly report goes out at the next matching wall-clock time, and the
/// weekday / day of month of that first occurrence is what later cycles keep.
/// The frequency does not affect the first run.
pub fn compute_next_run(
    _frequency: Frequency,
    preferred_time: NaiveTime,
    time_zone: &str,
    reference: DateTime<Utc>,
) -> Result<DateTime<Utc>, ScheduleError> {
    let tz = parse_time_zone(time_zone)?;
    let preferred_time = truncate_to_minute(preferred_time);
    let mut date = reference.with_timezone(&tz).date_naive();

    // Today or tomorrow always suffices; the third slot covers a DST gap
    // pushing today's candidate into tomorrow.
    for _ in 0..3 {
        let candidate = resolve_local(&tz, date.and_time(preferred_time))?;
        if candidate > reference {
            return Ok(candidate);
        }
        date = date
            .checked_add_days(Days::new(1))
            .ok_or_else(|| out_of_range(reference))?;
    }
    Err(out_of_range(reference))
}

/// Compute the run following `last_occurrence` (the due instant that was just
/// serviced), strictly after `reference`.
///
/// * `Daily` behaves exactly like [`compute_next_run`].
/// * `Weekly` / `Monthly` add whole calendar units to the local date of
///   `last_occurrence` and re-apply `preferred_time`, so the wall-clock time
///   survives DST changes. Periods that already lie in the past (scheduler was
///   down) are skipped rather than fired in a burst.
/// * `Monthly` aims for `day_of_month` (falling back to the day of
///   `last_occurrence`), clamped to the length of each month. A clamped date
///   does not become the new target: Jan 31 -> Feb 28 -> Mar 31.
pub fn compute_following_run(
    frequency: Frequency,
    preferred_time: NaiveTime,
    time_zone: &str,
    last_occurrence: Option<DateTime<Utc>>,
    day_of_month: Option<u32>,
    reference: DateTime<Utc>,
) -> Result<DateTime<Utc>, ScheduleError> {
    let last = match (frequency, last_occurrence) {
        (Frequency::Daily, _) | (_, None) => {
            return compute_next_run(frequency, preferred_time, time_zone, reference)
        }
        (_, Some(last)) => last,
    };

    let tz = parse_time_zone(time_zone)?;
    let preferred_time = truncate_to_minute(preferred_time);
    let anchor = last.with_timezone(&tz).date_naive();
    let day = day_of_month.unwrap_or_else(|| anchor.day());

    for n in 1..=MAX_SKIPPED_PERIODS {
        let date = step(anchor, frequency, day, n).ok_or_else(|| out_of_range(reference))?;
        let candidate = resolve_local(&tz, date.and_time(preferred_time))?;
        if candidate > reference {
            return Ok(candidate);
        }
    }
    Err(out_of_range(reference))
}

/// Resolve a local wall-clock time to an absolute instant.
///
/// Policy for DST transitions:
/// * ambiguous (clocks fall back): the later of the two instants;
/// * nonexistent (clocks spring forward): the first valid local minute after
///   the requested one, i.e. the end of the gap.
pub fn resolve_local(tz: &Tz, local: NaiveDateTime) -> Result<DateTime<Utc>, ScheduleError> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(t) => Ok(t.with_timezone(&Utc)),
        LocalResult::Ambiguous(a, b) => Ok(a.max(b).with_timezone(&Utc)),
        LocalResult::None => {
            let mut shifted = local;
            for _ in 0..MAX_GAP_MINUTES {
                shifted += Duration::minutes(1);
                match tz.from_local_datetime(&shifted) {
                    LocalResult::Single(t) => return Ok(t.with_timezone(&Utc)),
                    LocalResult::Ambiguous(a, b) => return Ok(a.min(b).with_timezone(&Utc)),
                    LocalResult::None => continue,
                }
            }
            Err(ScheduleError::OutOfRange(local.to_string()))
        }
    }
}

/// Local day of month of `at` in `time_zone`; the target day for monthly
/// cadences.
pub fn local_day_of_month(at: DateTime<Utc>, time_zone: &str) -> Result<u32, ScheduleError> {
    Ok(at.with_timezone(&parse_time_zone(time_zone)?).day())
}

/// `next_run_at` rendered in the subscriber's zone, e.g. `2025-03-10 09:00 EDT`.
///
/// Falls back to UTC when the zone is unknown.
pub fn next_delivery_local(sub: &Subscription) -> String {
    let Some(next) = sub.next_run_at else {
        return "Not scheduled".to_string();
    };
    match parse_time_zone(&sub.time_zone) {
        Ok(tz) => next.with_timezone(&tz).format("%Y-%m-%d %H:%M %Z").to_string(),
        Err(_) => next.format("%Y-%m-%d %H:%M UTC").to_string(),
    }
}

fn step(anchor: NaiveDate, frequency: Frequency, day: u32, n: u32) -> Option<NaiveDate> {
    match frequency {
        Frequency::Daily => anchor.checked_add_days(Days::new(u64::from(n))),
        Frequency::Weekly => anchor.checked_add_days(Days::new(7 * u64::from(n))),
        Frequency::Monthly => {
            let month = anchor.with_day(1)?.checked_add_months(Months::new(n))?;
            // Last valid day not after `day` (Feb 31 -> Feb 28).
            (1..=day.clamp(1, 31)).rev().find_map(|d| month.with_day(d))
        }
    }
}

fn truncate_to_minute(t: NaiveTime) -> NaiveTime {
    t.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(t)
}

fn out_of_range(reference: DateTime<Utc>) -> ScheduleError {
    ScheduleError::OutOfRange(reference.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn daily_later_today() {
        let next = compute_next_run(
            Frequency::Daily,
            hm(9, 0),
            "UTC",
            utc("2025-01-01T08:00:00Z"),
        )
        .unwrap();
        assert_eq!(next, utc("2025-01-01T09:00:00Z"));
    }

    #[test]
    fn daily_rolls_to_tomorrow_once_passed() {
        let next = compute_next_run(
            Frequency::Daily,
            hm(9, 0),
            "UTC",
            utc("2025-01-01T10:00:00Z"),
        )
        .unwrap();
        assert_eq!(next, utc("2025-01-02T09:00:00Z"));
    }

    #[test]
    fn exact_match_is_not_strictly_after() {
        let next = compute_next_run(
            Frequency::Daily,
            hm(9, 0),
            "UTC",
            utc("2025-01-01T09:00:00Z"),
        )
        .unwrap();
        assert_eq!(next, utc("2025-01-02T09:00:00Z"));
    }

    #[test]
    fn local_zone_is_honoured() {
        // 09:00 in Tokyo is 00:00 UTC.
        let next = compute_next_run(
            Frequency::Daily,
            hm(9, 0),
            "Asia/Tokyo",
            utc("2025-06-01T01:00:00Z"),
        )
        .unwrap();
        assert_eq!(next, utc("2025-06-02T00:00:00Z"));
    }

    #[test]
    fn result_is_always_strictly_after_reference() {
        let zones = ["UTC", "America/New_York", "Europe/London", "Australia/Lord_Howe"];
        let mut reference = utc("2025-01-01T00:00:00Z");
        let end = utc("2026-01-01T00:00:00Z");
        while reference < end {
            for tz in zones {
                for freq in [Frequency::Daily, Frequency::Weekly, Frequency::Monthly] {
                    let next = compute_next_run(freq, hm(2, 30), tz, reference).unwrap();
                    assert!(next > reference, "{tz} {freq} {reference} -> {next}");
                    let following =
                        compute_following_run(freq, hm(2, 30), tz, Some(next), None, next).unwrap();
                    assert!(following > next, "{tz} {freq} {next} -> {following}");
                }
            }
            reference += Duration::hours(7) + Duration::minutes(13);
        }
    }

    #[test]
    fn weekly_keeps_wall_clock_across_spring_forward() {
        // Monday 2025-03-03 09:00 EST; DST starts Sunday 2025-03-09.
        let last = utc("2025-03-03T14:00:00Z");
        let next = compute_following_run(
            Frequency::Weekly,
            hm(9, 0),
            "America/New_York",
            Some(last),
            None,
            utc("2025-03-03T14:02:00Z"),
        )
        .unwrap();
        // Monday 2025-03-10 09:00 EDT.
        assert_eq!(next, utc("2025-03-10T13:00:00Z"));
    }

    #[test]
    fn weekly_skips_periods_missed_during_outage() {
        let last = utc("2025-01-06T09:00:00Z"); // Monday
        let next = compute_following_run(
            Frequency::Weekly,
            hm(9, 0),
            "UTC",
            Some(last),
            None,
            utc("2025-01-22T12:00:00Z"), // Wednesday two weeks later
        )
        .unwrap();
        assert_eq!(next, utc("2025-01-27T09:00:00Z"));
    }

    #[test]
    fn monthly_clamps_to_end_of_short_month() {
        let next = compute_following_run(
            Frequency::Monthly,
            hm(9, 0),
            "UTC",
            Some(utc("2025-01-31T09:00:00Z")),
            None,
            utc("2025-01-31T09:01:00Z"),
        )
        .unwrap();
        assert_eq!(next, utc("2025-02-28T09:00:00Z"));
    }

    #[test]
    fn monthly_returns_to_preferred_day_after_short_month() {
        let feb = compute_following_run(
            Frequency::Monthly,
            hm(9, 0),
            "UTC",
            Some(utc("2025-01-31T09:00:00Z")),
            Some(31),
            utc("2025-01-31T09:01:00Z"),
        )
        .unwrap();
        assert_eq!(feb, utc("2025-02-28T09:00:00Z"));

        let march = compute_following_run(
            Frequency::Monthly,
            hm(9, 0),
            "UTC",
            Some(feb),
            Some(31),
            utc("2025-02-28T09:01:00Z"),
        )
        .unwrap();
        assert_eq!(march, utc("2025-03-31T09:00:00Z"));

        let april = compute_following_run(
            Frequency::Monthly,
            hm(9, 0),
            "UTC",
            Some(march),
            Some(31),
            utc("2025-03-31T09:01:00Z"),
        )
        .unwrap();
        assert_eq!(april, utc("2025-04-30T09:00:00Z"));
    }

    #[test]
    fn local_day_of_month_uses_subscriber_zone() {
        // 2025-03-31T23:30Z is already April 1st in Berlin.
        assert_eq!(local_day_of_month(utc("2025-03-31T23:30:00Z"), "UTC").unwrap(), 31);
        assert_eq!(
            local_day_of_month(utc("2025-03-31T23:30:00Z"), "Europe/Berlin").unwrap(),
            1
        );
    }

    #[test]
    fn monthly_adds_a_calendar_month() {
        let next = compute_following_run(
            Frequency::Monthly,
            hm(7, 30),
            "Europe/Berlin",
            Some(utc("2025-03-15T06:30:00Z")), // 07:30 CET
            None,
            utc("2025-03-15T06:31:00Z"),
        )
        .unwrap();
        // 07:30 CEST on April 15th.
        assert_eq!(next, utc("2025-04-15T05:30:00Z"));
    }

    #[test]
    fn weekly_without_history_bootstraps_like_daily() {
        let reference = utc("2025-01-01T10:00:00Z");
        let next =
            compute_following_run(Frequency::Weekly, hm(9, 0), "UTC", None, None, reference).unwrap();
        assert_eq!(next, utc("2025-01-02T09:00:00Z"));
    }

    #[test]
    fn ambiguous_local_time_resolves_to_later_instant() {
        // 2025-11-02 01:30 happens twice in New York (EDT then EST).
        let next = compute_next_run(
            Frequency::Daily,
            hm(1, 30),
            "America/New_York",
            utc("2025-11-02T04:00:00Z"),
        )
        .unwrap();
        assert_eq!(next, utc("2025-11-02T06:30:00Z"));
    }

    #[test]
    fn nonexistent_local_time_skips_to_end_of_gap() {
        // 2025-03-09 02:30 does not exist in New York; the gap ends at 03:00 EDT.
        let next = compute_next_run(
            Frequency::Daily,
            hm(2, 30),
            "America/New_York",
            utc("2025-03-09T05:00:00Z"),
        )
        .unwrap();
        assert_eq!(next, utc("2025-03-09T07:00:00Z"));
    }

    #[test]
    fn calculation_is_idempotent() {
        let reference = utc("2025-05-05T05:05:05Z");
        let a = compute_next_run(Frequency::Daily, hm(6, 0), "Europe/Paris", reference);
        let b = compute_next_run(Frequency::Daily, hm(6, 0), "Europe/Paris", reference);
        assert_eq!(a, b);
    }

    #[test]
    fn unknown_zone_is_an_error_not_a_default() {
        let err = compute_next_run(
            Frequency::Daily,
            hm(9, 0),
            "Mars/Olympus_Mons",
            utc("2025-01-01T00:00:00Z"),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ScheduleError::InvalidTimeZone("Mars/Olympus_Mons".to_string())
        );
    }

    #[test]
    fn time_of_day_parsing() {
        assert_eq!(parse_time_of_day("09:00").unwrap(), hm(9, 0));
        assert_eq!(parse_time_of_day("09:00:45").unwrap(), hm(9, 0));
        assert!(parse_time_of_day("25:00").is_err());
        assert!(parse_time_of_day("nine").is_err());
    }
}
