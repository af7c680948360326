use chrono::{DateTime, Days, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::debug;

use crate::error::{Result, SchedulerError};

/// Longest spring-forward gap we will walk across. Real zones never exceed
/// a couple of hours.
const MAX_GAP_MINUTES: i64 = 24 * 60;

/// Compute the absolute instant a job should fire.
///
/// `lead_days` is subtracted from `target_date` as calendar days, then the
/// resulting date is localized at `trigger_time` in `tz_name`. A local time
/// that falls in a DST gap rolls forward to the first valid minute after it;
/// an ambiguous time (DST overlap) resolves to the earlier instant.
pub fn compute_fire_at(
    target_date: NaiveDate,
    lead_days: i64,
    trigger_time: NaiveTime,
    tz_name: &str,
) -> Result<DateTime<Utc>> {
    if lead_days < 0 {
        return Err(SchedulerError::Validation(format!(
            "lead window must not be negative (got {lead_days} days)"
        )));
    }
    let tz = parse_timezone(tz_name)?;

    let fire_date = u64::try_from(lead_days)
        .ok()
        .and_then(|days| target_date.checked_sub_days(Days::new(days)))
        .ok_or_else(|| {
            SchedulerError::Validation(format!(
                "{target_date} minus {lead_days} days is outside the calendar"
            ))
        })?;

    let local = fire_date.and_time(trigger_time);
    let fire_at = localize(&tz, local)?;
    debug!(%target_date, lead_days, %fire_at, tz = %tz_name, "fire time computed");
    Ok(fire_at)
}

/// Resolve an IANA zone name.
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| SchedulerError::Validation(format!("unknown timezone '{name}'")))
}

fn localize(tz: &Tz, local: NaiveDateTime) -> Result<DateTime<Utc>> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
        LocalResult::None => {
            // Inside a spring-forward gap: walk minute by minute to the end of it.
            for step in 1..=MAX_GAP_MINUTES {
                let candidate = local + Duration::minutes(step);
                if let Some(dt) = tz.from_local_datetime(&candidate).earliest() {
                    return Ok(dt.with_timezone(&Utc));
                }
            }
            Err(SchedulerError::Validation(format!(
                "local time {local} does not exist in {}",
                tz.name()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn seven_day_window_at_one_past_midnight() {
        let at = compute_fire_at(date(2024, 3, 10), 7, hm(0, 1), "UTC").unwrap();
        assert_eq!(at, utc("2024-03-03T00:01:00Z"));
    }

    #[test]
    fn zero_lead_fires_on_target_date() {
        let at = compute_fire_at(date(2024, 6, 1), 0, hm(9, 30), "UTC").unwrap();
        assert_eq!(at, utc("2024-06-01T09:30:00Z"));
    }

    #[test]
    fn localizes_in_named_zone() {
        // Dubai is UTC+4 with no DST.
        let at = compute_fire_at(date(2024, 3, 10), 7, hm(0, 1), "Asia/Dubai").unwrap();
        assert_eq!(at, utc("2024-03-02T20:01:00Z"));
    }

    #[test]
    fn calendar_subtraction_across_dst_change() {
        // 2024-03-10 is the US spring-forward day. A week before is still EST
        // (UTC-5); the target day itself is EDT (UTC-4). The wall-clock time
        // must stay 00:01 rather than drift by the offset change.
        let at = compute_fire_at(date(2024, 3, 17), 7, hm(0, 1), "America/New_York").unwrap();
        assert_eq!(at, utc("2024-03-10T05:01:00Z"));

        let after = compute_fire_at(date(2024, 3, 18), 7, hm(0, 1), "America/New_York").unwrap();
        assert_eq!(after, utc("2024-03-11T04:01:00Z"));
    }

    #[test]
    fn gap_time_rolls_forward() {
        // 02:30 does not exist on 2024-03-10 in New York; first valid is 03:00 EDT.
        let at = compute_fire_at(date(2024, 3, 10), 0, hm(2, 30), "America/New_York").unwrap();
        assert_eq!(at, utc("2024-03-10T07:00:00Z"));
    }

    #[test]
    fn ambiguous_time_takes_earliest() {
        // 01:30 happens twice on 2024-11-03 in New York; EDT (UTC-4) comes first.
        let at = compute_fire_at(date(2024, 11, 3), 0, hm(1, 30), "America/New_York").unwrap();
        assert_eq!(at, utc("2024-11-03T05:30:00Z"));
    }

    #[test]
    fn negative_lead_rejected() {
        let err = compute_fire_at(date(2024, 3, 10), -1, hm(0, 1), "UTC").unwrap_err();
        assert!(matches!(err, SchedulerError::Validation(_)));
    }

    #[test]
    fn unknown_timezone_rejected() {
        let err = compute_fire_at(date(2024, 3, 10), 7, hm(0, 1), "Mars/Olympus").unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn calendar_underflow_rejected() {
        assert!(compute_fire_at(NaiveDate::MIN, 1, hm(0, 0), "UTC").is_err());
    }

    #[test]
    fn huge_lead_window_is_a_validation_error() {
        let err = compute_fire_at(date(2024, 3, 10), i64::MAX, hm(0, 1), "UTC").unwrap_err();
        assert!(matches!(err, SchedulerError::Validation(_)));
    }
}
