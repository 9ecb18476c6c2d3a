//! Timezone-aware next-occurrence search.

use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::Tz;
use tracing::warn;

use crate::error::{ExprError, Result};
use crate::parser::ParsedExpression;

/// Upper bound on the minute-by-minute search: one leap year.
const SEARCH_CAP_MINUTES: i64 = 366 * 24 * 60;

/// Find the earliest instant strictly after `from` at which all five
/// fields of `parsed` match, as observed in the expression's timezone.
///
/// The search truncates `from` to the start of the next whole minute and
/// advances one absolute minute at a time, testing the candidate's
/// *displayed local* minute/hour/day/month/weekday. Matching on local
/// fields is what makes the search DST-correct: a wall-clock hour skipped
/// by spring-forward simply never appears, and a repeated fall-back hour
/// appears twice without producing a duplicate match for other hours.
///
/// Fails with [`ExprError::NoUpcomingOccurrence`] once the cap is
/// exhausted (never-matching expressions such as `0 0 31 2 *`), instead
/// of looping forever.
pub fn next_run(parsed: &ParsedExpression, from: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let start_minute = from.timestamp().div_euclid(60) + 1;

    for offset in 0..SEARCH_CAP_MINUTES {
        let candidate = DateTime::<Utc>::from_timestamp((start_minute + offset) * 60, 0)
            .ok_or_else(|| ExprError::NoUpcomingOccurrence {
                expression: parsed.source.clone(),
            })?;
        if matches_wall_clock(parsed, &candidate.with_timezone(&parsed.timezone)) {
            return Ok(candidate);
        }
    }

    warn!(
        expression = %parsed.source,
        timezone = %parsed.timezone,
        "occurrence search exhausted its one-year horizon"
    );
    Err(ExprError::NoUpcomingOccurrence {
        expression: parsed.source.clone(),
    })
}

/// Test a candidate's wall-clock fields against all five sets.
fn matches_wall_clock(parsed: &ParsedExpression, local: &DateTime<Tz>) -> bool {
    parsed.minutes.contains(&(local.minute() as u8))
        && parsed.hours.contains(&(local.hour() as u8))
        && parsed.days_of_month.contains(&(local.day() as u8))
        && parsed.months.contains(&(local.month() as u8))
        && parsed
            .days_of_week
            .contains(&(local.weekday().num_days_from_sunday() as u8))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Tz;

    fn instant(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn parse(expr: &str, tz: &str) -> ParsedExpression {
        ParsedExpression::parse(expr, tz.parse::<Tz>().unwrap()).unwrap()
    }

    #[test]
    fn always_strictly_after_from() {
        let parsed = parse("* * * * *", "UTC");
        let from = instant("2025-06-15T10:30:00Z");
        let next = next_run(&parsed, from).unwrap();
        assert!(next > from);
        assert_eq!(next, instant("2025-06-15T10:31:00Z"));
    }

    #[test]
    fn truncates_to_next_whole_minute() {
        let parsed = parse("* * * * *", "UTC");
        let next = next_run(&parsed, instant("2025-06-15T10:30:45Z")).unwrap();
        assert_eq!(next, instant("2025-06-15T10:31:00Z"));
    }

    #[test]
    fn finds_daily_time() {
        let parsed = parse("30 9 * * *", "UTC");
        let next = next_run(&parsed, instant("2025-06-15T10:00:00Z")).unwrap();
        assert_eq!(next, instant("2025-06-16T09:30:00Z"));
    }

    #[test]
    fn sunday_is_zero() {
        // 2025-06-15 is a Sunday.
        let parsed = parse("0 12 * * 0", "UTC");
        let next = next_run(&parsed, instant("2025-06-14T00:00:00Z")).unwrap();
        assert_eq!(next, instant("2025-06-15T12:00:00Z"));
    }

    #[test]
    fn all_five_fields_must_match() {
        // Minute 0, hour 0, day 1, month 7, any weekday.
        let parsed = parse("0 0 1 7 *", "UTC");
        let next = next_run(&parsed, instant("2025-06-15T00:00:00Z")).unwrap();
        assert_eq!(next, instant("2025-07-01T00:00:00Z"));
    }

    #[test]
    fn evaluates_in_target_timezone() {
        // 09:00 in Tokyo is 00:00 UTC.
        let parsed = parse("0 9 * * *", "Asia/Tokyo");
        let next = next_run(&parsed, instant("2025-06-15T12:00:00Z")).unwrap();
        assert_eq!(next, instant("2025-06-16T00:00:00Z"));
    }

    #[test]
    fn fall_back_hour_is_absorbed() {
        // America/New_York leaves DST on 2025-11-02: wall clocks repeat
        // 01:00–01:59. With `0 */2 * * *` the repeated hour (1) is not in
        // the hour set, so the run at local 00:00 EDT is followed by local
        // 02:00 EST three absolute hours later, and the cadence then
        // settles back to two-hour gaps. No even hour fires twice.
        let parsed = parse("0 */2 * * *", "America/New_York");

        let mut at = instant("2025-11-02T01:30:00Z"); // 21:30 EDT Nov 1
        let mut runs = Vec::new();
        for _ in 0..4 {
            at = next_run(&parsed, at).unwrap();
            runs.push(at);
        }

        assert_eq!(runs[0], instant("2025-11-02T02:00:00Z")); // 22:00 EDT
        assert_eq!(runs[1], instant("2025-11-02T04:00:00Z")); // 00:00 EDT
        assert_eq!(runs[2], instant("2025-11-02T07:00:00Z")); // 02:00 EST
        assert_eq!(runs[3], instant("2025-11-02T09:00:00Z")); // 04:00 EST
    }

    #[test]
    fn spring_forward_gap_is_skipped() {
        // 02:30 does not exist on 2025-03-09 in America/New_York; the
        // search lands on the next day's 02:30 EDT instead of hanging or
        // firing inside the gap.
        let parsed = parse("30 2 * * *", "America/New_York");
        let next = next_run(&parsed, instant("2025-03-09T05:00:00Z")).unwrap();
        assert_eq!(next, instant("2025-03-10T06:30:00Z"));
    }

    #[test]
    fn never_matching_expression_fails_closed() {
        let parsed = parse("0 0 31 2 *", "UTC");
        let err = next_run(&parsed, instant("2025-06-15T00:00:00Z")).unwrap_err();
        assert!(matches!(err, ExprError::NoUpcomingOccurrence { .. }));
    }
}
