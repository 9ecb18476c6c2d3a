//! IANA timezone resolution and instant/wall-clock conversion helpers.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::error::{ExprError, Result};

/// Resolve an IANA timezone identifier (e.g. `America/New_York`).
///
/// Fails with [`ExprError::Timezone`] for names not in the bundled tz
/// database. Matching is exact — no aliases or abbreviations.
pub fn resolve_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| ExprError::Timezone(name.to_string()))
}

/// Whether `name` resolves to a known IANA timezone.
pub fn is_valid_timezone(name: &str) -> bool {
    name.parse::<Tz>().is_ok()
}

/// Convert a UTC instant to its wall-clock representation in `tz`.
pub fn to_wall_clock(instant: DateTime<Utc>, tz: Tz) -> DateTime<Tz> {
    instant.with_timezone(&tz)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn resolves_known_zones() {
        assert!(resolve_timezone("UTC").is_ok());
        assert!(resolve_timezone("America/New_York").is_ok());
        assert!(resolve_timezone("Asia/Tokyo").is_ok());
    }

    #[test]
    fn rejects_unknown_zone() {
        let err = resolve_timezone("Mars/Olympus_Mons").unwrap_err();
        assert!(matches!(err, ExprError::Timezone(_)));
        assert!(err.to_string().contains("Mars/Olympus_Mons"));
    }

    #[test]
    fn wall_clock_conversion_shifts_hours() {
        // 12:00 UTC is 21:00 in Tokyo (UTC+9, no DST).
        let utc = DateTime::parse_from_rfc3339("2025-06-15T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let tokyo = to_wall_clock(utc, resolve_timezone("Asia/Tokyo").unwrap());
        assert_eq!(tokyo.hour(), 21);
    }
}
