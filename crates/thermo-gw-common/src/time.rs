//! ---
//! tgw_section: "01-core-functionality"
//! tgw_subsection: "module"
//! tgw_type: "source"
//! tgw_scope: "code"
//! tgw_description: "Shared primitives and utilities for the gateway runtime."
//! tgw_version: "v0.1.0"
//! tgw_owner: "tbd"
//! ---
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Wall-clock capture used to stamp measurements.
pub fn wall_clock_now() -> DateTime<Utc> {
    Utc::now()
}

/// Seconds since the Unix epoch with millisecond precision.
pub fn unix_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1_000.0
}

/// Convert a duration into whole milliseconds, saturating at `u64::MAX`.
pub fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn unix_seconds_keeps_millis() {
        let at = Utc.timestamp_millis_opt(1_700_000_000_250).unwrap();
        assert_eq!(unix_seconds(at), 1_700_000_000.25);
    }

    #[test]
    fn millis_conversion() {
        assert_eq!(duration_to_millis(Duration::from_secs(5)), 5_000);
        assert_eq!(duration_to_millis(Duration::from_micros(1_999)), 1);
    }
}
