//! Local time payload for Tuya devices with a clock or display.

use chrono::{Datelike, NaiveDateTime, TimeDelta, Timelike};
use std::time::Duration;

/// Datapoint used for the time sync raw payload.
pub const TIME_SYNC_DATAPOINT: u8 = 0x24;
/// Local hour of the daily resync.
pub const DEFAULT_RESYNC_HOUR: u32 = 3;

/// `[year - 2000, month, day, hour, minute, second, weekday]`, weekday with
/// Monday = 0.
pub fn time_sync_payload(now: NaiveDateTime) -> [u8; 7] {
    [
        (now.year() - 2000).clamp(0, 255) as u8,
        now.month() as u8,
        now.day() as u8,
        now.hour() as u8,
        now.minute() as u8,
        now.second() as u8,
        now.weekday().num_days_from_monday() as u8,
    ]
}

/// Time from `now` until the next `hour`:00 local, always in the future.
///
/// Hours past 23 are treated as 23.
pub fn next_resync_delay(now: NaiveDateTime, hour: u32) -> Duration {
    let day = TimeDelta::days(1);
    let next = match now.date().and_hms_opt(hour.min(23), 0, 0) {
        Some(at) if at > now => at,
        Some(at) => at + day,
        None => now + day,
    };
    (next - now).to_std().unwrap_or(Duration::from_secs(86_400))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_payload_layout() {
        // 2026-10-16 is a Friday.
        let now = NaiveDate::from_ymd_opt(2026, 10, 16)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        assert_eq!(time_sync_payload(now), [26, 10, 16, 3, 4, 5, 4]);
    }

    #[test]
    fn test_next_resync_delay() {
        let at = |h, m, s| {
            NaiveDate::from_ymd_opt(2026, 10, 16)
                .unwrap()
                .and_hms_opt(h, m, s)
                .unwrap()
        };
        assert_eq!(
            next_resync_delay(at(1, 0, 0), 3),
            Duration::from_secs(2 * 3600)
        );
        // Exactly on the hour waits a full day.
        assert_eq!(
            next_resync_delay(at(3, 0, 0), 3),
            Duration::from_secs(24 * 3600)
        );
        assert_eq!(
            next_resync_delay(at(23, 30, 0), 3),
            Duration::from_secs(3 * 3600 + 30 * 60)
        );
    }
}
