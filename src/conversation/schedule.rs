//! Start-time spreading for the day's planned conversations

use chrono::{Duration, NaiveDateTime, NaiveTime};

/// Spread `count` start times over the rest of the day window
///
/// The window runs from `start_hour` to `end_hour` on `now`'s date, clipped to
/// start no earlier than `now`. Times are evenly spaced, each in the middle of
/// its slot, and non-decreasing. When the window has already closed every
/// start is `now`.
#[must_use]
pub fn spread_start_times(
    now: NaiveDateTime,
    count: usize,
    start_hour: u32,
    end_hour: u32,
) -> Vec<NaiveDateTime> {
    if count == 0 {
        return Vec::new();
    }

    let date = now.date();
    let window_start = NaiveTime::from_hms_opt(start_hour.min(23), 0, 0)
        .map(|t| date.and_time(t))
        .unwrap_or(now)
        .max(now);
    let window_end = if end_hour >= 24 {
        date.and_time(NaiveTime::MIN) + Duration::days(1)
    } else {
        NaiveTime::from_hms_opt(end_hour, 0, 0)
            .map(|t| date.and_time(t))
            .unwrap_or(now)
    };

    if window_end <= window_start {
        return vec![now; count];
    }

    let slots = i32::try_from(count).unwrap_or(i32::MAX);
    let slot = (window_end - window_start) / slots;
    (0..slots)
        .map(|i| window_start + slot * i + slot / 2)
        .collect()
}
