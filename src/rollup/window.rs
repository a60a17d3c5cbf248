use chrono::{DateTime, Duration, Utc};

use crate::nms::TimeWindow;

/// Default query range when the caller omits one.
const DEFAULT_RANGE_HOURS: i64 = 24;

/// Resolve the requested range into a concrete half-open window.
/// The end defaults to `now`, the start to 24 hours before the end.
pub fn resolve_range(
    initial: Option<DateTime<Utc>>,
    r#final: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> TimeWindow {
    let end = r#final.unwrap_or(now);
    let start = initial.unwrap_or(end - Duration::hours(DEFAULT_RANGE_HOURS));

    TimeWindow { start, end }
}

/// Split `[start, end)` into contiguous, non-overlapping one-hour
/// sub-windows covering the whole range. The last sub-window is
/// partial when the range is not an exact hour multiple.
pub fn hourly_windows(range: TimeWindow) -> Vec<TimeWindow> {
    let mut windows = Vec::new();
    let mut cursor = range.start;

    while cursor < range.end {
        let next = (cursor + Duration::hours(1)).min(range.end);
        windows.push(TimeWindow {
            start: cursor,
            end: next,
        });
        cursor = next;
    }

    windows
}
