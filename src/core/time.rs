pub const MINUTE: i64 = 60;
pub const HOUR: i64 = 60 * MINUTE;
pub const DAY: i64 = 24 * HOUR;
pub const WEEK: i64 = 7 * DAY;

/// Human-readable length of a span, e.g. "42 minutes", "3 days".
pub fn format_duration(seconds: i64) -> String {
    let s = seconds.saturating_abs();
    let (value, unit) = if s < MINUTE {
        (s, "second")
    } else if s < HOUR {
        (s / MINUTE, "minute")
    } else if s < DAY {
        (s / HOUR, "hour")
    } else {
        (s / DAY, "day")
    };
    if value == 1 {
        format!("1 {unit}")
    } else {
        format!("{value} {unit}s")
    }
}

/// Position of a candidate relative to the queried transaction,
/// e.g. "42 minutes before". Positive deltas are "after".
pub fn format_relative(delta_seconds: i64) -> String {
    let direction = if delta_seconds < 0 { "before" } else { "after" };
    format!("{} {direction}", format_duration(delta_seconds))
}
