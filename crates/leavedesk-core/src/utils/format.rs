use chrono::{DateTime, Duration, Local, Utc};

/// Format the time left before a deadline for display, e.g. "6d 23h" or "45m".
/// Negative durations read as "expired".
pub fn format_remaining(remaining: Duration) -> String {
    let minutes = remaining.num_minutes();
    if remaining < Duration::zero() {
        "expired".to_string()
    } else if minutes < 1 {
        "less than a minute".to_string()
    } else if minutes < 60 {
        format!("{}m", minutes)
    } else if minutes < 1440 {
        let hours = minutes / 60;
        let remaining_mins = minutes % 60;
        if remaining_mins == 0 {
            format!("{}h", hours)
        } else {
            format!("{}h {}m", hours, remaining_mins)
        }
    } else {
        let days = minutes / 1440;
        let remaining_hours = (minutes % 1440) / 60;
        if remaining_hours == 0 {
            format!("{}d", days)
        } else {
            format!("{}d {}h", days, remaining_hours)
        }
    }
}

/// Format an instant in local time for display
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%b %d, %Y %H:%M").to_string()
}
