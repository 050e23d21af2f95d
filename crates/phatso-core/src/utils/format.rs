use chrono::{DateTime, Duration, Local, Utc};

/// Format time left on a credential for display.
/// Negative or zero durations read as "expired".
pub fn format_remaining(remaining: Duration) -> String {
    let total_secs = remaining.num_seconds();
    if remaining <= Duration::zero() {
        return "expired".to_string();
    }
    if total_secs < 60 {
        return format!("{}s", total_secs.max(1));
    }

    let minutes = total_secs / 60;
    let secs = total_secs % 60;
    if minutes < 60 {
        format!("{}m {:02}s", minutes, secs)
    } else if minutes < 1440 {
        format!("{}h {:02}m", minutes / 60, minutes % 60)
    } else {
        format!("{}d {}h", minutes / 1440, (minutes % 1440) / 60)
    }
}

/// Format an absolute expiry (epoch milliseconds) in local time
pub fn format_expiry(expires_at_millis: i64) -> String {
    match DateTime::<Utc>::from_timestamp_millis(expires_at_millis) {
        Some(dt) => dt.with_timezone(&Local).format("%b %d, %Y %H:%M:%S").to_string(),
        None => "unknown".to_string(),
    }
}
