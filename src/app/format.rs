use chrono::{DateTime, Local};

pub(crate) fn truncate(s: &str, max: usize) -> String {
    let mut out = s.to_string();
    if out.chars().count() > max {
        out = out.chars().take(max.saturating_sub(3)).collect::<String>() + "...";
    }
    out
}

pub(crate) fn format_updated_at(raw: &str) -> String {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| {
            dt.with_timezone(&Local)
                .format("%Y-%m-%d %H:%M %:z")
                .to_string()
        })
        .unwrap_or_else(|_| raw.to_string())
}

/// Relative form for narrow columns: "just now", "5m ago", "3h ago",
/// then the calendar date.
pub(crate) fn format_updated_ago(raw: &str, now: DateTime<Local>) -> String {
    let Ok(at) = DateTime::parse_from_rfc3339(raw) else {
        return raw.to_string();
    };
    let at = at.with_timezone(&Local);
    let elapsed = now.signed_duration_since(at);
    if elapsed.num_minutes() < 1 {
        "just now".to_string()
    } else if elapsed.num_hours() < 1 {
        format!("{}m ago", elapsed.num_minutes())
    } else if elapsed.num_days() < 1 {
        format!("{}h ago", elapsed.num_hours())
    } else {
        at.format("%Y-%m-%d").to_string()
    }
}
