//! Timestamp helpers shared by the Policy Engine, handlers, and sweeps.
//!
//! Stored timestamps are RFC 3339 (UTC); wire-facing timestamps (§6.1
//! `get_active_users`) are formatted `YYYY-MM-DD HH:MM:SS` in local time.

use chrono::{DateTime, Local, Utc};

pub const NEVER: &str = "Never";

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

pub fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Whole seconds elapsed since `timestamp`, or `None` if unparseable.
pub fn seconds_since(timestamp: &str) -> Option<i64> {
    let then = parse_rfc3339(timestamp)?;
    Some((Utc::now() - then).num_seconds())
}

/// Formats an RFC 3339 timestamp as `YYYY-MM-DD HH:MM:SS` in local time
/// (§6.1). Falls back to the raw string if it cannot be parsed.
pub fn format_local(timestamp: &str) -> String {
    match parse_rfc3339(timestamp) {
        Some(dt) => dt
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        None => timestamp.to_string(),
    }
}

/// Whole minutes elapsed since `timestamp`, truncated toward zero (§6.1).
pub fn minutes_since(timestamp: &str) -> i64 {
    seconds_since(timestamp).unwrap_or(0) / 60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_rfc3339() {
        let now = now_rfc3339();
        assert!(seconds_since(&now).unwrap() < 2);
    }

    #[test]
    fn never_is_not_parseable() {
        assert!(parse_rfc3339(NEVER).is_none());
    }
}
