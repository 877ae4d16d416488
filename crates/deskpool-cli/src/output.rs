//! Formatted output helpers for CLI commands.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Prints a value as pretty JSON on stdout.
///
/// # Errors
///
/// Returns an error if the value cannot be serialized.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Formats the time elapsed since `then` compactly (e.g., "5m ago").
#[must_use]
pub fn format_age(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    const MINUTE: i64 = 60;
    const HOUR: i64 = MINUTE * 60;
    const DAY: i64 = HOUR * 24;

    let secs = (now - then).num_seconds().max(0);
    if secs >= DAY {
        format!("{}d ago", secs / DAY)
    } else if secs >= HOUR {
        format!("{}h ago", secs / HOUR)
    } else if secs >= MINUTE {
        format!("{}m ago", secs / MINUTE)
    } else {
        format!("{secs}s ago")
    }
}
