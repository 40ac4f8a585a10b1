//! Human-readable remaining-time formatting
//!
//! Progress estimates are shown to operators as coarse strings rather than raw
//! seconds: seconds below a minute, minutes and seconds below an hour, hours and
//! minutes beyond that.

use std::time::Duration;

/// Shown until at least one unit of work has completed
pub const CALCULATING: &str = "calculating…";

const SECS_PER_MINUTE: u64 = 60;
const SECS_PER_HOUR: u64 = 3600;

/// Format a remaining-time estimate.
///
/// `None` means no estimate is possible yet.
///
/// ```
/// use radmig_common::human_time::format_remaining;
/// use std::time::Duration;
///
/// assert_eq!(format_remaining(None), "calculating…");
/// assert_eq!(format_remaining(Some(Duration::from_secs(45))), "45s remaining");
/// assert_eq!(format_remaining(Some(Duration::from_secs(90))), "1m 30s remaining");
/// assert_eq!(format_remaining(Some(Duration::from_secs(7380))), "2h 3m remaining");
/// ```
pub fn format_remaining(remaining: Option<Duration>) -> String {
    let Some(remaining) = remaining else {
        return CALCULATING.to_string();
    };

    // Round to the nearest second so 89.6s reads as 1m 30s
    let secs = (remaining.as_millis() + 500) as u64 / 1000;

    if secs < SECS_PER_MINUTE {
        format!("{}s remaining", secs)
    } else if secs < SECS_PER_HOUR {
        format!(
            "{}m {}s remaining",
            secs / SECS_PER_MINUTE,
            secs % SECS_PER_MINUTE
        )
    } else {
        format!(
            "{}h {}m remaining",
            secs / SECS_PER_HOUR,
            (secs % SECS_PER_HOUR) / SECS_PER_MINUTE
        )
    }
}

/// Format an elapsed duration as `H:MM:SS` for run summaries
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!(
        "{}:{:02}:{:02}",
        secs / SECS_PER_HOUR,
        (secs % SECS_PER_HOUR) / SECS_PER_MINUTE,
        secs % SECS_PER_MINUTE
    )
}
