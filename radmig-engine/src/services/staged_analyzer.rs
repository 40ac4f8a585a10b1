//! Staged analysis: default selections, review hints and show recurrence detection
//!
//! Adapters build the raw [`StagedImport`] from their source; [`finish_analysis`]
//! then marks duplicates against the destination library, applies the default
//! selection policy and attaches warnings and suggestions for the reviewer.

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::deduplicator::Deduplicator;
use crate::models::{ImportSuggestion, ImportWarning, StagedImport};

/// Pattern confidence at or above which a show defaults to create-as-show
pub const SHOW_CONFIDENCE_THRESHOLD: f64 = 0.75;

/// One past airing of a show
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShowInstance {
    /// Local wall time with the station's UTC offset at the time of airing
    pub starts_at: DateTime<FixedOffset>,
    pub ends_at: DateTime<FixedOffset>,
    #[serde(default)]
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecurrenceResult {
    pub rrule: String,
    /// matched / total, 0.0 - 1.0
    pub confidence: f64,
    /// Human-readable pattern ("Weekly on Monday at 08:00")
    pub pattern: String,
    pub dtstart: DateTime<Utc>,
    pub duration_minutes: u32,
    pub timezone: String,
    pub matched_count: usize,
    pub exception_count: usize,
}

const WEEK: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

fn rrule_day(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "MO",
        Weekday::Tue => "TU",
        Weekday::Wed => "WE",
        Weekday::Thu => "TH",
        Weekday::Fri => "FR",
        Weekday::Sat => "SA",
        Weekday::Sun => "SU",
    }
}

fn day_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// Detect a recurring schedule from past airings
///
/// Needs at least 3 instances. Airings are grouped by local weekday and start time;
/// the largest group(s) must hold at least 2 airings. Instances on 5 or more distinct
/// weekdays (with 5 or more airings), or dominant groups covering all 7 days, yield a
/// daily rule; otherwise a weekly rule over the dominant days.
pub fn detect_recurrence(instances: &[ShowInstance]) -> Option<RecurrenceResult> {
    if instances.len() < 3 {
        return None;
    }

    let mut sorted = instances.to_vec();
    sorted.sort_by_key(|i| i.starts_at);

    let total_minutes: i64 = sorted
        .iter()
        .map(|i| (i.ends_at - i.starts_at).num_minutes())
        .sum();
    let duration_minutes = (total_minutes / sorted.len() as i64).max(0) as u32;

    // (weekday from Monday, hour, minute) → airings
    let mut groups: BTreeMap<(u32, u32, u32), usize> = BTreeMap::new();
    for inst in &sorted {
        let local = inst.starts_at;
        let key = (
            local.weekday().num_days_from_monday(),
            local.hour(),
            local.minute(),
        );
        *groups.entry(key).or_insert(0) += 1;
    }

    let best_count = groups.values().copied().max().unwrap_or(0);
    if best_count < 2 {
        return None;
    }
    let best: Vec<(Weekday, u32, u32)> = groups
        .iter()
        .filter(|(_, &count)| count == best_count)
        .map(|(&(day, hour, minute), _)| (WEEK[day as usize], hour, minute))
        .collect();
    let (first_day, hour, minute) = *best.first()?;

    let distinct_days: BTreeSet<u32> = sorted
        .iter()
        .map(|i| i.starts_at.weekday().num_days_from_monday())
        .collect();
    let looks_daily = sorted.len() >= 5 && distinct_days.len() >= 5;

    let (rrule, pattern) = if best.len() == 7 || looks_daily {
        (
            format!("FREQ=DAILY;BYHOUR={};BYMINUTE={}", hour, minute),
            format!("Daily at {:02}:{:02}", hour, minute),
        )
    } else if best.len() == 1 {
        (
            format!(
                "FREQ=WEEKLY;BYDAY={};BYHOUR={};BYMINUTE={}",
                rrule_day(first_day),
                hour,
                minute
            ),
            format!("Weekly on {} at {:02}:{:02}", day_name(first_day), hour, minute),
        )
    } else {
        let days: Vec<&str> = best.iter().map(|(d, _, _)| rrule_day(*d)).collect();
        let names: Vec<&str> = best.iter().map(|(d, _, _)| day_name(*d)).collect();
        (
            format!(
                "FREQ=WEEKLY;BYDAY={};BYHOUR={};BYMINUTE={}",
                days.join(","),
                hour,
                minute
            ),
            format!("Weekly on {} at {:02}:{:02}", names.join(", "), hour, minute),
        )
    };

    let matched_count = (best_count * best.len()).min(sorted.len());
    let first = &sorted[0];

    Some(RecurrenceResult {
        rrule,
        confidence: matched_count as f64 / sorted.len() as f64,
        pattern,
        dtstart: first.starts_at.with_timezone(&Utc),
        duration_minutes,
        timezone: first.timezone.clone().unwrap_or_else(|| "UTC".to_string()),
        matched_count,
        exception_count: sorted.len() - matched_count,
    })
}

/// Default policy: duplicates start deselected, everything else selected; shows with
/// a confident detected rule become shows, the rest clocks
pub fn apply_default_selections(staged: &mut StagedImport) {
    for station in &mut staged.stations {
        station.selected = true;
    }
    for media in &mut staged.media {
        media.selected = !media.is_duplicate;
    }
    for playlist in &mut staged.playlists {
        playlist.selected = true;
    }
    for block in &mut staged.smart_blocks {
        block.selected = true;
    }
    for show in &mut staged.shows {
        show.selected = true;
        let as_show =
            show.pattern_confidence >= SHOW_CONFIDENCE_THRESHOLD && show.detected_rrule.is_some();
        show.create_show = as_show;
        show.create_clock = !as_show;
    }
    for webstream in &mut staged.webstreams {
        webstream.selected = true;
    }
    for user in &mut staged.users {
        user.selected = true;
    }
}

pub fn generate_warnings(staged: &StagedImport) -> Vec<ImportWarning> {
    let mut warnings = Vec::new();

    let duplicates = staged.duplicate_count();
    if duplicates > 0 {
        warnings.push(ImportWarning {
            code: "duplicate_media".to_string(),
            severity: "warning".to_string(),
            message: format!("{} media files already exist in your library", duplicates),
            details: Some(
                "Duplicate files are deselected by default. You can still import them if needed."
                    .to_string(),
            ),
        });
    }

    let low_confidence = staged
        .shows
        .iter()
        .filter(|s| s.detected_rrule.is_some() && s.pattern_confidence < SHOW_CONFIDENCE_THRESHOLD)
        .count();
    if low_confidence > 0 {
        warnings.push(ImportWarning {
            code: "low_confidence_schedule".to_string(),
            severity: "info".to_string(),
            message: format!("{} shows have uncertain schedule patterns", low_confidence),
            details: Some(
                "These shows will be imported as Clocks by default. \
                 Edit the recurrence rule to create recurring Shows."
                    .to_string(),
            ),
        });
    }

    let no_pattern = staged
        .shows
        .iter()
        .filter(|s| s.detected_rrule.is_none() && s.instance_count > 0)
        .count();
    if no_pattern > 0 {
        warnings.push(ImportWarning {
            code: "no_schedule_pattern".to_string(),
            severity: "info".to_string(),
            message: format!("{} shows had no detectable schedule pattern", no_pattern),
            details: Some(
                "These shows will be imported as Clocks. Add a schedule manually if needed."
                    .to_string(),
            ),
        });
    }

    let empty_playlists = staged.playlists.iter().filter(|p| p.item_count == 0).count();
    if empty_playlists > 0 {
        warnings.push(ImportWarning {
            code: "empty_playlists".to_string(),
            severity: "info".to_string(),
            message: format!("{} playlists are empty", empty_playlists),
            details: None,
        });
    }

    warnings
}

pub fn generate_suggestions(staged: &StagedImport) -> Vec<ImportSuggestion> {
    let mut suggestions = Vec::new();

    let duplicates = staged.duplicate_count();
    if duplicates > 0 {
        suggestions.push(ImportSuggestion {
            code: "skip_duplicates".to_string(),
            message: format!(
                "Skip {} duplicate media files to save storage space",
                duplicates
            ),
            action: "deselect_duplicates".to_string(),
        });
    }

    let with_pattern = staged
        .shows
        .iter()
        .filter(|s| s.detected_rrule.is_some())
        .count();
    if with_pattern > 0 {
        suggestions.push(ImportSuggestion {
            code: "review_schedules".to_string(),
            message: format!(
                "Review {} detected show schedules to ensure accuracy",
                with_pattern
            ),
            action: "review_shows".to_string(),
        });
    }

    suggestions
}

/// Duplicate marking, default selections, warnings and suggestions, in that order
///
/// `station_id` restricts duplicate matching to one destination station.
pub async fn finish_analysis(
    staged: &mut StagedImport,
    dedup: &Deduplicator,
    station_id: Option<&str>,
) {
    let duplicates = dedup.detect_duplicates(&mut staged.media, station_id).await;
    apply_default_selections(staged);
    staged.warnings = generate_warnings(staged);
    staged.suggestions = generate_suggestions(staged);

    tracing::info!(
        staged_import_id = %staged.id,
        total_items = staged.total_items(),
        selected = staged.selected_count(),
        duplicates,
        "Staged analysis complete"
    );
}
