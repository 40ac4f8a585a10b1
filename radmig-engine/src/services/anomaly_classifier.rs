//! Anomaly classification of a finished import
//!
//! Skip counters and warning strings are bucketed into the fixed
//! [`AnomalyClass`] categories by keyword. The grand total is the sum of all skip
//! counters, matched or not; warnings only add to their class counts.

use chrono::Utc;
use std::collections::BTreeMap;

use crate::models::{AnomalyBucket, AnomalyClass, AnomalyReport, ImportResult};

const MAX_EXAMPLES: usize = 5;

const DURATION_KEYS: &[&str] = &["duration"];
const DUPLICATE_KEYS: &[&str] = &["duplicate", "deduplic"];
const MISSING_LINK_KEYS: &[&str] = &["missing", "not_found", "no_station", "orphan", "link"];
const SKIPPED_KEYS: &[&str] = &["failed", "skip", "already_imported", "invalid"];

const MISSING_LINK_PHRASES: &[&str] = &[
    "missing",
    "not found",
    "orphan",
    "link",
    "no target station mapping",
];
const SKIPPED_PHRASES: &[&str] = &["skip", "failed"];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Classes a skip-reason key belongs to
fn classify_skip_key(key: &str) -> Vec<AnomalyClass> {
    let key = key.to_lowercase();
    let mut classes = Vec::new();
    if contains_any(&key, DURATION_KEYS) {
        classes.push(AnomalyClass::Duration);
    }
    if contains_any(&key, DUPLICATE_KEYS) {
        classes.push(AnomalyClass::DuplicateResolution);
    }
    if contains_any(&key, MISSING_LINK_KEYS) {
        classes.push(AnomalyClass::MissingLinks);
    }
    if classes.is_empty() && contains_any(&key, SKIPPED_KEYS) {
        classes.push(AnomalyClass::SkippedEntities);
    }
    classes
}

/// Classes a warning string belongs to
fn classify_warning(warning: &str) -> Vec<AnomalyClass> {
    let text = warning.to_lowercase();
    let mut classes = Vec::new();
    if contains_any(&text, DURATION_KEYS) {
        classes.push(AnomalyClass::Duration);
    }
    if contains_any(&text, DUPLICATE_KEYS) {
        classes.push(AnomalyClass::DuplicateResolution);
    }
    if contains_any(&text, MISSING_LINK_PHRASES) {
        classes.push(AnomalyClass::MissingLinks);
    }
    if contains_any(&text, SKIPPED_PHRASES) {
        classes.push(AnomalyClass::SkippedEntities);
    }
    classes
}

fn add(
    classes: &mut BTreeMap<AnomalyClass, AnomalyBucket>,
    class: AnomalyClass,
    count: usize,
    example: String,
) {
    let bucket = classes.entry(class).or_default();
    bucket.count += count;
    if bucket.examples.len() < MAX_EXAMPLES && !bucket.examples.contains(&example) {
        bucket.examples.push(example);
    }
}

/// Build the report, or `None` when there is nothing to report
pub fn classify(result: &ImportResult) -> Option<AnomalyReport> {
    let mut classes = BTreeMap::new();
    let mut total = 0usize;

    for (key, &count) in &result.skipped {
        if count == 0 {
            continue;
        }
        total += count;
        for class in classify_skip_key(key) {
            add(&mut classes, class, count, format!("{} ({})", key, count));
        }
    }

    let mut warning_count = 0usize;
    for warning in &result.warnings {
        let warning = warning.trim();
        let matched = classify_warning(warning);
        if matched.is_empty() {
            continue;
        }
        warning_count += 1;
        for class in matched {
            add(&mut classes, class, 1, warning.to_string());
        }
    }

    if total == 0 && warning_count == 0 {
        return None;
    }

    Some(AnomalyReport {
        total,
        warning_count,
        classes,
        generated_at: Utc::now(),
    })
}
