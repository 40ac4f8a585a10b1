//! Operator-facing anomaly report computed at job completion

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fixed anomaly categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyClass {
    Duration,
    DuplicateResolution,
    MissingLinks,
    SkippedEntities,
}

impl AnomalyClass {
    pub const ALL: [AnomalyClass; 4] = [
        AnomalyClass::Duration,
        AnomalyClass::DuplicateResolution,
        AnomalyClass::MissingLinks,
        AnomalyClass::SkippedEntities,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            AnomalyClass::Duration => "Duration anomalies",
            AnomalyClass::DuplicateResolution => "Duplicate resolution",
            AnomalyClass::MissingLinks => "Missing links",
            AnomalyClass::SkippedEntities => "Skipped entities",
        }
    }
}

/// Matched count and a few example reasons for one class
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnomalyBucket {
    pub count: usize,
    pub examples: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    /// Sum of all positive skip counters
    pub total: usize,
    /// Warnings inspected (reported per class, not part of `total`)
    pub warning_count: usize,
    pub classes: BTreeMap<AnomalyClass, AnomalyBucket>,
    pub generated_at: DateTime<Utc>,
}

impl AnomalyReport {
    pub fn count(&self, class: AnomalyClass) -> usize {
        self.classes.get(&class).map(|b| b.count).unwrap_or(0)
    }
}
