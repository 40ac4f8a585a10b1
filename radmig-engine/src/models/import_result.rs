//! Import results and the mapping audit trail

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{ImportedItems, Progress};

/// One migrated (or skipped) entity: old source ID to new destination ID
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    pub entity_type: String,
    pub old_id: String,
    /// Empty when the entity was skipped
    pub new_id: String,
    pub name: String,
    pub skipped: bool,
    pub reason: Option<String>,
}

impl Mapping {
    pub fn created(
        entity_type: &str,
        old_id: impl Into<String>,
        new_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            old_id: old_id.into(),
            new_id: new_id.into(),
            name: name.into(),
            skipped: false,
            reason: None,
        }
    }

    /// `existing_id` is the destination entity matched instead of creating one, if any
    pub fn skipped(
        entity_type: &str,
        old_id: impl Into<String>,
        existing_id: Option<String>,
        name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            old_id: old_id.into(),
            new_id: existing_id.unwrap_or_default(),
            name: name.into(),
            skipped: true,
            reason: Some(reason.into()),
        }
    }
}

/// Outcome counters of an analysis or import run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportResult {
    pub stations_created: usize,
    pub media_items_imported: usize,
    pub playlists_created: usize,
    pub smart_blocks_created: usize,
    pub shows_created: usize,
    pub clocks_created: usize,
    pub webstreams_created: usize,
    pub users_created: usize,
    pub warnings: Vec<String>,
    /// Skip reason key → count (e.g. `media_download_failed`)
    pub skipped: BTreeMap<String, usize>,
    pub mappings: Vec<Mapping>,
    pub duration_seconds: f64,
}

impl ImportResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a skip counter
    pub fn skip(&mut self, reason: &str) {
        self.skip_n(reason, 1);
    }

    pub fn skip_n(&mut self, reason: &str, n: usize) {
        if n > 0 {
            *self.skipped.entry(reason.to_string()).or_insert(0) += n;
        }
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn total_created(&self) -> usize {
        self.stations_created
            + self.media_items_imported
            + self.playlists_created
            + self.smart_blocks_created
            + self.shows_created
            + self.clocks_created
            + self.webstreams_created
            + self.users_created
    }

    pub fn total_skipped(&self) -> usize {
        self.skipped.values().sum()
    }
}

/// What an import or commit produced: counters plus the manifest used for rollback
#[derive(Debug, Clone, Default)]
pub struct ImportOutcome {
    pub result: ImportResult,
    pub imported: ImportedItems,
    /// Last progress snapshot of the run
    pub progress: Option<Progress>,
    /// Job-failing condition found after entities were already created
    pub error: Option<String>,
    /// Run stopped early; `imported` holds what was created before that
    pub cancelled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_counters_accumulate() {
        let mut result = ImportResult::new();
        result.skip("media_download_failed");
        result.skip("media_download_failed");
        result.skip_n("playlist_already_imported", 3);
        result.skip_n("ignored", 0);

        assert_eq!(result.skipped["media_download_failed"], 2);
        assert_eq!(result.total_skipped(), 5);
        assert!(!result.skipped.contains_key("ignored"));
    }
}
