//! Staged import snapshot
//!
//! Produced by staged analysis, edited through selection updates, consumed by
//! commit. After commit the snapshot is immutable apart from `committed_at`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use super::{ScopedSourceId, SourceType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagedImportStatus {
    Ready,
    Committed,
    Rejected,
}

impl StagedImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StagedImportStatus::Ready => "ready",
            StagedImportStatus::Committed => "committed",
            StagedImportStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ready" => Some(StagedImportStatus::Ready),
            "committed" => Some(StagedImportStatus::Committed),
            "rejected" => Some(StagedImportStatus::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for StagedImportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common surface of every staged item list entry
pub trait StagedItem {
    /// Serialized scoped (or legacy) source ID
    fn source_id(&self) -> &str;
    fn is_selected(&self) -> bool;
    fn set_selected(&mut self, selected: bool);

    fn scoped_id(&self) -> ScopedSourceId {
        ScopedSourceId::parse(self.source_id())
    }
}

macro_rules! impl_staged_item {
    ($($ty:ty),* $(,)?) => {
        $(
            impl StagedItem for $ty {
                fn source_id(&self) -> &str {
                    &self.source_id
                }
                fn is_selected(&self) -> bool {
                    self.selected
                }
                fn set_selected(&mut self, selected: bool) {
                    self.selected = selected;
                }
            }
        )*
    };
}

/// A source station; `source_id` is the raw station ID used as the scope of other items
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagedStationItem {
    pub source_id: String,
    pub name: String,
    pub description: Option<String>,
    pub timezone: Option<String>,
    pub selected: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagedMediaItem {
    pub source_id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub duration_ms: Option<u64>,
    pub file_size: Option<u64>,
    /// sha256 when known at analysis time
    pub content_hash: Option<String>,
    /// Adapter-specific locator of the payload (relative path, URL)
    pub locator: String,
    pub artwork_locator: Option<String>,
    pub is_duplicate: bool,
    /// Existing destination media matched by duplicate detection
    pub duplicate_of_id: Option<String>,
    pub selected: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagedPlaylistItem {
    pub source_id: String,
    pub name: String,
    pub description: Option<String>,
    pub item_count: usize,
    /// Ordered media source IDs
    pub media_source_ids: Vec<String>,
    pub selected: bool,
}

/// Smart block rule configuration
///
/// Known shapes are typed; anything else is carried verbatim in `Opaque` so newer
/// source formats survive a round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SmartBlockRules {
    Criteria {
        criteria: Vec<RuleCriterion>,
        #[serde(default)]
        limit: Option<RuleLimit>,
    },
    Sequence {
        steps: Vec<SequenceStep>,
    },
    Opaque {
        raw: Vec<u8>,
    },
}

impl Default for SmartBlockRules {
    fn default() -> Self {
        SmartBlockRules::Criteria {
            criteria: Vec::new(),
            limit: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleCriterion {
    pub field: String,
    pub operator: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleLimit {
    pub value: u32,
    /// `items`, `minutes` or `hours`
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceStep {
    pub position: u32,
    /// `media`, `playlist` or `smart_block`
    pub entry_type: String,
    pub source_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagedSmartBlockItem {
    pub source_id: String,
    pub name: String,
    pub rules: SmartBlockRules,
    pub selected: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagedShowItem {
    pub source_id: String,
    pub name: String,
    pub description: Option<String>,
    pub instance_count: usize,
    pub detected_rrule: Option<String>,
    /// 0.0 - 1.0
    pub pattern_confidence: f64,
    pub pattern_description: Option<String>,
    pub dtstart: Option<DateTime<Utc>>,
    pub duration_minutes: u32,
    pub timezone: String,
    pub create_show: bool,
    pub create_clock: bool,
    pub custom_rrule: Option<String>,
    pub selected: bool,
}

impl StagedShowItem {
    /// Recurrence rule used when creating a show: operator override first
    pub fn effective_rrule(&self) -> Option<&str> {
        self.custom_rrule
            .as_deref()
            .or(self.detected_rrule.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagedWebstreamItem {
    pub source_id: String,
    pub name: String,
    pub urls: Vec<String>,
    pub selected: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagedUserItem {
    pub source_id: String,
    pub login: String,
    pub email: Option<String>,
    pub role: String,
    pub selected: bool,
}

impl_staged_item!(
    StagedStationItem,
    StagedMediaItem,
    StagedPlaylistItem,
    StagedSmartBlockItem,
    StagedShowItem,
    StagedWebstreamItem,
    StagedUserItem,
);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportWarning {
    pub code: String,
    /// `warning` or `info`
    pub severity: String,
    pub message: String,
    pub details: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportSuggestion {
    pub code: String,
    pub message: String,
    pub action: String,
}

/// Operator selection edits. Category lists are the exact selected sets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportSelections {
    /// Source station filter; empty means no filter
    pub station_ids: Vec<String>,
    pub media_ids: Vec<String>,
    pub playlist_ids: Vec<String>,
    pub smart_block_ids: Vec<String>,
    pub show_ids: Vec<String>,
    pub webstream_ids: Vec<String>,
    pub user_ids: Vec<String>,
    pub shows_as_shows: Vec<String>,
    pub shows_as_clocks: Vec<String>,
    /// Show source ID → recurrence rule override
    pub custom_rrules: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedImport {
    pub id: Uuid,
    pub job_id: Uuid,
    pub source_type: SourceType,
    pub status: StagedImportStatus,
    pub stations: Vec<StagedStationItem>,
    pub media: Vec<StagedMediaItem>,
    pub playlists: Vec<StagedPlaylistItem>,
    pub smart_blocks: Vec<StagedSmartBlockItem>,
    pub shows: Vec<StagedShowItem>,
    pub webstreams: Vec<StagedWebstreamItem>,
    pub users: Vec<StagedUserItem>,
    pub warnings: Vec<ImportWarning>,
    pub suggestions: Vec<ImportSuggestion>,
    /// Last applied selection edit
    pub selections: Option<ImportSelections>,
    pub analyzed_at: DateTime<Utc>,
    pub committed_at: Option<DateTime<Utc>>,
}

impl StagedImport {
    /// Empty snapshot in `Ready` state
    pub fn new(job_id: Uuid, source_type: SourceType) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            source_type,
            status: StagedImportStatus::Ready,
            stations: Vec::new(),
            media: Vec::new(),
            playlists: Vec::new(),
            smart_blocks: Vec::new(),
            shows: Vec::new(),
            webstreams: Vec::new(),
            users: Vec::new(),
            warnings: Vec::new(),
            suggestions: Vec::new(),
            selections: None,
            analyzed_at: Utc::now(),
            committed_at: None,
        }
    }

    pub fn total_items(&self) -> usize {
        self.stations.len()
            + self.media.len()
            + self.playlists.len()
            + self.smart_blocks.len()
            + self.shows.len()
            + self.webstreams.len()
            + self.users.len()
    }

    pub fn selected_count(&self) -> usize {
        fn count<T: StagedItem>(items: &[T]) -> usize {
            items.iter().filter(|i| i.is_selected()).count()
        }
        count(&self.stations)
            + count(&self.media)
            + count(&self.playlists)
            + count(&self.smart_blocks)
            + count(&self.shows)
            + count(&self.webstreams)
            + count(&self.users)
    }

    pub fn duplicate_count(&self) -> usize {
        self.media.iter().filter(|m| m.is_duplicate).count()
    }

    /// Mark every item selected (direct imports commit the whole snapshot)
    pub fn select_all(&mut self) {
        fn all<T: StagedItem>(items: &mut [T]) {
            items.iter_mut().for_each(|i| i.set_selected(true));
        }
        all(&mut self.stations);
        all(&mut self.media);
        all(&mut self.playlists);
        all(&mut self.smart_blocks);
        all(&mut self.shows);
        all(&mut self.webstreams);
        all(&mut self.users);
    }
}
