//! Data models for the migration engine
//!
//! - Job lifecycle state machine and options
//! - Progress snapshots
//! - Import results, mappings and the imported-items manifest
//! - Staged import snapshots and selection edits
//! - Anomaly reports

pub mod anomaly;
pub mod import_result;
pub mod imported_items;
pub mod job;
pub mod progress;
pub mod scoped_id;
pub mod staged_import;

pub use anomaly::{AnomalyBucket, AnomalyClass, AnomalyReport};
pub use import_result::{ImportOutcome, ImportResult, Mapping};
pub use imported_items::ImportedItems;
pub use job::{Job, JobOptions, JobStatus, SourceConnection, SourceType, WorkflowMode};
pub use progress::{Phase, Progress, ProgressStep};
pub use scoped_id::ScopedSourceId;
pub use staged_import::{
    ImportSelections, ImportSuggestion, ImportWarning, RuleCriterion, RuleLimit, SequenceStep,
    SmartBlockRules, StagedImport, StagedImportStatus, StagedItem, StagedMediaItem,
    StagedPlaylistItem, StagedShowItem, StagedSmartBlockItem, StagedStationItem, StagedUserItem,
    StagedWebstreamItem,
};
