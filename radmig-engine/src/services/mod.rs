//! Engine services
//!
//! Leaf services (hashing, dedup, idempotency, selection, analysis, progress) are
//! composed by the staged committer and the ingestion pipeline; the
//! [`MigrationService`] owns the job lifecycle on top of them.

pub mod anomaly_classifier;
pub mod archive_extractor;
pub mod content_hasher;
pub mod deduplicator;
pub mod duration_verifier;
pub mod idempotency;
pub mod ingestion_pipeline;
pub mod migration_service;
pub mod progress_reporter;
pub mod selection;
pub mod staged_analyzer;
pub mod staged_commit;

pub use deduplicator::{DedupDecision, Deduplicator};
pub use idempotency::IdempotencyResolver;
pub use ingestion_pipeline::{IngestionPipeline, IngestionReport, MediaTask};
pub use migration_service::MigrationService;
pub use progress_reporter::{ProgressReporter, ProgressSink};
pub use staged_commit::StagedCommitter;
