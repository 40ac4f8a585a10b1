//! Source adapter contract and registry
//!
//! Every adapter provides the base capability set ([`SourceAdapter`]). Adapters that
//! support review-then-commit additionally expose [`StagedSourceAdapter`] through
//! [`SourceAdapter::staged`]; the engine asks for it explicitly instead of guessing.

pub mod archive;

use async_trait::async_trait;
use radmig_common::{Error, Result, ValidationErrors};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::models::{
    ImportOutcome, ImportResult, JobOptions, SourceType, StagedImport, StagedMediaItem,
};
use crate::services::progress_reporter::{ProgressReporter, ProgressSink};
use crate::storage::{BlobStore, DomainStore};

pub use archive::ArchiveManifestAdapter;

/// Destination collaborators and settings shared by every run
#[derive(Clone)]
pub struct EngineServices {
    pub domain: Arc<dyn DomainStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub config: EngineConfig,
    /// Parent directory for per-run scratch space
    pub scratch_dir: PathBuf,
}

/// Everything a run hands to its adapter
#[derive(Clone)]
pub struct ImportContext {
    pub job_id: Uuid,
    pub source_type: SourceType,
    pub options: JobOptions,
    pub cancel: CancellationToken,
    pub progress: ProgressSink,
    pub services: EngineServices,
}

impl ImportContext {
    /// Fresh phase-weighted reporter publishing into this run's progress queue
    pub fn reporter(&self) -> ProgressReporter {
        ProgressReporter::new(self.progress.clone(), self.services.config.progress_history)
    }

    /// `Err(Cancelled)` once the run has been cancelled
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Media payload stream returned by a fetcher
pub type PayloadReader = Box<dyn AsyncRead + Send + Unpin>;

/// Fetches media payloads for the ingestion pipeline
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, item: &StagedMediaItem) -> Result<PayloadReader>;

    /// Artwork bytes, if the source has any for this item
    async fn fetch_artwork(&self, item: &StagedMediaItem) -> Result<Option<Vec<u8>>>;
}

/// Base capability set every adapter provides
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_type(&self) -> SourceType;

    /// Source-specific option checks, reported together
    async fn validate(&self, options: &JobOptions) -> std::result::Result<(), ValidationErrors>;

    /// Dry run: counts of what an import would create
    async fn analyze(&self, options: &JobOptions) -> Result<ImportResult>;

    /// Direct import of everything the source offers
    async fn import(&self, ctx: &ImportContext) -> Result<ImportOutcome>;

    /// Review-then-commit capability, when supported
    fn staged(&self) -> Option<&dyn StagedSourceAdapter> {
        None
    }
}

/// Optional review-then-commit capability
#[async_trait]
pub trait StagedSourceAdapter: Send + Sync {
    /// Build the reviewable snapshot for `ctx.job_id`
    async fn analyze_for_staging(&self, ctx: &ImportContext) -> Result<StagedImport>;

    /// Create the selected entities of `staged`
    async fn commit_staged_import(
        &self,
        staged: &StagedImport,
        ctx: &ImportContext,
    ) -> Result<ImportOutcome>;
}

/// Source type → adapter, built once at startup and passed to the service
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<SourceType, Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `adapter` under its own source type, replacing any previous one
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) -> &mut Self {
        let source_type = adapter.source_type();
        if self.adapters.insert(source_type.clone(), adapter).is_some() {
            tracing::warn!(source_type = %source_type, "Replacing registered source adapter");
        }
        self
    }

    pub fn get(&self, source_type: &SourceType) -> Result<Arc<dyn SourceAdapter>> {
        self.adapters.get(source_type).cloned().ok_or_else(|| {
            Error::Adapter(format!(
                "No adapter registered for source type '{}'",
                source_type
            ))
        })
    }

    pub fn contains(&self, source_type: &SourceType) -> bool {
        self.adapters.contains_key(source_type)
    }

    /// Registered source types, sorted
    pub fn source_types(&self) -> Vec<SourceType> {
        let mut types: Vec<SourceType> = self.adapters.keys().cloned().collect();
        types.sort();
        types
    }
}
