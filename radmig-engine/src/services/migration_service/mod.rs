//! Migration job service
//!
//! Owns the job lifecycle. Public operations validate and persist state changes
//! synchronously; the actual work runs in a spawned task per job.
//!
//! # Arbitration
//! Every status change is a conditional update on the job row. Start and commit
//! operations claim the job (`pending → validating`, `analyzing` with no
//! `started_at`, `staged → running`), so exactly one caller wins a race. The
//! finishing write of a run is conditional on the job still being in the state the
//! run left it in. A job cancelled meanwhile stays `cancelled` but keeps the run's
//! result and manifest; a deleted job discards them.
//!
//! # Cancellation
//! `cancel_job` flips the status first and then trips the run's
//! [`CancellationToken`]. Adapters check the token between units of work, so
//! in-flight fetches and writes complete before the run stops.

mod persister;

use chrono::Utc;
use radmig_common::events::{EventBus, MigrationEvent};
use radmig_common::{Error, Result};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::adapters::{AdapterRegistry, EngineServices, ImportContext, SourceAdapter};
use crate::db::{self, jobs::JobFinish};
use crate::models::{
    ImportOutcome, ImportResult, ImportSelections, ImportedItems, Job, JobOptions, JobStatus,
    Mapping, Phase, Progress, SourceType, StagedImport, StagedImportStatus, WorkflowMode,
};
use crate::services::anomaly_classifier;
use crate::services::progress_reporter::ProgressSink;
use crate::services::selection::apply_selections;
use crate::storage::EntityKind;

/// Error recorded on jobs found active at startup
pub const INTERRUPTED_MESSAGE: &str = "import interrupted by server restart";

/// States `cancel_job` accepts
const CANCELLABLE: [JobStatus; 5] = [
    JobStatus::Pending,
    JobStatus::Validating,
    JobStatus::Analyzing,
    JobStatus::Staged,
    JobStatus::Running,
];

/// States a rollback may start from
const ROLLBACK_FROM: [JobStatus; 3] = [
    JobStatus::Completed,
    JobStatus::Failed,
    JobStatus::Cancelled,
];

/// Work a spawned run performs
enum RunKind {
    Direct,
    Analysis,
    Commit(Box<StagedImport>),
}

/// Migration job service
///
/// Cloning is cheap; clones share the database pool, the event bus and the map of
/// active runs.
#[derive(Clone)]
pub struct MigrationService {
    db: SqlitePool,
    event_bus: EventBus,
    registry: Arc<AdapterRegistry>,
    services: EngineServices,
    active_runs: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
}

impl MigrationService {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        registry: Arc<AdapterRegistry>,
        services: EngineServices,
    ) -> Self {
        Self {
            db,
            event_bus,
            registry,
            services,
            active_runs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Persist a direct job in `pending`
    pub async fn create_job(&self, source_type: SourceType, options: JobOptions) -> Result<Job> {
        self.registry.get(&source_type)?;
        options.validate().into_result()?;

        let job = Job::new(source_type, WorkflowMode::Direct, options);
        self.persist_new_job(&job).await?;
        Ok(job)
    }

    /// Persist a staged job in `analyzing`; the source type must be staged-capable
    pub async fn create_staged_job(
        &self,
        source_type: SourceType,
        options: JobOptions,
    ) -> Result<Job> {
        let adapter = self.registry.get(&source_type)?;
        if adapter.staged().is_none() {
            return Err(Error::InvalidInput(format!(
                "Source type '{}' does not support staged imports",
                source_type
            )));
        }
        options.validate().into_result()?;

        let job = Job::new(source_type, WorkflowMode::Staged, options);
        self.persist_new_job(&job).await?;
        Ok(job)
    }

    /// New job re-running a finished job's source and options
    pub async fn clone_job_for_redo(&self, job_id: Uuid) -> Result<Job> {
        let original = self.require_job(job_id).await?;
        if !original.is_terminal() {
            return Err(Error::InvalidState(format!(
                "Job {} has not finished (status: {})",
                job_id, original.status
            )));
        }
        self.registry.get(&original.source_type)?;

        let job = original.redo();
        self.persist_new_job(&job).await?;
        tracing::info!(job_id = %job.id, redo_of = %job_id, "Created redo job");
        Ok(job)
    }

    async fn persist_new_job(&self, job: &Job) -> Result<()> {
        db::jobs::insert_job(&self.db, job).await?;

        tracing::info!(
            job_id = %job.id,
            source_type = %job.source_type,
            mode = job.mode.as_str(),
            "Migration job created"
        );
        self.event_bus.emit_lossy(MigrationEvent::JobCreated {
            job_id: job.id,
            source_type: job.source_type.to_string(),
            mode: job.mode.as_str().to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Dry run against the source: counts only, nothing persisted
    pub async fn analyze_source(
        &self,
        source_type: &SourceType,
        options: &JobOptions,
    ) -> Result<ImportResult> {
        let adapter = self.registry.get(source_type)?;
        let mut errors = options.validate();
        if let Err(adapter_errors) = adapter.validate(options).await {
            errors.extend(adapter_errors);
        }
        errors.into_result()?;
        adapter.analyze(options).await
    }

    // ------------------------------------------------------------------
    // Starting runs
    // ------------------------------------------------------------------

    /// Claim a pending direct job and launch its run.
    ///
    /// Returns once the job is durably `validating`. A second caller gets
    /// `InvalidState` naming the status the winner advanced the job to.
    pub async fn start_job(&self, job_id: Uuid) -> Result<Job> {
        let job = self.require_job(job_id).await?;
        if job.mode != WorkflowMode::Direct {
            return Err(Error::InvalidState(format!(
                "Job {} is a staged job; start it with start_staged_job",
                job_id
            )));
        }
        if job.status != JobStatus::Pending {
            return Err(already_started(job_id, job.status));
        }
        let adapter = self.registry.get(&job.source_type)?;
        job.options.validate().into_result()?;

        let claimed = db::jobs::claim_for_run(
            &self.db,
            job_id,
            JobStatus::Pending,
            JobStatus::Validating,
            self.max_wait(),
        )
        .await?;
        if !claimed {
            let current = self.require_job(job_id).await?;
            return Err(already_started(job_id, current.status));
        }
        self.emit_status(job_id, JobStatus::Pending, JobStatus::Validating);

        self.spawn_run(job, adapter, RunKind::Direct).await;
        self.require_job(job_id).await
    }

    /// Claim a staged job and launch its analysis
    pub async fn start_staged_job(&self, job_id: Uuid) -> Result<Job> {
        let job = self.require_job(job_id).await?;
        if job.mode != WorkflowMode::Staged {
            return Err(Error::InvalidState(format!(
                "Job {} is a direct job; start it with start_job",
                job_id
            )));
        }
        if job.status != JobStatus::Analyzing || job.started_at.is_some() {
            return Err(already_started(job_id, job.status));
        }
        let adapter = self.registry.get(&job.source_type)?;
        job.options.validate().into_result()?;

        let claimed = db::jobs::claim_for_run(
            &self.db,
            job_id,
            JobStatus::Analyzing,
            JobStatus::Analyzing,
            self.max_wait(),
        )
        .await?;
        if !claimed {
            let current = self.require_job(job_id).await?;
            return Err(already_started(job_id, current.status));
        }

        self.spawn_run(job, adapter, RunKind::Analysis).await;
        self.require_job(job_id).await
    }

    /// Claim the job of a ready staged import and launch the commit
    pub async fn commit_staged_import(&self, staged_id: Uuid) -> Result<Job> {
        let staged = self.require_staged(staged_id).await?;
        if staged.status != StagedImportStatus::Ready {
            return Err(Error::InvalidState(format!(
                "Staged import {} is {}",
                staged_id, staged.status
            )));
        }
        let job = self.require_job(staged.job_id).await?;
        if job.status != JobStatus::Staged {
            return Err(Error::InvalidState(format!(
                "Job {} is not awaiting commit (status: {})",
                job.id, job.status
            )));
        }
        let adapter = self.registry.get(&job.source_type)?;
        if adapter.staged().is_none() {
            return Err(Error::Adapter(format!(
                "Source type '{}' does not support staged imports",
                job.source_type
            )));
        }

        let claimed = db::jobs::transition(
            &self.db,
            job.id,
            &[JobStatus::Staged],
            JobStatus::Running,
            None,
            self.max_wait(),
        )
        .await?;
        if !claimed {
            let current = self.require_job(job.id).await?;
            return Err(already_started(job.id, current.status));
        }
        self.emit_status(job.id, JobStatus::Staged, JobStatus::Running);

        let job_id = job.id;
        self.spawn_run(job, adapter, RunKind::Commit(Box::new(staged))).await;
        self.require_job(job_id).await
    }

    async fn spawn_run(&self, job: Job, adapter: Arc<dyn SourceAdapter>, kind: RunKind) {
        let cancel = CancellationToken::new();
        self.active_runs.write().await.insert(job.id, cancel.clone());

        // A cancel_job between the claim and the insert above found no token to trip
        match db::jobs::load_job(&self.db, job.id).await {
            Ok(Some(current)) if current.status != JobStatus::Cancelled => {}
            Ok(_) => cancel.cancel(),
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "Failed to re-check job before run");
            }
        }

        let service = self.clone();
        let job_id = job.id;
        tokio::spawn(async move {
            tracing::info!(job_id = %job_id, "Migration run started");
            service.run(job, adapter, kind, cancel).await;
            tracing::debug!(job_id = %job_id, "Migration run task exited");
        });
    }

    // ------------------------------------------------------------------
    // Staged review
    // ------------------------------------------------------------------

    /// Apply a selection batch atomically and persist it
    pub async fn update_selections(
        &self,
        staged_id: Uuid,
        selections: &ImportSelections,
    ) -> Result<StagedImport> {
        let mut staged = self.require_staged(staged_id).await?;
        let job = self.require_job(staged.job_id).await?;
        if job.status != JobStatus::Staged {
            return Err(Error::InvalidState(format!(
                "Selections can only change while the job is staged (status: {})",
                job.status
            )));
        }

        apply_selections(&mut staged, selections)?;
        if !db::staged_imports::save_selections(&self.db, &staged).await? {
            return Err(Error::InvalidState(format!(
                "Staged import {} is no longer ready",
                staged_id
            )));
        }

        tracing::debug!(staged_import_id = %staged_id, "Selections updated");
        Ok(staged)
    }

    /// Discard a ready staged import; its job ends `cancelled`
    pub async fn reject_staged_import(&self, staged_id: Uuid) -> Result<StagedImport> {
        let staged = self.require_staged(staged_id).await?;
        if staged.status != StagedImportStatus::Ready {
            return Err(Error::InvalidState(format!(
                "Staged import {} is {}",
                staged_id, staged.status
            )));
        }

        let cancelled = db::jobs::transition(
            &self.db,
            staged.job_id,
            &[JobStatus::Staged],
            JobStatus::Cancelled,
            None,
            self.max_wait(),
        )
        .await?;
        if !cancelled {
            return Err(Error::InvalidState(format!(
                "Job {} is not awaiting review",
                staged.job_id
            )));
        }
        self.emit_status(staged.job_id, JobStatus::Staged, JobStatus::Cancelled);

        db::staged_imports::finalize(&self.db, staged_id, StagedImportStatus::Rejected, Utc::now())
            .await?;
        tracing::info!(
            staged_import_id = %staged_id,
            job_id = %staged.job_id,
            "Staged import rejected"
        );
        self.require_staged(staged_id).await
    }

    // ------------------------------------------------------------------
    // Cancellation, deletion, recovery
    // ------------------------------------------------------------------

    /// Cancel a job that has not finished
    pub async fn cancel_job(&self, job_id: Uuid) -> Result<Job> {
        let job = self.require_job(job_id).await?;
        if !CANCELLABLE.contains(&job.status) {
            return Err(Error::InvalidState(format!(
                "Job {} cannot be cancelled (status: {})",
                job_id, job.status
            )));
        }

        let cancelled = db::jobs::transition(
            &self.db,
            job_id,
            &CANCELLABLE,
            JobStatus::Cancelled,
            None,
            self.max_wait(),
        )
        .await?;
        if !cancelled {
            let current = self.require_job(job_id).await?;
            return Err(Error::InvalidState(format!(
                "Job {} cannot be cancelled (status: {})",
                job_id, current.status
            )));
        }

        if let Some(token) = self.active_runs.read().await.get(&job_id) {
            token.cancel();
        }
        if let Some(staged_id) = job.staged_import_id {
            if job.status == JobStatus::Staged {
                db::staged_imports::finalize(
                    &self.db,
                    staged_id,
                    StagedImportStatus::Rejected,
                    Utc::now(),
                )
                .await?;
            }
        }

        tracing::info!(job_id = %job_id, from = %job.status, "Migration job cancelled");
        self.emit_status(job_id, job.status, JobStatus::Cancelled);
        self.require_job(job_id).await
    }

    /// Delete a job with its staged import and mappings. Refused while running.
    ///
    /// A run still analyzing or validating is cancelled and aborts quietly when it
    /// finds its job gone.
    pub async fn delete_job(&self, job_id: Uuid) -> Result<()> {
        let job = self.require_job(job_id).await?;
        if job.status == JobStatus::Running {
            return Err(Error::InvalidState(format!(
                "Job {} is running; cancel it before deleting",
                job_id
            )));
        }

        if !db::jobs::delete_job(&self.db, job_id).await? {
            return Err(Error::InvalidState(format!(
                "Job {} could not be deleted (running or already gone)",
                job_id
            )));
        }
        if let Some(token) = self.active_runs.read().await.get(&job_id) {
            token.cancel();
        }
        db::staged_imports::delete_for_job(&self.db, job_id).await?;
        db::mappings::delete_for_job(&self.db, job_id).await?;

        tracing::info!(job_id = %job_id, status = %job.status, "Migration job deleted");
        Ok(())
    }

    /// Mark jobs left active by a previous process as failed.
    ///
    /// Call once at startup, before any run is launched.
    pub async fn recover_stale_jobs(&self) -> Result<usize> {
        let stale = db::jobs::list_jobs_by_status(
            &self.db,
            &[JobStatus::Validating, JobStatus::Analyzing, JobStatus::Running],
        )
        .await?;

        let mut recovered = 0;
        for job in stale {
            if self.active_runs.read().await.contains_key(&job.id) {
                continue;
            }
            // Staged jobs are created in `analyzing`; only a started analysis can be stale
            if job.started_at.is_none() {
                continue;
            }
            let finish = JobFinish {
                error: Some(INTERRUPTED_MESSAGE.to_string()),
                ..Default::default()
            };
            if db::jobs::finish_job(
                &self.db,
                job.id,
                job.status,
                JobStatus::Failed,
                &finish,
                self.max_wait(),
            )
            .await?
            {
                tracing::warn!(job_id = %job.id, status = %job.status, "Recovered interrupted job");
                self.emit_status(job.id, job.status, JobStatus::Failed);
                self.event_bus.emit_lossy(MigrationEvent::JobFailed {
                    job_id: job.id,
                    error: INTERRUPTED_MESSAGE.to_string(),
                    timestamp: Utc::now(),
                });
                recovered += 1;
            }
        }

        if recovered > 0 {
            tracing::info!(recovered, "Stale job recovery complete");
        }
        Ok(recovered)
    }

    /// Trip every active run's cancellation token
    pub async fn shutdown(&self) {
        let runs = self.active_runs.read().await;
        for token in runs.values() {
            token.cancel();
        }
        tracing::info!(active = runs.len(), "Migration service shutting down");
    }

    /// Job IDs with a run task still executing
    pub async fn active_job_ids(&self) -> Vec<Uuid> {
        self.active_runs.read().await.keys().copied().collect()
    }

    // ------------------------------------------------------------------
    // Rollback
    // ------------------------------------------------------------------

    /// Delete everything a finished job created, newest dependency first
    pub async fn rollback_job(&self, job_id: Uuid) -> Result<Job> {
        let job = self.require_job(job_id).await?;
        if !ROLLBACK_FROM.contains(&job.status) {
            return Err(Error::InvalidState(format!(
                "Job {} cannot be rolled back (status: {})",
                job_id, job.status
            )));
        }
        if self.active_runs.read().await.contains_key(&job_id) {
            return Err(Error::InvalidState(format!(
                "Job {} is still winding down; retry the rollback shortly",
                job_id
            )));
        }

        let items = job.imported_items.clone().unwrap_or_default();
        let domain = &self.services.domain;
        let mut removed = 0u64;

        for (kind, ids) in [
            (EntityKind::User, &items.user_ids),
            (EntityKind::Webstream, &items.webstream_ids),
            (EntityKind::Clock, &items.clock_ids),
            (EntityKind::Show, &items.show_ids),
            (EntityKind::SmartBlock, &items.smart_block_ids),
            (EntityKind::Playlist, &items.playlist_ids),
        ] {
            removed += domain.delete_entities(kind, ids).await?;
        }

        // Media rows first, then the blobs nothing references any more
        let blob_keys = domain.media_blob_keys(&items.media_ids).await?;
        removed += domain.delete_entities(EntityKind::Media, &items.media_ids).await?;
        let mut blobs_deleted = 0usize;
        for key in blob_keys {
            if domain.blob_key_in_use(&key).await? {
                continue;
            }
            match self.services.blobs.delete(&key).await {
                Ok(()) => blobs_deleted += 1,
                Err(e) => tracing::warn!(
                    job_id = %job_id,
                    key = %key,
                    error = %e,
                    "Failed to delete blob"
                ),
            }
        }

        removed += domain.delete_entities(EntityKind::Station, &items.station_ids).await?;

        let rolled_back = db::jobs::transition(
            &self.db,
            job_id,
            &ROLLBACK_FROM,
            JobStatus::RolledBack,
            None,
            self.max_wait(),
        )
        .await?;
        if !rolled_back {
            return Err(Error::InvalidState(format!(
                "Job {} changed state during rollback",
                job_id
            )));
        }

        tracing::info!(
            job_id = %job_id,
            entities = removed,
            blobs = blobs_deleted,
            "Migration job rolled back"
        );
        self.emit_status(job_id, job.status, JobStatus::RolledBack);
        self.require_job(job_id).await
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub async fn get_job(&self, job_id: Uuid) -> Result<Job> {
        self.require_job(job_id).await
    }

    /// All jobs, newest first
    pub async fn list_jobs(&self) -> Result<Vec<Job>> {
        db::jobs::list_jobs(&self.db).await
    }

    pub async fn get_staged_import(&self, staged_id: Uuid) -> Result<StagedImport> {
        self.require_staged(staged_id).await
    }

    pub async fn get_staged_import_for_job(&self, job_id: Uuid) -> Result<StagedImport> {
        db::staged_imports::load_for_job(&self.db, job_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("No staged import for job {}", job_id)))
    }

    /// Manifest of entities the job created; empty before the job finished
    pub async fn get_imported_items(&self, job_id: Uuid) -> Result<ImportedItems> {
        let job = self.require_job(job_id).await?;
        Ok(job.imported_items.unwrap_or_default())
    }

    pub async fn get_mappings(&self, job_id: Uuid) -> Result<Vec<Mapping>> {
        db::mappings::mappings_for_job(&self.db, job_id).await
    }

    /// Mappings whose source or destination ID is `id`, across all jobs
    pub async fn find_mappings(&self, id: &str) -> Result<Vec<Mapping>> {
        db::mappings::find_by_either_id(&self.db, id).await
    }

    // ------------------------------------------------------------------
    // Run execution
    // ------------------------------------------------------------------

    async fn run(
        &self,
        job: Job,
        adapter: Arc<dyn SourceAdapter>,
        kind: RunKind,
        cancel: CancellationToken,
    ) {
        let job_id = job.id;
        let started = Instant::now();
        let (sink, rx) = ProgressSink::channel(self.services.config.progress_queue_capacity);
        let persister = persister::spawn_progress_persister(
            self.db.clone(),
            self.event_bus.clone(),
            job_id,
            rx,
        );

        let ctx = ImportContext {
            job_id,
            source_type: job.source_type.clone(),
            options: job.options.clone(),
            cancel,
            progress: sink,
            services: self.services.clone(),
        };

        match kind {
            RunKind::Direct => self.run_direct(&ctx, adapter.as_ref(), started).await,
            RunKind::Analysis => self.run_analysis(&ctx, adapter.as_ref()).await,
            RunKind::Commit(staged) => {
                self.run_commit(&ctx, adapter.as_ref(), &staged, started).await
            }
        }

        // Closing the last sender lets the persister drain and exit
        drop(ctx);
        if let Err(e) = persister.await {
            tracing::warn!(job_id = %job_id, error = %e, "Progress persister task failed");
        }
        self.active_runs.write().await.remove(&job_id);
    }

    async fn run_direct(&self, ctx: &ImportContext, adapter: &dyn SourceAdapter, started: Instant) {
        let job_id = ctx.job_id;

        let mut reporter = ctx.reporter();
        reporter.begin_phase(Phase::Validating, 1, "Validating source");
        if let Err(errors) = adapter.validate(&ctx.options).await {
            let message = Error::Validation(errors).to_string();
            self.fail(job_id, JobStatus::Validating, message, Some(reporter.into_progress()))
                .await;
            return;
        }
        reporter.advance(1, "Source validated");

        if ctx.cancel.is_cancelled() {
            tracing::info!(job_id = %job_id, "Run cancelled during validation");
            return;
        }
        match db::jobs::transition(
            &self.db,
            job_id,
            &[JobStatus::Validating],
            JobStatus::Running,
            None,
            self.max_wait(),
        )
        .await
        {
            Ok(true) => self.emit_status(job_id, JobStatus::Validating, JobStatus::Running),
            Ok(false) => {
                tracing::info!(job_id = %job_id, "Job left validating before import; aborting run");
                return;
            }
            Err(e) => {
                self.fail(job_id, JobStatus::Validating, e.to_string(), None).await;
                return;
            }
        }

        let outcome = adapter.import(ctx).await;
        self.finish_run(job_id, JobStatus::Running, outcome, started).await;
    }

    async fn run_analysis(&self, ctx: &ImportContext, adapter: &dyn SourceAdapter) {
        let job_id = ctx.job_id;
        let Some(staged_adapter) = adapter.staged() else {
            let message = format!(
                "Source type '{}' does not support staged imports",
                ctx.source_type
            );
            self.fail(job_id, JobStatus::Analyzing, message, None).await;
            return;
        };

        let mut reporter = ctx.reporter();
        reporter.begin_phase(Phase::Validating, 1, "Validating source");
        if let Err(errors) = adapter.validate(&ctx.options).await {
            let message = Error::Validation(errors).to_string();
            self.fail(job_id, JobStatus::Analyzing, message, Some(reporter.into_progress()))
                .await;
            return;
        }

        let staged = match staged_adapter.analyze_for_staging(ctx).await {
            Ok(staged) => staged,
            Err(Error::Cancelled) => {
                tracing::info!(job_id = %job_id, "Staged analysis cancelled");
                return;
            }
            Err(e) => {
                self.fail(job_id, JobStatus::Analyzing, e.to_string(), None).await;
                return;
            }
        };

        if let Err(e) = db::staged_imports::insert_staged_import(&self.db, &staged).await {
            self.fail(job_id, JobStatus::Analyzing, e.to_string(), None).await;
            return;
        }

        reporter.finish("Analysis complete; awaiting review");
        let progress = reporter.into_progress();
        match db::jobs::mark_staged(&self.db, job_id, staged.id, &progress).await {
            Ok(true) => {
                let item_count = staged.total_items();
                tracing::info!(
                    job_id = %job_id,
                    staged_import_id = %staged.id,
                    items = item_count,
                    warnings = staged.warnings.len(),
                    "Staged import ready for review"
                );
                self.emit_status(job_id, JobStatus::Analyzing, JobStatus::Staged);
                self.event_bus.emit_lossy(MigrationEvent::StagedImportReady {
                    job_id,
                    staged_import_id: staged.id,
                    item_count,
                    timestamp: Utc::now(),
                });
            }
            Ok(false) => {
                // Cancelled or deleted while analyzing; nobody can review this snapshot
                tracing::info!(job_id = %job_id, "Job left analyzing; discarding staged import");
                if let Err(e) = db::staged_imports::delete_for_job(&self.db, job_id).await {
                    tracing::warn!(job_id = %job_id, error = %e, "Failed to discard staged import");
                }
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to mark job staged");
                self.fail(job_id, JobStatus::Analyzing, e.to_string(), None).await;
            }
        }
    }

    async fn run_commit(
        &self,
        ctx: &ImportContext,
        adapter: &dyn SourceAdapter,
        staged: &StagedImport,
        started: Instant,
    ) {
        let job_id = ctx.job_id;
        let Some(staged_adapter) = adapter.staged() else {
            let message = format!(
                "Source type '{}' does not support staged imports",
                ctx.source_type
            );
            self.fail(job_id, JobStatus::Running, message, None).await;
            return;
        };

        let outcome = staged_adapter.commit_staged_import(staged, ctx).await;
        let produced = outcome.is_ok();
        self.finish_run(job_id, JobStatus::Running, outcome, started).await;

        if produced {
            if let Err(e) = db::staged_imports::finalize(
                &self.db,
                staged.id,
                StagedImportStatus::Committed,
                Utc::now(),
            )
            .await
            {
                tracing::warn!(
                    staged_import_id = %staged.id,
                    error = %e,
                    "Failed to mark staged import committed"
                );
            }
        }
    }

    /// Persist the end state of a run that got as far as the adapter
    async fn finish_run(
        &self,
        job_id: Uuid,
        from: JobStatus,
        outcome: Result<ImportOutcome>,
        started: Instant,
    ) {
        let elapsed = started.elapsed();
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(Error::Cancelled) => {
                tracing::info!(job_id = %job_id, "Migration run cancelled");
                return;
            }
            Err(e) => {
                self.fail(job_id, from, e.to_string(), None).await;
                return;
            }
        };

        let ImportOutcome {
            mut result,
            imported,
            progress,
            error,
            cancelled,
        } = outcome;
        result.duration_seconds = elapsed.as_secs_f64();
        let anomaly_report = anomaly_classifier::classify(&result);
        let mappings = std::mem::take(&mut result.mappings);

        let to = if cancelled {
            JobStatus::Cancelled
        } else if error.is_some() {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        };
        let finish = JobFinish {
            progress,
            result: Some(result.clone()),
            anomaly_report,
            imported_items: Some(imported),
            error: error.clone(),
        };

        let to = match self.write_finish(job_id, from, to, &finish).await {
            Ok(Some(written)) => written,
            Ok(None) => {
                tracing::info!(
                    job_id = %job_id,
                    "Job deleted before finishing; discarding run result"
                );
                return;
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to persist run result");
                return;
            }
        };

        if let Err(e) = db::mappings::record_mappings(&self.db, job_id, &mappings).await {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to record migration mappings");
        }

        match to {
            JobStatus::Completed => {
                tracing::info!(
                    job_id = %job_id,
                    duration = %radmig_common::human_time::format_elapsed(elapsed),
                    created = result.total_created(),
                    skipped = result.total_skipped(),
                    warnings = result.warnings.len(),
                    "Migration job completed"
                );
                self.emit_status(job_id, from, to);
                self.event_bus.emit_lossy(MigrationEvent::JobCompleted {
                    job_id,
                    created_total: result.total_created(),
                    skipped_total: result.total_skipped(),
                    duration_seconds: elapsed.as_secs(),
                    timestamp: Utc::now(),
                });
            }
            JobStatus::Failed => {
                let error = error.unwrap_or_default();
                tracing::error!(
                    job_id = %job_id,
                    error = %error,
                    "Migration job failed after import"
                );
                self.emit_status(job_id, from, to);
                self.event_bus.emit_lossy(MigrationEvent::JobFailed {
                    job_id,
                    error,
                    timestamp: Utc::now(),
                });
            }
            _ => {
                tracing::info!(
                    job_id = %job_id,
                    created = result.total_created(),
                    "Cancelled run kept its partial manifest"
                );
            }
        }
    }

    /// Write a run's end state, returning the status the row ended in.
    ///
    /// A job cancelled while the run was finishing stays `cancelled` but still
    /// records what the run created. `None` means the job is gone.
    async fn write_finish(
        &self,
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
        finish: &JobFinish,
    ) -> Result<Option<JobStatus>> {
        let max_wait = self.max_wait();
        // cancel_job normally got there first; otherwise the token was tripped by shutdown
        let (first, second) = if to == JobStatus::Cancelled {
            (JobStatus::Cancelled, from)
        } else {
            (from, JobStatus::Cancelled)
        };
        if db::jobs::finish_job(&self.db, job_id, first, to, finish, max_wait).await? {
            return Ok(Some(to));
        }
        if db::jobs::finish_job(&self.db, job_id, second, JobStatus::Cancelled, finish, max_wait)
            .await?
        {
            if to != JobStatus::Cancelled {
                tracing::info!(job_id = %job_id, "Job cancelled while the run was finishing");
            }
            return Ok(Some(JobStatus::Cancelled));
        }
        Ok(None)
    }

    /// Conditional `from → failed` with `message`
    async fn fail(
        &self,
        job_id: Uuid,
        from: JobStatus,
        message: String,
        progress: Option<Progress>,
    ) {
        let finish = JobFinish {
            progress,
            error: Some(message.clone()),
            ..Default::default()
        };
        let written = db::jobs::finish_job(
            &self.db,
            job_id,
            from,
            JobStatus::Failed,
            &finish,
            self.max_wait(),
        )
        .await;
        match written {
            Ok(true) => {
                tracing::error!(job_id = %job_id, error = %message, "Migration job failed");
                self.emit_status(job_id, from, JobStatus::Failed);
                self.event_bus.emit_lossy(MigrationEvent::JobFailed {
                    job_id,
                    error: message,
                    timestamp: Utc::now(),
                });
            }
            Ok(false) => {
                tracing::info!(
                    job_id = %job_id,
                    error = %message,
                    "Job left {} before failure was recorded",
                    from
                );
            }
            Err(e) => {
                tracing::error!(
                    job_id = %job_id,
                    error = %e,
                    "Failed to record job failure: {}",
                    message
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn max_wait(&self) -> u64 {
        self.services.config.max_lock_wait_ms
    }

    fn emit_status(&self, job_id: Uuid, old: JobStatus, new: JobStatus) {
        self.event_bus.emit_lossy(MigrationEvent::JobStatusChanged {
            job_id,
            old_status: old.to_string(),
            new_status: new.to_string(),
            timestamp: Utc::now(),
        });
    }

    async fn require_job(&self, job_id: Uuid) -> Result<Job> {
        db::jobs::load_job(&self.db, job_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Job not found: {}", job_id)))
    }

    async fn require_staged(&self, staged_id: Uuid) -> Result<StagedImport> {
        db::staged_imports::load_staged_import(&self.db, staged_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Staged import not found: {}", staged_id)))
    }
}

fn already_started(job_id: Uuid, status: JobStatus) -> Error {
    Error::InvalidState(format!("Job {} already started (status: {})", job_id, status))
}
