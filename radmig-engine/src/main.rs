//! radmig - radio station migration tool
//!
//! Imports a legacy station backup archive into the destination store, directly or
//! through a staged review, and lists, rolls back or redoes past jobs.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use radmig_common::config::{load_config, resolve_root_folder, under_root, ROOT_ENV_VAR};
use radmig_common::events::{EventBus, MigrationEvent};
use radmig_engine::adapters::archive::SOURCE_TYPE;
use radmig_engine::adapters::ArchiveManifestAdapter;
use radmig_engine::db::domain::SqliteDomainStore;
use radmig_engine::models::{Job, JobOptions, JobStatus, SourceConnection, SourceType};
use radmig_engine::storage::FsBlobStore;
use radmig_engine::{AdapterRegistry, EngineConfig, EngineServices, MigrationService};

/// Command-line arguments for radmig
#[derive(Parser, Debug)]
#[command(name = "radmig")]
#[command(about = "Migrate radio station data from a legacy backup archive")]
#[command(version)]
struct Cli {
    /// Data root (database, media blobs, scratch space)
    #[arg(long, global = true)]
    root: Option<String>,

    /// Config file (defaults to the platform config location)
    #[arg(long, global = true, env = "RADMIG_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import everything in an archive
    Import {
        archive: PathBuf,
        #[command(flatten)]
        options: ImportArgs,
    },
    /// Analyze an archive into a reviewable staged import
    Stage {
        archive: PathBuf,
        #[command(flatten)]
        options: ImportArgs,
    },
    /// Commit a staged import
    Commit { staged_id: Uuid },
    /// Reject a staged import
    Reject { staged_id: Uuid },
    /// List jobs, newest first
    Jobs,
    /// Delete everything a finished job created
    Rollback { job_id: Uuid },
    /// Re-run a finished job with the same source and options
    Redo { job_id: Uuid },
}

#[derive(Args, Debug)]
struct ImportArgs {
    /// Import everything into this existing station
    #[arg(long)]
    target_station: Option<String>,

    /// Recorded as owner of created entities
    #[arg(long)]
    importing_user: Option<String>,

    #[arg(long)]
    skip_media: bool,

    #[arg(long)]
    skip_playlists: bool,

    #[arg(long)]
    skip_schedules: bool,

    #[arg(long)]
    skip_users: bool,

    #[arg(long)]
    skip_webstreams: bool,

    /// Fail the job when imported media has no duration
    #[arg(long)]
    strict_duration: bool,
}

impl ImportArgs {
    fn into_options(self, archive: PathBuf) -> JobOptions {
        JobOptions {
            source: SourceConnection {
                archive_path: Some(archive.to_string_lossy().to_string()),
                ..Default::default()
            },
            target_station_id: self.target_station,
            importing_user_id: self.importing_user,
            skip_media: self.skip_media,
            skip_playlists: self.skip_playlists,
            skip_schedules: self.skip_schedules,
            skip_users: self.skip_users,
            skip_webstreams: self.skip_webstreams,
            strict_duration_verification: self.strict_duration,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let toml_config = load_config(cli.config.as_deref()).context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| toml_config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("radmig {}", env!("CARGO_PKG_VERSION"));

    // Root folder, database, blob store
    let root = resolve_root_folder(cli.root.as_deref(), ROOT_ENV_VAR, &toml_config);
    std::fs::create_dir_all(&root)
        .with_context(|| format!("Failed to create root folder {}", root.display()))?;
    info!("Root folder: {}", root.display());

    let db_path = root.join(&toml_config.database.file_name);
    let max_lock_wait_ms = toml_config.database.max_lock_wait_ms;
    let pool = radmig_engine::db::init_database_pool(&db_path, max_lock_wait_ms)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    info!("Database: {}", db_path.display());

    let media_dir = under_root(&root, &toml_config.storage.media_dir);
    let scratch_dir = under_root(&root, &toml_config.storage.scratch_dir);
    std::fs::create_dir_all(&media_dir)?;
    std::fs::create_dir_all(&scratch_dir)?;

    let services = EngineServices {
        domain: Arc::new(SqliteDomainStore::new(pool.clone())),
        blobs: Arc::new(FsBlobStore::new(media_dir)),
        config: EngineConfig::from_toml(&toml_config),
        scratch_dir,
    };

    let mut registry = AdapterRegistry::new();
    registry.register(Arc::new(ArchiveManifestAdapter::new()));

    let service = MigrationService::new(pool, EventBus::new(256), Arc::new(registry), services);

    let recovered = service.recover_stale_jobs().await?;
    if recovered > 0 {
        warn!("Marked {} interrupted job(s) as failed", recovered);
    }

    match cli.command {
        Command::Import { archive, options } => {
            let job = service
                .create_job(SourceType::new(SOURCE_TYPE), options.into_options(archive))
                .await?;
            service.start_job(job.id).await?;
            let job = wait_for_job(&service, job.id).await?;
            print_job(&job);
        }
        Command::Stage { archive, options } => {
            let job = service
                .create_staged_job(SourceType::new(SOURCE_TYPE), options.into_options(archive))
                .await?;
            service.start_staged_job(job.id).await?;
            let job = wait_for_job(&service, job.id).await?;
            print_job(&job);
            if job.status == JobStatus::Staged {
                let staged = service.get_staged_import_for_job(job.id).await?;
                println!("staged import {}", staged.id);
                println!(
                    "  stations={} media={} playlists={} smart_blocks={} \
                     shows={} webstreams={} users={}",
                    staged.stations.len(),
                    staged.media.len(),
                    staged.playlists.len(),
                    staged.smart_blocks.len(),
                    staged.shows.len(),
                    staged.webstreams.len(),
                    staged.users.len()
                );
                for warning in &staged.warnings {
                    println!("  warning [{}] {}", warning.severity, warning.message);
                }
                for suggestion in &staged.suggestions {
                    println!("  suggestion: {}", suggestion.message);
                }
            }
        }
        Command::Commit { staged_id } => {
            let job = service.commit_staged_import(staged_id).await?;
            let job = wait_for_job(&service, job.id).await?;
            print_job(&job);
        }
        Command::Reject { staged_id } => {
            let staged = service.reject_staged_import(staged_id).await?;
            println!("staged import {} {}", staged.id, staged.status);
        }
        Command::Jobs => {
            for job in service.list_jobs().await? {
                println!(
                    "{}  {:<11} {:<7} {:<8} {}",
                    job.id,
                    job.status,
                    job.mode.as_str(),
                    job.source_type,
                    job.created_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        Command::Rollback { job_id } => {
            let job = service.rollback_job(job_id).await?;
            print_job(&job);
        }
        Command::Redo { job_id } => {
            let job = service.clone_job_for_redo(job_id).await?;
            match job.status {
                JobStatus::Pending => service.start_job(job.id).await?,
                _ => service.start_staged_job(job.id).await?,
            };
            let job = wait_for_job(&service, job.id).await?;
            print_job(&job);
        }
    }

    Ok(())
}

/// Log progress until the run task for `job_id` has exited; Ctrl+C cancels the job
async fn wait_for_job(service: &MigrationService, job_id: Uuid) -> Result<Job> {
    let mut events = service.event_bus().subscribe();
    let mut poll = tokio::time::interval(Duration::from_millis(250));
    let mut cancel_requested = false;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(MigrationEvent::JobProgress {
                    job_id: id,
                    phase,
                    percentage,
                    current_step,
                    estimated_remaining,
                    ..
                }) if id == job_id => {
                    info!(
                        "[{:>5.1}%] {}: {} ({})",
                        percentage, phase, current_step, estimated_remaining
                    );
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => debug!("Skipped {} progress events", skipped),
                Err(RecvError::Closed) => {}
            },
            _ = poll.tick() => {
                if service.active_job_ids().await.contains(&job_id) {
                    continue;
                }
                return Ok(service.get_job(job_id).await?);
            }
            _ = tokio::signal::ctrl_c(), if !cancel_requested => {
                warn!("Interrupted; cancelling job {}", job_id);
                cancel_requested = true;
                service.cancel_job(job_id).await?;
            }
        }
    }
}

fn print_job(job: &Job) {
    println!("job {} {}", job.id, job.status);
    if let Some(error) = &job.error {
        println!("  error: {}", error);
    }
    if let Some(result) = &job.result {
        println!(
            "  created: stations={} media={} playlists={} smart_blocks={} \
             shows={} clocks={} webstreams={} users={}",
            result.stations_created,
            result.media_items_imported,
            result.playlists_created,
            result.smart_blocks_created,
            result.shows_created,
            result.clocks_created,
            result.webstreams_created,
            result.users_created
        );
        for (reason, count) in &result.skipped {
            println!("  skipped {}: {}", reason, count);
        }
        for warning in &result.warnings {
            println!("  warning: {}", warning);
        }
    }
    if let Some(report) = &job.anomaly_report {
        println!("  anomalies: {} (warnings inspected: {})", report.total, report.warning_count);
        for (class, bucket) in &report.classes {
            println!("    {}: {}", class.label(), bucket.count);
        }
    }
}
