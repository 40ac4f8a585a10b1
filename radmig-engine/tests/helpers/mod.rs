//! Test helper utilities
//!
//! Shared setup for radmig-engine integration tests: a file-backed database in a
//! temp directory, a blob store that counts uploads, backup archive builders and
//! adapters whose runs can be held open.
#![allow(dead_code)]

pub mod archive_builder;
pub mod fake_adapters;

pub use archive_builder::{sample_manifest, ArchiveBuilder, SONG_A, SONG_B};
pub use fake_adapters::{CountingBlobStore, FailingDomainStore, GatedAdapter, GATED_SOURCE};

use radmig_common::events::EventBus;
use radmig_engine::adapters::archive::SOURCE_TYPE;
use radmig_engine::adapters::{
    AdapterRegistry, ArchiveManifestAdapter, EngineServices, SourceAdapter,
};
use radmig_engine::config::EngineConfig;
use radmig_engine::db::domain::SqliteDomainStore;
use radmig_engine::models::{Job, JobOptions, JobStatus, SourceConnection, SourceType};
use radmig_engine::storage::{DomainStore, EntityKind};
use radmig_engine::MigrationService;
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

/// Everything one test needs; keep it alive for the duration of the test
pub struct TestEnv {
    pub dir: TempDir,
    pub pool: SqlitePool,
    pub domain: Arc<SqliteDomainStore>,
    pub blobs: Arc<CountingBlobStore>,
    pub services: EngineServices,
    pub service: MigrationService,
}

impl TestEnv {
    /// Archive adapter only
    pub async fn new() -> Self {
        Self::with_adapters(Vec::new()).await
    }

    /// Archive adapter plus `extra`
    pub async fn with_adapters(extra: Vec<Arc<dyn SourceAdapter>>) -> Self {
        Self::build(extra, None).await
    }

    /// Archive adapter over a domain store that refuses to create `kind`
    pub async fn with_failing_kind(kind: EntityKind) -> Self {
        Self::build(Vec::new(), Some(kind)).await
    }

    async fn build(extra: Vec<Arc<dyn SourceAdapter>>, failing: Option<EntityKind>) -> Self {
        let dir = TempDir::new().unwrap();
        let pool = radmig_engine::db::init_database_pool(&dir.path().join("radmig.db"), 5000)
            .await
            .unwrap();

        let domain = Arc::new(SqliteDomainStore::new(pool.clone()));
        let blobs = Arc::new(CountingBlobStore::new(dir.path().join("media")));
        let engine_domain: Arc<dyn DomainStore> = match failing {
            Some(kind) => Arc::new(FailingDomainStore::new(domain.clone(), kind)),
            None => domain.clone(),
        };
        let services = EngineServices {
            domain: engine_domain,
            blobs: blobs.clone(),
            config: EngineConfig {
                concurrency: 4,
                ..EngineConfig::default()
            },
            scratch_dir: dir.path().join("scratch"),
        };

        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(ArchiveManifestAdapter::new()));
        for adapter in extra {
            registry.register(adapter);
        }

        let service = MigrationService::new(
            pool.clone(),
            EventBus::new(1024),
            Arc::new(registry),
            services.clone(),
        );

        Self {
            dir,
            pool,
            domain,
            blobs,
            services,
            service,
        }
    }

    /// Write the sample backup archive into the temp directory
    pub fn sample_archive(&self) -> std::path::PathBuf {
        ArchiveBuilder::sample().write(self.dir.path(), "backup.tar.gz")
    }

    pub async fn count(&self, table: &str) -> i64 {
        sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }

    pub async fn count_kind(&self, kind: &str) -> i64 {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM library_entities WHERE kind = ?")
            .bind(kind)
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }

    /// Create and start a direct archive job, returning it once the run has exited
    pub async fn run_direct_import(&self, options: JobOptions) -> Job {
        let job = self
            .service
            .create_job(SourceType::new(SOURCE_TYPE), options)
            .await
            .unwrap();
        self.service.start_job(job.id).await.unwrap();
        wait_for_run(&self.service, job.id).await
    }
}

/// Job options pointing at an archive on disk
pub fn archive_options(path: &Path) -> JobOptions {
    JobOptions {
        source: SourceConnection {
            archive_path: Some(path.to_string_lossy().to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Wait until no run task is executing for `job_id`, then return the job
pub async fn wait_for_run(service: &MigrationService, job_id: Uuid) -> Job {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    loop {
        if !service.active_job_ids().await.contains(&job_id) {
            return service.get_job(job_id).await.unwrap();
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "run for job {} did not finish in time",
            job_id
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Wait until the job reaches `status`
pub async fn wait_for_status(service: &MigrationService, job_id: Uuid, status: JobStatus) -> Job {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    loop {
        let job = service.get_job(job_id).await.unwrap();
        if job.status == status {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {} stuck in {} waiting for {}",
            job_id,
            job.status,
            status
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
