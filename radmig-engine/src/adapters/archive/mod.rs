//! Backup archive source adapter
//!
//! A backup is a gzip tar holding `manifest.json` (stations, media, playlists,
//! smart blocks, shows with their past airings, webstreams, users) next to the
//! media payloads it references. Each phase unpacks the archive into its own
//! scratch directory, which is removed when the phase ends.

pub mod fetcher;
pub mod manifest;

use async_trait::async_trait;
use radmig_common::{Error, Result, ValidationErrors};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::info;

use super::{ImportContext, SourceAdapter, StagedSourceAdapter};
use crate::models::{ImportOutcome, ImportResult, JobOptions, Phase, SourceType, StagedImport};
use crate::services::archive_extractor::extract_archive;
use crate::services::deduplicator::Deduplicator;
use crate::services::staged_analyzer::{apply_default_selections, finish_analysis};
use crate::services::staged_commit::StagedCommitter;
pub use fetcher::DirectoryFetcher;
pub use manifest::Manifest;

pub const SOURCE_TYPE: &str = "archive";
pub const MANIFEST_FILE: &str = "manifest.json";

/// Unpacked backup; the directory lives as long as this value
pub struct UnpackedArchive {
    dir: TempDir,
    pub manifest: Manifest,
}

impl UnpackedArchive {
    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ArchiveManifestAdapter;

impl ArchiveManifestAdapter {
    pub fn new() -> Self {
        Self
    }

    fn archive_path(options: &JobOptions) -> Result<PathBuf> {
        options
            .source
            .archive_path
            .as_ref()
            .map(PathBuf::from)
            .ok_or_else(|| Error::InvalidInput("source.archive_path is required".to_string()))
    }

    /// Extract the backup under `scratch` (system temp when `None`) and parse its manifest
    pub async fn unpack(options: &JobOptions, scratch: Option<&Path>) -> Result<UnpackedArchive> {
        let archive = Self::archive_path(options)?;
        let dir = match scratch {
            Some(scratch) => {
                tokio::fs::create_dir_all(scratch).await?;
                tempfile::Builder::new().prefix("radmig-").tempdir_in(scratch)?
            }
            None => tempfile::Builder::new().prefix("radmig-").tempdir()?,
        };

        extract_archive(archive, dir.path().to_path_buf()).await?;

        let raw = tokio::fs::read(dir.path().join(MANIFEST_FILE))
            .await
            .map_err(|e| Error::Archive(format!("{} not readable: {}", MANIFEST_FILE, e)))?;
        let manifest: Manifest = serde_json::from_slice(&raw)
            .map_err(|e| Error::Archive(format!("Invalid {}: {}", MANIFEST_FILE, e)))?;

        Ok(UnpackedArchive { dir, manifest })
    }

    async fn snapshot(
        &self,
        ctx: &ImportContext,
        unpacked: &UnpackedArchive,
    ) -> Result<StagedImport> {
        unpacked
            .manifest
            .to_staged(ctx.job_id, self.source_type(), unpacked.root())
            .await
    }
}

#[async_trait]
impl SourceAdapter for ArchiveManifestAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::new(SOURCE_TYPE)
    }

    async fn validate(&self, options: &JobOptions) -> std::result::Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        match &options.source.archive_path {
            None => errors.add("source.archive_path", "is required for archive imports"),
            Some(path) => {
                let lower = path.to_lowercase();
                if !(lower.ends_with(".tar.gz") || lower.ends_with(".tgz")) {
                    errors.add("source.archive_path", "must be a .tar.gz or .tgz file");
                }
                match tokio::fs::metadata(path).await {
                    Ok(meta) if meta.is_file() => {}
                    Ok(_) => errors.add("source.archive_path", "is not a regular file"),
                    Err(e) => errors.add("source.archive_path", format!("cannot be read: {}", e)),
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    async fn analyze(&self, options: &JobOptions) -> Result<ImportResult> {
        let unpacked = Self::unpack(options, None).await?;
        let m = &unpacked.manifest;

        let mut result = ImportResult::new();
        result.stations_created = if options.target_station_id.is_some() {
            0
        } else {
            m.stations.len()
        };
        if !options.skip_media {
            result.media_items_imported = m.media.len();
        }
        if !options.skip_playlists {
            result.playlists_created = m.playlists.len();
            result.smart_blocks_created = m.smart_blocks.len();
        }
        if !options.skip_schedules {
            result.shows_created = m.shows.len();
        }
        if !options.skip_webstreams {
            result.webstreams_created = m.webstreams.len();
        }
        if !options.skip_users {
            result.users_created = m.users.len();
        }
        Ok(result)
    }

    async fn import(&self, ctx: &ImportContext) -> Result<ImportOutcome> {
        let unpacked = Self::unpack(&ctx.options, Some(&ctx.services.scratch_dir)).await?;
        ctx.check_cancelled()?;

        // Nothing is marked duplicate here; the pipeline still shares payloads by digest
        let mut staged = self.snapshot(ctx, &unpacked).await?;
        apply_default_selections(&mut staged);
        info!(
            job_id = %ctx.job_id,
            items = staged.total_items(),
            "Direct archive import"
        );

        let fetcher = Arc::new(DirectoryFetcher::new(unpacked.root()));
        StagedCommitter::new(ctx, fetcher).commit(&staged).await
    }

    fn staged(&self) -> Option<&dyn StagedSourceAdapter> {
        Some(self)
    }
}

#[async_trait]
impl StagedSourceAdapter for ArchiveManifestAdapter {
    async fn analyze_for_staging(&self, ctx: &ImportContext) -> Result<StagedImport> {
        let mut reporter = ctx.reporter();
        reporter.begin_phase(Phase::Analyzing, 3, "Extracting backup archive");

        let unpacked = Self::unpack(&ctx.options, Some(&ctx.services.scratch_dir)).await?;
        ctx.check_cancelled()?;
        reporter.advance(1, "Reading manifest");

        let mut staged = self.snapshot(ctx, &unpacked).await?;
        ctx.check_cancelled()?;
        reporter.advance(2, "Checking for duplicates");

        let dedup = Deduplicator::new(ctx.services.domain.clone());
        finish_analysis(
            &mut staged,
            &dedup,
            ctx.options.target_station_id.as_deref(),
        )
        .await;
        reporter.advance(3, "Analysis complete");

        Ok(staged)
    }

    async fn commit_staged_import(
        &self,
        staged: &StagedImport,
        ctx: &ImportContext,
    ) -> Result<ImportOutcome> {
        let unpacked = Self::unpack(&ctx.options, Some(&ctx.services.scratch_dir)).await?;
        ctx.check_cancelled()?;

        let fetcher = Arc::new(DirectoryFetcher::new(unpacked.root()));
        StagedCommitter::new(ctx, fetcher).commit(staged).await
    }
}
