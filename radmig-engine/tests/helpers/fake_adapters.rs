//! Test doubles for adapters, blob storage and the domain store

use async_trait::async_trait;
use radmig_common::{Error, Result, ValidationErrors};
use radmig_engine::adapters::{ImportContext, SourceAdapter, StagedSourceAdapter};
use radmig_engine::db::domain::SqliteDomainStore;
use radmig_engine::models::{
    ImportOutcome, ImportResult, JobOptions, Mapping, SourceType, StagedImport,
};
use radmig_engine::storage::{
    BlobStore, DomainStore, EntityKind, FsBlobStore, ImportProvenance, NewEntity, NewMediaItem,
    NewStation, StoredMedia,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const GATED_SOURCE: &str = "gated";

/// Adapter whose runs block until released or cancelled
pub struct GatedAdapter {
    /// Signalled each time a run reaches the adapter
    pub entered: Notify,
    /// Releases one blocked run
    pub release: Notify,
    /// Keep waiting for `release` even after cancellation
    pub ignore_cancel: bool,
    pub imports: AtomicUsize,
    pub analyses: AtomicUsize,
}

impl GatedAdapter {
    pub fn new() -> Self {
        Self {
            entered: Notify::new(),
            release: Notify::new(),
            ignore_cancel: false,
            imports: AtomicUsize::new(0),
            analyses: AtomicUsize::new(0),
        }
    }

    pub fn stubborn() -> Self {
        Self {
            ignore_cancel: true,
            ..Self::new()
        }
    }

    /// Wait until a run is inside the adapter
    pub async fn wait_entered(&self) {
        tokio::time::timeout(Duration::from_secs(10), self.entered.notified())
            .await
            .expect("run never reached the adapter");
    }

    /// `true` when released, `false` when cancelled first
    async fn hold(&self, ctx: &ImportContext) -> bool {
        self.entered.notify_one();
        if self.ignore_cancel {
            self.release.notified().await;
            return true;
        }
        tokio::select! {
            _ = self.release.notified() => true,
            _ = ctx.cancel.cancelled() => false,
        }
    }
}

#[async_trait]
impl SourceAdapter for GatedAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::new(GATED_SOURCE)
    }

    async fn validate(&self, _options: &JobOptions) -> std::result::Result<(), ValidationErrors> {
        Ok(())
    }

    async fn analyze(&self, _options: &JobOptions) -> Result<ImportResult> {
        Ok(ImportResult::new())
    }

    async fn import(&self, ctx: &ImportContext) -> Result<ImportOutcome> {
        self.imports.fetch_add(1, Ordering::SeqCst);
        let released = self.hold(ctx).await;

        let mut outcome = ImportOutcome::default();
        outcome.result.warn("Gated import finished");
        if self.ignore_cancel {
            // The unit of work in flight when the gate opened still lands
            let id = Uuid::new_v4().to_string();
            let source_id = format!("gated-{}", ctx.job_id);
            ctx.services
                .domain
                .create_entity(&NewEntity {
                    id: id.clone(),
                    kind: EntityKind::User,
                    station_id: None,
                    name: "gated".to_string(),
                    attributes: serde_json::json!({}),
                    provenance: ImportProvenance {
                        source_type: GATED_SOURCE.to_string(),
                        source_id: source_id.clone(),
                        job_id: ctx.job_id,
                    },
                })
                .await?;
            outcome.result.users_created += 1;
            outcome
                .result
                .mappings
                .push(Mapping::created("user", source_id, id.clone(), "gated"));
            outcome.imported.user_ids.push(id);
        }
        outcome.cancelled = !released;
        Ok(outcome)
    }

    fn staged(&self) -> Option<&dyn StagedSourceAdapter> {
        Some(self)
    }
}

#[async_trait]
impl StagedSourceAdapter for GatedAdapter {
    async fn analyze_for_staging(&self, ctx: &ImportContext) -> Result<StagedImport> {
        self.analyses.fetch_add(1, Ordering::SeqCst);
        if !self.hold(ctx).await {
            return Err(Error::Cancelled);
        }
        Ok(StagedImport::new(ctx.job_id, ctx.source_type.clone()))
    }

    async fn commit_staged_import(
        &self,
        _staged: &StagedImport,
        _ctx: &ImportContext,
    ) -> Result<ImportOutcome> {
        Ok(ImportOutcome::default())
    }
}

/// Filesystem blob store that counts uploads and deletions.
///
/// With [`hold_uploads`](Self::hold_uploads) every upload waits until
/// [`release_uploads`](Self::release_uploads), which keeps media ingestion
/// in flight for as long as a test needs.
pub struct CountingBlobStore {
    inner: FsBlobStore,
    stores: AtomicUsize,
    deletes: AtomicUsize,
    holding: AtomicBool,
    upload_entered: Notify,
    release: CancellationToken,
}

impl CountingBlobStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            inner: FsBlobStore::new(root),
            stores: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            holding: AtomicBool::new(false),
            upload_entered: Notify::new(),
            release: CancellationToken::new(),
        }
    }

    pub fn hold_uploads(&self) {
        self.holding.store(true, Ordering::SeqCst);
    }

    pub fn release_uploads(&self) {
        self.release.cancel();
    }

    /// Wait until an upload is blocked on the hold
    pub async fn wait_upload_entered(&self) {
        tokio::time::timeout(Duration::from_secs(10), self.upload_entered.notified())
            .await
            .expect("no upload reached the blob store");
    }

    pub fn stores(&self) -> usize {
        self.stores.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn root(&self) -> &std::path::Path {
        self.inner.root()
    }
}

#[async_trait]
impl BlobStore for CountingBlobStore {
    async fn store(&self, station_id: &str, item_id: &str, bytes: &[u8]) -> Result<String> {
        if self.holding.load(Ordering::SeqCst) {
            self.upload_entered.notify_one();
            self.release.cancelled().await;
        }
        self.stores.fetch_add(1, Ordering::SeqCst);
        self.inner.store(station_id, item_id, bytes).await
    }

    fn url_for(&self, storage_key: &str) -> String {
        self.inner.url_for(storage_key)
    }

    async fn delete(&self, storage_key: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(storage_key).await
    }
}

/// SQLite domain store whose library entity creation fails for one kind
pub struct FailingDomainStore {
    inner: Arc<SqliteDomainStore>,
    fail_kind: EntityKind,
}

impl FailingDomainStore {
    pub fn new(inner: Arc<SqliteDomainStore>, fail_kind: EntityKind) -> Self {
        Self { inner, fail_kind }
    }
}

#[async_trait]
impl DomainStore for FailingDomainStore {
    async fn station_exists(&self, station_id: &str) -> Result<bool> {
        self.inner.station_exists(station_id).await
    }

    async fn create_station(&self, station: &NewStation) -> Result<()> {
        self.inner.create_station(station).await
    }

    async fn create_media(&self, media: &NewMediaItem) -> Result<()> {
        self.inner.create_media(media).await
    }

    async fn create_entity(&self, entity: &NewEntity) -> Result<()> {
        if entity.kind == self.fail_kind {
            return Err(Error::Internal(format!("{} table unavailable", entity.kind)));
        }
        self.inner.create_entity(entity).await
    }

    async fn find_media_by_digest(
        &self,
        digest: &str,
        station_id: Option<&str>,
    ) -> Result<Option<StoredMedia>> {
        self.inner.find_media_by_digest(digest, station_id).await
    }

    async fn find_media_by_metadata(
        &self,
        title: &str,
        artist: &str,
        album: &str,
        station_id: Option<&str>,
    ) -> Result<Option<StoredMedia>> {
        self.inner
            .find_media_by_metadata(title, artist, album, station_id)
            .await
    }

    async fn find_imported(
        &self,
        kind: EntityKind,
        station_id: Option<&str>,
        source_type: &str,
        source_ids: &[String],
    ) -> Result<Option<String>> {
        self.inner
            .find_imported(kind, station_id, source_type, source_ids)
            .await
    }

    async fn count_zero_duration_media(&self, job_id: Uuid) -> Result<usize> {
        self.inner.count_zero_duration_media(job_id).await
    }

    async fn media_blob_keys(&self, media_ids: &[String]) -> Result<Vec<String>> {
        self.inner.media_blob_keys(media_ids).await
    }

    async fn blob_key_in_use(&self, key: &str) -> Result<bool> {
        self.inner.blob_key_in_use(key).await
    }

    async fn delete_entities(&self, kind: EntityKind, ids: &[String]) -> Result<u64> {
        self.inner.delete_entities(kind, ids).await
    }
}
