//! Concurrent media ingestion
//!
//! A fixed pool of workers pulls media tasks from a shared queue and fetches each
//! payload, hashing it while it streams in. Fetched payloads travel over one channel
//! to a single consumer, the only place that touches the blob store and the domain
//! store. Counters shared by workers and consumer sit behind a mutex.
//!
//! Per-item failures become skip counters and warnings; they never stop the batch.
//! Cancellation stops workers before their next item and aborts in-flight fetches.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::content_hasher::{read_hashed, HashedPayload};
use super::deduplicator::{DedupDecision, Deduplicator};
use super::progress_reporter::ProgressReporter;
use crate::adapters::MediaFetcher;
use crate::config::clamp_concurrency;
use crate::models::{ImportResult, ImportedItems, Mapping, StagedMediaItem};
use crate::storage::{BlobStore, DomainStore, ImportProvenance, NewMediaItem};

pub const SKIP_DOWNLOAD_FAILED: &str = "media_download_failed";
pub const SKIP_READ_FAILED: &str = "media_read_failed";
pub const SKIP_UPLOAD_FAILED: &str = "media_upload_failed";
pub const SKIP_DB_FAILED: &str = "media_db_failed";
pub const DEDUPLICATED: &str = "media_deduplicated";

/// One media item to ingest into a destination station
#[derive(Debug, Clone)]
pub struct MediaTask {
    pub item: StagedMediaItem,
    pub station_id: String,
}

/// A media record created by the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestedMedia {
    /// Scoped source ID of the staged item
    pub source_id: String,
    pub media_id: String,
    /// Record shares an existing storage key
    pub deduplicated: bool,
}

#[derive(Debug, Default)]
pub struct IngestionReport {
    pub ingested: Vec<IngestedMedia>,
    pub skipped: BTreeMap<String, usize>,
    pub warnings: Vec<String>,
    pub mappings: Vec<Mapping>,
    pub cancelled: bool,
}

impl IngestionReport {
    /// Fold counters, warnings, mappings and created IDs into a run's outcome
    pub fn merge_into(self, result: &mut ImportResult, imported: &mut ImportedItems) {
        result.media_items_imported += self.ingested.len();
        for (key, count) in self.skipped {
            result.skip_n(&key, count);
        }
        result.warnings.extend(self.warnings);
        result.mappings.extend(self.mappings);
        imported
            .media_ids
            .extend(self.ingested.into_iter().map(|m| m.media_id));
    }
}

/// State shared between workers and the consumer
#[derive(Default)]
struct Counters {
    skipped: BTreeMap<String, usize>,
    warnings: Vec<String>,
    mappings: Vec<Mapping>,
}

impl Counters {
    fn fail(&mut self, item: &StagedMediaItem, reason: &str, message: String) {
        *self.skipped.entry(reason.to_string()).or_insert(0) += 1;
        self.warnings.push(message);
        self.mappings.push(Mapping::skipped(
            "media",
            item.source_id.clone(),
            None,
            item.title.clone(),
            reason,
        ));
    }
}

/// What a worker hands to the consumer
enum WorkerOutput {
    Fetched {
        task: MediaTask,
        payload: HashedPayload,
        artwork: Option<Vec<u8>>,
    },
    /// Already recorded in the counters; only advances progress
    Failed,
}

pub struct IngestionPipeline {
    domain: Arc<dyn DomainStore>,
    blobs: Arc<dyn BlobStore>,
    dedup: Deduplicator,
    concurrency: usize,
    fetch_timeout: Duration,
    source_type: String,
    job_id: Uuid,
}

impl IngestionPipeline {
    pub fn new(
        domain: Arc<dyn DomainStore>,
        blobs: Arc<dyn BlobStore>,
        concurrency: usize,
        fetch_timeout: Duration,
        source_type: impl Into<String>,
        job_id: Uuid,
    ) -> Self {
        Self {
            dedup: Deduplicator::new(domain.clone()),
            domain,
            blobs,
            concurrency: clamp_concurrency(concurrency),
            fetch_timeout,
            source_type: source_type.into(),
            job_id,
        }
    }

    /// Ingest `tasks`, driving `reporter` within its current phase
    pub async fn run(
        &self,
        tasks: Vec<MediaTask>,
        fetcher: Arc<dyn MediaFetcher>,
        cancel: &CancellationToken,
        reporter: &mut ProgressReporter,
    ) -> IngestionReport {
        let total = tasks.len();
        if total == 0 {
            return IngestionReport::default();
        }

        let workers = self.concurrency.min(total);
        info!(
            job_id = %self.job_id,
            media_count = total,
            workers,
            "Starting media ingestion"
        );

        let queue = Arc::new(Mutex::new(VecDeque::from(tasks)));
        let counters = Arc::new(Mutex::new(Counters::default()));
        let (tx, mut rx) = mpsc::channel::<WorkerOutput>(workers * 2);

        let mut pool = JoinSet::new();
        for worker_id in 0..workers {
            pool.spawn(worker_loop(
                worker_id,
                queue.clone(),
                counters.clone(),
                fetcher.clone(),
                tx.clone(),
                cancel.clone(),
                self.fetch_timeout,
            ));
        }
        // Channel closes once every worker has exited
        drop(tx);

        let mut ingested = Vec::new();
        let mut completed = 0usize;
        while let Some(output) = rx.recv().await {
            completed += 1;
            if let WorkerOutput::Fetched {
                task,
                payload,
                artwork,
            } = output
            {
                if let Some(media) = self.persist(task, payload, artwork, &counters).await {
                    reporter.record_imported("media", 1);
                    ingested.push(media);
                }
            }
            reporter.advance(
                completed,
                format!("Imported {}/{} media files", completed, total),
            );
        }

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                warn!(job_id = %self.job_id, error = %e, "Ingestion worker panicked");
            }
        }

        let counters = std::mem::take(&mut *counters.lock().await);
        let cancelled = cancel.is_cancelled();
        info!(
            job_id = %self.job_id,
            ingested = ingested.len(),
            skipped = counters.skipped.values().sum::<usize>(),
            cancelled,
            "Media ingestion finished"
        );

        let mut mappings = counters.mappings;
        mappings.sort_by(|a, b| a.old_id.cmp(&b.old_id));
        IngestionReport {
            ingested,
            skipped: counters.skipped,
            warnings: counters.warnings,
            mappings,
            cancelled,
        }
    }

    /// Consumer side: dedup, upload on miss, create the record
    async fn persist(
        &self,
        task: MediaTask,
        payload: HashedPayload,
        artwork: Option<Vec<u8>>,
        counters: &Mutex<Counters>,
    ) -> Option<IngestedMedia> {
        let item = &task.item;
        let media_id = Uuid::new_v4().to_string();

        let decision = match self.dedup.resolve(&payload.digest).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(source_id = %item.source_id, error = %e, "Dedup lookup failed");
                counters.lock().await.fail(
                    item,
                    SKIP_DB_FAILED,
                    format!("Media '{}': dedup lookup failed: {}", item.title, e),
                );
                return None;
            }
        };

        let (storage_key, existing_artwork, uploaded) = match decision {
            DedupDecision::Existing(existing) => {
                debug!(
                    source_id = %item.source_id,
                    existing_id = %existing.id,
                    "Reusing stored media artifact"
                );
                (existing.storage_key, existing.artwork_key, false)
            }
            DedupDecision::Fresh => {
                match self
                    .blobs
                    .store(&task.station_id, &media_id, &payload.bytes)
                    .await
                {
                    Ok(key) => (key, None, true),
                    Err(e) => {
                        warn!(source_id = %item.source_id, error = %e, "Media upload failed");
                        counters.lock().await.fail(
                            item,
                            SKIP_UPLOAD_FAILED,
                            format!("Media '{}': upload failed: {}", item.title, e),
                        );
                        return None;
                    }
                }
            }
        };

        let artwork_key = match (existing_artwork, artwork) {
            (Some(key), _) => Some(key),
            (None, Some(bytes)) => {
                let art_id = format!("{}-artwork", media_id);
                match self.blobs.store(&task.station_id, &art_id, &bytes).await {
                    Ok(key) => Some(key),
                    Err(e) => {
                        counters.lock().await.warnings.push(format!(
                            "Media '{}': artwork upload failed: {}",
                            item.title, e
                        ));
                        None
                    }
                }
            }
            (None, None) => None,
        };

        let record = NewMediaItem {
            id: media_id.clone(),
            station_id: task.station_id.clone(),
            title: item.title.clone(),
            artist: item.artist.clone(),
            album: item.album.clone(),
            duration_ms: item.duration_ms,
            content_hash: payload.digest.clone(),
            storage_key: storage_key.clone(),
            artwork_key,
            size_bytes: payload.size(),
            provenance: ImportProvenance {
                source_type: self.source_type.clone(),
                source_id: item.source_id.clone(),
                job_id: self.job_id,
            },
        };

        if let Err(e) = self.domain.create_media(&record).await {
            warn!(source_id = %item.source_id, error = %e, "Media record creation failed");
            if uploaded {
                if let Err(cleanup) = self.blobs.delete(&storage_key).await {
                    debug!(
                        storage_key = %storage_key,
                        error = %cleanup,
                        "Orphan blob cleanup failed"
                    );
                }
            }
            counters.lock().await.fail(
                item,
                SKIP_DB_FAILED,
                format!("Media '{}': record creation failed: {}", item.title, e),
            );
            return None;
        }

        let mut shared = counters.lock().await;
        if !uploaded {
            *shared.skipped.entry(DEDUPLICATED.to_string()).or_insert(0) += 1;
        }
        shared.mappings.push(Mapping::created(
            "media",
            item.source_id.clone(),
            media_id.clone(),
            item.title.clone(),
        ));

        Some(IngestedMedia {
            source_id: item.source_id.clone(),
            media_id,
            deduplicated: !uploaded,
        })
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: Arc<Mutex<VecDeque<MediaTask>>>,
    counters: Arc<Mutex<Counters>>,
    fetcher: Arc<dyn MediaFetcher>,
    tx: mpsc::Sender<WorkerOutput>,
    cancel: CancellationToken,
    fetch_timeout: Duration,
) {
    loop {
        if cancel.is_cancelled() {
            debug!(worker_id, "Ingestion worker stopping: cancelled");
            break;
        }
        let Some(task) = queue.lock().await.pop_front() else {
            break;
        };

        let fetched = tokio::select! {
            _ = cancel.cancelled() => break,
            fetched = fetch_one(fetcher.as_ref(), &task.item, fetch_timeout) => fetched,
        };

        let output = match fetched {
            Ok((payload, artwork)) => WorkerOutput::Fetched {
                task,
                payload,
                artwork,
            },
            Err((reason, message)) => {
                warn!(worker_id, source_id = %task.item.source_id, reason, "Media fetch failed");
                counters.lock().await.fail(&task.item, reason, message);
                WorkerOutput::Failed
            }
        };

        if tx.send(output).await.is_err() {
            break;
        }
    }
}

type FetchFailure = (&'static str, String);

/// Payload (hashed while read) plus best-effort artwork
async fn fetch_one(
    fetcher: &dyn MediaFetcher,
    item: &StagedMediaItem,
    fetch_timeout: Duration,
) -> std::result::Result<(HashedPayload, Option<Vec<u8>>), FetchFailure> {
    let payload = tokio::time::timeout(fetch_timeout, async {
        let reader = fetcher.fetch(item).await.map_err(|e| {
            (
                SKIP_DOWNLOAD_FAILED,
                format!("Media '{}': download failed: {}", item.title, e),
            )
        })?;
        read_hashed(reader).await.map_err(|e| {
            (
                SKIP_READ_FAILED,
                format!("Media '{}': read failed: {}", item.title, e),
            )
        })
    })
    .await
    .map_err(|_| {
        (
            SKIP_DOWNLOAD_FAILED,
            format!(
                "Media '{}': download timed out after {}s",
                item.title,
                fetch_timeout.as_secs()
            ),
        )
    })??;

    let artwork = match tokio::time::timeout(fetch_timeout, fetcher.fetch_artwork(item)).await {
        Ok(Ok(artwork)) => artwork,
        Ok(Err(e)) => {
            debug!(source_id = %item.source_id, error = %e, "Artwork fetch failed");
            None
        }
        Err(_) => {
            debug!(source_id = %item.source_id, "Artwork fetch timed out");
            None
        }
    };

    Ok((payload, artwork))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::PayloadReader;
    use crate::db::domain::SqliteDomainStore;
    use crate::services::progress_reporter::ProgressSink;
    use crate::storage::FsBlobStore;
    use async_trait::async_trait;
    use radmig_common::{Error, Result};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Serves payloads from a map keyed by locator
    struct MapFetcher {
        payloads: HashMap<String, Vec<u8>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl MapFetcher {
        fn new(entries: &[(&str, &[u8])]) -> Self {
            Self {
                payloads: entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_vec()))
                    .collect(),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MediaFetcher for MapFetcher {
        async fn fetch(&self, item: &StagedMediaItem) -> Result<PayloadReader> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match self.payloads.get(&item.locator) {
                Some(bytes) => Ok(Box::new(std::io::Cursor::new(bytes.clone()))),
                None => Err(Error::NotFound(item.locator.clone())),
            }
        }

        async fn fetch_artwork(&self, _item: &StagedMediaItem) -> Result<Option<Vec<u8>>> {
            Err(Error::Adapter("artwork service down".to_string()))
        }
    }

    struct Fixture {
        _dir: TempDir,
        pipeline: IngestionPipeline,
        domain: Arc<SqliteDomainStore>,
    }

    async fn fixture(concurrency: usize) -> Fixture {
        let dir = TempDir::new().unwrap();
        let pool = radmig_common::db::init_memory_database().await.unwrap();
        crate::db::init_tables(&pool).await.unwrap();
        let domain = Arc::new(SqliteDomainStore::new(pool));
        let blobs = Arc::new(FsBlobStore::new(dir.path().join("media")));
        let pipeline = IngestionPipeline::new(
            domain.clone(),
            blobs,
            concurrency,
            Duration::from_secs(5),
            "archive",
            Uuid::new_v4(),
        );
        Fixture {
            _dir: dir,
            pipeline,
            domain,
        }
    }

    fn task(source_id: &str, locator: &str) -> MediaTask {
        MediaTask {
            item: StagedMediaItem {
                source_id: source_id.to_string(),
                title: format!("Track {}", source_id),
                locator: locator.to_string(),
                duration_ms: Some(1000),
                selected: true,
                ..Default::default()
            },
            station_id: "station-a".to_string(),
        }
    }

    #[tokio::test]
    async fn test_identical_payloads_share_one_storage_key() {
        let fx = fixture(4).await;
        let fetcher = Arc::new(MapFetcher::new(&[
            ("a", &b"same bytes"[..]),
            ("b", &b"same bytes"[..]),
        ]));
        let mut reporter = ProgressReporter::new(ProgressSink::disconnected(), 10);

        let report = fx
            .pipeline
            .run(
                vec![task("1::a", "a"), task("1::b", "b")],
                fetcher,
                &CancellationToken::new(),
                &mut reporter,
            )
            .await;

        assert_eq!(report.ingested.len(), 2);
        assert_eq!(report.ingested.iter().filter(|m| m.deduplicated).count(), 1);
        assert_eq!(report.skipped.get(DEDUPLICATED), Some(&1));

        let ids: Vec<String> = report.ingested.iter().map(|m| m.media_id.clone()).collect();
        let keys = fx.domain.media_blob_keys(&ids).await.unwrap();
        assert_eq!(keys.len(), 1, "both records reference one artifact");
        assert_eq!(reporter.snapshot().completed_steps, 2);
    }

    #[tokio::test]
    async fn test_failures_are_counted_not_fatal() {
        let fx = fixture(2).await;
        let fetcher = Arc::new(MapFetcher::new(&[("ok", &b"payload"[..])]));
        let mut reporter = ProgressReporter::new(ProgressSink::disconnected(), 10);

        let report = fx
            .pipeline
            .run(
                vec![task("1::ok", "ok"), task("1::gone", "missing")],
                fetcher,
                &CancellationToken::new(),
                &mut reporter,
            )
            .await;

        assert_eq!(report.ingested.len(), 1);
        assert_eq!(report.skipped.get(SKIP_DOWNLOAD_FAILED), Some(&1));
        assert!(report.warnings.iter().any(|w| w.contains("download failed")));
        let skipped: Vec<&Mapping> = report.mappings.iter().filter(|m| m.skipped).collect();
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].old_id, "1::gone");
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn test_concurrency_ceiling() {
        let fx = fixture(3).await;
        let entries: Vec<(String, Vec<u8>)> = (0..20)
            .map(|i| (format!("f{}", i), format!("payload {}", i).into_bytes()))
            .collect();
        let refs: Vec<(&str, &[u8])> = entries
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
            .collect();
        let fetcher = Arc::new(MapFetcher::new(&refs));
        let tasks = (0..20)
            .map(|i| task(&format!("1::{}", i), &format!("f{}", i)))
            .collect();
        let mut reporter = ProgressReporter::new(ProgressSink::disconnected(), 10);

        let report = fx
            .pipeline
            .run(tasks, fetcher.clone(), &CancellationToken::new(), &mut reporter)
            .await;

        assert_eq!(report.ingested.len(), 20);
        assert!(fetcher.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_fetches_nothing() {
        let fx = fixture(4).await;
        let fetcher = Arc::new(MapFetcher::new(&[("a", &b"x"[..])]));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut reporter = ProgressReporter::new(ProgressSink::disconnected(), 10);

        let report = fx
            .pipeline
            .run(vec![task("1::a", "a")], fetcher.clone(), &cancel, &mut reporter)
            .await;

        assert!(report.cancelled);
        assert!(report.ingested.is_empty());
        assert_eq!(fetcher.peak.load(Ordering::SeqCst), 0);
    }
}
