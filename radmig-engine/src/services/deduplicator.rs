//! Content-digest deduplication against the destination library
//!
//! At ingestion time a digest hit means the new media record reuses the existing
//! storage key instead of uploading again. At staged-analysis time the same lookup
//! (plus a metadata fallback for items without a digest) marks candidates as
//! duplicates so they start deselected.

use radmig_common::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::db::domain::normalize_text;
use crate::models::StagedMediaItem;
use crate::storage::{DomainStore, StoredMedia};

/// Outcome of a digest lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupDecision {
    /// Artifact already stored; share its storage key
    Existing(StoredMedia),
    /// New artifact; upload required
    Fresh,
}

pub struct Deduplicator {
    store: Arc<dyn DomainStore>,
}

impl Deduplicator {
    pub fn new(store: Arc<dyn DomainStore>) -> Self {
        Self { store }
    }

    /// Library-wide lookup by content digest
    pub async fn resolve(&self, digest: &str) -> Result<DedupDecision> {
        Ok(match self.store.find_media_by_digest(digest, None).await? {
            Some(existing) => DedupDecision::Existing(existing),
            None => DedupDecision::Fresh,
        })
    }

    /// Mark staged media that already exists in the library
    ///
    /// Items with a digest are matched by digest; items without one fall back to
    /// normalized (title, artist, album), which needs both title and artist.
    /// When `station_id` is given only that station's media is considered.
    /// Returns the number of items newly marked.
    pub async fn detect_duplicates(
        &self,
        media: &mut [StagedMediaItem],
        station_id: Option<&str>,
    ) -> usize {
        let mut by_hash = 0usize;
        let mut by_metadata = 0usize;
        let mut metadata_hits: HashMap<(String, String, String), Option<String>> = HashMap::new();

        for item in media.iter_mut().filter(|m| !m.is_duplicate) {
            if let Some(digest) = item.content_hash.as_deref().filter(|d| !d.is_empty()) {
                match self.store.find_media_by_digest(digest, station_id).await {
                    Ok(Some(existing)) => {
                        item.is_duplicate = true;
                        item.duplicate_of_id = Some(existing.id);
                        by_hash += 1;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(
                            source_id = %item.source_id,
                            error = %e,
                            "Duplicate lookup by hash failed"
                        );
                    }
                }
                continue;
            }

            let key = (
                normalize_text(&item.title),
                normalize_text(&item.artist),
                normalize_text(&item.album),
            );
            if key.0.is_empty() || key.1.is_empty() {
                continue;
            }

            let hit = match metadata_hits.get(&key) {
                Some(hit) => hit.clone(),
                None => {
                    let hit = match self
                        .store
                        .find_media_by_metadata(&key.0, &key.1, &key.2, station_id)
                        .await
                    {
                        Ok(found) => found.map(|m| m.id),
                        Err(e) => {
                            warn!(
                                source_id = %item.source_id,
                                error = %e,
                                "Duplicate lookup by metadata failed"
                            );
                            None
                        }
                    };
                    metadata_hits.insert(key, hit.clone());
                    hit
                }
            };

            if let Some(existing_id) = hit {
                item.is_duplicate = true;
                item.duplicate_of_id = Some(existing_id);
                by_metadata += 1;
            }
        }

        info!(
            total_items = media.len(),
            hash_duplicates = by_hash,
            fallback_duplicates = by_metadata,
            "Duplicate detection complete"
        );
        by_hash + by_metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::domain::SqliteDomainStore;
    use crate::storage::{ImportProvenance, NewMediaItem};
    use uuid::Uuid;

    async fn seeded_store() -> Arc<SqliteDomainStore> {
        let pool = radmig_common::db::init_memory_database().await.unwrap();
        crate::db::init_tables(&pool).await.unwrap();
        let store = Arc::new(SqliteDomainStore::new(pool));
        store
            .create_media(&NewMediaItem {
                id: "existing".to_string(),
                station_id: "s1".to_string(),
                title: "So What".to_string(),
                artist: "Miles Davis".to_string(),
                album: "Kind of Blue".to_string(),
                duration_ms: Some(545_000),
                content_hash: "hash-1".to_string(),
                storage_key: "s1/existing".to_string(),
                artwork_key: None,
                size_bytes: 3,
                provenance: ImportProvenance {
                    source_type: "archive".to_string(),
                    source_id: "1::a".to_string(),
                    job_id: Uuid::new_v4(),
                },
            })
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_resolve_by_digest() {
        let dedup = Deduplicator::new(seeded_store().await);
        match dedup.resolve("hash-1").await.unwrap() {
            DedupDecision::Existing(m) => assert_eq!(m.storage_key, "s1/existing"),
            DedupDecision::Fresh => panic!("expected existing media"),
        }
        assert_eq!(dedup.resolve("other").await.unwrap(), DedupDecision::Fresh);
    }

    #[tokio::test]
    async fn test_detect_duplicates_hash_then_metadata() {
        let dedup = Deduplicator::new(seeded_store().await);
        let mut media = vec![
            StagedMediaItem {
                source_id: "1::x".into(),
                content_hash: Some("hash-1".into()),
                ..Default::default()
            },
            StagedMediaItem {
                source_id: "1::y".into(),
                title: "  so   what".into(),
                artist: "MILES DAVIS".into(),
                album: "kind of blue".into(),
                ..Default::default()
            },
            StagedMediaItem {
                source_id: "1::z".into(),
                title: "So What".into(),
                // No artist: metadata fallback does not apply
                ..Default::default()
            },
            StagedMediaItem {
                source_id: "1::w".into(),
                content_hash: Some("new-hash".into()),
                title: "So What".into(),
                artist: "Miles Davis".into(),
                album: "Kind of Blue".into(),
                ..Default::default()
            },
        ];

        let marked = dedup.detect_duplicates(&mut media, None).await;
        assert_eq!(marked, 2);
        assert_eq!(media[0].duplicate_of_id.as_deref(), Some("existing"));
        assert!(media[1].is_duplicate);
        assert!(!media[2].is_duplicate);
        // A known digest is authoritative: no metadata fallback
        assert!(!media[3].is_duplicate);
    }

    #[tokio::test]
    async fn test_detect_duplicates_is_station_scoped() {
        let dedup = Deduplicator::new(seeded_store().await);
        let mut media = vec![StagedMediaItem {
            source_id: "2::x".into(),
            content_hash: Some("hash-1".into()),
            ..Default::default()
        }];

        assert_eq!(dedup.detect_duplicates(&mut media, Some("s2")).await, 0);
        assert!(!media[0].is_duplicate);
    }
}
