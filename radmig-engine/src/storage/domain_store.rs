//! Destination domain persistence consumed by the engine
//!
//! Every entity created by an import carries its provenance (source type, scoped
//! source ID, job). Idempotency and rollback are both answered from it.

use async_trait::async_trait;
use radmig_common::Result;
use std::fmt;
use uuid::Uuid;

/// Destination entity kinds created by imports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Station,
    Media,
    Playlist,
    SmartBlock,
    Show,
    Clock,
    Webstream,
    User,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Station => "station",
            EntityKind::Media => "media",
            EntityKind::Playlist => "playlist",
            EntityKind::SmartBlock => "smart_block",
            EntityKind::Show => "show",
            EntityKind::Clock => "clock",
            EntityKind::Webstream => "webstream",
            EntityKind::User => "user",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an imported entity came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportProvenance {
    pub source_type: String,
    /// Scoped source ID (`station::raw`) or, for stations, the raw station ID
    pub source_id: String,
    pub job_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct NewStation {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub timezone: Option<String>,
    pub provenance: ImportProvenance,
}

#[derive(Debug, Clone)]
pub struct NewMediaItem {
    pub id: String,
    pub station_id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub duration_ms: Option<u64>,
    pub content_hash: String,
    pub storage_key: String,
    pub artwork_key: Option<String>,
    pub size_bytes: u64,
    pub provenance: ImportProvenance,
}

/// Playlist, smart block, show, clock, webstream or user
#[derive(Debug, Clone)]
pub struct NewEntity {
    pub id: String,
    pub kind: EntityKind,
    /// `None` for users
    pub station_id: Option<String>,
    pub name: String,
    /// Kind-specific attributes (playlist entries, rules, recurrence, urls)
    pub attributes: serde_json::Value,
    pub provenance: ImportProvenance,
}

/// Existing media row, as needed for deduplication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMedia {
    pub id: String,
    pub station_id: String,
    pub content_hash: Option<String>,
    pub storage_key: String,
    pub artwork_key: Option<String>,
}

#[async_trait]
pub trait DomainStore: Send + Sync {
    async fn station_exists(&self, station_id: &str) -> Result<bool>;

    async fn create_station(&self, station: &NewStation) -> Result<()>;

    async fn create_media(&self, media: &NewMediaItem) -> Result<()>;

    async fn create_entity(&self, entity: &NewEntity) -> Result<()>;

    /// Oldest media with this content digest, optionally restricted to a station
    async fn find_media_by_digest(
        &self,
        digest: &str,
        station_id: Option<&str>,
    ) -> Result<Option<StoredMedia>>;

    /// Oldest media matching normalized (lower-cased, whitespace-collapsed) metadata
    async fn find_media_by_metadata(
        &self,
        title: &str,
        artist: &str,
        album: &str,
        station_id: Option<&str>,
    ) -> Result<Option<StoredMedia>>;

    /// ID of an entity of `kind` already imported for (station, source type) whose
    /// recorded source ID is any of `source_ids`
    async fn find_imported(
        &self,
        kind: EntityKind,
        station_id: Option<&str>,
        source_type: &str,
        source_ids: &[String],
    ) -> Result<Option<String>>;

    /// Media created by `job_id` with no usable duration
    async fn count_zero_duration_media(&self, job_id: Uuid) -> Result<usize>;

    /// Storage and artwork keys referenced by the given media rows
    async fn media_blob_keys(&self, media_ids: &[String]) -> Result<Vec<String>>;

    /// Whether any media row still references `key` as storage or artwork key
    async fn blob_key_in_use(&self, key: &str) -> Result<bool>;

    /// Delete entities by ID, returning how many rows went away
    async fn delete_entities(&self, kind: EntityKind, ids: &[String]) -> Result<u64>;
}
