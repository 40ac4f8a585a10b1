//! SQLite-backed destination store
//!
//! Stations and media get their own tables; the remaining library entities share
//! `library_entities` keyed by kind.

use async_trait::async_trait;
use chrono::Utc;
use radmig_common::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::placeholders;
use crate::storage::{
    DomainStore, EntityKind, NewEntity, NewMediaItem, NewStation, StoredMedia,
};

pub(crate) async fn create_destination_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stations (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            timezone TEXT,
            import_source TEXT,
            import_source_id TEXT,
            import_job_id TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS media_items (
            id TEXT PRIMARY KEY,
            station_id TEXT NOT NULL,
            title TEXT NOT NULL,
            artist TEXT NOT NULL DEFAULT '',
            album TEXT NOT NULL DEFAULT '',
            duration_ms INTEGER,
            content_hash TEXT,
            storage_key TEXT NOT NULL,
            artwork_key TEXT,
            size_bytes INTEGER NOT NULL DEFAULT 0,
            import_source TEXT,
            import_source_id TEXT,
            import_job_id TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS library_entities (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            station_id TEXT,
            name TEXT NOT NULL,
            attributes TEXT NOT NULL,
            import_source TEXT,
            import_source_id TEXT,
            import_job_id TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    for ddl in [
        "CREATE INDEX IF NOT EXISTS idx_media_content_hash ON media_items(content_hash)",
        "CREATE INDEX IF NOT EXISTS idx_media_import \
         ON media_items(station_id, import_source, import_source_id)",
        "CREATE INDEX IF NOT EXISTS idx_stations_import \
         ON stations(import_source, import_source_id)",
        "CREATE INDEX IF NOT EXISTS idx_entities_import \
         ON library_entities(kind, station_id, import_source, import_source_id)",
    ] {
        sqlx::query(ddl).execute(pool).await?;
    }

    Ok(())
}

/// Collapse whitespace runs and lower-case, for metadata duplicate matching
pub fn normalize_text(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// SQL counterpart of [`normalize_text`] for runs of up to eight spaces
fn normalized_column(column: &str) -> String {
    format!(
        "LOWER(TRIM(REPLACE(REPLACE(REPLACE(COALESCE({}, ''), '  ', ' '), '  ', ' '), '  ', ' ')))",
        column
    )
}

/// [`DomainStore`] over the engine's SQLite pool
#[derive(Clone)]
pub struct SqliteDomainStore {
    pool: SqlitePool,
}

impl SqliteDomainStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_media(row: &sqlx::sqlite::SqliteRow) -> Result<StoredMedia> {
        Ok(StoredMedia {
            id: row.try_get("id")?,
            station_id: row.try_get("station_id")?,
            content_hash: row.try_get("content_hash")?,
            storage_key: row.try_get("storage_key")?,
            artwork_key: row.try_get("artwork_key")?,
        })
    }
}

#[async_trait]
impl DomainStore for SqliteDomainStore {
    async fn station_exists(&self, station_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stations WHERE id = ?")
            .bind(station_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    async fn create_station(&self, station: &NewStation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stations (
                id, name, description, timezone,
                import_source, import_source_id, import_job_id, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&station.id)
        .bind(&station.name)
        .bind(&station.description)
        .bind(&station.timezone)
        .bind(&station.provenance.source_type)
        .bind(&station.provenance.source_id)
        .bind(station.provenance.job_id.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_media(&self, media: &NewMediaItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO media_items (
                id, station_id, title, artist, album, duration_ms, content_hash,
                storage_key, artwork_key, size_bytes,
                import_source, import_source_id, import_job_id, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&media.id)
        .bind(&media.station_id)
        .bind(&media.title)
        .bind(&media.artist)
        .bind(&media.album)
        .bind(media.duration_ms.map(|d| d as i64))
        .bind(&media.content_hash)
        .bind(&media.storage_key)
        .bind(&media.artwork_key)
        .bind(media.size_bytes as i64)
        .bind(&media.provenance.source_type)
        .bind(&media.provenance.source_id)
        .bind(media.provenance.job_id.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_entity(&self, entity: &NewEntity) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO library_entities (
                id, kind, station_id, name, attributes,
                import_source, import_source_id, import_job_id, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entity.id)
        .bind(entity.kind.as_str())
        .bind(&entity.station_id)
        .bind(&entity.name)
        .bind(serde_json::to_string(&entity.attributes)?)
        .bind(&entity.provenance.source_type)
        .bind(&entity.provenance.source_id)
        .bind(entity.provenance.job_id.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_media_by_digest(
        &self,
        digest: &str,
        station_id: Option<&str>,
    ) -> Result<Option<StoredMedia>> {
        let row = sqlx::query(
            r#"
            SELECT id, station_id, content_hash, storage_key, artwork_key
            FROM media_items
            WHERE content_hash = ? AND (? IS NULL OR station_id = ?)
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .bind(digest)
        .bind(station_id)
        .bind(station_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_media).transpose()
    }

    async fn find_media_by_metadata(
        &self,
        title: &str,
        artist: &str,
        album: &str,
        station_id: Option<&str>,
    ) -> Result<Option<StoredMedia>> {
        let sql = format!(
            r#"
            SELECT id, station_id, content_hash, storage_key, artwork_key
            FROM media_items
            WHERE {} = ? AND {} = ? AND {} = ? AND (? IS NULL OR station_id = ?)
            ORDER BY created_at ASC
            LIMIT 1
            "#,
            normalized_column("title"),
            normalized_column("artist"),
            normalized_column("album"),
        );
        let row = sqlx::query(&sql)
            .bind(normalize_text(title))
            .bind(normalize_text(artist))
            .bind(normalize_text(album))
            .bind(station_id)
            .bind(station_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_media).transpose()
    }

    async fn find_imported(
        &self,
        kind: EntityKind,
        station_id: Option<&str>,
        source_type: &str,
        source_ids: &[String],
    ) -> Result<Option<String>> {
        if source_ids.is_empty() {
            return Ok(None);
        }

        let ids = placeholders(source_ids.len());
        let sql = match kind {
            EntityKind::Station => format!(
                "SELECT id FROM stations \
                 WHERE import_source = ? AND import_source_id IN ({}) LIMIT 1",
                ids
            ),
            EntityKind::Media => format!(
                "SELECT id FROM media_items \
                 WHERE station_id IS ? AND import_source = ? AND import_source_id IN ({}) LIMIT 1",
                ids
            ),
            _ => format!(
                "SELECT id FROM library_entities \
                 WHERE kind = ? AND station_id IS ? AND import_source = ? \
                 AND import_source_id IN ({}) LIMIT 1",
                ids
            ),
        };

        let mut query = sqlx::query_scalar::<_, String>(&sql);
        match kind {
            EntityKind::Station => {}
            EntityKind::Media => query = query.bind(station_id),
            _ => query = query.bind(kind.as_str()).bind(station_id),
        }
        query = query.bind(source_type);
        for id in source_ids {
            query = query.bind(id);
        }

        Ok(query.fetch_optional(&self.pool).await?)
    }

    async fn count_zero_duration_media(&self, job_id: Uuid) -> Result<usize> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM media_items
            WHERE import_job_id = ? AND (duration_ms IS NULL OR duration_ms <= 0)
            "#,
        )
        .bind(job_id.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(count as usize)
    }

    async fn media_blob_keys(&self, media_ids: &[String]) -> Result<Vec<String>> {
        if media_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT storage_key, artwork_key FROM media_items WHERE id IN ({})",
            placeholders(media_ids.len())
        );
        let mut query = sqlx::query(&sql);
        for id in media_ids {
            query = query.bind(id);
        }

        let mut keys = Vec::new();
        for row in query.fetch_all(&self.pool).await? {
            keys.push(row.try_get::<String, _>("storage_key")?);
            if let Some(art) = row.try_get::<Option<String>, _>("artwork_key")? {
                keys.push(art);
            }
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn blob_key_in_use(&self, key: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM media_items WHERE storage_key = ? OR artwork_key = ?",
        )
        .bind(key)
        .bind(key)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    async fn delete_entities(&self, kind: EntityKind, ids: &[String]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let list = placeholders(ids.len());
        let sql = match kind {
            EntityKind::Station => format!("DELETE FROM stations WHERE id IN ({})", list),
            EntityKind::Media => format!("DELETE FROM media_items WHERE id IN ({})", list),
            _ => format!(
                "DELETE FROM library_entities WHERE kind = ? AND id IN ({})",
                list
            ),
        };

        let mut query = sqlx::query(&sql);
        if !matches!(kind, EntityKind::Station | EntityKind::Media) {
            query = query.bind(kind.as_str());
        }
        for id in ids {
            query = query.bind(id);
        }
        Ok(query.execute(&self.pool).await?.rows_affected())
    }
}
