//! Staged import persistence
//!
//! The per-category item lists are stored as one JSON document so a selection edit
//! is written as a single statement.

use chrono::{DateTime, Utc};
use radmig_common::Result;
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

use super::{parse_optional_timestamp, parse_timestamp, parse_uuid};
use crate::models::{
    ImportSelections, SourceType, StagedImport, StagedImportStatus, StagedMediaItem,
    StagedPlaylistItem, StagedShowItem, StagedSmartBlockItem, StagedStationItem,
    StagedUserItem, StagedWebstreamItem,
};

#[derive(Serialize)]
struct ItemsRef<'a> {
    stations: &'a [StagedStationItem],
    media: &'a [StagedMediaItem],
    playlists: &'a [StagedPlaylistItem],
    smart_blocks: &'a [StagedSmartBlockItem],
    shows: &'a [StagedShowItem],
    webstreams: &'a [StagedWebstreamItem],
    users: &'a [StagedUserItem],
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Items {
    stations: Vec<StagedStationItem>,
    media: Vec<StagedMediaItem>,
    playlists: Vec<StagedPlaylistItem>,
    smart_blocks: Vec<StagedSmartBlockItem>,
    shows: Vec<StagedShowItem>,
    webstreams: Vec<StagedWebstreamItem>,
    users: Vec<StagedUserItem>,
}

fn items_json(staged: &StagedImport) -> Result<String> {
    Ok(serde_json::to_string(&ItemsRef {
        stations: &staged.stations,
        media: &staged.media,
        playlists: &staged.playlists,
        smart_blocks: &staged.smart_blocks,
        shows: &staged.shows,
        webstreams: &staged.webstreams,
        users: &staged.users,
    })?)
}

pub async fn insert_staged_import(pool: &SqlitePool, staged: &StagedImport) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO staged_imports (
            id, job_id, source_type, status, items, warnings, suggestions,
            selections, analyzed_at, committed_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(staged.id.to_string())
    .bind(staged.job_id.to_string())
    .bind(staged.source_type.as_str())
    .bind(staged.status.as_str())
    .bind(items_json(staged)?)
    .bind(serde_json::to_string(&staged.warnings)?)
    .bind(serde_json::to_string(&staged.suggestions)?)
    .bind(staged.selections.as_ref().map(serde_json::to_string).transpose()?)
    .bind(staged.analyzed_at.to_rfc3339())
    .bind(staged.committed_at.map(|t| t.to_rfc3339()))
    .execute(pool)
    .await?;

    Ok(())
}

/// Persist an edited snapshot (items and selections) while it is still `ready`
///
/// Returns `false` when the snapshot was committed or rejected in the meantime.
pub async fn save_selections(pool: &SqlitePool, staged: &StagedImport) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE staged_imports
        SET items = ?, selections = ?
        WHERE id = ? AND status = 'ready'
        "#,
    )
    .bind(items_json(staged)?)
    .bind(staged.selections.as_ref().map(serde_json::to_string).transpose()?)
    .bind(staged.id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// `ready → status`, stamping `committed_at` for commits
pub async fn finalize(
    pool: &SqlitePool,
    staged_id: Uuid,
    status: StagedImportStatus,
    at: DateTime<Utc>,
) -> Result<bool> {
    let committed_at = (status == StagedImportStatus::Committed).then(|| at.to_rfc3339());
    let result = sqlx::query(
        r#"
        UPDATE staged_imports
        SET status = ?, committed_at = COALESCE(?, committed_at)
        WHERE id = ? AND status = 'ready'
        "#,
    )
    .bind(status.as_str())
    .bind(committed_at)
    .bind(staged_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn load_staged_import(
    pool: &SqlitePool,
    staged_id: Uuid,
) -> Result<Option<StagedImport>> {
    let row = sqlx::query("SELECT * FROM staged_imports WHERE id = ?")
        .bind(staged_id.to_string())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_staged).transpose()
}

pub async fn load_for_job(pool: &SqlitePool, job_id: Uuid) -> Result<Option<StagedImport>> {
    let row = sqlx::query("SELECT * FROM staged_imports WHERE job_id = ?")
        .bind(job_id.to_string())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_staged).transpose()
}

pub async fn delete_for_job(pool: &SqlitePool, job_id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM staged_imports WHERE job_id = ?")
        .bind(job_id.to_string())
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

fn row_to_staged(row: &SqliteRow) -> Result<StagedImport> {
    let id: String = row.try_get("id")?;
    let job_id: String = row.try_get("job_id")?;
    let status: String = row.try_get("status")?;
    let items: String = row.try_get("items")?;
    let warnings: String = row.try_get("warnings")?;
    let suggestions: String = row.try_get("suggestions")?;
    let selections: Option<String> = row.try_get("selections")?;
    let analyzed_at: String = row.try_get("analyzed_at")?;

    let items: Items = serde_json::from_str(&items)?;
    let selections: Option<ImportSelections> =
        selections.as_deref().map(serde_json::from_str).transpose()?;

    Ok(StagedImport {
        id: parse_uuid(&id)?,
        job_id: parse_uuid(&job_id)?,
        source_type: SourceType::new(row.try_get::<String, _>("source_type")?),
        status: StagedImportStatus::parse(&status).ok_or_else(|| {
            radmig_common::Error::Internal(format!("Unknown staged import status: {}", status))
        })?,
        stations: items.stations,
        media: items.media,
        playlists: items.playlists,
        smart_blocks: items.smart_blocks,
        shows: items.shows,
        webstreams: items.webstreams,
        users: items.users,
        warnings: serde_json::from_str(&warnings)?,
        suggestions: serde_json::from_str(&suggestions)?,
        selections,
        analyzed_at: parse_timestamp(&analyzed_at)?,
        committed_at: parse_optional_timestamp(row.try_get("committed_at")?)?,
    })
}
