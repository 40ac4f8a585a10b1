//! Migration mapping audit trail

use chrono::Utc;
use radmig_common::Result;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

use crate::models::Mapping;

/// Record all mappings of a job in one transaction
pub async fn record_mappings(pool: &SqlitePool, job_id: Uuid, mappings: &[Mapping]) -> Result<()> {
    if mappings.is_empty() {
        return Ok(());
    }

    let job_id = job_id.to_string();
    let now = Utc::now().to_rfc3339();
    let mut tx = pool.begin().await?;
    for mapping in mappings {
        sqlx::query(
            r#"
            INSERT INTO migration_mappings (
                job_id, entity_type, old_id, new_id, name, skipped, reason, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job_id)
        .bind(&mapping.entity_type)
        .bind(&mapping.old_id)
        .bind(&mapping.new_id)
        .bind(&mapping.name)
        .bind(mapping.skipped)
        .bind(&mapping.reason)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    tracing::debug!(job_id = %job_id, count = mappings.len(), "Recorded migration mappings");
    Ok(())
}

pub async fn mappings_for_job(pool: &SqlitePool, job_id: Uuid) -> Result<Vec<Mapping>> {
    let rows = sqlx::query("SELECT * FROM migration_mappings WHERE job_id = ? ORDER BY id")
        .bind(job_id.to_string())
        .fetch_all(pool)
        .await?;
    rows.iter().map(row_to_mapping).collect()
}

/// Mappings whose old (source) or new (destination) ID equals `id`
pub async fn find_by_either_id(pool: &SqlitePool, id: &str) -> Result<Vec<Mapping>> {
    let rows = sqlx::query(
        "SELECT * FROM migration_mappings WHERE old_id = ? OR new_id = ? ORDER BY id",
    )
    .bind(id)
    .bind(id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_mapping).collect()
}

pub async fn delete_for_job(pool: &SqlitePool, job_id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM migration_mappings WHERE job_id = ?")
        .bind(job_id.to_string())
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

fn row_to_mapping(row: &SqliteRow) -> Result<Mapping> {
    Ok(Mapping {
        entity_type: row.try_get("entity_type")?,
        old_id: row.try_get("old_id")?,
        new_id: row.try_get("new_id")?,
        name: row.try_get("name")?,
        skipped: row.try_get("skipped")?,
        reason: row.try_get("reason")?,
    })
}
