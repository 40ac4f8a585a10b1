//! Database access for the migration engine
//!
//! Engine-owned tables (jobs, staged imports, mappings) plus the reference
//! destination tables backing [`domain::SqliteDomainStore`].

pub mod domain;
pub mod jobs;
pub mod mappings;
pub mod staged_imports;

use chrono::{DateTime, Utc};
use radmig_common::{Error, Result};
use sqlx::SqlitePool;
use std::path::Path;

/// Open the database at `db_path` and create engine tables
pub async fn init_database_pool(db_path: &Path, busy_timeout_ms: u64) -> Result<SqlitePool> {
    tracing::debug!("Connecting to database: {}", db_path.display());
    let pool = radmig_common::db::init_database(db_path, busy_timeout_ms).await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create engine tables if they don't exist (idempotent)
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS migration_jobs (
            id TEXT PRIMARY KEY,
            source_type TEXT NOT NULL,
            mode TEXT NOT NULL,
            status TEXT NOT NULL,
            options TEXT NOT NULL,
            progress TEXT NOT NULL,
            result TEXT,
            anomaly_report TEXT,
            imported_items TEXT,
            staged_import_id TEXT,
            redo_of_job_id TEXT,
            error TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_migration_jobs_status ON migration_jobs(status)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS staged_imports (
            id TEXT PRIMARY KEY,
            job_id TEXT NOT NULL UNIQUE,
            source_type TEXT NOT NULL,
            status TEXT NOT NULL,
            items TEXT NOT NULL,
            warnings TEXT NOT NULL,
            suggestions TEXT NOT NULL,
            selections TEXT,
            analyzed_at TEXT NOT NULL,
            committed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS migration_mappings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            old_id TEXT NOT NULL,
            new_id TEXT NOT NULL,
            name TEXT NOT NULL,
            skipped INTEGER NOT NULL DEFAULT 0,
            reason TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_mappings_old_id ON migration_mappings(old_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_mappings_new_id ON migration_mappings(new_id)")
        .execute(pool)
        .await?;

    domain::create_destination_tables(pool).await?;

    Ok(())
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse timestamp '{}': {}", value, e)))
}

pub(crate) fn parse_optional_timestamp(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_timestamp).transpose()
}

pub(crate) fn parse_uuid(value: &str) -> Result<uuid::Uuid> {
    uuid::Uuid::parse_str(value)
        .map_err(|e| Error::Internal(format!("Invalid UUID '{}': {}", value, e)))
}

/// `?, ?, ?` for an IN clause of `n` values
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}
