//! Migration job persistence
//!
//! Status changes are conditional updates (`WHERE status = ?`). That is how
//! concurrent starts are arbitrated and how a cancelled or deleted job is kept from
//! being overwritten by a run that is still finishing: the write simply matches no
//! row.

use chrono::Utc;
use radmig_common::{Error, Result};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

use super::{parse_optional_timestamp, parse_timestamp, parse_uuid, placeholders};
use crate::models::{
    AnomalyReport, ImportResult, ImportedItems, Job, JobStatus, Progress, SourceType,
    WorkflowMode,
};
use crate::utils::retry_on_lock;

/// Final state written when a run ends
#[derive(Debug, Clone, Default)]
pub struct JobFinish {
    pub progress: Option<Progress>,
    pub result: Option<ImportResult>,
    pub anomaly_report: Option<AnomalyReport>,
    pub imported_items: Option<ImportedItems>,
    pub error: Option<String>,
}

/// Refuse a write whose edge is not in the lifecycle graph
fn check_edges(from: &[JobStatus], to: JobStatus) -> Result<()> {
    match from.iter().find(|status| !status.accepts_write(to)) {
        Some(bad) => Err(Error::InvalidState(format!(
            "Illegal job status change {} -> {}",
            bad, to
        ))),
        None => Ok(()),
    }
}

/// Insert a new job row
pub async fn insert_job(pool: &SqlitePool, job: &Job) -> Result<()> {
    let options = serde_json::to_string(&job.options)?;
    let progress = serde_json::to_string(&job.progress)?;

    sqlx::query(
        r#"
        INSERT INTO migration_jobs (
            id, source_type, mode, status, options, progress,
            staged_import_id, redo_of_job_id, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(job.id.to_string())
    .bind(job.source_type.as_str())
    .bind(job.mode.as_str())
    .bind(job.status.as_str())
    .bind(options)
    .bind(progress)
    .bind(job.staged_import_id.map(|id| id.to_string()))
    .bind(job.redo_of_job_id.map(|id| id.to_string()))
    .bind(job.created_at.to_rfc3339())
    .bind(job.updated_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Claim a job for its run: `expected → next`, only if nobody started it yet.
///
/// Returns `false` when another caller won the race (or the job is gone).
pub async fn claim_for_run(
    pool: &SqlitePool,
    job_id: Uuid,
    expected: JobStatus,
    next: JobStatus,
    max_wait_ms: u64,
) -> Result<bool> {
    check_edges(&[expected], next)?;
    let id = job_id.to_string();
    let now = Utc::now().to_rfc3339();

    retry_on_lock("claim_job", max_wait_ms, || async {
        let result = sqlx::query(
            r#"
            UPDATE migration_jobs
            SET status = ?, started_at = ?, updated_at = ?
            WHERE id = ? AND status = ? AND started_at IS NULL
            "#,
        )
        .bind(next.as_str())
        .bind(&now)
        .bind(&now)
        .bind(&id)
        .bind(expected.as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    })
    .await
}

/// Conditional status change from any of `from` to `to`
pub async fn transition(
    pool: &SqlitePool,
    job_id: Uuid,
    from: &[JobStatus],
    to: JobStatus,
    error: Option<&str>,
    max_wait_ms: u64,
) -> Result<bool> {
    check_edges(from, to)?;
    let id = job_id.to_string();
    let now = Utc::now().to_rfc3339();
    let completed_at = to.is_terminal().then(|| now.clone());
    let sql = format!(
        r#"
        UPDATE migration_jobs
        SET status = ?, error = COALESCE(?, error), updated_at = ?,
            completed_at = COALESCE(?, completed_at)
        WHERE id = ? AND status IN ({})
        "#,
        placeholders(from.len())
    );

    retry_on_lock("transition_job", max_wait_ms, || async {
        let mut query = sqlx::query(&sql)
            .bind(to.as_str())
            .bind(error)
            .bind(&now)
            .bind(&completed_at)
            .bind(&id);
        for status in from {
            query = query.bind(status.as_str());
        }
        let result = query.execute(pool).await?;
        Ok(result.rows_affected() == 1)
    })
    .await
}

/// Link the staged snapshot and move `analyzing → staged`
pub async fn mark_staged(
    pool: &SqlitePool,
    job_id: Uuid,
    staged_import_id: Uuid,
    progress: &Progress,
) -> Result<bool> {
    let now = Utc::now().to_rfc3339();
    let result = sqlx::query(
        r#"
        UPDATE migration_jobs
        SET status = ?, staged_import_id = ?, progress = ?, updated_at = ?
        WHERE id = ? AND status = ?
        "#,
    )
    .bind(JobStatus::Staged.as_str())
    .bind(staged_import_id.to_string())
    .bind(serde_json::to_string(progress)?)
    .bind(&now)
    .bind(job_id.to_string())
    .bind(JobStatus::Analyzing.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Best-effort progress write; ignored once the job left its active states
pub async fn update_progress(pool: &SqlitePool, job_id: Uuid, progress: &Progress) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE migration_jobs
        SET progress = ?, updated_at = ?
        WHERE id = ? AND status IN ('validating', 'analyzing', 'running')
        "#,
    )
    .bind(serde_json::to_string(progress)?)
    .bind(Utc::now().to_rfc3339())
    .bind(job_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Write the final state of a run, conditional on the job still being in `from`
pub async fn finish_job(
    pool: &SqlitePool,
    job_id: Uuid,
    from: JobStatus,
    to: JobStatus,
    finish: &JobFinish,
    max_wait_ms: u64,
) -> Result<bool> {
    check_edges(&[from], to)?;
    // Serialize before touching the database
    let id = job_id.to_string();
    let now = Utc::now().to_rfc3339();
    let progress = finish.progress.as_ref().map(serde_json::to_string).transpose()?;
    let result = finish.result.as_ref().map(serde_json::to_string).transpose()?;
    let anomaly = finish
        .anomaly_report
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let imported = finish
        .imported_items
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    retry_on_lock("finish_job", max_wait_ms, || async {
        let result = sqlx::query(
            r#"
            UPDATE migration_jobs
            SET status = ?,
                progress = COALESCE(?, progress),
                result = COALESCE(?, result),
                anomaly_report = COALESCE(?, anomaly_report),
                imported_items = COALESCE(?, imported_items),
                error = ?,
                updated_at = ?,
                completed_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(to.as_str())
        .bind(&progress)
        .bind(&result)
        .bind(&anomaly)
        .bind(&imported)
        .bind(&finish.error)
        .bind(&now)
        .bind(to.is_terminal().then(|| now.clone()))
        .bind(&id)
        .bind(from.as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    })
    .await
}

pub async fn load_job(pool: &SqlitePool, job_id: Uuid) -> Result<Option<Job>> {
    let row = sqlx::query("SELECT * FROM migration_jobs WHERE id = ?")
        .bind(job_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_job).transpose()
}

/// All jobs, newest first
pub async fn list_jobs(pool: &SqlitePool) -> Result<Vec<Job>> {
    let rows = sqlx::query("SELECT * FROM migration_jobs ORDER BY created_at DESC")
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_job).collect()
}

pub async fn list_jobs_by_status(pool: &SqlitePool, statuses: &[JobStatus]) -> Result<Vec<Job>> {
    let sql = format!(
        "SELECT * FROM migration_jobs WHERE status IN ({}) ORDER BY created_at",
        placeholders(statuses.len())
    );
    let mut query = sqlx::query(&sql);
    for status in statuses {
        query = query.bind(status.as_str());
    }
    let rows = query.fetch_all(pool).await?;

    rows.iter().map(row_to_job).collect()
}

/// Delete a job that is not `running`.
///
/// Returns `false` when no such job existed or it is running.
pub async fn delete_job(pool: &SqlitePool, job_id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM migration_jobs WHERE id = ? AND status != ?")
        .bind(job_id.to_string())
        .bind(JobStatus::Running.as_str())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

fn row_to_job(row: &SqliteRow) -> Result<Job> {
    let id: String = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let mode: String = row.try_get("mode")?;
    let options: String = row.try_get("options")?;
    let progress: String = row.try_get("progress")?;
    let result: Option<String> = row.try_get("result")?;
    let anomaly: Option<String> = row.try_get("anomaly_report")?;
    let imported: Option<String> = row.try_get("imported_items")?;
    let staged_import_id: Option<String> = row.try_get("staged_import_id")?;
    let redo_of_job_id: Option<String> = row.try_get("redo_of_job_id")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Job {
        id: parse_uuid(&id)?,
        source_type: SourceType::new(row.try_get::<String, _>("source_type")?),
        mode: WorkflowMode::parse(&mode).ok_or_else(|| {
            radmig_common::Error::Internal(format!("Unknown workflow mode: {}", mode))
        })?,
        status: JobStatus::parse(&status).ok_or_else(|| {
            radmig_common::Error::Internal(format!("Unknown job status: {}", status))
        })?,
        options: serde_json::from_str(&options)?,
        progress: serde_json::from_str(&progress)?,
        result: result.as_deref().map(serde_json::from_str).transpose()?,
        anomaly_report: anomaly.as_deref().map(serde_json::from_str).transpose()?,
        imported_items: imported.as_deref().map(serde_json::from_str).transpose()?,
        staged_import_id: staged_import_id.as_deref().map(parse_uuid).transpose()?,
        redo_of_job_id: redo_of_job_id.as_deref().map(parse_uuid).transpose()?,
        error: row.try_get("error")?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
        started_at: parse_optional_timestamp(row.try_get("started_at")?)?,
        completed_at: parse_optional_timestamp(row.try_get("completed_at")?)?,
    })
}
