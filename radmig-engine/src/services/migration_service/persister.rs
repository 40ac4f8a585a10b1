//! Progress persistence task
//!
//! Drains a run's progress queue into the job row and re-broadcasts each snapshot
//! as a lossy `JobProgress` event. The run itself only ever `try_send`s into the
//! queue, so a slow database never stalls ingestion.

use chrono::Utc;
use radmig_common::events::{EventBus, MigrationEvent};
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::db;
use crate::models::Progress;

/// Spawn the persister for `job_id`; it exits once every sender is dropped
pub(super) fn spawn_progress_persister(
    db: SqlitePool,
    event_bus: EventBus,
    job_id: Uuid,
    mut rx: mpsc::Receiver<Progress>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut written = 0usize;
        while let Some(progress) = rx.recv().await {
            match db::jobs::update_progress(&db, job_id, &progress).await {
                Ok(true) => written += 1,
                Ok(false) => {
                    // Job finished, was cancelled or deleted; keep draining
                    tracing::trace!(job_id = %job_id, "Progress write matched no active job");
                }
                Err(e) => {
                    tracing::warn!(job_id = %job_id, error = %e, "Failed to persist progress");
                }
            }

            event_bus.emit_lossy(MigrationEvent::JobProgress {
                job_id,
                phase: progress.phase.to_string(),
                percentage: progress.percentage,
                current_step: progress.current_step.clone(),
                estimated_remaining: progress.estimated_remaining.clone(),
                timestamp: Utc::now(),
            });
        }
        tracing::debug!(job_id = %job_id, written, "Progress persister stopped");
    })
}
