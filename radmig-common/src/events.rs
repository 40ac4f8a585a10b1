//! Event types for the migration event bus
//!
//! Events are notifications only. Emission is lossy: a run never waits on or fails
//! because of a missing subscriber.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Migration lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MigrationEvent {
    /// A job record was persisted
    JobCreated {
        job_id: Uuid,
        source_type: String,
        mode: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A job moved between lifecycle states
    JobStatusChanged {
        job_id: Uuid,
        old_status: String,
        new_status: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Progress snapshot (high frequency, safe to drop)
    JobProgress {
        job_id: Uuid,
        phase: String,
        percentage: f64,
        current_step: String,
        estimated_remaining: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Staged analysis finished and the snapshot is ready for review
    StagedImportReady {
        job_id: Uuid,
        staged_import_id: Uuid,
        item_count: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Job completed successfully
    JobCompleted {
        job_id: Uuid,
        created_total: usize,
        skipped_total: usize,
        duration_seconds: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Job failed
    JobFailed {
        job_id: Uuid,
        error: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl MigrationEvent {
    /// Event type name, matching the serde tag
    pub fn event_type(&self) -> &str {
        match self {
            MigrationEvent::JobCreated { .. } => "JobCreated",
            MigrationEvent::JobStatusChanged { .. } => "JobStatusChanged",
            MigrationEvent::JobProgress { .. } => "JobProgress",
            MigrationEvent::StagedImportReady { .. } => "StagedImportReady",
            MigrationEvent::JobCompleted { .. } => "JobCompleted",
            MigrationEvent::JobFailed { .. } => "JobFailed",
        }
    }

    pub fn job_id(&self) -> Uuid {
        match self {
            MigrationEvent::JobCreated { job_id, .. }
            | MigrationEvent::JobStatusChanged { job_id, .. }
            | MigrationEvent::JobProgress { job_id, .. }
            | MigrationEvent::StagedImportReady { job_id, .. }
            | MigrationEvent::JobCompleted { job_id, .. }
            | MigrationEvent::JobFailed { job_id, .. } => *job_id,
        }
    }
}

/// Broadcast bus for migration events
///
/// Cloning is cheap; all clones share the same channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MigrationEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus; `capacity` events are buffered before the oldest are dropped
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<MigrationEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: MigrationEvent,
    ) -> Result<usize, broadcast::error::SendError<MigrationEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: MigrationEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
