//! Migration job model and lifecycle state machine
//!
//! Direct jobs: `Pending → Validating → Running → {Completed | Failed | Cancelled}`.
//! Staged jobs: `Analyzing → Staged → Running → {Completed | Failed}`.
//! `RolledBack` follows any terminal state through an explicit rollback.

use chrono::{DateTime, Utc};
use radmig_common::ValidationErrors;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::{AnomalyReport, ImportResult, ImportedItems, Progress};

/// Job lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Validating,
    Analyzing,
    Staged,
    Running,
    Completed,
    Failed,
    Cancelled,
    RolledBack,
}

impl JobStatus {
    pub const ALL: [JobStatus; 9] = [
        JobStatus::Pending,
        JobStatus::Validating,
        JobStatus::Analyzing,
        JobStatus::Staged,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
        JobStatus::RolledBack,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Validating => "validating",
            JobStatus::Analyzing => "analyzing",
            JobStatus::Staged => "staged",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::RolledBack => "rolled_back",
        }
    }

    pub fn parse(s: &str) -> Option<JobStatus> {
        JobStatus::ALL.into_iter().find(|st| st.as_str() == s)
    }

    /// Allowed edges of the lifecycle graph
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Validating | Cancelled | Failed)
                | (Validating, Running | Failed | Cancelled)
                | (Analyzing, Staged | Failed | Cancelled)
                | (Staged, Running | Failed | Cancelled)
                | (Running, Completed | Failed | Cancelled)
                | (Completed | Failed | Cancelled, RolledBack)
        )
    }

    /// Whether a conditional write may move a row from `self` to `next`.
    ///
    /// Besides the lifecycle edges, two same-state rewrites exist: claiming a
    /// staged analysis (`analyzing`) and a cancelled run recording what it created
    /// (`cancelled`).
    pub fn accepts_write(&self, next: JobStatus) -> bool {
        self.can_transition_to(next)
            || (*self == next && matches!(next, JobStatus::Analyzing | JobStatus::Cancelled))
    }

    /// Completed, Failed, Cancelled or RolledBack
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled | JobStatus::RolledBack
        )
    }

    /// A run task may currently be executing for this job
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            JobStatus::Validating | JobStatus::Analyzing | JobStatus::Running
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direct import or staged review-then-commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowMode {
    Direct,
    Staged,
}

impl WorkflowMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowMode::Direct => "direct",
            WorkflowMode::Staged => "staged",
        }
    }

    pub fn parse(s: &str) -> Option<WorkflowMode> {
        match s {
            "direct" => Some(WorkflowMode::Direct),
            "staged" => Some(WorkflowMode::Staged),
            _ => None,
        }
    }

    /// Status a freshly created job starts in
    pub fn initial_status(&self) -> JobStatus {
        match self {
            WorkflowMode::Direct => JobStatus::Pending,
            WorkflowMode::Staged => JobStatus::Analyzing,
        }
    }
}

/// Source-system key under which an adapter is registered (e.g. `archive`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceType(pub String);

impl SourceType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where and how to reach the source system
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConnection {
    /// Local backup archive (gzip tar)
    pub archive_path: Option<String>,
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Options snapshot stored with the job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobOptions {
    pub source: SourceConnection,
    /// Import everything into this existing destination station
    pub target_station_id: Option<String>,
    /// Destination user recorded as owner of created entities
    pub importing_user_id: Option<String>,
    pub skip_media: bool,
    pub skip_playlists: bool,
    pub skip_schedules: bool,
    pub skip_users: bool,
    pub skip_webstreams: bool,
    /// Fail the job when imported media lacks duration metadata
    pub strict_duration_verification: bool,
}

impl JobOptions {
    /// Engine-level checks shared by every source type; adapters add their own
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();

        if let Some(target) = &self.target_station_id {
            if target.trim().is_empty() {
                errors.add("target_station_id", "must not be blank when provided");
            }
        }
        if let Some(url) = &self.source.api_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                errors.add("source.api_url", "must be an http(s) URL");
            }
        }
        if self.source.username.is_some() != self.source.password.is_some() {
            errors.add(
                "source.password",
                "username and password must be supplied together",
            );
        }

        errors
    }
}

/// A migration job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub source_type: SourceType,
    pub mode: WorkflowMode,
    pub status: JobStatus,
    pub options: JobOptions,
    pub progress: Progress,
    pub result: Option<ImportResult>,
    pub anomaly_report: Option<AnomalyReport>,
    pub imported_items: Option<ImportedItems>,
    pub staged_import_id: Option<Uuid>,
    /// Job this one re-runs
    pub redo_of_job_id: Option<Uuid>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// New job in the initial status for `mode`
    pub fn new(source_type: SourceType, mode: WorkflowMode, options: JobOptions) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            source_type,
            mode,
            status: mode.initial_status(),
            options,
            progress: Progress::default(),
            result: None,
            anomaly_report: None,
            imported_items: None,
            staged_import_id: None,
            redo_of_job_id: None,
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Fresh job re-running this one's source and options
    pub fn redo(&self) -> Self {
        let mut job = Job::new(self.source_type.clone(), self.mode, self.options.clone());
        job.redo_of_job_id = Some(self.id);
        job
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
