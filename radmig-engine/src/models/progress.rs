//! Progress snapshot for a running job
//!
//! Overwritten frequently and persisted best-effort. `recent_steps` keeps a short
//! rolling history so a client attaching late can replay what happened.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;

/// Named run phases, each owning a fixed band of the overall percentage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Initializing,
    Validating,
    Analyzing,
    Stations,
    Media,
    Playlists,
    SmartBlocks,
    Shows,
    Webstreams,
    Users,
    Verifying,
    Finished,
}

impl Phase {
    /// `(start, end)` percentage band
    pub fn band(&self) -> (f64, f64) {
        match self {
            Phase::Initializing => (0.0, 0.0),
            Phase::Validating => (0.0, 5.0),
            Phase::Analyzing => (5.0, 10.0),
            Phase::Stations => (10.0, 15.0),
            Phase::Media => (15.0, 70.0),
            Phase::Playlists => (70.0, 78.0),
            Phase::SmartBlocks => (78.0, 82.0),
            Phase::Shows => (82.0, 90.0),
            Phase::Webstreams => (90.0, 93.0),
            Phase::Users => (93.0, 96.0),
            Phase::Verifying => (96.0, 100.0),
            Phase::Finished => (100.0, 100.0),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Initializing => "initializing",
            Phase::Validating => "validating",
            Phase::Analyzing => "analyzing",
            Phase::Stations => "stations",
            Phase::Media => "media",
            Phase::Playlists => "playlists",
            Phase::SmartBlocks => "smart_blocks",
            Phase::Shows => "shows",
            Phase::Webstreams => "webstreams",
            Phase::Users => "users",
            Phase::Verifying => "verifying",
            Phase::Finished => "finished",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the rolling step history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressStep {
    pub phase: Phase,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    pub phase: Phase,
    pub current_step: String,
    pub total_steps: usize,
    pub completed_steps: usize,
    /// Items discovered per entity type (media, playlists, ...)
    pub totals: BTreeMap<String, usize>,
    /// Items imported so far per entity type
    pub imported: BTreeMap<String, usize>,
    /// 0.0 - 100.0
    pub percentage: f64,
    pub estimated_remaining: String,
    pub start_time: Option<DateTime<Utc>>,
    pub recent_steps: VecDeque<ProgressStep>,
}

impl Default for Progress {
    fn default() -> Self {
        Self {
            phase: Phase::Initializing,
            current_step: "Initializing...".to_string(),
            total_steps: 0,
            completed_steps: 0,
            totals: BTreeMap::new(),
            imported: BTreeMap::new(),
            percentage: 0.0,
            estimated_remaining: radmig_common::human_time::CALCULATING.to_string(),
            start_time: None,
            recent_steps: VecDeque::new(),
        }
    }
}

impl Progress {
    /// Append to the history, evicting the oldest entries beyond `limit`
    pub fn push_step(&mut self, message: impl Into<String>, limit: usize) {
        self.recent_steps.push_back(ProgressStep {
            phase: self.phase,
            message: message.into(),
            at: Utc::now(),
        });
        while self.recent_steps.len() > limit {
            self.recent_steps.pop_front();
        }
    }
}
