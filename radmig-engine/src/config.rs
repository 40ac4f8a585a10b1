//! Engine runtime settings derived from the TOML configuration

use radmig_common::config::TomlConfig;
use std::time::Duration;

/// Upper bound on concurrent media downloads
pub const MAX_CONCURRENCY: usize = 12;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Media ingestion worker count, 1..=12
    pub concurrency: usize,
    /// Timeout applied to each source fetch
    pub fetch_timeout: Duration,
    pub progress_queue_capacity: usize,
    pub progress_history: usize,
    /// Retry budget for job writes hitting "database is locked"
    pub max_lock_wait_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_toml(&TomlConfig::default())
    }
}

impl EngineConfig {
    pub fn from_toml(config: &TomlConfig) -> Self {
        let ingestion = &config.ingestion;
        Self {
            concurrency: clamp_concurrency(ingestion.concurrency),
            fetch_timeout: Duration::from_secs(ingestion.fetch_timeout_secs.max(1)),
            progress_queue_capacity: ingestion.progress_queue_capacity.max(1),
            progress_history: ingestion.progress_history,
            max_lock_wait_ms: config.database.max_lock_wait_ms,
        }
    }
}

pub fn clamp_concurrency(requested: usize) -> usize {
    requested.clamp(1, MAX_CONCURRENCY)
}
