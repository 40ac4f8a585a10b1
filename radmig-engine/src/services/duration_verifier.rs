//! Post-commit duration verification
//!
//! Media without a usable duration breaks scheduling downstream. By default the
//! count is reported as a skip counter plus a warning; strict mode fails the job.
//! Entities already created stay in place either way.

use radmig_common::Result;
use uuid::Uuid;

use crate::models::ImportResult;
use crate::storage::DomainStore;

pub const DURATION_SKIP_KEY: &str = "media_duration_zero";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DurationVerdict {
    Clean,
    /// Recorded as an anomaly; the job still completes
    Flagged(usize),
    /// Strict mode: the job must fail with this message
    Failed(String),
}

pub async fn verify_durations(
    store: &dyn DomainStore,
    job_id: Uuid,
    strict: bool,
    result: &mut ImportResult,
) -> Result<DurationVerdict> {
    let zero = store.count_zero_duration_media(job_id).await?;
    if zero == 0 {
        return Ok(DurationVerdict::Clean);
    }

    let message = format!(
        "Duration verification: {} imported media items have zero/missing duration",
        zero
    );
    result.skip_n(DURATION_SKIP_KEY, zero);
    result.warn(message.clone());

    if strict {
        tracing::error!(
            job_id = %job_id,
            zero_duration = zero,
            "Strict duration verification failed"
        );
        return Ok(DurationVerdict::Failed(message));
    }

    tracing::warn!(job_id = %job_id, zero_duration = zero, "Imported media with missing duration");
    Ok(DurationVerdict::Flagged(zero))
}
