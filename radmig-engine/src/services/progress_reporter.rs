//! Phase-weighted progress and ETA
//!
//! Every run owns one [`ProgressReporter`]. Snapshots leave through a
//! [`ProgressSink`], a bounded queue drained by a persister task. A full queue or a
//! gone persister drops the snapshot; reporting never blocks and never fails a run.

use radmig_common::human_time::format_remaining;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::models::{Phase, Progress};

/// Non-blocking producer side of the progress queue
#[derive(Clone)]
pub struct ProgressSink {
    tx: mpsc::Sender<Progress>,
}

impl ProgressSink {
    /// Bounded queue of `capacity` snapshots
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Progress>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Sink whose snapshots go nowhere (analysis helpers, tests)
    pub fn disconnected() -> Self {
        let (sink, _rx) = Self::channel(1);
        sink
    }

    /// Offer a snapshot; dropped if the queue is full or closed
    pub fn report(&self, progress: &Progress) {
        if let Err(e) = self.tx.try_send(progress.clone()) {
            if let mpsc::error::TrySendError::Full(_) = e {
                tracing::trace!("Progress queue full, dropping snapshot");
            }
        }
    }
}

/// Overall percentage for `completed` of `total` items inside `phase`'s band
pub fn phase_percentage(phase: Phase, completed: usize, total: usize) -> f64 {
    let (start, end) = phase.band();
    if total == 0 {
        return start;
    }
    let fraction = (completed.min(total) as f64) / (total as f64);
    start + (end - start) * fraction
}

/// `elapsed / completed × remaining`; `None` until something completed
pub fn estimate_remaining(elapsed: Duration, completed: usize, total: usize) -> Option<Duration> {
    if completed == 0 {
        return None;
    }
    let remaining = total.saturating_sub(completed) as u32;
    Some(elapsed / completed as u32 * remaining)
}

pub struct ProgressReporter {
    progress: Progress,
    sink: ProgressSink,
    phase_started: Instant,
    history_limit: usize,
}

impl ProgressReporter {
    pub fn new(sink: ProgressSink, history_limit: usize) -> Self {
        let progress = Progress {
            start_time: Some(chrono::Utc::now()),
            ..Progress::default()
        };
        Self {
            progress,
            sink,
            phase_started: Instant::now(),
            history_limit,
        }
    }

    /// Enter `phase` with `total` units of work
    pub fn begin_phase(&mut self, phase: Phase, total: usize, message: impl Into<String>) {
        let message = message.into();
        self.phase_started = Instant::now();
        self.progress.phase = phase;
        self.progress.total_steps = total;
        self.progress.completed_steps = 0;
        self.progress.percentage = phase_percentage(phase, 0, total);
        self.progress.estimated_remaining = format_remaining(None);
        self.progress.current_step = message.clone();
        self.progress.push_step(message, self.history_limit);
        self.publish();
    }

    /// `completed` units of the current phase are done
    pub fn advance(&mut self, completed: usize, message: impl Into<String>) {
        let total = self.progress.total_steps;
        self.progress.completed_steps = completed;
        self.progress.percentage = phase_percentage(self.progress.phase, completed, total);
        self.progress.estimated_remaining =
            format_remaining(estimate_remaining(self.phase_started.elapsed(), completed, total));
        self.progress.current_step = message.into();
        self.publish();
    }

    /// Number of `entity` items discovered
    pub fn set_total(&mut self, entity: &str, total: usize) {
        self.progress.totals.insert(entity.to_string(), total);
    }

    pub fn record_imported(&mut self, entity: &str, count: usize) {
        *self.progress.imported.entry(entity.to_string()).or_insert(0) += count;
    }

    pub fn finish(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.progress.phase = Phase::Finished;
        self.progress.percentage = 100.0;
        self.progress.estimated_remaining = "0s remaining".to_string();
        self.progress.current_step = message.clone();
        self.progress.push_step(message, self.history_limit);
        self.publish();
    }

    pub fn snapshot(&self) -> &Progress {
        &self.progress
    }

    pub fn into_progress(self) -> Progress {
        self.progress
    }

    fn publish(&self) {
        self.sink.report(&self.progress);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eta_undefined_before_first_item() {
        assert_eq!(estimate_remaining(Duration::from_secs(30), 0, 10), None);
        assert_eq!(format_remaining(None), "calculating…");
    }

    #[test]
    fn test_eta_one_of_ten_in_ten_seconds() {
        let eta = estimate_remaining(Duration::from_secs(10), 1, 10).unwrap();
        assert_eq!(eta, Duration::from_secs(90));
        assert_eq!(format_remaining(Some(eta)), "1m 30s remaining");
    }

    #[test]
    fn test_eta_zero_when_done() {
        assert_eq!(
            estimate_remaining(Duration::from_secs(10), 10, 10),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_phase_percentage_interpolates_within_band() {
        assert_eq!(phase_percentage(Phase::Media, 0, 10), 15.0);
        assert_eq!(phase_percentage(Phase::Media, 5, 10), 42.5);
        assert_eq!(phase_percentage(Phase::Media, 10, 10), 70.0);
        // Over-counting is clamped to the band
        assert_eq!(phase_percentage(Phase::Media, 12, 10), 70.0);
        assert_eq!(phase_percentage(Phase::Playlists, 0, 0), 70.0);
    }

    #[tokio::test]
    async fn test_reporter_publishes_and_never_blocks() {
        let (sink, mut rx) = ProgressSink::channel(2);
        let mut reporter = ProgressReporter::new(sink, 5);

        reporter.begin_phase(Phase::Media, 4, "Downloading media");
        for i in 1..=4 {
            reporter.advance(i, format!("media {i}/4"));
        }
        reporter.finish("Done");

        // Only the first two snapshots fit; the rest were dropped without blocking
        let first = rx.recv().await.unwrap();
        assert_eq!(first.phase, Phase::Media);
        assert_eq!(first.estimated_remaining, "calculating…");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.completed_steps, 1);
        assert!(rx.try_recv().is_err());

        assert_eq!(reporter.snapshot().percentage, 100.0);
        assert_eq!(reporter.snapshot().recent_steps.len(), 2);
    }

    #[test]
    fn test_disconnected_sink_is_silent() {
        let mut reporter = ProgressReporter::new(ProgressSink::disconnected(), 5);
        reporter.begin_phase(Phase::Stations, 1, "Stations");
        reporter.advance(1, "done");
        assert_eq!(reporter.snapshot().percentage, 15.0);
    }
}
