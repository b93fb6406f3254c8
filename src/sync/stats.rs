//! Run statistics.
//!
//! Per-message and per-job failures are not errors at the run level; they
//! are folded into these counters and reported alongside the result.

use serde::{Deserialize, Serialize};

use crate::sync::jobs::{FolderBatch, JobReport, JobStatus};
use crate::sync::state::RunState;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub messages_fetched: usize,
    pub messages_normalized: usize,
    /// Malformed messages dropped during normalization.
    pub messages_dropped: usize,
    /// Messages outside the configured date window.
    pub messages_filtered: usize,
    pub duplicates_merged: usize,
    /// Extra fetch attempts across all jobs.
    pub retries: u32,
    pub jobs_total: usize,
    pub jobs_succeeded: usize,
    pub jobs_failed: usize,
    pub jobs_cancelled: usize,
    pub conversations: usize,
    pub cycles_broken: usize,
}

impl RunStats {
    /// Fold a successful folder batch into the totals.
    pub fn record_batch(&mut self, batch: &FolderBatch) {
        self.messages_fetched += batch.fetched;
        self.messages_normalized += batch.emails.len();
        self.messages_dropped += batch.dropped;
        self.messages_filtered += batch.filtered;
    }

    pub fn record_job(&mut self, report: &JobReport) {
        self.retries += report.attempts.saturating_sub(1);
        match report.status {
            JobStatus::Succeeded => self.jobs_succeeded += 1,
            JobStatus::Failed => self.jobs_failed += 1,
            JobStatus::Cancelled => self.jobs_cancelled += 1,
        }
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub state: RunState,
    pub stats: RunStats,
    /// One entry per job, in job order.
    pub jobs: Vec<JobReport>,
}

impl RunReport {
    pub fn failed_jobs(&self) -> impl Iterator<Item = &JobReport> {
        self.jobs.iter().filter(|job| job.status == JobStatus::Failed)
    }
}
