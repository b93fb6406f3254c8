//! Bounded extraction pool.
//!
//! A fixed number of OS threads pull [`ExtractionJob`]s from a bounded
//! channel. Submission blocks while the channel is full. Workers append their
//! own batch to a shared accumulator, which is read only after every worker
//! has been joined.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::bounded;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::{DateFilter, PipelineConfig};
use crate::error::PipelineError;
use crate::sync::jobs::{ExtractionJob, FolderBatch, JobReport};
use crate::sync::progress::{NoopProgress, ProgressEvent, ProgressReporter};
use crate::sync::source::MailboxSource;
use crate::sync::state::StateCell;
use crate::sync::worker::{ExtractionContext, cancelled_report, run_worker};

/// Result of draining every job.
#[derive(Debug, Default)]
pub struct ExtractionOutcome {
    /// Successful batches, in job order. Empty when cancelled.
    pub batches: Vec<FolderBatch>,
    /// One terminal report per job, in job order.
    pub reports: Vec<JobReport>,
    pub cancelled: bool,
}

pub struct ExtractionScheduler {
    source: Arc<dyn MailboxSource>,
    max_workers: usize,
    queue_capacity: usize,
    retry_budget: u32,
    retry_delay: Duration,
    fetch_timeout: Duration,
    date_filter: Option<DateFilter>,
    max_emails: Option<usize>,
    cancel: CancellationToken,
    state: Arc<StateCell>,
    progress: Arc<dyn ProgressReporter>,
}

impl ExtractionScheduler {
    pub fn new(config: &PipelineConfig, source: Arc<dyn MailboxSource>) -> Self {
        Self {
            source,
            max_workers: config.max_workers.max(1),
            queue_capacity: config.queue_capacity.max(1),
            retry_budget: config.retry_budget,
            retry_delay: config.retry_delay,
            fetch_timeout: config.fetch_timeout,
            date_filter: config.date_filter,
            max_emails: config.max_emails,
            cancel: CancellationToken::new(),
            state: Arc::new(StateCell::new()),
            progress: Arc::new(NoopProgress),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_state(mut self, state: Arc<StateCell>) -> Self {
        self.state = state;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Run every job to a terminal status. Blocks the calling thread.
    pub fn run(&self, jobs: Vec<ExtractionJob>, scan_time: DateTime<Utc>) -> Result<ExtractionOutcome, PipelineError> {
        if jobs.is_empty() {
            return Ok(ExtractionOutcome::default());
        }

        let worker_count = self.max_workers.min(jobs.len());
        let date_window = self.date_filter.map(|filter| filter.window(scan_time));
        if let Some(window) = &date_window {
            log::info!("extracting messages sent from {} to {}", window.start, window.end);
        }
        let ctx = Arc::new(ExtractionContext {
            source: Arc::clone(&self.source),
            retry_budget: self.retry_budget,
            retry_delay: self.retry_delay,
            fetch_timeout: self.fetch_timeout,
            date_window,
            max_emails: self.max_emails,
            cancel: self.cancel.clone(),
            state: Arc::clone(&self.state),
            progress: Arc::clone(&self.progress),
            scan_time,
            results: Mutex::new(Vec::new()),
            reports: Mutex::new(Vec::new()),
            completed: AtomicUsize::new(0),
            jobs_total: jobs.len(),
        });

        let (job_sender, job_receiver) = bounded::<ExtractionJob>(self.queue_capacity);
        let mut workers: Vec<JoinHandle<()>> = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let worker_ctx = Arc::clone(&ctx);
            let spawned = thread::Builder::new()
                .name(format!("extract-worker-{}", worker_id))
                .spawn(move || run_worker(worker_id, job_rx, worker_ctx));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(source) => {
                    log::error!("failed to start worker {}: {}", worker_id, source);
                    drop(job_sender);
                    // Started workers see a closed channel and exit.
                    let _ = join_workers(workers);
                    return Err(PipelineError::WorkerSpawn { worker_id, source });
                }
            }
        }
        drop(job_receiver);
        log::info!("started {} extraction workers for {} jobs", worker_count, ctx.jobs_total);

        let mut pending = jobs.into_iter();
        let mut unsubmitted = Vec::new();
        for job in pending.by_ref() {
            if self.cancel.is_cancelled() {
                unsubmitted.push(job);
                break;
            }
            let (job_id, folder_pattern) = (job.id, job.folder_pattern.clone());
            if let Err(err) = job_sender.send(job) {
                unsubmitted.push(err.into_inner());
                break;
            }
            log::debug!("job {}: queued ({})", job_id, folder_pattern);
            self.progress.report(ProgressEvent::JobQueued { job_id, folder_pattern });
        }
        unsubmitted.extend(pending);
        drop(job_sender);

        // Barrier: no worker touches the accumulator after this point.
        join_workers(workers)?;

        for job in &unsubmitted {
            ctx.finish_job(cancelled_report(job, 0), None);
        }

        let mut reports = std::mem::take(&mut *ctx.reports.lock());
        reports.sort_by_key(|report| report.job_id);

        let cancelled = self.cancel.is_cancelled();
        let mut batches = std::mem::take(&mut *ctx.results.lock());
        if cancelled {
            log::info!("extraction cancelled, discarding {} partial batches", batches.len());
            batches.clear();
        } else {
            batches.sort_by_key(|batch| batch.job_id);
        }

        Ok(ExtractionOutcome {
            batches,
            reports,
            cancelled,
        })
    }
}

/// Join every worker, reporting the first one that panicked.
fn join_workers(workers: Vec<JoinHandle<()>>) -> Result<(), PipelineError> {
    let mut first_panic = None;
    for (worker_id, worker) in workers.into_iter().enumerate() {
        if worker.join().is_err() {
            log::error!("worker {} panicked", worker_id);
            first_panic.get_or_insert(worker_id);
        }
    }
    match first_panic {
        Some(worker_id) => Err(PipelineError::WorkerPanicked { worker_id }),
        None => Ok(()),
    }
}
