//! Extraction worker: fetches one folder per job, normalizes its messages
//! and hands the batch to the shared accumulator.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::DateWindow;
use crate::error::FetchError;
use crate::sync::jobs::{ExtractionJob, FolderBatch, JobReport, JobStatus};
use crate::sync::parser::normalize;
use crate::sync::progress::{ProgressEvent, ProgressReporter};
use crate::sync::source::MailboxSource;
use crate::sync::state::{RunState, StateCell};

const SLEEP_SLICE: Duration = Duration::from_millis(25);

/// Everything a worker shares with its siblings and the scheduler.
pub(crate) struct ExtractionContext {
    pub source: Arc<dyn MailboxSource>,
    pub retry_budget: u32,
    pub retry_delay: Duration,
    pub fetch_timeout: Duration,
    pub date_window: Option<DateWindow>,
    pub max_emails: Option<usize>,
    pub cancel: CancellationToken,
    pub state: Arc<StateCell>,
    pub progress: Arc<dyn ProgressReporter>,
    /// Reference time for messages without a usable timestamp.
    pub scan_time: DateTime<Utc>,
    pub results: Mutex<Vec<FolderBatch>>,
    pub reports: Mutex<Vec<JobReport>>,
    pub completed: AtomicUsize,
    pub jobs_total: usize,
}

impl ExtractionContext {
    /// Record a terminal job report and emit progress.
    pub fn finish_job(&self, report: JobReport, batch: Option<FolderBatch>) {
        if let Some(batch) = batch {
            self.results.lock().push(batch);
        }
        let jobs_completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        self.progress.report(ProgressEvent::JobFinished {
            job_id: report.job_id,
            folder_pattern: report.folder_pattern.clone(),
            status: report.status,
            jobs_completed,
            jobs_total: self.jobs_total,
        });
        self.reports.lock().push(report);
    }
}

enum Attempt {
    Completed(FolderBatch),
    Cancelled,
}

pub(crate) fn run_worker(worker_id: usize, job_receiver: Receiver<ExtractionJob>, ctx: Arc<ExtractionContext>) {
    log::debug!("worker {} started", worker_id);

    // Keep draining after cancellation so blocked submitters wake up and
    // every job still gets a terminal report.
    while let Ok(job) = job_receiver.recv() {
        if ctx.cancel.is_cancelled() {
            ctx.finish_job(cancelled_report(&job, 0), None);
            continue;
        }
        log::debug!("worker {} processing job {} ({})", worker_id, job.id, job.folder_pattern);
        let (report, batch) = process_job(&ctx, &job);
        ctx.finish_job(report, batch);
    }

    log::debug!("worker {} stopped", worker_id);
}

pub(crate) fn cancelled_report(job: &ExtractionJob, attempts: u32) -> JobReport {
    JobReport {
        job_id: job.id,
        folder_pattern: job.folder_pattern.clone(),
        status: JobStatus::Cancelled,
        attempts,
        error_message: None,
    }
}

/// Run one job to a terminal status, retrying transient fetch failures.
fn process_job(ctx: &ExtractionContext, job: &ExtractionJob) -> (JobReport, Option<FolderBatch>) {
    let mut attempts = 0u32;

    loop {
        if ctx.cancel.is_cancelled() {
            return (cancelled_report(job, attempts), None);
        }
        attempts += 1;

        match fetch_attempt(ctx, job) {
            Ok(Attempt::Completed(batch)) => {
                log::info!(
                    "job {}: fetched {} messages from {} ({} normalized, {} dropped, {} outside date window)",
                    job.id,
                    batch.fetched,
                    job.folder_pattern,
                    batch.emails.len(),
                    batch.dropped,
                    batch.filtered
                );
                let report = JobReport {
                    job_id: job.id,
                    folder_pattern: job.folder_pattern.clone(),
                    status: JobStatus::Succeeded,
                    attempts,
                    error_message: None,
                };
                return (report, Some(batch));
            }
            Ok(Attempt::Cancelled) => {
                log::info!("job {}: cancelled mid-folder, partial batch discarded", job.id);
                return (cancelled_report(job, attempts), None);
            }
            Err(err) if err.is_transient() && attempts <= ctx.retry_budget => {
                let delay = retry_backoff(ctx.retry_delay, attempts);
                log::warn!(
                    "job {}: attempt {} failed ({}), retrying in {:?}",
                    job.id,
                    attempts,
                    err,
                    delay
                );
                if !sleep_unless_cancelled(&ctx.cancel, delay) {
                    return (cancelled_report(job, attempts), None);
                }
            }
            Err(err) => {
                log::warn!("job {}: failed after {} attempt(s): {}", job.id, attempts, err);
                let report = JobReport {
                    job_id: job.id,
                    folder_pattern: job.folder_pattern.clone(),
                    status: JobStatus::Failed,
                    attempts,
                    error_message: Some(err.to_string()),
                };
                return (report, None);
            }
        }
    }
}

/// Linear backoff, saturating instead of overflowing.
fn retry_backoff(delay: Duration, attempt: u32) -> Duration {
    delay.saturating_mul(attempt)
}

/// Fetch and normalize the whole folder once. A fresh batch per attempt.
///
/// Cancellation is checked before each message is pulled, so a cancelled job
/// finishes the message in hand and reads no further.
fn fetch_attempt(ctx: &ExtractionContext, job: &ExtractionJob) -> Result<Attempt, FetchError> {
    let mut stream = ctx.source.fetch_folder(&job.folder_pattern, ctx.fetch_timeout)?;
    let mut batch = FolderBatch {
        job_id: job.id,
        folder_pattern: job.folder_pattern.clone(),
        emails: Vec::new(),
        fetched: 0,
        dropped: 0,
        filtered: 0,
    };

    loop {
        if ctx.cancel.is_cancelled() {
            return Ok(Attempt::Cancelled);
        }
        if let Some(cap) = ctx.max_emails.filter(|&cap| batch.emails.len() >= cap) {
            log::info!("job {}: reached the limit of {} messages", job.id, cap);
            break;
        }
        let Some(item) = stream.next() else { break };
        let raw = item?;
        batch.fetched += 1;

        match normalize(raw, ctx.scan_time) {
            Ok(email) => {
                if ctx.state.advance(RunState::Fetching, RunState::Normalizing) {
                    ctx.progress.report(ProgressEvent::Phase {
                        state: RunState::Normalizing,
                    });
                }
                let outside = ctx
                    .date_window
                    .is_some_and(|window| !email.timestamp_inferred && !window.contains(email.sent_at));
                if outside {
                    log::trace!("job {}: {} is outside the date window", job.id, email.id);
                    batch.filtered += 1;
                    continue;
                }
                log::trace!("job {}: normalized {}", job.id, email.id);
                batch.emails.push(email);
            }
            Err(err) => {
                log::warn!("job {}: dropping message: {}", job.id, err);
                batch.dropped += 1;
            }
        }
    }

    Ok(Attempt::Completed(batch))
}

/// Sleep in short slices; returns false if cancelled before the delay elapsed.
fn sleep_unless_cancelled(cancel: &CancellationToken, delay: Duration) -> bool {
    let mut remaining = delay;
    while !remaining.is_zero() {
        if cancel.is_cancelled() {
            return false;
        }
        let slice = remaining.min(SLEEP_SLICE);
        thread::sleep(slice);
        remaining -= slice;
    }
    !cancel.is_cancelled()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DateFilter;
    use crate::models::RawMessage;
    use crate::sync::progress::NoopProgress;
    use crate::sync::source::MessageStream;
    use std::sync::atomic::AtomicU32;

    /// Fails the first `failures` fetches, then yields `messages`.
    struct FlakySource {
        failures: u32,
        calls: AtomicU32,
        permanent: bool,
        messages: Vec<RawMessage>,
    }

    impl MailboxSource for FlakySource {
        fn fetch_folder(&self, pattern: &str, _timeout: Duration) -> Result<MessageStream<'_>, FetchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(if self.permanent {
                    FetchError::permanent(pattern, "no such folder")
                } else {
                    FetchError::unavailable(pattern, "busy")
                });
            }
            Ok(Box::new(self.messages.clone().into_iter().map(Ok)))
        }
    }

    fn message(id: &str) -> RawMessage {
        RawMessage {
            message_id: Some(id.to_string()),
            subject: Some("Status".to_string()),
            sender: Some("alice@example.com".to_string()),
            sent_at: Some("2024-03-01T10:00:00Z".to_string()),
            folder: "Inbox".to_string(),
            ..Default::default()
        }
    }

    /// Yields `total` messages and cancels `token` once `cancel_after` have
    /// been handed out.
    struct CancellingSource {
        token: CancellationToken,
        cancel_after: usize,
        total: usize,
        pulled: Arc<AtomicUsize>,
    }

    impl MailboxSource for CancellingSource {
        fn fetch_folder(&self, _pattern: &str, _timeout: Duration) -> Result<MessageStream<'_>, FetchError> {
            Ok(Box::new((0..self.total).map(move |i| {
                let pulled = self.pulled.fetch_add(1, Ordering::SeqCst) + 1;
                if pulled == self.cancel_after {
                    self.token.cancel();
                }
                Ok(message(&format!("<m{}@x>", i)))
            })))
        }
    }

    fn dated(id: &str, sent_at: &str) -> RawMessage {
        RawMessage {
            sent_at: Some(sent_at.to_string()),
            ..message(id)
        }
    }

    fn context(source: FlakySource, retry_budget: u32) -> ExtractionContext {
        context_with(Arc::new(source), retry_budget, CancellationToken::new())
    }

    fn context_with(source: Arc<dyn MailboxSource>, retry_budget: u32, cancel: CancellationToken) -> ExtractionContext {
        let state = Arc::new(StateCell::new());
        state.transition(RunState::Fetching).unwrap();
        ExtractionContext {
            source,
            retry_budget,
            retry_delay: Duration::from_millis(1),
            fetch_timeout: Duration::from_secs(1),
            date_window: None,
            max_emails: None,
            cancel,
            state,
            progress: Arc::new(NoopProgress),
            scan_time: Utc::now(),
            results: Mutex::new(Vec::new()),
            reports: Mutex::new(Vec::new()),
            completed: AtomicUsize::new(0),
            jobs_total: 1,
        }
    }

    fn job() -> ExtractionJob {
        ExtractionJob {
            id: 0,
            folder_pattern: "Inbox".to_string(),
        }
    }

    #[test]
    fn test_transient_failures_are_retried() {
        let ctx = context(
            FlakySource {
                failures: 2,
                calls: AtomicU32::new(0),
                permanent: false,
                messages: vec![message("<a@x>"), RawMessage::default()],
            },
            3,
        );
        let (report, batch) = process_job(&ctx, &job());
        assert_eq!(report.status, JobStatus::Succeeded);
        assert_eq!(report.attempts, 3);
        let batch = batch.unwrap();
        assert_eq!(batch.fetched, 2);
        assert_eq!(batch.emails.len(), 1);
        assert_eq!(batch.dropped, 1);
        assert_eq!(ctx.state.current(), RunState::Normalizing);
    }

    #[test]
    fn test_retry_budget_exhaustion_fails_job() {
        let ctx = context(
            FlakySource {
                failures: 10,
                calls: AtomicU32::new(0),
                permanent: false,
                messages: vec![],
            },
            2,
        );
        let (report, batch) = process_job(&ctx, &job());
        assert_eq!(report.status, JobStatus::Failed);
        assert_eq!(report.attempts, 3);
        assert!(report.error_message.unwrap().contains("busy"));
        assert!(batch.is_none());
    }

    #[test]
    fn test_permanent_failure_is_not_retried() {
        let ctx = context(
            FlakySource {
                failures: 1,
                calls: AtomicU32::new(0),
                permanent: true,
                messages: vec![],
            },
            3,
        );
        let (report, _) = process_job(&ctx, &job());
        assert_eq!(report.status, JobStatus::Failed);
        assert_eq!(report.attempts, 1);
    }

    #[test]
    fn test_cancelled_before_start() {
        let ctx = context(
            FlakySource {
                failures: 0,
                calls: AtomicU32::new(0),
                permanent: false,
                messages: vec![message("<a@x>")],
            },
            0,
        );
        ctx.cancel.cancel();
        let (report, batch) = process_job(&ctx, &job());
        assert_eq!(report.status, JobStatus::Cancelled);
        assert_eq!(report.attempts, 0);
        assert!(batch.is_none());
    }

    #[test]
    fn test_cancellation_mid_folder_stops_reading() {
        let cancel = CancellationToken::new();
        let pulled = Arc::new(AtomicUsize::new(0));
        let source = CancellingSource {
            token: cancel.clone(),
            cancel_after: 3,
            total: 20,
            pulled: Arc::clone(&pulled),
        };
        let ctx = context_with(Arc::new(source), 0, cancel);

        let (report, batch) = process_job(&ctx, &job());
        assert_eq!(report.status, JobStatus::Cancelled);
        assert_eq!(report.attempts, 1);
        assert!(batch.is_none());
        assert_eq!(pulled.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_max_emails_caps_the_folder() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let source = CancellingSource {
            token: CancellationToken::new(),
            cancel_after: usize::MAX,
            total: 10,
            pulled: Arc::clone(&pulled),
        };
        let mut ctx = context_with(Arc::new(source), 0, CancellationToken::new());
        ctx.max_emails = Some(4);

        let (report, batch) = process_job(&ctx, &job());
        assert_eq!(report.status, JobStatus::Succeeded);
        let batch = batch.unwrap();
        assert_eq!(batch.emails.len(), 4);
        assert_eq!(batch.fetched, 4);
        assert_eq!(pulled.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_date_window_filters_messages() {
        let mut ctx = context(
            FlakySource {
                failures: 0,
                calls: AtomicU32::new(0),
                permanent: false,
                messages: vec![
                    dated("<old@x>", "2023-12-31T23:59:59Z"),
                    dated("<in@x>", "2024-01-15T08:00:00Z"),
                    dated("<new@x>", "2024-02-01T00:00:00Z"),
                    dated("<undated@x>", "not a date"),
                ],
            },
            0,
        );
        let january = DateFilter::parse_month_range("01/2024,01/2024").unwrap();
        ctx.date_window = Some(january.window(ctx.scan_time));

        let (_, batch) = process_job(&ctx, &job());
        let batch = batch.unwrap();
        let ids: Vec<&str> = batch.emails.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["in@x", "undated@x"]);
        assert_eq!(batch.fetched, 4);
        assert_eq!(batch.filtered, 2);
    }

    #[test]
    fn test_retry_backoff_saturates() {
        assert_eq!(retry_backoff(Duration::from_millis(250), 3), Duration::from_millis(750));
        assert_eq!(retry_backoff(Duration::MAX, 2), Duration::MAX);
    }

    #[test]
    fn test_sleep_unless_cancelled() {
        let token = CancellationToken::new();
        assert!(sleep_unless_cancelled(&token, Duration::from_millis(5)));
        token.cancel();
        assert!(!sleep_unless_cancelled(&token, Duration::from_secs(5)));
    }
}
