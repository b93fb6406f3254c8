//! Pipeline coordinator: the single entry point for external callers.
//!
//! Drives one run through fetch, normalize, dedupe, thread and persist,
//! publishing the current [`RunState`] and progress events along the way.
//! Blocking work runs on `spawn_blocking` so the coordinator can live inside
//! an async service.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::models::Conversation;
use crate::sync::dedup::dedupe;
use crate::sync::folders::FolderPrecedence;
use crate::sync::jobs::ExtractionJob;
use crate::sync::progress::{NoopProgress, ProgressEvent, ProgressReporter};
use crate::sync::scheduler::ExtractionScheduler;
use crate::sync::source::{ConversationSink, MailboxSource};
use crate::sync::state::{RunState, StateCell};
use crate::sync::stats::{RunReport, RunStats};
use crate::threading::{ThreadResolver, ThreadingOptions};

pub struct PipelineCoordinator {
    config: PipelineConfig,
    source: Arc<dyn MailboxSource>,
    sink: Arc<dyn ConversationSink>,
    progress: Arc<dyn ProgressReporter>,
    cancel: CancellationToken,
    state: Arc<StateCell>,
}

impl PipelineCoordinator {
    /// Validates the configuration up front; a coordinator drives one run.
    pub fn new(
        config: PipelineConfig,
        source: Arc<dyn MailboxSource>,
        sink: Arc<dyn ConversationSink>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            config,
            source,
            sink,
            progress: Arc::new(NoopProgress),
            cancel: CancellationToken::new(),
            state: Arc::new(StateCell::new()),
        })
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Token observed by every worker; cancelling it stops the run.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        log::info!("run: cancellation requested in state {}", self.state.current());
        self.cancel.cancel();
    }

    pub fn state(&self) -> RunState {
        self.state.current()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn enter(&self, next: RunState) -> Result<(), PipelineError> {
        self.state.transition(next)?;
        self.progress.report(ProgressEvent::Phase { state: next });
        Ok(())
    }

    /// Move to a terminal state after an error. Keeps an earlier terminal state.
    fn abort(&self, err: PipelineError) -> PipelineError {
        let terminal = match &err {
            PipelineError::Cancelled => RunState::Cancelled,
            _ => RunState::Failed,
        };
        if self.state.transition(terminal).is_ok() {
            self.progress.report(ProgressEvent::Phase { state: terminal });
        }
        match terminal {
            RunState::Cancelled => log::info!("run: cancelled"),
            _ => log::error!("run: failed: {}", err),
        }
        err
    }

    fn ensure_not_cancelled(&self) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    /// Execute the run. Cancellation yields `Err(PipelineError::Cancelled)`
    /// and nothing is persisted.
    pub async fn run(&self) -> Result<RunReport, PipelineError> {
        self.enter(RunState::Fetching)?;
        match self.execute().await {
            Ok(report) => Ok(report),
            Err(err) => Err(self.abort(err)),
        }
    }

    async fn execute(&self) -> Result<RunReport, PipelineError> {
        let precedence = FolderPrecedence::new(&self.config.folder_patterns)?;
        let jobs = ExtractionJob::from_patterns(&self.config.folder_patterns);
        let mut stats = RunStats {
            jobs_total: jobs.len(),
            ..Default::default()
        };

        // Phase 1: fetch and normalize every folder
        log::info!(
            "run: extracting {} folder pattern(s) with up to {} workers",
            jobs.len(),
            self.config.max_workers
        );
        let scheduler = ExtractionScheduler::new(&self.config, Arc::clone(&self.source))
            .with_cancellation(self.cancel.clone())
            .with_state(Arc::clone(&self.state))
            .with_progress(Arc::clone(&self.progress));
        let scan_time = Utc::now();
        let outcome = tokio::task::spawn_blocking(move || scheduler.run(jobs, scan_time)).await??;

        if outcome.cancelled {
            return Err(PipelineError::Cancelled);
        }
        for report in &outcome.reports {
            stats.record_job(report);
            if let Some(reason) = &report.error_message {
                log::warn!("job {}: {} failed: {}", report.job_id, report.folder_pattern, reason);
            }
        }
        for batch in &outcome.batches {
            stats.record_batch(batch);
        }
        log::info!(
            "run: extraction finished, {} fetched, {} normalized, {} dropped, {} job(s) failed",
            stats.messages_fetched,
            stats.messages_normalized,
            stats.messages_dropped,
            stats.jobs_failed
        );
        self.ensure_not_cancelled()?;

        // Phase 2: dedupe and thread, once every worker has been joined
        self.enter(RunState::Threading)?;
        let emails: Vec<_> = outcome.batches.into_iter().flat_map(|batch| batch.emails).collect();
        let resolver = ThreadResolver::new(ThreadingOptions::from(&self.config));
        let method = self.config.thread_method;
        let (conversations, duplicates_merged) = tokio::task::spawn_blocking(move || {
            let deduped = dedupe(emails, &precedence);
            let conversations = resolver.resolve(deduped.emails, method);
            (conversations, deduped.duplicates_merged)
        })
        .await?;

        stats.duplicates_merged = duplicates_merged;
        stats.conversations = conversations.len();
        stats.cycles_broken = conversations.iter().filter(|c| c.cycle_broken).count();
        self.progress.report(ProgressEvent::ConversationsBuilt {
            conversations: conversations.len(),
            emails: conversations.iter().map(Conversation::len).sum(),
        });
        if stats.cycles_broken > 0 {
            log::warn!("run: broke {} reference cycle(s)", stats.cycles_broken);
        }
        self.ensure_not_cancelled()?;

        // Phase 3: hand the whole batch to storage
        self.enter(RunState::Persisting)?;
        let sink = Arc::clone(&self.sink);
        tokio::task::spawn_blocking(move || sink.persist(&conversations)).await??;

        self.enter(RunState::Done)?;
        log::info!(
            "run: done, {} conversations from {} emails ({} duplicates merged)",
            stats.conversations,
            stats.messages_normalized.saturating_sub(stats.duplicates_merged),
            stats.duplicates_merged
        );

        Ok(RunReport {
            state: RunState::Done,
            stats,
            jobs: outcome.reports,
        })
    }
}
