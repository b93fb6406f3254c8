//! Mailbox extraction pipeline.
//!
//! # Architecture Overview
//!
//! - **`coordinator`**: drives a run through its states and is the only
//!   entry point external callers need.
//! - **`scheduler`** / **`worker`**: a fixed pool of OS threads fetching one
//!   folder pattern per job, with retries for transient failures and
//!   cooperative cancellation.
//! - **`parser`**: turns raw records into canonical emails (ids, subjects,
//!   addresses, timestamps).
//! - **`dedup`**: collapses copies of the same message seen in several
//!   folders, following folder precedence from **`folders`**.
//! - **`source`** / **`sink`**: collaborator interfaces for the mailbox and
//!   storage, plus a JSON file sink.
//!
//! ## Data Flow
//!
//! 1. **Fetching**: one job per folder pattern, queued on a bounded channel
//! 2. **Normalizing**: each worker normalizes its folder sequentially
//! 3. **Threading**: after every worker is joined, dedupe then thread once
//! 4. **Persisting**: the whole batch of conversations goes to the sink

pub mod coordinator;
pub mod dedup;
pub mod folders;
pub mod jobs;
pub mod parser;
pub mod progress;
pub mod scheduler;
pub mod sink;
pub mod source;
pub mod state;
pub mod stats;
mod worker;

pub use coordinator::PipelineCoordinator;
pub use jobs::{ExtractionJob, FolderBatch, JobReport, JobStatus};
pub use progress::{BroadcastProgress, NoopProgress, ProgressEvent, ProgressReporter};
pub use sink::JsonFileSink;
pub use source::{ConversationSink, MailboxSource, MessageStream};
pub use state::RunState;
pub use stats::{RunReport, RunStats};
