//! Email conversation threading with concurrent folder extraction.
//!
//! Raw mailbox records are fetched per folder on a bounded worker pool,
//! normalized, deduplicated across folders and grouped into conversation
//! trees, then handed to a storage collaborator in one batch.
//!
//! ```no_run
//! use std::sync::Arc;
//! use mailthread::{PipelineConfig, PipelineCoordinator};
//! use mailthread::test_support::{MemoryMailbox, MemorySink};
//!
//! # async fn demo() -> Result<(), mailthread::PipelineError> {
//! let mailbox = Arc::new(MemoryMailbox::new());
//! let sink = Arc::new(MemorySink::new());
//! let coordinator = PipelineCoordinator::new(PipelineConfig::default(), mailbox, sink)?;
//! let report = coordinator.run().await?;
//! println!("{} conversations", report.stats.conversations);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod models;
pub mod sync;
pub mod threading;

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support;

pub use config::{ConfigError, DateFilter, PipelineConfig, ThreadMethod};
pub use error::{FetchError, PipelineError, StorageError};
pub use models::{Conversation, ConversationNode, NormalizedEmail, RawMessage};
pub use sync::{
    ConversationSink, JsonFileSink, MailboxSource, PipelineCoordinator, ProgressEvent, ProgressReporter,
    RunReport, RunState, RunStats,
};
pub use threading::{ThreadResolver, ThreadingOptions};
