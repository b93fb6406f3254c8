//! Collaborator interfaces.
//!
//! The mailbox connection and the storage engine live outside this crate.
//! The pipeline only sees them through these two traits.

use std::time::Duration;

use crate::error::{FetchError, StorageError};
use crate::models::{Conversation, RawMessage};

/// Lazy, finite sequence of messages for one folder pattern.
///
/// An `Err` item aborts the current attempt; the scheduler may retry the
/// whole folder from the start.
pub type MessageStream<'a> = Box<dyn Iterator<Item = Result<RawMessage, FetchError>> + Send + 'a>;

pub trait MailboxSource: Send + Sync {
    /// Open the folder(s) matching `pattern`.
    ///
    /// Must be restartable: every call starts from the beginning of the
    /// folder. `timeout` is the per-job fetch timeout; implementations
    /// report an expired timeout as [`FetchError::Timeout`].
    fn fetch_folder(&self, pattern: &str, timeout: Duration) -> Result<MessageStream<'_>, FetchError>;
}

pub trait ConversationSink: Send + Sync {
    /// Store a complete batch. All-or-nothing from the pipeline's view.
    fn persist(&self, conversations: &[Conversation]) -> Result<(), StorageError>;
}
