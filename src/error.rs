use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::sync::state::RunState;

/// Errors raised by the mailbox collaborator while fetching a folder.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("folder `{folder}` is unavailable: {reason}")]
    FolderUnavailable { folder: String, reason: String },
    #[error("fetch of folder `{folder}` timed out after {timeout:?}")]
    Timeout { folder: String, timeout: Duration },
    #[error("fetch of folder `{folder}` was interrupted: {reason}")]
    Interrupted { folder: String, reason: String },
    #[error("folder `{folder}` cannot be fetched: {reason}")]
    Permanent { folder: String, reason: String },
}

impl FetchError {
    pub fn unavailable(folder: impl Into<String>, reason: impl Into<String>) -> Self {
        FetchError::FolderUnavailable {
            folder: folder.into(),
            reason: reason.into(),
        }
    }

    pub fn permanent(folder: impl Into<String>, reason: impl Into<String>) -> Self {
        FetchError::Permanent {
            folder: folder.into(),
            reason: reason.into(),
        }
    }

    /// Transient failures are retried by the scheduler; permanent ones are not.
    pub fn is_transient(&self) -> bool {
        !matches!(self, FetchError::Permanent { .. })
    }
}

/// Errors raised by the storage collaborator. Always fatal to a run.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend rejected the batch: {0}")]
    Rejected(String),
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode conversations: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Run-level errors. Everything below this level is recovered and counted.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to start worker {worker_id}: {source}")]
    WorkerSpawn {
        worker_id: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("worker {worker_id} panicked")]
    WorkerPanicked { worker_id: usize },
    #[error("background task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
    #[error("persisting conversations failed: {0}")]
    Storage(#[from] StorageError),
    #[error("run was cancelled")]
    Cancelled,
    #[error("invalid state transition from {from} to {to}")]
    InvalidTransition { from: RunState, to: RunState },
}
