use serde::Serialize;
use tokio::sync::broadcast;

use crate::sync::jobs::JobStatus;
use crate::sync::state::RunState;

/// Events emitted at phase boundaries and as jobs enter and leave the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    Phase {
        state: RunState,
    },
    /// The job was accepted by the bounded queue.
    JobQueued {
        job_id: usize,
        folder_pattern: String,
    },
    JobFinished {
        job_id: usize,
        folder_pattern: String,
        status: JobStatus,
        jobs_completed: usize,
        jobs_total: usize,
    },
    ConversationsBuilt {
        conversations: usize,
        emails: usize,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Reporter that discards every event.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Forwards events to a broadcast channel for UI subscribers.
pub struct BroadcastProgress {
    sender: broadcast::Sender<ProgressEvent>,
}

impl BroadcastProgress {
    pub fn new(capacity: usize) -> (Self, broadcast::Receiver<ProgressEvent>) {
        let (sender, receiver) = broadcast::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: ProgressEvent) {
        // No subscribers is fine
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_progress_delivers_events() {
        let (progress, mut receiver) = BroadcastProgress::new(8);
        progress.report(ProgressEvent::Phase {
            state: RunState::Fetching,
        });
        assert_eq!(
            receiver.try_recv().unwrap(),
            ProgressEvent::Phase {
                state: RunState::Fetching
            }
        );
    }

    #[test]
    fn test_broadcast_without_subscribers_does_not_panic() {
        let (progress, receiver) = BroadcastProgress::new(1);
        drop(receiver);
        progress.report(ProgressEvent::ConversationsBuilt {
            conversations: 1,
            emails: 2,
        });
    }
}
