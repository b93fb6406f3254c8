//! In-memory collaborators and builders for tests and fixture runs.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::error::{FetchError, StorageError};
use crate::models::{Conversation, NormalizedEmail, RawMessage};
use crate::sync::folders::FolderPattern;
use crate::sync::parser::normalize_subject;
use crate::sync::progress::{ProgressEvent, ProgressReporter};
use crate::sync::source::{ConversationSink, MailboxSource, MessageStream};
use crate::sync::state::RunState;

/// 2024-01-01T00:00:00Z, the origin for [`email`] offsets.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

/// A normalized email sent `minute` minutes after [`base_time`].
pub fn email(id: &str, subject: &str, sender: &str, minute: i64) -> NormalizedEmail {
    NormalizedEmail {
        id: id.to_string(),
        id_synthesized: false,
        subject: subject.to_string(),
        normalized_subject: normalize_subject(subject),
        sender: sender.to_string(),
        participants: [sender.to_string()].into_iter().collect(),
        sent_at: base_time() + chrono::Duration::minutes(minute),
        timestamp_inferred: false,
        in_reply_to: None,
        references: Vec::new(),
        folder: "Inbox".to_string(),
        body_length: None,
    }
}

pub fn reply(mut email: NormalizedEmail, in_reply_to: Option<&str>, references: &[&str]) -> NormalizedEmail {
    email.in_reply_to = in_reply_to.map(str::to_string);
    email.references = references.iter().map(|r| r.to_string()).collect();
    email
}

pub fn addressed(mut email: NormalizedEmail, recipients: &[&str]) -> NormalizedEmail {
    email
        .participants
        .extend(recipients.iter().map(|r| r.to_string()));
    email
}

/// A raw record with the fields most tests care about.
pub fn raw_message(
    message_id: Option<&str>,
    folder: &str,
    subject: &str,
    sender: &str,
    sent_at: &str,
) -> RawMessage {
    RawMessage {
        message_id: message_id.map(str::to_string),
        subject: Some(subject.to_string()),
        sender: Some(sender.to_string()),
        sent_at: Some(sent_at.to_string()),
        folder: folder.to_string(),
        ..Default::default()
    }
}

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("failed to read fixture: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid fixture JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy)]
enum ScriptedFailure {
    Unavailable,
    Timeout,
    /// Fail after yielding this many messages.
    Interrupted(usize),
    Permanent,
}

/// Mailbox backed by a folder → messages map.
///
/// Patterns are resolved with the same matching rules as folder precedence,
/// so `Archive/*` fetches every archive subfolder. Failures can be scripted
/// per pattern and fetch calls are counted.
#[derive(Default)]
pub struct MemoryMailbox {
    folders: BTreeMap<String, Vec<RawMessage>>,
    failures: Mutex<HashMap<String, Vec<ScriptedFailure>>>,
    fetches: Mutex<HashMap<String, u32>>,
    yielded: Mutex<HashMap<String, usize>>,
    /// Pattern → (messages to yield first, token to cancel).
    cancellations: Mutex<HashMap<String, (usize, CancellationToken)>>,
    message_delay: Option<Duration>,
}

#[derive(Deserialize)]
#[serde(transparent)]
struct FolderFixture(BTreeMap<String, Vec<RawMessage>>);

impl MemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_folder(mut self, name: &str, messages: Vec<RawMessage>) -> Self {
        let messages = messages
            .into_iter()
            .map(|mut message| {
                if message.folder.is_empty() {
                    message.folder = name.to_string();
                }
                message
            })
            .collect();
        self.folders.insert(name.to_string(), messages);
        self
    }

    /// Parse a `{"Folder": [raw message, ...]}` JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, FixtureError> {
        let FolderFixture(folders) = serde_json::from_str(json)?;
        Ok(folders
            .into_iter()
            .fold(Self::new(), |mailbox, (name, messages)| mailbox.with_folder(&name, messages)))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, FixtureError> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Sleep before yielding each message.
    pub fn with_message_delay(mut self, delay: Duration) -> Self {
        self.message_delay = Some(delay);
        self
    }

    fn script(&self, pattern: &str, failure: ScriptedFailure, times: u32) {
        let mut failures = self.failures.lock();
        let queue = failures.entry(pattern.to_string()).or_default();
        queue.extend(std::iter::repeat_n(failure, times as usize));
    }

    pub fn fail_unavailable(&self, pattern: &str, times: u32) {
        self.script(pattern, ScriptedFailure::Unavailable, times);
    }

    pub fn fail_timeout(&self, pattern: &str, times: u32) {
        self.script(pattern, ScriptedFailure::Timeout, times);
    }

    pub fn fail_mid_stream(&self, pattern: &str, after: usize, times: u32) {
        self.script(pattern, ScriptedFailure::Interrupted(after), times);
    }

    pub fn fail_permanently(&self, pattern: &str) {
        self.script(pattern, ScriptedFailure::Permanent, 1);
    }

    /// Cancel `token` as soon as `pattern` is fetched.
    pub fn cancel_on_fetch(&self, pattern: &str, token: CancellationToken) {
        self.cancel_after(pattern, 0, token);
    }

    /// Cancel `token` once `messages` messages of `pattern` have been yielded.
    pub fn cancel_after(&self, pattern: &str, messages: usize, token: CancellationToken) {
        self.cancellations
            .lock()
            .insert(pattern.to_string(), (messages, token));
    }

    pub fn fetch_count(&self, pattern: &str) -> u32 {
        self.fetches.lock().get(pattern).copied().unwrap_or(0)
    }

    /// Messages handed out for `pattern` across all fetches.
    pub fn yielded_count(&self, pattern: &str) -> usize {
        self.yielded.lock().get(pattern).copied().unwrap_or(0)
    }

    fn resolve(&self, pattern: &str) -> Result<Vec<RawMessage>, FetchError> {
        let matcher = FolderPattern::new(pattern).map_err(|e| FetchError::permanent(pattern, e.to_string()))?;
        let mut matched = false;
        let mut messages = Vec::new();
        for (name, folder) in &self.folders {
            if matcher.matches(name) {
                matched = true;
                messages.extend(folder.iter().cloned());
            }
        }
        if !matched {
            return Err(FetchError::permanent(pattern, "no folder matches"));
        }
        Ok(messages)
    }
}

impl MailboxSource for MemoryMailbox {
    fn fetch_folder(&self, pattern: &str, timeout: Duration) -> Result<MessageStream<'_>, FetchError> {
        *self.fetches.lock().entry(pattern.to_string()).or_insert(0) += 1;
        let cancellation = self.cancellations.lock().get(pattern).cloned();
        if let Some((0, token)) = &cancellation {
            token.cancel();
        }

        let scripted = {
            let mut failures = self.failures.lock();
            failures
                .get_mut(pattern)
                .filter(|queue| !queue.is_empty())
                .map(|queue| queue.remove(0))
        };

        let messages = self.resolve(pattern)?;
        let interrupt_after = match scripted {
            None => None,
            Some(ScriptedFailure::Unavailable) => {
                return Err(FetchError::unavailable(pattern, "mailbox busy"));
            }
            Some(ScriptedFailure::Timeout) => {
                return Err(FetchError::Timeout {
                    folder: pattern.to_string(),
                    timeout,
                });
            }
            Some(ScriptedFailure::Permanent) => {
                return Err(FetchError::permanent(pattern, "access denied"));
            }
            Some(ScriptedFailure::Interrupted(after)) => Some(after),
        };

        let folder = pattern.to_string();
        let delay = self.message_delay;
        let stream = messages.into_iter().enumerate().map(move |(position, message)| {
            if let Some(delay) = delay {
                std::thread::sleep(delay);
            }
            *self.yielded.lock().entry(folder.clone()).or_insert(0) += 1;
            if let Some((after, token)) = &cancellation {
                if position + 1 == *after {
                    token.cancel();
                }
            }
            match interrupt_after {
                Some(after) if position >= after => Err(FetchError::Interrupted {
                    folder: folder.clone(),
                    reason: "connection reset".to_string(),
                }),
                _ => Ok(message),
            }
        });
        Ok(Box::new(stream))
    }
}

/// Sink that keeps every persisted batch in memory.
#[derive(Default)]
pub struct MemorySink {
    batches: Mutex<Vec<Vec<Conversation>>>,
    failure: Mutex<Option<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that rejects every batch with `reason`.
    pub fn failing(reason: &str) -> Self {
        let sink = Self::default();
        *sink.failure.lock() = Some(reason.to_string());
        sink
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }

    /// The most recently persisted batch.
    pub fn last_batch(&self) -> Option<Vec<Conversation>> {
        self.batches.lock().last().cloned()
    }
}

impl ConversationSink for MemorySink {
    fn persist(&self, conversations: &[Conversation]) -> Result<(), StorageError> {
        if let Some(reason) = self.failure.lock().clone() {
            return Err(StorageError::Rejected(reason));
        }
        self.batches.lock().push(conversations.to_vec());
        Ok(())
    }
}

/// Progress reporter that records every event.
#[derive(Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    pub fn phases(&self) -> Vec<RunState> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ProgressEvent::Phase { state } => Some(*state),
                _ => None,
            })
            .collect()
    }
}

impl ProgressReporter for RecordingProgress {
    fn report(&self, event: ProgressEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_mailbox_resolves_wildcards() {
        let mailbox = MemoryMailbox::new()
            .with_folder("Archive/2023", vec![raw_message(Some("<a@x>"), "", "A", "a@x.com", "2023-05-01")])
            .with_folder("Archive/2024", vec![raw_message(Some("<b@x>"), "", "B", "a@x.com", "2024-05-01")])
            .with_folder("Inbox", vec![]);

        let messages: Vec<RawMessage> = mailbox
            .fetch_folder("Archive/*", Duration::from_secs(1))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].folder, "Archive/2023");
        assert!(mailbox.fetch_folder("Drafts", Duration::from_secs(1)).is_err());
        assert_eq!(mailbox.fetch_count("Archive/*"), 1);
    }

    #[test]
    fn test_scripted_failures_run_out() {
        let mailbox = MemoryMailbox::new().with_folder("Inbox", vec![RawMessage::default()]);
        mailbox.fail_unavailable("Inbox", 1);

        let first = mailbox.fetch_folder("Inbox", Duration::from_secs(1));
        assert!(matches!(first, Err(FetchError::FolderUnavailable { .. })));
        assert!(mailbox.fetch_folder("Inbox", Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn test_fixture_json() {
        let mailbox = MemoryMailbox::from_json_str(
            r#"{"Inbox": [{"message_id": "<a@x>", "subject": "Hi", "sender": "a@x.com"}]}"#,
        )
        .unwrap();
        let messages: Vec<_> = mailbox
            .fetch_folder("inbox", Duration::from_secs(1))
            .unwrap()
            .collect();
        assert_eq!(messages.len(), 1);
    }
}
