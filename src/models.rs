use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ===== Source Records =====

/// A message record as yielded by the mailbox collaborator.
///
/// Every field is optional except the folder: sources routinely omit
/// identifiers, dates or recipients, and the normalizer decides what to do
/// with the gaps.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RawMessage {
    pub message_id: Option<String>,
    pub subject: Option<String>,
    pub sender: Option<String>,
    pub recipients: Vec<String>,
    pub cc_recipients: Vec<String>,
    /// Timestamp in whatever textual form the source produces.
    pub sent_at: Option<String>,
    pub folder: String,
    pub in_reply_to: Option<String>,
    /// Raw References header (whitespace separated message ids).
    pub references: Option<String>,
    pub body_length: Option<usize>,
}

// ===== Canonical Email =====

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NormalizedEmail {
    pub id: String,
    /// True when `id` is a content hash rather than a source identifier.
    pub id_synthesized: bool,
    pub subject: String,
    pub normalized_subject: String,
    pub sender: String,
    pub participants: BTreeSet<String>,
    pub sent_at: DateTime<Utc>,
    pub timestamp_inferred: bool,
    pub in_reply_to: Option<String>,
    /// Ancestor ids, oldest first.
    pub references: Vec<String>,
    pub folder: String,
    pub body_length: Option<usize>,
}

impl NormalizedEmail {
    /// Case-folded subject used whenever subjects are compared.
    pub fn subject_key(&self) -> String {
        self.normalized_subject.to_lowercase()
    }

    /// Ordering key shared by every chronological sort in the crate.
    pub fn chronological_key(&self) -> (DateTime<Utc>, &str) {
        (self.sent_at, self.id.as_str())
    }

    pub fn shares_participant(&self, others: &BTreeSet<String>) -> bool {
        self.participants.iter().any(|p| others.contains(p))
    }
}

// ===== Conversations =====

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationNode {
    pub email: NormalizedEmail,
    /// Absent for the root.
    pub parent_id: Option<String>,
    pub depth: usize,
}

/// A reconstructed thread: a tree of emails with a single root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub root_id: String,
    pub subject: String,
    pub nodes: BTreeMap<String, ConversationNode>,
    /// Node ids sorted by (sent_at, id).
    pub ordered_ids: Vec<String>,
    pub participants: BTreeSet<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    /// Set when a reference cycle had to be cut to build this tree.
    pub cycle_broken: bool,
}

impl Conversation {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn root(&self) -> Option<&ConversationNode> {
        self.nodes.get(&self.root_id)
    }

    /// Child ids of `id`, in chronological order.
    pub fn children_of(&self, id: &str) -> Vec<&str> {
        self.ordered_ids
            .iter()
            .filter(|candidate| {
                self.nodes
                    .get(candidate.as_str())
                    .and_then(|node| node.parent_id.as_deref())
                    == Some(id)
            })
            .map(String::as_str)
            .collect()
    }
}
