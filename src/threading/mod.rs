//! Conversation threading
//!
//! Groups normalized, deduplicated emails into [`Conversation`] trees using
//! one of three strategies chosen per run:
//!
//! 1. **References**: parent links from `In-Reply-To` / `References`, with
//!    cycles cut at their earliest member.
//! 2. **Subject**: clustering by normalized subject, shared participants and
//!    a time window.
//! 3. **Hybrid**: references first, then subject matching for the emails the
//!    headers left isolated.
//!
//! ## Module Structure
//!
//! - `container`: email index and the forest of parent links
//! - `algorithm`: header linking, cycle detection, traversal and assembly
//! - `subject_matching`: subject clustering
//! - `hybrid`: the combined strategy

pub mod algorithm;
pub mod container;
pub mod hybrid;
pub mod subject_matching;

use chrono::Duration;

use crate::config::{DEFAULT_THREAD_TIMEOUT_DAYS, PipelineConfig, ThreadMethod};
use crate::models::{Conversation, NormalizedEmail};

pub use container::{EmailIndex, ThreadForest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadingOptions {
    /// Maximum gap for subject-based grouping.
    pub subject_window: Duration,
}

impl Default for ThreadingOptions {
    fn default() -> Self {
        Self {
            subject_window: Duration::days(DEFAULT_THREAD_TIMEOUT_DAYS),
        }
    }
}

impl From<&PipelineConfig> for ThreadingOptions {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            subject_window: config.subject_window,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ThreadResolver {
    options: ThreadingOptions,
}

impl ThreadResolver {
    pub fn new(options: ThreadingOptions) -> Self {
        Self { options }
    }

    /// Build the parent-link forest for `method` without assembling it.
    pub fn build_forest(&self, index: &EmailIndex, method: ThreadMethod) -> ThreadForest {
        let window = self.options.subject_window;
        match method {
            ThreadMethod::References => algorithm::build_reference_forest(index),
            ThreadMethod::Subject => {
                let mut forest = ThreadForest::new(index);
                let candidates: Vec<&NormalizedEmail> = index.chronological().collect();
                subject_matching::link_by_subject(&mut forest, &candidates, window);
                forest
            }
            ThreadMethod::Hybrid => hybrid::build_hybrid_forest(index, window),
        }
    }

    /// Every input email ends up in exactly one conversation. Conversations
    /// come back sorted by (root sent_at, root id).
    ///
    /// Input is expected to have gone through
    /// [`dedupe`](crate::sync::dedup::dedupe). Copies that still share an id
    /// are folded into one node rather than dropped.
    pub fn resolve(&self, emails: Vec<NormalizedEmail>, method: ThreadMethod) -> Vec<Conversation> {
        let index = EmailIndex::new(emails);
        let forest = self.build_forest(&index, method);
        let conversations = algorithm::assemble_conversations(&forest, &index);

        log::info!(
            "threading: {} emails -> {} conversations ({} method)",
            index.len(),
            conversations.len(),
            method
        );
        conversations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{addressed, email, reply};

    fn scenario() -> Vec<NormalizedEmail> {
        vec![
            addressed(email("m1", "Q3 plan", "ann@corp.com", 0), &["bob@corp.com"]),
            reply(
                addressed(email("m2", "Re: Q3 plan", "bob@corp.com", 60), &["ann@corp.com"]),
                Some("m1"),
                &["m1"],
            ),
            addressed(email("m3", "RE: Q3 plan", "bob@corp.com", 120), &["ann@corp.com"]),
        ]
    }

    fn groups(conversations: &[Conversation]) -> Vec<Vec<String>> {
        conversations.iter().map(|c| c.ordered_ids.clone()).collect()
    }

    #[test]
    fn test_references_fragment_unlinked_reply() {
        let conversations = ThreadResolver::default().resolve(scenario(), ThreadMethod::References);
        assert_eq!(groups(&conversations), vec![vec!["m1", "m2"], vec!["m3"]]);
    }

    #[test]
    fn test_hybrid_recovers_unlinked_reply() {
        let conversations = ThreadResolver::default().resolve(scenario(), ThreadMethod::Hybrid);
        assert_eq!(groups(&conversations), vec![vec!["m1", "m2", "m3"]]);
        assert_eq!(conversations[0].root_id, "m1");
    }

    #[test]
    fn test_subject_method_is_flat() {
        let conversations = ThreadResolver::default().resolve(scenario(), ThreadMethod::Subject);
        assert_eq!(conversations.len(), 1);
        let conversation = &conversations[0];
        assert_eq!(conversation.children_of("m1"), vec!["m2", "m3"]);
        assert!(conversation.nodes.values().all(|node| node.depth <= 1));
    }

    #[test]
    fn test_repeated_id_keeps_reply_link_of_later_copy() {
        let mut emails = scenario();
        let bare_copy = email("m3", "RE: Q3 plan", "bob@corp.com", 120);
        let linked_copy = reply(email("m3", "RE: Q3 plan", "bob@corp.com", 130), Some("m2"), &["m1", "m2"]);
        emails.retain(|e| e.id != "m3");
        emails.extend([linked_copy, bare_copy]);

        let conversations = ThreadResolver::default().resolve(emails, ThreadMethod::References);
        assert_eq!(groups(&conversations), vec![vec!["m1", "m2", "m3"]]);
        assert_eq!(conversations[0].nodes["m3"].parent_id.as_deref(), Some("m2"));
    }

    #[test]
    fn test_every_email_lands_in_exactly_one_conversation() {
        let mut emails = scenario();
        emails.push(email("x", "", "z@z.com", 5));
        emails.push(reply(email("y", "Other", "z@z.com", 7), Some("nowhere"), &[]));

        for method in [ThreadMethod::Subject, ThreadMethod::References, ThreadMethod::Hybrid] {
            let conversations = ThreadResolver::default().resolve(emails.clone(), method);
            let mut ids: Vec<String> = conversations
                .iter()
                .flat_map(|c| c.ordered_ids.iter().cloned())
                .collect();
            ids.sort();
            assert_eq!(ids, vec!["m1", "m2", "m3", "x", "y"], "{}", method);
        }
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let forward = ThreadResolver::default().resolve(scenario(), ThreadMethod::Hybrid);
        let mut reversed_input = scenario();
        reversed_input.reverse();
        let reversed = ThreadResolver::default().resolve(reversed_input, ThreadMethod::Hybrid);
        assert_eq!(forward, reversed);
    }
}
