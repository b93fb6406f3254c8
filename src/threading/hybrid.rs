//! Hybrid threading: header links first, subject heuristics for the rest.
//!
//! Structure established by headers is never changed. Only isolated emails
//! (no parent, no children) are placed afterwards, first under the root of a
//! multi-message conversation, then by clustering among themselves.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};

use crate::models::NormalizedEmail;

use super::algorithm::{build_reference_forest, collect_thread_members};
use super::container::{EmailIndex, LinkOutcome, ThreadForest};
use super::subject_matching::link_by_subject;

/// Snapshot of a header-built conversation, taken before any attachment.
#[derive(Debug)]
struct TreeSummary {
    root_id: String,
    subject_key: String,
    participants: BTreeSet<String>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TreeSummary {
    /// Distance from the conversation's span, or `None` outside span ± window.
    fn distance(&self, email: &NormalizedEmail, window: Duration) -> Option<Duration> {
        if email.sent_at < self.start - window || email.sent_at > self.end + window {
            return None;
        }
        let distance = if email.sent_at < self.start {
            self.start - email.sent_at
        } else if email.sent_at > self.end {
            email.sent_at - self.end
        } else {
            Duration::zero()
        };
        Some(distance)
    }
}

fn summarize_trees(forest: &ThreadForest, index: &EmailIndex) -> Vec<TreeSummary> {
    forest
        .roots()
        .into_iter()
        .filter(|root_id| !forest.is_isolated(root_id))
        .filter_map(|root_id| {
            let root = index.get(&root_id)?;
            let mut summary = TreeSummary {
                root_id: root_id.clone(),
                subject_key: root.subject_key(),
                participants: BTreeSet::new(),
                start: root.sent_at,
                end: root.sent_at,
            };
            for (member_id, _) in collect_thread_members(&root_id, forest) {
                if let Some(member) = index.get(&member_id) {
                    summary.participants.extend(member.participants.iter().cloned());
                    summary.start = summary.start.min(member.sent_at);
                    summary.end = summary.end.max(member.sent_at);
                }
            }
            Some(summary)
        })
        .collect()
}

/// Closest matching conversation for an isolated email; ties by root id.
fn best_attachment<'a>(email: &NormalizedEmail, trees: &'a [TreeSummary], window: Duration) -> Option<&'a TreeSummary> {
    let subject_key = email.subject_key();
    if subject_key.is_empty() {
        return None;
    }
    trees
        .iter()
        .filter(|tree| tree.subject_key == subject_key && email.shares_participant(&tree.participants))
        .filter_map(|tree| tree.distance(email, window).map(|distance| (distance, tree)))
        .min_by(|(a_dist, a), (b_dist, b)| a_dist.cmp(b_dist).then_with(|| a.root_id.cmp(&b.root_id)))
        .map(|(_, tree)| tree)
}

pub fn build_hybrid_forest(index: &EmailIndex, window: Duration) -> ThreadForest {
    let mut forest = build_reference_forest(index);
    let trees = summarize_trees(&forest, index);

    let isolated: Vec<&NormalizedEmail> = index
        .chronological()
        .filter(|email| forest.is_isolated(&email.id))
        .collect();

    let mut leftovers = Vec::new();
    let mut attached = 0usize;
    for email in isolated {
        match best_attachment(email, &trees, window) {
            Some(tree) if forest.link(&email.id, &tree.root_id) == LinkOutcome::Linked => {
                log::trace!("threading: attached {} to conversation {}", email.id, tree.root_id);
                attached += 1;
            }
            _ => leftovers.push(email),
        }
    }
    log::debug!(
        "threading: {} isolated emails attached by subject, {} left to cluster",
        attached,
        leftovers.len()
    );

    link_by_subject(&mut forest, &leftovers, window);
    forest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{email, reply};

    #[test]
    fn test_isolated_email_joins_matching_conversation() {
        let index = EmailIndex::new(vec![
            email("m1", "Launch", "a@x.com", 0),
            reply(email("m2", "Launch", "b@x.com", 10), Some("m1"), &["m1"]),
            email("m3", "Launch", "b@x.com", 30),
        ]);
        let forest = build_hybrid_forest(&index, Duration::days(1));
        assert_eq!(forest.roots(), vec!["m1".to_string()]);
        assert_eq!(forest.get("m3").unwrap().parent.as_deref(), Some("m1"));
        assert_eq!(forest.get("m2").unwrap().parent.as_deref(), Some("m1"));
    }

    #[test]
    fn test_outside_window_stays_separate() {
        let index = EmailIndex::new(vec![
            email("m1", "Launch", "a@x.com", 0),
            reply(email("m2", "Launch", "a@x.com", 10), Some("m1"), &[]),
            email("m3", "Launch", "a@x.com", 60 * 24 * 10),
        ]);
        let forest = build_hybrid_forest(&index, Duration::days(1));
        assert!(forest.get("m3").unwrap().parent.is_none());
    }

    #[test]
    fn test_closest_conversation_wins() {
        let index = EmailIndex::new(vec![
            email("a1", "Sync", "a@x.com", 0),
            reply(email("a2", "Sync", "a@x.com", 5), Some("a1"), &[]),
            email("b1", "Sync", "a@x.com", 100),
            reply(email("b2", "Sync", "a@x.com", 105), Some("b1"), &[]),
            email("z", "Sync", "a@x.com", 90),
        ]);
        let forest = build_hybrid_forest(&index, Duration::days(1));
        assert_eq!(forest.get("z").unwrap().parent.as_deref(), Some("b1"));
    }

    #[test]
    fn test_leftover_singletons_cluster_by_subject() {
        let index = EmailIndex::new(vec![
            email("s1", "Lunch", "a@x.com", 0),
            email("s2", "Re: Lunch", "a@x.com", 5),
            email("s3", "Lunch", "q@y.com", 6),
        ]);
        let forest = build_hybrid_forest(&index, Duration::days(1));
        assert_eq!(forest.get("s2").unwrap().parent.as_deref(), Some("s1"));
        assert!(forest.get("s3").unwrap().parent.is_none());
    }
}
