//! Tree traversal and conversation assembly.
//!
//! All walks are iterative so arbitrarily deep reply chains cannot overflow
//! the stack.

use std::collections::{BTreeMap, BTreeSet};

use crate::models::{Conversation, ConversationNode};

use super::super::container::{EmailIndex, ThreadForest};

/// Collect every id in the tree under `root_message_id` with its depth.
///
/// Depth-first, children visited in link order. The root has depth 0.
pub fn collect_thread_members(root_message_id: &str, forest: &ThreadForest) -> Vec<(String, usize)> {
    let mut collected = Vec::new();
    let mut traversal_stack = vec![(root_message_id.to_string(), 0usize)];

    while let Some((current_id, depth)) = traversal_stack.pop() {
        let Some(container) = forest.get(&current_id) else {
            continue;
        };
        // Reverse so the first child is popped first
        for child_id in container.children.iter().rev() {
            traversal_stack.push((child_id.clone(), depth + 1));
        }
        collected.push((current_id, depth));
    }

    collected
}

/// Build the conversation rooted at `root_id`.
pub fn assemble_conversation(root_id: &str, forest: &ThreadForest, index: &EmailIndex) -> Option<Conversation> {
    let root_email = index.get(root_id)?;

    let mut nodes = BTreeMap::new();
    let mut participants = BTreeSet::new();
    let mut start_date = root_email.sent_at;
    let mut end_date = root_email.sent_at;
    let mut cycle_broken = false;

    for (id, depth) in collect_thread_members(root_id, forest) {
        let Some(email) = index.get(&id) else {
            continue;
        };
        participants.extend(email.participants.iter().cloned());
        start_date = start_date.min(email.sent_at);
        end_date = end_date.max(email.sent_at);
        cycle_broken |= forest.is_cycle_break(&id);

        let parent_id = forest.get(&id).and_then(|container| container.parent.clone());
        nodes.insert(
            id,
            ConversationNode {
                email: email.clone(),
                parent_id,
                depth,
            },
        );
    }

    let mut ordered: Vec<&ConversationNode> = nodes.values().collect();
    ordered.sort_by(|a, b| a.email.chronological_key().cmp(&b.email.chronological_key()));
    let ordered_ids = ordered.into_iter().map(|node| node.email.id.clone()).collect();

    Some(Conversation {
        root_id: root_id.to_string(),
        subject: root_email.normalized_subject.clone(),
        nodes,
        ordered_ids,
        participants,
        start_date,
        end_date,
        cycle_broken,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::email;

    #[test]
    fn test_collect_members_with_depth() {
        let index = EmailIndex::new(vec![
            email("a", "S", "x@x.com", 0),
            email("b", "S", "x@x.com", 1),
            email("c", "S", "x@x.com", 2),
            email("d", "S", "x@x.com", 3),
        ]);
        let mut forest = ThreadForest::new(&index);
        forest.link("b", "a");
        forest.link("c", "b");
        forest.link("d", "a");

        let members = collect_thread_members("a", &forest);
        assert_eq!(
            members,
            vec![
                ("a".to_string(), 0),
                ("b".to_string(), 1),
                ("c".to_string(), 2),
                ("d".to_string(), 1),
            ]
        );
    }

    #[test]
    fn test_deep_chain_does_not_overflow() {
        let emails = (0..20_000)
            .map(|i| email(&format!("m{:05}", i), "S", "x@x.com", i))
            .collect();
        let index = EmailIndex::new(emails);
        let mut forest = ThreadForest::new(&index);
        for i in (1..20_000).rev() {
            forest.link(&format!("m{:05}", i), &format!("m{:05}", i - 1));
        }
        let conversation = assemble_conversation("m00000", &forest, &index).unwrap();
        assert_eq!(conversation.len(), 20_000);
        assert_eq!(conversation.nodes["m19999"].depth, 19_999);
    }

    #[test]
    fn test_assembled_summary_fields() {
        let index = EmailIndex::new(vec![
            email("a", "Plan", "x@x.com", 5),
            email("b", "Plan", "y@x.com", 1),
        ]);
        let mut forest = ThreadForest::new(&index);
        forest.link("b", "a");
        let conversation = assemble_conversation("a", &forest, &index).unwrap();

        assert_eq!(conversation.ordered_ids, vec!["b", "a"]);
        assert_eq!(conversation.start_date, index.get("b").unwrap().sent_at);
        assert_eq!(conversation.end_date, index.get("a").unwrap().sent_at);
        assert_eq!(conversation.participants.len(), 2);
        assert_eq!(conversation.children_of("a"), vec!["b"]);
    }
}
