//! Tree building blocks: header linking, cycle detection and assembly.

mod cycle_detection;
mod reference_threading;
mod tree_traversal;

use rayon::prelude::*;

use crate::models::Conversation;

use super::container::{EmailIndex, ThreadForest};

pub use cycle_detection::detect_cycle_in_ancestry;
pub use reference_threading::{build_reference_forest, parent_candidate};
pub use tree_traversal::{assemble_conversation, collect_thread_members};

/// Turn every tree of the forest into a conversation, ordered by
/// (root sent_at, root id).
pub fn assemble_conversations(forest: &ThreadForest, index: &EmailIndex) -> Vec<Conversation> {
    let mut conversations: Vec<Conversation> = forest
        .roots()
        .par_iter()
        .filter_map(|root_id| assemble_conversation(root_id, forest, index))
        .collect();

    conversations.sort_by(|a, b| {
        let a_key = (a.root().map(|node| node.email.sent_at), a.root_id.as_str());
        let b_key = (b.root().map(|node| node.email.sent_at), b.root_id.as_str());
        a_key.cmp(&b_key)
    });
    conversations
}
