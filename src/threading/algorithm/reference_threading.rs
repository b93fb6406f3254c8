//! Header-based threading.
//!
//! Each email has at most one candidate parent: its `in_reply_to` if that
//! message is present, otherwise the closest present ancestor listed in
//! `references`. Messages that are referenced but absent are ignored; there
//! are no phantom containers.
//!
//! Links are made newest first. Inside a reference cycle the last member
//! processed is the earliest one, so that is the link refused and the
//! earliest member of the cycle becomes the root.

use crate::models::NormalizedEmail;

use super::super::container::{EmailIndex, LinkOutcome, ThreadForest};

/// The parent this email claims through its headers, if present in the set.
pub fn parent_candidate<'a>(email: &'a NormalizedEmail, index: &EmailIndex) -> Option<&'a str> {
    let is_candidate = |id: &str| id != email.id && index.contains(id);

    if let Some(in_reply_to) = email.in_reply_to.as_deref() {
        if is_candidate(in_reply_to) {
            return Some(in_reply_to);
        }
    }
    email
        .references
        .iter()
        .rev()
        .map(String::as_str)
        .find(|&id| is_candidate(id))
}

pub fn build_reference_forest(index: &EmailIndex) -> ThreadForest {
    let mut forest = ThreadForest::new(index);

    for email in index.chronological().rev() {
        let Some(parent_id) = parent_candidate(email, index) else {
            continue;
        };
        match forest.link(&email.id, parent_id) {
            LinkOutcome::Linked => {}
            LinkOutcome::WouldCycle => {
                log::warn!(
                    "threading: reference cycle through {} broken, {} becomes a root",
                    parent_id,
                    email.id
                );
                forest.mark_cycle_break(&email.id);
            }
            outcome => {
                log::trace!("threading: link {} -> {} skipped ({:?})", email.id, parent_id, outcome);
            }
        }
    }

    forest
}
