//! Cycle detection for email threading
//!
//! Ensures that parent-child relationships don't create cycles in the thread tree.
//! A cycle would occur if we tried to make a parent a descendant of its own child.

use std::collections::{HashMap, HashSet};

use super::super::container::Container;

/// Check if linking a child to a parent would create a cycle
///
/// Walks up the ancestry chain from the proposed parent. If the child shows
/// up anywhere in that chain, or the chain loops on itself, linking is
/// refused.
///
/// ```text
/// Current tree:  A → B → C
///
/// Trying to link: A under C (would create cycle A → B → C → A)
/// Result: true
/// ```
pub fn detect_cycle_in_ancestry(
    containers: &HashMap<String, Container>,
    child_message_id: &str,
    parent_message_id: &str,
) -> bool {
    let mut visited = HashSet::new();
    let mut current = Some(parent_message_id);

    while let Some(msg_id) = current {
        if !visited.insert(msg_id) {
            return true;
        }
        if msg_id == child_message_id {
            return true;
        }
        current = containers
            .get(msg_id)
            .and_then(|container| container.parent.as_deref());
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(links: &[(&str, Option<&str>)]) -> HashMap<String, Container> {
        links
            .iter()
            .map(|(id, parent)| {
                let mut container = Container::new(id.to_string());
                container.parent = parent.map(str::to_string);
                (id.to_string(), container)
            })
            .collect()
    }

    #[test]
    fn test_no_cycle_simple_chain() {
        let containers = chain(&[("A", None), ("B", Some("A")), ("C", Some("B"))]);
        assert!(!detect_cycle_in_ancestry(&containers, "D", "C"));
    }

    #[test]
    fn test_cycle_detected() {
        let containers = chain(&[("A", None), ("B", Some("A")), ("C", Some("B"))]);
        assert!(detect_cycle_in_ancestry(&containers, "A", "C"));
    }

    #[test]
    fn test_self_loop() {
        let containers = chain(&[("A", None)]);
        assert!(detect_cycle_in_ancestry(&containers, "A", "A"));
    }

    #[test]
    fn test_corrupt_parent_chain_terminates() {
        let containers = chain(&[("A", Some("B")), ("B", Some("A"))]);
        assert!(detect_cycle_in_ancestry(&containers, "X", "A"));
    }
}
