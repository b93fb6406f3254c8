//! Tree bookkeeping shared by every threading strategy.
//!
//! A [`ThreadForest`] holds one [`Container`] per email. Strategies only add
//! parent links through [`ThreadForest::link`], which refuses self links,
//! re-parenting and links that would close a cycle, so the forest is always
//! a set of proper trees.

use std::collections::{HashMap, HashSet};

use crate::models::NormalizedEmail;

use super::algorithm::detect_cycle_in_ancestry;

fn absorb_copy(kept: &mut NormalizedEmail, copy: NormalizedEmail) {
    if kept.in_reply_to.is_none() {
        kept.in_reply_to = copy.in_reply_to;
    }
    for reference in copy.references {
        if !kept.references.contains(&reference) {
            kept.references.push(reference);
        }
    }
    kept.participants.extend(copy.participants);
}

/// A node in the thread forest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub message_id: String,
    pub parent: Option<String>,
    /// Child ids in link order.
    pub children: Vec<String>,
}

impl Container {
    pub fn new(message_id: String) -> Self {
        Container {
            message_id,
            parent: None,
            children: Vec::new(),
        }
    }

    /// Add a child to this container (avoiding duplicates)
    pub fn add_child(&mut self, child_msg_id: String) {
        if !self.children.contains(&child_msg_id) {
            self.children.push(child_msg_id);
        }
    }

    pub fn is_isolated(&self) -> bool {
        self.parent.is_none() && self.children.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    Linked,
    SelfLink,
    AlreadyParented,
    UnknownMessage,
    WouldCycle,
}

/// Emails keyed by id, plus their ids in chronological order.
#[derive(Debug, Clone, Default)]
pub struct EmailIndex {
    emails: HashMap<String, NormalizedEmail>,
    chronological: Vec<String>,
}

impl EmailIndex {
    /// Index the emails. Ids are expected to be unique; a repeated id keeps
    /// its chronologically first copy and absorbs the reply metadata and
    /// participants of the others.
    pub fn new(emails: Vec<NormalizedEmail>) -> Self {
        let mut sorted = emails;
        sorted.sort_by(|a, b| a.chronological_key().cmp(&b.chronological_key()));

        let mut index = EmailIndex::default();
        for email in sorted {
            if let Some(kept) = index.emails.get_mut(&email.id) {
                log::warn!("threading: folding repeated message id {}", email.id);
                absorb_copy(kept, email);
                continue;
            }
            index.chronological.push(email.id.clone());
            index.emails.insert(email.id.clone(), email);
        }
        index
    }

    pub fn get(&self, id: &str) -> Option<&NormalizedEmail> {
        self.emails.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.emails.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.emails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
    }

    /// Emails sorted by (sent_at, id).
    pub fn chronological(&self) -> impl DoubleEndedIterator<Item = &NormalizedEmail> {
        self.chronological.iter().filter_map(|id| self.emails.get(id))
    }
}

/// Parent links between the emails of one run.
#[derive(Debug, Clone, Default)]
pub struct ThreadForest {
    containers: HashMap<String, Container>,
    /// Ids whose parent link was refused because it would close a cycle.
    cycle_breaks: HashSet<String>,
}

impl ThreadForest {
    /// One unlinked container per indexed email.
    pub fn new(index: &EmailIndex) -> Self {
        let containers = index
            .chronological()
            .map(|email| (email.id.clone(), Container::new(email.id.clone())))
            .collect();
        ThreadForest {
            containers,
            cycle_breaks: HashSet::new(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Container> {
        self.containers.get(id)
    }

    pub fn containers(&self) -> &HashMap<String, Container> {
        &self.containers
    }

    pub fn link(&mut self, child_id: &str, parent_id: &str) -> LinkOutcome {
        if child_id == parent_id {
            return LinkOutcome::SelfLink;
        }
        match (self.containers.get(child_id), self.containers.get(parent_id)) {
            (Some(child), Some(_)) if child.parent.is_some() => return LinkOutcome::AlreadyParented,
            (Some(_), Some(_)) => {}
            _ => return LinkOutcome::UnknownMessage,
        }
        if detect_cycle_in_ancestry(&self.containers, child_id, parent_id) {
            return LinkOutcome::WouldCycle;
        }

        if let Some(child) = self.containers.get_mut(child_id) {
            child.parent = Some(parent_id.to_string());
        }
        if let Some(parent) = self.containers.get_mut(parent_id) {
            parent.add_child(child_id.to_string());
        }
        LinkOutcome::Linked
    }

    pub fn mark_cycle_break(&mut self, id: &str) {
        self.cycle_breaks.insert(id.to_string());
    }

    pub fn is_cycle_break(&self, id: &str) -> bool {
        self.cycle_breaks.contains(id)
    }

    /// Ids without a parent, sorted.
    pub fn roots(&self) -> Vec<String> {
        let mut roots: Vec<String> = self
            .containers
            .values()
            .filter(|container| container.parent.is_none())
            .map(|container| container.message_id.clone())
            .collect();
        roots.sort();
        roots
    }

    pub fn is_isolated(&self, id: &str) -> bool {
        self.containers
            .get(id)
            .map(Container::is_isolated)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::email;

    fn forest(ids: &[&str]) -> ThreadForest {
        let emails = ids
            .iter()
            .enumerate()
            .map(|(i, id)| email(id, "Subject", "a@x.com", i as i64))
            .collect();
        ThreadForest::new(&EmailIndex::new(emails))
    }

    #[test]
    fn test_link_rules() {
        let mut forest = forest(&["a", "b", "c"]);
        assert_eq!(forest.link("b", "a"), LinkOutcome::Linked);
        assert_eq!(forest.link("b", "c"), LinkOutcome::AlreadyParented);
        assert_eq!(forest.link("a", "a"), LinkOutcome::SelfLink);
        assert_eq!(forest.link("c", "zz"), LinkOutcome::UnknownMessage);
        assert_eq!(forest.link("a", "b"), LinkOutcome::WouldCycle);
        assert_eq!(forest.roots(), vec!["a".to_string(), "c".to_string()]);
        assert!(forest.is_isolated("c"));
        assert!(!forest.is_isolated("a"));
    }

    #[test]
    fn test_email_index_keeps_first_copy_of_repeated_id() {
        let index = EmailIndex::new(vec![
            email("x", "Later", "a@x.com", 10),
            email("x", "Earlier", "a@x.com", 1),
            email("y", "Other", "a@x.com", 5),
        ]);
        assert_eq!(index.len(), 2);
        assert_eq!(index.get("x").unwrap().subject, "Earlier");
        let order: Vec<&str> = index.chronological().map(|e| e.id.as_str()).collect();
        assert_eq!(order, vec!["x", "y"]);
    }
}
