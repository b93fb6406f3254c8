//! Cross-folder deduplication.
//!
//! The same physical message is routinely seen more than once: a reply sits
//! in Sent Items and in the recipient's shared Inbox, or a message without a
//! Message-ID is synthesized a different id per folder. This module collapses
//! those copies into one canonical [`NormalizedEmail`] before threading.
//!
//! ## Duplicate Rules
//!
//! Two emails are duplicates when they share an `id`, or when their
//! (subject, sender, minute) key matches and either one of them has a
//! synthesized id or they were read from different folders. Source
//! identifiers such as Outlook EntryIDs differ per folder, so a cross-folder
//! key match is the same message. Two real identifiers in the same folder are
//! never merged by key, and a synthesized copy joins the best-ranked real
//! message in its key bucket.
//!
//! ## Merge Policy
//!
//! The copy from the highest-precedence folder is kept. References are
//! unioned starting from the longest chain, a real timestamp beats an
//! inferred one, participants are unioned, and a real identifier beats a
//! synthesized one. Ids absorbed by a merge are rewritten in every surviving
//! email's reply metadata.
//!
//! The result is independent of input order: members are ranked by folder
//! precedence and id, never by arrival.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use crate::models::NormalizedEmail;
use crate::sync::folders::FolderPrecedence;

/// Result of one deduplication pass.
#[derive(Debug, Clone)]
pub struct DedupOutcome {
    /// Surviving emails, sorted by id.
    pub emails: Vec<NormalizedEmail>,
    /// Number of input records absorbed into another record.
    pub duplicates_merged: usize,
}

/// Key for copies lacking a stable identifier.
type ContentKey = (String, String, i64);

fn content_key(email: &NormalizedEmail) -> ContentKey {
    (
        email.subject_key(),
        email.sender.clone(),
        minute_bucket(email.sent_at),
    )
}

fn minute_bucket(ts: DateTime<Utc>) -> i64 {
    ts.timestamp().div_euclid(60)
}

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, mut node: usize) -> usize {
        while self.parent[node] != node {
            self.parent[node] = self.parent[self.parent[node]];
            node = self.parent[node];
        }
        node
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // Smaller index wins so roots are stable for a given ordering
            let (keep, drop) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[drop] = keep;
        }
    }
}

/// Collapse duplicate copies of the same message.
pub fn dedupe(emails: Vec<NormalizedEmail>, precedence: &FolderPrecedence) -> DedupOutcome {
    let input_len = emails.len();

    // Rank every record once; ordering by rank makes the result independent
    // of the order folders finished in.
    let mut ranked: Vec<(usize, NormalizedEmail)> = emails
        .into_iter()
        .map(|email| (precedence.rank(&email.folder), email))
        .collect();
    ranked.sort_by(|(rank_a, a), (rank_b, b)| {
        rank_a
            .cmp(rank_b)
            .then(a.id_synthesized.cmp(&b.id_synthesized))
            .then_with(|| a.id.cmp(&b.id))
            .then_with(|| a.folder.cmp(&b.folder))
            .then_with(|| a.sent_at.cmp(&b.sent_at))
            .then_with(|| a.references.len().cmp(&b.references.len()).reverse())
            .then_with(|| a.timestamp_inferred.cmp(&b.timestamp_inferred))
    });

    let mut sets = DisjointSet::new(ranked.len());

    // Same id
    let mut first_by_id: HashMap<&str, usize> = HashMap::new();
    for (index, (_, email)) in ranked.iter().enumerate() {
        match first_by_id.get(email.id.as_str()) {
            Some(&first) => sets.union(first, index),
            None => {
                first_by_id.insert(email.id.as_str(), index);
            }
        }
    }

    // Same content key, across synthesized copies or across folders
    let mut buckets: HashMap<ContentKey, Vec<usize>> = HashMap::new();
    for (index, (_, email)) in ranked.iter().enumerate() {
        buckets.entry(content_key(email)).or_default().push(index);
    }
    for members in buckets.values() {
        // Members are in rank order, so the first real copy is the best one
        let anchor = members
            .iter()
            .copied()
            .find(|&i| !ranked[i].1.id_synthesized)
            .or_else(|| members.first().copied());
        let Some(anchor) = anchor else { continue };
        for &member in members {
            if ranked[member].1.id_synthesized {
                sets.union(anchor, member);
            }
        }

        let real: Vec<usize> = members
            .iter()
            .copied()
            .filter(|&i| !ranked[i].1.id_synthesized)
            .collect();
        for (pos, &a) in real.iter().enumerate() {
            for &b in &real[pos + 1..] {
                if ranked[a].1.folder != ranked[b].1.folder {
                    sets.union(a, b);
                }
            }
        }
    }

    let mut groups: HashMap<usize, Vec<usize>> = HashMap::new();
    for index in 0..ranked.len() {
        let root = sets.find(index);
        groups.entry(root).or_default().push(index);
    }

    let mut aliases: HashMap<String, String> = HashMap::new();
    let mut survivors = Vec::with_capacity(groups.len());

    let mut group_list: Vec<Vec<usize>> = groups.into_values().collect();
    group_list.sort_by_key(|members| members[0]);

    for mut members in group_list {
        members.sort_unstable();
        let copies: Vec<&NormalizedEmail> = members.iter().map(|&i| &ranked[i].1).collect();
        let merged = merge_copies(&copies);

        for copy in &copies {
            if copy.id != merged.id {
                aliases.insert(copy.id.clone(), merged.id.clone());
            }
        }
        if copies.len() > 1 {
            log::debug!(
                "dedup: merged {} copies into {} (kept folder {})",
                copies.len(),
                merged.id,
                merged.folder
            );
        }
        survivors.push(merged);
    }

    if !aliases.is_empty() {
        for email in &mut survivors {
            rewrite_aliases(email, &aliases);
        }
    }

    survivors.sort_by(|a, b| a.id.cmp(&b.id));

    let duplicates_merged = input_len - survivors.len();
    if duplicates_merged > 0 {
        log::info!(
            "dedup: {} records collapsed into {} emails ({} duplicates)",
            input_len,
            survivors.len(),
            duplicates_merged
        );
    }

    DedupOutcome {
        emails: survivors,
        duplicates_merged,
    }
}

/// Merge rank-ordered copies; `copies[0]` is the canonical instance.
fn merge_copies(copies: &[&NormalizedEmail]) -> NormalizedEmail {
    let mut merged = copies[0].clone();
    if copies.len() == 1 {
        return merged;
    }

    if merged.id_synthesized {
        if let Some(real) = copies.iter().find(|c| !c.id_synthesized) {
            merged.id = real.id.clone();
            merged.id_synthesized = false;
        }
    }

    if merged.timestamp_inferred {
        if let Some(dated) = copies.iter().find(|c| !c.timestamp_inferred) {
            merged.sent_at = dated.sent_at;
            merged.timestamp_inferred = false;
        }
    }

    if merged.in_reply_to.is_none() {
        merged.in_reply_to = copies.iter().find_map(|c| c.in_reply_to.clone());
    }

    if merged.subject.is_empty() {
        if let Some(titled) = copies.iter().find(|c| !c.subject.is_empty()) {
            merged.subject = titled.subject.clone();
            merged.normalized_subject = titled.normalized_subject.clone();
        }
    }

    if merged.body_length.is_none() {
        merged.body_length = copies.iter().find_map(|c| c.body_length);
    }

    // Longest chain first (earliest rank on ties), then fill in the rest
    let longest = copies
        .iter()
        .enumerate()
        .max_by(|(ia, a), (ib, b)| a.references.len().cmp(&b.references.len()).then(ib.cmp(ia)))
        .map(|(_, c)| c.references.clone())
        .unwrap_or_default();
    let mut references = longest;
    for copy in copies {
        for reference in &copy.references {
            if !references.contains(reference) {
                references.push(reference.clone());
            }
        }
    }
    merged.references = references;

    for copy in &copies[1..] {
        merged.participants.extend(copy.participants.iter().cloned());
    }

    merged
}

fn rewrite_aliases(email: &mut NormalizedEmail, aliases: &HashMap<String, String>) {
    if let Some(parent) = email.in_reply_to.take() {
        let parent = aliases.get(&parent).cloned().unwrap_or(parent);
        email.in_reply_to = (parent != email.id).then_some(parent);
    }

    let mut seen = BTreeSet::new();
    let references = std::mem::take(&mut email.references);
    email.references = references
        .into_iter()
        .map(|reference| aliases.get(&reference).cloned().unwrap_or(reference))
        .filter(|reference| reference != &email.id && seen.insert(reference.clone()))
        .collect();
}
