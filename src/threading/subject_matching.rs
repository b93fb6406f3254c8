//! Subject-based clustering for emails without usable headers.
//!
//! Emails are grouped by case-folded normalized subject and swept in
//! chronological order. An email joins an open cluster when it shares a
//! participant with it and arrived within the subject window of the
//! cluster's latest message; otherwise it opens a new cluster. Members are
//! linked directly under the cluster root (its earliest email).

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};

use crate::models::NormalizedEmail;

use super::container::{LinkOutcome, ThreadForest};

#[derive(Debug)]
struct OpenCluster {
    root_id: String,
    latest: DateTime<Utc>,
    participants: BTreeSet<String>,
}

impl OpenCluster {
    fn accepts(&self, email: &NormalizedEmail, window: Duration) -> bool {
        email.sent_at - self.latest <= window && email.shares_participant(&self.participants)
    }
}

/// Cluster `candidates` by subject and link members under cluster roots.
///
/// Candidates must be roots of the forest with no children of their own.
pub fn link_by_subject(forest: &mut ThreadForest, candidates: &[&NormalizedEmail], window: Duration) {
    let mut subject_index: BTreeMap<String, Vec<&NormalizedEmail>> = BTreeMap::new();
    for &email in candidates {
        let key = email.subject_key();
        if key.is_empty() {
            continue;
        }
        subject_index.entry(key).or_default().push(email);
    }

    for (subject, mut group) in subject_index {
        if group.len() < 2 {
            continue;
        }
        group.sort_by(|a, b| a.chronological_key().cmp(&b.chronological_key()));

        let mut clusters: Vec<OpenCluster> = Vec::new();
        for email in group {
            // Most recent matching cluster; ties go to the smaller root id
            let chosen = clusters
                .iter_mut()
                .filter(|cluster| cluster.accepts(email, window))
                .max_by(|a, b| a.latest.cmp(&b.latest).then_with(|| b.root_id.cmp(&a.root_id)));

            match chosen {
                Some(cluster) => {
                    if forest.link(&email.id, &cluster.root_id) == LinkOutcome::Linked {
                        cluster.latest = cluster.latest.max(email.sent_at);
                        cluster.participants.extend(email.participants.iter().cloned());
                    }
                }
                None => clusters.push(OpenCluster {
                    root_id: email.id.clone(),
                    latest: email.sent_at,
                    participants: email.participants.clone(),
                }),
            }
        }
        log::trace!("threading: subject {:?} formed {} cluster(s)", subject, clusters.len());
    }
}
