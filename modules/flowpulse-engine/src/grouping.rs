//! Partition evidence into workflow groups.
//!
//! Records with equal normalized titles always share a group. Distinct keys
//! are then merged transitively (union-find) when the Jaccard similarity of
//! their token sets is strictly above the configured threshold.

use std::collections::{BTreeMap, BTreeSet};

use flowpulse_common::{EvidenceKey, EvidenceRecord, GroupingParams, Tiered, WorkflowGroup};
use tracing::{debug, warn};

use crate::normalize::{normalize, tokens, UNTITLED};

/// Group records by canonical key.
///
/// Returns `Degraded` (exact-key groups only) when the similarity pass cannot
/// run: too many distinct keys for the pairwise budget, or a key without tokens.
pub fn group<'a>(
    records: impl IntoIterator<Item = &'a EvidenceRecord>,
    params: &GroupingParams,
) -> Tiered<BTreeMap<String, WorkflowGroup>> {
    let mut by_key: BTreeMap<String, BTreeSet<EvidenceKey>> = BTreeMap::new();
    for record in records {
        by_key
            .entry(normalize(&record.raw_title))
            .or_default()
            .insert(record.key());
    }

    let candidates: Vec<&str> = by_key
        .keys()
        .map(String::as_str)
        .filter(|k| *k != UNTITLED)
        .collect();

    if candidates.len() > params.max_pairwise_keys {
        let reason = format!(
            "{} distinct keys exceed the pairwise budget of {}",
            candidates.len(),
            params.max_pairwise_keys
        );
        warn!(keys = candidates.len(), budget = params.max_pairwise_keys, "Similarity grouping skipped, exact keys only");
        return Tiered::Degraded(exact_groups(by_key), reason);
    }
    if let Some(empty) = candidates.iter().find(|k| tokens(k).is_empty()) {
        let reason = format!("key {empty:?} has no tokens");
        warn!(key = %empty, "Similarity grouping skipped, exact keys only");
        return Tiered::Degraded(exact_groups(by_key), reason);
    }

    let token_sets: Vec<BTreeSet<&str>> = candidates.iter().map(|k| tokens(k)).collect();
    let mut sets = DisjointSets::new(candidates.len());
    for i in 0..candidates.len() {
        for j in (i + 1)..candidates.len() {
            if jaccard(&token_sets[i], &token_sets[j]) > params.similarity_threshold {
                debug!(a = candidates[i], b = candidates[j], "Merging similar keys");
                sets.union(i, j);
            }
        }
    }

    let mut clusters: BTreeMap<usize, Vec<&str>> = BTreeMap::new();
    for (i, key) in candidates.iter().copied().enumerate() {
        clusters.entry(sets.find(i)).or_default().push(key);
    }

    let mut groups = BTreeMap::new();
    for keys in clusters.into_values() {
        let canonical = canonical_key(&keys, &by_key);
        let member_ids: BTreeSet<EvidenceKey> = keys
            .iter()
            .flat_map(|k| by_key[*k].iter().cloned())
            .collect();
        groups.insert(
            canonical.to_string(),
            WorkflowGroup {
                group_key: canonical.to_string(),
                member_ids,
            },
        );
    }
    if let Some(untitled) = by_key.remove(UNTITLED) {
        groups.insert(
            UNTITLED.to_string(),
            WorkflowGroup {
                group_key: UNTITLED.to_string(),
                member_ids: untitled,
            },
        );
    }

    Tiered::Ok(groups)
}

/// Token-set Jaccard similarity. Two empty sets are not similar.
pub fn jaccard(a: &BTreeSet<&str>, b: &BTreeSet<&str>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

fn exact_groups(by_key: BTreeMap<String, BTreeSet<EvidenceKey>>) -> BTreeMap<String, WorkflowGroup> {
    by_key
        .into_iter()
        .map(|(key, member_ids)| {
            (
                key.clone(),
                WorkflowGroup {
                    group_key: key,
                    member_ids,
                },
            )
        })
        .collect()
}

/// Most frequent member key; ties go to the shortest, then the lexicographically smallest.
fn canonical_key<'a>(keys: &[&'a str], by_key: &BTreeMap<String, BTreeSet<EvidenceKey>>) -> &'a str {
    let mut best = keys[0];
    for key in &keys[1..] {
        let (count, best_count) = (by_key[*key].len(), by_key[best].len());
        let better = count > best_count
            || (count == best_count
                && (key.len() < best.len() || (key.len() == best.len() && *key < best)));
        if better {
            best = key;
        }
    }
    best
}

struct DisjointSets {
    parent: Vec<usize>,
}

impl DisjointSets {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// The smaller root wins, so roots do not depend on merge order.
    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[child] = root;
        }
    }
}
