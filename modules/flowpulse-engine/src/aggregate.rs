//! Fold a group's evidence into totals, per-platform and per-country sums.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use flowpulse_common::{
    EvidenceKey, EvidenceRecord, MetricTotals, Platform, Ratios, WorkflowGroup,
};

/// Everything the scorer and snapshot builder need about one group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupAggregate {
    pub group_key: String,
    pub title: String,
    pub platforms: BTreeSet<Platform>,
    pub primary_platform: Platform,
    pub primary_country: Option<String>,
    pub evidence_count: usize,
    /// Sorted `platform:external_id` keys of the members.
    pub source_ids: Vec<String>,
    pub source_url: String,
    pub last_collected_at: DateTime<Utc>,
    pub metrics: MetricTotals,
    pub platform_metrics: BTreeMap<Platform, MetricTotals>,
    pub ratios: Ratios,
    pub country_breakdown: BTreeMap<String, MetricTotals>,
    /// Evidence records per country, used to weight synthesized trends.
    pub country_evidence: BTreeMap<String, usize>,
}

impl GroupAggregate {
    /// Share of the group's evidence observed in `country`, in [0, 1].
    pub fn country_share(&self, country: &str) -> f64 {
        if self.evidence_count == 0 {
            return 0.0;
        }
        let n = self.country_evidence.get(country).copied().unwrap_or(0);
        n as f64 / self.evidence_count as f64
    }
}

/// Collapse records sharing `(platform, external_id)`: the latest `collected_at`
/// wins, and on equal timestamps the later record in input order.
pub fn dedup_latest(records: impl IntoIterator<Item = EvidenceRecord>) -> BTreeMap<EvidenceKey, EvidenceRecord> {
    let mut latest: BTreeMap<EvidenceKey, EvidenceRecord> = BTreeMap::new();
    for record in records {
        match latest.get(&record.key()) {
            Some(existing) if existing.collected_at > record.collected_at => {}
            _ => {
                latest.insert(record.key(), record);
            }
        }
    }
    latest
}

/// Aggregate one group. Members missing from `pool` are skipped; returns `None`
/// when none are present.
pub fn aggregate(
    group: &WorkflowGroup,
    pool: &BTreeMap<EvidenceKey, EvidenceRecord>,
) -> Option<GroupAggregate> {
    let members: Vec<&EvidenceRecord> = group
        .member_ids
        .iter()
        .filter_map(|id| pool.get(id))
        .collect();
    let newest = members.iter().copied().max_by_key(|r| r.collected_at)?;

    let mut metrics = MetricTotals::default();
    let mut platform_metrics: BTreeMap<Platform, MetricTotals> = BTreeMap::new();
    let mut country_breakdown: BTreeMap<String, MetricTotals> = BTreeMap::new();
    let mut platform_evidence: BTreeMap<Platform, usize> = BTreeMap::new();
    let mut country_evidence: BTreeMap<String, usize> = BTreeMap::new();

    for record in &members {
        metrics.absorb(record);
        platform_metrics.entry(record.platform).or_default().absorb(record);
        *platform_evidence.entry(record.platform).or_default() += 1;
        if let Some(country) = &record.country {
            country_breakdown.entry(country.clone()).or_default().absorb(record);
            *country_evidence.entry(country.clone()).or_default() += 1;
        }
    }

    let mut source_ids: Vec<String> = members.iter().map(|r| r.key().to_string()).collect();
    source_ids.sort();

    Some(GroupAggregate {
        group_key: group.group_key.clone(),
        title: representative_title(&members).unwrap_or_else(|| group.group_key.clone()),
        platforms: platform_metrics.keys().copied().collect(),
        primary_platform: most_common(&platform_evidence).unwrap_or(newest.platform),
        primary_country: most_common(&country_evidence),
        evidence_count: members.len(),
        source_ids,
        source_url: newest.url.clone(),
        last_collected_at: newest.collected_at,
        ratios: Ratios::from_totals(&metrics),
        metrics,
        platform_metrics,
        country_breakdown,
        country_evidence,
    })
}

/// Most frequent non-empty raw title; ties go to the most recently collected.
fn representative_title(members: &[&EvidenceRecord]) -> Option<String> {
    let mut counts: BTreeMap<&str, (usize, DateTime<Utc>)> = BTreeMap::new();
    for record in members {
        let title = record.raw_title.trim();
        if title.is_empty() {
            continue;
        }
        let entry = counts.entry(title).or_insert((0, record.collected_at));
        entry.0 += 1;
        entry.1 = entry.1.max(record.collected_at);
    }
    counts
        .into_iter()
        .max_by(|(ta, (na, at)), (tb, (nb, bt))| {
            na.cmp(nb).then(at.cmp(bt)).then(tb.cmp(ta))
        })
        .map(|(title, _)| title.to_string())
}

/// Key with the highest count; ties go to the smallest key.
fn most_common<K: Ord + Clone>(counts: &BTreeMap<K, usize>) -> Option<K> {
    counts
        .iter()
        .max_by(|(ka, na), (kb, nb)| na.cmp(nb).then(kb.cmp(ka)))
        .map(|(k, _)| k.clone())
}
