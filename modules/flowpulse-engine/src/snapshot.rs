//! Canonical snapshot assembly.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use flowpulse_common::{
    CanonicalSnapshot, CanonicalWorkflow, EvidenceRecord, FlowPulseError, GroupingParams,
    ScoreWeights, Tiered,
};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::aggregate::{aggregate, dedup_latest};
use crate::grouping::group;
use crate::normalize::normalize;
use crate::score::{fingerprint, score};
use crate::stats::BuildStats;
use crate::trends::TrendMerger;

/// Namespace for ids minted from a `group_key`.
pub const WORKFLOW_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_52a4_9d0e_4b7f_a3c8_2e55_d1f0_7a19);

/// Hex characters kept from the content digest.
const VERSION_LEN: usize = 16;

/// Id for a group key that has no id yet.
pub fn mint_id(group_key: &str) -> Uuid {
    Uuid::new_v5(&WORKFLOW_NAMESPACE, group_key.as_bytes())
}

#[derive(TypedBuilder)]
pub struct SnapshotBuilder {
    #[builder(default)]
    grouping: GroupingParams,
    #[builder(default)]
    weights: ScoreWeights,
    trends: TrendMerger,
}

impl SnapshotBuilder {
    pub async fn build(
        &self,
        records: Vec<EvidenceRecord>,
        previous: Option<&CanonicalSnapshot>,
    ) -> Result<(CanonicalSnapshot, BuildStats), FlowPulseError> {
        self.build_at(records, previous, Utc::now()).await
    }

    /// Group, aggregate, score and attach trends, then seal the result under a
    /// content-addressed version. Nothing is published here.
    pub async fn build_at(
        &self,
        records: Vec<EvidenceRecord>,
        previous: Option<&CanonicalSnapshot>,
        generated_at: DateTime<Utc>,
    ) -> Result<(CanonicalSnapshot, BuildStats), FlowPulseError> {
        let mut stats = BuildStats {
            records_in: records.len(),
            ..Default::default()
        };

        let pool = dedup_latest(records);
        stats.evidence = pool.len();
        stats.distinct_keys = pool
            .values()
            .map(|r| normalize(&r.raw_title))
            .collect::<BTreeSet<_>>()
            .len();

        let groups = match group(pool.values(), &self.grouping) {
            Tiered::Ok(groups) => groups,
            Tiered::Degraded(groups, reason) => {
                warn!(reason = %reason, "Grouping degraded to exact keys");
                stats.grouping_degraded = Some(reason);
                groups
            }
            Tiered::Unavailable(reason) => {
                return Err(FlowPulseError::Config(format!("grouping failed: {reason}")));
            }
        };
        stats.groups = groups.len();
        stats.merged_keys = stats.distinct_keys.saturating_sub(groups.len());

        let aggregates: Vec<_> = groups
            .values()
            .filter_map(|g| aggregate(g, &pool))
            .collect();

        let mut merged = self.trends.merge_all(&aggregates).await;
        stats.live_trends = merged.live;
        stats.synthesized_trends = merged.synthesized;

        let known_ids: BTreeMap<&str, Uuid> = previous.map(|p| p.ids_by_key()).unwrap_or_default();

        let mut workflows = Vec::with_capacity(aggregates.len());
        for agg in aggregates {
            let id = match known_ids.get(agg.group_key.as_str()) {
                Some(id) => {
                    stats.reused_ids += 1;
                    *id
                }
                None => {
                    stats.new_ids += 1;
                    mint_id(&agg.group_key)
                }
            };
            let (popularity_score, score_components) = score(&agg.platform_metrics, &self.weights);
            let trends = merged.series.remove(&agg.group_key).unwrap_or_default();

            workflows.push(CanonicalWorkflow {
                id,
                title: agg.title,
                platforms: agg.platforms,
                primary_platform: agg.primary_platform,
                primary_country: agg.primary_country,
                evidence_count: agg.evidence_count,
                source_ids: agg.source_ids,
                source_url: agg.source_url,
                last_collected_at: agg.last_collected_at,
                metrics: agg.metrics,
                platform_metrics: agg.platform_metrics,
                ratios: agg.ratios,
                popularity_score,
                score_components,
                country_breakdown: agg.country_breakdown,
                trends,
                group_key: agg.group_key,
                snapshot_version: String::new(),
            });
        }

        workflows.sort_by(|a, b| {
            b.popularity_score
                .combined
                .total_cmp(&a.popularity_score.combined)
                .then(a.id.cmp(&b.id))
        });

        let snapshot_version = content_version(&workflows, &self.weights)?;
        for workflow in &mut workflows {
            workflow.snapshot_version = snapshot_version.clone();
        }
        stats.snapshot_version = snapshot_version.clone();

        info!(
            version = %snapshot_version,
            evidence = stats.evidence,
            workflows = workflows.len(),
            merged_keys = stats.merged_keys,
            "Snapshot built"
        );

        Ok((
            CanonicalSnapshot {
                snapshot_version,
                generated_at,
                workflows,
            },
            stats,
        ))
    }
}

/// Digest of the serialized workflows plus the scoring configuration.
fn content_version(workflows: &[CanonicalWorkflow], weights: &ScoreWeights) -> Result<String, FlowPulseError> {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(workflows)?);
    hasher.update(fingerprint(weights).as_bytes());
    let digest = hex::encode(hasher.finalize());
    Ok(digest[..VERSION_LEN].to_string())
}
