//! Popularity scoring.

use std::collections::BTreeMap;

use flowpulse_common::{MetricTotals, Platform, PopularityScore, Ratios, ScoreComponents, ScoreWeights};

/// Weighted terms for one set of totals.
pub fn components(totals: &MetricTotals, weights: &ScoreWeights) -> ScoreComponents {
    let ratios = Ratios::from_totals(totals);
    ScoreComponents {
        views: weights.views * (totals.views as f64).ln_1p(),
        likes: weights.likes * (totals.likes as f64).ln_1p(),
        discussion: weights.discussion * (totals.discussion() as f64).ln_1p(),
        like_rate: weights.like_rate * ratios.like_rate,
        comment_rate: weights.comment_rate * ratios.comment_rate,
    }
}

/// Score every platform's totals; the combined score is their sum.
pub fn score(
    platform_metrics: &BTreeMap<Platform, MetricTotals>,
    weights: &ScoreWeights,
) -> (PopularityScore, ScoreComponents) {
    let mut combined = ScoreComponents::default();
    let mut per_platform = BTreeMap::new();
    for (platform, totals) in platform_metrics {
        let parts = components(totals, weights);
        per_platform.insert(*platform, parts.total());
        combined.accumulate(&parts);
    }
    let score = PopularityScore {
        combined: per_platform.values().sum(),
        per_platform,
    };
    (score, combined)
}

/// Short, stable description of the scoring configuration, mixed into snapshot versions.
pub fn fingerprint(weights: &ScoreWeights) -> String {
    weights
        .as_array()
        .iter()
        .map(|w| format!("{w:.6}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn totals(views: u64, likes: u64, comments: u64, replies: u64) -> MetricTotals {
        MetricTotals {
            views,
            likes,
            comments,
            replies,
        }
    }

    fn single(t: MetricTotals) -> f64 {
        let map = BTreeMap::from([(Platform::YouTube, t)]);
        score(&map, &ScoreWeights::default()).0.combined
    }

    #[test]
    fn empty_metrics_score_zero() {
        assert_eq!(single(MetricTotals::default()), 0.0);
    }

    #[test]
    fn combined_is_sum_of_platforms() {
        let map = BTreeMap::from([
            (Platform::YouTube, totals(1000, 50, 10, 0)),
            (Platform::Discourse, totals(200, 3, 0, 12)),
        ]);
        let (score, parts) = score(&map, &ScoreWeights::default());
        let sum: f64 = score.per_platform.values().sum();
        assert!((score.combined - sum).abs() < 1e-12);
        assert!((parts.total() - score.combined).abs() < 1e-9);
        assert_eq!(score.for_platform(Some(Platform::GoogleAds)), 0.0);
    }

    #[test]
    fn raising_any_metric_never_lowers_the_score() {
        let bases = [
            totals(0, 0, 0, 0),
            totals(1, 1, 1, 0),
            totals(10, 10, 10, 5),
            totals(3, 0, 2, 0),
            totals(1_000_000, 900_000, 800_000, 10),
        ];
        for base in bases {
            let before = single(base);
            for step in [1u64, 7, 1000] {
                let bumped = [
                    totals(base.views + step, base.likes, base.comments, base.replies),
                    totals(base.views, base.likes + step, base.comments, base.replies),
                    totals(base.views, base.likes, base.comments + step, base.replies),
                    totals(base.views, base.likes, base.comments, base.replies + step),
                ];
                for after in bumped {
                    assert!(
                        single(after) >= before - 1e-12,
                        "score fell from {base:?} to {after:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn fingerprint_changes_with_weights() {
        let a = fingerprint(&ScoreWeights::default());
        let b = fingerprint(&ScoreWeights::new(0.5, 0.2, 0.1, 0.1, 0.1).unwrap());
        assert_ne!(a, b);
    }
}
