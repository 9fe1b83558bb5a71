//! Country-segmented search-interest series for each workflow.
//!
//! A live [`TrendSource`] is tried first, bounded by a timeout and a retry
//! budget. Anything short of a usable live series falls back to a series
//! synthesized from the workflow's own metrics, tagged as such point by point.
//! After `trip_after` exhausted fetches in a row the source is left alone for
//! the rest of the run.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Duration as ChronoDuration};
use flowpulse_common::{Tiered, TrendAnchor, TrendParams, TrendSeries};
use futures::stream::{self, StreamExt};
use rand::Rng;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};
use trends_client::{TrendsClient, TrendsError};

use crate::aggregate::GroupAggregate;

/// Number of weekly points in a synthesized series.
pub const SYNTHESIZED_WEEKS: usize = 12;

#[derive(Debug, Clone, PartialEq)]
pub struct TrendQuery {
    pub keyword: String,
    pub country: String,
    pub anchor: Option<TrendAnchor>,
}

/// Raw live series: period label and relative interest.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LiveSeries {
    pub points: Vec<(String, f64)>,
    pub anchor_average: Option<f64>,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TrendFetchError {
    #[error("rate limited")]
    RateLimited,

    #[error("timed out")]
    Timeout,

    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The source answered but will not give a usable series for this query.
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("live source circuit open")]
    CircuitOpen,
}

impl TrendFetchError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TrendFetchError::Rejected(_) | TrendFetchError::CircuitOpen)
    }
}

#[async_trait]
pub trait TrendSource: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch(&self, query: &TrendQuery) -> Result<LiveSeries, TrendFetchError>;
}

#[async_trait]
impl TrendSource for TrendsClient {
    fn name(&self) -> &str {
        "trends-api"
    }

    async fn fetch(&self, query: &TrendQuery) -> Result<LiveSeries, TrendFetchError> {
        let anchor = query.anchor.as_ref().map(|a| a.keyword.as_str());
        let series = self
            .interest(&query.keyword, &query.country, anchor)
            .await
            .map_err(|e| match e {
                TrendsError::RateLimited { .. } => TrendFetchError::RateLimited,
                TrendsError::Timeout => TrendFetchError::Timeout,
                e if e.is_transient() => TrendFetchError::Unavailable(e.to_string()),
                e => TrendFetchError::Rejected(e.to_string()),
            })?;
        Ok(LiveSeries {
            points: series.points.into_iter().map(|p| (p.period, p.value)).collect(),
            anchor_average: series.anchor_average,
        })
    }
}

/// Series attached to every workflow, keyed by `group_key` then country.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedTrends {
    pub series: BTreeMap<String, BTreeMap<String, TrendSeries>>,
    pub live: usize,
    pub synthesized: usize,
}

pub struct TrendMerger {
    source: Option<Arc<dyn TrendSource>>,
    params: TrendParams,
    consecutive_failures: AtomicU32,
    tripped: AtomicBool,
}

impl TrendMerger {
    pub fn new(source: Arc<dyn TrendSource>, params: TrendParams) -> Self {
        Self {
            source: Some(source),
            params,
            consecutive_failures: AtomicU32::new(0),
            tripped: AtomicBool::new(false),
        }
    }

    /// A merger that only synthesizes.
    pub fn synthesized_only(params: TrendParams) -> Self {
        Self {
            source: None,
            params,
            consecutive_failures: AtomicU32::new(0),
            tripped: AtomicBool::new(false),
        }
    }

    /// Whether the live source has been given up on for this run.
    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    pub fn params(&self) -> &TrendParams {
        &self.params
    }

    /// Series for one (workflow, country). `Ok` is live, `Degraded` is
    /// synthesized with the reason, `Unavailable` means the country is not supported.
    pub async fn merge_trends(&self, workflow: &GroupAggregate, country: &str) -> Tiered<TrendSeries> {
        if !self.params.supports(country) {
            return Tiered::Unavailable(format!("country {country} is not supported"));
        }
        let Some(source) = &self.source else {
            return Tiered::Degraded(
                synthesize(workflow, country, "live trends disabled"),
                "live trends disabled".to_string(),
            );
        };

        let query = TrendQuery {
            keyword: workflow.title.clone(),
            country: country.to_string(),
            anchor: self.params.anchor.clone(),
        };
        match self.fetch_with_retry(source.as_ref(), &query).await {
            Ok(live) if !live.points.is_empty() => Tiered::Ok(self.live_series(live)),
            Ok(_) => {
                let reason = "live source returned no points".to_string();
                Tiered::Degraded(synthesize(workflow, country, &reason), reason)
            }
            Err(TrendFetchError::CircuitOpen) => {
                let reason = TrendFetchError::CircuitOpen.to_string();
                debug!(workflow = %workflow.group_key, country, "Skipping live fetch");
                Tiered::Degraded(synthesize(workflow, country, &reason), reason)
            }
            Err(e) => {
                warn!(
                    workflow = %workflow.group_key,
                    country,
                    source = source.name(),
                    error = %e,
                    "Live trends unavailable, using synthesized series"
                );
                let reason = e.to_string();
                Tiered::Degraded(synthesize(workflow, country, &reason), reason)
            }
        }
    }

    /// Series for every (workflow, supported country), fetched with bounded concurrency.
    pub async fn merge_all(&self, workflows: &[GroupAggregate]) -> MergedTrends {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.tripped.store(false, Ordering::SeqCst);

        let tasks: Vec<(&GroupAggregate, &str)> = workflows
            .iter()
            .flat_map(|w| self.params.countries.iter().map(move |c| (w, c.as_str())))
            .collect();
        let total = tasks.len();

        let results: Vec<(String, String, Tiered<TrendSeries>)> = stream::iter(tasks)
            .map(|(workflow, country)| async move {
                let outcome = self.merge_trends(workflow, country).await;
                (workflow.group_key.clone(), country.to_string(), outcome)
            })
            .buffer_unordered(self.params.concurrency.max(1))
            .collect()
            .await;

        let mut merged = MergedTrends::default();
        for (group_key, country, outcome) in results {
            let series = match outcome {
                Tiered::Ok(series) => {
                    merged.live += 1;
                    series
                }
                Tiered::Degraded(series, _) => {
                    merged.synthesized += 1;
                    series
                }
                Tiered::Unavailable(_) => continue,
            };
            merged.series.entry(group_key).or_default().insert(country, series);
        }

        info!(
            requests = total,
            live = merged.live,
            synthesized = merged.synthesized,
            tripped = self.is_tripped(),
            "Trend merge complete"
        );
        merged
    }

    async fn fetch_with_retry(
        &self,
        source: &dyn TrendSource,
        query: &TrendQuery,
    ) -> Result<LiveSeries, TrendFetchError> {
        let max_attempts = self.params.max_attempts.max(1);
        let mut last_error = TrendFetchError::Timeout;
        for attempt in 0..max_attempts {
            if self.is_tripped() {
                return Err(TrendFetchError::CircuitOpen);
            }
            let error = match tokio::time::timeout(self.params.timeout, source.fetch(query)).await {
                Ok(Ok(series)) => {
                    self.consecutive_failures.store(0, Ordering::SeqCst);
                    return Ok(series);
                }
                Ok(Err(e)) if !e.is_retryable() => return Err(e),
                Ok(Err(e)) => e,
                Err(_) => TrendFetchError::Timeout,
            };
            if attempt + 1 < max_attempts {
                let backoff = self.params.retry_base * 3u32.pow(attempt);
                warn!(
                    keyword = %query.keyword,
                    country = %query.country,
                    attempt = attempt + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %error,
                    "Trend fetch failed, retrying after backoff"
                );
                tokio::time::sleep(backoff + jitter(self.params.retry_base)).await;
            }
            last_error = error;
        }
        self.record_exhausted(source, &last_error);
        Err(last_error)
    }

    fn record_exhausted(&self, source: &dyn TrendSource, error: &TrendFetchError) {
        let trip_after = self.params.trip_after;
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if trip_after == 0 || failures < trip_after {
            return;
        }
        if !self.tripped.swap(true, Ordering::SeqCst) {
            warn!(
                source = source.name(),
                failures,
                error = %error,
                "Live trends keep failing, synthesizing the rest of this run"
            );
        }
    }

    fn live_series(&self, live: LiveSeries) -> TrendSeries {
        let points: Vec<(String, u8)> = live
            .points
            .into_iter()
            .map(|(period, value)| (period, to_interest(value)))
            .collect();
        let mut series = TrendSeries::live(points, None);
        if let (Some(anchor), Some(anchor_avg)) = (&self.params.anchor, live.anchor_average) {
            if anchor_avg > 0.0 {
                let estimate = series.recent_mean() * anchor.monthly_volume as f64 / anchor_avg;
                series.monthly_search_estimate = Some(estimate.max(0.0).round() as u64);
            }
        }
        debug!(points = series.points.len(), growth = series.growth_pct_30d, "Live series merged");
        series
    }
}

/// Up to one second of jitter, never more than the base delay itself.
fn jitter(base: Duration) -> Duration {
    let cap = base.as_millis().min(1000) as u64;
    if cap == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..cap))
}

fn to_interest(value: f64) -> u8 {
    if value.is_finite() {
        value.round().clamp(0.0, 100.0) as u8
    } else {
        0
    }
}

/// Deterministic stand-in series built from the workflow's own metrics.
///
/// Twelve ISO-week points ending at the week of the latest evidence. The level
/// comes from `log1p(views)` plus engagement, scaled by the country's share of
/// the evidence; the shape is a gentle upward ramp with a small per-workflow wobble.
pub fn synthesize(workflow: &GroupAggregate, country: &str, reason: &str) -> TrendSeries {
    let views = workflow.metrics.views as f64;
    let scale = (views.ln_1p() / 16.0).min(1.0);
    let engagement = (workflow.ratios.like_rate * 5.0 + workflow.ratios.comment_rate * 10.0).min(1.0);
    let share = workflow.country_share(country);
    let base = 100.0 * (0.75 * scale + 0.25 * engagement) * (0.5 + 0.5 * share);

    let phase = phase_of(&workflow.group_key, country);
    let end = workflow.last_collected_at.date_naive();
    let last = (SYNTHESIZED_WEEKS - 1) as f64;

    let points = (0..SYNTHESIZED_WEEKS)
        .map(|i| {
            let date = end - ChronoDuration::weeks((SYNTHESIZED_WEEKS - 1 - i) as i64);
            let week = date.iso_week();
            let label = format!("{}-W{:02}", week.year(), week.week());
            let ramp = 0.6 + 0.4 * (i as f64 / last);
            let wobble = 1.0 + 0.05 * (phase + i as f64).sin();
            (label, to_interest(base * ramp * wobble))
        })
        .collect();

    TrendSeries::synthesized(points, reason)
}

fn phase_of(group_key: &str, country: &str) -> f64 {
    let digest = Sha256::digest(format!("{group_key}|{country}").as_bytes());
    let byte = digest.first().copied().unwrap_or(0);
    f64::from(byte) / 255.0 * std::f64::consts::TAU
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use flowpulse_common::{MetricTotals, Platform, Ratios};
    use std::sync::atomic::AtomicUsize;

    fn workflow(views: u64, likes: u64) -> GroupAggregate {
        let metrics = MetricTotals {
            views,
            likes,
            ..Default::default()
        };
        GroupAggregate {
            group_key: "slack bot".to_string(),
            title: "Slack Bot".to_string(),
            platforms: [Platform::YouTube].into(),
            primary_platform: Platform::YouTube,
            primary_country: Some("US".to_string()),
            evidence_count: 2,
            source_ids: vec!["YouTube:a".to_string(), "YouTube:b".to_string()],
            source_url: "https://example.com".to_string(),
            last_collected_at: Utc.with_ymd_and_hms(2026, 3, 18, 9, 0, 0).unwrap(),
            metrics,
            platform_metrics: [(Platform::YouTube, metrics)].into(),
            ratios: Ratios::from_totals(&metrics),
            country_breakdown: [("US".to_string(), metrics)].into(),
            country_evidence: [("US".to_string(), 2)].into(),
        }
    }

    fn fast_params() -> TrendParams {
        TrendParams {
            timeout: Duration::from_millis(200),
            max_attempts: 2,
            retry_base: Duration::ZERO,
            ..TrendParams::default()
        }
    }

    struct FixedSource {
        calls: AtomicUsize,
        result: Result<LiveSeries, TrendFetchError>,
    }

    #[async_trait]
    impl TrendSource for FixedSource {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn fetch(&self, _query: &TrendQuery) -> Result<LiveSeries, TrendFetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    fn fixed(result: Result<LiveSeries, TrendFetchError>) -> Arc<FixedSource> {
        Arc::new(FixedSource {
            calls: AtomicUsize::new(0),
            result,
        })
    }

    #[test]
    fn synthesized_series_is_deterministic_and_tagged() {
        let w = workflow(50_000, 2_000);
        let a = synthesize(&w, "US", "timeout");
        let b = synthesize(&w, "US", "timeout");
        assert_eq!(a, b);
        assert_eq!(a.points.len(), SYNTHESIZED_WEEKS);
        assert!(a.points.iter().all(|p| p.synthesized && p.value <= 100));
        assert_eq!(a.points.last().unwrap().period, "2026-W12");
        assert!(a.is_synthesized());
    }

    #[test]
    fn country_without_evidence_gets_a_lower_level() {
        let w = workflow(50_000, 2_000);
        let us = synthesize(&w, "US", "x");
        let india = synthesize(&w, "IN", "x");
        assert!(us.recent_mean() > india.recent_mean());
    }

    #[tokio::test]
    async fn live_series_is_used_and_rescaled() {
        let source = fixed(Ok(LiveSeries {
            points: vec![("2026-03-01".into(), 40.0), ("2026-03-02".into(), 60.0)],
            anchor_average: Some(25.0),
        }));
        let params = TrendParams {
            anchor: Some(TrendAnchor {
                keyword: "zapier".into(),
                monthly_volume: 1_000,
            }),
            ..fast_params()
        };
        let merger = TrendMerger::new(source, params);
        let outcome = merger.merge_trends(&workflow(10, 1), "US").await;
        let series = match outcome {
            Tiered::Ok(series) => series,
            other => panic!("expected live series, got {other:?}"),
        };
        assert!(series.points.iter().all(|p| !p.synthesized));
        assert_eq!(series.monthly_search_estimate, Some(2_000));
        assert!((series.growth_pct_30d - 0.5).abs() < 1e-12);
    }

    #[tokio::test]
    async fn rate_limit_retries_then_falls_back() {
        let source = fixed(Err(TrendFetchError::RateLimited));
        let merger = TrendMerger::new(source.clone(), fast_params());
        let outcome = merger.merge_trends(&workflow(10, 1), "IN").await;
        assert!(outcome.is_degraded());
        assert_eq!(outcome.reason(), Some("rate limited"));
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert!(outcome.value().unwrap().points.iter().all(|p| p.synthesized));
    }

    #[tokio::test]
    async fn rejection_is_not_retried() {
        let source = fixed(Err(TrendFetchError::Rejected("bad keyword".into())));
        let merger = TrendMerger::new(source.clone(), fast_params());
        let outcome = merger.merge_trends(&workflow(10, 1), "US").await;
        assert!(outcome.is_degraded());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_live_series_falls_back() {
        let merger = TrendMerger::new(fixed(Ok(LiveSeries::default())), fast_params());
        let outcome = merger.merge_trends(&workflow(10, 1), "US").await;
        assert!(outcome.is_degraded());
    }

    #[tokio::test]
    async fn unsupported_country_gets_no_series() {
        let merger = TrendMerger::synthesized_only(fast_params());
        assert!(merger.merge_trends(&workflow(10, 1), "DE").await.is_unavailable());
    }

    #[tokio::test]
    async fn merge_all_covers_every_supported_country() {
        let merger = TrendMerger::synthesized_only(fast_params());
        let merged = merger.merge_all(&[workflow(10, 1)]).await;
        let series = &merged.series["slack bot"];
        assert_eq!(series.keys().cloned().collect::<Vec<_>>(), vec!["IN", "US"]);
        assert_eq!(merged.synthesized, 2);
        assert_eq!(merged.live, 0);
    }

    fn named(key: &str) -> GroupAggregate {
        GroupAggregate {
            group_key: key.to_string(),
            title: key.to_string(),
            ..workflow(10, 1)
        }
    }

    #[tokio::test]
    async fn repeated_rate_limits_stop_further_live_fetches() {
        let source = fixed(Err(TrendFetchError::RateLimited));
        let params = TrendParams {
            countries: vec!["US".to_string()],
            concurrency: 1,
            trip_after: 3,
            ..fast_params()
        };
        let merger = TrendMerger::new(source.clone(), params);
        let workflows: Vec<_> = (0..10).map(|i| named(&format!("flow {i}"))).collect();

        let merged = merger.merge_all(&workflows).await;

        // Three exhausted fetches of two attempts each, then nothing.
        assert_eq!(source.calls.load(Ordering::SeqCst), 6);
        assert!(merger.is_tripped());
        assert_eq!(merged.synthesized, 10);
        assert_eq!(merged.live, 0);
        let skipped = &merged.series["flow 9"]["US"];
        assert!(skipped.points.iter().all(|p| p.synthesized));
    }

    #[tokio::test]
    async fn zero_trip_after_keeps_asking_the_source() {
        let source = fixed(Err(TrendFetchError::Timeout));
        let params = TrendParams {
            countries: vec!["US".to_string()],
            concurrency: 1,
            max_attempts: 1,
            trip_after: 0,
            ..fast_params()
        };
        let merger = TrendMerger::new(source.clone(), params);
        let workflows: Vec<_> = (0..8).map(|i| named(&format!("flow {i}"))).collect();

        merger.merge_all(&workflows).await;

        assert_eq!(source.calls.load(Ordering::SeqCst), 8);
        assert!(!merger.is_tripped());
    }

    #[tokio::test]
    async fn next_run_tries_the_source_again() {
        let source = fixed(Err(TrendFetchError::RateLimited));
        let params = TrendParams {
            countries: vec!["US".to_string()],
            concurrency: 1,
            max_attempts: 1,
            trip_after: 2,
            ..fast_params()
        };
        let merger = TrendMerger::new(source.clone(), params);
        let workflows: Vec<_> = (0..4).map(|i| named(&format!("flow {i}"))).collect();

        merger.merge_all(&workflows).await;
        merger.merge_all(&workflows).await;

        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn interest_values_are_clamped() {
        assert_eq!(to_interest(-3.0), 0);
        assert_eq!(to_interest(140.2), 100);
        assert_eq!(to_interest(f64::NAN), 0);
        assert_eq!(to_interest(49.6), 50);
    }
}
