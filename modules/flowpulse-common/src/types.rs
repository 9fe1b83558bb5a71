use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

// --- Platforms & Metrics ---

/// Where a piece of evidence was observed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub enum Platform {
    YouTube,
    Discourse,
    GoogleTrends,
    GoogleAds,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::YouTube,
        Platform::Discourse,
        Platform::GoogleTrends,
        Platform::GoogleAds,
    ];

    /// Metrics a collector for this platform is allowed to report.
    pub fn allowed_metrics(self) -> &'static [Metric] {
        match self {
            Platform::YouTube => &[Metric::Views, Metric::Likes, Metric::Comments],
            Platform::Discourse => &[Metric::Views, Metric::Likes, Metric::Replies],
            Platform::GoogleTrends | Platform::GoogleAds => &[Metric::Views],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::YouTube => "YouTube",
            Platform::Discourse => "Discourse",
            Platform::GoogleTrends => "GoogleTrends",
            Platform::GoogleAds => "GoogleAds",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "youtube" => Ok(Platform::YouTube),
            "discourse" => Ok(Platform::Discourse),
            "googletrends" | "google_trends" | "trends" => Ok(Platform::GoogleTrends),
            "googleads" | "google_ads" | "ads" => Ok(Platform::GoogleAds),
            _ => Err(ValidationError::UnknownPlatform(s.to_string())),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Views,
    Likes,
    Comments,
    Replies,
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Metric::Views => write!(f, "views"),
            Metric::Likes => write!(f, "likes"),
            Metric::Comments => write!(f, "comments"),
            Metric::Replies => write!(f, "replies"),
        }
    }
}

// --- Evidence ---

/// Identity of an evidence record. Re-collecting the same item yields the same key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EvidenceKey {
    pub platform: Platform,
    pub external_id: String,
}

impl std::fmt::Display for EvidenceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.platform, self.external_id)
    }
}

/// One observation from one platform, as emitted by a collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EvidenceRecord {
    pub platform: Platform,
    pub external_id: String,
    pub raw_title: String,
    pub url: String,
    #[serde(default)]
    pub metrics: BTreeMap<Metric, u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    pub collected_at: DateTime<Utc>,
}

impl EvidenceRecord {
    pub fn key(&self) -> EvidenceKey {
        EvidenceKey {
            platform: self.platform,
            external_id: self.external_id.clone(),
        }
    }

    /// Value of a metric, 0 when the platform did not report it.
    pub fn metric(&self, metric: Metric) -> u64 {
        self.metrics.get(&metric).copied().unwrap_or(0)
    }

    /// Check the record's shape against its platform and canonicalize the country code.
    pub fn validate(mut self) -> Result<Self, ValidationError> {
        if self.external_id.trim().is_empty() {
            return Err(ValidationError::EmptyExternalId);
        }
        let allowed = self.platform.allowed_metrics();
        if let Some(metric) = self.metrics.keys().find(|m| !allowed.contains(m)) {
            return Err(ValidationError::MetricNotAllowed {
                platform: self.platform,
                metric: *metric,
            });
        }
        self.country = match self.country.take() {
            Some(raw) => normalize_country(&raw)?,
            None => None,
        };
        Ok(self)
    }
}

/// Upper-case a two-letter ISO country code. Blank input means "unknown".
pub fn normalize_country(raw: &str) -> Result<Option<String>, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.len() != 2 || !trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ValidationError::InvalidCountry(raw.to_string()));
    }
    Ok(Some(trimmed.to_ascii_uppercase()))
}

// --- Grouping ---

/// Records that refer to the same real-world workflow. Exists only while a build runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowGroup {
    pub group_key: String,
    pub member_ids: BTreeSet<EvidenceKey>,
}

// --- Aggregates ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MetricTotals {
    pub views: u64,
    pub likes: u64,
    pub comments: u64,
    pub replies: u64,
}

impl MetricTotals {
    pub fn get(&self, metric: Metric) -> u64 {
        match metric {
            Metric::Views => self.views,
            Metric::Likes => self.likes,
            Metric::Comments => self.comments,
            Metric::Replies => self.replies,
        }
    }

    pub fn add(&mut self, metric: Metric, value: u64) {
        let slot = match metric {
            Metric::Views => &mut self.views,
            Metric::Likes => &mut self.likes,
            Metric::Comments => &mut self.comments,
            Metric::Replies => &mut self.replies,
        };
        *slot = slot.saturating_add(value);
    }

    pub fn absorb(&mut self, record: &EvidenceRecord) {
        for (metric, value) in &record.metrics {
            self.add(*metric, *value);
        }
    }

    pub fn discussion(&self) -> u64 {
        self.comments.saturating_add(self.replies)
    }
}

/// Engagement ratios, both in [0, 1] and exactly 0 when there are no views.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Ratios {
    pub like_rate: f64,
    pub comment_rate: f64,
}

impl Ratios {
    pub fn from_totals(totals: &MetricTotals) -> Self {
        if totals.views == 0 {
            return Self::default();
        }
        let views = totals.views as f64;
        Self {
            like_rate: (totals.likes as f64 / views).min(1.0),
            comment_rate: (totals.comments as f64 / views).min(1.0),
        }
    }
}

/// Weighted terms making up a score. Summed across platforms for the combined score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScoreComponents {
    pub views: f64,
    pub likes: f64,
    pub discussion: f64,
    pub like_rate: f64,
    pub comment_rate: f64,
}

impl ScoreComponents {
    pub fn total(&self) -> f64 {
        self.views + self.likes + self.discussion + self.like_rate + self.comment_rate
    }

    pub fn accumulate(&mut self, other: &ScoreComponents) {
        self.views += other.views;
        self.likes += other.likes;
        self.discussion += other.discussion;
        self.like_rate += other.like_rate;
        self.comment_rate += other.comment_rate;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PopularityScore {
    /// Sum of the per-platform scores.
    pub combined: f64,
    pub per_platform: BTreeMap<Platform, f64>,
}

impl PopularityScore {
    /// Score used for ranking: the platform's own score when one is given, else the combined one.
    pub fn for_platform(&self, platform: Option<Platform>) -> f64 {
        match platform {
            Some(p) => self.per_platform.get(&p).copied().unwrap_or(0.0),
            None => self.combined,
        }
    }
}

// --- Trends ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TrendOrigin {
    Live,
    Synthesized,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TrendPoint {
    pub period: String,
    /// Relative search interest, 0-100.
    pub value: u8,
    pub synthesized: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TrendSeries {
    pub origin: TrendOrigin,
    pub points: Vec<TrendPoint>,
    /// Change of the recent window's mean interest over the previous window.
    pub growth_pct_30d: f64,
    /// Same over 60-point windows; falls back to the 30-point figure on shorter series.
    #[serde(default)]
    pub growth_pct_60d: f64,
    /// Absolute monthly searches, only when an anchor keyword could rescale the series.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly_search_estimate: Option<u64>,
    /// Why the live source was not used, for synthesized series.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

impl TrendSeries {
    /// A series measured by a live source. Every point is tagged as measured.
    pub fn live(points: Vec<(String, u8)>, monthly_search_estimate: Option<u64>) -> Self {
        Self::tagged(TrendOrigin::Live, points, monthly_search_estimate, None)
    }

    /// An estimate derived from the workflow's own metrics. Every point is tagged as synthesized.
    pub fn synthesized(points: Vec<(String, u8)>, reason: impl Into<String>) -> Self {
        Self::tagged(TrendOrigin::Synthesized, points, None, Some(reason.into()))
    }

    fn tagged(
        origin: TrendOrigin,
        points: Vec<(String, u8)>,
        monthly_search_estimate: Option<u64>,
        fallback_reason: Option<String>,
    ) -> Self {
        let synthesized = origin == TrendOrigin::Synthesized;
        let points: Vec<TrendPoint> = points
            .into_iter()
            .map(|(period, value)| TrendPoint {
                period,
                value: value.min(100),
                synthesized,
            })
            .collect();
        let values: Vec<f64> = points.iter().map(|p| p.value as f64).collect();
        Self {
            origin,
            growth_pct_30d: growth_pct(&values),
            growth_pct_60d: growth_pct_60d(&values),
            points,
            monthly_search_estimate,
            fallback_reason,
        }
    }

    pub fn is_synthesized(&self) -> bool {
        self.origin == TrendOrigin::Synthesized
    }

    /// Mean interest over the most recent 30 points (or all of them when shorter).
    pub fn recent_mean(&self) -> f64 {
        let tail = &self.points[self.points.len().saturating_sub(30)..];
        if tail.is_empty() {
            return 0.0;
        }
        tail.iter().map(|p| p.value as f64).sum::<f64>() / tail.len() as f64
    }
}

/// Growth of the last 30 values over the 30 before them. Shorter series compare
/// the later half against the earlier half; 0 when there is no earlier interest.
pub fn growth_pct(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let (prev, last) = if values.len() >= 60 {
        let n = values.len();
        (&values[n - 60..n - 30], &values[n - 30..])
    } else if values.len() > 30 {
        values.split_at(values.len() - 30)
    } else {
        values.split_at(values.len() / 2)
    };
    relative_change(mean(prev), mean(last))
}

/// Growth of the last 60 values over everything before them. Exactly 60 values
/// have no earlier window and give 0; fewer than 60 use [`growth_pct`].
pub fn growth_pct_60d(values: &[f64]) -> f64 {
    if values.len() < 60 {
        return growth_pct(values);
    }
    let (prev, last) = values.split_at(values.len() - 60);
    if prev.is_empty() {
        return 0.0;
    }
    relative_change(mean(prev), mean(last))
}

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len().max(1) as f64
}

fn relative_change(prev_mean: f64, last_mean: f64) -> f64 {
    if prev_mean == 0.0 {
        return 0.0;
    }
    (last_mean - prev_mean) / prev_mean.max(1.0)
}

// --- Canonical output ---

/// The served entity: one real-world workflow across all platforms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CanonicalWorkflow {
    pub id: Uuid,
    pub group_key: String,
    pub title: String,
    pub platforms: BTreeSet<Platform>,
    pub primary_platform: Platform,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_country: Option<String>,
    pub evidence_count: usize,
    /// `platform:external_id` of every member record, sorted.
    #[serde(default)]
    pub source_ids: Vec<String>,
    pub source_url: String,
    pub last_collected_at: DateTime<Utc>,
    pub metrics: MetricTotals,
    pub platform_metrics: BTreeMap<Platform, MetricTotals>,
    pub ratios: Ratios,
    pub popularity_score: PopularityScore,
    pub score_components: ScoreComponents,
    pub country_breakdown: BTreeMap<String, MetricTotals>,
    pub trends: BTreeMap<String, TrendSeries>,
    pub snapshot_version: String,
}

impl CanonicalWorkflow {
    pub fn has_platform(&self, platform: Platform) -> bool {
        self.platforms.contains(&platform)
    }

    pub fn has_country(&self, country: &str) -> bool {
        self.country_breakdown
            .keys()
            .any(|c| c.eq_ignore_ascii_case(country))
    }

    /// Whether a member record has this `platform:external_id` key or bare external id.
    pub fn has_source(&self, source_id: &str) -> bool {
        self.source_ids.iter().any(|key| {
            key == source_id
                || key
                    .split_once(':')
                    .is_some_and(|(_, external_id)| external_id == source_id)
        })
    }
}

/// One sealed pipeline run. The same document is served as the API fallback and loaded into the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CanonicalSnapshot {
    pub snapshot_version: String,
    pub generated_at: DateTime<Utc>,
    pub workflows: Vec<CanonicalWorkflow>,
}

impl CanonicalSnapshot {
    /// Look a workflow up by its id, or by the source id of any member record.
    pub fn find(&self, id_or_source: &str) -> Option<&CanonicalWorkflow> {
        let id_or_source = id_or_source.trim();
        if let Ok(id) = Uuid::parse_str(id_or_source) {
            if let Some(found) = self.workflows.iter().find(|w| w.id == id) {
                return Some(found);
            }
        }
        self.workflows.iter().find(|w| w.has_source(id_or_source))
    }

    /// `group_key` → `id` of every workflow, used to keep ids stable across rebuilds.
    pub fn ids_by_key(&self) -> BTreeMap<&str, Uuid> {
        self.workflows
            .iter()
            .map(|w| (w.group_key.as_str(), w.id))
            .collect()
    }
}
