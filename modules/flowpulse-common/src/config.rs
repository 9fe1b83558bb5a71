use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::info;

use crate::error::FlowPulseError;
use crate::types::normalize_country;

/// Union-find grouping parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupingParams {
    /// Keys merge when token-set Jaccard similarity is strictly above this.
    pub similarity_threshold: f64,
    /// Above this many distinct keys the pairwise pass is skipped.
    pub max_pairwise_keys: usize,
}

impl Default for GroupingParams {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.8,
            max_pairwise_keys: 5000,
        }
    }
}

/// Weights of the popularity score terms:
/// `views·log1p(views) + likes·log1p(likes) + discussion·log1p(comments+replies)
///  + like_rate·like_rate + comment_rate·comment_rate`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    pub views: f64,
    pub likes: f64,
    pub discussion: f64,
    pub like_rate: f64,
    pub comment_rate: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            views: 0.40,
            likes: 0.25,
            discussion: 0.15,
            like_rate: 0.12,
            comment_rate: 0.08,
        }
    }
}

impl ScoreWeights {
    /// Weights must be non-negative, and the view weight must be at least twice
    /// the ratio weights so that extra views never lower a score.
    pub fn new(
        views: f64,
        likes: f64,
        discussion: f64,
        like_rate: f64,
        comment_rate: f64,
    ) -> Result<Self, FlowPulseError> {
        let weights = Self {
            views,
            likes,
            discussion,
            like_rate,
            comment_rate,
        };
        let all = weights.as_array();
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(FlowPulseError::Config(format!(
                "score weights must be finite and non-negative, got {all:?}"
            )));
        }
        if views < 2.0 * (like_rate + comment_rate) {
            return Err(FlowPulseError::Config(format!(
                "view weight {views} must be at least twice the ratio weights ({like_rate} + {comment_rate})"
            )));
        }
        Ok(weights)
    }

    pub fn as_array(&self) -> [f64; 5] {
        [
            self.views,
            self.likes,
            self.discussion,
            self.like_rate,
            self.comment_rate,
        ]
    }

    pub fn total(&self) -> f64 {
        self.as_array().iter().sum()
    }
}

impl FromStr for ScoreWeights {
    type Err = FlowPulseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<f64> = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|e| FlowPulseError::Config(format!("SCORE_WEIGHTS: {e}")))?;
        match parts.as_slice() {
            [v, l, d, lr, cr] => ScoreWeights::new(*v, *l, *d, *lr, *cr),
            _ => Err(FlowPulseError::Config(format!(
                "SCORE_WEIGHTS needs 5 comma-separated values, got {}",
                parts.len()
            ))),
        }
    }
}

/// Reference keyword with a known monthly search volume, used to turn relative
/// interest into absolute search estimates.
#[derive(Debug, Clone, PartialEq)]
pub struct TrendAnchor {
    pub keyword: String,
    pub monthly_volume: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrendParams {
    /// Countries trend series are requested for. Others get no entry.
    pub countries: Vec<String>,
    pub anchor: Option<TrendAnchor>,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub retry_base: Duration,
    pub concurrency: usize,
    /// Exhausted live fetches in a row before the rest of a run is
    /// synthesized without asking the source. Zero never trips.
    pub trip_after: u32,
}

impl Default for TrendParams {
    fn default() -> Self {
        Self {
            countries: vec!["US".to_string(), "IN".to_string()],
            anchor: None,
            timeout: Duration::from_secs(20),
            max_attempts: 3,
            retry_base: Duration::from_secs(2),
            concurrency: 4,
            trip_after: 5,
        }
    }
}

impl TrendParams {
    pub fn supports(&self, country: &str) -> bool {
        self.countries.iter().any(|c| c.eq_ignore_ascii_case(country))
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Files
    pub data_dir: PathBuf,
    pub evidence_log_path: PathBuf,
    pub snapshot_path: PathBuf,

    // Store
    pub database_url: Option<String>,
    pub store_timeout: Duration,

    // Trends
    pub trends_base_url: Option<String>,
    pub trends_api_key: Option<String>,
    pub trends: TrendParams,

    // Engine
    pub grouping: GroupingParams,
    pub weights: ScoreWeights,
    pub publish_max_attempts: u32,
}

impl Config {
    /// Load configuration from environment variables (and `.env` when present).
    pub fn from_env() -> Result<Self, FlowPulseError> {
        dotenvy::dotenv().ok();

        let data_dir = PathBuf::from(env::var("FLOWPULSE_DATA_DIR").unwrap_or_else(|_| "data".to_string()));
        let evidence_log_path = env::var("FLOWPULSE_EVIDENCE_LOG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("evidence.jsonl"));
        let snapshot_path = env::var("FLOWPULSE_SNAPSHOT_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("canonical_workflows.json"));

        let defaults = TrendParams::default();
        let anchor = match (
            optional_env("TRENDS_ANCHOR_KEYWORD"),
            optional_env("TRENDS_ANCHOR_VOLUME"),
        ) {
            (Some(keyword), Some(volume)) => Some(TrendAnchor {
                keyword,
                monthly_volume: parse_value("TRENDS_ANCHOR_VOLUME", &volume)?,
            }),
            _ => None,
        };
        let countries = match optional_env("TRENDS_COUNTRIES") {
            Some(list) => parse_countries(&list)?,
            None => defaults.countries.clone(),
        };
        let trends = TrendParams {
            countries,
            anchor,
            timeout: Duration::from_secs(parsed_env("TRENDS_TIMEOUT_SECS", 20)?),
            max_attempts: parsed_env("TRENDS_MAX_ATTEMPTS", defaults.max_attempts)?.max(1),
            retry_base: defaults.retry_base,
            concurrency: parsed_env("TRENDS_CONCURRENCY", defaults.concurrency)?.max(1),
            trip_after: parsed_env("TRENDS_TRIP_AFTER", defaults.trip_after)?,
        };

        let grouping_defaults = GroupingParams::default();
        let similarity_threshold: f64 = parsed_env(
            "GROUPING_SIMILARITY_THRESHOLD",
            grouping_defaults.similarity_threshold,
        )?;
        if !(0.0..=1.0).contains(&similarity_threshold) {
            return Err(FlowPulseError::Config(format!(
                "GROUPING_SIMILARITY_THRESHOLD must be within [0, 1], got {similarity_threshold}"
            )));
        }

        let weights = match optional_env("SCORE_WEIGHTS") {
            Some(raw) => raw.parse()?,
            None => ScoreWeights::default(),
        };

        Ok(Self {
            data_dir,
            evidence_log_path,
            snapshot_path,
            database_url: optional_env("DATABASE_URL"),
            store_timeout: Duration::from_secs(parsed_env("STORE_TIMEOUT_SECS", 10)?),
            trends_base_url: optional_env("TRENDS_BASE_URL"),
            trends_api_key: optional_env("TRENDS_API_KEY"),
            trends,
            grouping: GroupingParams {
                similarity_threshold,
                max_pairwise_keys: parsed_env(
                    "GROUPING_MAX_PAIRWISE_KEYS",
                    grouping_defaults.max_pairwise_keys,
                )?,
            },
            weights,
            publish_max_attempts: parsed_env("PUBLISH_MAX_ATTEMPTS", 3u32)?.max(1),
        })
    }

    /// Log the effective configuration without secrets.
    pub fn log_redacted(&self) {
        let store = if self.database_url.is_some() { "configured" } else { "disabled" };
        let api_key = if self.trends_api_key.is_some() { "[set]" } else { "[unset]" };
        info!(
            data_dir = %self.data_dir.display(),
            evidence_log = %self.evidence_log_path.display(),
            snapshot = %self.snapshot_path.display(),
            store,
            trends = self.trends_base_url.as_deref().unwrap_or("synthesized-only"),
            trends_api_key = api_key,
            countries = ?self.trends.countries,
            similarity_threshold = self.grouping.similarity_threshold,
            weights = ?self.weights.as_array(),
            "Loaded configuration"
        );
    }
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_env<T: FromStr>(key: &str, default: T) -> Result<T, FlowPulseError>
where
    T::Err: std::fmt::Display,
{
    match optional_env(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, FlowPulseError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| FlowPulseError::Config(format!("{key}={raw:?}: {e}")))
}

fn parse_countries(list: &str) -> Result<Vec<String>, FlowPulseError> {
    let mut countries = Vec::new();
    for part in list.split(',') {
        let code = normalize_country(part)
            .map_err(|e| FlowPulseError::Config(format!("TRENDS_COUNTRIES: {e}")))?;
        if let Some(code) = code {
            if !countries.contains(&code) {
                countries.push(code);
            }
        }
    }
    Ok(countries)
}
