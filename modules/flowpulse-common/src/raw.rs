//! Loosely-typed collector payloads.
//!
//! Collectors written against the platform APIs emit JSON objects with a
//! free-form `metrics` map (nulls, floats, extra fields). This module turns
//! one such object into a validated [`EvidenceRecord`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::ValidationError;
use crate::types::{EvidenceRecord, Metric, Platform};

#[derive(Debug, Clone, Deserialize)]
pub struct RawEvidence {
    pub platform: String,
    #[serde(alias = "external_id")]
    pub source_id: Option<String>,
    #[serde(alias = "url")]
    pub source_url: Option<String>,
    #[serde(alias = "raw_title")]
    pub title: Option<String>,
    pub keyword: Option<String>,
    #[serde(default)]
    pub metrics: serde_json::Map<String, Value>,
    pub country: Option<String>,
    #[serde(alias = "collected_at")]
    pub scrape_ts: Option<String>,
}

impl RawEvidence {
    /// Convert to a validated record. `received_at` stands in for a missing or
    /// unparseable collection timestamp.
    pub fn into_record(self, received_at: DateTime<Utc>) -> Result<EvidenceRecord, ValidationError> {
        let platform: Platform = self.platform.parse()?;
        let external_id = self.source_id.unwrap_or_default();

        let mut metrics = BTreeMap::new();
        for (field, value) in &self.metrics {
            let Some(metric) = metric_for_field(platform, field) else {
                continue;
            };
            if let Some(count) = count_value(field, value)? {
                metrics.insert(metric, count);
            }
        }

        let country = self
            .country
            .or_else(|| {
                self.metrics
                    .get("country")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            });

        let collected_at = self
            .scrape_ts
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or(received_at);

        let raw_title = self.title.or(self.keyword).unwrap_or_default();
        let url = self.source_url.unwrap_or_default();

        EvidenceRecord {
            platform,
            external_id,
            raw_title,
            url,
            metrics,
            country,
            collected_at,
        }
        .validate()
    }
}

fn metric_for_field(platform: Platform, field: &str) -> Option<Metric> {
    match (platform, field) {
        (_, "views") => Some(Metric::Views),
        (_, "likes") => Some(Metric::Likes),
        (_, "comments") => Some(Metric::Comments),
        (_, "replies") => Some(Metric::Replies),
        (Platform::GoogleAds, "monthly_searches") => Some(Metric::Views),
        (Platform::GoogleTrends, "monthly_search_estimate") => Some(Metric::Views),
        _ => None,
    }
}

/// Non-negative integer count. `null` means "not reported".
fn count_value(field: &str, value: &Value) -> Result<Option<u64>, ValidationError> {
    let invalid = || ValidationError::InvalidMetricValue {
        field: field.to_string(),
        value: value.to_string(),
    };
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => {
            if let Some(v) = n.as_u64() {
                return Ok(Some(v));
            }
            match n.as_f64() {
                Some(f) if f.is_finite() && f >= 0.0 => Ok(Some(f.floor() as u64)),
                _ => Err(invalid()),
            }
        }
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => s
            .trim()
            .replace(',', "")
            .parse::<u64>()
            .map(Some)
            .map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
