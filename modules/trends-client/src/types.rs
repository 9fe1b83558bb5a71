use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct InterestQuery<'a> {
    pub keyword: &'a str,
    pub geo: &'a str,
    pub timeframe: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InterestPoint {
    pub period: String,
    /// Relative interest. Upstream reports 0-100; out-of-range values are clamped by callers.
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InterestSeries {
    #[serde(default)]
    pub keyword: String,
    #[serde(default)]
    pub geo: String,
    #[serde(default)]
    pub points: Vec<InterestPoint>,
    /// Mean interest of the anchor keyword over the same window, when one was requested.
    #[serde(default)]
    pub anchor_average: Option<f64>,
}
