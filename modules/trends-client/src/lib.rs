pub mod error;
pub mod types;

pub use error::{Result, TrendsError};
pub use types::{InterestPoint, InterestQuery, InterestSeries};

use std::time::Duration;

/// Window requested for every series: the last 90 days, daily resolution.
pub const DEFAULT_TIMEFRAME: &str = "today 90-d";

pub struct TrendsClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl TrendsClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TrendsError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch relative search interest for `keyword` in `geo` over the default window.
    /// When `anchor` is given the response also carries the anchor keyword's average.
    pub async fn interest(
        &self,
        keyword: &str,
        geo: &str,
        anchor: Option<&str>,
    ) -> Result<InterestSeries> {
        let query = InterestQuery {
            keyword,
            geo,
            timeframe: DEFAULT_TIMEFRAME,
            anchor,
        };

        let url = format!("{}/interest", self.base_url);
        let mut request = self.client.get(&url).query(&query);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let resp = request.send().await?;

        let status = resp.status();
        if status.as_u16() == 429 {
            let retry_after_secs = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok());
            tracing::warn!(keyword, geo, ?retry_after_secs, "Trends API rate limited");
            return Err(TrendsError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TrendsError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let body = resp.text().await?;
        let series: InterestSeries = serde_json::from_str(&body)?;
        tracing::debug!(keyword, geo, points = series.points.len(), "Fetched interest series");
        Ok(series)
    }
}
