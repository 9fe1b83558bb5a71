//! Filtering and ranking shared by every serving tier.

use flowpulse_common::{CanonicalSnapshot, CanonicalWorkflow, Platform};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_LIMIT: usize = 10;
pub const MAX_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    pub platform: Option<Platform>,
    /// Matches workflows with evidence from this country.
    pub country: Option<String>,
    /// Case-insensitive substring of the title or group key.
    pub q: Option<String>,
    pub limit: usize,
    pub page: usize,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            platform: None,
            country: None,
            q: None,
            limit: DEFAULT_LIMIT,
            page: 1,
        }
    }
}

impl ListQuery {
    pub fn top(limit: usize, country: Option<String>, platform: Option<Platform>) -> Self {
        Self {
            platform,
            country,
            limit,
            ..Self::default()
        }
    }

    /// Reject a limit outside 1..=100 or a page below 1. Out-of-range values
    /// are never rewritten, so a page holds exactly `limit` items when enough match.
    pub fn validated(self) -> Result<Self, InvalidQuery> {
        if self.limit == 0 || self.limit > MAX_LIMIT {
            return Err(InvalidQuery(format!(
                "limit must be between 1 and {MAX_LIMIT}, got {}",
                self.limit
            )));
        }
        if self.page == 0 {
            return Err(InvalidQuery("page must be at least 1".to_string()));
        }
        Ok(self.normalized())
    }

    /// Blank text filters dropped, country upper-cased, search text lower-cased.
    pub fn normalized(mut self) -> Self {
        self.country = self
            .country
            .map(|c| c.trim().to_ascii_uppercase())
            .filter(|c| !c.is_empty());
        self.q = self
            .q
            .map(|q| q.trim().to_lowercase())
            .filter(|q| !q.is_empty());
        self
    }

    fn matches(&self, workflow: &CanonicalWorkflow) -> bool {
        if let Some(platform) = self.platform {
            if !workflow.has_platform(platform) {
                return false;
            }
        }
        if let Some(country) = &self.country {
            if !workflow.has_country(country) {
                return false;
            }
        }
        if let Some(q) = &self.q {
            if !workflow.title.to_lowercase().contains(q.as_str()) && !workflow.group_key.contains(q.as_str()) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct InvalidQuery(pub String);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    pub items: Vec<CanonicalWorkflow>,
    /// Matches across all pages.
    pub total: usize,
    pub limit: usize,
    pub page: usize,
    pub snapshot_version: String,
}

/// Filter, rank (score for the platform filter or combined, descending; id
/// ascending on ties) and cut one page. Expects a [`ListQuery::validated`] query.
pub fn run(snapshot: &CanonicalSnapshot, query: &ListQuery) -> Page {
    let query = query.clone().normalized();
    let mut matched: Vec<&CanonicalWorkflow> = snapshot
        .workflows
        .iter()
        .filter(|w| query.matches(w))
        .collect();
    matched.sort_by(|a, b| {
        let (sa, sb) = (
            a.popularity_score.for_platform(query.platform),
            b.popularity_score.for_platform(query.platform),
        );
        sb.total_cmp(&sa).then(a.id.cmp(&b.id))
    });

    let total = matched.len();
    let items = matched
        .into_iter()
        .skip(query.page.saturating_sub(1).saturating_mul(query.limit))
        .take(query.limit)
        .cloned()
        .collect();

    Page {
        items,
        total,
        limit: query.limit,
        page: query.page,
        snapshot_version: snapshot.snapshot_version.clone(),
    }
}
