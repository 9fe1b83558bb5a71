//! Store-primary, file-fallback reads.
//!
//! Both tiers load a whole [`CanonicalSnapshot`] and run the same query code,
//! so a read answers the same way whichever tier serves it.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use flowpulse_common::{
    CanonicalSnapshot, CanonicalWorkflow, Platform, ServingUnavailable, SourceFailure, Tiered,
};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{ReadError, Result, StoreError};
use crate::query::{self, ListQuery, Page};

#[async_trait]
pub trait SnapshotSource: Send + Sync {
    fn name(&self) -> &str;
    async fn load(&self) -> Result<CanonicalSnapshot>;
}

/// The published snapshot file. Read-only.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SnapshotSource for SnapshotFile {
    fn name(&self) -> &str {
        "snapshot_file"
    }

    async fn load(&self) -> Result<CanonicalSnapshot> {
        let path = self.path.clone();
        let loaded = tokio::task::spawn_blocking(move || flowpulse_engine::load_snapshot(&path))
            .await
            .map_err(|e| StoreError::Snapshot(flowpulse_common::FlowPulseError::Anyhow(e.into())))??;
        loaded.ok_or(StoreError::Empty)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Primary,
    Fallback,
}

/// A read result tagged with where it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Served<T> {
    pub value: T,
    pub tier: Tier,
    pub source: String,
    pub snapshot_version: String,
    /// Why the primary tier did not answer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded_reason: Option<String>,
}

pub struct Catalog {
    primary: Option<Arc<dyn SnapshotSource>>,
    fallback: Arc<dyn SnapshotSource>,
    timeout: Duration,
    last_known_version: RwLock<Option<String>>,
    version_file: Option<PathBuf>,
}

impl Catalog {
    pub fn new(
        primary: Option<Arc<dyn SnapshotSource>>,
        fallback: Arc<dyn SnapshotSource>,
        timeout: Duration,
    ) -> Self {
        Self {
            primary,
            fallback,
            timeout,
            last_known_version: RwLock::new(None),
            version_file: None,
        }
    }

    /// Remember the last served version in `path`, so an outage reported by a
    /// later process still names the last known-good snapshot.
    pub fn with_version_file(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if let Ok(text) = std::fs::read_to_string(&path) {
            let version = text.trim();
            if !version.is_empty() {
                if let Ok(slot) = self.last_known_version.get_mut() {
                    *slot = Some(version.to_string());
                }
            }
        }
        self.version_file = Some(path);
        self
    }

    /// Version of the last snapshot any read was served from.
    pub fn last_known_version(&self) -> Option<String> {
        self.last_known_version.read().ok().and_then(|v| v.clone())
    }

    /// The current snapshot through the fallback chain.
    pub async fn snapshot(&self) -> Tiered<CanonicalSnapshot> {
        match self.resolve().await {
            Ok(served) => match served.degraded_reason {
                None => Tiered::Ok(served.value),
                Some(reason) => Tiered::Degraded(served.value, reason),
            },
            Err(unavailable) => Tiered::Unavailable(unavailable.to_string()),
        }
    }

    pub async fn top(
        &self,
        limit: usize,
        country: Option<String>,
        platform: Option<Platform>,
    ) -> std::result::Result<Served<Vec<CanonicalWorkflow>>, ReadError> {
        let page = self.list(ListQuery::top(limit, country, platform)).await?;
        Ok(map_served(page, |p| p.items))
    }

    pub async fn list(&self, filters: ListQuery) -> std::result::Result<Served<Page>, ReadError> {
        let filters = filters.validated()?;
        let served = self.resolve().await?;
        Ok(map_served(served, |snapshot| query::run(&snapshot, &filters)))
    }

    /// One workflow by its id or by the source id of any of its evidence records.
    pub async fn get(
        &self,
        id_or_source: &str,
    ) -> std::result::Result<Served<Option<CanonicalWorkflow>>, ServingUnavailable> {
        let served = self.resolve().await?;
        Ok(map_served(served, |snapshot| snapshot.find(id_or_source).cloned()))
    }

    async fn resolve(&self) -> std::result::Result<Served<CanonicalSnapshot>, ServingUnavailable> {
        let mut failures = Vec::new();

        if let Some(primary) = &self.primary {
            match self.load_from(primary.as_ref()).await {
                Ok(snapshot) => {
                    self.remember(&snapshot.snapshot_version).await;
                    return Ok(self.served(snapshot, Tier::Primary, primary.name(), None));
                }
                Err(e) => {
                    warn!(source = primary.name(), error = %e, "Primary source unavailable, falling back");
                    failures.push(SourceFailure {
                        source: primary.name().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        match self.load_from(self.fallback.as_ref()).await {
            Ok(snapshot) => {
                self.remember(&snapshot.snapshot_version).await;
                let reason = if self.primary.is_none() {
                    "store not configured".to_string()
                } else {
                    failures
                        .iter()
                        .map(|f| format!("{}: {}", f.source, f.reason))
                        .collect::<Vec<_>>()
                        .join("; ")
                };
                Ok(self.served(snapshot, Tier::Fallback, self.fallback.name(), Some(reason)))
            }
            Err(e) => {
                failures.push(SourceFailure {
                    source: self.fallback.name().to_string(),
                    reason: e.to_string(),
                });
                let unavailable = ServingUnavailable {
                    failures,
                    last_known_version: self.last_known_version(),
                };
                warn!(error = %unavailable, "No serving tier available");
                Err(unavailable)
            }
        }
    }

    async fn load_from(&self, source: &dyn SnapshotSource) -> Result<CanonicalSnapshot> {
        tokio::time::timeout(self.timeout, source.load())
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
    }

    async fn remember(&self, version: &str) {
        let changed = match self.last_known_version.write() {
            Ok(mut last) if last.as_deref() != Some(version) => {
                *last = Some(version.to_string());
                true
            }
            _ => false,
        };
        if let (true, Some(path)) = (changed, &self.version_file) {
            if let Err(e) = tokio::fs::write(path, version).await {
                warn!(path = %path.display(), error = %e, "Could not record served snapshot version");
            }
        }
    }

    fn served(
        &self,
        snapshot: CanonicalSnapshot,
        tier: Tier,
        source: &str,
        degraded_reason: Option<String>,
    ) -> Served<CanonicalSnapshot> {
        debug!(source, version = %snapshot.snapshot_version, "Serving snapshot");
        Served {
            snapshot_version: snapshot.snapshot_version.clone(),
            value: snapshot,
            tier,
            source: source.to_string(),
            degraded_reason,
        }
    }
}

fn map_served<T, U>(served: Served<T>, f: impl FnOnce(T) -> U) -> Served<U> {
    Served {
        value: f(served.value),
        tier: served.tier,
        source: served.source,
        snapshot_version: served.snapshot_version,
        degraded_reason: served.degraded_reason,
    }
}
