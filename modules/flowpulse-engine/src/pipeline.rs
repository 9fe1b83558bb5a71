use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use flowpulse_common::CanonicalSnapshot;
use tracing::{info, warn};
use typed_builder::TypedBuilder;

use crate::evidence_log::EvidenceLog;
use crate::publish::{load_snapshot, publish_all, PublishPolicy, PublishTarget};
use crate::snapshot::SnapshotBuilder;
use crate::stats::BuildStats;

/// One batch run: evidence log → snapshot → every publish target.
#[derive(TypedBuilder)]
pub struct Pipeline {
    log: EvidenceLog,
    snapshot_builder: SnapshotBuilder,
    /// Published snapshot file, read for id reuse.
    previous_snapshot: PathBuf,
    #[builder(default)]
    targets: Vec<Arc<dyn PublishTarget>>,
    #[builder(default)]
    policy: PublishPolicy,
}

impl Pipeline {
    pub async fn run(&self) -> Result<(CanonicalSnapshot, BuildStats)> {
        let records = self
            .log
            .read_all()
            .with_context(|| format!("Failed to read evidence log {}", self.log.path().display()))?;
        info!(records = records.len(), "Loaded evidence log");

        let previous = match load_snapshot(&self.previous_snapshot) {
            Ok(previous) => previous,
            Err(e) => {
                warn!(
                    path = %self.previous_snapshot.display(),
                    error = %e,
                    "Previous snapshot unreadable, minting fresh ids"
                );
                None
            }
        };

        let (snapshot, mut stats) = self
            .snapshot_builder
            .build(records, previous.as_ref())
            .await
            .context("Snapshot build failed")?;

        stats.publishes = publish_all(&snapshot, &self.targets, self.policy).await;
        info!("{stats}");
        Ok((snapshot, stats))
    }
}
