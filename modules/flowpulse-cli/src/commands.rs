use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use flowpulse_common::{CanonicalSnapshot, Config, Platform};
use flowpulse_engine::{
    first_failure, parse_payloads, EvidenceLog, FileTarget, Pipeline, PublishPolicy,
    PublishTarget, SnapshotBuilder, TrendMerger,
};
use flowpulse_store::{Catalog, ListQuery, SnapshotFile, SnapshotSource, SnapshotStore};
use trends_client::TrendsClient;

pub fn ingest(config: &Config, files: &[PathBuf]) -> Result<()> {
    let log = EvidenceLog::new(&config.evidence_log_path);
    let mut report = flowpulse_engine::IngestReport::default();

    for file in files {
        let text = std::fs::read_to_string(file)
            .with_context(|| format!("reading {}", file.display()))?;
        let payloads =
            parse_payloads(&text).with_context(|| format!("parsing {}", file.display()))?;
        let file_report = log.ingest_raw(payloads)?;
        info!(
            file = %file.display(),
            accepted = file_report.accepted,
            duplicates = file_report.duplicates,
            rejected = file_report.rejected.len(),
            "Ingested payload file"
        );
        report.absorb(file_report);
    }

    for (source_id, error) in &report.rejected {
        warn!(source_id = %source_id, error = %error, "Rejected evidence");
    }
    println!(
        "accepted: {}  duplicates: {}  rejected: {}",
        report.accepted,
        report.duplicates,
        report.rejected.len()
    );
    Ok(())
}

pub async fn build(config: &Config, with_store: bool) -> Result<()> {
    let trends = match &config.trends_base_url {
        Some(base_url) => {
            let client = TrendsClient::new(
                base_url,
                config.trends_api_key.clone(),
                config.trends.timeout,
            )?;
            TrendMerger::new(Arc::new(client), config.trends.clone())
        }
        None => TrendMerger::synthesized_only(config.trends.clone()),
    };

    let snapshot_builder = SnapshotBuilder::builder()
        .grouping(config.grouping.clone())
        .weights(config.weights)
        .trends(trends)
        .build();

    let mut targets: Vec<Arc<dyn PublishTarget>> =
        vec![Arc::new(FileTarget::new(&config.snapshot_path))];
    if with_store {
        if let Some(store) = connect_store(config).await {
            targets.push(Arc::new(store));
        }
    }

    let pipeline = Pipeline::builder()
        .log(EvidenceLog::new(&config.evidence_log_path))
        .snapshot_builder(snapshot_builder)
        .previous_snapshot(config.snapshot_path.clone())
        .targets(targets)
        .policy(PublishPolicy {
            max_attempts: config.publish_max_attempts,
            ..PublishPolicy::default()
        })
        .build();

    let (_, stats) = pipeline.run().await?;
    println!("{stats}");

    if let Some(err) = first_failure(&stats.publishes) {
        return Err(err.into());
    }
    Ok(())
}

pub async fn top(
    config: &Config,
    limit: usize,
    country: Option<String>,
    platform: Option<Platform>,
) -> Result<()> {
    let catalog = catalog(config);
    let served = catalog.top(limit, country, platform).await?;
    print_json(&served)
}

pub async fn list(config: &Config, filters: ListQuery) -> Result<()> {
    let catalog = catalog(config);
    let served = catalog.list(filters).await?;
    print_json(&served)
}

pub async fn get(config: &Config, id: &str) -> Result<()> {
    let catalog = catalog(config);
    let served = catalog.get(id).await?;
    if served.value.is_none() {
        bail!("no workflow with id {id} in snapshot {}", served.snapshot_version);
    }
    print_json(&served)
}

/// Writes the snapshot JSON Schema to `out`, or prints it when `out` is `None`.
pub fn schema(out: Option<&Path>) -> Result<Option<PathBuf>> {
    let schema = schemars::schema_for!(CanonicalSnapshot);
    let json = serde_json::to_string_pretty(&schema)?;
    match out {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
            Ok(Some(path.to_path_buf()))
        }
        None => {
            println!("{json}");
            Ok(None)
        }
    }
}

/// Store when configured and reachable enough to migrate; `None` otherwise.
async fn connect_store(config: &Config) -> Option<SnapshotStore> {
    let url = config.database_url.as_deref()?;
    let store = match SnapshotStore::connect_lazy(url, config.store_timeout) {
        Ok(store) => store,
        Err(e) => {
            warn!(error = %e, "Store unavailable, continuing without it");
            return None;
        }
    };
    if let Err(e) = store.migrate().await {
        warn!(error = %e, "Store migrations failed, continuing without it");
        return None;
    }
    Some(store)
}

fn catalog(config: &Config) -> Catalog {
    let primary = config.database_url.as_deref().and_then(|url| {
        SnapshotStore::connect_lazy(url, config.store_timeout)
            .map_err(|e| warn!(error = %e, "Store unavailable, serving from file"))
            .ok()
            .map(|store| Arc::new(store) as Arc<dyn SnapshotSource>)
    });
    let fallback: Arc<dyn SnapshotSource> = Arc::new(SnapshotFile::new(&config.snapshot_path));
    Catalog::new(primary, fallback, config.store_timeout)
        .with_version_file(config.data_dir.join("last_served_version"))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
