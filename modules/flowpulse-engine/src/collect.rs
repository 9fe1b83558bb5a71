//! Running platform collectors with isolated failures.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use flowpulse_common::{EvidenceRecord, FlowPulseError, Platform, RawEvidence};
use futures::future::join_all;
use rand::Rng;
use tokio::sync::Semaphore;
use tracing::{info, warn};

#[async_trait]
pub trait Collector: Send + Sync {
    fn platform(&self) -> Platform;
    async fn collect(&self, region: &str) -> Result<Vec<RawEvidence>, FlowPulseError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum CollectionStatus {
    Success,
    /// Some payloads were unusable; the rest were kept.
    Partial { rejected: usize },
    /// Every attempt failed. No new evidence from this collector this run.
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectorOutcome {
    pub platform: Platform,
    pub region: String,
    pub attempts: u32,
    pub records: usize,
    pub status: CollectionStatus,
}

#[derive(Debug, Default)]
pub struct CollectionReport {
    pub outcomes: Vec<CollectorOutcome>,
    pub records: Vec<EvidenceRecord>,
}

impl CollectionReport {
    pub fn failed(&self) -> impl Iterator<Item = &CollectorOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, CollectionStatus::Failed { .. }))
    }
}

#[derive(Debug, Clone)]
pub struct CollectionRunner {
    pub per_platform_concurrency: usize,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub retry_base: Duration,
}

impl Default for CollectionRunner {
    fn default() -> Self {
        Self {
            per_platform_concurrency: 2,
            timeout: Duration::from_secs(120),
            max_attempts: 3,
            retry_base: Duration::from_secs(2),
        }
    }
}

impl CollectionRunner {
    /// Run every collector for every region. Concurrency is capped per platform;
    /// one collector failing never affects another.
    pub async fn run(&self, collectors: &[Arc<dyn Collector>], regions: &[String]) -> CollectionReport {
        let mut semaphores: BTreeMap<Platform, Arc<Semaphore>> = BTreeMap::new();
        for collector in collectors {
            semaphores
                .entry(collector.platform())
                .or_insert_with(|| Arc::new(Semaphore::new(self.per_platform_concurrency.max(1))));
        }

        let semaphores = &semaphores;
        let jobs = collectors.iter().flat_map(|collector| {
            regions.iter().map(move |region| {
                let permits = semaphores[&collector.platform()].clone();
                async move {
                    let _permit = permits.acquire_owned().await.ok();
                    self.run_one(collector.as_ref(), region).await
                }
            })
        });
        let results = join_all(jobs).await;

        let mut report = CollectionReport::default();
        for (outcome, records) in results {
            report.outcomes.push(outcome);
            report.records.extend(records);
        }
        info!(
            collectors = report.outcomes.len(),
            failed = report.failed().count(),
            records = report.records.len(),
            "Collection complete"
        );
        report
    }

    async fn run_one(&self, collector: &dyn Collector, region: &str) -> (CollectorOutcome, Vec<EvidenceRecord>) {
        let platform = collector.platform();
        let max_attempts = self.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 0..max_attempts {
            let error = match tokio::time::timeout(self.timeout, collector.collect(region)).await {
                Ok(Ok(payloads)) => {
                    let received_at = Utc::now();
                    let mut records = Vec::with_capacity(payloads.len());
                    let mut rejected = 0;
                    for payload in payloads {
                        match payload.into_record(received_at) {
                            Ok(record) if record.platform == platform => records.push(record),
                            Ok(record) => {
                                warn!(%platform, got = %record.platform, "Collector emitted another platform's record");
                                rejected += 1;
                            }
                            Err(e) => {
                                warn!(%platform, region, error = %e, "Dropping invalid payload");
                                rejected += 1;
                            }
                        }
                    }
                    let status = if rejected == 0 {
                        CollectionStatus::Success
                    } else {
                        CollectionStatus::Partial { rejected }
                    };
                    let outcome = CollectorOutcome {
                        platform,
                        region: region.to_string(),
                        attempts: attempt + 1,
                        records: records.len(),
                        status,
                    };
                    return (outcome, records);
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("timed out after {}s", self.timeout.as_secs()),
            };

            if attempt + 1 < max_attempts {
                let backoff = self.retry_base * 3u32.pow(attempt);
                warn!(
                    %platform,
                    region,
                    attempt = attempt + 1,
                    backoff_secs = backoff.as_secs(),
                    error = %error,
                    "Collector failed, retrying after backoff"
                );
                let jitter = if self.retry_base.is_zero() {
                    Duration::ZERO
                } else {
                    Duration::from_millis(rand::rng().random_range(0..1000))
                };
                tokio::time::sleep(backoff + jitter).await;
            }
            last_error = error;
        }

        warn!(%platform, region, error = %last_error, "Collector exhausted retries, no new evidence this run");
        let outcome = CollectorOutcome {
            platform,
            region: region.to_string(),
            attempts: max_attempts,
            records: 0,
            status: CollectionStatus::Failed { error: last_error },
        };
        (outcome, Vec::new())
    }
}
