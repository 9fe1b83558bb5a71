//! Append-only evidence log (JSON lines).
//!
//! Scoring never rewrites the log. Re-collected items are appended only when
//! they carry a newer `collected_at`; the pool view keeps the latest per key.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use flowpulse_common::{EvidenceKey, EvidenceRecord, FlowPulseError, RawEvidence, ValidationError};
use tracing::{info, warn};

use crate::aggregate::dedup_latest;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct IngestReport {
    pub accepted: usize,
    pub duplicates: usize,
    pub rejected: Vec<(String, ValidationError)>,
}

impl IngestReport {
    pub fn absorb(&mut self, other: IngestReport) {
        self.accepted += other.accepted;
        self.duplicates += other.duplicates;
        self.rejected.extend(other.rejected);
    }
}

#[derive(Debug, Clone)]
pub struct EvidenceLog {
    path: PathBuf,
}

impl EvidenceLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every line ever appended, in order. Unreadable lines are skipped with a warning.
    pub fn read_all(&self) -> Result<Vec<EvidenceRecord>, FlowPulseError> {
        let file = match fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut records = Vec::new();
        for (n, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<EvidenceRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(path = %self.path.display(), line = n + 1, error = %e, "Skipping unreadable evidence line"),
            }
        }
        Ok(records)
    }

    /// Latest record per `(platform, external_id)`.
    pub fn pool(&self) -> Result<BTreeMap<EvidenceKey, EvidenceRecord>, FlowPulseError> {
        Ok(dedup_latest(self.read_all()?))
    }

    /// Validate and append. A record already present with the same or a newer
    /// `collected_at` is a duplicate, so ingesting twice equals ingesting once.
    pub fn ingest(&self, records: Vec<EvidenceRecord>) -> Result<IngestReport, FlowPulseError> {
        let mut latest = self.pool()?;
        let mut report = IngestReport::default();
        let mut fresh = Vec::new();

        for record in records {
            let label = record.key().to_string();
            let record = match record.validate() {
                Ok(r) => r,
                Err(e) => {
                    warn!(record = %label, error = %e, "Rejected evidence record");
                    report.rejected.push((label, e));
                    continue;
                }
            };
            let key = record.key();
            if latest
                .get(&key)
                .is_some_and(|existing| existing.collected_at >= record.collected_at)
            {
                report.duplicates += 1;
                continue;
            }
            latest.insert(key, record.clone());
            fresh.push(record);
        }

        if !fresh.is_empty() {
            self.append(&fresh)?;
        }
        report.accepted = fresh.len();
        info!(
            path = %self.path.display(),
            accepted = report.accepted,
            duplicates = report.duplicates,
            rejected = report.rejected.len(),
            "Evidence ingested"
        );
        Ok(report)
    }

    /// Convert collector payloads, then ingest. Payloads that fail conversion count as rejected.
    pub fn ingest_raw(&self, payloads: Vec<RawEvidence>) -> Result<IngestReport, FlowPulseError> {
        let received_at = Utc::now();
        let mut rejected = Vec::new();
        let mut records = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let label = format!(
                "{}:{}",
                payload.platform,
                payload.source_id.as_deref().unwrap_or("?")
            );
            match payload.into_record(received_at) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(record = %label, error = %e, "Rejected collector payload");
                    rejected.push((label, e));
                }
            }
        }
        let mut report = self.ingest(records)?;
        report.rejected.splice(0..0, rejected);
        Ok(report)
    }

    fn append(&self, records: &[EvidenceRecord]) -> Result<(), FlowPulseError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let mut buf = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(&buf)?;
        file.sync_data()?;
        Ok(())
    }
}

/// Parse a collector dump: a JSON array, a single object, or JSON lines.
pub fn parse_payloads(text: &str) -> Result<Vec<RawEvidence>, FlowPulseError> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }
    let mut payloads = Vec::new();
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        payloads.push(serde_json::from_str(line)?);
    }
    Ok(payloads)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone};
    use flowpulse_common::{Metric, Platform};

    fn rec(id: &str, views: u64, at: DateTime<Utc>) -> EvidenceRecord {
        EvidenceRecord {
            platform: Platform::YouTube,
            external_id: id.to_string(),
            raw_title: "Slack bot".to_string(),
            url: format!("https://youtube.com/watch?v={id}"),
            metrics: [(Metric::Views, views)].into(),
            country: Some("us".to_string()),
            collected_at: at,
        }
    }

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn ingesting_twice_equals_ingesting_once() {
        let dir = tempfile::tempdir().unwrap();
        let log = EvidenceLog::new(dir.path().join("evidence.jsonl"));
        let batch = vec![rec("a", 10, day(1)), rec("b", 20, day(1))];

        let first = log.ingest(batch.clone()).unwrap();
        let after_once = log.pool().unwrap();
        let second = log.ingest(batch).unwrap();

        assert_eq!(first.accepted, 2);
        assert_eq!(second.accepted, 0);
        assert_eq!(second.duplicates, 2);
        assert_eq!(log.pool().unwrap(), after_once);
        assert_eq!(log.read_all().unwrap().len(), 2);
    }

    #[test]
    fn newer_collection_is_appended_and_wins() {
        let dir = tempfile::tempdir().unwrap();
        let log = EvidenceLog::new(dir.path().join("evidence.jsonl"));
        log.ingest(vec![rec("a", 10, day(1))]).unwrap();
        log.ingest(vec![rec("a", 99, day(2))]).unwrap();
        log.ingest(vec![rec("a", 5, day(1))]).unwrap();

        assert_eq!(log.read_all().unwrap().len(), 2);
        let pool = log.pool().unwrap();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.values().next().unwrap().metric(Metric::Views), 99);
    }

    #[test]
    fn invalid_records_are_rejected_and_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let log = EvidenceLog::new(dir.path().join("evidence.jsonl"));
        let mut bad = rec("a", 1, day(1));
        bad.country = Some("USA".into());
        let report = log.ingest(vec![bad, rec("b", 1, day(1))]).unwrap();
        assert_eq!(report.accepted, 1);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(log.pool().unwrap().values().next().unwrap().country.as_deref(), Some("US"));
    }

    #[test]
    fn raw_payloads_parse_from_array_and_lines() {
        let array = r#"[{"platform":"YouTube","source_id":"youtube:1","title":"x","metrics":{"views":1}}]"#;
        let lines = "{\"platform\":\"Discourse\",\"source_id\":\"discourse:1\",\"title\":\"y\"}\n\n{\"platform\":\"GoogleAds\",\"source_id\":\"ads:1\",\"keyword\":\"z\"}\n";
        assert_eq!(parse_payloads(array).unwrap().len(), 1);
        assert_eq!(parse_payloads(lines).unwrap().len(), 2);
    }

    #[test]
    fn raw_ingest_counts_conversion_failures() {
        let dir = tempfile::tempdir().unwrap();
        let log = EvidenceLog::new(dir.path().join("evidence.jsonl"));
        let payloads = parse_payloads(
            r#"[{"platform":"YouTube","source_id":"youtube:1","title":"x","metrics":{"views":1}},
                {"platform":"MySpace","source_id":"m:1"}]"#,
        )
        .unwrap();
        let report = log.ingest_raw(payloads).unwrap();
        assert_eq!(report.accepted, 1);
        assert_eq!(report.rejected.len(), 1);
        assert!(matches!(report.rejected[0].1, ValidationError::UnknownPlatform(_)));
    }

    #[test]
    fn missing_log_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = EvidenceLog::new(dir.path().join("none.jsonl"));
        assert!(log.read_all().unwrap().is_empty());
    }
}
