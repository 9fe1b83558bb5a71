/// Outcome of publishing one snapshot to one target.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishOutcome {
    pub target: String,
    pub attempts: u32,
    pub error: Option<String>,
}

impl PublishOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Stats from one snapshot build.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BuildStats {
    pub snapshot_version: String,
    pub records_in: usize,
    pub evidence: usize,
    pub distinct_keys: usize,
    pub groups: usize,
    pub merged_keys: usize,
    pub grouping_degraded: Option<String>,
    pub reused_ids: usize,
    pub new_ids: usize,
    pub live_trends: usize,
    pub synthesized_trends: usize,
    pub publishes: Vec<PublishOutcome>,
}

impl BuildStats {
    pub fn duplicates_collapsed(&self) -> usize {
        self.records_in.saturating_sub(self.evidence)
    }

    pub fn failed_publishes(&self) -> impl Iterator<Item = &PublishOutcome> {
        self.publishes.iter().filter(|p| !p.succeeded())
    }
}

impl std::fmt::Display for BuildStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Snapshot Build Complete ===")?;
        writeln!(f, "Snapshot version:   {}", self.snapshot_version)?;
        writeln!(f, "Records in:         {}", self.records_in)?;
        writeln!(f, "Duplicates dropped: {}", self.duplicates_collapsed())?;
        writeln!(f, "Distinct keys:      {}", self.distinct_keys)?;
        writeln!(f, "Workflows:          {}", self.groups)?;
        writeln!(f, "Keys merged:        {}", self.merged_keys)?;
        if let Some(reason) = &self.grouping_degraded {
            writeln!(f, "Grouping degraded:  {reason}")?;
        }
        writeln!(f, "Ids reused / new:   {} / {}", self.reused_ids, self.new_ids)?;
        let total = (self.live_trends + self.synthesized_trends).max(1);
        writeln!(f, "\nTrend series:")?;
        writeln!(
            f,
            "  Live:        {} ({:.0}%)",
            self.live_trends,
            self.live_trends as f64 / total as f64 * 100.0
        )?;
        writeln!(
            f,
            "  Synthesized: {} ({:.0}%)",
            self.synthesized_trends,
            self.synthesized_trends as f64 / total as f64 * 100.0
        )?;
        if !self.publishes.is_empty() {
            writeln!(f, "\nPublish:")?;
            for p in &self.publishes {
                match &p.error {
                    None => writeln!(f, "  {:<12} ok ({} attempt(s))", p.target, p.attempts)?,
                    Some(e) => writeln!(f, "  {:<12} FAILED after {} attempt(s): {e}", p.target, p.attempts)?,
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_lists_failed_targets() {
        let stats = BuildStats {
            snapshot_version: "abc123".into(),
            records_in: 10,
            evidence: 8,
            publishes: vec![
                PublishOutcome {
                    target: "file".into(),
                    attempts: 1,
                    error: None,
                },
                PublishOutcome {
                    target: "postgres".into(),
                    attempts: 3,
                    error: Some("connection refused".into()),
                },
            ],
            ..Default::default()
        };
        let text = stats.to_string();
        assert!(text.contains("Duplicates dropped: 2"));
        assert!(text.contains("postgres     FAILED after 3 attempt(s): connection refused"));
        assert_eq!(stats.failed_publishes().count(), 1);
    }
}
