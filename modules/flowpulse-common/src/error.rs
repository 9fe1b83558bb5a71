use thiserror::Error;

use crate::types::{Metric, Platform};

/// Shape problems found when evidence enters the log.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("external_id cannot be empty")]
    EmptyExternalId,

    #[error("unknown platform: {0}")]
    UnknownPlatform(String),

    #[error("{platform} does not report metric '{metric}'")]
    MetricNotAllowed { platform: Platform, metric: Metric },

    #[error("metric '{field}' has invalid value {value}")]
    InvalidMetricValue { field: String, value: String },

    #[error("invalid country code: {0}")]
    InvalidCountry(String),
}

/// One backing source that could not answer a read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFailure {
    pub source: String,
    pub reason: String,
}

/// Neither the store nor the snapshot file could serve a read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServingUnavailable {
    pub failures: Vec<SourceFailure>,
    pub last_known_version: Option<String>,
}

impl std::fmt::Display for ServingUnavailable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no data source available")?;
        for failure in &self.failures {
            write!(f, "; {}: {}", failure.source, failure.reason)?;
        }
        match &self.last_known_version {
            Some(version) => write!(f, " (last known-good snapshot: {version})"),
            None => write!(f, " (no snapshot has been served yet)"),
        }
    }
}

impl std::error::Error for ServingUnavailable {}

#[derive(Error, Debug)]
pub enum FlowPulseError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Collection error ({platform}): {message}")]
    Collection { platform: Platform, message: String },

    #[error("Publish to {target} failed: {message}")]
    Publish { target: String, message: String },

    #[error("Serving unavailable: {0}")]
    ServingUnavailable(#[from] ServingUnavailable),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl FlowPulseError {
    pub fn publish(target: impl Into<String>, message: impl Into<String>) -> Self {
        FlowPulseError::Publish {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Only a serving outage is meant to reach a user; everything else has a fallback.
    pub fn is_user_visible(&self) -> bool {
        matches!(self, FlowPulseError::ServingUnavailable(_))
    }
}
