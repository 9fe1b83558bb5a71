use std::time::Duration;

use flowpulse_common::{FlowPulseError, ServingUnavailable};

use crate::query::InvalidQuery;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Stored snapshot {header} holds rows of snapshot {row}")]
    MixedSnapshot { header: String, row: String },

    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Snapshot file error: {0}")]
    Snapshot(#[from] FlowPulseError),

    #[error("No snapshot has been published")]
    Empty,
}

/// Why a catalog read produced no answer.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("Invalid query: {0}")]
    InvalidQuery(#[from] InvalidQuery),

    #[error(transparent)]
    Unavailable(#[from] ServingUnavailable),
}
