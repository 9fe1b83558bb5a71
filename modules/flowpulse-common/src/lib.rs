pub mod config;
pub mod error;
pub mod outcome;
pub mod raw;
pub mod types;

pub use config::{Config, GroupingParams, ScoreWeights, TrendAnchor, TrendParams};
pub use error::{FlowPulseError, ServingUnavailable, SourceFailure, ValidationError};
pub use outcome::Tiered;
pub use raw::RawEvidence;
pub use types::*;
