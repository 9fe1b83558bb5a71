pub mod aggregate;
pub mod collect;
pub mod evidence_log;
pub mod grouping;
pub mod normalize;
pub mod pipeline;
pub mod publish;
pub mod score;
pub mod snapshot;
pub mod stats;
pub mod trends;

pub use aggregate::{aggregate, dedup_latest, GroupAggregate};
pub use collect::{CollectionReport, CollectionRunner, CollectionStatus, Collector, CollectorOutcome};
pub use evidence_log::{parse_payloads, EvidenceLog, IngestReport};
pub use grouping::group;
pub use normalize::{normalize, UNTITLED};
pub use pipeline::Pipeline;
pub use publish::{
    first_failure, load_snapshot, publish_all, publish_with_retry, FileTarget, PublishPolicy,
    PublishTarget,
};
pub use score::score;
pub use snapshot::{mint_id, SnapshotBuilder};
pub use stats::{BuildStats, PublishOutcome};
pub use trends::{LiveSeries, MergedTrends, TrendFetchError, TrendMerger, TrendQuery, TrendSource};
