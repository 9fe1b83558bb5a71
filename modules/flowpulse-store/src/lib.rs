pub mod error;
pub mod pg;
pub mod query;
pub mod serving;

pub use error::{ReadError, Result, StoreError};
pub use pg::SnapshotStore;
pub use query::{InvalidQuery, ListQuery, Page, DEFAULT_LIMIT, MAX_LIMIT};
pub use serving::{Catalog, Served, SnapshotFile, SnapshotSource, Tier};
