//! Persistence seams: records, checkpoint, execution log and attachment blobs.

use async_trait::async_trait;
use auction_extraction::DedupKey;

use crate::error::Result;
use crate::types::{PersistedRecord, RunCheckpoint, RunLogEntry};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, key: &DedupKey) -> Result<Option<PersistedRecord>>;

    /// Insert or overwrite by dedup key, last writer wins. Returns the stored
    /// record with its new revision.
    async fn upsert(&self, record: PersistedRecord) -> Result<PersistedRecord>;

    /// Overwrite only if the stored revision is still `expected`; otherwise
    /// [`HarvestError::PersistenceConflict`](crate::HarvestError::PersistenceConflict).
    async fn update_if_revision(&self, record: PersistedRecord, expected: i64) -> Result<PersistedRecord>;

    /// Stored records in key order.
    async fn list(&self, limit: Option<usize>) -> Result<Vec<PersistedRecord>>;
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load_checkpoint(&self) -> Result<Option<RunCheckpoint>>;
    async fn save_checkpoint(&self, checkpoint: &RunCheckpoint) -> Result<()>;
}

#[async_trait]
pub trait RunLog: Send + Sync {
    async fn append_run(&self, entry: &RunLogEntry) -> Result<()>;
}

/// Content-addressed attachment bytes.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn contains_blob(&self, content_hash: &str) -> Result<bool>;

    /// Store bytes under their hash. Returns false if they were already present.
    async fn put_blob(&self, content_hash: &str, bytes: &[u8]) -> Result<bool>;
}

/// Everything a harvest run writes to.
pub trait Store: RecordStore + CheckpointStore + RunLog + BlobStore {}

impl<T: RecordStore + CheckpointStore + RunLog + BlobStore> Store for T {}
