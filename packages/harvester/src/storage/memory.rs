//! In-memory store for tests and `--memory` runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use auction_extraction::DedupKey;
use chrono::Utc;

use super::{BlobStore, CheckpointStore, RecordStore, RunLog};
use crate::error::{HarvestError, Result};
use crate::types::{PersistedRecord, RunCheckpoint, RunLogEntry};

/// Volatile storage. Data is lost when the process exits.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<DedupKey, PersistedRecord>>,
    checkpoint: RwLock<Option<RunCheckpoint>>,
    runs: RwLock<Vec<RunLogEntry>>,
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_count(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Execution log, oldest first.
    pub fn runs(&self) -> Vec<RunLogEntry> {
        self.runs.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, key: &DedupKey) -> Result<Option<PersistedRecord>> {
        Ok(self.records.read().unwrap_or_else(PoisonError::into_inner).get(key).cloned())
    }

    async fn upsert(&self, mut record: PersistedRecord) -> Result<PersistedRecord> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        record.revision = records
            .get(record.dedup_key())
            .map_or(1, |existing| existing.revision + 1);
        record.updated_at = Utc::now();
        records.insert(record.dedup_key().clone(), record.clone());
        Ok(record)
    }

    async fn update_if_revision(&self, mut record: PersistedRecord, expected: i64) -> Result<PersistedRecord> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let current = records.get(record.dedup_key()).map(|r| r.revision);
        if current != Some(expected) {
            return Err(HarvestError::PersistenceConflict {
                key: record.dedup_key().to_string(),
            });
        }
        record.revision = expected + 1;
        record.updated_at = Utc::now();
        records.insert(record.dedup_key().clone(), record.clone());
        Ok(record)
    }

    async fn list(&self, limit: Option<usize>) -> Result<Vec<PersistedRecord>> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records
            .values()
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn load_checkpoint(&self) -> Result<Option<RunCheckpoint>> {
        Ok(self.checkpoint.read().unwrap_or_else(PoisonError::into_inner).clone())
    }

    async fn save_checkpoint(&self, checkpoint: &RunCheckpoint) -> Result<()> {
        *self.checkpoint.write().unwrap_or_else(PoisonError::into_inner) = Some(checkpoint.clone());
        Ok(())
    }
}

#[async_trait]
impl RunLog for MemoryStore {
    async fn append_run(&self, entry: &RunLogEntry) -> Result<()> {
        self.runs.write().unwrap_or_else(PoisonError::into_inner).push(entry.clone());
        Ok(())
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn contains_blob(&self, content_hash: &str) -> Result<bool> {
        Ok(self.blobs.read().unwrap_or_else(PoisonError::into_inner).contains_key(content_hash))
    }

    async fn put_blob(&self, content_hash: &str, bytes: &[u8]) -> Result<bool> {
        let mut blobs = self.blobs.write().unwrap_or_else(PoisonError::into_inner);
        if blobs.contains_key(content_hash) {
            return Ok(false);
        }
        blobs.insert(content_hash.to_string(), bytes.to_vec());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auction_extraction::testing::sample_candidate;
    use auction_extraction::NormalizedRecord;

    fn record() -> PersistedRecord {
        let candidate = sample_candidate();
        let normalized = NormalizedRecord::undetermined(candidate.dedup_key(), candidate.id.clone());
        PersistedRecord::new(&candidate, normalized, vec![])
    }

    #[tokio::test]
    async fn test_upsert_bumps_revision_without_duplicating() {
        let store = MemoryStore::new();
        assert_eq!(store.upsert(record()).await.unwrap().revision, 1);
        assert_eq!(store.upsert(record()).await.unwrap().revision, 2);
        assert_eq!(store.record_count(), 1);
    }

    #[tokio::test]
    async fn test_compare_and_set() {
        let store = MemoryStore::new();
        let stored = store.upsert(record()).await.unwrap();

        let updated = store.update_if_revision(stored.clone(), 1).await.unwrap();
        assert_eq!(updated.revision, 2);

        let stale = store.update_if_revision(stored, 1).await;
        assert!(matches!(stale, Err(HarvestError::PersistenceConflict { .. })));
    }

    #[tokio::test]
    async fn test_poisoned_lock_keeps_serving() {
        let store = std::sync::Arc::new(MemoryStore::new());
        store.upsert(record()).await.unwrap();

        let holder = store.clone();
        let panicked = std::thread::spawn(move || {
            let _guard = holder.records.write().unwrap();
            panic!("writer died holding the lock");
        })
        .join();
        assert!(panicked.is_err());
        assert!(store.records.is_poisoned());

        assert_eq!(store.record_count(), 1);
        assert_eq!(store.upsert(record()).await.unwrap().revision, 2);
        assert_eq!(store.list(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_blobs_are_content_addressed() {
        let store = MemoryStore::new();
        assert!(store.put_blob("abc", b"bytes").await.unwrap());
        assert!(!store.put_blob("abc", b"bytes").await.unwrap());
        assert!(store.contains_blob("abc").await.unwrap());
        assert_eq!(store.blob_count(), 1);
    }
}
