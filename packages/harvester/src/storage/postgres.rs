use async_trait::async_trait;
use auction_extraction::DedupKey;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

use super::{BlobStore, CheckpointStore, RecordStore, RunLog};
use crate::error::{HarvestError, Result};
use crate::types::{PersistedRecord, RunCheckpoint, RunLogEntry};

const CHECKPOINT_ID: i16 = 1;

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    fn record_from_row(row: &PgRow) -> Result<PersistedRecord> {
        let mut record: PersistedRecord = serde_json::from_value(row.get("payload"))?;
        record.revision = row.get("revision");
        record.updated_at = row.get("updated_at");
        Ok(record)
    }
}

#[async_trait]
impl RecordStore for PostgresStore {
    async fn get(&self, key: &DedupKey) -> Result<Option<PersistedRecord>> {
        let row = sqlx::query(
            r#"
            SELECT payload, revision, updated_at
            FROM auction_records
            WHERE dedup_key = $1
            "#,
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn upsert(&self, mut record: PersistedRecord) -> Result<PersistedRecord> {
        let row = sqlx::query(
            r#"
            INSERT INTO auction_records (dedup_key, record_id, payload, revision, updated_at)
            VALUES ($1, $2, $3, 1, NOW())
            ON CONFLICT (dedup_key) DO UPDATE
            SET record_id = EXCLUDED.record_id,
                payload = EXCLUDED.payload,
                revision = auction_records.revision + 1,
                updated_at = NOW()
            RETURNING revision, updated_at
            "#,
        )
        .bind(record.dedup_key().as_str())
        .bind(&record.record.record_id)
        .bind(serde_json::to_value(&record)?)
        .fetch_one(&self.pool)
        .await?;

        record.revision = row.get("revision");
        record.updated_at = row.get::<DateTime<Utc>, _>("updated_at");
        Ok(record)
    }

    async fn update_if_revision(&self, mut record: PersistedRecord, expected: i64) -> Result<PersistedRecord> {
        let row = sqlx::query(
            r#"
            UPDATE auction_records
            SET payload = $2,
                revision = revision + 1,
                updated_at = NOW()
            WHERE dedup_key = $1 AND revision = $3
            RETURNING revision, updated_at
            "#,
        )
        .bind(record.dedup_key().as_str())
        .bind(serde_json::to_value(&record)?)
        .bind(expected)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Err(HarvestError::PersistenceConflict {
                key: record.dedup_key().to_string(),
            });
        };
        record.revision = row.get("revision");
        record.updated_at = row.get("updated_at");
        Ok(record)
    }

    async fn list(&self, limit: Option<usize>) -> Result<Vec<PersistedRecord>> {
        let limit = limit.map_or(i64::MAX, |l| i64::try_from(l).unwrap_or(i64::MAX));
        let rows = sqlx::query(
            r#"
            SELECT payload, revision, updated_at
            FROM auction_records
            ORDER BY dedup_key
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::record_from_row).collect()
    }
}

#[async_trait]
impl CheckpointStore for PostgresStore {
    async fn load_checkpoint(&self) -> Result<Option<RunCheckpoint>> {
        let row = sqlx::query(
            r#"
            SELECT last_window_end, records_seen, records_kept, duplicates, updated_at
            FROM harvest_checkpoint
            WHERE id = $1
            "#,
        )
        .bind(CHECKPOINT_ID)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| RunCheckpoint {
            last_window_end: r.get("last_window_end"),
            records_seen: r.get("records_seen"),
            records_kept: r.get("records_kept"),
            duplicates: r.get("duplicates"),
            updated_at: r.get("updated_at"),
        }))
    }

    async fn save_checkpoint(&self, checkpoint: &RunCheckpoint) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO harvest_checkpoint (
                id, last_window_end, records_seen, records_kept, duplicates, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
            SET last_window_end = EXCLUDED.last_window_end,
                records_seen = EXCLUDED.records_seen,
                records_kept = EXCLUDED.records_kept,
                duplicates = EXCLUDED.duplicates,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(CHECKPOINT_ID)
        .bind(checkpoint.last_window_end)
        .bind(checkpoint.records_seen)
        .bind(checkpoint.records_kept)
        .bind(checkpoint.duplicates)
        .bind(checkpoint.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RunLog for PostgresStore {
    async fn append_run(&self, entry: &RunLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO harvest_runs (
                run_id, started_at, window_start, window_end,
                seen, kept, duplicates, duplicate_rate,
                persisted, failures, elapsed_ms,
                completed, checkpoint_committed, error
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(entry.run_id)
        .bind(entry.started_at)
        .bind(entry.window_start)
        .bind(entry.window_end)
        .bind(entry.seen)
        .bind(entry.kept)
        .bind(entry.duplicates)
        .bind(entry.duplicate_rate)
        .bind(entry.persisted)
        .bind(entry.failures)
        .bind(entry.elapsed_ms)
        .bind(entry.completed)
        .bind(entry.checkpoint_committed)
        .bind(&entry.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl BlobStore for PostgresStore {
    async fn contains_blob(&self, content_hash: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 AS present FROM attachment_blobs WHERE content_hash = $1")
            .bind(content_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn put_blob(&self, content_hash: &str, bytes: &[u8]) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO attachment_blobs (content_hash, bytes, size, stored_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (content_hash) DO NOTHING
            "#,
        )
        .bind(content_hash)
        .bind(bytes)
        .bind(bytes.len() as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
