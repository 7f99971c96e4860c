//! Run bookkeeping and persisted record shapes.

use auction_extraction::{ArtifactRef, CandidateRecord, DedupKey, NormalizedRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Half-open publication window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl HarvestWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }
}

/// Progress marker; read at run start, written once at run end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCheckpoint {
    pub last_window_end: DateTime<Utc>,
    pub records_seen: i64,
    pub records_kept: i64,
    pub duplicates: i64,
    pub updated_at: DateTime<Utc>,
}

/// One execution-log row per invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Candidates listed upstream
    pub seen: i64,
    /// Candidates that passed the scoring filter
    pub kept: i64,
    /// Kept candidates whose dedup key was already known
    pub duplicates: i64,
    pub duplicate_rate: f64,
    pub persisted: i64,
    pub failures: i64,
    pub elapsed_ms: i64,
    pub completed: bool,
    pub checkpoint_committed: bool,
    /// Operator-facing failure description
    pub error: Option<String>,
}

/// The announcement fields kept alongside an extracted record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateSummary {
    pub id: String,
    pub organization_id: String,
    pub organization_name: String,
    pub title: String,
    pub published_at: DateTime<Utc>,
    pub source_system_link: Option<String>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactRef>,
}

impl From<&CandidateRecord> for CandidateSummary {
    fn from(candidate: &CandidateRecord) -> Self {
        Self {
            id: candidate.id.clone(),
            organization_id: candidate.organization_id.clone(),
            organization_name: candidate.organization_name.clone(),
            title: candidate.title.clone(),
            published_at: candidate.published_at,
            source_system_link: candidate.source_system_link.clone(),
            artifacts: candidate.artifacts.clone(),
        }
    }
}

/// What the record store holds per dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub record: NormalizedRecord,
    pub candidate: CandidateSummary,
    /// SHA-256 of every downloaded attachment, in blob-store order
    pub artifact_hashes: Vec<String>,
    /// Optimistic-concurrency counter, bumped on every write
    pub revision: i64,
    pub updated_at: DateTime<Utc>,
}

impl PersistedRecord {
    pub fn new(candidate: &CandidateRecord, record: NormalizedRecord, artifact_hashes: Vec<String>) -> Self {
        Self {
            record,
            candidate: candidate.into(),
            artifact_hashes,
            revision: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn dedup_key(&self) -> &DedupKey {
        &self.record.dedup_key
    }
}
