//! Retroactive URL sanitation over persisted records.
//!
//! Dry-run reports what would change; execute writes each change back with a
//! revision compare-and-set so a concurrent harvest write is never clobbered.

use std::sync::Arc;

use auction_extraction::{DedupKey, NormalizedRecord, RejectionReason, SanitizeChange, Sanitizer};
use serde::Serialize;

use crate::error::{HarvestError, Result};
use crate::storage::RecordStore;
use crate::types::PersistedRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SanitizeMode {
    DryRun,
    Execute,
}

/// One record the sanitizer would change.
#[derive(Debug, Clone, Serialize)]
pub struct SanitizeEntry {
    pub dedup_key: DedupKey,
    pub record_id: String,
    pub before: Option<String>,
    pub after: Option<String>,
    pub reason: RejectionReason,
    /// Set in execute mode once the corrected record is stored
    pub written: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizeReport {
    pub mode: SanitizeMode,
    pub examined: usize,
    pub changed: usize,
    pub written: usize,
    /// Records skipped because they kept changing under us
    pub conflicts: usize,
    /// Records whose write failed for any other reason
    pub failures: usize,
    pub entries: Vec<SanitizeEntry>,
}

impl SanitizeReport {
    fn new(mode: SanitizeMode) -> Self {
        Self {
            mode,
            examined: 0,
            changed: 0,
            written: 0,
            conflicts: 0,
            failures: 0,
            entries: Vec::new(),
        }
    }
}

pub struct SanitizeRunner {
    sanitizer: Sanitizer,
    store: Arc<dyn RecordStore>,
}

impl SanitizeRunner {
    pub fn new(sanitizer: Sanitizer, store: Arc<dyn RecordStore>) -> Self {
        Self { sanitizer, store }
    }

    /// Re-check every stored record against the current URL gate.
    pub async fn run(&self, mode: SanitizeMode, limit: Option<usize>) -> Result<SanitizeReport> {
        let mut report = SanitizeReport::new(mode);

        for stored in self.store.list(limit).await? {
            report.examined += 1;
            let review = self.sanitizer.review(&stored.record);
            if !review.changed {
                continue;
            }
            report.changed += 1;

            let mut entries: Vec<SanitizeEntry> = review
                .changes
                .iter()
                .map(|change| entry(&stored, change))
                .collect();

            if mode == SanitizeMode::Execute {
                let key = stored.dedup_key().clone();
                match self.write(stored, review.record).await {
                    Ok(()) => {
                        report.written += 1;
                        entries.iter_mut().for_each(|e| e.written = true);
                    }
                    Err(HarvestError::PersistenceConflict { key }) => {
                        tracing::warn!(dedup_key = %key, "Record changed during sanitation, skipping");
                        report.conflicts += 1;
                    }
                    Err(e) => {
                        tracing::error!(
                            dedup_key = %key,
                            error = %e,
                            "Sanitation write failed, continuing"
                        );
                        report.failures += 1;
                    }
                }
            }
            report.entries.extend(entries);
        }

        tracing::info!(
            mode = ?report.mode,
            examined = report.examined,
            changed = report.changed,
            written = report.written,
            conflicts = report.conflicts,
            failures = report.failures,
            "Sanitation finished"
        );
        Ok(report)
    }

    /// Compare-and-set write. On a conflict the fresh record is re-read and
    /// re-sanitized once before giving up.
    async fn write(&self, stored: PersistedRecord, corrected: NormalizedRecord) -> Result<()> {
        let key = stored.dedup_key().clone();
        let expected = stored.revision;
        let mut update = stored;
        update.record = corrected;

        match self.store.update_if_revision(update, expected).await {
            Err(HarvestError::PersistenceConflict { .. }) => {
                let Some(fresh) = self.store.get(&key).await? else {
                    return Err(HarvestError::PersistenceConflict { key: key.to_string() });
                };
                let (changed, corrected) = self.sanitizer.sanitize(&fresh.record);
                if !changed {
                    return Ok(());
                }
                let expected = fresh.revision;
                let mut retry = fresh;
                retry.record = corrected;
                self.store.update_if_revision(retry, expected).await.map(|_| ())
            }
            other => other.map(|_| ()),
        }
    }
}

fn entry(stored: &PersistedRecord, change: &SanitizeChange) -> SanitizeEntry {
    SanitizeEntry {
        dedup_key: stored.dedup_key().clone(),
        record_id: stored.record.record_id.clone(),
        before: change.before.clone(),
        after: change.after.clone(),
        reason: change.reason.clone(),
        written: false,
    }
}
