//! Harvest run loop.
//!
//! One invocation lists every configured modality over the run window,
//! drops irrelevant announcements, downloads and extracts the rest with
//! bounded concurrency, and only then decides the checkpoint and writes the
//! execution log entry.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use auction_extraction::{
    content_hash, ArtifactRef, CandidateRecord, CascadeEngine, DetailLookup, ExtractionConfig,
    NormalizedRecord, ScoringFilter, SourceArtifact,
};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use uuid::Uuid;

use crate::config::{DuplicatePolicy, HarvestConfig};
use crate::error::Result;
use crate::storage::Store;
use crate::types::{HarvestWindow, PersistedRecord, RunCheckpoint, RunLogEntry};
use crate::upstream::UpstreamClient;
use crate::window::next_window;

/// Scoring filter and cascade compiled from one [`ExtractionConfig`].
pub struct ExtractionComponents {
    pub filter: ScoringFilter,
    pub engine: CascadeEngine,
}

impl ExtractionComponents {
    pub fn compile(config: ExtractionConfig) -> Result<Self> {
        Ok(Self {
            filter: ScoringFilter::new(&config.scoring)?,
            engine: CascadeEngine::new(config)?,
        })
    }
}

/// Result of listing one window.
#[derive(Debug, Default)]
pub struct Harvest {
    /// Relevant candidates, one per dedup key
    pub candidates: Vec<CandidateRecord>,
    pub seen: usize,
    /// Candidates that passed the scoring filter, repeats included
    pub kept: usize,
    /// Kept candidates listed more than once in this window
    pub repeated: usize,
    /// False when a listing request failed for some modality
    pub complete: bool,
    /// Listing stopped at the record limit with candidates left unlisted
    pub truncated: bool,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CandidateOutcome {
    Persisted { merged: bool },
    Duplicate,
}

pub struct Harvester {
    config: HarvestConfig,
    upstream: Arc<dyn UpstreamClient>,
    lookup: Arc<dyn DetailLookup>,
    store: Arc<dyn Store>,
    components: RwLock<Arc<ExtractionComponents>>,
}

impl Harvester {
    pub fn new(
        config: HarvestConfig,
        extraction: ExtractionConfig,
        upstream: Arc<dyn UpstreamClient>,
        lookup: Arc<dyn DetailLookup>,
        store: Arc<dyn Store>,
    ) -> Result<Self> {
        Ok(Self {
            config,
            upstream,
            lookup,
            store,
            components: RwLock::new(Arc::new(ExtractionComponents::compile(extraction)?)),
        })
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// Components in effect; a run keeps the snapshot it started with.
    pub fn components(&self) -> Arc<ExtractionComponents> {
        self.components
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Compile a new configuration and swap it in. On error the current
    /// components stay in place.
    pub fn reload_extraction(&self, config: ExtractionConfig) -> Result<()> {
        let compiled = Arc::new(ExtractionComponents::compile(config)?);
        *self
            .components
            .write()
            .unwrap_or_else(PoisonError::into_inner) = compiled;
        tracing::info!("Extraction configuration reloaded");
        Ok(())
    }

    /// List and score every candidate published in `window`.
    pub async fn harvest(&self, window: &HarvestWindow) -> Harvest {
        let components = self.components();
        let mut harvest = Harvest {
            complete: true,
            ..Harvest::default()
        };
        let mut keys = HashSet::new();

        'modalities: for &modality in &self.config.modalities {
            let mut page = 1;
            loop {
                let listing = match self.upstream.list_page(modality, window, page).await {
                    Ok(listing) => listing,
                    Err(e) => {
                        tracing::error!(modality, page, error = %e, "Listing failed, stopping modality");
                        harvest.complete = false;
                        harvest.errors.push(format!("modality {modality} page {page}: {e}"));
                        break;
                    }
                };

                for candidate in listing.candidates.iter().cloned() {
                    if self.config.record_limit.is_some_and(|limit| harvest.seen >= limit) {
                        tracing::info!(limit = harvest.seen, "Record limit reached, window not fully listed");
                        harvest.truncated = true;
                        break 'modalities;
                    }
                    harvest.seen += 1;

                    let outcome = components.filter.evaluate(&candidate.relevance_text());
                    if !outcome.accepted {
                        tracing::debug!(
                            record_id = %candidate.id,
                            score = outcome.score,
                            threshold = outcome.threshold,
                            exclusion = ?outcome.hard_exclusion,
                            "Candidate dropped by scoring filter"
                        );
                        continue;
                    }
                    harvest.kept += 1;

                    if !keys.insert(candidate.dedup_key()) {
                        harvest.repeated += 1;
                        continue;
                    }
                    harvest.candidates.push(candidate);
                }

                if !listing.has_more() {
                    break;
                }
                page += 1;
            }
        }

        tracing::info!(
            window_start = %window.start,
            window_end = %window.end,
            seen = harvest.seen,
            kept = harvest.kept,
            complete = harvest.complete,
            truncated = harvest.truncated,
            "Listing finished"
        );
        harvest
    }

    /// Store an extracted record, overwriting any record under the same key.
    pub async fn persist(
        &self,
        candidate: &CandidateRecord,
        record: NormalizedRecord,
        attachment_hashes: Vec<String>,
    ) -> Result<PersistedRecord> {
        let stored = self
            .store
            .upsert(PersistedRecord::new(candidate, record, attachment_hashes))
            .await?;
        tracing::debug!(
            record_id = %candidate.id,
            dedup_key = %stored.dedup_key(),
            revision = stored.revision,
            "Record persisted"
        );
        Ok(stored)
    }

    /// One scheduled invocation at `now`.
    pub async fn run(&self, now: DateTime<Utc>) -> RunLogEntry {
        match self.store.load_checkpoint().await {
            Ok(checkpoint) => {
                let window = next_window(checkpoint.as_ref(), now, self.config.window_length);
                self.run_window(window, checkpoint).await
            }
            Err(e) => {
                tracing::error!(error = %e, "Could not read checkpoint, run aborted");
                let window = HarvestWindow::new(now - self.config.window_length, now);
                let mut entry = self.log_entry(Uuid::now_v7(), Utc::now(), &window);
                entry.error = Some(format!("checkpoint unavailable: {e}"));
                self.append_run(&entry).await;
                entry
            }
        }
    }

    /// Run over an explicit window. The checkpoint never moves backwards.
    pub async fn run_for_window(&self, window: HarvestWindow) -> RunLogEntry {
        match self.store.load_checkpoint().await {
            Ok(checkpoint) => self.run_window(window, checkpoint).await,
            Err(e) => {
                tracing::error!(error = %e, "Could not read checkpoint, run aborted");
                let mut entry = self.log_entry(Uuid::now_v7(), Utc::now(), &window);
                entry.error = Some(format!("checkpoint unavailable: {e}"));
                self.append_run(&entry).await;
                entry
            }
        }
    }

    async fn run_window(&self, window: HarvestWindow, checkpoint: Option<RunCheckpoint>) -> RunLogEntry {
        let run_id = Uuid::now_v7();
        let started_at = Utc::now();
        let timer = Instant::now();
        tracing::info!(%run_id, window_start = %window.start, window_end = %window.end, "Harvest run starting");

        let components = self.components();
        let harvest = self.harvest(&window).await;

        let outcomes: Vec<Result<CandidateOutcome>> = stream::iter(&harvest.candidates)
            .map(|candidate| self.process_candidate(&components, candidate))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut entry = self.log_entry(run_id, started_at, &window);
        entry.seen = harvest.seen as i64;
        entry.kept = harvest.kept as i64;
        entry.duplicates = harvest.repeated as i64;
        for outcome in &outcomes {
            match outcome {
                Ok(CandidateOutcome::Persisted { merged }) => {
                    entry.persisted += 1;
                    if *merged {
                        entry.duplicates += 1;
                    }
                }
                Ok(CandidateOutcome::Duplicate) => entry.duplicates += 1,
                Err(_) => entry.failures += 1,
            }
        }
        entry.duplicate_rate = if entry.kept > 0 {
            entry.duplicates as f64 / entry.kept as f64
        } else {
            0.0
        };
        entry.completed = harvest.complete && !harvest.truncated;
        if !harvest.complete {
            entry.error = Some(harvest.errors.join("; "));
        }

        if entry.completed || self.config.commit_partial_checkpoint {
            let previous = checkpoint.as_ref();
            let next = RunCheckpoint {
                last_window_end: previous
                    .map_or(window.end, |c| c.last_window_end.max(window.end)),
                records_seen: previous.map_or(0, |c| c.records_seen) + entry.seen,
                records_kept: previous.map_or(0, |c| c.records_kept) + entry.kept,
                duplicates: previous.map_or(0, |c| c.duplicates) + entry.duplicates,
                updated_at: Utc::now(),
            };
            match self.store.save_checkpoint(&next).await {
                Ok(()) => entry.checkpoint_committed = true,
                Err(e) => {
                    tracing::error!(%run_id, error = %e, "Checkpoint write failed");
                    let message = format!("checkpoint write failed: {e}");
                    entry.error = Some(match entry.error.take() {
                        Some(previous) => format!("{previous}; {message}"),
                        None => message,
                    });
                }
            }
        } else {
            tracing::warn!(%run_id, "Run incomplete, checkpoint withheld");
        }

        entry.elapsed_ms = timer.elapsed().as_millis() as i64;
        tracing::info!(
            %run_id,
            seen = entry.seen,
            kept = entry.kept,
            duplicates = entry.duplicates,
            persisted = entry.persisted,
            failures = entry.failures,
            completed = entry.completed,
            checkpoint_committed = entry.checkpoint_committed,
            elapsed_ms = entry.elapsed_ms,
            "Harvest run finished"
        );
        self.append_run(&entry).await;
        entry
    }

    async fn process_candidate(
        &self,
        components: &ExtractionComponents,
        candidate: &CandidateRecord,
    ) -> Result<CandidateOutcome> {
        let result = self.extract_and_persist(components, candidate).await;
        if let Err(e) = &result {
            tracing::warn!(record_id = %candidate.id, error = %e, "Candidate failed, skipping");
        }
        result
    }

    async fn extract_and_persist(
        &self,
        components: &ExtractionComponents,
        candidate: &CandidateRecord,
    ) -> Result<CandidateOutcome> {
        let key = candidate.dedup_key();
        let existing = self.store.get(&key).await?;
        if existing.is_some() && self.config.duplicate_policy == DuplicatePolicy::Skip {
            tracing::debug!(record_id = %candidate.id, dedup_key = %key, "Duplicate, skipping");
            return Ok(CandidateOutcome::Duplicate);
        }

        let mut candidate = candidate.clone();
        if candidate.artifacts.is_empty() {
            candidate.artifacts = self.upstream.list_artifacts(&candidate).await?;
        }

        let max_bytes = components.engine.config().artifacts.max_entry_bytes;
        let refs: Vec<ArtifactRef> = candidate
            .artifacts
            .iter()
            .filter(|artifact| match artifact.size {
                Some(size) if size > max_bytes => {
                    tracing::warn!(record_id = %candidate.id, locator = %artifact.locator, size, max_bytes, "Attachment too large, not downloading");
                    false
                }
                _ => true,
            })
            .cloned()
            .collect();

        let artifacts = self.download_all(&candidate, &refs).await;
        for artifact in candidate.artifacts.iter_mut() {
            if let Some(source) = artifacts.iter().find(|s| s.locator == artifact.locator) {
                artifact.size = Some(source.bytes.len() as u64);
            }
        }
        let hashes = artifacts.iter().map(|a| a.content_hash.clone()).collect();

        let record = components
            .engine
            .extract_with_lookup(&candidate, artifacts, self.lookup.as_ref())
            .await;
        self.persist(&candidate, record, hashes).await?;

        Ok(CandidateOutcome::Persisted {
            merged: existing.is_some(),
        })
    }

    /// Download, store and sniff every attachment. Failures are skipped.
    async fn download_all(&self, candidate: &CandidateRecord, refs: &[ArtifactRef]) -> Vec<SourceArtifact> {
        stream::iter(refs)
            .map(|artifact| self.fetch_artifact(candidate, artifact))
            .buffered(self.config.concurrency.max(1))
            .filter_map(|artifact| async move { artifact })
            .collect()
            .await
    }

    async fn fetch_artifact(&self, candidate: &CandidateRecord, artifact: &ArtifactRef) -> Option<SourceArtifact> {
        let download = match self.upstream.download(artifact).await {
            Ok(download) => download,
            Err(e) => {
                tracing::warn!(record_id = %candidate.id, locator = %artifact.locator, error = %e, "Download failed");
                return None;
            }
        };

        let hash = content_hash(&download.bytes);
        match self.store.put_blob(&hash, &download.bytes).await {
            Ok(true) => tracing::debug!(locator = %artifact.locator, %hash, size = download.bytes.len(), "Blob stored"),
            Ok(false) => tracing::debug!(locator = %artifact.locator, %hash, "Blob already stored"),
            Err(e) => tracing::warn!(locator = %artifact.locator, error = %e, "Blob store write failed"),
        }

        let declared = download.content_type.or_else(|| artifact.declared_type.clone());
        match SourceArtifact::sniff(artifact.locator.clone(), artifact.name.clone(), declared, download.bytes) {
            Ok(source) => Some(source),
            Err(e) => {
                tracing::warn!(record_id = %candidate.id, locator = %artifact.locator, error = %e, "Unusable attachment");
                None
            }
        }
    }

    fn log_entry(&self, run_id: Uuid, started_at: DateTime<Utc>, window: &HarvestWindow) -> RunLogEntry {
        RunLogEntry {
            run_id,
            started_at,
            window_start: window.start,
            window_end: window.end,
            seen: 0,
            kept: 0,
            duplicates: 0,
            duplicate_rate: 0.0,
            persisted: 0,
            failures: 0,
            elapsed_ms: 0,
            completed: false,
            checkpoint_committed: false,
            error: None,
        }
    }

    async fn append_run(&self, entry: &RunLogEntry) {
        if let Err(e) = self.store.append_run(entry).await {
            tracing::error!(run_id = %entry.run_id, error = %e, "Execution log write failed");
        }
    }
}
