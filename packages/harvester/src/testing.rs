//! Test utilities for harvest runs.
//!
//! [`MockUpstream`] serves scripted listing pages, filtered to the requested
//! window, plus attachment bytes. It records every call, so a full run can be
//! driven without network access.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use auction_extraction::{ArtifactRef, CandidateRecord};

use crate::error::{HarvestError, Result, UpstreamError};
use crate::types::HarvestWindow;
use crate::upstream::{Download, ListingPage, UpstreamClient};

/// Record of a call made to the mock upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockUpstreamCall {
    ListPage { modality: u32, page: u32 },
    ListArtifacts { record_id: String },
    Download { locator: String },
}

/// Scriptable [`UpstreamClient`].
#[derive(Clone, Default)]
pub struct MockUpstream {
    pages: HashMap<u32, Vec<Vec<CandidateRecord>>>,
    artifacts: HashMap<String, Vec<ArtifactRef>>,
    files: HashMap<String, Vec<u8>>,
    failing_modalities: HashSet<u32>,
    calls: Arc<RwLock<Vec<MockUpstreamCall>>>,
}

impl MockUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listing page for `modality`.
    pub fn with_page(mut self, modality: u32, candidates: Vec<CandidateRecord>) -> Self {
        self.pages.entry(modality).or_default().push(candidates);
        self
    }

    /// Attach a downloadable file to the candidate with `record_id`.
    pub fn with_file(mut self, record_id: &str, artifact: ArtifactRef, bytes: Vec<u8>) -> Self {
        self.files.insert(artifact.locator.clone(), bytes);
        self.artifacts.entry(record_id.to_string()).or_default().push(artifact);
        self
    }

    /// Attach a file whose download always fails.
    pub fn with_missing_file(mut self, record_id: &str, artifact: ArtifactRef) -> Self {
        self.artifacts.entry(record_id.to_string()).or_default().push(artifact);
        self
    }

    /// Every listing request for `modality` fails with HTTP 503.
    pub fn failing_modality(mut self, modality: u32) -> Self {
        self.failing_modalities.insert(modality);
        self
    }

    pub fn calls(&self) -> Vec<MockUpstreamCall> {
        self.calls.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn download_count(&self) -> usize {
        self.calls
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|c| matches!(c, MockUpstreamCall::Download { .. }))
            .count()
    }

    fn record(&self, call: MockUpstreamCall) {
        self.calls.write().unwrap_or_else(PoisonError::into_inner).push(call);
    }
}

fn unavailable(endpoint: String, status: u16) -> HarvestError {
    HarvestError::UpstreamUnavailable {
        endpoint,
        attempts: 1,
        source: UpstreamError::Status { status },
    }
}

#[async_trait]
impl UpstreamClient for MockUpstream {
    async fn list_page(&self, modality: u32, window: &HarvestWindow, page: u32) -> Result<ListingPage> {
        self.record(MockUpstreamCall::ListPage { modality, page });
        if self.failing_modalities.contains(&modality) {
            return Err(unavailable(format!("mock://listing/{modality}"), 503));
        }

        let Some(pages) = self.pages.get(&modality) else {
            return Ok(ListingPage::empty(page));
        };
        let candidates = pages
            .get(page.saturating_sub(1) as usize)
            .map(|listed| {
                listed
                    .iter()
                    .filter(|c| window.contains(c.published_at))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(ListingPage {
            candidates,
            page,
            total_pages: pages.len() as u32,
        })
    }

    async fn list_artifacts(&self, candidate: &CandidateRecord) -> Result<Vec<ArtifactRef>> {
        self.record(MockUpstreamCall::ListArtifacts {
            record_id: candidate.id.clone(),
        });
        Ok(self.artifacts.get(&candidate.id).cloned().unwrap_or_default())
    }

    async fn download(&self, artifact: &ArtifactRef) -> Result<Download> {
        self.record(MockUpstreamCall::Download {
            locator: artifact.locator.clone(),
        });
        match self.files.get(&artifact.locator) {
            Some(bytes) => Ok(Download {
                bytes: bytes.clone(),
                content_type: artifact.declared_type.clone(),
            }),
            None => Err(unavailable(artifact.locator.clone(), 404)),
        }
    }
}
