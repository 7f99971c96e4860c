//! Upstream detail lookup, the last strategy of most cascades.

use async_trait::async_trait;

use crate::artifacts::render::flatten_json;
use crate::artifacts::{ArtifactKind, RenderedSource};
use crate::error::LookupError;
use crate::types::candidate::CandidateRecord;

/// Key/value payload returned by the upstream detail endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamDetail {
    pub locator: String,
    pub entries: Vec<(String, String)>,
}

impl UpstreamDetail {
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            entries: Vec::new(),
        }
    }

    pub fn from_json(locator: impl Into<String>, value: &serde_json::Value) -> Self {
        Self {
            locator: locator.into(),
            entries: flatten_json(value),
        }
    }

    /// Add a derived entry (e.g. an item count computed from a list endpoint).
    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.push((key.into(), value.into()));
        self
    }

    pub(crate) fn to_source(&self) -> RenderedSource {
        RenderedSource::from_entries(
            self.locator.clone(),
            ArtifactKind::StructuredMetadata,
            self.entries.clone(),
        )
    }
}

/// Fetches the upstream detail of a candidate.
///
/// Implementations own transport concerns (retries, rate limiting); the
/// cascade only calls this when some field still needs it.
#[async_trait]
pub trait DetailLookup: Send + Sync {
    async fn lookup(&self, candidate: &CandidateRecord) -> Result<UpstreamDetail, LookupError>;
}
