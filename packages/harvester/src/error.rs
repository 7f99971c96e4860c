//! Harvester error types.

use std::time::Duration;

use auction_extraction::{ArtifactError, ConfigError};
use thiserror::Error;

/// Failure of a single upstream request, before retries are exhausted.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("upstream answered HTTP {status}")]
    Status { status: u16 },

    #[error("undecodable response: {0}")]
    Decode(String),
}

impl UpstreamError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Transport(e) => e.is_connect() || e.is_timeout() || e.is_request() || e.is_body(),
            Self::Status { status } => *status == 429 || *status >= 500,
            Self::Decode(_) => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("upstream {endpoint} unavailable after {attempts} attempt(s): {source}")]
    UpstreamUnavailable {
        endpoint: String,
        attempts: u32,
        #[source]
        source: UpstreamError,
    },

    #[error("malformed artifact: {0}")]
    MalformedArtifact(#[from] ArtifactError),

    #[error("record {key} was modified concurrently")]
    PersistenceConflict { key: String },

    #[error("missing configuration: {name}")]
    ConfigurationMissing { name: String },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("extraction configuration: {0}")]
    Extraction(#[from] ConfigError),
}

impl HarvestError {
    pub(crate) fn storage(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Storage(Box::new(error))
    }

    /// A response that arrived but could not be understood. Never retried.
    pub(crate) fn decode(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            endpoint: endpoint.into(),
            attempts: 1,
            source: UpstreamError::Decode(reason.into()),
        }
    }
}

impl From<sqlx::Error> for HarvestError {
    fn from(error: sqlx::Error) -> Self {
        Self::storage(error)
    }
}

impl From<serde_json::Error> for HarvestError {
    fn from(error: serde_json::Error) -> Self {
        Self::storage(error)
    }
}

pub type Result<T> = std::result::Result<T, HarvestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(UpstreamError::Timeout(Duration::from_secs(30)).is_transient());
        assert!(UpstreamError::Status { status: 429 }.is_transient());
        assert!(UpstreamError::Status { status: 503 }.is_transient());
        assert!(!UpstreamError::Status { status: 404 }.is_transient());
        assert!(!UpstreamError::Decode("not json".into()).is_transient());
    }
}
