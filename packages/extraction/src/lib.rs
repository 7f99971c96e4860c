//! Field extraction for public auction announcements.
//!
//! Turns an announcement and its downloaded attachments into a
//! [`NormalizedRecord`]: every field either determined or explicitly not,
//! with the full attempt history kept as provenance.
//!
//! # Usage
//!
//! ```rust,ignore
//! use auction_extraction::{CascadeEngine, ExtractionConfig, ScoringFilter, SourceArtifact};
//!
//! let config = ExtractionConfig::default();
//! let filter = ScoringFilter::new(&config.scoring)?;
//! let engine = CascadeEngine::new(config)?;
//!
//! if filter.evaluate(&candidate.relevance_text()).accepted {
//!     let artifact = SourceArtifact::sniff(url, name, content_type, bytes)?;
//!     let record = engine.extract_with_lookup(&candidate, vec![artifact], &lookup).await;
//! }
//! ```
//!
//! # Modules
//!
//! - [`scoring`] - Weighted-term relevance filter
//! - [`cascade`] - Per-field strategy chains and the detail lookup seam
//! - [`artifacts`] - Kind sniffing, archive expansion, text rendering
//! - [`validators`] - Typed parsing of candidate values
//! - [`url_gate`] - Broker link validation
//! - [`sanitizer`] - Retroactive re-validation of stored records
//! - [`testing`] - Fixtures and mock implementations

pub mod artifacts;
pub mod cascade;
pub mod error;
pub mod sanitizer;
pub mod scoring;
pub mod testing;
pub mod text;
pub mod types;
pub mod url_gate;
pub mod validators;

pub use artifacts::{content_hash, ArtifactKind, SourceArtifact};
pub use cascade::{CascadeEngine, DetailLookup, PreparedSources, UpstreamDetail};
pub use error::{ArtifactError, ArtifactResult, ConfigError, ConfigResult, LookupError};
pub use sanitizer::{SanitizeChange, SanitizeOutcome, Sanitizer};
pub use scoring::{ScoreOutcome, ScoringFilter};
pub use types::{
    candidate::{ArtifactRef, CandidateRecord, DedupKey, Jurisdiction},
    config::{ExtractionConfig, ScoringConfig, UrlGateConfig, ValidationLimits},
    record::{
        ExtractionAttempt, FieldName, FieldValue, NormalizedRecord, Provenance, RejectionReason,
        SkippedArtifact, StrategyKind,
    },
};
pub use url_gate::{UrlGate, UrlRejection, UrlVerdict};
pub use validators::Rejection;
