//! Typed errors for the extraction library.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling. Validation rejections are
//! deliberately *not* errors; see [`crate::validators::Rejection`].

use thiserror::Error;

/// Errors raised while sniffing, expanding or rendering a source artifact.
///
/// Any of these means the artifact is malformed for extraction purposes:
/// the strategies that would have read it are skipped, the others still run.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// Byte signature matches none of the supported kinds
    #[error("unrecognized signature for {locator} (declared: {declared})")]
    UnrecognizedSignature { locator: String, declared: String },

    /// Artifact has no bytes
    #[error("empty artifact: {locator}")]
    Empty { locator: String },

    /// Artifact exceeds the configured size limit
    #[error("artifact too large: {locator} ({size} bytes)")]
    TooLarge { locator: String, size: u64 },

    /// Archive nesting beyond the configured depth
    #[error("archive nesting too deep at {locator}")]
    NestingTooDeep { locator: String },

    /// Zip container could not be read
    #[error("archive error in {locator}: {reason}")]
    Archive { locator: String, reason: String },

    /// Workbook could not be parsed
    #[error("spreadsheet error in {locator}: {reason}")]
    Spreadsheet { locator: String, reason: String },

    /// Word-processing document could not be parsed
    #[error("document error in {locator}: {reason}")]
    Document { locator: String, reason: String },

    /// PDF text layer could not be extracted
    #[error("pdf error in {locator}: {reason}")]
    Pdf { locator: String, reason: String },

    /// Structured metadata was not valid JSON
    #[error("metadata error in {locator}: {source}")]
    Json {
        locator: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ArtifactError {
    /// Locator of the artifact that failed.
    pub fn locator(&self) -> &str {
        match self {
            Self::UnrecognizedSignature { locator, .. }
            | Self::Empty { locator }
            | Self::TooLarge { locator, .. }
            | Self::NestingTooDeep { locator }
            | Self::Archive { locator, .. }
            | Self::Spreadsheet { locator, .. }
            | Self::Document { locator, .. }
            | Self::Pdf { locator, .. }
            | Self::Json { locator, .. } => locator,
        }
    }
}

/// Errors raised while loading or compiling extraction configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configured regular expression does not compile
    #[error("invalid pattern for {field}: {source}")]
    InvalidPattern {
        field: String,
        #[source]
        source: regex::Error,
    },

    /// Configuration file could not be read
    #[error("cannot read configuration {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid JSON for the expected shape
    #[error("invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration is well-formed but semantically unusable
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors from the upstream detail lookup used as the last cascade strategy.
#[derive(Debug, Error)]
pub enum LookupError {
    /// The candidate lacks the identifiers the detail endpoint is keyed by
    #[error("record {record_id} has no detail key")]
    MissingKey { record_id: String },

    /// Upstream failed after retries
    #[error("detail lookup failed: {0}")]
    Upstream(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Result type alias for artifact operations.
pub type ArtifactResult<T> = std::result::Result<T, ArtifactError>;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
