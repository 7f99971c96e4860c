//! Source preparation: expand archives and render every artifact once.

use crate::artifacts::{expand, render, ArtifactKind, RenderedSource, SourceArtifact};
use crate::text::NormalizedText;
use crate::types::candidate::CandidateRecord;
use crate::types::config::ArtifactLimits;
use crate::types::record::SkippedArtifact;

/// Locator of the synthetic source built from the listing payload.
pub const LISTING_LOCATOR: &str = "upstream:listing";

/// Locator used for the announcement title and description.
pub const DESCRIPTION_LOCATOR: &str = "upstream:description";

/// A readable artifact, or one whose kind is known but could not be rendered.
#[derive(Debug, Clone)]
pub enum PreparedSource {
    Ready(RenderedSource),
    Unavailable {
        locator: String,
        kind: ArtifactKind,
        reason: String,
    },
}

impl PreparedSource {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            Self::Ready(source) => source.kind,
            Self::Unavailable { kind, .. } => *kind,
        }
    }

    pub fn locator(&self) -> &str {
        match self {
            Self::Ready(source) => &source.locator,
            Self::Unavailable { locator, .. } => locator,
        }
    }
}

/// Everything the strategies read for one candidate.
#[derive(Debug, Clone)]
pub struct PreparedSources {
    pub sources: Vec<PreparedSource>,
    pub description: RenderedSource,
    /// Artifacts whose kind could not be determined or whose container failed
    pub skipped: Vec<SkippedArtifact>,
}

impl PreparedSources {
    /// Expand and render. Listing metadata comes first among structured sources.
    pub fn prepare(
        candidate: &CandidateRecord,
        artifacts: Vec<SourceArtifact>,
        limits: &ArtifactLimits,
    ) -> Self {
        let mut sources = Vec::new();
        let mut skipped = Vec::new();

        let has_listing = match &candidate.listing_metadata {
            serde_json::Value::Object(map) => !map.is_empty(),
            serde_json::Value::Array(items) => !items.is_empty(),
            _ => false,
        };
        if has_listing {
            let listing = SourceArtifact::structured(LISTING_LOCATOR, &candidate.listing_metadata);
            sources.push(render_one(&listing));
        }

        for artifact in artifacts {
            let expansion = expand(artifact, limits);
            for failure in expansion.failures {
                tracing::warn!(
                    record_id = %candidate.id,
                    locator = failure.locator(),
                    error = %failure,
                    "Skipping unreadable artifact"
                );
                skipped.push(SkippedArtifact {
                    locator: failure.locator().to_string(),
                    reason: failure.to_string(),
                });
            }
            sources.extend(expansion.artifacts.iter().map(render_one));
        }

        let description_text = candidate.relevance_text();
        let description = RenderedSource {
            locator: DESCRIPTION_LOCATOR.to_string(),
            kind: ArtifactKind::StructuredMetadata,
            segments: vec![crate::artifacts::Segment {
                anchor: None,
                text: NormalizedText::new(&description_text),
            }],
            entries: Vec::new(),
        };

        Self {
            sources,
            description,
            skipped,
        }
    }

    /// Sources of one kind, in preparation order.
    pub fn of_kind(&self, kind: ArtifactKind) -> impl Iterator<Item = &PreparedSource> {
        self.sources.iter().filter(move |source| source.kind() == kind)
    }
}

fn render_one(artifact: &SourceArtifact) -> PreparedSource {
    match render(artifact) {
        Ok(source) => PreparedSource::Ready(source),
        Err(e) => {
            tracing::warn!(
                locator = %artifact.locator,
                kind = %artifact.kind,
                error = %e,
                "Artifact could not be rendered"
            );
            PreparedSource::Unavailable {
                locator: artifact.locator.clone(),
                kind: artifact.kind,
                reason: e.to_string(),
            }
        }
    }
}
