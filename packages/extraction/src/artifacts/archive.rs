//! Archive expansion.
//!
//! Zip containers are opened and their members sniffed like any other
//! download. Nested archives are followed up to a depth limit. Members are
//! addressed as `outer!member`.

use std::io::{Cursor, Read};

use super::{ArtifactKind, SourceArtifact};
use crate::error::ArtifactError;
use crate::types::config::ArtifactLimits;

/// Leaf artifacts found in an artifact, plus whatever could not be read.
#[derive(Debug, Default)]
pub struct Expansion {
    pub artifacts: Vec<SourceArtifact>,
    pub failures: Vec<ArtifactError>,
}

/// Expand an artifact into its readable leaves.
///
/// A non-archive artifact is returned as its own single leaf.
pub fn expand(artifact: SourceArtifact, limits: &ArtifactLimits) -> Expansion {
    let mut expansion = Expansion::default();
    expand_into(artifact, 0, limits, &mut expansion);
    expansion
}

fn expand_into(
    artifact: SourceArtifact,
    depth: usize,
    limits: &ArtifactLimits,
    expansion: &mut Expansion,
) {
    if artifact.kind != ArtifactKind::Archive {
        expansion.artifacts.push(artifact);
        return;
    }
    if depth >= limits.max_archive_depth {
        expansion.failures.push(ArtifactError::NestingTooDeep {
            locator: artifact.locator,
        });
        return;
    }

    let archive_error = |reason: String| ArtifactError::Archive {
        locator: artifact.locator.clone(),
        reason,
    };

    if !artifact.bytes.starts_with(b"PK") {
        expansion
            .failures
            .push(archive_error("unsupported archive format".into()));
        return;
    }
    let mut archive = match zip::ZipArchive::new(Cursor::new(artifact.bytes.as_slice())) {
        Ok(archive) => archive,
        Err(e) => {
            expansion.failures.push(archive_error(e.to_string()));
            return;
        }
    };

    tracing::debug!(
        locator = %artifact.locator,
        entries = archive.len(),
        depth,
        "Expanding archive"
    );

    for index in 0..archive.len() {
        let mut entry = match archive.by_index(index) {
            Ok(entry) => entry,
            Err(e) => {
                expansion.failures.push(archive_error(format!("entry {index}: {e}")));
                continue;
            }
        };
        if entry.is_dir() {
            continue;
        }

        let locator = format!("{}!{}", artifact.locator, entry.name());
        if entry.size() > limits.max_entry_bytes {
            expansion.failures.push(ArtifactError::TooLarge {
                locator,
                size: entry.size(),
            });
            continue;
        }

        let mut bytes = Vec::new();
        let read = (&mut entry)
            .take(limits.max_entry_bytes + 1)
            .read_to_end(&mut bytes);
        if let Err(e) = read {
            expansion.failures.push(ArtifactError::Archive {
                locator,
                reason: e.to_string(),
            });
            continue;
        }
        if bytes.len() as u64 > limits.max_entry_bytes {
            expansion.failures.push(ArtifactError::TooLarge {
                size: bytes.len() as u64,
                locator,
            });
            continue;
        }

        let name = entry
            .name()
            .rsplit('/')
            .next()
            .map(str::to_string);
        drop(entry);

        match SourceArtifact::sniff(locator, name, None, bytes) {
            Ok(member) => expand_into(member, depth + 1, limits, expansion),
            Err(e) => expansion.failures.push(e),
        }
    }
}
