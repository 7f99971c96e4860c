//! Candidate records as returned by the upstream listing endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::text::fold;

/// Reference to an attachment, as advertised by upstream.
///
/// The declared content type and name are untrusted; the artifact kind is
/// only decided after the bytes are downloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Download URL or other locator
    pub locator: String,

    /// Name or title advertised by upstream
    pub name: Option<String>,

    /// Content type advertised by upstream
    pub declared_type: Option<String>,

    /// Size in bytes, as advertised upstream or measured once downloaded
    pub size: Option<u64>,
}

impl ArtifactRef {
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            name: None,
            declared_type: None,
            size: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_declared_type(mut self, declared_type: impl Into<String>) -> Self {
        self.declared_type = Some(declared_type.into());
        self
    }
}

/// Where the announcing organization is located.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Jurisdiction {
    /// State abbreviation (UF)
    pub state: Option<String>,
    pub municipality: Option<String>,
}

/// One announcement prior to field extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    /// Upstream control number
    pub id: String,

    /// Organization tax id (CNPJ)
    pub organization_id: String,

    pub organization_name: String,

    /// Purchase year, part of the upstream detail key
    pub year: Option<i32>,

    /// Purchase sequence number, part of the upstream detail key
    pub sequence: Option<i64>,

    pub published_at: DateTime<Utc>,

    pub title: String,

    pub description: String,

    #[serde(default)]
    pub jurisdiction: Jurisdiction,

    /// Link to the system the announcement originated from
    pub source_system_link: Option<String>,

    /// Attachment references; listed separately when the listing omits them
    #[serde(default)]
    pub artifacts: Vec<ArtifactRef>,

    /// Raw listing key/values, read by the structured-metadata strategy
    #[serde(default)]
    pub listing_metadata: serde_json::Value,
}

impl CandidateRecord {
    pub fn new(
        id: impl Into<String>,
        organization_id: impl Into<String>,
        title: impl Into<String>,
        published_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            organization_id: organization_id.into(),
            organization_name: String::new(),
            year: None,
            sequence: None,
            published_at,
            title: title.into(),
            description: String::new(),
            jurisdiction: Jurisdiction::default(),
            source_system_link: None,
            artifacts: Vec::new(),
            listing_metadata: serde_json::Value::Null,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_organization_name(mut self, name: impl Into<String>) -> Self {
        self.organization_name = name.into();
        self
    }

    pub fn with_purchase(mut self, year: i32, sequence: i64) -> Self {
        self.year = Some(year);
        self.sequence = Some(sequence);
        self
    }

    pub fn with_artifact(mut self, artifact: ArtifactRef) -> Self {
        self.artifacts.push(artifact);
        self
    }

    pub fn with_listing_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.listing_metadata = metadata;
        self
    }

    /// Text handed to the scoring filter.
    pub fn relevance_text(&self) -> String {
        format!("{}\n{}", self.title, self.description)
    }

    /// Organization id with formatting stripped (digits only).
    fn organization_digits(&self) -> String {
        self.organization_id
            .chars()
            .filter(char::is_ascii_digit)
            .collect()
    }

    /// Key of the upstream detail endpoint: (organization, year, sequence).
    pub fn detail_key(&self) -> Option<(String, i32, i64)> {
        let organization = self.organization_digits();
        match (organization.is_empty(), self.year, self.sequence) {
            (false, Some(year), Some(sequence)) => Some((organization, year, sequence)),
            _ => None,
        }
    }

    /// Deduplication key.
    ///
    /// Hash of organization + year + sequence when the detail key is known,
    /// otherwise hash of the normalized title, organization and publication date.
    pub fn dedup_key(&self) -> DedupKey {
        match self.detail_key() {
            Some((organization, year, sequence)) => {
                DedupKey::from_parts(&[&organization, &year.to_string(), &sequence.to_string()])
            }
            None => {
                let organization = if self.organization_name.trim().is_empty() {
                    self.organization_id.clone()
                } else {
                    self.organization_name.clone()
                };
                DedupKey::from_parts(&[
                    &fold(&self.title),
                    &fold(&organization),
                    &self.published_at.date_naive().to_string(),
                ])
            }
        }
    }
}

/// Content hash identifying an announcement across overlapping windows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupKey(pub String);

impl DedupKey {
    fn from_parts(parts: &[&str]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(parts.join("|").as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DedupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn published() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 10, 14, 30, 0).unwrap()
    }

    #[test]
    fn test_dedup_key_uses_purchase_identity() {
        let a = CandidateRecord::new("a", "12.345.678/0001-90", "Leilão 1", published())
            .with_purchase(2026, 7);
        let b = CandidateRecord::new("b", "12345678000190", "Outro título", published())
            .with_purchase(2026, 7);

        assert_eq!(a.dedup_key(), b.dedup_key());
        assert_eq!(a.dedup_key().as_str().len(), 64);
    }

    #[test]
    fn test_dedup_key_falls_back_to_normalized_text() {
        let a = CandidateRecord::new("a", "", "LEILÃO de  Veículos", published())
            .with_organization_name("Prefeitura de Itu");
        let b = CandidateRecord::new("b", "", "leilao de veiculos", published())
            .with_organization_name("PREFEITURA DE ITU");

        assert!(a.detail_key().is_none());
        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn test_detail_key_requires_all_parts() {
        let candidate = CandidateRecord::new("a", "12.345.678/0001-90", "x", published());
        assert!(candidate.detail_key().is_none());

        let candidate = candidate.with_purchase(2025, 12);
        assert_eq!(
            candidate.detail_key(),
            Some(("12345678000190".to_string(), 2025, 12))
        );
    }
}
