//! Normalized extraction output and its provenance.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::artifacts::ArtifactKind;
use crate::types::candidate::DedupKey;
use crate::url_gate::UrlRejection;

/// The fixed set of fields the cascade derives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldName {
    AuctionDate,
    EstimatedValue,
    ItemCount,
    BrokerName,
    BrokerLink,
    Tags,
}

impl FieldName {
    pub const ALL: [FieldName; 6] = [
        FieldName::AuctionDate,
        FieldName::EstimatedValue,
        FieldName::ItemCount,
        FieldName::BrokerName,
        FieldName::BrokerLink,
        FieldName::Tags,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuctionDate => "auction_date",
            Self::EstimatedValue => "estimated_value",
            Self::ItemCount => "item_count",
            Self::BrokerName => "broker_name",
            Self::BrokerLink => "broker_link",
            Self::Tags => "tags",
        }
    }
}

impl std::fmt::Display for FieldName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extraction strategies, tried per field in configured order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Keyed lookup in machine-readable key/value sources
    StructuredMetadata,
    /// Pattern over spreadsheet rows
    SpreadsheetPattern,
    /// Pattern over word-processing document text
    WordDocumentPattern,
    /// Pattern over PDF text
    PortableDocumentPattern,
    /// Pattern over the announcement title and description
    DescriptionPattern,
    /// Keyed lookup in the upstream detail endpoint
    DetailLookup,
    /// Retroactive correction; never part of a configured cascade
    Sanitizer,
}

impl StrategyKind {
    /// Artifact kind a document strategy reads, if any.
    pub fn artifact_kind(&self) -> Option<ArtifactKind> {
        match self {
            Self::StructuredMetadata => Some(ArtifactKind::StructuredMetadata),
            Self::SpreadsheetPattern => Some(ArtifactKind::Spreadsheet),
            Self::WordDocumentPattern => Some(ArtifactKind::WordProcessingDocument),
            Self::PortableDocumentPattern => Some(ArtifactKind::PortableDocument),
            Self::DescriptionPattern | Self::DetailLookup | Self::Sanitizer => None,
        }
    }
}

/// A field value or the explicit "not determined" sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum FieldValue<T> {
    Determined(T),
    NotDetermined,
}

impl<T> Default for FieldValue<T> {
    fn default() -> Self {
        Self::NotDetermined
    }
}

impl<T> FieldValue<T> {
    pub fn is_determined(&self) -> bool {
        matches!(self, Self::Determined(_))
    }

    pub fn as_option(&self) -> Option<&T> {
        match self {
            Self::Determined(value) => Some(value),
            Self::NotDetermined => None,
        }
    }
}

impl<T> From<Option<T>> for FieldValue<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Self::Determined(value),
            None => Self::NotDetermined,
        }
    }
}

/// Why an attempt did not produce the field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// The strategy had no source of the kind it reads
    NoSource,
    /// The source was read but nothing matched
    NoMatch,
    /// The source could not be read (malformed artifact)
    SourceUnavailable,
    /// The upstream detail was not (or could not be) fetched
    DetailNotFetched,
    /// Candidate text could not be parsed as the field type
    Unparseable,
    /// Parsed, but outside the plausible range
    OutOfRange,
    /// Broker name is a role or placeholder, not a name
    GenericName,
    /// URL gate rejection
    Url(UrlRejection),
}

/// One (field, strategy, source, candidate) evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionAttempt {
    pub field: FieldName,
    pub strategy: StrategyKind,
    /// Source locator (artifact locator, `#`-anchored for spreadsheet rows)
    pub source: String,
    pub candidate: Option<String>,
    pub accepted: bool,
    pub rejection: Option<RejectionReason>,
    /// Free-form detail (error message, correction note)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ExtractionAttempt {
    pub fn accepted(
        field: FieldName,
        strategy: StrategyKind,
        source: impl Into<String>,
        candidate: impl Into<String>,
    ) -> Self {
        Self {
            field,
            strategy,
            source: source.into(),
            candidate: Some(candidate.into()),
            accepted: true,
            rejection: None,
            note: None,
        }
    }

    pub fn rejected(
        field: FieldName,
        strategy: StrategyKind,
        source: impl Into<String>,
        candidate: Option<String>,
        reason: RejectionReason,
    ) -> Self {
        Self {
            field,
            strategy,
            source: source.into(),
            candidate,
            accepted: false,
            rejection: Some(reason),
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Ordered attempt log per field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    attempts: BTreeMap<FieldName, Vec<ExtractionAttempt>>,
}

impl Provenance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, attempt: ExtractionAttempt) {
        self.attempts.entry(attempt.field).or_default().push(attempt);
    }

    /// All attempts for a field, in evaluation order.
    pub fn attempts(&self, field: FieldName) -> &[ExtractionAttempt] {
        self.attempts.get(&field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The attempt that produced the field's current value.
    ///
    /// A later sanitizer correction revokes an earlier acceptance.
    pub fn accepted(&self, field: FieldName) -> Option<&ExtractionAttempt> {
        let mut current = None;
        for attempt in self.attempts(field) {
            if attempt.accepted {
                current = Some(attempt);
            } else if attempt.strategy == StrategyKind::Sanitizer {
                current = None;
            }
        }
        current
    }

    /// Append a sanitizer audit attempt revoking the field's value.
    pub fn record_correction(
        &mut self,
        field: FieldName,
        previous: impl Into<String>,
        reason: RejectionReason,
        note: impl Into<String>,
    ) {
        self.push(
            ExtractionAttempt::rejected(
                field,
                StrategyKind::Sanitizer,
                "sanitizer",
                Some(previous.into()),
                reason,
            )
            .with_note(note),
        );
    }

    pub fn fields(&self) -> impl Iterator<Item = FieldName> + '_ {
        self.attempts.keys().copied()
    }
}

/// An artifact the cascade could not use at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedArtifact {
    pub locator: String,
    pub reason: String,
}

/// The extraction engine's output: every field populated, with provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub dedup_key: DedupKey,
    pub record_id: String,
    pub auction_date: FieldValue<NaiveDate>,
    pub estimated_value: FieldValue<Decimal>,
    pub item_count: FieldValue<u32>,
    pub broker_name: FieldValue<String>,
    /// First URL-like text seen, whether or not it validated
    pub broker_link_raw: FieldValue<String>,
    /// Populated only on URL gate acceptance
    pub broker_link_valid: FieldValue<String>,
    pub tags: FieldValue<Vec<String>>,
    pub provenance: Provenance,
    #[serde(default)]
    pub skipped_artifacts: Vec<SkippedArtifact>,
    pub extracted_at: DateTime<Utc>,
}

impl NormalizedRecord {
    /// A record with every field set to the sentinel.
    pub fn undetermined(dedup_key: DedupKey, record_id: impl Into<String>) -> Self {
        Self {
            dedup_key,
            record_id: record_id.into(),
            auction_date: FieldValue::NotDetermined,
            estimated_value: FieldValue::NotDetermined,
            item_count: FieldValue::NotDetermined,
            broker_name: FieldValue::NotDetermined,
            broker_link_raw: FieldValue::NotDetermined,
            broker_link_valid: FieldValue::NotDetermined,
            tags: FieldValue::NotDetermined,
            provenance: Provenance::new(),
            skipped_artifacts: Vec::new(),
            extracted_at: Utc::now(),
        }
    }

    /// Whether the cascade has settled a field. Broker link counts as
    /// settled only once a valid link is held.
    pub fn is_determined(&self, field: FieldName) -> bool {
        match field {
            FieldName::AuctionDate => self.auction_date.is_determined(),
            FieldName::EstimatedValue => self.estimated_value.is_determined(),
            FieldName::ItemCount => self.item_count.is_determined(),
            FieldName::BrokerName => self.broker_name.is_determined(),
            FieldName::BrokerLink => self.broker_link_valid.is_determined(),
            FieldName::Tags => self.tags.is_determined(),
        }
    }

    /// Fields still holding the sentinel.
    pub fn undetermined_fields(&self) -> Vec<FieldName> {
        FieldName::ALL
            .into_iter()
            .filter(|field| !self.is_determined(*field))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_value_serializes_sentinel_explicitly() {
        let value: FieldValue<u32> = FieldValue::NotDetermined;
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json, serde_json::json!({"status": "not_determined"}));

        let value = FieldValue::Determined(12u32);
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json, serde_json::json!({"status": "determined", "value": 12}));
    }

    #[test]
    fn test_sanitizer_attempt_revokes_acceptance() {
        let mut provenance = Provenance::new();
        provenance.push(ExtractionAttempt::accepted(
            FieldName::BrokerLink,
            StrategyKind::DescriptionPattern,
            "description",
            "www.leiloes.com.br",
        ));
        assert!(provenance.accepted(FieldName::BrokerLink).is_some());

        provenance.push(ExtractionAttempt::rejected(
            FieldName::BrokerLink,
            StrategyKind::Sanitizer,
            "sanitizer",
            Some("www.leiloes.com.br".to_string()),
            RejectionReason::Url(UrlRejection::Blacklisted),
        ));
        assert!(provenance.accepted(FieldName::BrokerLink).is_none());
    }

    #[test]
    fn test_undetermined_record_has_every_field() {
        let record = NormalizedRecord::undetermined(DedupKey("k".into()), "r1");
        assert_eq!(record.undetermined_fields().len(), FieldName::ALL.len());
    }
}
