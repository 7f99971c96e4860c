//! Retroactive re-validation of persisted records.
//!
//! The URL gate gets stricter over time (blacklist entries, fused-TLD
//! detection). Records extracted under an older gate may hold a "valid"
//! broker link the current gate rejects; the sanitizer quarantines those
//! into the raw field and leaves every other field alone.

use serde::{Deserialize, Serialize};

use crate::error::ConfigResult;
use crate::types::config::UrlGateConfig;
use crate::types::record::{FieldName, FieldValue, NormalizedRecord, RejectionReason};
use crate::url_gate::{UrlGate, UrlVerdict};

/// One field correction, for the audit report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizeChange {
    pub field: FieldName,
    pub before: Option<String>,
    pub after: Option<String>,
    pub reason: RejectionReason,
}

#[derive(Debug, Clone)]
pub struct SanitizeOutcome {
    pub changed: bool,
    pub record: NormalizedRecord,
    pub changes: Vec<SanitizeChange>,
}

#[derive(Debug, Clone)]
pub struct Sanitizer {
    gate: UrlGate,
}

impl Sanitizer {
    pub fn new(gate: UrlGate) -> Self {
        Self { gate }
    }

    pub fn from_config(config: &UrlGateConfig) -> ConfigResult<Self> {
        Ok(Self::new(UrlGate::new(config)?))
    }

    /// `(changed, corrected)`. Applying it to its own output changes nothing.
    pub fn sanitize(&self, record: &NormalizedRecord) -> (bool, NormalizedRecord) {
        let outcome = self.review(record);
        (outcome.changed, outcome.record)
    }

    /// Like [`Sanitizer::sanitize`], with the list of corrections made.
    pub fn review(&self, record: &NormalizedRecord) -> SanitizeOutcome {
        let mut corrected = record.clone();
        let mut changes = Vec::new();

        if let FieldValue::Determined(link) = &record.broker_link_valid {
            if let UrlVerdict::Rejected { reason } = self.gate.validate_url(link) {
                let reason = RejectionReason::Url(reason);

                if !corrected.broker_link_raw.is_determined() {
                    corrected.broker_link_raw = FieldValue::Determined(link.clone());
                }
                corrected.broker_link_valid = FieldValue::NotDetermined;
                corrected.provenance.record_correction(
                    FieldName::BrokerLink,
                    link.clone(),
                    reason.clone(),
                    "quarantined: rejected by current URL gate",
                );

                tracing::info!(
                    record_id = %record.record_id,
                    link = %link,
                    reason = ?reason,
                    "Quarantining broker link"
                );
                changes.push(SanitizeChange {
                    field: FieldName::BrokerLink,
                    before: Some(link.clone()),
                    after: None,
                    reason,
                });
            }
        }

        SanitizeOutcome {
            changed: !changes.is_empty(),
            record: corrected,
            changes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::candidate::DedupKey;
    use crate::url_gate::UrlRejection;
    use proptest::prelude::*;

    fn sanitizer() -> Sanitizer {
        Sanitizer::from_config(&UrlGateConfig::default()).unwrap()
    }

    fn record(raw: Option<&str>, valid: Option<&str>) -> NormalizedRecord {
        let mut record = NormalizedRecord::undetermined(DedupKey("k".into()), "r-1");
        record.broker_link_raw = raw.map(str::to_string).into();
        record.broker_link_valid = valid.map(str::to_string).into();
        record.broker_name = FieldValue::Determined("Maria Souza".into());
        record
    }

    #[test]
    fn test_fused_tld_is_quarantined() {
        let before = record(None, Some("https://DESTINADOS.ED.COMEMORA"));
        let outcome = sanitizer().review(&before);

        assert!(outcome.changed);
        assert_eq!(outcome.record.broker_link_valid, FieldValue::NotDetermined);
        assert_eq!(
            outcome.record.broker_link_raw,
            FieldValue::Determined("https://DESTINADOS.ED.COMEMORA".into())
        );
        assert_eq!(
            outcome.changes[0].reason,
            RejectionReason::Url(UrlRejection::FusedTld)
        );
        assert!(outcome.record.provenance.accepted(FieldName::BrokerLink).is_none());
        assert_eq!(outcome.record.broker_name, before.broker_name);
    }

    #[test]
    fn test_existing_raw_is_kept() {
        let before = record(Some("contato@leiloeira.com.br"), Some("https://gmail.com/leilao"));
        let (changed, after) = sanitizer().sanitize(&before);

        assert!(changed);
        assert_eq!(
            after.broker_link_raw,
            FieldValue::Determined("contato@leiloeira.com.br".into())
        );
        assert_eq!(after.broker_link_valid, FieldValue::NotDetermined);
    }

    #[test]
    fn test_valid_link_untouched() {
        let before = record(None, Some("https://www.leiloeira-exemplo.com.br"));
        let (changed, after) = sanitizer().sanitize(&before);
        assert!(!changed);
        assert_eq!(after, before);
    }

    fn link() -> impl Strategy<Value = Option<String>> {
        prop_oneof![
            Just(None),
            Just(Some("https://www.leiloes-sul.com.br".to_string())),
            Just(Some("www.gmail.com".to_string())),
            Just(Some("PREFEITURA.ED.COMEMORA".to_string())),
            Just(Some("contato@leiloes.com.br".to_string())),
            "[a-zA-Z0-9.:/@-]{0,30}".prop_map(Some),
        ]
    }

    proptest! {
        #[test]
        fn prop_sanitize_is_a_fixpoint(raw in link(), valid in link()) {
            let gate = sanitizer();
            let original = record(raw.as_deref(), valid.as_deref());

            let (_, once) = gate.sanitize(&original);
            let (changed_again, twice) = gate.sanitize(&once);

            prop_assert!(!changed_again);
            prop_assert_eq!(twice, once);
        }
    }
}
