//! The extraction cascade.
//!
//! For every field, strategies run in their configured order. Each candidate
//! value a strategy produces goes through the field's validator; the first
//! one that validates wins and later strategies for that field are not
//! evaluated. Every candidate, accepted or not, lands in provenance.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use regex::Regex;

use super::lookup::{DetailLookup, UpstreamDetail};
use super::sources::{PreparedSource, PreparedSources};
use crate::artifacts::{RenderedSource, SourceArtifact};
use crate::error::{ConfigError, ConfigResult};
use crate::text::{fold, term_pattern};
use crate::types::candidate::CandidateRecord;
use crate::types::config::{ExtractionConfig, FieldRule};
use crate::types::record::{
    ExtractionAttempt, FieldName, FieldValue, NormalizedRecord, RejectionReason, StrategyKind,
};
use crate::url_gate::{UrlGate, UrlVerdict};
use crate::validators::{parse_broker_name, parse_count, parse_currency, parse_date, Rejection};

/// Locator recorded when the detail strategy ran without a payload.
const DETAIL_LOCATOR: &str = "upstream:detail";

#[derive(Debug, Clone)]
struct CompiledRule {
    strategies: Vec<StrategyKind>,
    patterns: Vec<Regex>,
    metadata_keys: Vec<String>,
    detail_keys: Vec<String>,
}

#[derive(Debug, Clone)]
struct CompiledTag {
    tag: String,
    terms: Vec<Regex>,
}

/// Compiled cascade. Built once from [`ExtractionConfig`]; share behind an `Arc`.
#[derive(Debug, Clone)]
pub struct CascadeEngine {
    config: ExtractionConfig,
    gate: UrlGate,
    rules: BTreeMap<FieldName, CompiledRule>,
    lot_pattern: Regex,
    tags: Vec<CompiledTag>,
}

impl CascadeEngine {
    pub fn new(config: ExtractionConfig) -> ConfigResult<Self> {
        config.validate()?;

        let rules = config
            .fields
            .iter()
            .map(|(field, rule)| Ok((*field, compile_rule(*field, rule)?)))
            .collect::<ConfigResult<BTreeMap<_, _>>>()?;

        let lot_pattern = compile_pattern("lot_enumeration", &config.lot_enumeration)?;

        let tags = config
            .tags
            .iter()
            .map(|rule| {
                let terms = rule
                    .terms
                    .iter()
                    .map(|term| compile_pattern(&format!("tag {}", rule.tag), &term_pattern(term)))
                    .collect::<ConfigResult<Vec<_>>>()?;
                Ok(CompiledTag {
                    tag: rule.tag.clone(),
                    terms,
                })
            })
            .collect::<ConfigResult<Vec<_>>>()?;

        Ok(Self {
            gate: UrlGate::new(&config.url_gate)?,
            rules,
            lot_pattern,
            tags,
            config,
        })
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// The URL gate compiled from the same configuration.
    pub fn gate(&self) -> &UrlGate {
        &self.gate
    }

    /// Expand and render a candidate's artifacts once for all fields.
    pub fn prepare(&self, candidate: &CandidateRecord, artifacts: Vec<SourceArtifact>) -> PreparedSources {
        PreparedSources::prepare(candidate, artifacts, &self.config.artifacts)
    }

    /// Run every field's cascade over prepared sources.
    ///
    /// Without a detail payload the detail strategy records
    /// [`RejectionReason::DetailNotFetched`] and the cascade moves on.
    pub fn run(
        &self,
        candidate: &CandidateRecord,
        prepared: &PreparedSources,
        detail: Option<&UpstreamDetail>,
    ) -> NormalizedRecord {
        let mut record = NormalizedRecord::undetermined(candidate.dedup_key(), candidate.id.clone());
        record.skipped_artifacts = prepared.skipped.clone();
        let detail_source = detail.map(UpstreamDetail::to_source);

        for field in FieldName::ALL {
            let Some(rule) = self.rules.get(&field) else {
                continue;
            };
            let mut run = FieldRun {
                engine: self,
                field,
                record: &mut record,
            };
            run.cascade(rule, prepared, detail_source.as_ref());
        }

        record.extracted_at = Utc::now();
        tracing::debug!(
            record_id = %candidate.id,
            undetermined = ?record.undetermined_fields(),
            skipped = record.skipped_artifacts.len(),
            "Extraction finished"
        );
        record
    }

    /// Extract from artifacts alone; the detail strategy is recorded as not fetched.
    pub fn extract(&self, candidate: &CandidateRecord, artifacts: Vec<SourceArtifact>) -> NormalizedRecord {
        let prepared = self.prepare(candidate, artifacts);
        self.run(candidate, &prepared, None)
    }

    /// Extract with an already fetched detail payload.
    pub fn extract_with_detail(
        &self,
        candidate: &CandidateRecord,
        artifacts: Vec<SourceArtifact>,
        detail: &UpstreamDetail,
    ) -> NormalizedRecord {
        let prepared = self.prepare(candidate, artifacts);
        self.run(candidate, &prepared, Some(detail))
    }

    /// Extract, calling the detail lookup only if a field still needs it.
    ///
    /// A failed lookup keeps the artifact-only result.
    pub async fn extract_with_lookup(
        &self,
        candidate: &CandidateRecord,
        artifacts: Vec<SourceArtifact>,
        lookup: &dyn DetailLookup,
    ) -> NormalizedRecord {
        let prepared = self.prepare(candidate, artifacts);
        let record = self.run(candidate, &prepared, None);
        if !self.needs_detail(&record) {
            return record;
        }

        match lookup.lookup(candidate).await {
            Ok(detail) => self.run(candidate, &prepared, Some(&detail)),
            Err(e) => {
                tracing::warn!(
                    record_id = %candidate.id,
                    error = %e,
                    "Detail lookup failed, keeping artifact-only extraction"
                );
                record
            }
        }
    }

    /// Whether an undetermined field lists the detail strategy.
    pub fn needs_detail(&self, record: &NormalizedRecord) -> bool {
        record.undetermined_fields().into_iter().any(|field| {
            self.rules
                .get(&field)
                .is_some_and(|rule| rule.strategies.contains(&StrategyKind::DetailLookup))
        })
    }
}

fn compile_pattern(field: &str, source: &str) -> ConfigResult<Regex> {
    Regex::new(source).map_err(|source| ConfigError::InvalidPattern {
        field: field.to_string(),
        source,
    })
}

fn compile_rule(field: FieldName, rule: &FieldRule) -> ConfigResult<CompiledRule> {
    let patterns = rule
        .patterns
        .iter()
        .map(|pattern| compile_pattern(field.as_str(), pattern))
        .collect::<ConfigResult<Vec<_>>>()?;
    Ok(CompiledRule {
        strategies: rule.strategies.clone(),
        patterns,
        metadata_keys: rule.metadata_keys.iter().map(|k| normalize_key(k)).collect(),
        detail_keys: rule.detail_keys.iter().map(|k| normalize_key(k)).collect(),
    })
}

/// Keys compare folded, without separators: `data_leilao` == `dataLeilao`.
fn normalize_key(key: &str) -> String {
    fold(key)
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '.')
        .collect()
}

fn key_matches(entry_key: &str, wanted: &str) -> bool {
    let entry = normalize_key(entry_key);
    entry == wanted
        || entry
            .strip_suffix(wanted)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

/// One field's pass through its strategies.
struct FieldRun<'a> {
    engine: &'a CascadeEngine,
    field: FieldName,
    record: &'a mut NormalizedRecord,
}

impl FieldRun<'_> {
    fn cascade(
        &mut self,
        rule: &CompiledRule,
        prepared: &PreparedSources,
        detail: Option<&RenderedSource>,
    ) {
        for strategy in &rule.strategies {
            let strategy = *strategy;
            let determined = match strategy {
                StrategyKind::DescriptionPattern => {
                    self.probe_text(strategy, &prepared.description, rule)
                }
                StrategyKind::DetailLookup => match detail {
                    Some(source) => self.probe_keyed(strategy, source, &rule.detail_keys),
                    None => {
                        self.note(strategy, DETAIL_LOCATOR, RejectionReason::DetailNotFetched, None);
                        false
                    }
                },
                StrategyKind::Sanitizer => false,
                _ => self.probe_artifacts(strategy, prepared, rule),
            };

            if determined {
                tracing::debug!(
                    record_id = %self.record.record_id,
                    field = %self.field,
                    strategy = ?strategy,
                    "Field determined"
                );
                return;
            }
        }
    }

    /// Document strategies: every source of the strategy's artifact kind.
    fn probe_artifacts(
        &mut self,
        strategy: StrategyKind,
        prepared: &PreparedSources,
        rule: &CompiledRule,
    ) -> bool {
        let Some(kind) = strategy.artifact_kind() else {
            return false;
        };

        let mut seen = false;
        for source in prepared.of_kind(kind) {
            seen = true;
            let determined = match source {
                PreparedSource::Ready(source) if strategy == StrategyKind::StructuredMetadata => {
                    self.probe_keyed(strategy, source, &rule.metadata_keys)
                }
                PreparedSource::Ready(source) => self.probe_text(strategy, source, rule),
                PreparedSource::Unavailable { locator, reason, .. } => {
                    self.note(
                        strategy,
                        locator,
                        RejectionReason::SourceUnavailable,
                        Some(reason.clone()),
                    );
                    false
                }
            };
            if determined {
                return true;
            }
        }

        if !seen {
            self.note(strategy, kind.as_str(), RejectionReason::NoSource, None);
        }
        false
    }

    /// Keyed lookup over flattened entries, configured key order first.
    fn probe_keyed(&mut self, strategy: StrategyKind, source: &RenderedSource, keys: &[String]) -> bool {
        if self.field == FieldName::Tags {
            return self.probe_tags(strategy, source);
        }

        let mut matched = false;
        for wanted in keys {
            for (key, value) in &source.entries {
                if !key_matches(key, wanted) {
                    continue;
                }
                matched = true;
                let locator = format!("{}#{}", source.locator, key);
                if self.offer(strategy, &locator, value, None) {
                    return true;
                }
            }
        }

        if !matched {
            self.note(strategy, &source.locator, RejectionReason::NoMatch, None);
        }
        false
    }

    /// Pattern matching over a source's text segments.
    fn probe_text(&mut self, strategy: StrategyKind, source: &RenderedSource, rule: &CompiledRule) -> bool {
        match self.field {
            FieldName::Tags => return self.probe_tags(strategy, source),
            FieldName::BrokerLink => return self.probe_links(strategy, source),
            _ => {}
        }

        let mut matched = false;
        for pattern in &rule.patterns {
            for segment in &source.segments {
                for caps in pattern.captures_iter(segment.text.as_str()) {
                    let Some(capture) = caps.get(1).or_else(|| caps.get(0)) else {
                        continue;
                    };
                    let candidate = segment.text.original_span(capture.range());
                    if candidate.trim().is_empty() {
                        continue;
                    }
                    matched = true;
                    let locator = source.segment_locator(segment);
                    if self.offer(strategy, &locator, candidate, None) {
                        return true;
                    }
                }
            }
        }

        if self.field == FieldName::ItemCount {
            let highest_lot = source
                .segments
                .iter()
                .flat_map(|segment| self.engine.lot_pattern.captures_iter(segment.text.as_str()))
                .filter_map(|caps| caps.get(1)?.as_str().parse::<u32>().ok())
                .max();
            if let Some(lots) = highest_lot {
                matched = true;
                if self.offer(strategy, &source.locator, &lots.to_string(), Some("lot enumeration")) {
                    return true;
                }
            }
        }

        if !matched {
            self.note(strategy, &source.locator, RejectionReason::NoMatch, None);
        }
        false
    }

    fn probe_links(&mut self, strategy: StrategyKind, source: &RenderedSource) -> bool {
        let mut matched = false;
        for segment in &source.segments {
            for token in self.engine.gate.find_candidates(&segment.text) {
                matched = true;
                let locator = source.segment_locator(segment);
                if self.offer(strategy, &locator, &token, None) {
                    return true;
                }
            }
        }
        if !matched {
            self.note(strategy, &source.locator, RejectionReason::NoMatch, None);
        }
        false
    }

    /// Tags from the first source matching any rule; sorted and deduplicated.
    fn probe_tags(&mut self, strategy: StrategyKind, source: &RenderedSource) -> bool {
        let mut tags = BTreeSet::new();
        for segment in &source.segments {
            for rule in &self.engine.tags {
                if rule.terms.iter().any(|term| term.is_match(segment.text.as_str())) {
                    tags.insert(rule.tag.clone());
                }
            }
        }

        if tags.is_empty() {
            self.note(strategy, &source.locator, RejectionReason::NoMatch, None);
            return false;
        }
        let tags: Vec<String> = tags.into_iter().collect();
        self.record.provenance.push(ExtractionAttempt::accepted(
            self.field,
            strategy,
            source.locator.clone(),
            tags.join(","),
        ));
        self.record.tags = FieldValue::Determined(tags);
        true
    }

    /// Validate one candidate value and record the attempt.
    fn offer(&mut self, strategy: StrategyKind, locator: &str, candidate: &str, note: Option<&str>) -> bool {
        let limits = &self.engine.config.limits;
        let record = &mut *self.record;

        let outcome: Result<Option<String>, Rejection> = match self.field {
            FieldName::AuctionDate => parse_date(candidate, limits).map(|date| {
                record.auction_date = FieldValue::Determined(date);
                None
            }),
            FieldName::EstimatedValue => parse_currency(candidate, limits).map(|value| {
                record.estimated_value = FieldValue::Determined(value);
                None
            }),
            FieldName::ItemCount => parse_count(candidate, limits).map(|count| {
                record.item_count = FieldValue::Determined(count);
                None
            }),
            FieldName::BrokerName => parse_broker_name(candidate).map(|name| {
                record.broker_name = FieldValue::Determined(name);
                None
            }),
            FieldName::BrokerLink => {
                let raw_note = (!record.broker_link_raw.is_determined()).then(|| {
                    record.broker_link_raw = FieldValue::Determined(candidate.to_string());
                    "raw capture".to_string()
                });
                match self.engine.gate.validate_url(candidate) {
                    UrlVerdict::Accepted { normalized, via_whitelist } => {
                        record.broker_link_valid = FieldValue::Determined(normalized.clone());
                        let detail = if via_whitelist {
                            format!("{normalized} (whitelisted)")
                        } else {
                            normalized
                        };
                        Ok(Some(match raw_note {
                            Some(raw) => format!("{raw}; {detail}"),
                            None => detail,
                        }))
                    }
                    UrlVerdict::Rejected { reason } => Err(Rejection::new(
                        RejectionReason::Url(reason),
                        raw_note.unwrap_or_default(),
                    )),
                }
            }
            FieldName::Tags => return false,
        };

        let attempt = match outcome {
            Ok(detail) => {
                let attempt = ExtractionAttempt::accepted(self.field, strategy, locator, candidate);
                match detail.as_deref().or(note) {
                    Some(text) => attempt.with_note(text),
                    None => attempt,
                }
            }
            Err(rejection) => {
                let attempt = ExtractionAttempt::rejected(
                    self.field,
                    strategy,
                    locator,
                    Some(candidate.to_string()),
                    rejection.reason,
                );
                let detail = match note {
                    Some(note) if rejection.detail.is_empty() => note.to_string(),
                    Some(note) => format!("{note}; {}", rejection.detail),
                    None => rejection.detail,
                };
                if detail.is_empty() {
                    attempt
                } else {
                    attempt.with_note(detail)
                }
            }
        };

        let accepted = attempt.accepted;
        self.record.provenance.push(attempt);
        accepted
    }

    /// Record an attempt that produced no candidate value.
    fn note(&mut self, strategy: StrategyKind, locator: &str, reason: RejectionReason, detail: Option<String>) {
        let attempt = ExtractionAttempt::rejected(self.field, strategy, locator, None, reason);
        self.record.provenance.push(match detail {
            Some(detail) => attempt.with_note(detail),
            None => attempt,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{docx_bytes, sample_candidate, xlsx_bytes, MockDetailLookup};
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn engine() -> CascadeEngine {
        CascadeEngine::new(ExtractionConfig::default()).unwrap()
    }

    fn sheet(rows: &[&[&str]]) -> SourceArtifact {
        SourceArtifact::sniff("http://x/planilha.xlsx", None, None, xlsx_bytes(rows)).unwrap()
    }

    #[test]
    fn test_first_validating_candidate_wins() {
        let candidate = sample_candidate();
        let artifacts = vec![sheet(&[
            &["Data do leilão:", "31/02/2026"],
            &["Data do leilão:", "12/03/2026"],
        ])];

        let record = engine().extract(&candidate, artifacts);

        assert_eq!(
            record.auction_date,
            FieldValue::Determined(NaiveDate::from_ymd_opt(2026, 3, 12).unwrap())
        );
        let attempts = record.provenance.attempts(FieldName::AuctionDate);
        let accepted: Vec<_> = attempts.iter().filter(|a| a.accepted).collect();
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].source, "http://x/planilha.xlsx#Sheet1!2");
        assert!(attempts
            .iter()
            .any(|a| a.rejection == Some(RejectionReason::Unparseable)));
        assert_eq!(attempts.last().map(|a| a.accepted), Some(true));
    }

    #[test]
    fn test_missing_sources_are_recorded() {
        let record = engine().extract(&sample_candidate(), vec![]);
        let attempts = record.provenance.attempts(FieldName::EstimatedValue);

        assert!(attempts
            .iter()
            .any(|a| a.strategy == StrategyKind::SpreadsheetPattern
                && a.rejection == Some(RejectionReason::NoSource)));
        assert_eq!(
            attempts.last().and_then(|a| a.rejection.clone()),
            Some(RejectionReason::DetailNotFetched)
        );
        assert_eq!(record.estimated_value, FieldValue::NotDetermined);
    }

    #[test]
    fn test_broker_name_keeps_original_casing() {
        let doc = SourceArtifact::sniff(
            "http://x/edital.docx",
            None,
            None,
            docx_bytes(&["Leiloeiro Oficial: JOÃO da Silva, matrícula JUCESP nº 123"]),
        )
        .unwrap();
        let record = engine().extract(&sample_candidate(), vec![doc]);
        assert_eq!(record.broker_name, FieldValue::Determined("JOÃO da Silva".into()));
    }

    #[test]
    fn test_broker_link_raw_and_valid() {
        let candidate = sample_candidate().with_description(
            "Informações: contato@leiloeira.com.br ou no site www.leiloeira-exemplo.com.br/lotes.",
        );
        let record = engine().extract(&candidate, vec![]);

        assert_eq!(
            record.broker_link_raw,
            FieldValue::Determined("contato@leiloeira.com.br".into())
        );
        assert_eq!(
            record.broker_link_valid,
            FieldValue::Determined("https://www.leiloeira-exemplo.com.br/lotes".into())
        );
        let attempts = record.provenance.attempts(FieldName::BrokerLink);
        assert!(attempts
            .iter()
            .any(|a| a.rejection == Some(RejectionReason::Url(crate::UrlRejection::EmailAddress))));
    }

    #[test]
    fn test_item_count_falls_back_to_lot_enumeration() {
        let artifacts = vec![sheet(&[
            &["Lote 1", "Veículo Gol"],
            &["Lote 2", "Veículo Uno"],
            &["Lote 17", "Sucata"],
        ])];
        let record = engine().extract(&sample_candidate(), artifacts);

        assert_eq!(record.item_count, FieldValue::Determined(17));
        let winner = record.provenance.accepted(FieldName::ItemCount).unwrap();
        assert_eq!(winner.note.as_deref(), Some("lot enumeration"));
    }

    #[test]
    fn test_tags_from_description_sorted() {
        let candidate = sample_candidate()
            .with_description("Leilão de veículos, sucatas e imóveis urbanos. Sucata de veículos.");
        let record = engine().extract(&candidate, vec![]);
        assert_eq!(
            record.tags,
            FieldValue::Determined(vec!["imoveis".into(), "sucatas".into(), "veiculos".into()])
        );
    }

    #[test]
    fn test_structured_metadata_keys() {
        let candidate = sample_candidate().with_listing_metadata(serde_json::json!({
            "valorTotalEstimado": 150000.5,
            "dataAberturaProposta": "2026-04-20T09:00:00"
        }));
        let record = engine().extract(&candidate, vec![]);

        assert_eq!(
            record.estimated_value,
            FieldValue::Determined(Decimal::new(1500005, 1))
        );
        assert_eq!(
            record.auction_date,
            FieldValue::Determined(NaiveDate::from_ymd_opt(2026, 4, 20).unwrap())
        );
        let winner = record.provenance.accepted(FieldName::AuctionDate).unwrap();
        assert_eq!(winner.strategy, StrategyKind::StructuredMetadata);
        assert_eq!(winner.source, "upstream:listing#dataAberturaProposta");
    }

    #[tokio::test]
    async fn test_lookup_only_when_needed() {
        let engine = engine();
        let detail = UpstreamDetail::new("http://pncp/detail")
            .with_entry("dataAberturaProposta", "2026-05-02T10:00:00")
            .with_entry("valorTotalEstimado", "98000,00")
            .with_entry("quantidadeItens", "12");
        let lookup = MockDetailLookup::returning(detail);

        let record = engine.extract_with_lookup(&sample_candidate(), vec![], &lookup).await;

        assert_eq!(lookup.call_count(), 1);
        assert_eq!(record.item_count, FieldValue::Determined(12));
        assert_eq!(
            record.provenance.accepted(FieldName::AuctionDate).map(|a| a.strategy),
            Some(StrategyKind::DetailLookup)
        );
    }

    #[tokio::test]
    async fn test_lookup_failure_keeps_first_result() {
        let lookup = MockDetailLookup::failing();
        let candidate = sample_candidate().with_description("Leilão em 12/03/2026, data do leilão: 12/03/2026");
        let record = engine().extract_with_lookup(&candidate, vec![], &lookup).await;

        assert_eq!(lookup.call_count(), 1);
        assert!(record.auction_date.is_determined());
        assert_eq!(record.estimated_value, FieldValue::NotDetermined);
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let mut config = ExtractionConfig::default();
        if let Some(rule) = config.fields.get_mut(&FieldName::AuctionDate) {
            rule.patterns.push("(unclosed".into());
        }
        assert!(matches!(
            CascadeEngine::new(config),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }
}
