//! Declarative configuration for scoring, extraction and URL validation.
//!
//! Everything here is data: term sets, per-field strategy orders, regex
//! sources and key lists. Components compile it once at construction
//! ([`crate::ScoringFilter::new`], [`crate::CascadeEngine::new`],
//! [`crate::UrlGate::new`]); reloading means building new components.
//!
//! Field patterns run against folded text (see [`crate::text`]), so they are
//! written lower-case and without diacritics. Capture group 1, when present,
//! is the candidate value; otherwise the whole match is.

use std::collections::BTreeMap;
use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::types::record::{FieldName, StrategyKind};

/// Top-level extraction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub scoring: ScoringConfig,
    pub url_gate: UrlGateConfig,
    /// Per-field strategy order, patterns and keys
    pub fields: BTreeMap<FieldName, FieldRule>,
    /// Largest `lote NN` number, used as an item count fallback
    pub lot_enumeration: String,
    pub tags: Vec<TagRule>,
    pub limits: ValidationLimits,
    pub artifacts: ArtifactLimits,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            scoring: ScoringConfig::default(),
            url_gate: UrlGateConfig::default(),
            fields: default_field_rules(),
            lot_enumeration: r"\blote(?: ?(?:n[o°º]?\.?|numero))? ?(\d{1,4})\b".to_string(),
            tags: default_tag_rules(),
            limits: ValidationLimits::default(),
            artifacts: ArtifactLimits::default(),
        }
    }
}

impl ExtractionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a JSON file. Missing sections fall back to the defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Semantic checks that serde cannot express.
    pub fn validate(&self) -> ConfigResult<()> {
        for (field, rule) in &self.fields {
            if rule.strategies.contains(&StrategyKind::Sanitizer) {
                return Err(ConfigError::Invalid(format!(
                    "sanitizer is not an extraction strategy (field {field})"
                )));
            }
        }
        if self.scoring.positive.iter().chain(&self.scoring.negative).any(|t| t.term.trim().is_empty())
            || self.scoring.hard_exclusions.iter().any(|t| t.trim().is_empty())
        {
            return Err(ConfigError::Invalid("empty scoring term".into()));
        }
        if self.limits.min_year > self.limits.max_year {
            return Err(ConfigError::Invalid("min_year exceeds max_year".into()));
        }
        Ok(())
    }

    /// Rule for a field; an unconfigured field has no strategies.
    pub fn field(&self, field: FieldName) -> Option<&FieldRule> {
        self.fields.get(&field)
    }

    pub fn with_scoring(mut self, scoring: ScoringConfig) -> Self {
        self.scoring = scoring;
        self
    }

    pub fn with_url_gate(mut self, url_gate: UrlGateConfig) -> Self {
        self.url_gate = url_gate;
        self
    }

    /// Replace the strategy order of one field.
    pub fn with_strategies(mut self, field: FieldName, strategies: Vec<StrategyKind>) -> Self {
        self.fields.entry(field).or_default().strategies = strategies;
        self
    }
}

/// Weighted relevance terms.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Inclusive acceptance threshold
    pub threshold: i32,
    pub positive: Vec<WeightedTerm>,
    pub negative: Vec<WeightedTerm>,
    /// Any of these rejects the record regardless of score
    pub hard_exclusions: Vec<String>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            threshold: 3,
            positive: weighted(&[
                ("leilao", 3),
                ("leiloes", 3),
                ("hasta publica", 3),
                ("alienacao de bens", 3),
                ("bens inserviveis", 3),
                ("alienacao", 2),
                ("inserviveis", 2),
                ("sucata", 2),
                ("sucatas", 2),
                ("arrematacao", 2),
                ("arrematante", 2),
                ("lance minimo", 2),
                ("venda de bens", 2),
                ("leiloeiro", 1),
                ("veiculos", 1),
                ("imoveis", 1),
            ]),
            negative: weighted(&[
                ("registro de precos", 4),
                ("pregao", 3),
                ("aquisicao", 3),
                ("contratacao de empresa", 3),
                ("prestacao de servicos", 3),
                ("fornecimento", 3),
                ("credenciamento", 3),
                ("locacao", 2),
                ("obras", 2),
            ]),
            hard_exclusions: vec![
                "credenciamento de leiloeiro".into(),
                "credenciamento de leiloeiros".into(),
                "contratacao de leiloeiro".into(),
                "selecao de leiloeiro".into(),
                "selecao de leiloeiros".into(),
            ],
        }
    }
}

impl ScoringConfig {
    pub fn with_threshold(mut self, threshold: i32) -> Self {
        self.threshold = threshold;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightedTerm {
    pub term: String,
    pub weight: i32,
}

impl WeightedTerm {
    pub fn new(term: impl Into<String>, weight: i32) -> Self {
        Self {
            term: term.into(),
            weight,
        }
    }
}

fn weighted(terms: &[(&str, i32)]) -> Vec<WeightedTerm> {
    terms
        .iter()
        .map(|(term, weight)| WeightedTerm::new(*term, *weight))
        .collect()
}

/// Domain lists for the URL gate. Entries match exactly or as a parent domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UrlGateConfig {
    pub blacklist: Vec<String>,
    /// Hosts accepted for any token shape
    pub whitelist: Vec<String>,
    /// Additional generic TLDs beyond the built-in list
    pub extra_tlds: Vec<String>,
}

impl Default for UrlGateConfig {
    fn default() -> Self {
        let blacklist = [
            "gmail.com",
            "googlemail.com",
            "hotmail.com",
            "hotmail.com.br",
            "outlook.com",
            "outlook.com.br",
            "live.com",
            "msn.com",
            "yahoo.com",
            "yahoo.com.br",
            "icloud.com",
            "bol.com.br",
            "uol.com.br",
            "terra.com.br",
            "ig.com.br",
            "globo.com",
            "gov.br",
            "jus.br",
            "leg.br",
            "mp.br",
            "google.com",
            "facebook.com",
            "instagram.com",
            "youtube.com",
            "wa.me",
            "whatsapp.com",
            "linkedin.com",
            "twitter.com",
            "x.com",
        ];
        Self {
            blacklist: blacklist.iter().map(|d| d.to_string()).collect(),
            whitelist: Vec::new(),
            extra_tlds: Vec::new(),
        }
    }
}

impl UrlGateConfig {
    pub fn with_whitelist(mut self, hosts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.whitelist = hosts.into_iter().map(|h| h.into()).collect();
        self
    }
}

/// How one field is looked for.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldRule {
    /// Strategies in cascade order
    pub strategies: Vec<StrategyKind>,
    /// Regex sources applied by the text strategies, in order
    pub patterns: Vec<String>,
    /// Keys read by the structured-metadata strategy
    pub metadata_keys: Vec<String>,
    /// Keys read from the upstream detail payload
    pub detail_keys: Vec<String>,
}

impl FieldRule {
    fn new(strategies: &[StrategyKind], patterns: &[&str], metadata: &[&str], detail: &[&str]) -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            strategies: strategies.to_vec(),
            patterns: owned(patterns),
            metadata_keys: owned(metadata),
            detail_keys: owned(detail),
        }
    }
}

/// Default cascade: structured, spreadsheet, word, pdf, description, detail.
const FULL_CASCADE: [StrategyKind; 6] = [
    StrategyKind::StructuredMetadata,
    StrategyKind::SpreadsheetPattern,
    StrategyKind::WordDocumentPattern,
    StrategyKind::PortableDocumentPattern,
    StrategyKind::DescriptionPattern,
    StrategyKind::DetailLookup,
];

const DATE: &str = r"(\d{1,2}[/.-]\d{1,2}[/.-]\d{2,4}|\d{4}-\d{2}-\d{2}|\d{1,2} de [a-z]+ de \d{4})";
const AMOUNT: &str = r"(\d[\d.,]*\d|\d)";

fn default_field_rules() -> BTreeMap<FieldName, FieldRule> {
    let date_patterns = [
        format!(r"(?:data|dia) (?:do|da|de) (?:leilao|sessao|hasta|realizacao|abertura)[^0-9]{{0,40}}?{DATE}"),
        format!(r"leilao (?:sera|vai ser) realizado[^0-9]{{0,40}}?{DATE}"),
        format!(r"(?:realizacao|abertura) (?:do leilao|da sessao|das propostas)[^0-9]{{0,40}}?{DATE}"),
    ];
    let value_patterns = [
        format!(r"(?:valor|preco|lance) (?:total |global )?(?:estimado|minimo|inicial|avaliado|de avaliacao|da avaliacao)[^0-9]{{0,40}}?{AMOUNT}"),
        format!(r"(?:avaliacao|avaliado em|avaliados em)[^0-9]{{0,30}}?r\$ ?{AMOUNT}"),
        format!(r"r\$ ?{AMOUNT}"),
    ];
    let date_refs: Vec<&str> = date_patterns.iter().map(String::as_str).collect();
    let value_refs: Vec<&str> = value_patterns.iter().map(String::as_str).collect();

    let mut rules = BTreeMap::new();
    rules.insert(
        FieldName::AuctionDate,
        FieldRule::new(
            &FULL_CASCADE,
            &date_refs,
            &["dataAberturaProposta", "dataLeilao", "data_leilao"],
            &["dataAberturaProposta"],
        ),
    );
    rules.insert(
        FieldName::EstimatedValue,
        FieldRule::new(
            &FULL_CASCADE,
            &value_refs,
            &["valorTotalEstimado", "valorEstimado", "valor_estimado"],
            &["valorTotalEstimado"],
        ),
    );
    rules.insert(
        FieldName::ItemCount,
        FieldRule::new(
            &FULL_CASCADE,
            &[
                r"(?:quantidade|qtd|numero|total) (?:de |total de )?(?:lotes|itens|bens)[^0-9]{0,20}?(\d{1,6})",
                r"\b(\d{1,6}) (?:lotes|itens)\b",
            ],
            &["quantidadeItens", "quantidadeLotes", "totalLotes"],
            &["quantidadeItens"],
        ),
    );
    rules.insert(
        FieldName::BrokerName,
        FieldRule::new(
            &FULL_CASCADE,
            &[
                r"leiloeir[oa](?: (?:publico|publica|oficial|designad[oa]|responsavel))*(?: (?:sr|sra|senhor|senhora|dr|dra)\.?)?(?: ?[:-] ?| )([a-z][a-z']*(?: [a-z][a-z']*){1,7})",
                r"nome do leiloeiro ?:? ?([a-z][a-z']*(?: [a-z][a-z']*){1,7})",
            ],
            &["leiloeiro", "nomeLeiloeiro", "leiloeiro.nome"],
            &["nomeLeiloeiro"],
        ),
    );
    rules.insert(
        FieldName::BrokerLink,
        FieldRule::new(
            &FULL_CASCADE,
            &[],
            &["siteLeiloeiro", "urlLeiloeiro", "linkSistemaOrigem"],
            &["linkSistemaOrigem"],
        ),
    );
    rules.insert(
        FieldName::Tags,
        FieldRule::new(
            &[
                StrategyKind::DescriptionPattern,
                StrategyKind::SpreadsheetPattern,
                StrategyKind::WordDocumentPattern,
                StrategyKind::PortableDocumentPattern,
            ],
            &[],
            &[],
            &[],
        ),
    );
    rules
}

/// A classification tag and the terms that imply it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRule {
    pub tag: String,
    pub terms: Vec<String>,
}

fn default_tag_rules() -> Vec<TagRule> {
    let rule = |tag: &str, terms: &[&str]| TagRule {
        tag: tag.to_string(),
        terms: terms.iter().map(|t| t.to_string()).collect(),
    };
    vec![
        rule(
            "veiculos",
            &["veiculo", "veiculos", "automovel", "automoveis", "motocicleta", "motocicletas", "caminhao", "onibus"],
        ),
        rule("imoveis", &["imovel", "imoveis", "terreno", "terrenos", "edificacao", "apartamento"]),
        rule("sucatas", &["sucata", "sucatas", "ferro velho"]),
        rule(
            "maquinas",
            &["maquina", "maquinas", "trator", "tratores", "retroescavadeira", "equipamentos"],
        ),
        rule("mobiliario", &["mobiliario", "moveis de escritorio", "cadeiras", "mesas", "armarios"]),
        rule(
            "informatica",
            &["informatica", "computador", "computadores", "notebook", "notebooks", "impressoras"],
        ),
        rule("semoventes", &["semovente", "semoventes", "bovinos", "equinos", "gado"]),
    ]
}

/// Plausibility bounds applied by the field validators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationLimits {
    pub min_year: i32,
    pub max_year: i32,
    /// Largest plausible estimated value, in BRL
    pub max_value: Decimal,
    pub max_item_count: u32,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            min_year: 2000,
            max_year: 2100,
            max_value: Decimal::new(100_000_000_000, 0),
            max_item_count: 10_000,
        }
    }
}

/// Bounds on archive expansion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactLimits {
    pub max_archive_depth: usize,
    pub max_entry_bytes: u64,
}

impl Default for ArtifactLimits {
    fn default() -> Self {
        Self {
            max_archive_depth: 3,
            max_entry_bytes: 64 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ExtractionConfig::default();
        config.validate().unwrap();
        for field in FieldName::ALL {
            assert!(config.field(field).is_some(), "missing rule for {field}");
        }
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = ExtractionConfig::from_json_str(
            r#"{"scoring": {"threshold": 5}, "url_gate": {"whitelist": ["leiloes.example.com"]}}"#,
        )
        .unwrap();
        assert_eq!(config.scoring.threshold, 5);
        assert!(!config.scoring.positive.is_empty());
        assert_eq!(config.url_gate.whitelist, vec!["leiloes.example.com"]);
        assert_eq!(config.limits.max_item_count, 10_000);
    }

    #[test]
    fn test_sanitizer_strategy_is_rejected() {
        let config = ExtractionConfig::default()
            .with_strategies(FieldName::BrokerLink, vec![StrategyKind::Sanitizer]);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = ExtractionConfig::from_json_file("/nonexistent/extraction.json");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
