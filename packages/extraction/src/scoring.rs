//! Weighted keyword relevance filter.
//!
//! Decides whether an announcement is an auction of goods before anything
//! is downloaded for it. Terms are compiled once from [`ScoringConfig`].

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::text::{fold, term_pattern};
use crate::types::config::ScoringConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    Positive,
    Negative,
}

/// A configured term found in the scored text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedTerm {
    pub term: String,
    pub weight: i32,
    pub polarity: Polarity,
}

/// Full scoring decision for one text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreOutcome {
    pub score: i32,
    pub matched: Vec<MatchedTerm>,
    /// First hard-exclusion term present, if any
    pub hard_exclusion: Option<String>,
    pub threshold: i32,
    pub accepted: bool,
}

#[derive(Debug, Clone)]
struct CompiledTerm {
    term: String,
    weight: i32,
    polarity: Polarity,
    pattern: Regex,
}

/// Compiled relevance filter.
#[derive(Debug, Clone)]
pub struct ScoringFilter {
    terms: Vec<CompiledTerm>,
    exclusions: Vec<(String, Regex)>,
    threshold: i32,
}

impl ScoringFilter {
    pub fn new(config: &ScoringConfig) -> ConfigResult<Self> {
        let mut terms = Vec::with_capacity(config.positive.len() + config.negative.len());
        let weighted = config
            .positive
            .iter()
            .map(|t| (t, Polarity::Positive))
            .chain(config.negative.iter().map(|t| (t, Polarity::Negative)));

        for (term, polarity) in weighted {
            terms.push(CompiledTerm {
                term: term.term.clone(),
                weight: term.weight,
                polarity,
                pattern: compile(&term.term)?,
            });
        }

        let exclusions = config
            .hard_exclusions
            .iter()
            .map(|term| Ok((term.clone(), compile(term)?)))
            .collect::<ConfigResult<Vec<_>>>()?;

        Ok(Self {
            terms,
            exclusions,
            threshold: config.threshold,
        })
    }

    /// Net score and the terms that contributed to it.
    ///
    /// Each term counts at most once however often it occurs.
    pub fn score(&self, text: &str) -> (i32, Vec<MatchedTerm>) {
        self.score_folded(&fold(text))
    }

    fn score_folded(&self, folded: &str) -> (i32, Vec<MatchedTerm>) {
        let mut score = 0;
        let mut matched = Vec::new();
        for term in &self.terms {
            if term.pattern.is_match(folded) {
                score += match term.polarity {
                    Polarity::Positive => term.weight,
                    Polarity::Negative => -term.weight,
                };
                matched.push(MatchedTerm {
                    term: term.term.clone(),
                    weight: term.weight,
                    polarity: term.polarity,
                });
            }
        }
        (score, matched)
    }

    /// Accept iff the score reaches the threshold and no hard exclusion is present.
    pub fn evaluate(&self, text: &str) -> ScoreOutcome {
        let folded = fold(text);
        let (score, matched) = self.score_folded(&folded);
        let hard_exclusion = self
            .exclusions
            .iter()
            .find(|(_, pattern)| pattern.is_match(&folded))
            .map(|(term, _)| term.clone());

        ScoreOutcome {
            score,
            matched,
            accepted: hard_exclusion.is_none() && score >= self.threshold,
            hard_exclusion,
            threshold: self.threshold,
        }
    }

    pub fn threshold(&self) -> i32 {
        self.threshold
    }
}

fn compile(term: &str) -> ConfigResult<Regex> {
    if term.trim().is_empty() {
        return Err(ConfigError::Invalid("empty scoring term".into()));
    }
    Regex::new(&term_pattern(term)).map_err(|source| ConfigError::InvalidPattern {
        field: format!("scoring term '{term}'"),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::config::WeightedTerm;
    use proptest::prelude::*;

    fn config() -> ScoringConfig {
        ScoringConfig {
            threshold: 3,
            positive: vec![WeightedTerm::new("leilão", 3), WeightedTerm::new("sucata", 2)],
            negative: vec![WeightedTerm::new("pregão", 3)],
            hard_exclusions: vec!["credenciamento de leiloeiros".into()],
        }
    }

    #[test]
    fn test_score_is_accent_and_case_insensitive() {
        let filter = ScoringFilter::new(&config()).unwrap();
        let (score, matched) = filter.score("LEILAO de SUCATA, leilão de sucata");
        assert_eq!(score, 5);
        assert_eq!(matched.len(), 2);
    }

    #[test]
    fn test_negative_terms_subtract() {
        let filter = ScoringFilter::new(&config()).unwrap();
        let outcome = filter.evaluate("Pregão eletrônico para leilão");
        assert_eq!(outcome.score, 0);
        assert!(!outcome.accepted);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let filter = ScoringFilter::new(&config()).unwrap();
        let outcome = filter.evaluate("Leilão de bens móveis");
        assert_eq!(outcome.score, 3);
        assert!(outcome.accepted);
    }

    #[test]
    fn test_hard_exclusion_beats_score() {
        let filter = ScoringFilter::new(&config()).unwrap();
        let outcome = filter.evaluate("Leilão de sucata - credenciamento de\nleiloeiros");
        assert!(outcome.score >= 3);
        assert!(!outcome.accepted);
        assert_eq!(outcome.hard_exclusion.as_deref(), Some("credenciamento de leiloeiros"));
    }

    #[test]
    fn test_word_boundaries() {
        let filter = ScoringFilter::new(&config()).unwrap();
        assert_eq!(filter.score("leiloeiro").0, 0);
        assert_eq!(filter.score("sucatas").0, 0);
    }

    #[test]
    fn test_empty_term_is_config_error() {
        let mut config = config();
        config.positive.push(WeightedTerm::new("  ", 1));
        assert!(ScoringFilter::new(&config).is_err());
    }

    #[test]
    fn test_default_terms_compile() {
        let filter = ScoringFilter::new(&ScoringConfig::default()).unwrap();
        assert!(filter.evaluate("Leilão público de veículos inservíveis").accepted);
        assert!(!filter.evaluate("Registro de preços para aquisição de pneus").accepted);
        assert!(!filter.evaluate("Credenciamento de leiloeiros oficiais para leilão").accepted);
    }

    proptest! {
        #[test]
        fn prop_threshold_decides_without_exclusion(threshold in -10i32..10, leilao in any::<bool>(), sucata in any::<bool>(), pregao in any::<bool>()) {
            let config = ScoringConfig { threshold, ..config() };
            let filter = ScoringFilter::new(&config).unwrap();

            let mut words = vec!["edital"];
            if leilao { words.push("leilao"); }
            if sucata { words.push("sucata"); }
            if pregao { words.push("pregao"); }
            let text = words.join(" ");

            let expected = 3 * leilao as i32 + 2 * sucata as i32 - 3 * pregao as i32;
            let outcome = filter.evaluate(&text);
            prop_assert_eq!(outcome.score, expected);
            prop_assert_eq!(outcome.accepted, expected >= threshold);
        }
    }
}
