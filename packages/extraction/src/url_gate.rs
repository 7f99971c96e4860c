//! URL validation gate for broker links.
//!
//! Text extraction produces plenty of URL-looking garbage: e-mail hosts,
//! sentence fragments joined by a missing space (`ED.COMEMORA`), webmail and
//! government portals. A token becomes a broker link only if it survives:
//!
//! 1. token normalization (quotes, trailing punctuation, `mailto:`)
//! 2. structural check of the host (labels, known TLD, no IP literal)
//! 3. domain blacklist
//! 4. optional whitelist, which accepts any shape
//! 5. shape decision: only explicit URLs (scheme or `www.`) are accepted

use std::collections::BTreeSet;
use std::net::IpAddr;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::{Host, Url};

use crate::error::{ConfigError, ConfigResult};
use crate::text::NormalizedText;
use crate::types::config::UrlGateConfig;
use crate::validators::{url_shape, UrlShape};

/// Generic TLDs recognized besides any two-letter country code.
const GENERIC_TLDS: &[&str] = &[
    "com", "net", "org", "info", "biz", "io", "app", "online", "site", "store", "shop", "tech",
    "digital", "website", "br", "gov", "edu",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlRejection {
    Empty,
    Malformed,
    /// Final label is a TLD glued to the next word (`ed.comemora`)
    FusedTld,
    UnrecognizedHost,
    IpAddress,
    Blacklisted,
    EmailAddress,
    MissingScheme,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum UrlVerdict {
    Accepted { normalized: String, via_whitelist: bool },
    Rejected { reason: UrlRejection },
}

impl UrlVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    pub fn normalized(&self) -> Option<&str> {
        match self {
            Self::Accepted { normalized, .. } => Some(normalized),
            Self::Rejected { .. } => None,
        }
    }

    fn rejected(reason: UrlRejection) -> Self {
        Self::Rejected { reason }
    }
}

/// Compiled gate. Cheap to share behind an `Arc`.
#[derive(Debug, Clone)]
pub struct UrlGate {
    blacklist: Vec<String>,
    whitelist: Vec<String>,
    tlds: BTreeSet<String>,
    candidates: Regex,
}

impl UrlGate {
    pub fn new(config: &UrlGateConfig) -> ConfigResult<Self> {
        let normalize = |domains: &[String]| -> Vec<String> {
            domains
                .iter()
                .map(|d| d.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|d| !d.is_empty())
                .collect()
        };

        let mut tlds: BTreeSet<String> = GENERIC_TLDS.iter().map(|t| t.to_string()).collect();
        for extra in &config.extra_tlds {
            let extra = extra.trim().trim_start_matches('.').to_ascii_lowercase();
            if extra.is_empty() || !extra.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(ConfigError::Invalid(format!("invalid TLD '{extra}'")));
            }
            tlds.insert(extra);
        }

        Ok(Self {
            blacklist: normalize(&config.blacklist),
            whitelist: normalize(&config.whitelist),
            candidates: candidate_pattern(&tlds)?,
            tlds,
        })
    }

    /// Run a raw token through the gate.
    pub fn validate_url(&self, raw: &str) -> UrlVerdict {
        let token = normalize_token(raw);
        if token.is_empty() {
            return UrlVerdict::rejected(UrlRejection::Empty);
        }

        let shape = url_shape(token);
        let (host, explicit) = match shape {
            UrlShape::Explicit => match parse_explicit(token) {
                Ok(parsed) => parsed,
                Err(reason) => return UrlVerdict::rejected(reason),
            },
            UrlShape::Email => match token.rsplit_once('@') {
                Some((local, host)) if !local.is_empty() => (host.to_ascii_lowercase(), None),
                _ => return UrlVerdict::rejected(UrlRejection::Malformed),
            },
            UrlShape::BareHost => {
                let end = token.find(['/', '?', '#', ':']).unwrap_or(token.len());
                (token[..end].to_ascii_lowercase(), None)
            }
        };

        if let Err(reason) = self.check_host(&host) {
            return UrlVerdict::rejected(reason);
        }
        if matches_domain(&host, &self.blacklist) {
            return UrlVerdict::rejected(UrlRejection::Blacklisted);
        }
        if matches_domain(&host, &self.whitelist) {
            return UrlVerdict::Accepted {
                normalized: explicit.unwrap_or_else(|| format!("https://{host}")),
                via_whitelist: true,
            };
        }

        match (shape, explicit) {
            (UrlShape::Explicit, Some(normalized)) => UrlVerdict::Accepted {
                normalized,
                via_whitelist: false,
            },
            (UrlShape::Email, _) => UrlVerdict::rejected(UrlRejection::EmailAddress),
            _ => UrlVerdict::rejected(UrlRejection::MissingScheme),
        }
    }

    /// URL-like tokens in a text, in order of appearance, with original casing.
    pub fn find_candidates(&self, text: &NormalizedText) -> Vec<String> {
        self.candidates
            .find_iter(text.as_str())
            .map(|m| normalize_token(text.original_span(m.range())).to_string())
            .filter(|token| !token.is_empty())
            .collect()
    }

    fn check_host(&self, host: &str) -> Result<(), UrlRejection> {
        let host = host.trim_end_matches('.');
        if host.parse::<IpAddr>().is_ok() {
            return Err(UrlRejection::IpAddress);
        }

        let labels: Vec<&str> = host.split('.').collect();
        if labels.len() < 2 {
            return Err(UrlRejection::UnrecognizedHost);
        }
        for label in &labels {
            let valid = (1..=63).contains(&label.len())
                && label
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
                && !label.starts_with('-')
                && !label.ends_with('-');
            if !valid {
                return Err(UrlRejection::Malformed);
            }
        }

        let tld = labels[labels.len() - 1];
        if self.tlds.contains(tld) || (tld.len() == 2 && tld.chars().all(|c| c.is_ascii_lowercase())) {
            return Ok(());
        }
        let fused = self.tlds.iter().any(|known| {
            tld.len() > known.len()
                && tld.starts_with(known.as_str())
                && tld[known.len()..].chars().all(|c| c.is_ascii_lowercase())
        });
        if fused {
            Err(UrlRejection::FusedTld)
        } else {
            Err(UrlRejection::UnrecognizedHost)
        }
    }
}

/// Strip surrounding quotes and punctuation, and a leading `mailto:`.
pub fn normalize_token(raw: &str) -> &str {
    const LEADING: &[char] = &['"', '\'', '(', '[', '{', '<', '.', ',', ';', ':', '“', '‘', '«'];
    const TRAILING: &[char] = &['.', ',', ';', ':', '!', '?', '"', '\'', '”', '’', '»'];

    let mut token = raw.trim().trim_start_matches(LEADING);
    if token.get(..7).is_some_and(|prefix| prefix.eq_ignore_ascii_case("mailto:")) {
        token = &token[7..];
    }

    loop {
        let trimmed = token.trim_end_matches(TRAILING);
        let trimmed = match trimmed.chars().last() {
            Some(closer @ (')' | ']' | '}' | '>')) => {
                let opener = match closer {
                    ')' => '(',
                    ']' => '[',
                    '}' => '{',
                    _ => '<',
                };
                if trimmed.matches(opener).count() < trimmed.matches(closer).count() {
                    &trimmed[..trimmed.len() - 1]
                } else {
                    trimmed
                }
            }
            _ => trimmed,
        };
        if trimmed.len() == token.len() {
            return trimmed.trim();
        }
        token = trimmed;
    }
}

/// Parse a scheme or `www.` token; returns (host, normalized URL).
fn parse_explicit(token: &str) -> Result<(String, Option<String>), UrlRejection> {
    let with_scheme = if token.to_ascii_lowercase().starts_with("www.") {
        format!("https://{token}")
    } else {
        token.to_string()
    };
    let url = Url::parse(&with_scheme).map_err(|_| UrlRejection::Malformed)?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(UrlRejection::Malformed);
    }

    let host = match url.host() {
        Some(Host::Domain(domain)) => domain.to_ascii_lowercase(),
        Some(Host::Ipv4(_)) | Some(Host::Ipv6(_)) => return Err(UrlRejection::IpAddress),
        None => return Err(UrlRejection::Malformed),
    };

    let mut normalized = url.to_string();
    if url.path() == "/" && url.query().is_none() && url.fragment().is_none() {
        normalized.pop();
    }
    Ok((host, Some(normalized)))
}

fn matches_domain(host: &str, domains: &[String]) -> bool {
    domains.iter().any(|domain| {
        host == domain
            || host
                .strip_suffix(domain.as_str())
                .is_some_and(|prefix| prefix.ends_with('.'))
    })
}

/// Regex over folded text finding explicit URLs, e-mail addresses and bare
/// hosts whose last label starts with a known TLD.
fn candidate_pattern(tlds: &BTreeSet<String>) -> ConfigResult<Regex> {
    let mut sorted: Vec<&str> = tlds.iter().map(String::as_str).collect();
    sorted.sort_by_key(|t| std::cmp::Reverse(t.len()));
    let alternatives = sorted
        .iter()
        .map(|t| regex::escape(t))
        .collect::<Vec<_>>()
        .join("|");

    let label = r"[a-z0-9](?:[a-z0-9-]*[a-z0-9])?";
    let source = format!(
        r#"(?:https?://|www\.)[^\s<>"'()\[\]{{}}]+|[a-z0-9._%+-]+@{label}(?:\.{label})+|\b{label}(?:\.{label})*\.(?:{alternatives})[a-z]*\b(?:/[^\s<>"']*)?"#
    );
    Regex::new(&source).map_err(|source| ConfigError::InvalidPattern {
        field: "url candidates".into(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> UrlGate {
        UrlGate::new(&UrlGateConfig::default()).unwrap()
    }

    fn rejection(verdict: UrlVerdict) -> UrlRejection {
        match verdict {
            UrlVerdict::Rejected { reason } => reason,
            UrlVerdict::Accepted { normalized, .. } => panic!("unexpectedly accepted {normalized}"),
        }
    }

    #[test]
    fn test_fused_tld_is_rejected() {
        assert_eq!(rejection(gate().validate_url("...ED.COMEMORA")), UrlRejection::FusedTld);
        assert_eq!(rejection(gate().validate_url("www.ed.comemora")), UrlRejection::FusedTld);
    }

    #[test]
    fn test_www_host_is_accepted_and_normalized() {
        let verdict = gate().validate_url("www.Example-Leiloes.com.br.");
        assert_eq!(
            verdict,
            UrlVerdict::Accepted {
                normalized: "https://www.example-leiloes.com.br".into(),
                via_whitelist: false,
            }
        );
    }

    #[test]
    fn test_explicit_url_keeps_path() {
        let verdict = gate().validate_url("(http://leiloes.example.com.br/lotes?id=3)");
        assert_eq!(
            verdict.normalized(),
            Some("http://leiloes.example.com.br/lotes?id=3")
        );
    }

    #[test]
    fn test_email_hosts() {
        assert_eq!(rejection(gate().validate_url("contact@gmail.com")), UrlRejection::Blacklisted);
        assert_eq!(
            rejection(gate().validate_url("mailto:contato@leiloes.com.br")),
            UrlRejection::EmailAddress
        );
    }

    #[test]
    fn test_blacklist_matches_subdomains() {
        assert_eq!(
            rejection(gate().validate_url("https://www.prefeitura.sp.gov.br")),
            UrlRejection::Blacklisted
        );
        assert!(gate().validate_url("https://notgov.br.example.com").is_accepted());
    }

    #[test]
    fn test_other_rejections() {
        assert_eq!(rejection(gate().validate_url("  ")), UrlRejection::Empty);
        assert_eq!(rejection(gate().validate_url("http://192.168.0.1/x")), UrlRejection::IpAddress);
        assert_eq!(rejection(gate().validate_url("leiloes.com.br")), UrlRejection::MissingScheme);
        assert_eq!(rejection(gate().validate_url("www.leiloes")), UrlRejection::UnrecognizedHost);
        assert_eq!(rejection(gate().validate_url("www.-bad-.com")), UrlRejection::Malformed);
    }

    #[test]
    fn test_whitelist_accepts_any_shape() {
        let config = UrlGateConfig::default().with_whitelist(["leiloes.com.br"]);
        let gate = UrlGate::new(&config).unwrap();
        assert_eq!(
            gate.validate_url("leiloes.com.br"),
            UrlVerdict::Accepted {
                normalized: "https://leiloes.com.br".into(),
                via_whitelist: true,
            }
        );
        assert!(gate.validate_url("contato@sub.leiloes.com.br").is_accepted());
    }

    #[test]
    fn test_find_candidates_in_text() {
        let text = NormalizedText::new(
            "Contato: JOAO@Leiloes.com.br. Acesse WWW.Leiloes.com.br, ou veja ...ED.COMEMORA hoje.",
        );
        let found = gate().find_candidates(&text);
        assert_eq!(
            found,
            vec!["JOAO@Leiloes.com.br", "WWW.Leiloes.com.br", "ED.COMEMORA"]
        );
    }
}
