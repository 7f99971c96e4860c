//! Field validators: parse candidate text into typed values.
//!
//! A [`Rejection`] is not an error. It tells the cascade to move on to the
//! next candidate, and its reason is recorded in provenance.

use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::text::fold;
use crate::types::config::ValidationLimits;
use crate::types::record::RejectionReason;

/// Why a candidate value was not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub reason: RejectionReason,
    pub detail: String,
}

impl Rejection {
    pub fn new(reason: RejectionReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }

    fn unparseable(detail: impl Into<String>) -> Self {
        Self::new(RejectionReason::Unparseable, detail)
    }

    fn out_of_range(detail: impl Into<String>) -> Self {
        Self::new(RejectionReason::OutOfRange, detail)
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.reason, self.detail)
    }
}

pub type Validated<T> = std::result::Result<T, Rejection>;

lazy_static! {
    static ref ISO_DATE: Regex = Regex::new(r"(?:^|\D)(\d{4})-(\d{1,2})-(\d{1,2})(?:\D|$)").unwrap();
    static ref NUMERIC_DATE: Regex =
        Regex::new(r"(?:^|\D)(\d{1,2})[/.-](\d{1,2})[/.-](\d{4}|\d{2})(?:\D|$)").unwrap();
    static ref LONG_DATE: Regex = Regex::new(r"(\d{1,2})º? de ([a-z]+) de (\d{4})").unwrap();
    static ref AMOUNT: Regex = Regex::new(r"(-\s*)?(\d[\d.,]*)").unwrap();
    static ref COUNT: Regex = Regex::new(r"\d{1,3}(?:\.\d{3})+|\d+").unwrap();
}

const MONTHS: [&str; 12] = [
    "janeiro",
    "fevereiro",
    "marco",
    "abril",
    "maio",
    "junho",
    "julho",
    "agosto",
    "setembro",
    "outubro",
    "novembro",
    "dezembro",
];

/// Parse an auction date.
///
/// Accepts `dd/mm/yyyy` (also `-` and `.` separators, two-digit years as
/// 20yy), ISO `yyyy-mm-dd` with an optional time, and the Portuguese long
/// form `12 de março de 2026`.
pub fn parse_date(text: &str, limits: &ValidationLimits) -> Validated<NaiveDate> {
    let folded = fold(text);

    let (year, month, day) = if let Some(caps) = ISO_DATE.captures(&folded) {
        (number(&caps[1])?, number(&caps[2])?, number(&caps[3])?)
    } else if let Some(caps) = NUMERIC_DATE.captures(&folded) {
        let year_text = &caps[3];
        let mut year = number(year_text)?;
        if year_text.len() == 2 {
            year += 2000;
        }
        (year, number(&caps[2])?, number(&caps[1])?)
    } else if let Some(caps) = LONG_DATE.captures(&folded) {
        let month = MONTHS
            .iter()
            .position(|name| *name == &caps[2])
            .ok_or_else(|| Rejection::unparseable(format!("unknown month '{}'", &caps[2])))?;
        (number(&caps[3])?, month as i64 + 1, number(&caps[1])?)
    } else {
        return Err(Rejection::unparseable(format!("no date in '{text}'")));
    };

    let date = i32::try_from(year)
        .ok()
        .zip(u32::try_from(month).ok())
        .zip(u32::try_from(day).ok())
        .and_then(|((y, m), d)| NaiveDate::from_ymd_opt(y, m, d))
        .ok_or_else(|| {
            Rejection::unparseable(format!("impossible date {day:02}/{month:02}/{year}"))
        })?;

    if date.year() < limits.min_year || date.year() > limits.max_year {
        return Err(Rejection::out_of_range(format!(
            "year {} outside {}..={}",
            date.year(),
            limits.min_year,
            limits.max_year
        )));
    }
    Ok(date)
}

fn number(digits: &str) -> Validated<i64> {
    digits
        .parse::<i64>()
        .map_err(|_| Rejection::unparseable(format!("not a number: '{digits}'")))
}

/// Parse a BRL amount such as `R$ 1.234.567,89`, `1234567.89` or `1.500`.
///
/// With both separators present the last one is the decimal mark. With only
/// dots, a single dot followed by exactly three digits groups thousands.
/// A lone comma is the decimal mark.
pub fn parse_currency(text: &str, limits: &ValidationLimits) -> Validated<Decimal> {
    let caps = AMOUNT
        .captures(text)
        .ok_or_else(|| Rejection::unparseable(format!("no amount in '{text}'")))?;
    let negative = caps.get(1).is_some();
    let token = caps[2].trim_end_matches(['.', ',']);

    let last_dot = token.rfind('.');
    let last_comma = token.rfind(',');
    let decimal_mark = match (last_dot, last_comma) {
        (Some(dot), Some(comma)) => Some(if dot > comma { '.' } else { ',' }),
        (None, Some(_)) => (token.matches(',').count() == 1).then_some(','),
        (Some(dot), None) => {
            let fraction = token.len() - dot - 1;
            (token.matches('.').count() == 1 && fraction != 3).then_some('.')
        }
        (None, None) => None,
    };

    let mut normalized = String::with_capacity(token.len());
    for ch in token.chars() {
        match ch {
            '0'..='9' => normalized.push(ch),
            c if Some(c) == decimal_mark => normalized.push('.'),
            _ => {}
        }
    }

    let value = Decimal::from_str(&normalized)
        .map_err(|e| Rejection::unparseable(format!("'{token}': {e}")))?;

    if negative || value <= Decimal::ZERO {
        return Err(Rejection::out_of_range(format!("non-positive amount '{text}'")));
    }
    if value > limits.max_value {
        return Err(Rejection::out_of_range(format!(
            "amount {value} above {}",
            limits.max_value
        )));
    }
    Ok(value)
}

/// Parse a lot/item count: the first integer, within `1..=max_item_count`.
pub fn parse_count(text: &str, limits: &ValidationLimits) -> Validated<u32> {
    let token = COUNT
        .find(text)
        .ok_or_else(|| Rejection::unparseable(format!("no count in '{text}'")))?
        .as_str()
        .replace('.', "");
    let count: u64 = token
        .parse()
        .map_err(|_| Rejection::unparseable(format!("not a count: '{token}'")))?;

    match u32::try_from(count) {
        Ok(count) if (1..=limits.max_item_count).contains(&count) => Ok(count),
        _ => Err(Rejection::out_of_range(format!(
            "count {count} outside 1..={}",
            limits.max_item_count
        ))),
    }
}

const MAX_BROKER_NAME_CHARS: usize = 120;

/// Words after which a captured name continues with registration details.
const NAME_TERMINATORS: &[&str] = &[
    "matricula", "inscrito", "inscrita", "cpf", "cnpj", "registrado", "registrada",
    "devidamente", "credenciado", "credenciada", "nomeado", "nomeada", "com", "sob",
    "telefone", "tel", "email", "site", "no", "na", "residente", "portador", "portadora",
];

/// Words that mark a role, an institution or a sentence rather than a person.
const GENERIC_WORDS: &[&str] = &[
    "leiloeiro", "leiloeira", "leiloeiros", "oficial", "publico", "publica", "prefeitura",
    "municipio", "municipal", "secretaria", "comissao", "edital", "leilao", "pregoeiro",
    "designado", "designada", "responsavel", "definir", "informado", "empresa", "contratada",
    "para", "que", "sera", "conforme", "realizacao", "orgao", "previsto", "vencedor",
];

/// Name particles that cannot stand alone as a word of the name.
const PARTICLES: &[&str] = &["da", "de", "do", "das", "dos", "e", "d'"];

/// Validate a broker's personal name, keeping its original casing.
pub fn parse_broker_name(text: &str) -> Validated<String> {
    let mut words: Vec<&str> = Vec::new();
    for word in text.split_whitespace() {
        let bare = word.trim_matches(|c: char| !c.is_alphanumeric());
        if NAME_TERMINATORS.contains(&fold(bare).as_str()) {
            break;
        }
        words.push(word);
        if word.ends_with([',', ';', '(', ')']) {
            break;
        }
    }

    let name = words
        .join(" ")
        .trim_matches(|c: char| !c.is_alphabetic())
        .to_string();

    if name.is_empty() {
        return Err(Rejection::unparseable("empty name"));
    }
    if name.chars().count() > MAX_BROKER_NAME_CHARS {
        return Err(Rejection::out_of_range(format!(
            "name longer than {MAX_BROKER_NAME_CHARS} characters"
        )));
    }
    if name.chars().any(|c| c.is_ascii_digit()) {
        return Err(Rejection::unparseable(format!("digits in name '{name}'")));
    }

    let folded = fold(&name);
    let folded_words: Vec<&str> = folded.split(' ').collect();
    if folded_words.iter().any(|w| GENERIC_WORDS.contains(w)) {
        return Err(Rejection::new(
            RejectionReason::GenericName,
            format!("'{name}' is a role, not a name"),
        ));
    }
    if folded_words.first().is_some_and(|w| PARTICLES.contains(w)) {
        return Err(Rejection::unparseable(format!("'{name}' starts with a particle")));
    }
    let name_words = folded_words
        .iter()
        .filter(|w| !PARTICLES.contains(*w) && w.chars().filter(|c| c.is_alphabetic()).count() >= 2)
        .count();
    if name_words < 2 {
        return Err(Rejection::unparseable(format!("'{name}' has fewer than two name words")));
    }

    Ok(name)
}

/// Structural class of a URL-like token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlShape {
    /// Has an http(s) scheme or a `www.` prefix
    Explicit,
    /// `local@host`
    Email,
    /// A host with neither scheme nor `www.`
    BareHost,
}

/// Classify an already-trimmed token.
pub fn url_shape(token: &str) -> UrlShape {
    let lower = token.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("www.") {
        UrlShape::Explicit
    } else if lower.contains('@') {
        UrlShape::Email
    } else {
        UrlShape::BareHost
    }
}
