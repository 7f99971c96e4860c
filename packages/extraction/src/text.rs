//! Text normalization shared by the scoring filter and the cascade.
//!
//! Matching runs on folded text: diacritics stripped (NFD, combining marks
//! dropped), lower-cased, and every whitespace run collapsed into a single
//! space so that patterns tolerate line breaks inserted mid-phrase.
//!
//! [`NormalizedText`] keeps a byte-offset map back to the original so that a
//! match found in folded text can be read back with its original casing.

use std::ops::Range;

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Fold a string for matching (no offset map).
pub fn fold(input: &str) -> String {
    NormalizedText::new(input).text
}

/// Word-bounded regex source for a term, matched against folded text.
///
/// Words of a multi-word term may be separated by any whitespace.
pub fn term_pattern(term: &str) -> String {
    let words: Vec<String> = fold(term).split(' ').map(regex::escape).collect();
    format!(r"\b{}\b", words.join(r"\s+"))
}

/// Fold a single character into zero or more matching characters.
fn fold_char(ch: char) -> impl Iterator<Item = char> {
    std::iter::once(ch)
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
}

/// Folded text plus the mapping back to its source.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedText {
    text: String,
    /// Byte offset in `original` for every byte of `text`.
    origin: Vec<usize>,
    original: String,
}

impl NormalizedText {
    pub fn new(original: &str) -> Self {
        let mut text = String::with_capacity(original.len());
        let mut origin = Vec::with_capacity(original.len());
        let mut pending_space: Option<usize> = None;

        for (offset, ch) in original.char_indices() {
            if ch.is_whitespace() || ch.is_control() {
                if !text.is_empty() && pending_space.is_none() {
                    pending_space = Some(offset);
                }
                continue;
            }

            if let Some(space_offset) = pending_space.take() {
                text.push(' ');
                origin.push(space_offset);
            }

            for folded in fold_char(ch) {
                let start = text.len();
                text.push(folded);
                origin.extend(std::iter::repeat(offset).take(text.len() - start));
            }
        }

        Self {
            text,
            origin,
            original: original.to_string(),
        }
    }

    /// The folded text patterns are matched against.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// The text as it was before folding.
    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Original text covering a byte range of the folded text.
    pub fn original_span(&self, range: Range<usize>) -> &str {
        if range.start >= range.end || range.end > self.origin.len() {
            return "";
        }
        let start = self.origin[range.start];
        let last = self.origin[range.end - 1];
        let end = last
            + self.original[last..]
                .chars()
                .next()
                .map(char::len_utf8)
                .unwrap_or(0);
        &self.original[start..end]
    }
}
