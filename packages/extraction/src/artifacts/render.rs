//! Rendering artifacts into normalized text segments and key/value entries.
//!
//! Every artifact is rendered once per record and shared by all fields.

use std::io::{Cursor, Read};

use calamine::{open_workbook_auto_from_rs, Data, DataType, Reader};

use super::{decode_text, ArtifactKind, SourceArtifact};
use crate::error::{ArtifactError, ArtifactResult};
use crate::text::NormalizedText;

/// A unit of matchable text: a spreadsheet row, a document body, a PDF.
#[derive(Debug, Clone)]
pub struct Segment {
    /// Position inside the artifact (`Sheet1!4` for a row), if meaningful
    pub anchor: Option<String>,
    pub text: NormalizedText,
}

impl Segment {
    fn new(anchor: Option<String>, text: &str) -> Self {
        Self {
            anchor,
            text: NormalizedText::new(text),
        }
    }
}

/// An artifact ready for the cascade strategies.
#[derive(Debug, Clone)]
pub struct RenderedSource {
    pub locator: String,
    pub kind: ArtifactKind,
    pub segments: Vec<Segment>,
    /// Flattened `dotted.key -> value` entries (structured metadata only)
    pub entries: Vec<(String, String)>,
}

impl RenderedSource {
    /// Locator of a segment, `#`-anchored when the segment has a position.
    pub fn segment_locator(&self, segment: &Segment) -> String {
        match &segment.anchor {
            Some(anchor) => format!("{}#{}", self.locator, anchor),
            None => self.locator.clone(),
        }
    }

    /// Key/value source from flattened entries (listing metadata, detail payloads).
    pub fn from_entries(
        locator: impl Into<String>,
        kind: ArtifactKind,
        entries: Vec<(String, String)>,
    ) -> Self {
        let body = entries
            .iter()
            .map(|(key, value)| format!("{key}: {value}"))
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            locator: locator.into(),
            kind,
            segments: vec![Segment::new(None, &body)],
            entries,
        }
    }
}

/// Render an artifact. Archives must be expanded first.
pub fn render(artifact: &SourceArtifact) -> ArtifactResult<RenderedSource> {
    let locator = artifact.locator.as_str();
    let segments = match artifact.kind {
        ArtifactKind::StructuredMetadata => {
            let value: serde_json::Value =
                serde_json::from_slice(&artifact.bytes).map_err(|source| ArtifactError::Json {
                    locator: locator.to_string(),
                    source,
                })?;
            return Ok(RenderedSource::from_entries(
                locator,
                ArtifactKind::StructuredMetadata,
                flatten_json(&value),
            ));
        }
        ArtifactKind::Spreadsheet => render_spreadsheet(locator, &artifact.bytes)?,
        ArtifactKind::WordProcessingDocument => render_document(locator, &artifact.bytes)?,
        ArtifactKind::PortableDocument => render_pdf(locator, &artifact.bytes)?,
        ArtifactKind::Archive => {
            return Err(ArtifactError::Archive {
                locator: locator.to_string(),
                reason: "archives are expanded, not rendered".into(),
            })
        }
    };

    Ok(RenderedSource {
        locator: locator.to_string(),
        kind: artifact.kind,
        segments,
        entries: Vec::new(),
    })
}

/// Flatten JSON into dotted keys. Array elements are keyed by index.
///
/// Fractional numbers are written with a decimal comma so the currency
/// validator cannot mistake `1234.567` for a grouped thousand.
pub fn flatten_json(value: &serde_json::Value) -> Vec<(String, String)> {
    fn walk(prefix: &str, value: &serde_json::Value, out: &mut Vec<(String, String)>) {
        let join = |key: &str| {
            if prefix.is_empty() {
                key.to_string()
            } else {
                format!("{prefix}.{key}")
            }
        };
        match value {
            serde_json::Value::Object(map) => {
                for (key, child) in map {
                    walk(&join(key), child, out);
                }
            }
            serde_json::Value::Array(items) => {
                for (index, child) in items.iter().enumerate() {
                    walk(&join(&index.to_string()), child, out);
                }
            }
            serde_json::Value::String(text) => {
                if !text.trim().is_empty() {
                    out.push((prefix.to_string(), text.clone()));
                }
            }
            serde_json::Value::Number(number) => {
                let text = if number.is_f64() {
                    number.to_string().replace('.', ",")
                } else {
                    number.to_string()
                };
                out.push((prefix.to_string(), text));
            }
            serde_json::Value::Bool(flag) => out.push((prefix.to_string(), flag.to_string())),
            serde_json::Value::Null => {}
        }
    }

    let mut out = Vec::new();
    walk("", value, &mut out);
    out
}

fn render_spreadsheet(locator: &str, bytes: &[u8]) -> ArtifactResult<Vec<Segment>> {
    let is_container = bytes.starts_with(b"PK") || bytes.starts_with(&[0xD0, 0xCF, 0x11, 0xE0]);
    if !is_container {
        return render_delimited(locator, bytes);
    }

    let spreadsheet_error = |reason: String| ArtifactError::Spreadsheet {
        locator: locator.to_string(),
        reason,
    };

    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| spreadsheet_error(e.to_string()))?;

    let mut segments = Vec::new();
    for sheet in workbook.sheet_names() {
        let range = workbook
            .worksheet_range(&sheet)
            .map_err(|e| spreadsheet_error(format!("{sheet}: {e}")))?;
        let first_row = range.start().map(|(row, _)| row).unwrap_or(0);

        for (offset, row) in range.rows().enumerate() {
            let cells: Vec<String> = row.iter().filter_map(cell_text).collect();
            if cells.is_empty() {
                continue;
            }
            let anchor = format!("{sheet}!{}", first_row as usize + offset + 1);
            segments.push(Segment::new(Some(anchor), &cells.join(" ")));
        }
    }
    Ok(segments)
}

/// Cell rendered as the text a reader would see. Dates come out as dd/mm/yyyy.
fn cell_text(cell: &Data) -> Option<String> {
    let text = match cell {
        Data::Empty | Data::Error(_) => return None,
        Data::String(text) => text.trim().to_string(),
        Data::Int(value) => value.to_string(),
        Data::Float(value) if value.fract() == 0.0 && value.abs() < 1e15 => {
            format!("{}", *value as i64)
        }
        Data::Float(value) => value.to_string().replace('.', ","),
        Data::DateTime(_) | Data::DateTimeIso(_) => match cell.as_date() {
            Some(date) => date.format("%d/%m/%Y").to_string(),
            None => cell.to_string(),
        },
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

/// Pick the delimiter used consistently across the first lines, if any.
pub(crate) fn detect_delimiter(text: &str) -> Option<char> {
    let lines: Vec<&str> = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .take(20)
        .collect();
    if lines.len() < 2 {
        return None;
    }

    [';', '\t', ',', '|'].into_iter().find(|delimiter| {
        let first = split_row(lines[0], *delimiter).len();
        first > 1 && lines.iter().all(|line| split_row(line, *delimiter).len() == first)
    })
}

/// Quote-aware split of one delimited line.
fn split_row(line: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            c if c == delimiter && !quoted => fields.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    fields.push(current);
    fields
}

fn render_delimited(locator: &str, bytes: &[u8]) -> ArtifactResult<Vec<Segment>> {
    let text = decode_text(bytes).ok_or_else(|| ArtifactError::Spreadsheet {
        locator: locator.to_string(),
        reason: "delimited text is not valid text".into(),
    })?;
    let delimiter = detect_delimiter(&text).unwrap_or(';');

    Ok(text
        .lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let cells: Vec<String> = split_row(line, delimiter)
                .into_iter()
                .map(|cell| cell.trim().to_string())
                .filter(|cell| !cell.is_empty())
                .collect();
            (!cells.is_empty()).then(|| Segment::new(Some(format!("row{}", index + 1)), &cells.join(" ")))
        })
        .collect())
}

fn render_document(locator: &str, bytes: &[u8]) -> ArtifactResult<Vec<Segment>> {
    let document_error = |reason: String| ArtifactError::Document {
        locator: locator.to_string(),
        reason,
    };

    let text = if bytes.starts_with(b"PK") {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| document_error(e.to_string()))?;
        let member = ["word/document.xml", "content.xml"]
            .into_iter()
            .find(|name| archive.file_names().any(|n| n == *name))
            .ok_or_else(|| document_error("no document body".into()))?;

        let mut xml = String::new();
        archive
            .by_name(member)
            .map_err(|e| document_error(e.to_string()))?
            .read_to_string(&mut xml)
            .map_err(|e| document_error(e.to_string()))?;
        xml_text(&xml)
    } else if bytes.starts_with(b"{\\rtf") {
        rtf_text(&String::from_utf8_lossy(bytes))
    } else {
        legacy_doc_text(bytes)
    };

    if text.trim().is_empty() {
        return Err(document_error("no text content".into()));
    }
    Ok(vec![Segment::new(None, &text)])
}

/// Text content of OOXML/ODF markup. Paragraph, break and tab elements
/// become whitespace.
fn xml_text(xml: &str) -> String {
    let mut out = String::with_capacity(xml.len() / 4);
    let mut rest = xml;

    while let Some(open) = rest.find('<') {
        out.push_str(&decode_entities(&rest[..open]));
        let Some(close) = rest[open..].find('>') else {
            break;
        };
        let tag = &rest[open + 1..open + close];
        let name = tag
            .trim_start_matches('/')
            .split(|c: char| c.is_whitespace() || c == '/')
            .next()
            .unwrap_or_default();
        let local = name.rsplit(':').next().unwrap_or(name);
        match local {
            "p" | "h" | "br" | "cr" | "line-break" if tag.starts_with('/') || tag.ends_with('/') => {
                out.push('\n')
            }
            "tab" | "s" => out.push(' '),
            _ => {}
        }
        rest = &rest[open + close + 1..];
    }
    out.push_str(&decode_entities(rest));
    out
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let Some(semi) = tail.find(';').filter(|i| *i <= 10) else {
            out.push('&');
            rest = &tail[1..];
            continue;
        };
        let entity = &tail[1..semi];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(ch) => {
                out.push(ch);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Plain text of an RTF document: control words dropped, `\par` as newline,
/// `\'hh` escapes read as Latin-1. Font, color, style and info tables are
/// skipped entirely.
fn rtf_text(rtf: &str) -> String {
    const SKIPPED_GROUPS: [&str; 5] = ["\\fonttbl", "\\colortbl", "\\stylesheet", "\\info", "\\*"];

    let chars: Vec<char> = rtf.chars().collect();
    let mut out = String::new();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '{' => {
                let ahead: String = chars[i + 1..].iter().take(12).collect();
                if SKIPPED_GROUPS.iter().any(|group| ahead.starts_with(group)) {
                    let mut depth = 0usize;
                    while i < chars.len() {
                        match chars[i] {
                            '{' => depth += 1,
                            '}' => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            '\\' => i += 1,
                            _ => {}
                        }
                        i += 1;
                    }
                }
                i += 1;
            }
            '}' | '\r' | '\n' => i += 1,
            '\\' => {
                i += 1;
                match chars.get(i).copied() {
                    Some('\'') => {
                        let hex: String = chars[i + 1..].iter().take(2).collect();
                        if let Ok(byte) = u8::from_str_radix(&hex, 16) {
                            out.push(byte as char);
                        }
                        i += 1 + hex.chars().count();
                    }
                    Some(c) if c.is_ascii_alphabetic() => {
                        let start = i;
                        while chars.get(i).is_some_and(char::is_ascii_alphabetic) {
                            i += 1;
                        }
                        let word: String = chars[start..i].iter().collect();
                        while chars.get(i).is_some_and(|c| c.is_ascii_digit() || *c == '-') {
                            i += 1;
                        }
                        if chars.get(i) == Some(&' ') {
                            i += 1;
                        }
                        match word.as_str() {
                            "par" | "line" => out.push('\n'),
                            "tab" => out.push(' '),
                            _ => {}
                        }
                    }
                    Some(c) => {
                        out.push(c);
                        i += 1;
                    }
                    None => {}
                }
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// Best-effort text of a legacy binary `.doc`: printable runs in both
/// 8-bit and UTF-16LE encodings.
fn legacy_doc_text(bytes: &[u8]) -> String {
    const MIN_RUN: usize = 8;
    let printable = |c: char| c.is_alphanumeric() || c.is_ascii_punctuation() || c == ' ' || c == 'º';

    let mut runs: Vec<String> = Vec::new();
    let mut push_run = |run: &mut String| {
        if run.chars().count() >= MIN_RUN {
            runs.push(std::mem::take(run));
        } else {
            run.clear();
        }
    };

    let mut run = String::new();
    for unit in bytes.chunks_exact(2).map(|pair| u16::from_le_bytes([pair[0], pair[1]])) {
        match char::from_u32(u32::from(unit)).filter(|c| printable(*c)) {
            Some(c) => run.push(c),
            None => push_run(&mut run),
        }
    }
    push_run(&mut run);

    for byte in bytes {
        let c = *byte as char;
        if *byte >= 0x20 && printable(c) {
            run.push(c);
        } else {
            push_run(&mut run);
        }
    }
    push_run(&mut run);

    runs.join("\n")
}

fn render_pdf(locator: &str, bytes: &[u8]) -> ArtifactResult<Vec<Segment>> {
    let pdf_error = |reason: String| ArtifactError::Pdf {
        locator: locator.to_string(),
        reason,
    };

    let text = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes))
        .map_err(|_| pdf_error("text extraction panicked".into()))?
        .map_err(|e| pdf_error(e.to_string()))?;

    if text.trim().is_empty() {
        return Err(pdf_error("no text layer".into()));
    }
    Ok(text
        .split('\x0c')
        .enumerate()
        .filter(|(_, page)| !page.trim().is_empty())
        .map(|(index, page)| Segment::new(Some(format!("p{}", index + 1)), page))
        .collect())
}
