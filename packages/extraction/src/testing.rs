//! Test fixtures and mock implementations.
//!
//! In-memory builders for the container formats the cascade reads, and a
//! scriptable [`DetailLookup`] with call tracking. Useful to applications
//! testing their own harvesting code without network access.

use std::io::{Cursor, Write};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use crate::cascade::{DetailLookup, UpstreamDetail};
use crate::error::LookupError;
use crate::types::candidate::CandidateRecord;

/// Zip container with the given members, in order.
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, bytes) in entries {
        writer.start_file(*name, options).expect("start zip entry");
        writer.write_all(bytes).expect("write zip entry");
    }
    writer.finish().expect("finish zip").into_inner()
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn column_name(mut index: usize) -> String {
    let mut name = Vec::new();
    loop {
        name.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    name.reverse();
    String::from_utf8_lossy(&name).into_owned()
}

/// Minimal single-sheet workbook ("Sheet1") with inline string cells.
pub fn xlsx_bytes(rows: &[&[&str]]) -> Vec<u8> {
    let mut sheet_rows = String::new();
    for (r, row) in rows.iter().enumerate() {
        sheet_rows.push_str(&format!(r#"<row r="{}">"#, r + 1));
        for (c, cell) in row.iter().enumerate() {
            sheet_rows.push_str(&format!(
                r#"<c r="{}{}" t="inlineStr"><is><t>{}</t></is></c>"#,
                column_name(c),
                r + 1,
                escape_xml(cell)
            ));
        }
        sheet_rows.push_str("</row>");
    }

    let content_types = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/></Types>"#;
    let root_rels = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;
    let workbook = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Sheet1" sheetId="1" r:id="rId1"/></sheets></workbook>"#;
    let workbook_rels = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#;
    let sheet = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>{sheet_rows}</sheetData></worksheet>"#
    );

    zip_bytes(&[
        ("[Content_Types].xml", content_types.as_bytes()),
        ("_rels/.rels", root_rels.as_bytes()),
        ("xl/workbook.xml", workbook.as_bytes()),
        ("xl/_rels/workbook.xml.rels", workbook_rels.as_bytes()),
        ("xl/worksheets/sheet1.xml", sheet.as_bytes()),
    ])
}

/// Minimal docx. Paragraph text is inserted as-is, so it may carry entities.
pub fn docx_bytes(paragraphs: &[&str]) -> Vec<u8> {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{p}</w:t></w:r></w:p>"))
        .collect();
    let document = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body}</w:body></w:document>"#
    );
    let content_types = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

    zip_bytes(&[
        ("[Content_Types].xml", content_types.as_bytes()),
        ("word/document.xml", document.as_bytes()),
    ])
}

/// A candidate with no listing metadata and no extractable values in its text.
pub fn sample_candidate() -> CandidateRecord {
    CandidateRecord::new(
        "00394460000141-1-000123/2026",
        "00.394.460/0001-41",
        "Leilão público de bens inservíveis",
        Utc.with_ymd_and_hms(2026, 2, 10, 12, 0, 0).unwrap(),
    )
    .with_organization_name("Prefeitura Municipal de Exemplo")
    .with_purchase(2026, 123)
}

/// Record of a call made to the mock lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockLookupCall {
    pub record_id: String,
}

/// Scriptable [`DetailLookup`].
#[derive(Clone, Default)]
pub struct MockDetailLookup {
    detail: Option<UpstreamDetail>,
    calls: Arc<RwLock<Vec<MockLookupCall>>>,
}

impl MockDetailLookup {
    /// Always answers with `detail`.
    pub fn returning(detail: UpstreamDetail) -> Self {
        Self {
            detail: Some(detail),
            ..Default::default()
        }
    }

    /// Always fails with an upstream error.
    pub fn failing() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<MockLookupCall> {
        self.calls.read().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }
}

#[async_trait]
impl DetailLookup for MockDetailLookup {
    async fn lookup(&self, candidate: &CandidateRecord) -> Result<UpstreamDetail, LookupError> {
        self.calls.write().unwrap().push(MockLookupCall {
            record_id: candidate.id.clone(),
        });
        self.detail
            .clone()
            .ok_or_else(|| LookupError::Upstream("mock lookup failure".into()))
    }
}
