//! Source artifacts: downloaded attachment bytes and their detected kind.
//!
//! The kind is decided from the bytes, never from the file name. The
//! declared content type only breaks ties the signature cannot settle
//! (OLE compound files, delimited text).

pub mod archive;
pub mod render;

use std::io::{Cursor, Read};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ArtifactError, ArtifactResult};

pub use archive::{expand, Expansion};
pub use render::{render, RenderedSource, Segment};

/// Closed set of artifact kinds the cascade can read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    StructuredMetadata,
    Spreadsheet,
    WordProcessingDocument,
    PortableDocument,
    Archive,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StructuredMetadata => "structured_metadata",
            Self::Spreadsheet => "spreadsheet",
            Self::WordProcessingDocument => "word_processing_document",
            Self::PortableDocument => "portable_document",
            Self::Archive => "archive",
        }
    }

    /// Detect the kind from a byte signature.
    ///
    /// Returns `None` when nothing matches; callers turn that into
    /// [`ArtifactError::UnrecognizedSignature`].
    pub fn sniff(bytes: &[u8], declared_type: Option<&str>) -> Option<Self> {
        let declared = declared_type.unwrap_or_default().to_ascii_lowercase();

        match bytes {
            [b'%', b'P', b'D', b'F', ..] => Some(Self::PortableDocument),
            [b'P', b'K', 0x03, 0x04, ..] | [b'P', b'K', 0x05, 0x06, ..] => Some(sniff_zip(bytes)),
            [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1, ..] => sniff_ole(bytes, &declared),
            [b'{', b'\\', b'r', b't', b'f', ..] => Some(Self::WordProcessingDocument),
            [b'R', b'a', b'r', b'!', ..]
            | [b'7', b'z', 0xBC, 0xAF, 0x27, 0x1C, ..]
            | [0x1F, 0x8B, ..] => Some(Self::Archive),
            _ => sniff_text(bytes, &declared),
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Zip containers: OOXML and ODF documents are told apart by their members.
fn sniff_zip(bytes: &[u8]) -> ArtifactKind {
    let Ok(mut archive) = zip::ZipArchive::new(Cursor::new(bytes)) else {
        return ArtifactKind::Archive;
    };

    let mut has_word = false;
    let mut has_workbook = false;
    for name in archive.file_names() {
        has_word |= name == "word/document.xml";
        has_workbook |= name == "xl/workbook.xml" || name == "xl/workbook.bin";
    }
    if has_word {
        return ArtifactKind::WordProcessingDocument;
    }
    if has_workbook {
        return ArtifactKind::Spreadsheet;
    }

    let mut mimetype = String::new();
    let read = archive
        .by_name("mimetype")
        .ok()
        .and_then(|entry| entry.take(256).read_to_string(&mut mimetype).ok());
    match read {
        Some(_) if mimetype.contains("opendocument.spreadsheet") => ArtifactKind::Spreadsheet,
        Some(_) if mimetype.contains("opendocument.text") => ArtifactKind::WordProcessingDocument,
        _ => ArtifactKind::Archive,
    }
}

/// Legacy OLE compound files: look for the stream names in the directory.
fn sniff_ole(bytes: &[u8], declared: &str) -> Option<ArtifactKind> {
    if contains_utf16(bytes, "WordDocument") {
        Some(ArtifactKind::WordProcessingDocument)
    } else if contains_utf16(bytes, "Workbook") || contains_utf16(bytes, "Book") {
        Some(ArtifactKind::Spreadsheet)
    } else if declared.contains("msword") || declared.contains("word") {
        Some(ArtifactKind::WordProcessingDocument)
    } else if declared.contains("excel") || declared.contains("sheet") {
        Some(ArtifactKind::Spreadsheet)
    } else {
        None
    }
}

fn contains_utf16(bytes: &[u8], needle: &str) -> bool {
    let encoded: Vec<u8> = needle.encode_utf16().flat_map(u16::to_le_bytes).collect();
    bytes.windows(encoded.len()).any(|window| window == encoded.as_slice())
}

/// Text payloads: JSON documents or delimited tables.
fn sniff_text(bytes: &[u8], declared: &str) -> Option<ArtifactKind> {
    let text = decode_text(bytes)?;
    let trimmed = text.trim_start();

    if (trimmed.starts_with('{') || trimmed.starts_with('['))
        && serde_json::from_str::<serde_json::Value>(trimmed).is_ok()
    {
        return Some(ArtifactKind::StructuredMetadata);
    }
    if declared.contains("csv") || declared.contains("comma-separated") {
        return Some(ArtifactKind::Spreadsheet);
    }
    render::detect_delimiter(&text).map(|_| ArtifactKind::Spreadsheet)
}

/// Decode text bytes: UTF-8 (BOM tolerated), else Latin-1 when free of
/// control bytes.
pub(crate) fn decode_text(bytes: &[u8]) -> Option<String> {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    if let Ok(text) = std::str::from_utf8(bytes) {
        return Some(text.to_string());
    }
    let latin1_ok = bytes
        .iter()
        .all(|b| *b >= 0x20 || matches!(b, b'\n' | b'\r' | b'\t'));
    latin1_ok.then(|| bytes.iter().map(|b| *b as char).collect())
}

/// A downloaded attachment with its detected kind.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceArtifact {
    pub locator: String,
    pub name: Option<String>,
    pub declared_type: Option<String>,
    pub kind: ArtifactKind,
    /// SHA-256 hex of `bytes`
    pub content_hash: String,
    pub bytes: Vec<u8>,
}

impl SourceArtifact {
    /// Detect the kind of downloaded bytes. Fails loudly on unknown signatures.
    pub fn sniff(
        locator: impl Into<String>,
        name: Option<String>,
        declared_type: Option<String>,
        bytes: Vec<u8>,
    ) -> ArtifactResult<Self> {
        let locator = locator.into();
        if bytes.is_empty() {
            return Err(ArtifactError::Empty { locator });
        }
        let kind = ArtifactKind::sniff(&bytes, declared_type.as_deref()).ok_or_else(|| {
            ArtifactError::UnrecognizedSignature {
                locator: locator.clone(),
                declared: declared_type.clone().unwrap_or_else(|| "none".into()),
            }
        })?;

        Ok(Self {
            locator,
            name,
            declared_type,
            kind,
            content_hash: content_hash(&bytes),
            bytes,
        })
    }

    /// A structured-metadata source built from an in-memory JSON value.
    pub fn structured(locator: impl Into<String>, value: &serde_json::Value) -> Self {
        let bytes = serde_json::to_vec(value).unwrap_or_default();
        Self {
            locator: locator.into(),
            name: None,
            declared_type: Some("application/json".into()),
            kind: ArtifactKind::StructuredMetadata,
            content_hash: content_hash(&bytes),
            bytes,
        }
    }
}

/// SHA-256 hex digest used to address artifact bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{docx_bytes, xlsx_bytes, zip_bytes};

    #[test]
    fn test_signature_beats_declared_type() {
        let xlsx = xlsx_bytes(&[&["Data do leilão:", "12/03/2026"]]);
        assert_eq!(
            ArtifactKind::sniff(&xlsx, Some("application/pdf")),
            Some(ArtifactKind::Spreadsheet)
        );

        let pdf = b"%PDF-1.7\n...".to_vec();
        assert_eq!(
            ArtifactKind::sniff(&pdf, Some("application/vnd.ms-excel")),
            Some(ArtifactKind::PortableDocument)
        );
    }

    #[test]
    fn test_zip_members_decide_container_kind() {
        assert_eq!(
            ArtifactKind::sniff(&docx_bytes(&["Edital"]), None),
            Some(ArtifactKind::WordProcessingDocument)
        );
        assert_eq!(
            ArtifactKind::sniff(&zip_bytes(&[("edital.txt", b"x".as_slice())]), None),
            Some(ArtifactKind::Archive)
        );
    }

    #[test]
    fn test_text_payloads() {
        assert_eq!(
            ArtifactKind::sniff(br#"{"dataAberturaProposta": "2026-03-12"}"#, None),
            Some(ArtifactKind::StructuredMetadata)
        );
        assert_eq!(
            ArtifactKind::sniff(b"lote;descricao;valor\n1;carro;1.500,00\n2;moto;800,00\n", None),
            Some(ArtifactKind::Spreadsheet)
        );
        assert_eq!(ArtifactKind::sniff(b"just some prose", Some("text/plain")), None);
    }

    #[test]
    fn test_ole_uses_declared_type_as_fallback() {
        let mut ole = vec![0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
        ole.extend_from_slice(&[0u8; 64]);
        assert_eq!(
            ArtifactKind::sniff(&ole, Some("application/msword")),
            Some(ArtifactKind::WordProcessingDocument)
        );
        assert_eq!(ArtifactKind::sniff(&ole, None), None);
    }

    #[test]
    fn test_unrecognized_signature_fails_loudly() {
        let err = SourceArtifact::sniff("http://x/a.pdf", None, Some("application/pdf".into()), vec![0x00, 0x01, 0x02])
            .unwrap_err();
        assert!(matches!(err, ArtifactError::UnrecognizedSignature { .. }));
        assert_eq!(err.locator(), "http://x/a.pdf");

        let err = SourceArtifact::sniff("http://x/empty", None, None, vec![]).unwrap_err();
        assert!(matches!(err, ArtifactError::Empty { .. }));
    }
}
