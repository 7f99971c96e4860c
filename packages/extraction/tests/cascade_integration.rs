//! End-to-end cascade behaviour over realistic attachment sets.

use auction_extraction::testing::{docx_bytes, sample_candidate, xlsx_bytes, zip_bytes, MockDetailLookup};
use auction_extraction::{
    CascadeEngine, ExtractionConfig, FieldName, FieldValue, NormalizedRecord, RejectionReason,
    SourceArtifact, StrategyKind, UpstreamDetail,
};
use chrono::NaiveDate;

fn engine() -> CascadeEngine {
    CascadeEngine::new(ExtractionConfig::default()).unwrap()
}

fn assert_monotonic(record: &NormalizedRecord) {
    for field in FieldName::ALL {
        let attempts = record.provenance.attempts(field);
        let accepted: Vec<usize> = attempts
            .iter()
            .enumerate()
            .filter(|(_, a)| a.accepted)
            .map(|(i, _)| i)
            .collect();

        if record.is_determined(field) {
            assert_eq!(accepted.len(), 1, "{field}: exactly one accepted attempt");
            assert_eq!(accepted[0], attempts.len() - 1, "{field}: nothing after the winner");
        } else {
            assert!(accepted.is_empty(), "{field}: undetermined but accepted");
        }
    }
}

#[test]
fn test_spreadsheet_auction_date() {
    let sheet = SourceArtifact::sniff(
        "https://pncp.gov.br/arquivos/1",
        Some("anexo".into()),
        Some("application/octet-stream".into()),
        xlsx_bytes(&[&["Data do leilão:", "12/03/2026"]]),
    )
    .unwrap();

    let record = engine().extract(&sample_candidate(), vec![sheet]);

    assert_eq!(
        record.auction_date,
        FieldValue::Determined(NaiveDate::from_ymd_opt(2026, 3, 12).unwrap())
    );
    assert_eq!(
        record.provenance.accepted(FieldName::AuctionDate).map(|a| a.strategy),
        Some(StrategyKind::SpreadsheetPattern)
    );
    assert_eq!(record.broker_link_valid, FieldValue::NotDetermined);
    assert_monotonic(&record);
}

#[test]
fn test_delimited_spreadsheet() {
    let csv = "Item;Descrição\nData do leilão;12/03/2026\nValor mínimo;R$ 15.300,00\n";
    let sheet = SourceArtifact::sniff("https://x/lotes", None, Some("text/csv".into()), csv.as_bytes().to_vec())
        .unwrap();

    let record = engine().extract(&sample_candidate(), vec![sheet]);

    assert_eq!(
        record.auction_date,
        FieldValue::Determined(NaiveDate::from_ymd_opt(2026, 3, 12).unwrap())
    );
    assert_eq!(
        record.estimated_value,
        FieldValue::Determined("15300.00".parse().unwrap())
    );
    assert_monotonic(&record);
}

#[test]
fn test_archive_members_are_read() {
    let doc = docx_bytes(&[
        "EDITAL DE LEILÃO Nº 4/2026",
        "Leiloeira Oficial: Ana Paula Ferreira, JUCEMG 987. Site: www.ferreira-leiloes.com.br",
    ]);
    let sheet = xlsx_bytes(&[&["Lote", "Bem"], &["Lote 1", "Trator"], &["Lote 2", "Veículo"]]);
    let archive = zip_bytes(&[("edital.docx", doc.as_slice()), ("anexos/lotes.xlsx", sheet.as_slice())]);
    let artifact =
        SourceArtifact::sniff("https://x/edital.zip", None, Some("application/zip".into()), archive).unwrap();

    let record = engine().extract(&sample_candidate(), vec![artifact]);

    assert_eq!(record.broker_name, FieldValue::Determined("Ana Paula Ferreira".into()));
    assert_eq!(
        record.broker_link_valid,
        FieldValue::Determined("https://www.ferreira-leiloes.com.br".into())
    );
    assert_eq!(record.item_count, FieldValue::Determined(2));
    assert_eq!(
        record.provenance.accepted(FieldName::ItemCount).map(|a| a.source.as_str()),
        Some("https://x/edital.zip!anexos/lotes.xlsx")
    );
    assert_monotonic(&record);
}

#[test]
fn test_unreadable_artifacts_are_reported() {
    let junk = zip_bytes(&[("dados.bin", [0x00u8, 0x01, 0x02].as_slice())]);
    let artifact = SourceArtifact::sniff("https://x/pacote.zip", None, None, junk).unwrap();

    let record = engine().extract(&sample_candidate(), vec![artifact]);

    assert_eq!(record.skipped_artifacts.len(), 1);
    assert_eq!(record.skipped_artifacts[0].locator, "https://x/pacote.zip!dados.bin");
    assert_monotonic(&record);
}

#[test]
fn test_blacklisted_link_kept_raw_only() {
    let candidate = sample_candidate()
        .with_description("Dúvidas: leiloes.prefeitura@gmail.com");
    let record = engine().extract(&candidate, vec![]);

    assert_eq!(
        record.broker_link_raw,
        FieldValue::Determined("leiloes.prefeitura@gmail.com".into())
    );
    assert_eq!(record.broker_link_valid, FieldValue::NotDetermined);
    assert!(record
        .provenance
        .attempts(FieldName::BrokerLink)
        .iter()
        .any(|a| matches!(a.rejection, Some(RejectionReason::Url(_)))));
    assert_monotonic(&record);
}

#[tokio::test]
async fn test_detail_lookup_fills_remaining_fields() {
    let doc = SourceArtifact::sniff(
        "https://x/edital.docx",
        None,
        None,
        docx_bytes(&["Data do leilão: 20/05/2026"]),
    )
    .unwrap();
    let detail = UpstreamDetail::from_json(
        "https://pncp.gov.br/api/consulta/v1/orgaos/00394460000141/compras/2026/123",
        &serde_json::json!({
            "dataAberturaProposta": "2026-05-21T10:00:00",
            "valorTotalEstimado": 45000.0,
            "linkSistemaOrigem": "https://www.leiloes-sul.com.br/evento/77"
        }),
    )
    .with_entry("quantidadeItens", "8");
    let lookup = MockDetailLookup::returning(detail);

    let record = engine().extract_with_lookup(&sample_candidate(), vec![doc], &lookup).await;

    assert_eq!(lookup.call_count(), 1);
    // The document wins over the later detail strategy.
    assert_eq!(
        record.auction_date,
        FieldValue::Determined(NaiveDate::from_ymd_opt(2026, 5, 20).unwrap())
    );
    assert_eq!(record.estimated_value, FieldValue::Determined("45000".parse().unwrap()));
    assert_eq!(record.item_count, FieldValue::Determined(8));
    assert_eq!(
        record.broker_link_valid,
        FieldValue::Determined("https://www.leiloes-sul.com.br/evento/77".into())
    );
    assert_monotonic(&record);
}
