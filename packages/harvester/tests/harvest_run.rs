//! Full harvest runs against a scripted upstream and the in-memory store.

use std::sync::Arc;

use auction_extraction::testing::{sample_candidate, MockDetailLookup};
use auction_extraction::{
    ArtifactRef, CandidateRecord, ExtractionConfig, FieldName, FieldValue, ScoringConfig,
};
use auction_harvester::storage::{CheckpointStore, RecordStore};
use auction_harvester::testing::{MockUpstream, MockUpstreamCall};
use auction_harvester::{
    DuplicatePolicy, HarvestConfig, HarvestError, HarvestWindow, Harvester, MemoryStore,
};
use chrono::{Duration, NaiveDate, TimeZone, Utc};

const EDITAL_CSV: &str = "Campo;Valor\nData do leilão;12/03/2026\nValor mínimo;R$ 15.300,00\n";

fn candidate(sequence: i64) -> CandidateRecord {
    let mut candidate = sample_candidate().with_purchase(2026, sequence);
    candidate.id = format!("00394460000141-1-{sequence:06}/2026");
    candidate
}

fn irrelevant() -> CandidateRecord {
    let mut candidate = candidate(900);
    candidate.title = "Pregão eletrônico para aquisição de material de expediente".into();
    candidate
}

fn edital(name: &str) -> ArtifactRef {
    ArtifactRef::new(format!("https://pncp.gov.br/arquivos/{name}"))
        .with_name(name)
        .with_declared_type("text/csv")
}

fn window() -> HarvestWindow {
    HarvestWindow::new(
        Utc.with_ymd_and_hms(2026, 2, 10, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2026, 2, 11, 0, 0, 0).unwrap(),
    )
}

fn harvester(config: HarvestConfig, upstream: MockUpstream, store: Arc<MemoryStore>) -> Harvester {
    Harvester::new(
        config,
        ExtractionConfig::default(),
        Arc::new(upstream),
        Arc::new(MockDetailLookup::failing()),
        store,
    )
    .unwrap()
}

fn single_modality() -> HarvestConfig {
    HarvestConfig::default().with_modalities(vec![1])
}

#[tokio::test]
async fn test_same_window_twice_is_idempotent() {
    let upstream = MockUpstream::new()
        .with_page(1, vec![candidate(1), candidate(2), irrelevant()])
        .with_file(&candidate(1).id, edital("1"), EDITAL_CSV.as_bytes().to_vec());
    let store = Arc::new(MemoryStore::new());
    let harvester = harvester(single_modality(), upstream.clone(), store.clone());

    let first = harvester.run_for_window(window()).await;
    assert!(first.completed);
    assert!(first.checkpoint_committed);
    assert_eq!(first.seen, 3);
    assert_eq!(first.kept, 2);
    assert_eq!(first.persisted, 2);
    assert_eq!(first.duplicates, 0);
    assert!(first.error.is_none());

    let second = harvester.run_for_window(window()).await;
    assert_eq!(second.persisted, 0);
    assert_eq!(second.duplicates, 2);
    assert_eq!(second.duplicate_rate, 1.0);

    assert_eq!(store.record_count(), 2);
    assert_eq!(store.blob_count(), 1);
    assert_eq!(store.runs().len(), 2);
    // Skipped duplicates are never downloaded again
    assert_eq!(upstream.download_count(), 1);

    let stored = store.get(&candidate(1).dedup_key()).await.unwrap().unwrap();
    assert_eq!(
        stored.record.auction_date,
        FieldValue::Determined(NaiveDate::from_ymd_opt(2026, 3, 12).unwrap())
    );
    assert_eq!(stored.artifact_hashes.len(), 1);

    let checkpoint = store.load_checkpoint().await.unwrap().unwrap();
    assert_eq!(checkpoint.last_window_end, window().end);
    assert_eq!(checkpoint.records_seen, 6);
    assert_eq!(checkpoint.duplicates, 2);
}

#[tokio::test]
async fn test_failed_modality_withholds_checkpoint() {
    let upstream = MockUpstream::new()
        .with_page(1, vec![candidate(1)])
        .failing_modality(13);
    let store = Arc::new(MemoryStore::new());
    let config = HarvestConfig::default().with_modalities(vec![1, 13]);

    let entry = harvester(config, upstream, store.clone()).run_for_window(window()).await;

    assert!(!entry.completed);
    assert!(!entry.checkpoint_committed);
    assert!(entry.error.as_deref().unwrap().contains("modality 13"));
    assert_eq!(entry.persisted, 1);
    assert_eq!(store.record_count(), 1);
    assert!(store.load_checkpoint().await.unwrap().is_none());
    assert_eq!(store.runs().len(), 1);
}

#[tokio::test]
async fn test_partial_checkpoint_when_configured() {
    let upstream = MockUpstream::new()
        .with_page(1, vec![candidate(1)])
        .failing_modality(13);
    let store = Arc::new(MemoryStore::new());
    let config = HarvestConfig::default()
        .with_modalities(vec![1, 13])
        .with_commit_partial_checkpoint(true);

    let entry = harvester(config, upstream, store.clone()).run_for_window(window()).await;

    assert!(!entry.completed);
    assert!(entry.checkpoint_committed);
    assert!(store.load_checkpoint().await.unwrap().is_some());
}

#[tokio::test]
async fn test_merge_policy_overwrites_in_place() {
    let upstream = MockUpstream::new().with_page(1, vec![candidate(1)]);
    let store = Arc::new(MemoryStore::new());
    let config = single_modality().with_duplicate_policy(DuplicatePolicy::Merge);
    let harvester = harvester(config, upstream, store.clone());

    harvester.run_for_window(window()).await;
    let second = harvester.run_for_window(window()).await;

    assert_eq!(second.persisted, 1);
    assert_eq!(second.duplicates, 1);
    assert_eq!(store.record_count(), 1);
    let stored = store.get(&candidate(1).dedup_key()).await.unwrap().unwrap();
    assert_eq!(stored.revision, 2);
}

#[tokio::test]
async fn test_repeat_within_window_counts_as_duplicate() {
    let upstream = MockUpstream::new()
        .with_page(1, vec![candidate(1)])
        .with_page(1, vec![candidate(1), candidate(2)]);
    let store = Arc::new(MemoryStore::new());

    let entry = harvester(single_modality(), upstream.clone(), store.clone())
        .run_for_window(window())
        .await;

    assert_eq!(entry.seen, 3);
    assert_eq!(entry.kept, 3);
    assert_eq!(entry.duplicates, 1);
    assert_eq!(entry.persisted, 2);
    assert_eq!(
        upstream
            .calls()
            .iter()
            .filter(|c| matches!(c, MockUpstreamCall::ListPage { .. }))
            .count(),
        2
    );
}

#[tokio::test]
async fn test_record_limit_stops_listing() {
    let upstream = MockUpstream::new()
        .with_page(1, vec![candidate(1), candidate(2)])
        .with_page(1, vec![candidate(3)]);
    let store = Arc::new(MemoryStore::new());
    let config = single_modality().with_record_limit(1);

    let entry = harvester(config, upstream, store.clone()).run_for_window(window()).await;

    assert_eq!(entry.seen, 1);
    assert_eq!(store.record_count(), 1);
    // Unlisted candidates remain, so the window must be harvested again
    assert!(!entry.completed);
    assert!(!entry.checkpoint_committed);
    assert!(entry.error.is_none());
    assert!(store.load_checkpoint().await.unwrap().is_none());
}

#[tokio::test]
async fn test_record_limit_commits_when_partial_checkpoints_allowed() {
    let upstream = MockUpstream::new().with_page(1, vec![candidate(1), candidate(2)]);
    let store = Arc::new(MemoryStore::new());
    let config = single_modality()
        .with_record_limit(1)
        .with_commit_partial_checkpoint(true);

    let entry = harvester(config, upstream, store.clone()).run_for_window(window()).await;

    assert!(!entry.completed);
    assert!(entry.checkpoint_committed);
    assert_eq!(
        store.load_checkpoint().await.unwrap().unwrap().last_window_end,
        window().end
    );
}

#[tokio::test]
async fn test_failed_download_is_skipped() {
    let upstream = MockUpstream::new()
        .with_page(1, vec![candidate(1)])
        .with_missing_file(&candidate(1).id, edital("gone"))
        .with_file(&candidate(1).id, edital("1"), EDITAL_CSV.as_bytes().to_vec());
    let store = Arc::new(MemoryStore::new());

    let entry = harvester(single_modality(), upstream, store.clone())
        .run_for_window(window())
        .await;

    assert_eq!(entry.persisted, 1);
    assert_eq!(entry.failures, 0);
    let stored = store.get(&candidate(1).dedup_key()).await.unwrap().unwrap();
    assert!(stored.record.is_determined(FieldName::EstimatedValue));
}

#[tokio::test]
async fn test_listed_attachments_skip_lookup_and_record_size() {
    let oversize = ArtifactRef::new("https://pncp.gov.br/arquivos/acervo.zip")
        .with_name("acervo.zip")
        .with_size(u64::MAX);
    let listed = candidate(1)
        .with_artifact(edital("1"))
        .with_artifact(oversize.clone());
    let upstream = MockUpstream::new()
        .with_page(1, vec![listed])
        .with_file(&candidate(1).id, edital("1"), EDITAL_CSV.as_bytes().to_vec())
        .with_file(&candidate(1).id, oversize.clone(), b"PK\x03\x04".to_vec());
    let store = Arc::new(MemoryStore::new());

    let entry = harvester(single_modality(), upstream.clone(), store.clone())
        .run_for_window(window())
        .await;
    assert_eq!(entry.persisted, 1);

    let calls = upstream.calls();
    assert!(!calls
        .iter()
        .any(|c| matches!(c, MockUpstreamCall::ListArtifacts { .. })));
    assert!(!calls.contains(&MockUpstreamCall::Download {
        locator: oversize.locator.clone()
    }));
    assert_eq!(upstream.download_count(), 1);

    let stored = store.get(&candidate(1).dedup_key()).await.unwrap().unwrap();
    assert!(stored.record.is_determined(FieldName::EstimatedValue));
    assert_eq!(stored.artifact_hashes.len(), 1);
    let artifacts = &stored.candidate.artifacts;
    assert_eq!(artifacts.len(), 2);
    assert_eq!(artifacts[0].size, Some(EDITAL_CSV.len() as u64));
    assert_eq!(artifacts[1].size, Some(u64::MAX));
}

#[tokio::test]
async fn test_attachments_listed_upstream_are_stored_with_size() {
    let upstream = MockUpstream::new()
        .with_page(1, vec![candidate(1)])
        .with_file(&candidate(1).id, edital("1"), EDITAL_CSV.as_bytes().to_vec());
    let store = Arc::new(MemoryStore::new());

    harvester(single_modality(), upstream.clone(), store.clone())
        .run_for_window(window())
        .await;

    assert!(upstream.calls().contains(&MockUpstreamCall::ListArtifacts {
        record_id: candidate(1).id
    }));
    let stored = store.get(&candidate(1).dedup_key()).await.unwrap().unwrap();
    assert_eq!(stored.candidate.artifacts.len(), 1);
    assert_eq!(stored.candidate.artifacts[0].locator, edital("1").locator);
    assert_eq!(stored.candidate.artifacts[0].size, Some(EDITAL_CSV.len() as u64));
}

fn published(sequence: i64, hours_after_start: i64) -> CandidateRecord {
    let mut candidate = candidate(sequence);
    candidate.published_at = window().start + Duration::hours(hours_after_start);
    candidate
}

async fn stored_keys(store: &MemoryStore) -> Vec<String> {
    let mut keys: Vec<String> = store
        .list(None)
        .await
        .unwrap()
        .iter()
        .map(|r| r.dedup_key().to_string())
        .collect();
    keys.sort();
    keys
}

#[tokio::test]
async fn test_overlapping_scheduled_runs_match_one_continuous_sweep() {
    let upstream = MockUpstream::new().with_page(
        1,
        vec![
            published(1, 1),
            published(2, 20),
            published(3, 30),
            published(4, 34),
            published(5, 40),
        ],
    );

    let scheduled = Arc::new(MemoryStore::new());
    let harvester_a = harvester(single_modality(), upstream.clone(), scheduled.clone());
    let first = harvester_a.run(window().end).await;
    let second = harvester_a.run(window().end + Duration::hours(12)).await;

    // The second window reaches back past the first checkpoint
    assert_eq!(second.window_start, window().start + Duration::hours(12));
    assert!(second.window_start < first.window_end);
    assert_eq!(first.persisted, 2);
    assert_eq!(second.seen, 3);
    assert_eq!(second.duplicates, 1);
    assert_eq!(second.persisted, 2);

    let continuous = Arc::new(MemoryStore::new());
    let sweep = harvester(single_modality(), upstream, continuous.clone())
        .run_for_window(HarvestWindow::new(
            window().start,
            window().end + Duration::hours(12),
        ))
        .await;
    assert_eq!(sweep.persisted, 4);

    assert_eq!(stored_keys(&scheduled).await, stored_keys(&continuous).await);
    assert_eq!(scheduled.record_count(), 4);
}

#[tokio::test]
async fn test_scheduled_runs_follow_the_checkpoint() {
    let upstream = MockUpstream::new().with_page(1, vec![candidate(1)]);
    let store = Arc::new(MemoryStore::new());
    let harvester = harvester(single_modality(), upstream, store.clone());
    let now = Utc.with_ymd_and_hms(2026, 2, 11, 6, 0, 0).unwrap();

    let first = harvester.run(now).await;
    assert_eq!(first.window_start, now - Duration::hours(24));
    assert_eq!(first.window_end, now);

    let later = now + Duration::hours(1);
    let second = harvester.run(later).await;
    assert_eq!(second.window_end, later);
    assert!(second.window_start <= first.window_end);

    let checkpoint = store.load_checkpoint().await.unwrap().unwrap();
    assert_eq!(checkpoint.last_window_end, later);
}

#[tokio::test]
async fn test_reload_swaps_scoring_threshold() {
    let upstream = MockUpstream::new().with_page(1, vec![candidate(1)]);
    let store = Arc::new(MemoryStore::new());
    let harvester = harvester(single_modality(), upstream, store.clone());

    let strict = ExtractionConfig::default().with_scoring(ScoringConfig::default().with_threshold(100));
    harvester.reload_extraction(strict).unwrap();
    assert_eq!(harvester.components().filter.threshold(), 100);

    let entry = harvester.run_for_window(window()).await;
    assert_eq!(entry.seen, 1);
    assert_eq!(entry.kept, 0);
    assert_eq!(store.record_count(), 0);
}

#[tokio::test]
async fn test_invalid_reload_keeps_current_components() {
    let store = Arc::new(MemoryStore::new());
    let harvester = harvester(single_modality(), MockUpstream::new(), store);

    let mut broken = ExtractionConfig::default().with_scoring(ScoringConfig::default().with_threshold(100));
    if let Some(rule) = broken.fields.get_mut(&FieldName::AuctionDate) {
        rule.patterns.push("(unclosed".into());
    }

    assert!(matches!(
        harvester.reload_extraction(broken),
        Err(HarvestError::Extraction(_))
    ));
    assert_eq!(harvester.components().filter.threshold(), 3);
}
