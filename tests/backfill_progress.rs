// tests/backfill_progress.rs
use std::sync::Arc;

use chrono::{DateTime, Utc};
use forem_ingest::ingest::backfill::BackfillController;
use forem_ingest::ingest::cursor::{BackfillCursor, CursorStore, CURSOR_KEY};
use forem_ingest::ingest::providers::fixture::{epoch_record, FixtureSource};
use forem_ingest::storage::memory::MemoryBlobStore;
use forem_ingest::IngestError;

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
}

fn epoch_pages(pages: &[&[i64]]) -> Vec<Vec<serde_json::Value>> {
    pages
        .iter()
        .map(|p| p.iter().copied().map(epoch_record).collect())
        .collect()
}

/// Every record id across all batch blobs, sorted, duplicates kept.
fn written_ids(store: &MemoryBlobStore) -> Vec<i64> {
    let mut ids: Vec<i64> = store
        .batch_keys()
        .iter()
        .flat_map(|k| {
            store
                .read_json(k)
                .unwrap()
                .as_array()
                .unwrap()
                .iter()
                .map(|v| v["id"].as_i64().unwrap())
                .collect::<Vec<_>>()
        })
        .collect();
    ids.sort_unstable();
    ids
}

fn three_pages() -> Arc<FixtureSource> {
    Arc::new(FixtureSource::from_epochs(&[
        &[900, 850, 800],
        &[700, 650],
        &[500, 450, 400],
    ]))
}

#[tokio::test]
async fn one_page_per_invocation_makes_forward_progress() {
    let source = three_pages();
    let store = Arc::new(MemoryBlobStore::new());
    let ctl = BackfillController::new(source.clone(), store.clone());
    let cursors = CursorStore::new(store.clone());

    for (run, expected_next) in [(1i64, 2u32), (2, 3), (3, 4)] {
        let out = ctl.run_at(at(run), 1).await.unwrap();
        assert_eq!(out.pages_written, 1, "run {run}");
        assert!(out.halted.is_none());
        assert!(!out.is_complete());
        let stored = cursors.read().await.unwrap().unwrap();
        assert_eq!(stored.page, expected_next);
        assert_eq!(stored, out.cursor);
    }
    assert_eq!(store.batch_keys().len(), 3);
    assert_eq!(
        cursors.read().await.unwrap().unwrap().oldest_timestamp,
        Some(at(400))
    );

    // 4th run reaches the empty page and marks completion
    let out = ctl.run_at(at(4), 1).await.unwrap();
    assert_eq!(out.pages_written, 0);
    assert!(out.is_complete());
    assert!(cursors.read().await.unwrap().unwrap().complete);
    assert_eq!(store.batch_keys().len(), 3);

    // and stays done without touching the source again
    let calls_before = source.calls().len();
    let out = ctl.run_at(at(5), 10).await.unwrap();
    assert_eq!(out.pages_written, 0);
    assert!(out.is_complete());
    assert_eq!(source.calls().len(), calls_before);
    assert_eq!(source.calls(), vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn each_page_is_its_own_blob() {
    let source = three_pages();
    let store = Arc::new(MemoryBlobStore::new());
    let out = BackfillController::new(source, store.clone())
        .run_at(at(100), 10)
        .await
        .unwrap();

    assert_eq!(out.pages_written, 3);
    assert_eq!(out.articles_written, 8);
    assert!(out.is_complete());
    assert_eq!(out.keys.len(), 3);
    for (i, key) in out.keys.iter().enumerate() {
        assert!(key.contains(&format!("backfill_page={}_", i + 1)), "{key}");
        assert!(store.read_json(key).unwrap().is_array());
    }
}

#[tokio::test]
async fn failed_page_write_keeps_earlier_progress_and_is_retried() {
    let source = three_pages();
    let store = Arc::new(MemoryBlobStore::new());
    let ctl = BackfillController::new(source.clone(), store.clone());

    store.fail_writes_when(|k| k.contains("backfill_page=2_"));
    let out = ctl.run_at(at(1), 3).await.unwrap();
    assert_eq!(out.pages_written, 1);
    assert!(matches!(out.halted, Some(IngestError::StorageWrite { .. })));
    assert_eq!(out.cursor.page, 2);
    assert_eq!(
        store.read_json(CURSOR_KEY).unwrap()["page"],
        2,
        "cursor must reflect only page 1"
    );
    assert_eq!(store.batch_keys().len(), 1);

    store.clear_failures();
    let out = ctl.run_at(at(2), 1).await.unwrap();
    assert_eq!(out.pages_written, 1);
    assert!(out.keys[0].contains("backfill_page=2_"));
    assert_eq!(source.calls(), vec![1, 2, 2]);
    assert_eq!(CursorStore::new(store.clone()).read().await.unwrap().unwrap().page, 3);
}

#[tokio::test]
async fn failed_page_fetch_stops_sweep_without_losing_progress() {
    let source = three_pages();
    source.fail_page(3);
    let store = Arc::new(MemoryBlobStore::new());
    let ctl = BackfillController::new(source.clone(), store.clone());

    let out = ctl.run_at(at(1), 5).await.unwrap();
    assert_eq!(out.pages_written, 2);
    assert!(matches!(out.halted, Some(IngestError::SourceUnavailable(_))));
    assert!(!out.is_complete(), "a failed fetch must not look like the end");
    assert_eq!(out.cursor, CursorStore::new(store.clone()).read().await.unwrap().unwrap());
    assert_eq!(out.cursor.page, 3);

    source.heal();
    let out = ctl.run_at(at(2), 5).await.unwrap();
    assert_eq!(out.pages_written, 1);
    assert!(out.is_complete());
    assert_eq!(store.batch_keys().len(), 3);
}

#[tokio::test]
async fn cursor_write_failure_rewrites_page_next_time() {
    let source = three_pages();
    let store = Arc::new(MemoryBlobStore::new());
    let ctl = BackfillController::new(source.clone(), store.clone());

    store.fail_writes_when(|k| k == CURSOR_KEY);
    let out = ctl.run_at(at(1), 2).await.unwrap();
    assert_eq!(out.pages_written, 1);
    assert!(matches!(out.halted, Some(IngestError::StorageWrite { .. })));
    assert_eq!(out.cursor, BackfillCursor::start(1));

    store.clear_failures();
    let out = ctl.run_at(at(2), 1).await.unwrap();
    assert!(out.keys[0].contains("backfill_page=1_"));
    // overlapping copy of page 1 under a new key, nothing skipped
    assert_eq!(store.batch_keys().len(), 2);
}

#[tokio::test]
async fn shifted_listing_does_not_rewrite_earlier_records() {
    let source = Arc::new(FixtureSource::from_epochs(&[&[90, 80], &[70, 60], &[50, 40]]));
    let store = Arc::new(MemoryBlobStore::new());
    let ctl = BackfillController::new(source.clone(), store.clone());

    let out = ctl.run_at(at(1), 1).await.unwrap();
    assert_eq!(out.cursor.page, 2);
    assert_eq!(out.cursor.oldest_timestamp, Some(at(80)));

    // a new article lands on top; 80 slides down onto page 2
    source.set_pages(epoch_pages(&[&[100, 90], &[80, 70], &[60, 50], &[40]]));
    let out = ctl.run_at(at(2), 10).await.unwrap();
    assert!(out.is_complete());
    assert!(out.halted.is_none());
    assert_eq!(out.articles_written, 4);

    assert_eq!(written_ids(&store), vec![40, 50, 60, 70, 80, 90]);
}

#[tokio::test]
async fn fully_shifted_page_advances_without_blob() {
    let source = Arc::new(FixtureSource::from_epochs(&[&[90, 80], &[70, 60]]));
    let store = Arc::new(MemoryBlobStore::new());
    let ctl = BackfillController::new(source.clone(), store.clone());
    ctl.run_at(at(1), 1).await.unwrap();

    // two new articles push the whole first page onto page 2
    source.set_pages(epoch_pages(&[&[110, 100], &[90, 80], &[70, 60]]));
    let out = ctl.run_at(at(2), 1).await.unwrap();
    assert_eq!(out.pages_written, 0);
    assert_eq!(out.cursor.page, 3);
    assert_eq!(out.cursor.oldest_timestamp, Some(at(80)));
    assert_eq!(store.batch_keys().len(), 1);

    let out = ctl.run_at(at(3), 10).await.unwrap();
    assert!(out.is_complete());
    assert_eq!(written_ids(&store), vec![60, 70, 80, 90]);
}
