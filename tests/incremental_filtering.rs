// tests/incremental_filtering.rs
use std::sync::Arc;

use chrono::{DateTime, Utc};
use forem_ingest::ingest::incremental::{IncrementalController, IncrementalOutcome};
use forem_ingest::ingest::providers::fixture::{epoch_record, FixtureSource};
use forem_ingest::ingest::watermark::{WatermarkStore, WATERMARK_KEY};
use forem_ingest::storage::memory::MemoryBlobStore;
use forem_ingest::IngestError;

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
}

fn persisted_epochs(store: &MemoryBlobStore, key: &str) -> Vec<i64> {
    store
        .read_json(key)
        .expect("batch blob")
        .as_array()
        .expect("json array")
        .iter()
        .map(|v| v["published_at"].as_i64().unwrap())
        .collect()
}

#[tokio::test]
async fn only_strictly_newer_records_are_persisted() {
    let source = Arc::new(FixtureSource::from_epochs(&[&[105, 101, 100, 95]]));
    let store = Arc::new(MemoryBlobStore::new());
    let wm = WatermarkStore::new(store.clone());
    wm.write(at(100)).await.unwrap();

    let ctl = IncrementalController::new(source, store.clone());
    let out = ctl.run_at(at(10_000)).await.unwrap();

    let key = match out {
        IncrementalOutcome::Persisted {
            key,
            articles,
            previous,
            watermark,
            ..
        } => {
            assert_eq!(articles, 2);
            assert_eq!(previous, Some(at(100)));
            assert_eq!(watermark, at(105));
            key
        }
        other => panic!("expected a persisted batch, got {other:?}"),
    };

    assert_eq!(store.batch_keys(), vec![key.clone()]);
    assert_eq!(persisted_epochs(&store, &key), vec![105, 101]);
    assert_eq!(wm.read().await.unwrap(), Some(at(105)));
}

#[tokio::test]
async fn nothing_newer_is_a_no_op() {
    let source = Arc::new(FixtureSource::from_epochs(&[&[105, 100, 95]]));
    let store = Arc::new(MemoryBlobStore::new());
    let wm = WatermarkStore::new(store.clone());
    wm.write(at(105)).await.unwrap();
    let before = store.read(WATERMARK_KEY);

    let out = IncrementalController::new(source, store.clone())
        .run()
        .await
        .expect("no new records is not an error");

    assert_eq!(
        out,
        IncrementalOutcome::UpToDate {
            watermark: Some(at(105)),
            pages_fetched: 1
        }
    );
    assert!(store.batch_keys().is_empty());
    assert_eq!(store.read(WATERMARK_KEY), before);
}

#[tokio::test]
async fn first_run_without_watermark_takes_everything() {
    let source = Arc::new(FixtureSource::from_epochs(&[&[30, 20, 10]]));
    let store = Arc::new(MemoryBlobStore::new());

    let out = IncrementalController::new(source, store.clone())
        .run()
        .await
        .unwrap();
    assert!(matches!(
        out,
        IncrementalOutcome::Persisted {
            articles: 3,
            previous: None,
            ..
        }
    ));
    assert_eq!(
        WatermarkStore::new(store).read().await.unwrap(),
        Some(at(30))
    );
}

#[tokio::test]
async fn second_run_without_new_data_changes_nothing() {
    let source = Arc::new(FixtureSource::from_epochs(&[&[50, 40]]));
    let store = Arc::new(MemoryBlobStore::new());
    let ctl = IncrementalController::new(source, store.clone());

    ctl.run_at(at(1_000)).await.unwrap();
    let keys = store.keys();
    let wm = store.read(WATERMARK_KEY);

    let out = ctl.run_at(at(2_000)).await.unwrap();
    assert!(matches!(out, IncrementalOutcome::UpToDate { .. }));
    assert_eq!(store.keys(), keys);
    assert_eq!(store.read(WATERMARK_KEY), wm);
}

#[tokio::test]
async fn watermark_never_decreases_across_runs() {
    let source = Arc::new(FixtureSource::from_epochs(&[&[10, 5]]));
    let store = Arc::new(MemoryBlobStore::new());
    let wm = WatermarkStore::new(store.clone());
    let ctl = IncrementalController::new(source.clone(), store.clone());

    // upstream snapshots over time, including one that regresses (an article
    // got unpublished) and one that repeats the boundary record
    let snapshots: Vec<Vec<i64>> = vec![
        vec![10, 5],
        vec![12, 10, 5],
        vec![11, 10],
        vec![12, 12, 11],
        vec![20, 12],
    ];

    let mut last = None;
    for (i, snap) in snapshots.into_iter().enumerate() {
        source.set_pages(vec![snap.into_iter().map(epoch_record).collect()]);
        ctl.run_at(at(1_000 + i as i64)).await.unwrap();
        let current = wm.read().await.unwrap();
        assert!(current >= last, "watermark went back: {last:?} -> {current:?}");
        last = current;
    }
    assert_eq!(last, Some(at(20)));
    // 10,5 / 12 / 20 were new; the other snapshots wrote nothing
    assert_eq!(store.batch_keys().len(), 3);
}

#[tokio::test]
async fn source_failure_is_terminal_and_mutates_nothing() {
    let source = Arc::new(FixtureSource::from_epochs(&[&[10]]));
    source.fail_page(1);
    let store = Arc::new(MemoryBlobStore::new());

    let err = IncrementalController::new(source, store.clone())
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::SourceUnavailable(_)));
    assert!(store.is_empty());
}

#[tokio::test]
async fn watermark_read_failure_stops_before_fetching() {
    let source = Arc::new(FixtureSource::from_epochs(&[&[10]]));
    let store = Arc::new(MemoryBlobStore::new());
    store.fail_reads_when(|k| k == WATERMARK_KEY);

    let err = IncrementalController::new(source.clone(), store)
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::StorageRead { .. }));
    assert!(source.calls().is_empty());
}
