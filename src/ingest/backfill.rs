// src/ingest/backfill.rs
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use serde::Serialize;

use crate::error::IngestError;
use crate::ingest::cursor::{BackfillCursor, CursorStore};
use crate::ingest::naming;
use crate::ingest::types::{Article, ArticleSource};
use crate::storage::{BlobStore, StoreError, JSON_CONTENT_TYPE};

#[derive(Debug, Serialize)]
pub struct BackfillOutcome {
    pub pages_written: u32,
    pub articles_written: usize,
    pub keys: Vec<String>,
    /// Cursor as persisted when the sweep stopped.
    pub cursor: BackfillCursor,
    /// Fetch/write failure that cut the sweep short. Progress made before it
    /// is already persisted.
    #[serde(skip)]
    pub halted: Option<IngestError>,
}

impl BackfillOutcome {
    fn starting_at(cursor: BackfillCursor) -> Self {
        Self {
            pages_written: 0,
            articles_written: 0,
            keys: Vec::new(),
            cursor,
            halted: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.cursor.complete
    }
}

/// Bounded, resumable sweep through older pages, one blob per page.
pub struct BackfillController {
    source: Arc<dyn ArticleSource>,
    store: Arc<dyn BlobStore>,
    cursors: CursorStore,
    start_page: u32,
    page_delay: Duration,
}

impl BackfillController {
    pub fn new(source: Arc<dyn ArticleSource>, store: Arc<dyn BlobStore>) -> Self {
        Self {
            source,
            cursors: CursorStore::new(store.clone()),
            store,
            start_page: 1,
            page_delay: Duration::ZERO,
        }
    }

    /// Where a sweep without a stored cursor begins.
    pub fn with_start_page(mut self, page: u32) -> Self {
        self.start_page = page.max(1);
        self
    }

    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    pub async fn run(&self, max_pages_per_invocation: u32) -> Result<BackfillOutcome, IngestError> {
        self.run_at(Utc::now(), max_pages_per_invocation).await
    }

    /// Only a cursor read failure is returned as `Err`; fetch and write
    /// failures stop the sweep and are reported in [`BackfillOutcome::halted`].
    pub async fn run_at(
        &self,
        now: DateTime<Utc>,
        max_pages_per_invocation: u32,
    ) -> Result<BackfillOutcome, IngestError> {
        let mut cursor = self
            .cursors
            .read()
            .await?
            .unwrap_or_else(|| BackfillCursor::start(self.start_page));
        let mut outcome = BackfillOutcome::starting_at(cursor.clone());

        if cursor.complete {
            tracing::info!(target: "backfill", page = cursor.page, "backfill already complete");
            return Ok(outcome);
        }
        tracing::info!(
            target: "backfill",
            page = cursor.page,
            max_pages = max_pages_per_invocation,
            "backfill sweep"
        );

        for step in 0..max_pages_per_invocation {
            if step > 0 && !self.page_delay.is_zero() {
                tokio::time::sleep(self.page_delay).await;
            }
            let page = cursor.page;

            let fetched = match self.source.fetch_page(page).await {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(target: "backfill", page, error = %e, "page fetch failed");
                    outcome.halted = Some(e);
                    break;
                }
            };

            if fetched.is_exhausted() {
                let done = cursor.completed();
                match self.cursors.write(&done).await {
                    Ok(()) => {
                        tracing::info!(target: "backfill", page, "empty page, backfill complete");
                        cursor = done;
                    }
                    Err(e) => outcome.halted = Some(e),
                }
                break;
            }

            // new articles push already-written ones down onto later pages
            let total = fetched.articles.len();
            let fresh: Vec<Article> = fetched
                .articles
                .into_iter()
                .filter(|a| !cursor.already_written(a))
                .collect();
            if fresh.len() < total {
                tracing::info!(
                    target: "backfill",
                    page,
                    dropped = total - fresh.len(),
                    "records above the cursor boundary were already written"
                );
            }

            if !fresh.is_empty() {
                let key = match self.claim_key(naming::backfill_key(now, page)).await {
                    Ok(k) => k,
                    Err(e) => {
                        tracing::warn!(target: "backfill", page, error = %e, "blob key lookup failed");
                        outcome.halted = Some(e);
                        break;
                    }
                };
                if let Err(e) = self.write_page(&key, &fresh).await {
                    tracing::warn!(target: "backfill", page, error = %e, "page write failed");
                    outcome.halted = Some(e);
                    break;
                }
                outcome.pages_written += 1;
                outcome.articles_written += fresh.len();
                outcome.keys.push(key);
            }

            let next = cursor.advanced(&fresh);
            if let Err(e) = self.cursors.write(&next).await {
                // the page blob exists; the next run rewrites it under a new key
                tracing::warn!(target: "backfill", page, error = %e, "cursor write failed");
                outcome.halted = Some(e);
                break;
            }
            cursor = next;
            gauge!("ingest_backfill_next_page").set(cursor.page as f64);
        }

        tracing::info!(
            target: "backfill",
            pages_written = outcome.pages_written,
            next_page = cursor.page,
            complete = cursor.complete,
            "backfill paused"
        );
        outcome.cursor = cursor;
        Ok(outcome)
    }

    async fn claim_key(&self, key: String) -> Result<String, IngestError> {
        naming::claim_key(self.store.as_ref(), &key)
            .await
            .map_err(|e| IngestError::read(&key, e))
    }

    async fn write_page(&self, key: &str, articles: &[Article]) -> Result<(), IngestError> {
        let records: Vec<&serde_json::Value> = articles.iter().map(|a| &a.raw).collect();
        let body = serde_json::to_vec_pretty(&records)
            .map_err(|e| IngestError::write(key, StoreError::Corrupt(e.to_string())))?;
        self.store
            .put(key, body, JSON_CONTENT_TYPE)
            .await
            .map_err(|e| IngestError::write(key, e))?;
        counter!("ingest_blobs_written_total").increment(1);
        counter!("ingest_articles_persisted_total").increment(articles.len() as u64);
        tracing::info!(target: "backfill", key, count = articles.len(), "saved page");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::cursor::CURSOR_KEY;
    use crate::ingest::providers::fixture::FixtureSource;
    use crate::storage::memory::MemoryBlobStore;
    use serde_json::json;

    #[tokio::test]
    async fn bounded_sweep_stops_at_limit() {
        let source = Arc::new(FixtureSource::from_epochs(&[&[50, 40], &[30, 20], &[10]]));
        let store = Arc::new(MemoryBlobStore::new());
        let ctl = BackfillController::new(source.clone(), store.clone());

        let out = ctl.run(2).await.unwrap();
        assert_eq!(out.pages_written, 2);
        assert_eq!(out.articles_written, 4);
        assert!(out.halted.is_none());
        assert_eq!(out.cursor.page, 3);
        assert_eq!(out.cursor.oldest_timestamp.unwrap().timestamp(), 20);
        assert_eq!(source.calls(), vec![1, 2]);
        assert_eq!(store.read_json(CURSOR_KEY).unwrap()["page"], 3);
    }

    #[tokio::test]
    async fn operator_start_page_is_used_without_cursor() {
        let source = Arc::new(FixtureSource::from_epochs(&[&[50], &[40], &[30]]));
        let store = Arc::new(MemoryBlobStore::new());
        let ctl = BackfillController::new(source.clone(), store).with_start_page(3);

        let out = ctl.run(5).await.unwrap();
        assert_eq!(source.calls(), vec![3, 4]);
        assert_eq!(out.pages_written, 1);
        assert!(out.is_complete());
    }

    #[tokio::test]
    async fn page_of_unreadable_records_advances_without_blob() {
        let source = Arc::new(FixtureSource::from_pages(vec![
            vec![json!({"id": 1, "published_at": "garbage"})],
            vec![json!({"id": 2, "published_at": 10})],
        ]));
        let store = Arc::new(MemoryBlobStore::new());
        let out = BackfillController::new(source, store.clone())
            .run(2)
            .await
            .unwrap();
        assert_eq!(out.pages_written, 1);
        assert_eq!(out.cursor.page, 3);
        assert_eq!(store.batch_keys().len(), 1);
    }

    #[tokio::test]
    async fn cursor_read_failure_is_terminal() {
        let source = Arc::new(FixtureSource::from_epochs(&[&[1]]));
        let store = Arc::new(MemoryBlobStore::new());
        store.fail_reads_when(|k| k == CURSOR_KEY);
        let err = BackfillController::new(source.clone(), store)
            .run(1)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::StorageRead { .. }));
        assert!(source.calls().is_empty());
    }

    #[tokio::test]
    async fn key_lookup_failure_halts_before_writing() {
        let source = Arc::new(FixtureSource::from_epochs(&[&[50], &[40]]));
        let store = Arc::new(MemoryBlobStore::new());
        store.fail_reads_when(|k| k.contains("backfill_page=1_"));
        let out = BackfillController::new(source, store.clone())
            .run(2)
            .await
            .unwrap();
        assert!(matches!(out.halted, Some(IngestError::StorageRead { .. })));
        assert_eq!(out.pages_written, 0);
        assert_eq!(out.cursor.page, 1);
        assert!(store.batch_keys().is_empty());
        assert!(store.read(CURSOR_KEY).is_none());
    }
}
