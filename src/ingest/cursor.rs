// src/ingest/cursor.rs
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IngestError;
use crate::ingest::types::Article;
use crate::storage::{BlobStore, StoreError, JSON_CONTENT_TYPE};

pub const CURSOR_KEY: &str = "backfill_page.json";

/// How far back the backfill sweep has progressed.
///
/// `page` is the next page to fetch and only ever grows. `complete` is the
/// terminal state reached once the listing returned an empty page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillCursor {
    pub page: u32,
    #[serde(default)]
    pub complete: bool,
    /// Oldest publication time written so far. The listing is newest-first,
    /// so anything newer was already stored by an earlier page.
    #[serde(default)]
    pub oldest_timestamp: Option<DateTime<Utc>>,
    /// Ids of the written records stamped exactly `oldest_timestamp`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub boundary_ids: Vec<String>,
}

impl BackfillCursor {
    pub fn start(page: u32) -> Self {
        Self {
            page: page.max(1),
            complete: false,
            oldest_timestamp: None,
            boundary_ids: Vec::new(),
        }
    }

    /// Cursor after `self.page` was handled, `written` being what went into
    /// its blob. With nothing written the boundary stays where it was.
    pub fn advanced(&self, written: &[Article]) -> Self {
        let Some(oldest) = written.iter().map(|a| a.published_at).min() else {
            return Self {
                page: self.page + 1,
                complete: false,
                ..self.clone()
            };
        };
        Self {
            page: self.page + 1,
            complete: false,
            oldest_timestamp: Some(oldest),
            boundary_ids: written
                .iter()
                .filter(|a| a.published_at == oldest)
                .filter_map(Article::id_key)
                .collect(),
        }
    }

    /// True when `article` sits above the boundary, i.e. a blob already holds
    /// it and it only reappears because newer articles shifted the listing.
    /// A record at the boundary instant is kept unless its id was written.
    pub fn already_written(&self, article: &Article) -> bool {
        let Some(boundary) = self.oldest_timestamp else {
            return false;
        };
        article.published_at > boundary
            || (article.published_at == boundary
                && article
                    .id_key()
                    .is_some_and(|id| self.boundary_ids.contains(&id)))
    }

    pub fn completed(&self) -> Self {
        Self {
            complete: true,
            ..self.clone()
        }
    }
}

#[derive(Clone)]
pub struct CursorStore {
    store: Arc<dyn BlobStore>,
    key: String,
}

impl CursorStore {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            key: CURSOR_KEY.to_string(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn read(&self) -> Result<Option<BackfillCursor>, IngestError> {
        let Some(bytes) = self
            .store
            .get(&self.key)
            .await
            .map_err(|e| IngestError::read(&self.key, e))?
        else {
            return Ok(None);
        };
        let mut cursor: BackfillCursor = serde_json::from_slice(&bytes)
            .map_err(|e| IngestError::read(&self.key, StoreError::Corrupt(e.to_string())))?;
        // Files from older runs may hold page 0.
        cursor.page = cursor.page.max(1);
        Ok(Some(cursor))
    }

    pub async fn write(&self, cursor: &BackfillCursor) -> Result<(), IngestError> {
        let body = serde_json::to_vec(cursor)
            .map_err(|e| IngestError::write(&self.key, StoreError::Corrupt(e.to_string())))?;
        self.store
            .put(&self.key, body, JSON_CONTENT_TYPE)
            .await
            .map_err(|e| IngestError::write(&self.key, e))
    }
}
