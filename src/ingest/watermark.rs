// src/ingest/watermark.rs
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IngestError;
use crate::storage::{BlobStore, StoreError, JSON_CONTENT_TYPE};

pub const WATERMARK_KEY: &str = "latest_timestamp.json";

/// Publication time of the newest article persisted so far.
pub type Watermark = DateTime<Utc>;

#[derive(Debug, Serialize, Deserialize)]
struct WatermarkDoc {
    latest_timestamp: Option<String>,
}

/// Reads and overwrites the single watermark blob.
#[derive(Clone)]
pub struct WatermarkStore {
    store: Arc<dyn BlobStore>,
    key: String,
}

impl WatermarkStore {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self::with_key(store, WATERMARK_KEY)
    }

    pub fn with_key(store: Arc<dyn BlobStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// `None` means no prior run. Unreadable content is an error: falling back
    /// to "no prior run" would re-ingest the whole listing.
    pub async fn read(&self) -> Result<Option<Watermark>, IngestError> {
        let Some(bytes) = self
            .store
            .get(&self.key)
            .await
            .map_err(|e| IngestError::read(&self.key, e))?
        else {
            return Ok(None);
        };

        let doc: WatermarkDoc = serde_json::from_slice(&bytes).map_err(|e| {
            IngestError::read(&self.key, StoreError::Corrupt(e.to_string()))
        })?;
        match doc.latest_timestamp.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(|e| {
                    IngestError::read(&self.key, StoreError::Corrupt(format!("{s:?}: {e}")))
                }),
        }
    }

    pub async fn write(&self, ts: Watermark) -> Result<(), IngestError> {
        let doc = WatermarkDoc {
            latest_timestamp: Some(ts.to_rfc3339_opts(SecondsFormat::AutoSi, false)),
        };
        let body = serde_json::to_vec(&doc)
            .map_err(|e| IngestError::write(&self.key, StoreError::Corrupt(e.to_string())))?;
        self.store
            .put(&self.key, body, JSON_CONTENT_TYPE)
            .await
            .map_err(|e| IngestError::write(&self.key, e))
    }
}
