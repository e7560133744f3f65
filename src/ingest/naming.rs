// src/ingest/naming.rs
//! Batch blob keys: `<date>/<kind>=<page>_<invocation time>.json`. The
//! date prefix groups blobs like folders; the page number keeps keys unique
//! within one invocation and the millisecond timestamp across invocations.
//! [`claim_key`] adds a `-N` suffix in the rare case a key is already taken.

use chrono::{DateTime, Utc};

use crate::storage::{BlobStore, StoreError};

const MAX_SUFFIX: u32 = 100;

fn stamp(now: DateTime<Utc>) -> (String, String) {
    (
        now.format("%Y-%m-%d").to_string(),
        now.format("%Y%m%dT%H%M%S%.3fZ").to_string(),
    )
}

pub fn incremental_key(now: DateTime<Utc>, last_page: u32) -> String {
    let (day, ts) = stamp(now);
    format!("{day}/page={}_{ts}.json", last_page.max(1))
}

pub fn backfill_key(now: DateTime<Utc>, page: u32) -> String {
    let (day, ts) = stamp(now);
    format!("{day}/backfill_page={page}_{ts}.json")
}

/// First of `key`, `key-1`, `key-2`, ... that does not exist yet. Batch
/// blobs are never overwritten.
pub async fn claim_key(store: &dyn BlobStore, key: &str) -> Result<String, StoreError> {
    if !store.exists(key).await? {
        return Ok(key.to_string());
    }
    let stem = key.strip_suffix(".json").unwrap_or(key);
    for n in 1..=MAX_SUFFIX {
        let candidate = format!("{stem}-{n}.json");
        if !store.exists(&candidate).await? {
            return Ok(candidate);
        }
    }
    Err(StoreError::InvalidKey(format!("{key} (no free suffix)")))
}
