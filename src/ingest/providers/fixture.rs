// src/ingest/providers/fixture.rs
use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::IngestError;
use crate::ingest::types::{ArticleSource, SourcePage, DEFAULT_TIMESTAMP_FIELD};

/// In-memory listing for tests and dry runs. Pages past the end are empty;
/// individual pages can be made to fail.
pub struct FixtureSource {
    pages: Mutex<Vec<Vec<Value>>>,
    failing: Mutex<HashSet<u32>>,
    calls: Mutex<Vec<u32>>,
}

impl FixtureSource {
    pub fn from_pages(pages: Vec<Vec<Value>>) -> Self {
        Self {
            pages: Mutex::new(pages),
            failing: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Pages of `{"id": ts, "published_at": ts}` records, `ts` in epoch seconds.
    pub fn from_epochs(pages: &[&[i64]]) -> Self {
        Self::from_pages(
            pages
                .iter()
                .map(|p| p.iter().map(|ts| epoch_record(*ts)).collect())
                .collect(),
        )
    }

    /// Replace the upstream content (e.g. new articles arrived).
    pub fn set_pages(&self, pages: Vec<Vec<Value>>) {
        *self.pages.lock().unwrap() = pages;
    }

    pub fn fail_page(&self, page: u32) {
        self.failing.lock().unwrap().insert(page);
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    /// Pages requested so far, in order.
    pub fn calls(&self) -> Vec<u32> {
        self.calls.lock().unwrap().clone()
    }
}

pub fn epoch_record(ts: i64) -> Value {
    json!({ "id": ts, "published_at": ts })
}

#[async_trait]
impl ArticleSource for FixtureSource {
    async fn fetch_page(&self, page: u32) -> Result<SourcePage, IngestError> {
        self.calls.lock().unwrap().push(page);
        if self.failing.lock().unwrap().contains(&page) {
            return Err(IngestError::SourceUnavailable(format!(
                "fixture page {page} unavailable"
            )));
        }
        let values = page
            .checked_sub(1)
            .and_then(|idx| self.pages.lock().unwrap().get(idx as usize).cloned())
            .unwrap_or_default();
        Ok(SourcePage::from_values(values, DEFAULT_TIMESTAMP_FIELD))
    }

    fn name(&self) -> &'static str {
        "fixture"
    }
}
