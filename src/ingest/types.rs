// src/ingest/types.rs
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::error::IngestError;

pub const DEFAULT_TIMESTAMP_FIELD: &str = "published_at";

/// One fetched record. The payload is kept verbatim; only the id and the
/// publication time are interpreted.
#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    pub id: Option<Value>,
    pub published_at: DateTime<Utc>,
    pub raw: Value,
}

impl Article {
    /// Build from a raw JSON record, reading the timestamp from `ts_field`.
    /// Accepts RFC 3339 strings (`Z` or an offset) and integer epoch seconds.
    pub fn from_value(raw: Value, ts_field: &str) -> Result<Self, String> {
        let obj = raw.as_object().ok_or("record is not a JSON object")?;
        let published_at = match obj.get(ts_field) {
            Some(Value::String(s)) => DateTime::parse_from_rfc3339(s.trim())
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| format!("`{ts_field}` = {s:?}: {e}"))?,
            Some(Value::Number(n)) => n
                .as_i64()
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
                .ok_or_else(|| format!("`{ts_field}` = {n} is not epoch seconds"))?,
            Some(other) => return Err(format!("`{ts_field}` has unsupported type: {other}")),
            None => return Err(format!("missing `{ts_field}`")),
        };
        let id = obj.get("id").cloned();
        Ok(Self {
            id,
            published_at,
            raw,
        })
    }
    /// Comparable form of the record id, if it has one.
    pub fn id_key(&self) -> Option<String> {
        self.id.as_ref().map(Value::to_string)
    }
}

/// One page of a newest-first listing.
#[derive(Debug, Clone, Default)]
pub struct SourcePage {
    pub articles: Vec<Article>,
    /// Records dropped because their timestamp could not be read.
    pub skipped: usize,
}

impl SourcePage {
    pub fn new(articles: Vec<Article>) -> Self {
        Self {
            articles,
            skipped: 0,
        }
    }

    /// Parse every record, skipping (and counting) the unreadable ones.
    pub fn from_values(values: Vec<Value>, ts_field: &str) -> Self {
        let mut page = Self::default();
        for v in values {
            match Article::from_value(v, ts_field) {
                Ok(a) => page.articles.push(a),
                Err(reason) => {
                    tracing::warn!(target: "ingest", %reason, "skipping article");
                    page.skipped += 1;
                }
            }
        }
        page
    }

    /// The upstream returned nothing at all: the listing ends here.
    pub fn is_exhausted(&self) -> bool {
        self.articles.is_empty() && self.skipped == 0
    }
}

/// Paginated, read-only listing. Page 1 is the newest; higher pages go back
/// in time.
#[async_trait]
pub trait ArticleSource: Send + Sync {
    async fn fetch_page(&self, page: u32) -> Result<SourcePage, IngestError>;
    fn name(&self) -> &'static str;
}
