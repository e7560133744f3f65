use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, histogram};
use reqwest::Client;
use serde_json::Value;

use crate::config::JobConfig;
use crate::error::IngestError;
use crate::ingest::types::{ArticleSource, SourcePage};

const USER_AGENT: &str = concat!("forem-ingest/", env!("CARGO_PKG_VERSION"));

fn http_client(timeout: Duration) -> Result<Client, IngestError> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| IngestError::Config(format!("building source http client: {e}")))
}

/// Forem listing endpoint (`/api/articles/latest`), paged by index with
/// page 1 holding the newest articles.
#[derive(Clone)]
pub struct ForemSource {
    client: Client,
    api_url: String,
    per_page: u32,
    max_retries: u8,
    retry_base: Duration,
    ts_field: String,
}

impl ForemSource {
    pub fn new(api_url: impl Into<String>, per_page: u32) -> Result<Self, IngestError> {
        Ok(Self {
            client: http_client(Duration::from_secs(10))?,
            api_url: api_url.into(),
            per_page: per_page.max(1),
            max_retries: 3,
            retry_base: Duration::from_secs(1),
            ts_field: crate::ingest::types::DEFAULT_TIMESTAMP_FIELD.to_string(),
        })
    }

    pub fn from_config(cfg: &JobConfig) -> Result<Self, IngestError> {
        Ok(Self {
            client: http_client(Duration::from_secs(cfg.request_timeout_secs.max(1)))?,
            api_url: cfg.api_url.clone(),
            per_page: cfg.per_page.max(1),
            max_retries: cfg.max_retries,
            retry_base: Duration::from_millis(cfg.retry_base_ms),
            ts_field: cfg.timestamp_field.clone(),
        })
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    pub fn with_timestamp_field(mut self, field: impl Into<String>) -> Self {
        self.ts_field = field.into();
        self
    }

    fn parse_page(&self, page: u32, body: &[u8]) -> Result<SourcePage, IngestError> {
        let values: Vec<Value> = serde_json::from_slice(body).map_err(|e| {
            counter!("ingest_source_errors_total").increment(1);
            IngestError::SourceUnavailable(format!("page {page}: body is not a JSON array: {e}"))
        })?;
        let parsed = SourcePage::from_values(values, &self.ts_field);
        if parsed.skipped > 0 {
            counter!("ingest_articles_skipped_total").increment(parsed.skipped as u64);
        }
        Ok(parsed)
    }
}

#[async_trait]
impl ArticleSource for ForemSource {
    async fn fetch_page(&self, page: u32) -> Result<SourcePage, IngestError> {
        let attempts = self.max_retries.max(1);
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let t0 = std::time::Instant::now();
            let res = self
                .client
                .get(&self.api_url)
                .query(&[("per_page", self.per_page), ("page", page)])
                .send()
                .await;

            let failure = match res {
                Ok(rsp) if rsp.status().is_success() => match rsp.bytes().await {
                    Ok(body) => {
                        histogram!("ingest_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
                        let parsed = self.parse_page(page, &body)?;
                        tracing::info!(
                            target: "ingest",
                            page,
                            count = parsed.articles.len(),
                            skipped = parsed.skipped,
                            "fetched page"
                        );
                        return Ok(parsed);
                    }
                    Err(e) => format!("reading body: {e}"),
                },
                Ok(rsp) => format!("HTTP {}", rsp.status()),
                Err(e) => format!("request failed: {e}"),
            };

            counter!("ingest_source_errors_total").increment(1);
            tracing::warn!(target: "ingest", page, attempt, %failure, "source request failed");
            if attempt >= attempts {
                return Err(IngestError::SourceUnavailable(format!(
                    "page {page}: {failure} (after {attempt} attempts)"
                )));
            }
            // base, 2*base, 4*base, ...
            tokio::time::sleep(self.retry_base * 2u32.pow(u32::from(attempt) - 1)).await;
        }
    }

    fn name(&self) -> &'static str {
        "forem"
    }
}
