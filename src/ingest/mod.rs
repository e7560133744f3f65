// src/ingest/mod.rs
pub mod backfill;
pub mod cursor;
pub mod incremental;
pub mod naming;
pub mod providers;
pub mod scheduler;
pub mod types;
pub mod watermark;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::config::JobConfig;
use crate::error::IngestError;
use crate::ingest::backfill::{BackfillController, BackfillOutcome};
use crate::ingest::incremental::{IncrementalController, IncrementalOutcome};
use crate::ingest::providers::forem::ForemSource;
use crate::ingest::types::ArticleSource;
use crate::storage::{self, BlobStore};

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_runs_total", "Invocations started, by mode.");
        describe_counter!(
            "ingest_run_failures_total",
            "Invocations that ended in an error, by mode."
        );
        describe_counter!(
            "ingest_articles_persisted_total",
            "Articles written to batch blobs."
        );
        describe_counter!("ingest_blobs_written_total", "Batch blobs written.");
        describe_counter!(
            "ingest_runs_rejected_total",
            "Triggers refused because an invocation was already running."
        );
        describe_counter!(
            "ingest_articles_skipped_total",
            "Records dropped because their timestamp was unreadable."
        );
        describe_counter!(
            "ingest_source_errors_total",
            "Failed source requests (each attempt) and unparseable pages."
        );
        describe_counter!(
            "ingest_storage_errors_total",
            "Blob reads/writes that failed."
        );
        describe_histogram!("ingest_fetch_ms", "Source page fetch time in milliseconds.");
        describe_gauge!(
            "ingest_watermark_ts",
            "Unix ts of the stored watermark after the last advance."
        );
        describe_gauge!(
            "ingest_backfill_next_page",
            "Next page the backfill sweep will fetch."
        );
    });
}

/// Which controller an invocation runs. Chosen once, from `BACKFILL_MODE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Mode {
    Incremental,
    Backfill { max_pages: u32 },
}

impl Mode {
    pub fn label(&self) -> &'static str {
        match self {
            Mode::Incremental => "incremental",
            Mode::Backfill { .. } => "backfill",
        }
    }
}

pub enum Controller {
    Incremental(IncrementalController),
    Backfill {
        controller: BackfillController,
        max_pages: u32,
    },
}

impl Controller {
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<RunOutcome, IngestError> {
        match self {
            Controller::Incremental(c) => c.run_at(now).await.map(RunOutcome::Incremental),
            Controller::Backfill {
                controller,
                max_pages,
            } => controller
                .run_at(now, *max_pages)
                .await
                .map(RunOutcome::Backfill),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RunOutcome {
    Incremental(IncrementalOutcome),
    Backfill(BackfillOutcome),
}

impl RunOutcome {
    /// A backfill sweep cut short by a fetch/write failure still counts as a
    /// failed invocation, even though its earlier pages were kept.
    pub fn failure(&self) -> Option<&IngestError> {
        match self {
            RunOutcome::Incremental(_) => None,
            RunOutcome::Backfill(b) => b.halted.as_ref(),
        }
    }
}

/// Everything an invocation needs: source, store and the selected mode.
/// Holds no state between invocations; watermark and cursor live in the store.
pub struct Job {
    source: Arc<dyn ArticleSource>,
    store: Arc<dyn BlobStore>,
    mode: Mode,
    page_delay: Duration,
    incremental_max_pages: u32,
    backfill_start_page: u32,
}

impl Job {
    pub fn new(source: Arc<dyn ArticleSource>, store: Arc<dyn BlobStore>, mode: Mode) -> Self {
        Self {
            source,
            store,
            mode,
            page_delay: Duration::ZERO,
            incremental_max_pages: 1,
            backfill_start_page: 1,
        }
    }

    pub fn from_config(cfg: &JobConfig) -> Result<Self, IngestError> {
        let conn_str = cfg
            .blob_conn_str
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| IngestError::Config("BLOB_CONN_STR is not set".into()))?;
        let store = storage::open_store(conn_str, &cfg.container)?;
        let source = Arc::new(ForemSource::from_config(cfg)?);
        tracing::info!(
            target: "ingest",
            mode = cfg.mode().label(),
            store = store.name(),
            container = %cfg.container,
            api_url = %cfg.api_url,
            "job configured"
        );
        Ok(Self::new(source, store, cfg.mode())
            .with_page_delay(Duration::from_millis(cfg.page_delay_ms))
            .with_incremental_max_pages(cfg.incremental_max_pages)
            .with_backfill_start_page(cfg.backfill_start_page))
    }

    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    pub fn with_incremental_max_pages(mut self, n: u32) -> Self {
        self.incremental_max_pages = n.max(1);
        self
    }

    pub fn with_backfill_start_page(mut self, page: u32) -> Self {
        self.backfill_start_page = page.max(1);
        self
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn controller(&self) -> Controller {
        match self.mode {
            Mode::Incremental => Controller::Incremental(
                IncrementalController::new(self.source.clone(), self.store.clone())
                    .with_max_pages(self.incremental_max_pages)
                    .with_page_delay(self.page_delay),
            ),
            Mode::Backfill { max_pages } => Controller::Backfill {
                controller: BackfillController::new(self.source.clone(), self.store.clone())
                    .with_start_page(self.backfill_start_page)
                    .with_page_delay(self.page_delay),
                max_pages,
            },
        }
    }

    pub async fn run_once(&self) -> Result<RunOutcome, IngestError> {
        self.run_once_at(Utc::now()).await
    }

    pub async fn run_once_at(&self, now: DateTime<Utc>) -> Result<RunOutcome, IngestError> {
        ensure_metrics_described();
        let mode = self.mode.label();
        counter!("ingest_runs_total", "mode" => mode).increment(1);

        let res = self.controller().run_at(now).await;
        let failure = match &res {
            Ok(outcome) => outcome.failure(),
            Err(e) => Some(e),
        };
        if let Some(e) = failure {
            counter!("ingest_run_failures_total", "mode" => mode).increment(1);
            if matches!(e, IngestError::StorageRead { .. } | IngestError::StorageWrite { .. }) {
                counter!("ingest_storage_errors_total").increment(1);
            }
            tracing::error!(target: "ingest", mode, kind = e.kind(), error = %e, "invocation failed");
        }
        res
    }
}
