//! forem-ingest binary entrypoint.
//!
//! `forem-ingest [once]` runs a single invocation and exits non-zero on failure,
//! for cron / container schedulers.
//! `forem-ingest serve` keeps running: an interval timer plus an HTTP trigger
//! (`POST /run`), with `/health` and `/metrics`.

use anyhow::{bail, Context, Result};
use forem_ingest::{
    ingest::scheduler::{spawn_scheduler, IngestSchedulerCfg, JobRunner},
    init_tracing,
    metrics::Metrics,
    Job, JobConfig,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when the file is absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = JobConfig::load_default().context("loading ingest configuration")?;
    let command = std::env::args().nth(1).unwrap_or_else(|| "once".to_string());

    match command.as_str() {
        "once" => run_once(&cfg).await,
        "serve" => serve(cfg).await,
        other => bail!("unknown command `{other}` (expected `once` or `serve`)"),
    }
}

async fn run_once(cfg: &JobConfig) -> Result<()> {
    info!("ingest job started");
    let job = Job::from_config(cfg)?;
    let outcome = job.run_once().await?;

    let summary = serde_json::to_string(&outcome).unwrap_or_default();
    if let Some(e) = outcome.failure() {
        bail!("invocation halted: {e} (progress: {summary})");
    }
    info!(outcome = %summary, "ingest job completed successfully");
    Ok(())
}

async fn serve(cfg: JobConfig) -> Result<()> {
    let metrics = Metrics::init()?;
    let runner = JobRunner::new(Job::from_config(&cfg)?);

    let _timer = spawn_scheduler(
        runner.clone(),
        IngestSchedulerCfg {
            interval_secs: cfg.fetch_interval_secs,
            run_on_startup: cfg.run_on_startup,
        },
    );

    let app = forem_ingest::router(runner).merge(metrics.router());
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("binding {}", cfg.bind_addr))?;
    info!(addr = %cfg.bind_addr, every_secs = cfg.fetch_interval_secs, "serving ingest triggers");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await
        .context("http server")
}
