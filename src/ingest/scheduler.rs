// src/ingest/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::IngestError;
use crate::ingest::{Job, RunOutcome};

#[derive(Clone, Copy, Debug)]
pub struct IngestSchedulerCfg {
    pub interval_secs: u64,
    /// Fire once immediately instead of waiting a full interval.
    pub run_on_startup: bool,
}

/// Shares one [`Job`] between the timer and the HTTP trigger, letting at most
/// one invocation run at a time inside this process.
pub struct JobRunner {
    job: Job,
    gate: Mutex<()>,
}

impl JobRunner {
    pub fn new(job: Job) -> Arc<Self> {
        Arc::new(Self {
            job,
            gate: Mutex::new(()),
        })
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    /// `None` when another invocation holds the gate.
    pub async fn try_run(&self) -> Option<Result<RunOutcome, IngestError>> {
        let Ok(_guard) = self.gate.try_lock() else {
            counter!("ingest_runs_rejected_total").increment(1);
            return None;
        };
        Some(self.job.run_once().await)
    }
}

pub fn spawn_scheduler(runner: Arc<JobRunner>, cfg: IngestSchedulerCfg) -> JoinHandle<()> {
    let period = Duration::from_secs(cfg.interval_secs.max(1));
    let start = if cfg.run_on_startup {
        Instant::now()
    } else {
        Instant::now() + period
    };

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            let scheduled = ticker.tick().await;
            if scheduled.elapsed() > Duration::from_secs(60) {
                tracing::info!(target: "scheduler", "timer is past due");
            }

            match runner.try_run().await {
                None => tracing::warn!(target: "scheduler", "previous invocation still running, tick skipped"),
                Some(Ok(outcome)) => match outcome.failure() {
                    None => tracing::info!(target: "scheduler", mode = runner.job().mode().label(), "timer invocation finished"),
                    Some(e) => tracing::warn!(target: "scheduler", error = %e, "timer invocation halted"),
                },
                Some(Err(e)) => tracing::warn!(target: "scheduler", error = %e, "timer invocation failed"),
            }
        }
    })
}
