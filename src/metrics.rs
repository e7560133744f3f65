//! Prometheus exposition for the `serve` command.
use axum::{routing::get, Router};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

/// Source fetches are dominated by network time; retries push the tail out.
const FETCH_MS_BUCKETS: &[f64] = &[
    25.0, 50.0, 100.0, 250.0, 500.0, 1_000.0, 2_500.0, 5_000.0, 10_000.0, 30_000.0,
];

pub struct Metrics {
    pub handle: PrometheusHandle,
}

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full("ingest_fetch_ms".into()), FETCH_MS_BUCKETS)
}

impl Metrics {
    /// Install the global Prometheus recorder. Call once per process.
    pub fn init() -> anyhow::Result<Self> {
        let handle = builder()
            .and_then(|b| b.install_recorder())
            .map_err(|e| anyhow::anyhow!("prometheus: install recorder: {e}"))?;
        crate::ingest::ensure_metrics_described();
        Ok(Self { handle })
    }

    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_latency_is_a_bucketed_histogram() {
        let recorder = builder().unwrap().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            metrics::histogram!("ingest_fetch_ms").record(120.0);
            metrics::counter!("ingest_runs_total", "mode" => "incremental").increment(1);
        });

        let text = handle.render();
        let bucket = text
            .lines()
            .find(|l| l.starts_with("ingest_fetch_ms_bucket{le=\"250"))
            .expect("250ms bucket");
        assert!(bucket.ends_with(" 1"), "{bucket}");
        assert!(text.contains("ingest_runs_total{mode=\"incremental\"} 1"));
    }
}
