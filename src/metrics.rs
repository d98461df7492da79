// src/metrics.rs
//! Prometheus exposition plus the pipeline's metric helpers.
//!
//! Helpers are safe to call before (or without) `install`: the `metrics`
//! facade drops samples when no recorder is set.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use shuttle_axum::axum::{routing::get, Router};

use crate::markets::Platform;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Installs the Prometheus recorder once per process; later calls share it.
    pub fn install() -> anyhow::Result<Self> {
        static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();
        let handle = HANDLE
            .get_or_try_init(|| -> anyhow::Result<PrometheusHandle> {
                let h = PrometheusBuilder::new().install_recorder()?;
                ensure_described();
                Ok(h)
            })?
            .clone();
        Ok(Self { handle })
    }

    /// `/metrics` in the Prometheus text format.
    pub fn router<S>(&self) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
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

/// One-time registration so series show up on /metrics.
pub fn ensure_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "market_cache_lookups_total",
            "Adapter cache lookups by platform and result (hit/miss)."
        );
        describe_counter!(
            "market_fetch_total",
            "Vendor fetches by platform and outcome (ok/stale/error)."
        );
        describe_counter!(
            "analysis_total",
            "Content analyses by source (llm/fallback)."
        );
        describe_counter!(
            "pipeline_requests_dropped_total",
            "Analysis requests dropped before queueing, by reason."
        );
        describe_counter!(
            "pipeline_runs_total",
            "Completed pipeline runs by outcome (ok/error)."
        );
        describe_histogram!("pipeline_run_ms", "Pipeline run time in milliseconds.");
        describe_gauge!("pipeline_queue_depth", "Requests waiting behind the current run.");
        describe_gauge!(
            "markets_last_refresh_ts",
            "Unix ts of the last periodic market refresh."
        );
    });
}

pub fn record_cache_lookup(platform: Platform, hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("market_cache_lookups_total", "platform" => platform.slug(), "result" => result)
        .increment(1);
}

pub fn record_fetch(platform: Platform, outcome: &'static str) {
    counter!("market_fetch_total", "platform" => platform.slug(), "outcome" => outcome).increment(1);
}

pub fn record_analysis(source: &'static str) {
    counter!("analysis_total", "source" => source).increment(1);
}

pub fn record_dropped(reason: &'static str) {
    counter!("pipeline_requests_dropped_total", "reason" => reason).increment(1);
}

pub fn record_run(outcome: &'static str, elapsed_ms: f64) {
    counter!("pipeline_runs_total", "outcome" => outcome).increment(1);
    histogram!("pipeline_run_ms").record(elapsed_ms);
}

pub fn set_queue_depth(depth: usize) {
    gauge!("pipeline_queue_depth").set(depth as f64);
}

pub fn mark_refresh(unix_ts: i64) {
    gauge!("markets_last_refresh_ts").set(unix_ts as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_is_idempotent_and_renders_pipeline_series() {
        let m = Metrics::install().expect("recorder");
        let again = Metrics::install().expect("shared recorder");
        record_dropped("rateLimited");
        record_cache_lookup(Platform::Kalshi, true);
        set_queue_depth(2);

        let text = again.handle.render();
        assert!(text.contains("pipeline_requests_dropped_total"));
        assert!(text.contains(r#"platform="kalshi""#));
        assert!(m.handle.render().contains("pipeline_queue_depth 2"));
    }
}
