use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the process-wide Prometheus recorder. Call once, from the binary.
    pub fn init() -> Result<Self, BuildError> {
        let handle = PrometheusBuilder::new().install_recorder()?;
        describe();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
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

fn describe() {
    describe_counter!("topics_refresh_attempts_total", "Refresh attempts started.");
    describe_counter!(
        "topics_refresh_failures_total",
        "Refresh attempts that failed (transport, timeout, malformed or empty)."
    );
    describe_histogram!("topics_refresh_fetch_ms", "Provider fetch time in milliseconds.");
    describe_gauge!("topics_snapshot_generation", "Generation of the published snapshot.");
    describe_gauge!("topics_snapshot_size", "Topics in the published snapshot.");
    describe_gauge!(
        "topics_refresh_consecutive_failures",
        "Current streak of failed refresh attempts."
    );
    describe_counter!("topics_provider_items_total", "Topics parsed from upstream pages.");
    describe_histogram!("topics_provider_parse_ms", "Upstream page parse time in milliseconds.");
}
