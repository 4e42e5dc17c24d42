use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the global Prometheus recorder
///
/// Fails if a recorder is already installed (e.g., a second server in the
/// same process).
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;

    init_metric_descriptions();

    Ok(handle)
}

/// Initialize metric descriptions (can be called multiple times safely)
fn init_metric_descriptions() {
    describe_counter!(
        "http_server_requests_total",
        "Total number of HTTP requests served"
    );
    describe_histogram!(
        "http_server_request_duration_seconds",
        "HTTP request duration in seconds"
    );
    describe_counter!(
        "telemetry_sink_failures_total",
        "Log events a sink failed to accept"
    );
    describe_gauge!(
        "telemetry_service_info",
        "Service version and build information"
    );

    gauge!("telemetry_service_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);
}

/// Record a served request
pub fn record_http_request(method: &str, route: &str, status: u16, duration: Duration) {
    counter!(
        "http_server_requests_total",
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status" => status.to_string(),
    )
    .increment(1);

    histogram!(
        "http_server_request_duration_seconds",
        "method" => method.to_string(),
        "route" => route.to_string(),
    )
    .record(duration.as_secs_f64());
}

/// Record a sink that failed to accept an event
pub fn record_sink_failure(sink: &str) {
    counter!("telemetry_sink_failures_total", "sink" => sink.to_string()).increment(1);
}
