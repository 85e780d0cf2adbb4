//! Prometheus metrics exposition
//!
//! Gateway-side metrics:
//!
//! - `gateway_requests_total` (counter): labels `method`, `status`
//! - `gateway_request_duration_seconds` (histogram): label `status`
//!
//! The API client emits its own `tesla_api_requests_total` and
//! `tesla_api_discovery_fallbacks_total` through the same recorder.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// Configures `gateway_request_duration_seconds` with explicit buckets so it
/// renders as a histogram (`_bucket` lines) rather than the default summary.
/// Boundaries cover 5ms up to the 30s vendor-call timeout.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(
                "gateway_request_duration_seconds".to_string(),
            ),
            &[
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
            ],
        )
        .expect("failed to set histogram buckets")
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a completed gateway request with method and status labels.
pub fn record_request(method: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!("gateway_requests_total", "method" => method.to_string(), "status" => status_str.clone())
        .increment(1);
    metrics::histogram!("gateway_request_duration_seconds", "status" => status_str)
        .record(duration_secs);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusRecorder;

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        // When no recorder is installed, metrics calls are no-ops.
        record_request("GET", 200, 0.05);
    }

    /// Create an isolated recorder/handle pair for unit tests. Uses
    /// build_recorder() instead of install_recorder() because only one
    /// global recorder can exist per process.
    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                metrics_exporter_prometheus::Matcher::Full(
                    "gateway_request_duration_seconds".to_string(),
                ),
                &[
                    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
                ],
            )
            .expect("failed to set histogram buckets")
            .build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn record_request_increments_counter_and_histogram() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_request("GET", 200, 0.042);
        record_request("POST", 502, 1.5);

        let output = handle.render();
        assert!(output.contains("gateway_requests_total"));
        assert!(output.contains("status=\"200\""));
        assert!(output.contains("method=\"GET\""));
        assert!(output.contains("status=\"502\""));
        assert!(
            output.contains("gateway_request_duration_seconds_bucket"),
            "histogram must render _bucket lines for histogram_quantile() queries"
        );
    }

    #[test]
    fn histogram_buckets_cover_timeout_range() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_request("GET", 200, 0.003);

        let output = handle.render();
        assert!(output.contains("le=\"0.005\""), "5ms bucket must exist");
        assert!(
            output.contains("le=\"30\""),
            "30s bucket must exist (vendor-call timeout)"
        );
        assert!(output.contains("le=\"+Inf\""));
    }
}
