use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Register descriptions for every engine metric.
pub fn describe() {
    metrics::describe_counter!(
        "submission_jobs_enqueued_total",
        "Jobs created from payment confirmations"
    );
    metrics::describe_counter!(
        "submission_jobs_settled_total",
        "Jobs that reached a terminal status"
    );
    metrics::describe_counter!(
        "submission_units_claimed_total",
        "Submission units claimed by workers"
    );
    metrics::describe_counter!(
        "submission_attempts_total",
        "Committed submission attempts by decision"
    );
    metrics::describe_histogram!(
        "submission_processing_seconds",
        "Time spent on one submission attempt, CAPTCHA retries included"
    );
    metrics::describe_gauge!(
        "submission_queue_depth",
        "Units waiting in the queue"
    );
}

/// Prometheus metrics scrape endpoint.
/// Returns metrics in Prometheus text exposition format.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}
