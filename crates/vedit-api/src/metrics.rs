//! Prometheus metrics for the API server.

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

use vedit_queue::QueueStats;

/// Install the Prometheus recorder and return the handle that renders it.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "vedit_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "vedit_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "vedit_http_requests_in_flight";

    // WebSocket metrics
    pub const WS_CONNECTIONS_TOTAL: &str = "vedit_ws_connections_total";
    pub const WS_CONNECTIONS_ACTIVE: &str = "vedit_ws_connections_active";
    pub const WS_MESSAGES_SENT: &str = "vedit_ws_messages_sent_total";
    pub const WS_MESSAGES_RECEIVED: &str = "vedit_ws_messages_received_total";

    // Queue gauges, refreshed when stats are read
    pub const QUEUE_WAITING: &str = "vedit_queue_waiting";
    pub const QUEUE_DELAYED: &str = "vedit_queue_delayed";
    pub const QUEUE_ACTIVE: &str = "vedit_queue_active";

    pub const RATE_LIMIT_HITS_TOTAL: &str = "vedit_rate_limit_hits_total";
}

pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_ws_connection() {
    counter!(names::WS_CONNECTIONS_TOTAL).increment(1);
}

pub fn set_ws_active_connections(count: i64) {
    gauge!(names::WS_CONNECTIONS_ACTIVE).set(count as f64);
}

pub fn record_ws_message_sent(message_type: &str) {
    let labels = [("type", message_type.to_string())];
    counter!(names::WS_MESSAGES_SENT, &labels).increment(1);
}

pub fn record_ws_message_received() {
    counter!(names::WS_MESSAGES_RECEIVED).increment(1);
}

pub fn set_queue_stats(stats: &QueueStats) {
    gauge!(names::QUEUE_WAITING).set(stats.waiting as f64);
    gauge!(names::QUEUE_DELAYED).set(stats.delayed as f64);
    gauge!(names::QUEUE_ACTIVE).set(stats.active as f64);
}

pub fn record_rate_limit_hit(path: &str) {
    let labels = [("path", sanitize_path(path))];
    counter!(names::RATE_LIMIT_HITS_TOTAL, &labels).increment(1);
}

/// Replace render ids in a path so label cardinality stays bounded.
fn sanitize_path(path: &str) -> String {
    let mut out = Vec::new();
    let mut previous = "";
    for segment in path.split('/') {
        if previous == "render" && !matches!(segment, "start" | "queue") {
            out.push(":id");
        } else {
            out.push(segment);
        }
        previous = segment;
    }
    out.join("/")
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);
    let response = next.run(request).await;
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    record_http_request(
        &method,
        &path,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(
            sanitize_path("/api/render/550e8400-e29b-41d4-a716-446655440000/status"),
            "/api/render/:id/status"
        );
        assert_eq!(sanitize_path("/api/render/start"), "/api/render/start");
        assert_eq!(sanitize_path("/api/render/queue/stats"), "/api/render/queue/stats");
        assert_eq!(sanitize_path("/health"), "/health");
    }
}
