//! Prometheus metrics for the item service.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! defines metric name constants, provides an axum middleware for HTTP RED
//! metrics, and exposes the `/metrics` endpoint handler.

use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

use crate::errors::StoreError;

// -- Metric name constants ----------------------------------------------------

/// Total HTTP requests (counter). Labels: method, path, status.
pub const HTTP_REQUESTS_TOTAL: &str = "itemstore_http_requests_total";

/// HTTP request duration in seconds (histogram). Labels: method, path.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "itemstore_http_request_duration_seconds";

/// Item store operations (counter). Labels: operation, status.
pub const ITEM_OPERATIONS_TOTAL: &str = "itemstore_item_operations_total";

/// Bytes written through the blob store (counter).
pub const BLOB_BYTES_WRITTEN_TOTAL: &str = "itemstore_blob_bytes_written_total";

// -- Global recorder installation ---------------------------------------------

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus recorder.  Idempotent, so tests may call it
/// repeatedly.  When another recorder is already installed the handle still
/// renders, just without the global samples.
pub fn init_metrics() -> &'static PrometheusHandle {
    PROMETHEUS_HANDLE.get_or_init(|| {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        if metrics::set_global_recorder(recorder).is_err() {
            tracing::warn!("a metrics recorder was already installed");
        }
        handle
    })
}

/// Register metric descriptions with the global recorder.
pub fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(ITEM_OPERATIONS_TOTAL, "Item store operations by type and outcome");
    describe_counter!(BLOB_BYTES_WRITTEN_TOTAL, "Total bytes written to the blob store");
}

/// Count one item store operation, labelled by outcome.
pub fn record_item_operation<T>(operation: &'static str, result: &Result<T, StoreError>) {
    let status = match result {
        Ok(_) => "ok",
        Err(err) => err.code(),
    };
    counter!(ITEM_OPERATIONS_TOTAL, "operation" => operation, "status" => status).increment(1);
}

pub fn record_blob_bytes_written(bytes: u64) {
    counter!(BLOB_BYTES_WRITTEN_TOTAL).increment(bytes);
}

// -- Metrics middleware -------------------------------------------------------

/// Axum middleware that records HTTP RED metrics for every request.
///
/// `/metrics` itself is not instrumented.
pub async fn metrics_middleware(
    req: Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    if req.uri().path() == "/metrics" {
        return next.run(req).await;
    }

    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    let start = Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

// -- Path normalization -------------------------------------------------------

/// Map a request path to its route template so ids and blob names do not
/// become label values.
///
/// - `/api/items/P001` -> `/api/items/{id}`
/// - `/api/blobs/a/b.txt` -> `/api/blobs/{name}`
/// - anything unrouted -> `/{other}`
fn normalize_path(path: &str) -> String {
    match path {
        "/" | "/health" | "/metrics" | "/openapi.json" | "/api/ping" | "/api/items" => {
            path.to_string()
        }
        _ if path.starts_with("/api/items/") => "/api/items/{id}".to_string(),
        _ if path.starts_with("/api/blobs/") => "/api/blobs/{name}".to_string(),
        _ => "/{other}".to_string(),
    }
}

// -- Metrics endpoint handler -------------------------------------------------

/// `GET /metrics` -- Render Prometheus exposition format text.
pub async fn metrics_handler() -> impl IntoResponse {
    let body = init_metrics().render();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
}
