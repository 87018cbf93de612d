//! Axum router construction and route mapping.
//!
//! The [`app`] function wires every endpoint to its handler and returns a
//! ready-to-serve [`axum::Router`].  The `handle_*` functions here only
//! run the extractors and forward to [`crate::handlers`].

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderValue, Request},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::future::{Future, IntoFuture};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::warn;
use utoipa::OpenApi;

use crate::errors::{generate_request_id, StoreError};
use crate::handlers::{blobs, health, items};
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::AppState;

/// Blob uploads larger than this are rejected by axum with 413.
const MAX_BLOB_BYTES: usize = 256 * 1024 * 1024;

// -- OpenAPI document ---------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    info(
        title = "itemstore API",
        version = "0.1.0",
        description = "Item table and blob storage service"
    ),
    paths(
        health::health_check,
        health::ping,
        items::create_item,
        items::get_item,
        items::replace_item,
        items::delete_item,
        items::list_items,
        blobs::upload_blob,
        blobs::download_blob,
        blobs::delete_blob,
    ),
    tags(
        (name = "Health", description = "Liveness endpoints"),
        (name = "Item", description = "Item table operations"),
        (name = "Blob", description = "Blob container operations"),
    )
)]
struct ApiDoc;

/// Build the axum [`Router`] with all routes.
pub fn app(state: Arc<AppState>) -> Router {
    let observability = state.config.observability.clone();

    let mut router = Router::new()
        .route("/api/ping", get(health::ping))
        .route("/api/items", get(handle_list_items).post(handle_create_item))
        .route(
            "/api/items/:id",
            get(handle_get_item)
                .put(handle_replace_item)
                .delete(handle_delete_item),
        )
        .route(
            "/api/blobs/*name",
            get(handle_download_blob)
                .put(handle_upload_blob)
                .delete(handle_delete_blob),
        )
        .route("/openapi.json", get(openapi_json));

    if observability.health_check {
        router = router.route("/health", get(health::health_check));
    }
    if observability.metrics {
        router = router.route("/metrics", get(metrics_handler));
    }

    let router = router
        .with_state(state)
        // common_headers_middleware is inner (sees handler and error responses).
        .layer(middleware::from_fn(common_headers_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(MAX_BLOB_BYTES));

    if observability.metrics {
        // metrics_middleware is outermost (captures full request lifecycle).
        router.layer(middleware::from_fn(metrics_middleware))
    } else {
        router
    }
}

async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

// -- Common headers middleware -----------------------------------------------

/// Adds to every response:
/// - `x-request-id`: 16-character uppercase hex string, unless the error
///   renderer already set one
/// - `server`: `itemstore`
async fn common_headers_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    if !headers.contains_key("x-request-id") {
        if let Ok(value) = HeaderValue::from_str(&generate_request_id()) {
            headers.insert("x-request-id", value);
        }
    }
    headers.insert(http::header::SERVER, HeaderValue::from_static("itemstore"));

    response
}

// -- Item routes -------------------------------------------------------------

/// `POST /api/items`
async fn handle_create_item(
    State(state): State<Arc<AppState>>,
    body: axum::body::Bytes,
) -> Result<Response, StoreError> {
    items::create_item(state, &body).await
}

/// `GET /api/items`
async fn handle_list_items(State(state): State<Arc<AppState>>) -> Result<Response, StoreError> {
    items::list_items(state).await
}

/// `GET /api/items/:id`
async fn handle_get_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, StoreError> {
    items::get_item(state, &id).await
}

/// `PUT /api/items/:id`
async fn handle_replace_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: axum::body::Bytes,
) -> Result<Response, StoreError> {
    items::replace_item(state, &id, &body).await
}

/// `DELETE /api/items/:id`
async fn handle_delete_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, StoreError> {
    items::delete_item(state, &id).await
}

// -- Blob routes -------------------------------------------------------------

/// `PUT /api/blobs/*name`
async fn handle_upload_blob(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    body: axum::body::Bytes,
) -> Result<Response, StoreError> {
    blobs::upload_blob(state, &name, body).await
}

/// `GET /api/blobs/*name`
async fn handle_download_blob(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Response, StoreError> {
    blobs::download_blob(state, &name).await
}

/// `DELETE /api/blobs/*name`
async fn handle_delete_blob(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Response, StoreError> {
    blobs::delete_blob(state, &name).await
}

// -- Serving -----------------------------------------------------------------

/// Serve `app` until `shutdown` resolves, then give in-flight requests up
/// to `grace` to finish before returning anyway.
pub async fn serve<F>(
    listener: tokio::net::TcpListener,
    app: Router,
    shutdown: F,
    grace: Duration,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (signalled_tx, signalled_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown.await;
        let _ = signalled_tx.send(());
    });
    let grace_expired = async move {
        if signalled_rx.await.is_err() {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        result = server.into_future() => result?,
        _ = grace_expired => {
            warn!("shutdown grace period of {:?} elapsed, dropping open connections", grace);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobs::BlobStore;
    use crate::config::Config;
    use crate::items::ItemStore;
    use crate::storage::memory::MemoryBlobBackend;
    use crate::table::memory::MemoryTableBackend;
    use axum::body::Body;
    use axum::http::StatusCode;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_state(config: Config) -> Arc<AppState> {
        Arc::new(AppState {
            config,
            items: Arc::new(ItemStore::new(
                Arc::new(MemoryTableBackend::new("items")),
                "items",
                Duration::from_secs(5),
            )),
            blobs: Arc::new(BlobStore::new(
                Arc::new(MemoryBlobBackend::new("blobs")),
                Duration::from_secs(5),
            )),
        })
    }

    fn test_app() -> Router {
        app(test_state(Config::default()))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Body) -> Response {
        app.clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(body)
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_create_then_get_item() {
        let app = test_app();

        let response = send(
            &app,
            "POST",
            "/api/items",
            Body::from(r#"{"id":"P001","value":"Laptop"}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"message": "Created", "data": {"id": "P001", "value": "Laptop"}})
        );

        let response = send(&app, "GET", "/api/items/P001", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"id": "P001", "value": "Laptop"})
        );
    }

    #[tokio::test]
    async fn test_get_missing_item_is_404() {
        let app = test_app();
        let response = send(&app, "GET", "/api/items/P999", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let request_id = response
            .headers()
            .get("x-request-id")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        let body = body_json(response).await;
        assert_eq!(body["error"], "NotFound");
        assert_eq!(body["message"], "Item not found");
        // Header and body agree on the request id.
        assert_eq!(body["request_id"], request_id);
    }

    #[tokio::test]
    async fn test_create_rejects_blank_and_missing_id() {
        let app = test_app();
        for body in [r#"{"id":"","value":"x"}"#, r#"{"value":"x"}"#, r#"{"id":"  "}"#] {
            let response = send(&app, "POST", "/api/items", Body::from(body)).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body {body}");
            assert_eq!(body_json(response).await["error"], "InvalidInput");
        }
    }

    #[tokio::test]
    async fn test_create_rejects_malformed_json() {
        let app = test_app();
        let response = send(&app, "POST", "/api/items", Body::from("{oops")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "SerializationError");
    }

    #[tokio::test]
    async fn test_replace_list_delete() {
        let app = test_app();

        let response = send(
            &app,
            "PUT",
            "/api/items/B",
            Body::from(r#"{"value":"second"}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"message": "Updated", "data": {"id": "B", "value": "second"}})
        );
        send(
            &app,
            "POST",
            "/api/items",
            Body::from(r#"{"id":"A","value":"first"}"#),
        )
        .await;

        let response = send(&app, "GET", "/api/items", Body::empty()).await;
        assert_eq!(
            body_json(response).await,
            serde_json::json!([
                {"id": "A", "value": "first"},
                {"id": "B", "value": "second"}
            ])
        );

        let response = send(&app, "DELETE", "/api/items/A", Body::empty()).await;
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"message": "Deleted", "id": "A"})
        );
        let response = send(&app, "DELETE", "/api/items/A", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_replace_id_mismatch_is_400() {
        let app = test_app();
        let response = send(
            &app,
            "PUT",
            "/api/items/A",
            Body::from(r#"{"id":"B","value":"x"}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_blob_round_trip() {
        let app = test_app();

        let response = send(
            &app,
            "PUT",
            "/api/blobs/reports/2026.txt",
            Body::from("hello blob"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let uploaded = body_json(response).await;
        assert_eq!(uploaded["message"], "Uploaded");
        assert_eq!(uploaded["name"], "reports/2026.txt");
        assert_eq!(uploaded["size"], 10);

        let response = send(&app, "GET", "/api/blobs/reports/2026.txt", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"],
            "application/octet-stream"
        );
        assert_eq!(response.headers()["etag"], uploaded["etag"].as_str().unwrap());
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"hello blob");

        let response = send(&app, "DELETE", "/api/blobs/reports/2026.txt", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let response = send(&app, "GET", "/api/blobs/reports/2026.txt", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["message"], "Blob not found");
    }

    #[tokio::test]
    async fn test_blob_traversal_rejected() {
        let app = test_app();
        let response = send(&app, "PUT", "/api/blobs/a/../../etc", Body::from("x")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_common_headers_present() {
        let app = test_app();
        for uri in ["/api/ping", "/api/items/P999"] {
            let response = send(&app, "GET", uri, Body::empty()).await;
            assert_eq!(response.headers()["server"], "itemstore");
            let request_id = response.headers()["x-request-id"].to_str().unwrap();
            assert_eq!(request_id.len(), 16);
        }
    }

    #[tokio::test]
    async fn test_ping_and_health() {
        let app = test_app();
        let response = send(&app, "GET", "/api/ping", Body::empty()).await;
        let body = body_json(response).await;
        assert!(body["message"].as_str().unwrap().starts_with("Pang "));

        let response = send(&app, "GET", "/health", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn test_health_can_be_disabled() {
        let mut config = Config::default();
        config.observability.health_check = false;
        config.observability.metrics = false;
        let app = app(test_state(config));

        let response = send(&app, "GET", "/health", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = send(&app, "GET", "/metrics", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_openapi_document() {
        let app = test_app();
        let response = send(&app, "GET", "/openapi.json", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let doc = body_json(response).await;
        assert!(doc["paths"]["/api/items"].is_object());
        assert!(doc["paths"]["/api/items/{id}"]["get"].is_object());
    }

    #[tokio::test]
    async fn test_serve_stops_after_grace_period() {
        use tokio::io::AsyncWriteExt;

        let slow = Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                "done"
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve(
            listener,
            slow,
            async move {
                let _ = stop_rx.await;
            },
            Duration::from_millis(200),
        ));

        let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"GET /slow HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = std::time::Instant::now();
        stop_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("server ignored the grace period")
            .unwrap()
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
