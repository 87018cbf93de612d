//! Typed error taxonomy for item and blob operations.
//!
//! Backends work in `anyhow::Result`; the [`crate::items::ItemStore`] and
//! [`crate::blobs::BlobStore`] facades translate every failure into a
//! [`StoreError`].  The enum implements [`axum::response::IntoResponse`]
//! so handlers can simply return `Err(StoreError::NotFound { .. })`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

/// Generate a 16-character hex request ID.
pub fn generate_request_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes).to_uppercase()
}

/// Failures surfaced by the item and blob stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Client-supplied data failed validation.
    #[error("{message}")]
    InvalidInput { message: String },

    /// No item exists at the requested id.
    #[error("Item not found")]
    NotFound { id: String },

    /// No blob exists under the requested name.
    #[error("Blob not found")]
    BlobNotFound { name: String },

    /// The request body could not be parsed.
    #[error("{message}")]
    Serialization { message: String },

    /// The backing store could not be reached, rejected our credentials,
    /// or did not answer before the deadline.
    #[error("The storage backend is unavailable")]
    BackendUnavailable(#[source] anyhow::Error),
}

impl StoreError {
    /// Shorthand for an [`StoreError::InvalidInput`] with the given message.
    pub fn invalid(message: impl Into<String>) -> Self {
        StoreError::InvalidInput {
            message: message.into(),
        }
    }

    /// Machine-readable error code rendered in the response body.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::InvalidInput { .. } => "InvalidInput",
            StoreError::NotFound { .. } => "NotFound",
            StoreError::BlobNotFound { .. } => "NotFound",
            StoreError::Serialization { .. } => "SerializationError",
            StoreError::BackendUnavailable(_) => "BackendUnavailable",
        }
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            StoreError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
            StoreError::BlobNotFound { .. } => StatusCode::NOT_FOUND,
            StoreError::Serialization { .. } => StatusCode::BAD_REQUEST,
            StoreError::BackendUnavailable(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

/// JSON error body.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    /// Error code, e.g. `NotFound`.
    pub error: String,
    /// Human-readable message. Never contains backend details.
    pub message: String,
    /// Request ID, echoed in the `x-request-id` header.
    pub request_id: String,
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let request_id = generate_request_id();
        let status = self.status_code();

        match &self {
            StoreError::BackendUnavailable(source) => {
                error!(request_id = %request_id, "storage backend failure: {:#}", source);
            }
            other => {
                warn!(request_id = %request_id, code = other.code(), "request rejected: {}", other);
            }
        }

        let body = ErrorBody {
            error: self.code().to_string(),
            message: self.to_string(),
            request_id: request_id.clone(),
        };

        (status, [("x-request-id", request_id)], axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_format() {
        let id = generate_request_id();
        assert_eq!(id.len(), 16);
        assert!(id
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            StoreError::invalid("bad").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            StoreError::NotFound { id: "x".into() }.status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            StoreError::Serialization {
                message: "eof".into()
            }
            .status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            StoreError::BackendUnavailable(anyhow::anyhow!("down")).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_not_found_message() {
        let err = StoreError::NotFound { id: "P999".into() };
        assert_eq!(err.to_string(), "Item not found");
    }

    #[tokio::test]
    async fn test_backend_error_does_not_leak_source() {
        let err = StoreError::BackendUnavailable(anyhow::anyhow!(
            "AccountKey=c2VjcmV0 rejected by upstream"
        ));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(response.headers().contains_key("x-request-id"));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(!text.contains("AccountKey"));
        assert!(text.contains("BackendUnavailable"));
    }
}
