//! Blob API handlers.

use std::sync::Arc;

use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde::Serialize;
use tracing::info;

use crate::errors::StoreError;
use crate::AppState;

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct BlobUploaded {
    pub message: String,
    pub name: String,
    pub etag: String,
    pub size: u64,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct BlobDeleted {
    pub message: String,
    pub name: String,
}

#[utoipa::path(
    put,
    path = "/api/blobs/{name}",
    tag = "Blob",
    operation_id = "UploadBlob",
    params(("name" = String, Path, description = "Blob name, may contain '/'")),
    request_body(content = Vec<u8>, content_type = "application/octet-stream"),
    responses(
        (status = 200, description = "Blob stored", body = BlobUploaded),
        (status = 400, description = "Invalid blob name", body = crate::errors::ErrorBody),
        (status = 502, description = "Blob backend unavailable", body = crate::errors::ErrorBody)
    )
)]
pub async fn upload_blob(
    state: Arc<AppState>,
    name: &str,
    body: Bytes,
) -> Result<Response, StoreError> {
    let saved = state.blobs.save(name, body).await?;
    info!(name = %saved.name, size = saved.size, "blob uploaded");
    Ok(Json(BlobUploaded {
        message: "Uploaded".to_string(),
        name: saved.name,
        etag: saved.etag,
        size: saved.size,
    })
    .into_response())
}

#[utoipa::path(
    get,
    path = "/api/blobs/{name}",
    tag = "Blob",
    operation_id = "DownloadBlob",
    params(("name" = String, Path, description = "Blob name")),
    responses(
        (status = 200, description = "Blob bytes", body = Vec<u8>, content_type = "application/octet-stream"),
        (status = 404, description = "Blob not found", body = crate::errors::ErrorBody)
    )
)]
pub async fn download_blob(state: Arc<AppState>, name: &str) -> Result<Response, StoreError> {
    let data = state.blobs.get(name).await?;
    let etag = crate::storage::backend::md5_etag(&data);

    let mut response = data.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    if let Ok(value) = HeaderValue::from_str(&etag) {
        headers.insert(header::ETAG, value);
    }
    Ok(response)
}

#[utoipa::path(
    delete,
    path = "/api/blobs/{name}",
    tag = "Blob",
    operation_id = "DeleteBlob",
    params(("name" = String, Path, description = "Blob name")),
    responses(
        (status = 200, description = "Blob deleted (or already absent)", body = BlobDeleted),
        (status = 400, description = "Invalid blob name", body = crate::errors::ErrorBody)
    )
)]
pub async fn delete_blob(state: Arc<AppState>, name: &str) -> Result<Response, StoreError> {
    state.blobs.delete(name).await?;
    info!(name, "blob deleted");
    Ok(Json(BlobDeleted {
        message: "Deleted".to_string(),
        name: name.to_string(),
    })
    .into_response())
}
