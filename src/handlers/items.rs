//! Item API handlers.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::info;

use crate::errors::StoreError;
use crate::items::Item;
use crate::AppState;

/// Envelope returned by item writes.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ItemWritten {
    /// `Created` or `Updated`.
    pub message: String,
    pub data: Item,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ItemDeleted {
    pub message: String,
    pub id: String,
}

/// Parse a JSON item body, mapping syntax errors to `SerializationError`.
fn parse_item(body: &[u8]) -> Result<Item, StoreError> {
    serde_json::from_slice(body).map_err(|e| StoreError::Serialization {
        message: format!("invalid item body: {e}"),
    })
}

#[utoipa::path(
    post,
    path = "/api/items",
    tag = "Item",
    operation_id = "CreateItem",
    request_body = Item,
    responses(
        (status = 200, description = "Item stored", body = ItemWritten),
        (status = 400, description = "Blank id or malformed body", body = crate::errors::ErrorBody),
        (status = 502, description = "Table backend unavailable", body = crate::errors::ErrorBody)
    )
)]
pub async fn create_item(state: Arc<AppState>, body: &[u8]) -> Result<Response, StoreError> {
    let item = parse_item(body)?;
    let data = state.items.create(item).await?;
    info!(id = %data.id, "item created");
    Ok((
        StatusCode::OK,
        Json(ItemWritten {
            message: "Created".to_string(),
            data,
        }),
    )
        .into_response())
}

#[utoipa::path(
    get,
    path = "/api/items/{id}",
    tag = "Item",
    operation_id = "GetItem",
    params(("id" = String, Path, description = "Item id")),
    responses(
        (status = 200, description = "The stored item", body = Item),
        (status = 404, description = "Item not found", body = crate::errors::ErrorBody),
        (status = 502, description = "Table backend unavailable", body = crate::errors::ErrorBody)
    )
)]
pub async fn get_item(state: Arc<AppState>, id: &str) -> Result<Response, StoreError> {
    let item = state.items.get(id).await?;
    Ok(Json(item).into_response())
}

#[utoipa::path(
    put,
    path = "/api/items/{id}",
    tag = "Item",
    operation_id = "ReplaceItem",
    params(("id" = String, Path, description = "Item id")),
    request_body = Item,
    responses(
        (status = 200, description = "Item created or replaced", body = ItemWritten),
        (status = 400, description = "Id mismatch or malformed body", body = crate::errors::ErrorBody),
        (status = 502, description = "Table backend unavailable", body = crate::errors::ErrorBody)
    )
)]
pub async fn replace_item(
    state: Arc<AppState>,
    id: &str,
    body: &[u8],
) -> Result<Response, StoreError> {
    let item = parse_item(body)?;
    let data = state.items.replace(id, item).await?;
    info!(id = %data.id, "item replaced");
    Ok(Json(ItemWritten {
        message: "Updated".to_string(),
        data,
    })
    .into_response())
}

#[utoipa::path(
    delete,
    path = "/api/items/{id}",
    tag = "Item",
    operation_id = "DeleteItem",
    params(("id" = String, Path, description = "Item id")),
    responses(
        (status = 200, description = "Item deleted", body = ItemDeleted),
        (status = 404, description = "Item not found", body = crate::errors::ErrorBody)
    )
)]
pub async fn delete_item(state: Arc<AppState>, id: &str) -> Result<Response, StoreError> {
    state.items.delete(id).await?;
    info!(id, "item deleted");
    Ok(Json(ItemDeleted {
        message: "Deleted".to_string(),
        id: id.to_string(),
    })
    .into_response())
}

#[utoipa::path(
    get,
    path = "/api/items",
    tag = "Item",
    operation_id = "ListItems",
    responses(
        (status = 200, description = "All items ordered by id", body = Vec<Item>),
        (status = 502, description = "Table backend unavailable", body = crate::errors::ErrorBody)
    )
)]
pub async fn list_items(state: Arc<AppState>) -> Result<Response, StoreError> {
    let items = state.items.list().await?;
    Ok(Json(items).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_item_ok() {
        let item = parse_item(br#"{"id":"P001","value":"Laptop"}"#).unwrap();
        assert_eq!(item, Item::new("P001", "Laptop"));
    }

    #[test]
    fn test_parse_item_malformed() {
        let err = parse_item(b"{not json").unwrap_err();
        assert!(matches!(err, StoreError::Serialization { .. }));
        assert_eq!(err.code(), "SerializationError");
    }

    #[test]
    fn test_parse_item_wrong_type() {
        let err = parse_item(br#"{"id": 5, "value": "x"}"#).unwrap_err();
        assert!(matches!(err, StoreError::Serialization { .. }));
    }
}
