//! HTTP request handlers.
//!
//! Handlers take the shared state plus already-extracted path and body
//! values; the thin axum extractor wrappers live in [`crate::server`].

pub mod blobs;
pub mod health;
pub mod items;
