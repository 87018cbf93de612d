//! Item table storage layer.
//!
//! The [`store::TableBackend`] trait defines the row-level contract;
//! [`memory`], [`sqlite`] and [`dynamodb`] implement it.  Callers go
//! through [`crate::items::ItemStore`] rather than a backend directly.

pub mod dynamodb;
pub mod memory;
pub mod sqlite;
pub mod store;
