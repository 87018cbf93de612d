//! Blob storage backends.
//!
//! The [`backend::BlobBackend`] trait abstracts over where blob bytes
//! physically live: process memory, the local filesystem, or an Azure
//! Blob Storage container.

pub mod azure;
pub mod backend;
pub mod local;
pub mod memory;
