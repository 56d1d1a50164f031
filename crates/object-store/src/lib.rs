//! Object Storage Backend
//!
//! This crate provides the blob layer used by filevault: opaque byte payloads
//! stored under caller-chosen keys in pluggable object storage
//! (S3/MinIO/local filesystem/memory).
//!
//! # Features
//!
//! - A [`BlobStore`] trait so the storage core never depends on a concrete backend
//! - Multiple storage backends: S3, MinIO, local filesystem, in-memory
//! - Presigned download URLs on S3-compatible backends
//!
//! # Example
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use filevault_object_store::{BlobStore, ObjectStorage, ObjectStoreConfig};
//!
//! # async fn example() -> Result<(), filevault_object_store::BlobStoreError> {
//! let store = ObjectStorage::new(ObjectStoreConfig::Memory).await?;
//! store.put("1/abc/report.pdf", Bytes::from("hello"), Some("application/pdf")).await?;
//! let data = store.get("1/abc/report.pdf").await?;
//! assert_eq!(data, Bytes::from("hello"));
//! # Ok(())
//! # }
//! ```

mod blob_store;
mod error;
mod storage;

pub use blob_store::{BlobStore, BlobStream};
pub use error::{BlobStoreError, Result};
pub use storage::{ObjectStorage, ObjectStoreConfig};
