//! The blob store capability consumed by the storage core.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::TryStreamExt;
use url::Url;

use crate::error::Result;

/// A stream of blob chunks.
pub type BlobStream = BoxStream<'static, Result<Bytes>>;

/// Put/get/remove of opaque byte payloads by storage key.
///
/// Keys are chosen by the caller and treated as opaque strings; the
/// conventional layout is `{ownerId}/{randomId}/{originalName}`.
#[async_trait::async_trait]
pub trait BlobStore: std::fmt::Debug + Send + Sync {
    /// Store `data` under `key`, replacing anything already there.
    async fn put(&self, key: &str, data: Bytes, content_type: Option<&str>) -> Result<()>;

    /// Open a stream over the blob stored under `key`.
    async fn get_stream(&self, key: &str) -> Result<BlobStream>;

    /// Remove the blob under `key`. Removing a missing blob is not an error.
    async fn remove(&self, key: &str) -> Result<()>;

    /// A time-limited URL that downloads the blob without further auth.
    async fn presigned_get(&self, key: &str, ttl: Duration) -> Result<Url>;

    /// Read the whole blob into memory.
    async fn get(&self, key: &str) -> Result<Bytes> {
        let mut stream = self.get_stream(key).await?;
        let mut buf = BytesMut::new();
        while let Some(chunk) = stream.try_next().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }
}
