//! Object storage access for the provisioner.
//!
//! This module provides:
//! - [`SessionFactory`]: opens an authenticated [`StorageSession`] from an [`AccessConfig`]
//! - [`StorageSession`]: fetches an object as an [`ObjectBody`] byte stream
//! - [`S3SessionFactory`]: production implementation backed by `object_store`'s S3 client
//! - [`StaticSessionFactory`]: serves pre-built stores, e.g. in-memory or local directories

mod s3;

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::ObjectStore;
use object_store::path::Path;
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::io::StreamReader;

use crate::config::AccessConfig;

pub use s3::{S3Session, S3SessionFactory};

/// Readable byte stream of a fetched object.
///
/// Dropping the body releases the underlying connection.
pub struct ObjectBody {
    reader: Pin<Box<dyn AsyncRead + Send>>,
    size: Option<u64>,
}

impl ObjectBody {
    pub fn new(reader: impl AsyncRead + Send + 'static, size: Option<u64>) -> Self {
        Self {
            reader: Box::pin(reader),
            size,
        }
    }

    /// Creates a body over an in-memory buffer.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let size = data.len() as u64;
        Self::new(io::Cursor::new(data), Some(size))
    }

    /// Size reported by the backend, if known.
    pub fn size(&self) -> Option<u64> {
        self.size
    }
}

impl fmt::Debug for ObjectBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectBody").field("size", &self.size).finish_non_exhaustive()
    }
}

impl AsyncRead for ObjectBody {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.reader.as_mut().poll_read(cx, buf)
    }
}

/// Trait for opening storage sessions.
///
/// Implementations must fail here, before any object request is issued, when
/// the credentials cannot be resolved into a usable session.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Opens a session on `bucket` using the given credentials.
    async fn session(&self, access: &AccessConfig, bucket: &str) -> Result<Box<dyn StorageSession>>;
}

/// An authenticated connection to one bucket.
#[async_trait]
pub trait StorageSession: Send + Sync {
    /// Fetches `key` from the session's bucket.
    ///
    /// Returns once the object is found and its body is ready to be read.
    /// Callers bound this call with a deadline; implementations must stay
    /// cancel-safe (dropping the future aborts the request).
    async fn get_object(&self, key: &str) -> Result<ObjectBody>;
}

/// Issues a GET against `store` and wraps the response stream.
pub(crate) async fn get_from_store(store: &dyn ObjectStore, key: &str) -> Result<ObjectBody> {
    let path = Path::from(key);
    let result = store
        .get(&path)
        .await
        .with_context(|| format!("failed to get object {}", key))?;
    let size = result.meta.size;
    let stream = result.into_stream().map_err(io::Error::other);
    Ok(ObjectBody::new(StreamReader::new(stream), Some(size)))
}

/// Session factory serving a fixed set of stores keyed by bucket name.
///
/// Credentials are ignored; the stores are expected to be configured
/// already. Useful for local directories (`object_store::local`) and tests
/// (`object_store::memory`).
#[derive(Clone, Default)]
pub struct StaticSessionFactory {
    buckets: HashMap<String, Arc<dyn ObjectStore>>,
}

impl StaticSessionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `store` as the backend of `bucket`.
    #[must_use]
    pub fn with_bucket(mut self, bucket: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        self.buckets.insert(bucket.into(), store);
        self
    }
}

#[async_trait]
impl SessionFactory for StaticSessionFactory {
    async fn session(&self, _access: &AccessConfig, bucket: &str) -> Result<Box<dyn StorageSession>> {
        Ok(Box::new(StaticSession {
            bucket: bucket.to_string(),
            store: self.buckets.get(bucket).cloned(),
        }))
    }
}

struct StaticSession {
    bucket: String,
    store: Option<Arc<dyn ObjectStore>>,
}

#[async_trait]
impl StorageSession for StaticSession {
    async fn get_object(&self, key: &str) -> Result<ObjectBody> {
        let store = self
            .store
            .as_ref()
            .with_context(|| format!("no such bucket: {}", self.bucket))?;
        get_from_store(store.as_ref(), key).await
    }
}
