//! Bucket trait all storage backends implement.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("read failed: {0}")]
    ReadFailed(String),

    #[error("delete failed: {0}")]
    DeleteFailed(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Metadata for a stored object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobAttributes {
    pub size: u64,
    pub content_type: String,
    /// Hex SHA-256 of the content; doubles as a strong ETag.
    pub digest: String,
    pub mod_time: DateTime<Utc>,
}

pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Opaque key → bytes blob store with attributes.
///
/// Implementations must be safe to share across tasks. Content types are
/// sniffed from the payload at write time; callers never pass one.
#[async_trait]
pub trait Bucket: Send + Sync {
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    async fn attributes(&self, key: &str) -> StorageResult<BlobAttributes>;

    /// Read the whole object.
    async fn read(&self, key: &str) -> StorageResult<Bytes>;

    /// Read a byte range `[start, end)` of the object.
    async fn read_range(&self, key: &str, start: u64, end: u64) -> StorageResult<Bytes>;

    /// Stream the object in chunks.
    async fn read_stream(&self, key: &str) -> StorageResult<ByteStream>;

    /// Write the whole object, replacing any prior value.
    async fn write_all(&self, key: &str, data: Bytes) -> StorageResult<()>;

    async fn delete(&self, key: &str) -> StorageResult<()>;
}
