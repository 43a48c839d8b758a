//! S3-compatible bucket backend.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream as S3ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;

use crate::sniff::sniff_content_type;
use crate::traits::{BlobAttributes, Bucket, ByteStream, StorageError, StorageResult};

#[derive(Clone)]
pub struct S3Bucket {
    client: Client,
    bucket: String,
}

impl S3Bucket {
    /// Build a client for AWS or any S3-compatible endpoint (path-style
    /// addressing when an explicit endpoint is given, as MinIO requires).
    pub async fn new(
        bucket: String,
        region: String,
        endpoint_url: Option<String>,
    ) -> StorageResult<Self> {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region))
            .load()
            .await;

        let client = if let Some(endpoint) = endpoint_url {
            let s3_config = aws_sdk_s3::config::Builder::from(&config)
                .endpoint_url(endpoint)
                .force_path_style(true)
                .build();
            Client::from_conf(s3_config)
        } else {
            Client::new(&config)
        };

        Ok(S3Bucket { client, bucket })
    }

    fn map_sdk_err<E: std::fmt::Display>(key: &str, err: E) -> StorageError {
        let msg = err.to_string();
        if msg.contains("NoSuchKey") || msg.contains("NotFound") {
            StorageError::NotFound(key.to_string())
        } else {
            StorageError::Backend(msg)
        }
    }
}

#[async_trait]
impl Bucket for S3Bucket {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(StorageError::Backend(service_err.to_string()))
                }
            }
        }
    }

    async fn attributes(&self, key: &str) -> StorageResult<BlobAttributes> {
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let service_err = e.into_service_error();
                if service_err.is_not_found() {
                    StorageError::NotFound(key.to_string())
                } else {
                    StorageError::Backend(service_err.to_string())
                }
            })?;

        let mod_time = head
            .last_modified()
            .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), 0))
            .unwrap_or_else(Utc::now);

        Ok(BlobAttributes {
            size: head.content_length().unwrap_or(0).max(0) as u64,
            content_type: head
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string(),
            digest: head
                .e_tag()
                .map(|t| t.trim_matches('"').to_string())
                .unwrap_or_default(),
            mod_time,
        })
    }

    async fn read(&self, key: &str) -> StorageResult<Bytes> {
        let obj = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Self::map_sdk_err(key, e.into_service_error()))?;
        let data = obj
            .body
            .collect()
            .await
            .map_err(|e| StorageError::ReadFailed(format!("collect body: {e}")))?;
        Ok(data.into_bytes())
    }

    async fn read_range(&self, key: &str, start: u64, end: u64) -> StorageResult<Bytes> {
        let obj = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .range(format!("bytes={}-{}", start, end.saturating_sub(1)))
            .send()
            .await
            .map_err(|e| Self::map_sdk_err(key, e.into_service_error()))?;
        let data = obj
            .body
            .collect()
            .await
            .map_err(|e| StorageError::ReadFailed(format!("collect range: {e}")))?;
        Ok(data.into_bytes())
    }

    async fn read_stream(&self, key: &str) -> StorageResult<ByteStream> {
        let obj = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Self::map_sdk_err(key, e.into_service_error()))?;
        let stream = tokio_util::io::ReaderStream::new(obj.body.into_async_read())
            .map(|r| r.map_err(StorageError::from));
        Ok(Box::pin(stream))
    }

    async fn write_all(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let content_type = sniff_content_type(&data);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(S3ByteStream::from(data))
            .send()
            .await
            .map_err(|e| StorageError::WriteFailed(e.into_service_error().to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::DeleteFailed(e.into_service_error().to_string()))?;
        Ok(())
    }
}
