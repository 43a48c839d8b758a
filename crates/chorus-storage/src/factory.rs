//! DSN-based backend selection.
//!
//! `file:///var/chorus/blobs` opens a local bucket; `s3://bucket-name?region=us-east-1&endpoint=http://…`
//! opens an S3-compatible one.

use std::collections::HashMap;
use std::sync::Arc;

use crate::local::LocalBucket;
use crate::s3::S3Bucket;
use crate::traits::{Bucket, StorageError, StorageResult};

pub async fn open_bucket(dsn: &str) -> StorageResult<Arc<dyn Bucket>> {
    let (scheme, rest) = dsn
        .split_once("://")
        .ok_or_else(|| StorageError::Config(format!("blob store DSN missing scheme: {dsn}")))?;

    match scheme {
        "file" => {
            let path = rest.split('?').next().unwrap_or(rest);
            Ok(Arc::new(LocalBucket::new(path).await?))
        }
        "s3" => {
            let (bucket_name, query) = match rest.split_once('?') {
                Some((b, q)) => (b, q),
                None => (rest, ""),
            };
            let params: HashMap<&str, &str> = query
                .split('&')
                .filter_map(|kv| kv.split_once('='))
                .collect();
            let region = params.get("region").unwrap_or(&"us-east-1").to_string();
            let endpoint = params.get("endpoint").map(|s| s.to_string());
            Ok(Arc::new(
                S3Bucket::new(bucket_name.to_string(), region, endpoint).await?,
            ))
        }
        other => Err(StorageError::Config(format!(
            "unsupported blob store scheme: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn file_dsn_opens_local_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let dsn = format!("file://{}", dir.path().display());
        let bucket = open_bucket(&dsn).await.unwrap();
        bucket
            .write_all("ab/x", Bytes::from_static(b"data"))
            .await
            .unwrap();
        assert!(bucket.exists("ab/x").await.unwrap());
    }

    #[tokio::test]
    async fn bad_scheme_is_config_error() {
        assert!(matches!(
            open_bucket("redis://nope").await,
            Err(StorageError::Config(_))
        ));
        assert!(matches!(
            open_bucket("no-scheme").await,
            Err(StorageError::Config(_))
        ));
    }
}
