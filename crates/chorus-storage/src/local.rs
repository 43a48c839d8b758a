//! Local filesystem bucket.
//!
//! Each object lives at `{base}/{key}` with a JSON sidecar `{path}.attrs`
//! holding content type and content digest, so `attributes` never has to
//! re-hash the payload.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use crate::sniff::sniff_content_type;
use crate::traits::{BlobAttributes, Bucket, ByteStream, StorageError, StorageResult};

const ATTRS_SUFFIX: &str = ".attrs";

#[derive(Debug, Serialize, Deserialize)]
struct SidecarAttrs {
    content_type: String,
    digest: String,
}

#[derive(Clone)]
pub struct LocalBucket {
    base_path: PathBuf,
}

impl LocalBucket {
    pub async fn new(base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::Config(format!(
                "failed to create bucket directory {}: {e}",
                base_path.display()
            ))
        })?;
        Ok(LocalBucket { base_path })
    }

    fn key_to_path(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() || key.contains("..") || key.starts_with('/') {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.base_path.join(key))
    }

    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    fn attrs_path(path: &Path) -> PathBuf {
        let mut s = path.as_os_str().to_owned();
        s.push(ATTRS_SUFFIX);
        PathBuf::from(s)
    }

    async fn read_sidecar(&self, path: &Path) -> Option<SidecarAttrs> {
        let raw = fs::read(Self::attrs_path(path)).await.ok()?;
        serde_json::from_slice(&raw).ok()
    }
}

#[async_trait]
impl Bucket for LocalBucket {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.key_to_path(key)?;
        Ok(fs::try_exists(&path).await.unwrap_or(false))
    }

    async fn attributes(&self, key: &str) -> StorageResult<BlobAttributes> {
        let path = self.key_to_path(key)?;
        let meta = fs::metadata(&path)
            .await
            .map_err(|_| StorageError::NotFound(key.to_string()))?;
        if !meta.is_file() {
            return Err(StorageError::NotFound(key.to_string()));
        }
        let mod_time: DateTime<Utc> = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        // Sidecar is written with the object; fall back to re-hashing for
        // objects that predate it.
        let sidecar = match self.read_sidecar(&path).await {
            Some(s) => s,
            None => {
                let data = fs::read(&path).await?;
                SidecarAttrs {
                    content_type: sniff_content_type(&data).to_string(),
                    digest: hex::encode(Sha256::digest(&data)),
                }
            }
        };

        Ok(BlobAttributes {
            size: meta.len(),
            content_type: sidecar.content_type,
            digest: sidecar.digest,
            mod_time,
        })
    }

    async fn read(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.key_to_path(key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(StorageError::ReadFailed(format!(
                "read {}: {e}",
                path.display()
            ))),
        }
    }

    async fn read_range(&self, key: &str, start: u64, end: u64) -> StorageResult<Bytes> {
        let path = self.key_to_path(key)?;
        let mut file = fs::File::open(&path)
            .await
            .map_err(|_| StorageError::NotFound(key.to_string()))?;
        file.seek(std::io::SeekFrom::Start(start)).await?;
        let len = end.saturating_sub(start) as usize;
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let n = file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(Bytes::from(buf))
    }

    async fn read_stream(&self, key: &str) -> StorageResult<ByteStream> {
        let path = self.key_to_path(key)?;
        let file = fs::File::open(&path)
            .await
            .map_err(|_| StorageError::NotFound(key.to_string()))?;
        let stream = ReaderStream::new(file)
            .map(|r| r.map_err(|e| StorageError::ReadFailed(format!("read chunk: {e}"))));
        Ok(Box::pin(stream))
    }

    async fn write_all(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let path = self.key_to_path(key)?;
        self.ensure_parent_dir(&path).await?;

        let sidecar = SidecarAttrs {
            content_type: sniff_content_type(&data).to_string(),
            digest: hex::encode(Sha256::digest(&data)),
        };

        fs::write(&path, &data).await.map_err(|e| {
            StorageError::WriteFailed(format!("write {}: {e}", path.display()))
        })?;
        let attrs_json = serde_json::to_vec(&sidecar)
            .map_err(|e| StorageError::Backend(format!("serialize attrs: {e}")))?;
        fs::write(Self::attrs_path(&path), attrs_json)
            .await
            .map_err(|e| StorageError::WriteFailed(format!("write attrs {}: {e}", path.display())))?;

        tracing::debug!(key, size = data.len(), "bucket write");
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_to_path(key)?;
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(());
        }
        fs::remove_file(&path).await.map_err(|e| {
            StorageError::DeleteFailed(format!("delete {}: {e}", path.display()))
        })?;
        let _ = fs::remove_file(Self::attrs_path(&path)).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn bucket() -> (tempfile::TempDir, LocalBucket) {
        let dir = tempdir().unwrap();
        let bucket = LocalBucket::new(dir.path()).await.unwrap();
        (dir, bucket)
    }

    #[tokio::test]
    async fn write_read_roundtrip() {
        let (_dir, bucket) = bucket().await;
        let data = Bytes::from_static(b"ID3\x03some mp3 bytes");
        bucket.write_all("ab/somekey", data.clone()).await.unwrap();

        assert!(bucket.exists("ab/somekey").await.unwrap());
        assert_eq!(bucket.read("ab/somekey").await.unwrap(), data);
    }

    #[tokio::test]
    async fn attributes_carry_type_and_digest() {
        let (_dir, bucket) = bucket().await;
        let data = Bytes::from_static(b"ID3\x03some mp3 bytes");
        bucket.write_all("ab/song", data.clone()).await.unwrap();

        let attrs = bucket.attributes("ab/song").await.unwrap();
        assert_eq!(attrs.size, data.len() as u64);
        assert_eq!(attrs.content_type, "audio/mpeg");
        assert_eq!(attrs.digest, hex::encode(Sha256::digest(&data)));
    }

    #[tokio::test]
    async fn read_range_returns_partial_content() {
        let (_dir, bucket) = bucket().await;
        bucket
            .write_all("ab/range", Bytes::from_static(b"0123456789"))
            .await
            .unwrap();

        let part = bucket.read_range("ab/range", 2, 6).await.unwrap();
        assert_eq!(&part[..], b"2345");
        let from_zero = bucket.read_range("ab/range", 0, 10).await.unwrap();
        assert_eq!(&from_zero[..], b"0123456789");
        let overshoot = bucket.read_range("ab/range", 8, 100).await.unwrap();
        assert_eq!(&overshoot[..], b"89");
    }

    #[tokio::test]
    async fn delete_removes_object_and_tolerates_absence() {
        let (_dir, bucket) = bucket().await;
        bucket
            .write_all("ab/gone", Bytes::from_static(b"x"))
            .await
            .unwrap();
        bucket.delete("ab/gone").await.unwrap();
        assert!(!bucket.exists("ab/gone").await.unwrap());
        bucket.delete("ab/gone").await.unwrap();
        assert!(matches!(
            bucket.read("ab/gone").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn traversal_keys_rejected() {
        let (_dir, bucket) = bucket().await;
        assert!(matches!(
            bucket.read("../escape").await,
            Err(StorageError::InvalidKey(_))
        ));
        assert!(matches!(
            bucket.write_all("/abs", Bytes::new()).await,
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn stream_matches_read() {
        let (_dir, bucket) = bucket().await;
        let data = Bytes::from(vec![7u8; 300_000]);
        bucket.write_all("ab/big", data.clone()).await.unwrap();

        let mut stream = bucket.read_stream("ab/big").await.unwrap();
        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, data);
    }
}
