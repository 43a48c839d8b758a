//! Mirroring of content-addressed blobs across the fleet.
//!
//! `replicate_file` walks the rendezvous ranking and pushes until
//! `replication_factor` hosts hold the bytes. Fewer successes is not a
//! failure; the sweeper re-mirrors on later passes.

use std::time::Duration;

use bytes::Bytes;
use chorus_core::AppError;
use chorus_storage::shard_cid;
use futures::stream::{self, StreamExt};

use crate::auth::signed_headers;
use crate::state::AppState;

const PROBE_TIMEOUT: Duration = Duration::from_secs(1);
const PULL_TIMEOUT: Duration = Duration::from_secs(10);
const PUSH_TIMEOUT: Duration = Duration::from_secs(30);

/// Concurrency of the racing existence probe.
const RACE_WIDTH: usize = 5;

impl AppState {
    /// Mirror `bytes` under `cid` to the top-ranked live peers. Returns the
    /// hosts that succeeded, in placement order.
    pub async fn replicate_file(
        &self,
        cid: &str,
        bytes: &Bytes,
        placement_hosts: Option<&[String]>,
    ) -> Vec<String> {
        let ranked = match placement_hosts {
            Some(hosts) if !hosts.is_empty() => hosts.to_vec(),
            _ => self.hasher().rank(cid),
        };

        let mut success = Vec::new();
        for host in ranked {
            match self.replicate_file_to_host(&host, cid, bytes).await {
                Ok(()) => {
                    tracing::info!(cid, to = %host, "replicated");
                    success.push(host);
                    if success.len() == self.config.replication_factor {
                        break;
                    }
                }
                Err(err) => {
                    tracing::warn!(cid, to = %host, error = %err, "replication failed");
                }
            }
        }
        success
    }

    /// Write to the local bucket (if absent) and upsert the holdings row.
    pub async fn replicate_to_my_bucket(&self, cid: &str, bytes: &Bytes) -> Result<(), AppError> {
        let key = shard_cid(cid);
        let already = self.bucket.exists(&key).await.unwrap_or(false);
        if !already {
            self.bucket
                .write_all(&key, bytes.clone())
                .await
                .map_err(|e| AppError::Dependency(format!("bucket write {cid}: {e}")))?;
        }
        self.blobs.upsert(self.self_host(), cid).await
    }

    /// Delete the bucket object, then the holdings row.
    pub async fn drop_from_my_bucket(&self, cid: &str) -> Result<(), AppError> {
        let key = shard_cid(cid);
        if let Err(err) = self.bucket.delete(&key).await {
            tracing::error!(cid, error = %err, "failed to delete blob");
        }
        self.blobs.delete(self.self_host(), cid).await
    }

    async fn replicate_file_to_host(
        &self,
        host: &str,
        cid: &str,
        bytes: &Bytes,
    ) -> Result<(), AppError> {
        if host == self.self_host() {
            return self.replicate_to_my_bucket(cid, bytes).await;
        }

        // skip the transfer when the target already holds it
        if self.host_has_blob(host, cid).await {
            tracing::debug!(cid, host, "target already has blob");
            return Ok(());
        }

        let part = reqwest::multipart::Part::bytes(bytes.to_vec()).file_name(cid.to_string());
        let form = reqwest::multipart::Form::new().part("files", part);

        let mut req = self
            .http
            .post(format!("{}/internal/blobs", host.trim_end_matches('/')))
            .timeout(PUSH_TIMEOUT)
            .multipart(form);
        for (name, value) in signed_headers(&self.config)? {
            req = req.header(name, value);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| AppError::Dependency(format!("push to {host}: {e}")))?;
        if !resp.status().is_success() {
            return Err(AppError::Dependency(format!(
                "push to {host}: status {}",
                resp.status()
            )));
        }
        Ok(())
    }

    /// Quick existence probe against a peer, bounded at one second.
    pub async fn host_has_blob(&self, host: &str, cid: &str) -> bool {
        let url = format!(
            "{}/internal/blobs/info/{}",
            host.trim_end_matches('/'),
            cid
        );
        match self
            .http
            .get(url)
            .timeout(PROBE_TIMEOUT)
            .header("user-agent", format!("chorus {}", self.self_host()))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    /// Probe a batch of candidates five at a time and return the first host
    /// confirmed to hold `cid`. Remaining probes are dropped once a winner
    /// arrives.
    pub async fn race_host_has_blob(&self, cid: &str, hosts: &[String]) -> Option<String> {
        let mut probes = stream::iter(hosts.iter().cloned())
            .map(|host| async move {
                let has = self.host_has_blob(&host, cid).await;
                (host, has)
            })
            .buffer_unordered(RACE_WIDTH);

        while let Some((host, has)) = probes.next().await {
            if has {
                return Some(host);
            }
        }
        None
    }

    /// Authenticated pull of a blob from a peer into the local bucket.
    pub async fn pull_file_from_host(&self, host: &str, cid: &str) -> Result<(), AppError> {
        if host == self.self_host() {
            return Err(AppError::Internal("should not pull blob from self".into()));
        }

        let url = format!("{}/internal/blobs/{}", host.trim_end_matches('/'), cid);
        let mut req = self.http.get(url).timeout(PULL_TIMEOUT);
        for (name, value) in signed_headers(&self.config)? {
            req = req.header(name, value);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| AppError::Dependency(format!("pull from {host}: {e}")))?;
        if !resp.status().is_success() {
            return Err(AppError::Dependency(format!(
                "pull {cid} from {host}: status {}",
                resp.status()
            )));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| AppError::Dependency(format!("pull body from {host}: {e}")))?;
        self.replicate_to_my_bucket(cid, &bytes).await
    }
}
