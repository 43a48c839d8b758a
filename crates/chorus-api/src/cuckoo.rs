//! Holdings gossip via scalable cuckoo filters.
//!
//! The builder periodically rebuilds a filter over every key this node
//! holds and stores the encoding under the well-known bucket key; the
//! fetcher keeps an in-memory copy of each peer's filter, refreshed with
//! conditional requests. Lookups answer "who might have this CID?";
//! callers must verify candidates before redirecting.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chorus_core::AppError;
use scalable_cuckoo_filter::ScalableCuckooFilterBuilder;

use crate::state::{AppState, PeerFilter, MY_CUCKOO_KEY};

const BUILD_INITIAL_DELAY: Duration = Duration::from_secs(60);
const BUILD_INTERVAL: Duration = Duration::from_secs(3600);
const FETCH_INTERVAL: Duration = Duration::from_secs(60);
const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

const FILTER_INITIAL_CAPACITY: usize = 100_000;
const FILTER_FALSE_POSITIVE_RATE: f64 = 0.03;

pub fn new_filter() -> PeerFilter {
    ScalableCuckooFilterBuilder::new()
        .initial_capacity(FILTER_INITIAL_CAPACITY)
        .false_positive_probability(FILTER_FALSE_POSITIVE_RATE)
        .rng(rand::rngs::OsRng)
        .finish()
}

pub fn encode_filter(filter: &PeerFilter) -> Result<Vec<u8>, AppError> {
    bincode::serialize(filter).map_err(|e| AppError::Internal(format!("encode filter: {e}")))
}

pub fn decode_filter(bytes: &[u8]) -> Result<PeerFilter, AppError> {
    bincode::deserialize(bytes).map_err(|e| AppError::Validation(format!("decode filter: {e}")))
}

/// Hosts whose cached filter admits `cid`.
pub fn lookup(state: &AppState, cid: &str) -> Vec<String> {
    let filters = state.cuckoo_filters.read().expect("lock poisoned");
    let mut hosts: Vec<String> = filters
        .iter()
        .filter(|(_, f)| f.contains(cid.as_bytes()))
        .map(|(host, _)| host.clone())
        .collect();
    hosts.sort();
    hosts
}

/// Rebuild the advertisement on a coarse schedule.
pub async fn start_builder(state: Arc<AppState>) {
    tokio::time::sleep(BUILD_INITIAL_DELAY).await;
    loop {
        let started = std::time::Instant::now();
        match build(&state).await {
            Ok(count) => {
                tracing::info!(keys = count, took = ?started.elapsed(), "built cuckoo filter")
            }
            Err(err) => tracing::warn!(error = %err, "cuckoo build failed"),
        }
        tokio::time::sleep(BUILD_INTERVAL).await;
    }
}

async fn build(state: &AppState) -> Result<usize, AppError> {
    let keys = state.blobs.keys_for_host(state.self_host()).await?;
    let mut filter = new_filter();
    for key in &keys {
        filter.insert(key.as_bytes());
    }
    let encoded = encode_filter(&filter)?;
    state
        .bucket
        .write_all(MY_CUCKOO_KEY, Bytes::from(encoded))
        .await
        .map_err(|e| AppError::Dependency(format!("store filter: {e}")))?;
    Ok(keys.len())
}

/// Poll peers for their advertisements.
pub async fn start_fetcher(state: Arc<AppState>) {
    loop {
        let peers: Vec<String> = state.config.other_peers().map(|p| p.host.clone()).collect();
        for host in peers {
            if let Err(err) = fetch_peer_filter(&state, &host).await {
                tracing::warn!(peer = %host, error = %err, "failed to fetch peer cuckoo");
            }
        }
        tokio::time::sleep(FETCH_INTERVAL).await;
    }
}

async fn fetch_peer_filter(state: &AppState, host: &str) -> Result<(), AppError> {
    let prior_etag = state
        .cuckoo_etags
        .read()
        .expect("lock poisoned")
        .get(host)
        .cloned()
        .unwrap_or_default();

    let resp = state
        .http
        .get(format!("{}/internal/cuckoo", host.trim_end_matches('/')))
        .timeout(FETCH_TIMEOUT)
        .header("if-none-match", prior_etag)
        .send()
        .await
        .map_err(|e| AppError::Dependency(format!("fetch cuckoo: {e}")))?;

    if resp.status().as_u16() == 304 {
        return Ok(());
    }
    if !resp.status().is_success() {
        return Err(AppError::Dependency(format!(
            "fetch cuckoo: status {}",
            resp.status()
        )));
    }

    let etag = resp
        .headers()
        .get("etag")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let body = resp
        .bytes()
        .await
        .map_err(|e| AppError::Dependency(format!("fetch cuckoo body: {e}")))?;
    let filter = decode_filter(&body)?;

    state
        .cuckoo_filters
        .write()
        .expect("lock poisoned")
        .insert(host.to_string(), filter);
    state
        .cuckoo_etags
        .write()
        .expect("lock poisoned")
        .insert(host.to_string(), etag);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_roundtrips_through_encoding() {
        let mut filter = new_filter();
        for i in 0..1000 {
            filter.insert(format!("bafykey{i}").as_bytes());
        }
        let encoded = encode_filter(&filter).unwrap();
        let decoded = decode_filter(&encoded).unwrap();
        for i in 0..1000 {
            assert!(decoded.contains(format!("bafykey{i}").as_bytes()));
        }
    }

    #[test]
    fn filter_has_no_false_negatives_and_few_false_positives() {
        let mut filter = new_filter();
        for i in 0..5000 {
            filter.insert(format!("present-{i}").as_bytes());
        }
        for i in 0..5000 {
            assert!(filter.contains(format!("present-{i}").as_bytes()));
        }
        let false_positives = (0..5000)
            .filter(|i| filter.contains(format!("absent-{i}").as_bytes()))
            .count();
        assert!(
            (false_positives as f64) < 5000.0 * 0.05,
            "false positive rate too high: {false_positives}/5000"
        );
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_filter(b"not a filter at all").is_err());
    }
}
