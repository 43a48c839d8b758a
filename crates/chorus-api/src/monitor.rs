//! Fleet and host monitoring: disk/db stats, peer health polling, and the
//! consensus-dead reachability classifier.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chorus_core::models::PeerHealth;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sysinfo::Disks;

use crate::state::{AppState, HEALTHY_WINDOW_SECS};

const DISK_DB_INTERVAL: Duration = Duration::from_secs(300);
const REACHABILITY_INTERVAL: Duration = Duration::from_secs(60);
const HEALTH_POLL_FAST: Duration = Duration::from_secs(1);
const HEALTH_POLL_STEADY: Duration = Duration::from_secs(5);
const HEALTH_POLL_TIMEOUT: Duration = Duration::from_secs(5);
const SEEDING_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Minimum sample of reachable peers required before the fleet may declare
/// a host consensus-dead.
const CONSENSUS_MIN_SAMPLE: usize = 5;

/// Refresh disk and database statistics on a coarse schedule.
pub async fn start_disk_db_monitor(state: Arc<AppState>) {
    loop {
        update_disk_stats(&state);
        update_db_stats(&state).await;
        tokio::time::sleep(DISK_DB_INTERVAL).await;
    }
}

fn update_disk_stats(state: &AppState) {
    let disks = Disks::new_with_refreshed_list();
    // pick the disk whose mount point is the longest prefix of our dir
    let dir = std::path::Path::new(&state.config.dir);
    let best = disks
        .list()
        .iter()
        .filter(|d| dir.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len());
    if let Some(disk) = best {
        state
            .disk_free
            .store(disk.available_space(), Ordering::Relaxed);
        state.disk_total.store(disk.total_space(), Ordering::Relaxed);
    } else {
        tracing::warn!(dir = %state.config.dir, "no disk found for storage dir");
    }
}

async fn update_db_stats(state: &AppState) {
    let (size, size_err) = chorus_db::database_size(&state.pool).await;
    let (count, count_err) = chorus_db::uploads_count(&state.pool).await;
    {
        let mut stats = state.db_stats.write().expect("lock poisoned");
        stats.database_size = size;
        stats.db_size_err = size_err;
        stats.uploads_count = count;
        stats.uploads_count_err = count_err;
    }
    state.uploads_count.store(count, Ordering::Relaxed);
    tracing::info!(
        database_size = size,
        uploads = count,
        "updated disk and db status"
    );
}

/// Subset of a peer's health payload the poller consumes.
#[derive(Debug, Deserialize)]
struct PeerHealthResponse {
    data: Option<PeerHealthResponseData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PeerHealthResponseData {
    #[serde(default)]
    peer_healths: HashMap<String, PeerHealth>,
}

/// Poll every peer's health endpoint; fast cadence until the first full
/// round completes, steady afterwards.
pub async fn start_health_poller(state: Arc<AppState>) {
    let mut first_round_done = false;
    loop {
        let peers: Vec<String> = state.config.other_peers().map(|p| p.host.clone()).collect();
        for host in &peers {
            poll_peer_health(&state, host).await;
        }
        let interval = if first_round_done {
            HEALTH_POLL_STEADY
        } else {
            HEALTH_POLL_FAST
        };
        first_round_done = true;
        tokio::time::sleep(interval).await;
    }
}

async fn poll_peer_health(state: &AppState, host: &str) {
    let url = format!(
        "{}/health_check?allow_unregistered=true&allow_unhealthy=true",
        host.trim_end_matches('/')
    );
    let resp = state
        .http
        .get(url)
        .timeout(HEALTH_POLL_TIMEOUT)
        .send()
        .await;

    let Ok(resp) = resp else {
        return;
    };

    // any HTTP answer means the peer process is reachable
    let now = Utc::now();
    let healthy = resp.status().is_success();
    let parsed: Option<PeerHealthResponse> = resp.json().await.ok();

    let mut health = state.peer_health.write().expect("lock poisoned");
    let entry = health.entry(host.to_string()).or_default();
    entry.last_reachable = Some(now);
    if healthy {
        entry.last_healthy = Some(now);
    }
    if let Some(data) = parsed.and_then(|p| p.data) {
        entry.reachable_peers = data
            .peer_healths
            .into_iter()
            .filter_map(|(peer, ph)| ph.last_reachable.map(|t| (peer, t)))
            .collect();
    }
}

/// Classify peers as consensus-dead: unreachable from here on two
/// consecutive checks, and unreachable from a majority of peers that are
/// reachable, given a sufficient sample.
pub async fn start_reachability_monitor(state: Arc<AppState>) {
    loop {
        tokio::time::sleep(REACHABILITY_INTERVAL).await;
        run_reachability_check(&state);
    }
}

fn run_reachability_check(state: &AppState) {
    let cutoff = Utc::now() - chrono::Duration::seconds(HEALTHY_WINDOW_SECS);

    let unreachable_now: Vec<String> = {
        let health = state.peer_health.read().expect("lock poisoned");
        state
            .config
            .other_peers()
            .map(|p| p.host.clone())
            .filter(|host| {
                health
                    .get(host)
                    .and_then(|ph| ph.last_reachable)
                    .map(|t| t < cutoff)
                    .unwrap_or(true)
            })
            .collect()
    };

    let previous: HashSet<String> = {
        let prior = state.unreachable_peers.read().expect("lock poisoned");
        prior.iter().cloned().collect()
    };

    let mut dead = HashSet::new();
    for host in &unreachable_now {
        if previous.contains(host) && majority_cannot_reach(state, host, cutoff) {
            dead.insert(host.clone());
        }
    }

    if !dead.is_empty() {
        tracing::warn!(?dead, "peers classified consensus-dead");
    }
    *state.unreachable_peers.write().expect("lock poisoned") = unreachable_now;
    *state.consensus_dead.write().expect("lock poisoned") = dead;
}

fn majority_cannot_reach(state: &AppState, host: &str, cutoff: DateTime<Utc>) -> bool {
    let health = state.peer_health.read().expect("lock poisoned");
    let mut total = 0usize;
    let mut can_reach = 0usize;
    for (peer, ph) in health.iter() {
        if peer.as_str() == host {
            continue;
        }
        let peer_reachable = ph.last_reachable.map(|t| t > cutoff).unwrap_or(false);
        if !peer_reachable {
            continue;
        }
        total += 1;
        if ph
            .reachable_peers
            .get(host)
            .map(|t| *t > cutoff)
            .unwrap_or(false)
        {
            can_reach += 1;
        }
    }
    // an exact split is not a majority
    let unreachable = total - can_reach;
    total >= CONSENSUS_MIN_SAMPLE && unreachable * 2 > total
}

/// Clear the seeding flag once this node has heard from most of the fleet.
pub async fn start_seeding_poller(state: Arc<AppState>) {
    if !state.seeding() {
        return;
    }
    let peer_count = state.config.other_peers().count();
    loop {
        tokio::time::sleep(SEEDING_POLL_INTERVAL).await;
        let heard = state
            .peer_health
            .read()
            .expect("lock poisoned")
            .values()
            .filter(|ph| ph.last_reachable.is_some())
            .count();
        if peer_count == 0 || heard * 2 >= peer_count {
            state
                .is_seeding
                .store(false, std::sync::atomic::Ordering::Relaxed);
            tracing::info!("seeding complete");
            return;
        }
    }
}
