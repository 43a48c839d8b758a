//! Shared node state.
//!
//! Maps guarded by a reader-writer lock each: writers are the background
//! loops, readers are request handlers. Lock scopes never span an await.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chorus_core::models::{PeerHealth, Upload};
use chorus_core::rendezvous::RendezvousHasher;
use chorus_core::{AppError, ChorusConfig};
use chorus_db::{BlobRepository, UploadRepository};
use chorus_storage::Bucket;
use chrono::{DateTime, Utc};
use scalable_cuckoo_filter::ScalableCuckooFilter;
use sqlx::PgPool;
use tokio::sync::mpsc;

/// Well-known bucket key of this node's encoded membership filter.
pub const MY_CUCKOO_KEY: &str = "my_cuckoo";

/// How recently a peer must have been reachable to count as healthy.
pub const HEALTHY_WINDOW_SECS: i64 = 120;

pub type PeerFilter = ScalableCuckooFilter<[u8], scalable_cuckoo_filter::DefaultHasher, rand::rngs::OsRng>;

/// Mutable string-bearing stats behind one lock.
#[derive(Debug, Default, Clone)]
pub struct DbStats {
    pub database_size: u64,
    pub db_size_err: String,
    pub uploads_count: i64,
    pub uploads_count_err: String,
}

pub struct AppState {
    pub config: ChorusConfig,
    pub bucket: Arc<dyn Bucket>,
    pub pool: PgPool,
    pub blobs: BlobRepository,
    pub uploads: UploadRepository,
    pub http: reqwest::Client,

    pub peer_health: RwLock<HashMap<String, PeerHealth>>,
    pub unreachable_peers: RwLock<Vec<String>>,
    pub consensus_dead: RwLock<HashSet<String>>,

    pub cuckoo_filters: RwLock<HashMap<String, PeerFilter>>,
    pub cuckoo_etags: RwLock<HashMap<String, String>>,

    pub disk_free: AtomicU64,
    pub disk_total: AtomicU64,
    pub db_stats: RwLock<DbStats>,
    pub uploads_count: AtomicI64,

    pub is_seeding: AtomicBool,
    pub started_at: DateTime<Utc>,

    work_tx: mpsc::Sender<Upload>,
}

impl AppState {
    pub fn new(
        config: ChorusConfig,
        bucket: Arc<dyn Bucket>,
        pool: PgPool,
        work_tx: mpsc::Sender<Upload>,
    ) -> Self {
        // Seeding only applies to long-lived fleets.
        let is_seeding = matches!(config.env, chorus_core::config::Env::Stage | chorus_core::config::Env::Prod);
        AppState {
            blobs: BlobRepository::new(pool.clone()),
            uploads: UploadRepository::new(pool.clone()),
            http: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
            config,
            bucket,
            pool,
            peer_health: RwLock::new(HashMap::new()),
            unreachable_peers: RwLock::new(Vec::new()),
            consensus_dead: RwLock::new(HashSet::new()),
            cuckoo_filters: RwLock::new(HashMap::new()),
            cuckoo_etags: RwLock::new(HashMap::new()),
            disk_free: AtomicU64::new(0),
            disk_total: AtomicU64::new(0),
            db_stats: RwLock::new(DbStats::default()),
            uploads_count: AtomicI64::new(0),
            is_seeding: AtomicBool::new(is_seeding),
            started_at: Utc::now(),
            work_tx,
        }
    }

    pub fn self_host(&self) -> &str {
        &self.config.self_peer.host
    }

    /// Hosts eligible for placement: configured peers minus consensus-dead.
    pub fn live_hosts(&self) -> Vec<String> {
        let dead = self.consensus_dead.read().expect("lock poisoned");
        self.config
            .peers
            .iter()
            .map(|p| p.host.clone())
            .filter(|h| !dead.contains(h))
            .collect()
    }

    pub fn hasher(&self) -> RendezvousHasher {
        RendezvousHasher::new(self.live_hosts())
    }

    /// Hosts seen healthy within the last two minutes, excluding self and
    /// consensus-dead peers.
    pub fn healthy_hosts(&self) -> Vec<String> {
        let cutoff = Utc::now() - chrono::Duration::seconds(HEALTHY_WINDOW_SECS);
        let dead = self.consensus_dead.read().expect("lock poisoned");
        let health = self.peer_health.read().expect("lock poisoned");
        health
            .iter()
            .filter(|(host, ph)| {
                !dead.contains(*host)
                    && ph.last_reachable.map(|t| t > cutoff).unwrap_or(false)
            })
            .map(|(host, _)| host.clone())
            .collect()
    }

    pub fn db_healthy(&self) -> bool {
        let stats = self.db_stats.read().expect("lock poisoned");
        stats.database_size > 0 && stats.db_size_err.is_empty() && stats.uploads_count_err.is_empty()
    }

    pub fn disk_has_space(&self) -> bool {
        let free = self.disk_free.load(Ordering::Relaxed);
        // zero means the monitor has not measured yet; do not reject uploads
        free == 0 || free >= self.config.min_free_disk_bytes
    }

    pub fn seeding(&self) -> bool {
        self.is_seeding.load(Ordering::Relaxed)
    }

    /// Hand a job to the worker pool, waiting for a free slot.
    pub async fn dispatch_job(&self, upload: Upload) -> Result<(), AppError> {
        self.work_tx
            .send(upload)
            .await
            .map_err(|_| AppError::Internal("transcode workers are gone".into()))
    }

    /// Best-effort dispatch used on the request path; the sweeper will pick
    /// the job up later if every worker is busy.
    pub fn try_dispatch_job(&self, upload: Upload) {
        if let Err(err) = self.work_tx.try_send(upload) {
            tracing::debug!(error = %err, "workers busy, job left for sweeper");
        }
    }

    /// Wallets allowed to sign streaming requests.
    pub fn is_registered_signer(&self, wallet: &str) -> bool {
        self.config
            .signers
            .iter()
            .chain(self.config.peers.iter())
            .any(|p| p.wallet.eq_ignore_ascii_case(wallet))
    }

    /// Wallets of registered peers, for inter-node request auth.
    pub fn is_peer_wallet(&self, wallet: &str) -> bool {
        self.config
            .peers
            .iter()
            .any(|p| p.wallet.eq_ignore_ascii_case(wallet))
    }
}
