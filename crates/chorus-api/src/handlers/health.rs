//! Health surface and the healthy-gate middleware.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chorus_core::models::PeerHealth;
use chorus_core::signature::sign_bytes;
use chorus_core::Peer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

/// The single stable health/metrics shape this node exposes.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthData {
    pub healthy: bool,
    pub env: String,
    pub self_peer: Peer,
    pub wallet_is_registered: bool,
    pub is_seeding: bool,
    pub started_at: DateTime<Utc>,
    pub replication_factor: usize,
    pub store_all: bool,
    pub dir: String,
    pub blob_store_prefix: String,
    pub listen_port: u16,
    pub storage_path_used: u64,
    pub storage_path_size: u64,
    pub database_size: u64,
    pub db_size_err: String,
    pub uploads_count: i64,
    pub uploads_count_err: String,
    pub signers: Vec<Peer>,
    pub peer_healths: HashMap<String, PeerHealth>,
    pub unreachable_peers: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub data: HealthData,
    pub signer: String,
    pub signature: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct HealthQuery {
    #[serde(default)]
    pub allow_unregistered: bool,
    #[serde(default)]
    pub allow_unhealthy: bool,
}

fn build_health_data(state: &AppState, healthy: bool) -> HealthData {
    let db_stats = state.db_stats.read().expect("lock poisoned").clone();
    let peer_healths = state.peer_health.read().expect("lock poisoned").clone();
    let unreachable = state.unreachable_peers.read().expect("lock poisoned").clone();
    let disk_total = state.disk_total.load(Ordering::Relaxed);
    let disk_free = state.disk_free.load(Ordering::Relaxed);
    let blob_store_prefix = state
        .config
        .blob_store_dsn
        .split("://")
        .next()
        .unwrap_or_default()
        .to_string();

    HealthData {
        healthy,
        env: format!("{:?}", state.config.env).to_lowercase(),
        self_peer: state.config.self_peer.clone(),
        wallet_is_registered: state.config.wallet_is_registered,
        is_seeding: state.seeding(),
        started_at: state.started_at,
        replication_factor: state.config.replication_factor,
        store_all: state.config.store_all,
        dir: state.config.dir.clone(),
        blob_store_prefix,
        listen_port: state.config.listen_port,
        storage_path_used: disk_total.saturating_sub(disk_free),
        storage_path_size: disk_total,
        database_size: db_stats.database_size,
        db_size_err: db_stats.db_size_err,
        uploads_count: db_stats.uploads_count,
        uploads_count_err: db_stats.uploads_count_err,
        signers: state.config.signers.clone(),
        peer_healths,
        unreachable_peers: unreachable,
    }
}

/// GET `/health_check`.
pub async fn health_check(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HealthQuery>,
) -> Response {
    let mut healthy = state.db_healthy();
    if !query.allow_unregistered && !state.config.wallet_is_registered {
        healthy = false;
    }
    // seeding only counts against health once the node is registered;
    // before that it is simply waiting for registration
    if state.config.wallet_is_registered && state.seeding() {
        healthy = false;
    }

    let data = build_health_data(&state, healthy);

    let (signature, signer) = match (state.config.signing_key(), serde_json::to_vec(&data)) {
        (Some(key), Ok(payload)) => match sign_bytes(&payload, key) {
            Ok(sig) => (format!("0x{}", hex::encode(sig)), state.config.self_peer.wallet.clone()),
            Err(_) => (String::new(), String::new()),
        },
        _ => ("private key not set".to_string(), String::new()),
    };

    let status = if healthy {
        StatusCode::OK
    } else if !query.allow_unregistered && !state.config.wallet_is_registered {
        StatusCode::from_u16(506).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            data,
            signer,
            signature,
            timestamp: Utc::now(),
        }),
    )
        .into_response()
}

/// GET `/ip_check`: echo the requestor address.
pub async fn ip_check(
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
) -> Response {
    Json(serde_json::json!({ "data": addr.ip().to_string() })).into_response()
}

/// Gate public routes on node health: 506 unregistered, 503 while the
/// database is unhealthy or the node is still seeding.
pub async fn require_healthy(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HealthQuery>,
    request: Request,
    next: Next,
) -> Response {
    if query.allow_unhealthy {
        return next.run(request).await;
    }
    if !state.config.wallet_is_registered {
        return (
            StatusCode::from_u16(506).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Json("wallet not registered"),
        )
            .into_response();
    }
    if !state.db_healthy() {
        return (StatusCode::SERVICE_UNAVAILABLE, Json("database not healthy")).into_response();
    }
    if state.seeding() {
        return (StatusCode::SERVICE_UNAVAILABLE, Json("seeding")).into_response();
    }
    next.run(request).await
}
