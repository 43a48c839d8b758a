use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chorus_api::{cuckoo, monitor, routes, state::AppState, transcoder};
use chorus_core::ChorusConfig;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Drain window for in-flight requests and workers at shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "chorus=debug,tower_http=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ChorusConfig::from_env()?;
    tracing::info!(self_host = %config.self_peer.host, peers = config.peers.len(), "starting chorus node");

    tokio::fs::create_dir_all(&config.dir).await?;
    let bucket = chorus_storage::open_bucket(&config.blob_store_dsn).await?;
    let pool = chorus_db::setup_database(&config.postgres_dsn).await?;

    // workers pull from a capacity-one channel; the sweeper blocks until a
    // worker frees up
    let (work_tx, work_rx) = mpsc::channel(1);
    let state = Arc::new(AppState::new(config, bucket, pool, work_tx));

    tokio::spawn(transcoder::start(state.clone(), work_rx));
    tokio::spawn(cuckoo::start_builder(state.clone()));
    tokio::spawn(cuckoo::start_fetcher(state.clone()));
    tokio::spawn(monitor::start_disk_db_monitor(state.clone()));

    // loops that make authenticated peer requests only run on a node whose
    // wallet is registered with the fleet
    if state.config.wallet_is_registered {
        tokio::spawn(monitor::start_health_poller(state.clone()));
        tokio::spawn(monitor::start_reachability_monitor(state.clone()));
        tokio::spawn(monitor::start_seeding_poller(state.clone()));
    } else {
        let interval = Duration::from_secs(10);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                tracing::warn!("node not fully running: wallet is not registered with the fleet");
            }
        });
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.listen_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    let router = routes::build_router(state);
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // give workers and in-flight replication a bounded drain window
    tokio::time::sleep(SHUTDOWN_GRACE).await;
    tracing::debug!("bye");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
