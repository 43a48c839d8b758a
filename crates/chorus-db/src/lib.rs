//! Postgres access: pool construction, embedded migrations, and the blob /
//! upload repositories.
//!
//! Migrations run on startup; sqlx records a checksum per applied file in
//! `_sqlx_migrations`, so re-running the set is a no-op.

pub mod blobs;
pub mod stats;
pub mod uploads;

use std::time::Duration;

use chorus_core::AppError;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub use blobs::BlobRepository;
pub use stats::{database_size, uploads_count};
pub use uploads::UploadRepository;

const MAX_CONNECTIONS: u32 = 20;
const ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Connect and migrate.
pub async fn setup_database(dsn: &str) -> Result<PgPool, AppError> {
    tracing::info!("connecting to database");
    let pool = PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(Duration::from_secs(ACQUIRE_TIMEOUT_SECS))
        .idle_timeout(Duration::from_secs(600))
        .connect(dsn)
        .await?;

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .map_err(|e| AppError::Internal(format!("migrations failed: {e}")))?;
    tracing::info!("database migrations applied");

    Ok(pool)
}
