//! Guarded stats queries for the health surface.
//!
//! Both return an error string instead of failing the caller; a stuck
//! database must degrade the health payload, not crash the monitor.

use std::time::Duration;

use sqlx::PgPool;
use tokio::time::timeout;

const DB_SIZE_TIMEOUT: Duration = Duration::from_secs(1);
const UPLOADS_COUNT_TIMEOUT: Duration = Duration::from_secs(60);

pub async fn database_size(pool: &PgPool) -> (u64, String) {
    let query = sqlx::query_as::<_, (i64,)>("SELECT pg_database_size(current_database())")
        .fetch_one(pool);
    match timeout(DB_SIZE_TIMEOUT, query).await {
        Ok(Ok((size,))) => (size.max(0) as u64, String::new()),
        Ok(Err(e)) => (0, format!("error getting database size: {e}")),
        Err(_) => (0, "timeout getting database size within 1s".to_string()),
    }
}

pub async fn uploads_count(pool: &PgPool) -> (i64, String) {
    let query = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM uploads").fetch_one(pool);
    match timeout(UPLOADS_COUNT_TIMEOUT, query).await {
        Ok(Ok((count,))) => (count, String::new()),
        Ok(Err(e)) => (0, format!("error getting uploads count: {e}")),
        Err(_) => (0, "timeout getting uploads count within 60s".to_string()),
    }
}
