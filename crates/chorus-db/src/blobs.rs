//! Holdings index: the authoritative record of confirmed local storage.
//!
//! Rows for this host are written here; rows for other hosts arrive through
//! the fleet's sync channel and are only read. Entries for unhealthy hosts
//! are filtered at query time, never deleted.

use chorus_core::models::Blob;
use chorus_core::AppError;
use chrono::Utc;
use sqlx::PgPool;

#[derive(Clone)]
pub struct BlobRepository {
    pool: PgPool,
}

impl BlobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record that `host` holds `key`. Idempotent.
    pub async fn upsert(&self, host: &str, key: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO blobs (host, key, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (host, key) DO NOTHING
            "#,
        )
        .bind(host)
        .bind(key)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, host: &str, key: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM blobs WHERE host = $1 AND key = $2")
            .bind(host)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn exists(&self, host: &str, key: &str) -> Result<bool, AppError> {
        let row: (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM blobs WHERE host = $1 AND key = $2 LIMIT 1)",
        )
        .bind(host)
        .bind(key)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    /// All holdings rows for a key, any host.
    pub async fn locations(&self, key: &str) -> Result<Vec<Blob>, AppError> {
        let rows = sqlx::query_as::<_, Blob>(
            "SELECT host, key, created_at FROM blobs WHERE key = $1 ORDER BY host",
        )
        .bind(key)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Hosts claiming to hold `key`, restricted to a healthy-host set.
    pub async fn hosts_with_key(
        &self,
        key: &str,
        healthy_hosts: &[String],
    ) -> Result<Vec<String>, AppError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT host FROM blobs WHERE key = $1 AND host = ANY($2) ORDER BY host",
        )
        .bind(key)
        .bind(healthy_hosts)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(h,)| h).collect())
    }

    /// Distinct keys this host holds, ordered; feeds the filter builder.
    pub async fn keys_for_host(&self, host: &str) -> Result<Vec<String>, AppError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT key FROM blobs WHERE host = $1 ORDER BY 1")
                .bind(host)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(k,)| k).collect())
    }
}
