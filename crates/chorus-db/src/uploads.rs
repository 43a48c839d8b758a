//! Upload job persistence.

use std::collections::HashMap;

use chorus_core::models::{FfprobeInfo, JobStatus, JobTemplate, Upload};
use chorus_core::AppError;
use chrono::{DateTime, Duration, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};

/// Jobs with more errors than this are abandoned.
pub const MAX_ERROR_COUNT: i32 = 5;

/// A job is not re-picked until this long after its last transcode touch.
const SWEEP_COOLDOWN_SECS: i64 = 60;

#[derive(FromRow)]
struct UploadRow {
    id: String,
    user_wallet: Option<String>,
    template: String,
    orig_filename: String,
    orig_file_cid: String,
    selected_preview: Option<String>,
    ffprobe: Option<Json<FfprobeInfo>>,
    mirrors: Json<Vec<String>>,
    transcoded_mirrors: Json<Vec<String>>,
    transcode_results: Json<HashMap<String, String>>,
    status: String,
    error: String,
    error_count: i32,
    transcode_progress: f64,
    created_by: String,
    transcoded_by: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    transcoded_at: Option<DateTime<Utc>>,
    placement_hosts: Option<Json<Vec<String>>>,
}

impl From<UploadRow> for Upload {
    fn from(row: UploadRow) -> Self {
        Upload {
            id: row.id,
            user_wallet: row.user_wallet,
            template: JobTemplate::parse(&row.template).unwrap_or(JobTemplate::Audio),
            orig_filename: row.orig_filename,
            orig_file_cid: row.orig_file_cid,
            selected_preview: row.selected_preview,
            ffprobe: row.ffprobe.map(|j| j.0),
            mirrors: row.mirrors.0,
            transcoded_mirrors: row.transcoded_mirrors.0,
            transcode_results: row.transcode_results.0,
            status: JobStatus::parse(&row.status).unwrap_or(JobStatus::Error),
            error: row.error,
            error_count: row.error_count,
            transcode_progress: row.transcode_progress,
            created_by: row.created_by,
            transcoded_by: row.transcoded_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
            transcoded_at: row.transcoded_at,
            placement_hosts: row.placement_hosts.map(|j| j.0),
        }
    }
}

const SELECT_COLUMNS: &str = r#"
    id, user_wallet, template, orig_filename, orig_file_cid, selected_preview,
    ffprobe, mirrors, transcoded_mirrors, transcode_results, status, error,
    error_count, transcode_progress, created_by, transcoded_by, created_at,
    updated_at, transcoded_at, placement_hosts
"#;

#[derive(Clone)]
pub struct UploadRepository {
    pool: PgPool,
}

impl UploadRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, upload: &Upload) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO uploads (
                id, user_wallet, template, orig_filename, orig_file_cid,
                selected_preview, ffprobe, mirrors, transcoded_mirrors,
                transcode_results, status, error, error_count,
                transcode_progress, created_by, transcoded_by, created_at,
                updated_at, transcoded_at, placement_hosts
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                    $14, $15, $16, $17, $18, $19, $20)
            "#,
        )
        .bind(&upload.id)
        .bind(&upload.user_wallet)
        .bind(upload.template.as_str())
        .bind(&upload.orig_filename)
        .bind(&upload.orig_file_cid)
        .bind(&upload.selected_preview)
        .bind(upload.ffprobe.as_ref().map(Json))
        .bind(Json(&upload.mirrors))
        .bind(Json(&upload.transcoded_mirrors))
        .bind(Json(&upload.transcode_results))
        .bind(upload.status.as_str())
        .bind(&upload.error)
        .bind(upload.error_count)
        .bind(upload.transcode_progress)
        .bind(&upload.created_by)
        .bind(&upload.transcoded_by)
        .bind(upload.created_at)
        .bind(upload.updated_at)
        .bind(upload.transcoded_at)
        .bind(upload.placement_hosts.as_ref().map(Json))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<Upload>, AppError> {
        let row = sqlx::query_as::<_, UploadRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM uploads WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Upload::from))
    }

    pub async fn list_recent(&self, limit: i64) -> Result<Vec<Upload>, AppError> {
        let rows = sqlx::query_as::<_, UploadRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM uploads ORDER BY created_at DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Upload::from).collect())
    }

    /// Persist the full mutable state of a job row.
    pub async fn save(&self, upload: &Upload) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE uploads SET
                selected_preview = $2, ffprobe = $3, mirrors = $4,
                transcoded_mirrors = $5, transcode_results = $6, status = $7,
                error = $8, error_count = $9, transcode_progress = $10,
                transcoded_by = $11, updated_at = $12, transcoded_at = $13,
                placement_hosts = $14
            WHERE id = $1
            "#,
        )
        .bind(&upload.id)
        .bind(&upload.selected_preview)
        .bind(upload.ffprobe.as_ref().map(Json))
        .bind(Json(&upload.mirrors))
        .bind(Json(&upload.transcoded_mirrors))
        .bind(Json(&upload.transcode_results))
        .bind(upload.status.as_str())
        .bind(&upload.error)
        .bind(upload.error_count)
        .bind(upload.transcode_progress)
        .bind(&upload.transcoded_by)
        .bind(Utc::now())
        .bind(upload.transcoded_at)
        .bind(upload.placement_hosts.as_ref().map(Json))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Lightweight progress patch used mid-encode.
    pub async fn patch_progress(&self, id: &str, progress: f64) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE uploads
            SET transcode_progress = $2, transcoded_at = $3, updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(progress)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Crash recovery: rows this host left in progress go back to their
    /// pickup states. Returns how many rows were reset.
    pub async fn reset_stuck(&self, host: &str) -> Result<u64, AppError> {
        let mut total = 0;
        for (busy, reset) in [
            (JobStatus::Busy, JobStatus::New),
            (JobStatus::BusyRetranscode, JobStatus::Retranscode),
        ] {
            let result = sqlx::query(
                "UPDATE uploads SET status = $3, updated_at = $4 WHERE transcoded_by = $1 AND status = $2",
            )
            .bind(host)
            .bind(busy.as_str())
            .bind(reset.as_str())
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
            total += result.rows_affected();
        }
        Ok(total)
    }

    /// Jobs the sweeper may re-dispatch: unfinished, under the error cap,
    /// and not touched within the cooldown window.
    pub async fn sweep_candidates(&self) -> Result<Vec<Upload>, AppError> {
        let cutoff = Utc::now() - Duration::seconds(SWEEP_COOLDOWN_SECS);
        let rows = sqlx::query_as::<_, UploadRow>(&format!(
            r#"
            SELECT {SELECT_COLUMNS} FROM uploads
            WHERE status = ANY($1)
              AND error_count <= $2
              AND (transcoded_at IS NULL OR transcoded_at < $3)
            ORDER BY created_at
            "#
        ))
        .bind(vec![
            "new",
            "busy",
            "error",
            "retranscode",
            "busy_retranscode",
            "error_retranscode",
        ])
        .bind(MAX_ERROR_COUNT)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Upload::from).collect())
    }
}
