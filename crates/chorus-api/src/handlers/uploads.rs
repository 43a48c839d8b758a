//! Upload ingest and job inspection.

use std::io::Write;
use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use chorus_core::cid::compute_cid;
use chorus_core::models::{preview_variant, JobStatus, JobTemplate, Upload};
use chorus_core::signature::SignatureEnvelope;
use chorus_core::AppError;
use chorus_storage::shard_cid;
use chrono::Utc;
use futures::future::join_all;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::HttpAppError;
use crate::state::AppState;

const LIST_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub signature: Option<String>,
}

/// Fields accumulated from the multipart form before processing files.
#[derive(Default)]
struct UploadForm {
    template: Option<JobTemplate>,
    preview_start_seconds: Option<u32>,
    placement_hosts: Option<Vec<String>>,
    files: Vec<(String, Bytes)>,
}

async fn read_form(mut multipart: Multipart) -> Result<UploadForm, AppError> {
    let mut form = UploadForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("bad multipart: {e}")))?
    {
        match field.name() {
            Some("template") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("bad template field: {e}")))?;
                form.template = Some(
                    JobTemplate::parse(&value)
                        .ok_or_else(|| AppError::Validation(format!("unknown template: {value}")))?,
                );
            }
            Some("previewStartSeconds") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("bad preview field: {e}")))?;
                if !value.is_empty() {
                    form.preview_start_seconds = Some(value.parse().map_err(|_| {
                        AppError::Validation(format!("bad previewStartSeconds: {value}"))
                    })?);
                }
            }
            Some("placement_hosts") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("bad placement field: {e}")))?;
                if !value.is_empty() {
                    form.placement_hosts =
                        Some(value.split(',').map(|s| s.trim().to_string()).collect());
                }
            }
            Some("files") => {
                let filename = field.file_name().unwrap_or("unnamed").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("read file part: {e}")))?;
                form.files.push((filename, data));
            }
            _ => {}
        }
    }
    Ok(form)
}

/// POST `/uploads`: multipart ingest. Each file becomes one job row.
pub async fn post_uploads(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UploadQuery>,
    multipart: Multipart,
) -> Result<Response, HttpAppError> {
    if !state.disk_has_space() {
        return Err(AppError::Degraded("disk is full".into()).into());
    }

    let form = read_form(multipart).await?;
    let template = form
        .template
        .ok_or_else(|| AppError::Validation("template field is required".into()))?;
    if form.files.is_empty() {
        return Err(AppError::Validation("no files in upload".into()).into());
    }

    // uploader identity is optional at ingest
    let user_wallet = query
        .signature
        .as_deref()
        .and_then(|raw| SignatureEnvelope::parse(raw).ok())
        .and_then(|env| env.signer_wallet().ok());

    let tasks = form.files.into_iter().map(|(filename, data)| {
        ingest_one(
            &state,
            template,
            filename,
            data,
            form.preview_start_seconds,
            form.placement_hosts.clone(),
            user_wallet.clone(),
        )
    });
    let uploads = join_all(tasks)
        .await
        .into_iter()
        .collect::<Result<Vec<Upload>, AppError>>()?;

    Ok(Json(uploads).into_response())
}

async fn ingest_one(
    state: &AppState,
    template: JobTemplate,
    filename: String,
    data: Bytes,
    preview_start_seconds: Option<u32>,
    placement_hosts: Option<Vec<String>>,
    user_wallet: Option<String>,
) -> Result<Upload, AppError> {
    let id = Uuid::now_v7().to_string();
    let cid = compute_cid(&data);

    // probe through a temp file; audio that ffprobe cannot read is rejected
    let ffprobe = {
        let mut temp = tempfile::NamedTempFile::new()
            .map_err(|e| AppError::Internal(format!("create temp file: {e}")))?;
        temp.write_all(&data)
            .map_err(|e| AppError::Internal(format!("write temp file: {e}")))?;
        temp.flush()
            .map_err(|e| AppError::Internal(format!("flush temp file: {e}")))?;
        match chorus_transcode::ffprobe::probe(temp.path()).await {
            Ok(info) => Some(info),
            Err(err) => {
                if template == JobTemplate::Audio {
                    return Err(AppError::Validation(format!(
                        "{filename} is not probeable audio: {err}"
                    )));
                }
                None
            }
        }
    };

    let mirrors = state
        .replicate_file(&cid, &data, placement_hosts.as_deref())
        .await;
    tracing::info!(name = %filename, id = %id, cid = %cid, ?mirrors, "mirrored upload");

    let mut upload = Upload {
        id,
        user_wallet,
        template,
        orig_filename: filename,
        orig_file_cid: cid.clone(),
        selected_preview: preview_start_seconds.map(preview_variant),
        ffprobe,
        mirrors,
        transcoded_mirrors: Vec::new(),
        transcode_results: Default::default(),
        status: JobStatus::New,
        error: String::new(),
        error_count: 0,
        transcode_progress: 0.0,
        created_by: state.self_host().to_string(),
        transcoded_by: String::new(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
        transcoded_at: None,
        placement_hosts,
    };

    // image originals are themselves a servable variant
    if matches!(template, JobTemplate::ImgSquare | JobTemplate::ImgBackdrop) {
        upload
            .transcode_results
            .insert("original.jpg".to_string(), cid.clone());
    }

    state.uploads.insert(&upload).await?;

    // fast path: hand straight to a worker when the source landed here
    if state
        .bucket
        .exists(&shard_cid(&cid))
        .await
        .unwrap_or(false)
    {
        state.try_dispatch_job(upload.clone());
    }

    Ok(upload)
}

/// GET `/uploads`: recent jobs, newest first.
pub async fn get_uploads(
    State(state): State<Arc<AppState>>,
) -> Result<Response, HttpAppError> {
    let uploads = state.uploads.list_recent(LIST_LIMIT).await?;
    Ok(Json(uploads).into_response())
}

/// GET `/uploads/{id}`: job record; 422 when the job has errored.
pub async fn get_upload(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, HttpAppError> {
    let upload = state
        .uploads
        .get(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("upload not found: {id}")))?;

    if upload.status == JobStatus::Error {
        return Ok((StatusCode::UNPROCESSABLE_ENTITY, Json(upload)).into_response());
    }
    Ok(Json(upload).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUploadBody {
    pub preview_start_seconds: u32,
}

/// POST `/uploads/{id}`: change the selected preview. Requires a signature
/// from the uploader's wallet; an unchanged selection is a no-op.
pub async fn update_upload(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<UploadQuery>,
    Json(body): Json<UpdateUploadBody>,
) -> Result<Response, HttpAppError> {
    let mut upload = state
        .uploads
        .get(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("upload not found: {id}")))?;

    let raw = query
        .signature
        .ok_or_else(|| AppError::NotAuthorized("missing signature".into()))?;
    let envelope = SignatureEnvelope::parse(&raw)?;
    // the envelope must be bound to this upload and within the staleness
    // window, or any old streaming signature would replay as ownership proof
    envelope.validate_for_cid(&upload.id, Utc::now())?;
    let wallet = envelope.signer_wallet()?;
    let owner = upload
        .user_wallet
        .clone()
        .ok_or_else(|| AppError::NotAuthorized("upload has no owner wallet".into()))?;
    if !owner.eq_ignore_ascii_case(&wallet) {
        return Err(AppError::NotAuthorized(format!(
            "signer {wallet} does not own upload {id}"
        ))
        .into());
    }

    let new_preview = preview_variant(body.preview_start_seconds);
    if upload.selected_preview.as_deref() == Some(new_preview.as_str()) {
        // identical selection: no state transition
        return Ok(Json(upload).into_response());
    }

    upload.selected_preview = Some(new_preview);
    if upload.status == JobStatus::Done {
        upload.status = JobStatus::Retranscode;
    }
    upload.transcode_progress = 0.0;
    upload.transcoded_at = Some(Utc::now());
    state.uploads.save(&upload).await?;

    // dispatch directly when the 320 derivative is already on this node
    if let Some(source) = upload.source_cid() {
        if state
            .bucket
            .exists(&shard_cid(source))
            .await
            .unwrap_or(false)
        {
            state.try_dispatch_job(upload.clone());
        }
    }

    Ok(Json(upload).into_response())
}

/// OPTIONS `/uploads`: CORS preflight answered directly because the reverse
/// proxy in front of fleets intercepts it otherwise.
pub async fn options_uploads() -> StatusCode {
    StatusCode::NO_CONTENT
}
