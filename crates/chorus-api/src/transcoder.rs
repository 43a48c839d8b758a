//! Transcode worker pool, job state machine, and crash-recovery sweeper.
//!
//! Jobs move `new → busy → done|error` (and the `retranscode` arm for
//! preview changes). Workers pull from a capacity-one channel, so the
//! sweeper can never run ahead of the pool by more than one handoff.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chorus_core::cid::compute_cid;
use chorus_core::config::Env;
use chorus_core::models::{preview_start_seconds, JobStatus, JobTemplate, Upload, VARIANT_AUDIO_320};
use chorus_core::AppError;
use chorus_storage::shard_cid;
use chorus_transcode::error_filter::filter_error_lines;
use chorus_transcode::{audio, image_ops};
use chrono::Utc;
use tokio::sync::{mpsc, Semaphore};

use crate::state::AppState;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Start the pool: recover stuck rows, spawn the dispatcher, run the
/// sweeper until shutdown.
pub async fn start(state: Arc<AppState>, work_rx: mpsc::Receiver<Upload>) {
    // On boot, any job this host left in progress goes back to its pickup
    // state before workers can claim anything.
    match state.uploads.reset_stuck(state.self_host()).await {
        Ok(0) => {}
        Ok(count) => tracing::info!(count, "reset stuck uploads"),
        Err(err) => tracing::warn!(error = %err, "reset stuck uploads failed"),
    }

    let workers = state.config.transcode_workers(num_cpus::get());
    tracing::info!(workers, "transcode worker pool started");

    tokio::spawn(dispatch_loop(state.clone(), work_rx, workers));

    // Nodes that do not hold every original skip sweeping in prod; they
    // would claim jobs whose source they cannot read.
    if state.config.env == Env::Prod && !state.config.store_all {
        return;
    }

    loop {
        tokio::time::sleep(SWEEP_INTERVAL).await;
        if let Err(err) = sweep(&state).await {
            tracing::warn!(error = %err, "job sweep failed");
        }
    }
}

async fn dispatch_loop(state: Arc<AppState>, mut work_rx: mpsc::Receiver<Upload>, workers: usize) {
    let semaphore = Arc::new(Semaphore::new(workers));
    while let Some(upload) = work_rx.recv().await {
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let state = state.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let id = upload.id.clone();
            tracing::debug!(upload = %id, "transcoding");
            if let Err(err) = transcode(&state, upload).await {
                tracing::warn!(upload = %id, error = %err, "transcode failed");
            }
        });
    }
}

/// Find jobs that slipped through the cracks and hand them to the pool.
async fn sweep(state: &AppState) -> Result<(), AppError> {
    let candidates = state.uploads.sweep_candidates().await?;
    for upload in candidates {
        let Some(source) = upload.source_cid().map(String::from) else {
            continue;
        };
        // only claim jobs whose source bytes are actually here
        let have = state
            .bucket
            .exists(&shard_cid(&source))
            .await
            .unwrap_or(false);
        if !have {
            continue;
        }
        state.dispatch_job(upload).await?;
    }
    Ok(())
}

/// Record a failure on the job row, bounding repetitive encoder output.
async fn fail_job(
    state: &AppState,
    upload: &mut Upload,
    raw_error: String,
    context: &str,
) -> AppError {
    let filtered = filter_error_lines(&raw_error);
    let message = format!("{} {}", filtered.trim_end(), context);
    upload.error = message.clone();
    upload.status = upload.status.error_form();
    upload.error_count += 1;
    upload.transcoded_at = Some(Utc::now());
    if let Err(err) = state.uploads.save(upload).await {
        tracing::error!(upload = %upload.id, error = %err, "failed to persist job error");
    }
    AppError::Internal(message)
}

/// Drive one job through its transcode.
pub async fn transcode(state: &AppState, mut upload: Upload) -> Result<(), AppError> {
    upload.transcoded_by = state.self_host().to_string();
    upload.transcoded_at = Some(Utc::now());
    upload.status = upload.status.busy_form();
    upload.transcode_progress = 0.0;
    state.uploads.save(&upload).await?;

    let source_cid = upload
        .source_cid()
        .map(String::from)
        .ok_or_else(|| AppError::Internal("job has no source cid".into()))?;

    let source = match state.bucket.read(&shard_cid(&source_cid)).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return Err(fail_job(state, &mut upload, err.to_string(), "getting file").await);
        }
    };

    let result = match upload.template {
        JobTemplate::ImgSquare => {
            transcode_image(state, &mut upload, &source, &[150, 480, 1000], true).await
        }
        JobTemplate::ImgBackdrop => {
            transcode_image(state, &mut upload, &source, &[640, 2000], false).await
        }
        JobTemplate::Audio => {
            if upload.status == JobStatus::BusyRetranscode {
                transcode_audio_preview_only(state, &mut upload, &source).await
            } else {
                transcode_full_audio(state, &mut upload, &source).await
            }
        }
    };
    result?;

    upload.transcode_progress = 1.0;
    upload.transcoded_at = Some(Utc::now());
    upload.status = JobStatus::Done;
    upload.error = String::new();
    state.uploads.save(&upload).await?;
    Ok(())
}

async fn transcode_image(
    state: &AppState,
    upload: &mut Upload,
    source: &Bytes,
    sizes: &[u32],
    square: bool,
) -> Result<(), AppError> {
    let img = match image_ops::decode(source) {
        Ok(img) => img,
        Err(err) => {
            return Err(fail_job(state, upload, err.to_string(), "decoding image").await);
        }
    };

    for &size in sizes {
        let encoded = if square {
            image_ops::resize_square(&img, size)
        } else {
            image_ops::resize_width(&img, size)
        };
        let jpeg = match encoded {
            Ok(jpeg) => Bytes::from(jpeg),
            Err(err) => {
                return Err(fail_job(state, upload, err.to_string(), "resizing image").await);
            }
        };

        let result_cid = compute_cid(&jpeg);
        let mirrors = state
            .replicate_file(&result_cid, &jpeg, upload.placement_hosts.as_deref())
            .await;
        tracing::debug!(
            upload = %upload.id,
            size,
            cid = %result_cid,
            ?mirrors,
            "produced image variant"
        );

        let variant = if square {
            format!("{size}x{size}.jpg")
        } else {
            format!("{size}x.jpg")
        };
        upload.transcode_results.insert(variant, result_cid);
    }
    Ok(())
}

/// Write bytes to a named temp file for subprocess consumption.
fn bytes_to_temp_file(bytes: &[u8]) -> Result<tempfile::NamedTempFile, AppError> {
    let mut temp = tempfile::NamedTempFile::new()
        .map_err(|e| AppError::Internal(format!("create temp file: {e}")))?;
    temp.write_all(bytes)
        .map_err(|e| AppError::Internal(format!("write temp file: {e}")))?;
    temp.flush()
        .map_err(|e| AppError::Internal(format!("flush temp file: {e}")))?;
    Ok(temp)
}

/// Spawn a task that persists progress reports as they arrive.
fn spawn_progress_writer(
    state: &AppState,
    upload_id: String,
) -> mpsc::UnboundedSender<f64> {
    let (tx, mut rx) = mpsc::unbounded_channel::<f64>();
    let uploads = state.uploads.clone();
    tokio::spawn(async move {
        while let Some(progress) = rx.recv().await {
            if let Err(err) = uploads.patch_progress(&upload_id, progress).await {
                tracing::warn!(upload = %upload_id, error = %err, "progress update failed");
            }
        }
    });
    tx
}

async fn transcode_full_audio(
    state: &AppState,
    upload: &mut Upload,
    source: &Bytes,
) -> Result<(), AppError> {
    let temp = bytes_to_temp_file(source)?;
    let dest: PathBuf = PathBuf::from(format!("{}_320.mp3", temp.path().display()));

    let duration = upload.ffprobe.as_ref().and_then(|p| p.duration);
    let progress = spawn_progress_writer(state, upload.id.clone());

    let encoded = audio::encode_full(
        temp.path(),
        &dest,
        &upload.orig_filename,
        &upload.id,
        duration,
        Some(progress),
    )
    .await;
    if let Err(err) = encoded {
        let _ = tokio::fs::remove_file(&dest).await;
        return Err(fail_job(state, upload, err.to_string(), "ffmpeg").await);
    }

    // The hashed bytes and the replicated bytes are the same file on disk.
    let result = tokio::fs::read(&dest).await;
    let _ = tokio::fs::remove_file(&dest).await;
    let result_bytes = match result {
        Ok(bytes) => Bytes::from(bytes),
        Err(err) => {
            return Err(fail_job(state, upload, err.to_string(), "reading encoder output").await);
        }
    };

    let result_cid = compute_cid(&result_bytes);
    upload.transcoded_mirrors = state
        .replicate_file(&result_cid, &result_bytes, upload.placement_hosts.as_deref())
        .await;
    // the transcoding host retains the derivative as well
    if let Err(err) = state.replicate_to_my_bucket(&result_cid, &result_bytes).await {
        tracing::warn!(upload = %upload.id, error = %err, "failed to retain derivative locally");
    }
    upload
        .transcode_results
        .insert(VARIANT_AUDIO_320.to_string(), result_cid);
    tracing::info!(upload = %upload.id, mirrors = ?upload.transcoded_mirrors, "audio transcode done");

    // when a preview start is already selected, cut it from the fresh 320
    if upload.selected_preview.is_some() {
        upload.transcode_progress = 0.0;
        upload.transcoded_at = Some(Utc::now());
        upload.status = JobStatus::BusyRetranscode;
        state.uploads.save(upload).await?;
        return transcode_audio_preview(state, upload, &result_bytes).await;
    }
    Ok(())
}

/// Retranscode arm: the source bytes are the existing 320 derivative.
async fn transcode_audio_preview_only(
    state: &AppState,
    upload: &mut Upload,
    source_320: &Bytes,
) -> Result<(), AppError> {
    transcode_audio_preview(state, upload, source_320).await
}

async fn transcode_audio_preview(
    state: &AppState,
    upload: &mut Upload,
    bytes_320: &Bytes,
) -> Result<(), AppError> {
    let Some(selected) = upload.selected_preview.clone() else {
        tracing::info!(upload = %upload.id, "no preview start set, skipping preview transcode");
        return Ok(());
    };
    let Some(start) = preview_start_seconds(&selected) else {
        return Err(fail_job(
            state,
            upload,
            format!("unparseable preview selection: {selected}"),
            "preview",
        )
        .await);
    };

    let temp = bytes_to_temp_file(bytes_320)?;
    let dest: PathBuf = PathBuf::from(format!("{}_320_preview.mp3", temp.path().display()));
    let progress = spawn_progress_writer(state, upload.id.clone());

    let encoded = audio::encode_preview(
        temp.path(),
        &dest,
        start,
        &upload.orig_filename,
        &upload.id,
        Some(progress),
    )
    .await;
    if let Err(err) = encoded {
        let _ = tokio::fs::remove_file(&dest).await;
        return Err(fail_job(state, upload, err.to_string(), "ffmpeg preview").await);
    }

    let result = tokio::fs::read(&dest).await;
    let _ = tokio::fs::remove_file(&dest).await;
    let result_bytes = match result {
        Ok(bytes) => Bytes::from(bytes),
        Err(err) => {
            return Err(fail_job(state, upload, err.to_string(), "reading preview output").await);
        }
    };

    let result_cid = compute_cid(&result_bytes);
    let mirrors = state
        .replicate_file(&result_cid, &result_bytes, upload.placement_hosts.as_deref())
        .await;
    upload.transcode_results.insert(selected, result_cid);
    tracing::info!(upload = %upload.id, ?mirrors, "audio preview transcode done");
    Ok(())
}
