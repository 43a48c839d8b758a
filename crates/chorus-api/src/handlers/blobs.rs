//! Blob serving: local stream, intra-fleet redirect, pull-on-miss warming,
//! variant resolution, and the authenticated inter-peer endpoints.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Multipart, OriginalUri, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chorus_core::cid::{compute_cid, is_legacy_cid};
use chorus_core::signature::SignatureEnvelope;
use chorus_core::AppError;
use chorus_storage::shard_cid;
use chrono::Utc;
use serde::Deserialize;

use crate::auth::verify_peer_headers;
use crate::error::HttpAppError;
use crate::state::AppState;

/// Swap the host of the original request URI for a peer's authority, using
/// the environment's redirect scheme.
fn replace_host(scheme: &str, peer_host: &str, path_and_query: &str) -> String {
    let authority = peer_host
        .split("://")
        .nth(1)
        .unwrap_or(peer_host)
        .trim_end_matches('/');
    format!("{scheme}://{authority}{path_and_query}")
}

fn parse_range(headers: &HeaderMap, size: u64) -> Option<(u64, u64)> {
    let raw = headers.get(header::RANGE)?.to_str().ok()?;
    let range = raw.strip_prefix("bytes=")?;
    let (start_str, end_str) = range.split_once('-')?;
    let start: u64 = start_str.parse().ok()?;
    let end: u64 = match end_str {
        "" => size.saturating_sub(1),
        s => s.parse().ok()?,
    };
    if start > end || start >= size {
        return None;
    }
    Some((start, end.min(size.saturating_sub(1))))
}

/// GET/HEAD `/content/{cid}` and `/ipfs/{cid}`.
pub async fn get_blob(
    State(state): State<Arc<AppState>>,
    Path(cid): Path<String>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Result<Response, HttpAppError> {
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.to_string())
        .unwrap_or_else(|| uri.path().to_string());
    serve_cid(&state, &cid, &path_and_query, &headers).await
}

/// Serve-or-redirect-or-pull for one CID.
pub async fn serve_cid(
    state: &AppState,
    cid: &str,
    path_and_query: &str,
    headers: &HeaderMap,
) -> Result<Response, HttpAppError> {
    // v0 identifiers are recognized but served by the legacy path, which
    // this fleet no longer carries
    if is_legacy_cid(cid) {
        tracing::debug!(cid, "legacy cid requested");
        return Err(AppError::NotFound(format!("legacy cid not available: {cid}")).into());
    }

    let key = shard_cid(cid);
    if let Ok(attrs) = state.bucket.attributes(&key).await {
        return serve_local(state, cid, path_and_query, headers, attrs).await;
    }

    // not here: consult the holdings index, healthy hosts only
    let healthy = state.healthy_hosts();
    let candidates = state.blobs.hosts_with_key(cid, &healthy).await?;
    let candidates: Vec<String> = candidates
        .into_iter()
        .filter(|h| h != state.self_host())
        .collect();

    if let Some(holder) = state.race_host_has_blob(cid, &candidates).await {
        // cache warming: when this node is in the placement for the key,
        // pull it in and serve locally instead of bouncing the client
        let placed = state.hasher().is_placed(
            state.self_host(),
            cid,
            state.config.replication_factor,
            state.config.store_all,
        );
        if placed && state.pull_file_from_host(&holder, cid).await.is_ok() {
            if let Ok(attrs) = state.bucket.attributes(&key).await {
                return serve_local(state, cid, path_and_query, headers, attrs).await;
            }
        }

        let dest = replace_host(state.config.env.scheme(), &holder, path_and_query);
        return Ok((
            StatusCode::FOUND,
            [(header::LOCATION, dest)],
            Body::empty(),
        )
            .into_response());
    }

    Err(AppError::NotFound(format!("blob not found: {cid}")).into())
}

async fn serve_local(
    state: &AppState,
    cid: &str,
    path_and_query: &str,
    headers: &HeaderMap,
    attrs: chorus_storage::BlobAttributes,
) -> Result<Response, HttpAppError> {
    let key = shard_cid(cid);
    let mut response_headers = vec![
        (header::CONTENT_TYPE, attrs.content_type.clone()),
        (header::ETAG, format!("\"{}\"", attrs.digest)),
        (header::ACCEPT_RANGES, "bytes".to_string()),
    ];

    // streaming audio belongs on the cidstream route; warn until clients
    // have fully migrated, then this becomes a 401
    if attrs.content_type.starts_with("audio") && !path_and_query.contains("cidstream") {
        response_headers.push((header::HeaderName::from_static("x-would-block"), "true".into()));
    }

    if let Some((start, end)) = parse_range(headers, attrs.size) {
        let body = state.bucket.read_range(&key, start, end + 1).await?;
        let mut builder = Response::builder().status(StatusCode::PARTIAL_CONTENT);
        for (name, value) in response_headers {
            builder = builder.header(name, value);
        }
        let response = builder
            .header(
                header::CONTENT_RANGE,
                format!("bytes {start}-{end}/{}", attrs.size),
            )
            .header(header::CONTENT_LENGTH, body.len())
            .body(Body::from(body))
            .map_err(|e| AppError::Internal(format!("build range response: {e}")))?;
        return Ok(response);
    }

    let stream = state.bucket.read_stream(&key).await?;
    let mut builder = Response::builder().status(StatusCode::OK);
    for (name, value) in response_headers {
        builder = builder.header(name, value);
    }
    let response = builder
        .header(header::CONTENT_LENGTH, attrs.size)
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::Internal(format!("build response: {e}")))?;
    Ok(response)
}

/// GET `/content/{job_id}/{variant}`: resolve through the job's transcode
/// results, then serve the CID.
pub async fn get_blob_by_job_and_variant(
    State(state): State<Arc<AppState>>,
    Path((job_id, variant)): Path<(String, String)>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Result<Response, HttpAppError> {
    if is_legacy_cid(&job_id) {
        return Err(AppError::NotFound(format!("legacy cid not available: {job_id}")).into());
    }
    let upload = state
        .uploads
        .get(&job_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("upload not found: {job_id}")))?;
    let cid = upload.transcode_results.get(&variant).ok_or_else(|| {
        AppError::Validation(format!("variant {variant} not found for upload {job_id}"))
    })?;
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.to_string())
        .unwrap_or_else(|| uri.path().to_string());
    serve_cid(&state, cid, &path_and_query, &headers).await
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub signature: Option<String>,
}

/// GET `/tracks/cidstream/{cid}`: requires a streaming signature issued by
/// a registered node, bound to this CID and at most 48 hours old.
pub async fn get_cidstream(
    State(state): State<Arc<AppState>>,
    Path(cid): Path<String>,
    Query(query): Query<StreamQuery>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Result<Response, HttpAppError> {
    let raw = query
        .signature
        .ok_or_else(|| AppError::NotAuthorized("missing signature".into()))?;
    let envelope = SignatureEnvelope::parse(&raw)?;
    let wallet = envelope.signer_wallet()?;
    if !state.is_registered_signer(&wallet) {
        return Err(AppError::NotAuthorized(format!(
            "signer {wallet} is not a registered node"
        ))
        .into());
    }
    envelope.validate_for_cid(&cid, Utc::now())?;

    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.to_string())
        .unwrap_or_else(|| uri.path().to_string());
    serve_cid(&state, &cid, &path_and_query, &headers).await
}

/// GET `/internal/blobs/location/{cid}`: holdings rows for a CID.
pub async fn get_blob_location(
    State(state): State<Arc<AppState>>,
    Path(cid): Path<String>,
) -> Result<Response, HttpAppError> {
    let locations = state.blobs.locations(&cid).await?;
    Ok(Json(locations).into_response())
}

/// GET `/internal/blobs/info/{cid}`: local attributes, 200 iff present.
pub async fn get_blob_info(
    State(state): State<Arc<AppState>>,
    Path(cid): Path<String>,
) -> Result<Response, HttpAppError> {
    let attrs = state.bucket.attributes(&shard_cid(&cid)).await?;
    Ok(Json(attrs).into_response())
}

/// GET `/internal/blobs/{cid}`: authenticated inter-peer pull.
pub async fn internal_pull_blob(
    State(state): State<Arc<AppState>>,
    Path(cid): Path<String>,
    headers: HeaderMap,
) -> Result<Response, HttpAppError> {
    verify_peer_headers(&headers, |w| state.is_peer_wallet(w))?;

    let key = shard_cid(&cid);
    let attrs = state.bucket.attributes(&key).await?;
    let stream = state.bucket.read_stream(&key).await?;
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, attrs.content_type)
        .header(header::CONTENT_LENGTH, attrs.size)
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::Internal(format!("build response: {e}")))?;
    Ok(response)
}

/// DELETE `/internal/blobs/{cid}`: authenticated drop of a local holding.
/// Deletes the bucket object first, then the holdings row.
pub async fn internal_delete_blob(
    State(state): State<Arc<AppState>>,
    Path(cid): Path<String>,
    headers: HeaderMap,
) -> Result<Response, HttpAppError> {
    verify_peer_headers(&headers, |w| state.is_peer_wallet(w))?;
    state.drop_from_my_bucket(&cid).await?;
    Ok(Json("ok").into_response())
}

/// POST `/internal/blobs`: authenticated inter-peer push (multipart).
pub async fn internal_push_blob(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, HttpAppError> {
    let from = verify_peer_headers(&headers, |w| state.is_peer_wallet(w))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("bad multipart: {e}")))?
    {
        if field.name() != Some("files") {
            continue;
        }
        let claimed = field.file_name().unwrap_or_default().to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(format!("read multipart part: {e}")))?;

        let cid = compute_cid(&data);
        if !claimed.is_empty() && cid != claimed {
            tracing::warn!(claimed, actual = %cid, from = %from, "push blob cid mismatch");
        }
        if let Err(err) = state.replicate_to_my_bucket(&cid, &data).await {
            tracing::info!(cid = %cid, error = %err, "push blob accept failed");
        }
    }

    Ok(Json("ok").into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn replace_host_swaps_authority_and_scheme() {
        assert_eq!(
            replace_host("https", "https://node2.example.com", "/content/bafyx"),
            "https://node2.example.com/content/bafyx"
        );
        assert_eq!(
            replace_host("http", "http://localhost:3002/", "/ipfs/bafyx?x=1"),
            "http://localhost:3002/ipfs/bafyx?x=1"
        );
    }

    fn range_headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn range_from_zero() {
        assert_eq!(parse_range(&range_headers("bytes=0-"), 100), Some((0, 99)));
    }

    #[test]
    fn range_with_bounds() {
        assert_eq!(parse_range(&range_headers("bytes=5-9"), 100), Some((5, 9)));
        // end clamped to object size
        assert_eq!(
            parse_range(&range_headers("bytes=90-200"), 100),
            Some((90, 99))
        );
    }

    #[test]
    fn range_rejects_nonsense() {
        assert_eq!(parse_range(&range_headers("bytes=200-"), 100), None);
        assert_eq!(parse_range(&range_headers("bytes=9-5"), 100), None);
        assert_eq!(parse_range(&range_headers("chunks=0-5"), 100), None);
        assert_eq!(parse_range(&HeaderMap::new(), 100), None);
    }
}
