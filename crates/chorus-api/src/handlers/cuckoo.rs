//! Membership filter endpoints.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chorus_core::AppError;
use serde_json::json;

use crate::cuckoo;
use crate::error::HttpAppError;
use crate::state::{AppState, MY_CUCKOO_KEY};

/// GET `/internal/cuckoo`: stream the current advertisement with a strong
/// ETag; honors `If-None-Match`.
pub async fn serve_cuckoo(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, HttpAppError> {
    let attrs = state.bucket.attributes(MY_CUCKOO_KEY).await?;
    let etag = attrs.digest.clone();

    if let Some(prior) = headers.get(header::IF_NONE_MATCH).and_then(|v| v.to_str().ok()) {
        if prior == etag {
            return Ok(StatusCode::NOT_MODIFIED.into_response());
        }
    }

    let stream = state.bucket.read_stream(MY_CUCKOO_KEY).await?;
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::ETAG, &etag)
        .header(header::LAST_MODIFIED, attrs.mod_time.to_rfc2822())
        .header(header::CONTENT_LENGTH, attrs.size)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::Internal(format!("build response: {e}")))?;
    Ok(response)
}

/// GET `/internal/cuckoo/size`: per-peer filter size and etag.
pub async fn serve_cuckoo_size(State(state): State<Arc<AppState>>) -> Response {
    let mut sizes: HashMap<String, serde_json::Value> = HashMap::new();
    {
        let filters = state.cuckoo_filters.read().expect("lock poisoned");
        let etags = state.cuckoo_etags.read().expect("lock poisoned");
        for (host, filter) in filters.iter() {
            sizes.insert(
                host.clone(),
                json!({
                    "size": filter.len(),
                    "etag": etags.get(host).cloned().unwrap_or_default(),
                }),
            );
        }
    }
    Json(sizes).into_response()
}

/// GET `/internal/cuckoo/{cid}`: peers whose filter admits the CID.
pub async fn serve_cuckoo_lookup(
    State(state): State<Arc<AppState>>,
    Path(cid): Path<String>,
) -> Response {
    Json(cuckoo::lookup(&state, &cid)).into_response()
}
