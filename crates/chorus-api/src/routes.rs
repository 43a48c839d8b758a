//! Route table.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{blobs, cuckoo, health, uploads};
use crate::state::AppState;

const MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 1024;

pub fn build_router(state: Arc<AppState>) -> Router {
    // public routes sit behind the healthy gate
    let public = Router::new()
        .route(
            "/uploads",
            post(uploads::post_uploads)
                .get(uploads::get_uploads)
                .options(uploads::options_uploads),
        )
        .route(
            "/uploads/{id}",
            get(uploads::get_upload).post(uploads::update_upload),
        )
        .route("/content/{cid}", get(blobs::get_blob))
        .route("/ipfs/{cid}", get(blobs::get_blob))
        .route(
            "/content/{job_id}/{variant}",
            get(blobs::get_blob_by_job_and_variant),
        )
        .route(
            "/ipfs/{job_id}/{variant}",
            get(blobs::get_blob_by_job_and_variant),
        )
        .route("/tracks/cidstream/{cid}", get(blobs::get_cidstream))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            health::require_healthy,
        ));

    let internal = Router::new()
        .route("/internal/cuckoo", get(cuckoo::serve_cuckoo))
        .route("/internal/cuckoo/size", get(cuckoo::serve_cuckoo_size))
        .route("/internal/cuckoo/{cid}", get(cuckoo::serve_cuckoo_lookup))
        .route("/internal/blobs", post(blobs::internal_push_blob))
        .route(
            "/internal/blobs/{cid}",
            get(blobs::internal_pull_blob).delete(blobs::internal_delete_blob),
        )
        .route(
            "/internal/blobs/location/{cid}",
            get(blobs::get_blob_location),
        )
        .route("/internal/blobs/info/{cid}", get(blobs::get_blob_info));

    Router::new()
        .merge(public)
        .merge(internal)
        .route("/health_check", get(health::health_check))
        .route("/ip_check", get(health::ip_check))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
