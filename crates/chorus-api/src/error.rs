//! HTTP conversion of [`AppError`].
//!
//! Handlers return `Result<impl IntoResponse, HttpAppError>`; anything that
//! implements `Into<AppError>` converts with `?`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chorus_core::error::LogLevel;
use chorus_core::AppError;
use chorus_storage::StorageError;
use chorus_transcode::TranscodeError;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug)]
pub struct HttpAppError(pub AppError);

impl From<AppError> for HttpAppError {
    fn from(err: AppError) -> Self {
        HttpAppError(err)
    }
}

impl From<StorageError> for HttpAppError {
    fn from(err: StorageError) -> Self {
        let app = match err {
            StorageError::NotFound(key) => AppError::NotFound(key),
            StorageError::InvalidKey(key) => AppError::Validation(format!("invalid key: {key}")),
            other => AppError::Dependency(other.to_string()),
        };
        HttpAppError(app)
    }
}

impl From<TranscodeError> for HttpAppError {
    fn from(err: TranscodeError) -> Self {
        HttpAppError(AppError::Internal(err.to_string()))
    }
}

impl From<sqlx::Error> for HttpAppError {
    fn from(err: sqlx::Error) -> Self {
        HttpAppError(AppError::Database(err))
    }
}

impl IntoResponse for HttpAppError {
    fn into_response(self) -> Response {
        let err = &self.0;
        match err.log_level() {
            LogLevel::Debug => tracing::debug!(error = %err, "request error"),
            LogLevel::Warn => tracing::warn!(error = %err, "request error"),
            LogLevel::Error => tracing::error!(error = %err, "request error"),
        }
        let status = StatusCode::from_u16(err.http_status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            Json(ErrorResponse {
                error: err.client_message(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_not_found_maps_to_404() {
        let HttpAppError(app) = StorageError::NotFound("bafyx".into()).into();
        assert_eq!(app.http_status_code(), 404);
    }

    #[test]
    fn storage_backend_errors_map_to_502() {
        let HttpAppError(app) = StorageError::Backend("s3 down".into()).into();
        assert_eq!(app.http_status_code(), 502);
    }
}
