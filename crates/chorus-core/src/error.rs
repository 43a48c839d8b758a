use thiserror::Error;

/// Log severity hint for an error, consumed by the HTTP layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Warn,
    Error,
}

/// Application-level error shared across crates.
///
/// Each variant maps to an HTTP status and a log level so that handlers can
/// convert uniformly. Background loops log and retry instead of surfacing.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("not authorized: {0}")]
    NotAuthorized(String),

    #[error("dependency unavailable: {0}")]
    Dependency(String),

    #[error("node degraded: {0}")]
    Degraded(String),

    #[error("wallet not registered")]
    Unregistered,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn http_status_code(&self) -> u16 {
        match self {
            AppError::NotFound(_) => 404,
            AppError::Validation(_) => 400,
            AppError::NotAuthorized(_) => 401,
            AppError::Dependency(_) => 502,
            AppError::Degraded(_) => 503,
            AppError::Unregistered => 506,
            AppError::Database(_) | AppError::Internal(_) => 500,
        }
    }

    pub fn log_level(&self) -> LogLevel {
        match self {
            AppError::NotFound(_) | AppError::Validation(_) => LogLevel::Debug,
            AppError::NotAuthorized(_) | AppError::Degraded(_) | AppError::Unregistered => {
                LogLevel::Warn
            }
            AppError::Dependency(_) | AppError::Database(_) | AppError::Internal(_) => {
                LogLevel::Error
            }
        }
    }

    /// Message safe to return to clients.
    pub fn client_message(&self) -> String {
        self.to_string()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(format!("io error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_error_kinds() {
        assert_eq!(AppError::NotFound("x".into()).http_status_code(), 404);
        assert_eq!(AppError::Validation("x".into()).http_status_code(), 400);
        assert_eq!(AppError::NotAuthorized("x".into()).http_status_code(), 401);
        assert_eq!(AppError::Degraded("disk".into()).http_status_code(), 503);
        assert_eq!(AppError::Unregistered.http_status_code(), 506);
        assert_eq!(AppError::Dependency("peer".into()).http_status_code(), 502);
    }

    #[test]
    fn validation_errors_log_quietly() {
        assert_eq!(
            AppError::Validation("bad cid".into()).log_level(),
            LogLevel::Debug
        );
        assert_eq!(
            AppError::Dependency("bucket".into()).log_level(),
            LogLevel::Error
        );
    }
}
