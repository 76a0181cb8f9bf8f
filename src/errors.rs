use axum::http::StatusCode;
use thiserror::Error;

/// Domain errors raised by the diary core.
#[derive(Debug, Error)]
pub enum DiaryError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The store could not commit a write. Nothing was applied.
    #[error("store unavailable: {0}")]
    TransientStore(String),

    #[error("breakdown backfill failed for {day_key}: {reason}")]
    BackfillFailure { day_key: String, reason: String },

    #[error("sign-in required")]
    Unauthenticated,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("config error: {0}")]
    Config(String),
}

impl DiaryError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }
}

impl From<std::io::Error> for DiaryError {
    fn from(err: std::io::Error) -> Self {
        Self::TransientStore(err.to_string())
    }
}

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<DiaryError> for AppError {
    fn from(err: DiaryError) -> Self {
        let status = match &err {
            DiaryError::NotFound(_) => StatusCode::NOT_FOUND,
            DiaryError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            DiaryError::TransientStore(_) => StatusCode::SERVICE_UNAVAILABLE,
            DiaryError::Unauthenticated => StatusCode::UNAUTHORIZED,
            DiaryError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            DiaryError::BackfillFailure { .. } | DiaryError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        (self.status, self.message).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diary_errors_map_to_http_statuses() {
        let cases = [
            (DiaryError::not_found("day"), StatusCode::NOT_FOUND),
            (DiaryError::invalid("key"), StatusCode::BAD_REQUEST),
            (
                DiaryError::TransientStore("disk".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (DiaryError::Unauthenticated, StatusCode::UNAUTHORIZED),
            (
                DiaryError::PermissionDenied("archive".into()),
                StatusCode::FORBIDDEN,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }

    #[test]
    fn io_errors_become_transient_store_errors() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err: DiaryError = io_err.into();
        assert!(matches!(err, DiaryError::TransientStore(_)));
        assert!(err.to_string().contains("read-only"));
    }
}
