use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::services::{queue::QueueError, storage::StorageError};

/// Unified API error type. Internal failures are logged server-side;
/// callers only ever see a status code and a short message.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    UnsupportedMediaType(String),
    Storage(StorageError),
    Queue(QueueError),
    Database(sqlx::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::UnsupportedMediaType(msg) => (StatusCode::UNSUPPORTED_MEDIA_TYPE, msg),
            ApiError::Storage(StorageError::UnsupportedContentType(ct)) => (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                format!("unsupported content type: {ct}"),
            ),
            ApiError::Storage(err) => {
                tracing::error!(error = %err, "Blob store error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "failed to store uploaded image".to_string(),
                )
            }
            ApiError::Queue(err) => {
                tracing::error!(error = %err, "Queue error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "failed to enqueue job".to_string(),
                )
            }
            ApiError::Database(err) => {
                tracing::error!(error = %err, "Database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Database(err)
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError::Storage(err)
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        ApiError::Queue(err)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
