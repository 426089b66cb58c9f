use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::error::AppError;

/// Converts AppError into a JSON error response.
///
/// Storage and internal failures are logged here and answered with a
/// generic message so backend details never reach the client.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::Conflict(_) => (
                StatusCode::CONFLICT,
                "Document was modified concurrently, please retry".to_string(),
            ),
            AppError::Database(_) | AppError::Storage(_) => {
                tracing::error!(error = %self, "Request failed on a storage backend");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Temporary storage failure, please retry".to_string(),
                )
            }
            AppError::Internal(_) => {
                tracing::error!(error = %self, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, axum::Json(body)).into_response()
    }
}
