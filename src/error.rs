use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{debug, error};

/// Application-level failures. Local degrade paths (malformed caption text,
/// missing caption records) are handled where they occur and never become an
/// `AppError`; everything here is surfaced to the HTTP boundary.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("object {0} not found in bucket")]
    NotFound(String),

    #[error("storage request failed: {0}")]
    TransientStore(String),

    #[error("caption generation failed: {0}")]
    Generation(String),

    #[error("invalid upload: {0}")]
    InvalidUpload(String),

    #[error("multipart form is missing a form_file field with a filename")]
    MissingFile,

    #[error("staging failed: {0}")]
    Staging(#[from] std::io::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidUpload(_) | AppError::MissingFile => StatusCode::BAD_REQUEST,
            AppError::TransientStore(_) | AppError::Generation(_) => StatusCode::BAD_GATEWAY,
            AppError::Staging(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self, "request failed");
        } else {
            debug!(error = %self, "request rejected");
        }
        (status, format!("Error: {self}")).into_response()
    }
}
