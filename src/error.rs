//! Error handling for camwatch

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Camera identifier unknown to the camera directory
    #[error("Camera not found: {0}")]
    CameraNotFound(String),

    /// Model identifier unknown to the model registry
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// A worker for this (camera, model) pair is already running
    #[error("Model {model_id} already running on camera {camera_id}")]
    AlreadyRunning { camera_id: String, model_id: String },

    /// No worker for this (camera, model) pair
    #[error("Model {model_id} was not running on camera {camera_id}")]
    NotRunning { camera_id: String, model_id: String },

    /// Camera unreachable or unopenable
    #[error("Connection to camera {camera_id} failed: {message}")]
    Connection { camera_id: String, message: String },

    /// Another consumer holds the camera guard
    #[error("Camera {0} busy")]
    Busy(String),

    /// Previously open stream stopped producing frames
    #[error("Source lost for camera {0}")]
    SourceLost(String),

    /// Stream open but no frame arrived in time
    #[error("No frame available from camera {0}")]
    NoFrame(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// SQLx database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Status code and machine-readable code for the control surface
    pub fn status(&self) -> (StatusCode, &'static str) {
        match self {
            Error::CameraNotFound(_) => (StatusCode::NOT_FOUND, "CAMERA_NOT_FOUND"),
            Error::ModelNotFound(_) => (StatusCode::NOT_FOUND, "MODEL_NOT_FOUND"),
            Error::AlreadyRunning { .. } => (StatusCode::CONFLICT, "ALREADY_RUNNING"),
            Error::NotRunning { .. } => (StatusCode::CONFLICT, "NOT_RUNNING"),
            Error::Connection { .. } => (StatusCode::BAD_GATEWAY, "CONNECTION_ERROR"),
            Error::Busy(_) => (StatusCode::SERVICE_UNAVAILABLE, "CAMERA_BUSY"),
            Error::SourceLost(_) => (StatusCode::SERVICE_UNAVAILABLE, "SOURCE_LOST"),
            Error::NoFrame(_) => (StatusCode::SERVICE_UNAVAILABLE, "NO_FRAME"),
            Error::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Error::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
            Error::Http(_) => (StatusCode::BAD_GATEWAY, "HTTP_ERROR"),
            Error::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
            Error::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code) = self.status();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                error_code = %error_code,
                message = %message,
                "Request error"
            );
        } else {
            tracing::warn!(
                status = %status,
                error_code = %error_code,
                message = %message,
                "Request rejected"
            );
        }

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
