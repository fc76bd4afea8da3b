use std::env::VarError;

use axum::{http::StatusCode, response::{IntoResponse, Response}};
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Failed to decode base64, `{0:?}`")]
    Base64DecodeError(#[from] base64::DecodeError),

    #[error("IO error: `{0:?}`")]
    IOError(#[from] std::io::Error),

    #[error("Reqwest error: `{0:?}`")]
    ReqwestError(#[from] reqwest::Error),

    #[error("Slack error: `{0:?}`")]
    SlackError(String),

    #[error("Bluesky error: `{0:?}`")]
    BlueskyError(String),

    #[error("SQLite error: `{0:?}`")]
    SqlxError(#[from] sqlx::Error),

    #[error("Failed to parse json: `{0:?}`")]
    SerdeJsonError(#[from] serde_json::Error),

    #[error("Failed to parse manifest: `{0:?}`")]
    SerdeYamlError(#[from] serde_yaml::Error),

    #[error("Failed to encrypt/decrypt: `{0:?}`")]
    Chacha20poly1305Error(#[from] chacha20poly1305::Error),

    #[error("Failed to load enviroment variable: `{0:?}`")]
    VarError(#[from] VarError),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Invalid Slack request signature: {0}")]
    InvalidSignature(String),

    #[error("Invalid OAuth state")]
    InvalidOAuthState,

    #[error("{0}")]
    WorkspaceNotApproved(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Failed to process video: {0}")]
    VideoProcessingError(String),

    #[error("Unexpected error: `{0:?}`")]
    UnexpectedError(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidSignature(_) => StatusCode::UNAUTHORIZED,
            AppError::InvalidOAuthState | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::WorkspaceNotApproved(_) => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// internal details stay in the log, clients only see the client-side errors
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            error!(error = ?self, "Request failed");
            (status, "Internal server error".to_string()).into_response()
        } else {
            (status, self.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::AppError;

    #[test]
    fn maps_client_errors_to_4xx() {
        assert_eq!(AppError::InvalidSignature("stale".to_string()).status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::InvalidOAuthState.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::WorkspaceNotApproved("nope".to_string()).status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn maps_everything_else_to_500() {
        assert_eq!(AppError::SlackError("invalid_auth".to_string()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(AppError::VideoProcessingError("timeout".to_string()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
