//! Error handling module

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use thiserror::Error;

/// Outcome of a failed remote directory or token issuer call.
///
/// Every network-facing boundary resolves to this value instead of
/// panicking; [`RemoteError::sentinel`] renders the uniform `{errno}` shape.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Invalid Remote API URL - {0}")]
    Configuration(String),

    #[error("No valid access token for {0}")]
    Unauthorized(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("Request timed out")]
    Timeout,

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Invalid response body: {0}")]
    Decode(String),
}

impl RemoteError {
    pub fn errno(&self) -> String {
        self.to_string()
    }

    pub fn sentinel(&self) -> Value {
        serde_json::json!({ "errno": self.errno() })
    }

    /// Configuration problems will not go away by retrying
    pub fn is_configuration(&self) -> bool {
        matches!(self, RemoteError::Configuration(_))
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RemoteError::Timeout
        } else if let Some(status) = e.status() {
            RemoteError::Status(status.as_u16())
        } else if e.is_decode() {
            RemoteError::Decode(e.to_string())
        } else {
            RemoteError::Transport(e.to_string())
        }
    }
}

/// Failure reported by the host accessory registry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("Accessory {0} is already registered")]
    AlreadyRegistered(String),

    #[error("Accessory {0} is not registered")]
    NotRegistered(String),

    #[error("Host registry unavailable: {0}")]
    Unavailable(String),
}

/// Reason a discovery cycle was aborted before touching the registry
#[derive(Error, Debug, PartialEq)]
pub enum SyncError {
    #[error("Remote directory fetch failed: {0}")]
    Fetch(#[from] RemoteError),

    #[error("Invalid response from remote API: {0}")]
    InvalidDirectory(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            // Plain-text diagnostic, the push surface answers 404s this way
            AppError::NotFound(msg) => {
                return (StatusCode::NOT_FOUND, format!("WARNING: {}", msg)).into_response();
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(serde_json::json!({
            "error": message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}
