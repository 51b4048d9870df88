//! HTTP handlers module

mod push;
mod status;

pub use self::push::*;
pub use self::status::*;

use axum::{response::IntoResponse, Json};
use serde::Serialize;

use crate::error::AppError;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "DirectConnectBridge".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Fallback for unrouted paths
pub async fn not_found() -> AppError {
    AppError::NotFound("Unknown route".to_string())
}
