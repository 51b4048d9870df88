//! Push ingestion: `PATCH /api/`

use axum::{extract::rejection::JsonRejection, extract::State, Json};
use serde_json::Value;

use crate::api::ApiState;
use crate::error::AppError;
use crate::models::PushPayload;

/// Apply pushed characteristic values to a synchronised device.
///
/// Answers with the device snapshot after the update. Entries that fail
/// validation are logged and dropped; the rest still apply.
pub async fn update_device(
    State(state): State<ApiState>,
    payload: Result<Json<PushPayload>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(payload) = payload.map_err(|e| {
        tracing::warn!("[DirectConnect] Rejected push body: {}", e.body_text());
        AppError::BadRequest(e.body_text())
    })?;

    if state.registry.bridge_count().await == 0 {
        tracing::warn!(
            "[DirectConnect] Push for {} before any device was synchronised",
            payload.uuid
        );
        return Err(AppError::NotFound(format!(
            "No devices synchronised from {}",
            state.source
        )));
    }

    let Some(bridge) = state.registry.bridge(&payload.uuid).await else {
        tracing::warn!(
            "[DirectConnect] Device with uuid {} is not synchronised",
            payload.uuid
        );
        return Err(AppError::NotFound(format!(
            "No device with uuid {} synchronised from {}",
            payload.uuid, state.source
        )));
    };

    let outcome = bridge.push_update(&payload.fields).await;
    tracing::debug!(
        "[DirectConnect] Push for {}: {} applied, {} rejected",
        payload.uuid,
        outcome.applied.len(),
        outcome.rejected.len()
    );

    let record = bridge.record().await;
    serde_json::to_value(&record.device)
        .map(Json)
        .map_err(|e| AppError::InternalError(e.to_string()))
}
