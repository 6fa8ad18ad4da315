//! IntaSend webhook endpoint.

use crate::services::intasend::SIGNATURE_HEADER;
use crate::services::metrics::record_error;
use crate::services::reconciler::GatewayEvent;
use crate::startup::AppState;
use axum::{extract::State, http::HeaderMap, Json};
use serde_json::{json, Value};
use service_core::error::AppError;

pub async fn intasend_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Value>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let is_valid = state
        .intasend
        .verify_webhook_signature(body.as_bytes(), signature)
        .map_err(|e| {
            record_error("webhook_verification");
            tracing::error!(error = %e, "Webhook signature verification error");
            AppError::InternalError(anyhow::anyhow!("Webhook verification failed"))
        })?;

    if !is_valid {
        record_error("webhook_signature");
        tracing::warn!("Invalid webhook signature");
        return Err(AppError::Unauthorized(anyhow::anyhow!(
            "Invalid webhook signature"
        )));
    }

    let event: GatewayEvent = serde_json::from_str(&body).map_err(|e| {
        record_error("webhook_payload");
        tracing::warn!(error = %e, "Failed to parse webhook event");
        AppError::BadRequest(anyhow::anyhow!("Invalid webhook payload"))
    })?;

    let ack = state.reconciler.handle(event).await?;

    Ok(Json(json!({ "status": ack.as_str() })))
}
