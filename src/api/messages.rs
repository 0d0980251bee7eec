//! HTTP handlers: health, session status, outbound message sending.

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::session::manager::StatusSnapshot;

use super::error::ApiError;
use super::response::ApiResponse;
use super::state::AppState;

#[derive(Serialize)]
pub struct Health {
    pub success: bool,
    pub message: &'static str,
    pub timestamp: String,
}

// GET /health
pub async fn health() -> Json<Health> {
    Json(Health {
        success: true,
        message: "Server is running",
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<ApiResponse<StatusSnapshot>> {
    Json(ApiResponse::ok(state.manager.status().await))
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub number: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageData {
    pub message_id: String,
    pub to: String,
}

// POST /api/send-message
pub async fn send_message(
    State(state): State<AppState>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Json<ApiResponse<SendMessageData>>, ApiError> {
    let number = request.number.as_deref().map(str::trim).unwrap_or_default();
    if number.is_empty() {
        return Err(ApiError::bad_request("the \"number\" field is required"));
    }

    let message = request.message.as_deref().map(str::trim).unwrap_or_default();
    if message.is_empty() {
        return Err(ApiError::bad_request("the \"message\" field is required"));
    }

    debug!(number, "send-message request");
    let sent = state.manager.send_message(number, message).await?;

    Ok(Json(ApiResponse::ok_with_message(
        SendMessageData {
            message_id: sent.id,
            to: number.to_string(),
        },
        "Message sent",
    )))
}
