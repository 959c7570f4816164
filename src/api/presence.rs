//! Presence API endpoints.

use axum::{extract::rejection::JsonRejection, extract::State, Json};
use serde_json::Value;

use crate::errors::{AppError, AppErrorWithRevision};
use crate::models::{ActiveUsersResponse, HeartbeatRequest, HeartbeatResponse};
use crate::AppState;

/// POST /api/presence - Record a heartbeat for the calling user.
pub async fn heartbeat(
    State(state): State<AppState>,
    body: Result<Json<HeartbeatRequest>, JsonRejection>,
) -> Result<Json<HeartbeatResponse>, AppErrorWithRevision> {
    let Json(request) = body.map_err(AppError::from)?;

    let user_id = match request.user_id {
        Some(Value::String(user_id)) if !user_id.trim().is_empty() => user_id,
        Some(Value::String(_)) | None | Some(Value::Null) => {
            return Err(AppError::Validation("userId is required".to_string()).into())
        }
        Some(_) => {
            return Err(AppError::Validation("userId must be a string".to_string()).into())
        }
    };

    let active = state.presence.heartbeat(&user_id, request.profile).await?;

    Ok(Json(HeartbeatResponse { ok: true, active }))
}

/// GET /api/presence - List users seen within the staleness threshold.
pub async fn active_users(State(state): State<AppState>) -> Json<ActiveUsersResponse> {
    Json(ActiveUsersResponse {
        users: state.presence.get_active().await,
    })
}
