//! Shared dashboard state endpoints.

use axum::{extract::rejection::JsonRejection, extract::State, Json};
use serde_json::Value;

use super::{error, success, ApiResult};
use crate::errors::AppError;
use crate::models::{UpdateStateRequest, DASHBOARD_KEY};
use crate::AppState;

/// GET /api/state - Get the dashboard state, `null` if never written.
pub async fn get_state(State(state): State<AppState>) -> ApiResult<Value> {
    match state.store.get(DASHBOARD_KEY).await {
        Ok(Some(doc)) => success(doc.body, doc.version),
        Ok(None) => success(Value::Null, 0),
        Err(e) => error(e, 0),
    }
}

/// PUT /api/state - Replace the dashboard state.
///
/// With `expectedVersion` the write only lands if nobody wrote since that
/// version; `0` means the state must not exist yet.
pub async fn update_state(
    State(state): State<AppState>,
    body: Result<Json<UpdateStateRequest>, JsonRejection>,
) -> ApiResult<Value> {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => return error(rejection.into(), 0),
    };

    let Some(data) = request.data else {
        return error(AppError::Validation("data is required".to_string()), 0);
    };

    let result = match request.expected_version {
        None => state.store.upsert(DASHBOARD_KEY, &data).await,
        Some(0) => state.store.compare_and_swap(DASHBOARD_KEY, &data, None).await,
        Some(expected) => {
            state
                .store
                .compare_and_swap(DASHBOARD_KEY, &data, Some(expected))
                .await
        }
    };

    match result {
        Ok(doc) => {
            tracing::info!(version = doc.version, "Dashboard state updated");
            success(doc.body, doc.version)
        }
        Err(e) => {
            let revision_id = match &e {
                AppError::Conflict {
                    current_version, ..
                } => *current_version,
                _ => 0,
            };
            error(e, revision_id)
        }
    }
}
