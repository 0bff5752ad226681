//! Control API: operator-facing HTTP surface for manual retry and delete,
//! independent of the poll loop.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::delivery::DeliveryExecutor;
use crate::store::model::MessageStatus;
use crate::store::traits::MessageStore;

/// Shared state for the control routes.
#[derive(Clone)]
pub struct ControlState {
    pub store: Arc<dyn MessageStore>,
    pub executor: Arc<DeliveryExecutor>,
    /// Shared secret for both endpoints. `None` disables the check.
    pub secret: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct IdRequest {
    #[serde(default)]
    id: Option<String>,
}

/// Check the header-carried shared secret, when one is configured.
fn check_secret(state: &ControlState, headers: &HeaderMap, header_name: &str) -> bool {
    let Some(secret) = state.secret.as_deref() else {
        return true;
    };
    headers
        .get(header_name)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == secret)
}

fn error_body(status: StatusCode, message: &str) -> (StatusCode, Json<serde_json::Value>) {
    (status, Json(json!({ "error": message })))
}

/// POST /retry
///
/// Looks up the message and runs it through the full delivery pipeline
/// synchronously. The pipeline itself never throws; failures are recorded
/// on the row, so a 200 here means "processed", not "sent".
async fn retry_message(
    State(state): State<ControlState>,
    headers: HeaderMap,
    Json(body): Json<IdRequest>,
) -> impl IntoResponse {
    if !check_secret(&state, &headers, "x-retry-secret") {
        return error_body(StatusCode::UNAUTHORIZED, "invalid secret").into_response();
    }

    let Some(id) = body.id.filter(|s| !s.is_empty()) else {
        return error_body(StatusCode::BAD_REQUEST, "missing id").into_response();
    };

    let message = match state.store.get_message(&id).await {
        Ok(Some(msg)) => msg,
        Ok(None) => {
            return error_body(StatusCode::NOT_FOUND, "message not found").into_response();
        }
        Err(e) => {
            error!(id = %id, "Retry lookup failed: {e}");
            return error_body(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()).into_response();
        }
    };

    // A terminally-failed message is not claimable; an explicit operator
    // retry makes it eligible again before running the pipeline.
    if message.status == MessageStatus::Failed
        && let Err(e) = state.store.requeue_message(&id).await
    {
        error!(id = %id, "Re-queue for retry failed: {e}");
        return error_body(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()).into_response();
    }

    info!(id = %id, "Manual retry requested");
    let outcome = state.executor.process(&message).await;
    info!(id = %id, ?outcome, "Manual retry processed");

    Json(json!({ "ok": true, "id": id })).into_response()
}

/// POST /delete
///
/// Deletes the message row. Zero rows affected maps to 404; the caller
/// cannot distinguish "not found" from "not permitted" through this API.
async fn delete_message(
    State(state): State<ControlState>,
    headers: HeaderMap,
    Json(body): Json<IdRequest>,
) -> impl IntoResponse {
    if !check_secret(&state, &headers, "x-admin-secret") {
        return error_body(StatusCode::UNAUTHORIZED, "invalid secret").into_response();
    }

    let Some(id) = body.id.filter(|s| !s.is_empty()) else {
        return error_body(StatusCode::BAD_REQUEST, "missing id").into_response();
    };

    match state.store.delete_message(&id).await {
        Ok(0) => {
            warn!(id = %id, "Delete matched no rows");
            error_body(StatusCode::NOT_FOUND, "message not found or not permitted").into_response()
        }
        Ok(deleted) => {
            info!(id = %id, deleted, "Message deleted");
            Json(json!({ "ok": true, "id": id, "deleted": deleted })).into_response()
        }
        Err(e) => {
            error!(id = %id, "Delete failed: {e}");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()).into_response()
        }
    }
}

/// Build the control API routes.
pub fn control_routes(state: ControlState) -> Router {
    Router::new()
        .route("/retry", post(retry_message))
        .route("/delete", post(delete_message))
        .with_state(state)
}
