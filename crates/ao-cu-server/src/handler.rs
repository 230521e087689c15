//! Request handlers for the compute unit surface.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tracing::{error, info};
use uuid::Uuid;

use crate::state::AppState;

/// Accept a raw signed data item.
///
/// The item is forwarded to the scheduler; the `202` goes out as soon as
/// the forward succeeds, and the crank over the transitive message tree
/// continues asynchronously.
pub async fn post_message(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let request_id = Uuid::new_v4().to_string();

    if body.is_empty() {
        return (StatusCode::BAD_REQUEST, "message body is empty").into_response();
    }

    let routed = match state.router().route(body.to_vec()).await {
        Ok(routed) => routed,
        Err(e) => {
            error!(request_id = %request_id, error = %e, "message forward failed");
            return (StatusCode::BAD_GATEWAY, e.to_string()).into_response();
        }
    };

    info!(
        request_id = %request_id,
        id = %routed.tx_id,
        process_id = %routed.process_id,
        "message accepted"
    );

    let crank_state = state.clone();
    let process_id = routed.process_id.clone();
    tokio::spawn(async move {
        crank_state.router().crank(&process_id).await;
    });

    (
        StatusCode::ACCEPTED,
        axum::Json(serde_json::json!({
            "message": "Processing message",
            "id": routed.tx_id,
        })),
    )
        .into_response()
}

/// Health check handler.
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Readiness check handler.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "ready",
        "gateway": state.config().wasm.gateway_url,
    });
    (StatusCode::OK, axum::Json(body))
}
