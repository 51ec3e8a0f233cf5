//! Operational HTTP endpoints.
//!
//! - `/healthz` : liveness plus the number of open sessions

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::app_state::AppState;

pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "sessions": state.sessions().len() })),
    )
}
