use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::interfaces::web::AppState;

/// GET /config/providers — metadata for every registered provider, including
/// unconfigured ones so the client can offer setup.
pub async fn list(State(state): State<AppState>) -> Response {
    let metadata = state.agents.registry().metadata();
    (StatusCode::OK, Json(metadata)).into_response()
}
