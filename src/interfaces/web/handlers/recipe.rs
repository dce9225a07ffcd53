use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::interfaces::web::AppState;

/// GET /recipes/list — every recipe reachable from the search paths.
pub async fn list(State(state): State<AppState>) -> Response {
    let manifests: Vec<serde_json::Value> = state
        .recipes
        .list()
        .into_iter()
        .map(|(path, recipe)| {
            let id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            serde_json::json!({
                "id": id,
                "recipe": recipe,
                "file_path": path.to_string_lossy(),
            })
        })
        .collect();
    (
        StatusCode::OK,
        Json(serde_json::json!({ "recipes": manifests })),
    )
        .into_response()
}
