use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use super::{error_response, extension_error};
use crate::core::extension::{name_to_key, ExtensionConfig};
use crate::interfaces::web::AppState;

pub async fn list(State(state): State<AppState>) -> Response {
    let extensions: Vec<serde_json::Value> = state
        .extensions
        .list_extensions()
        .await
        .into_iter()
        .map(|entry| {
            serde_json::json!({
                "name": entry.config.name(),
                "type": entry.config.type_name(),
                "description": entry.config.description(),
                "enabled": true,
            })
        })
        .collect();
    (
        StatusCode::OK,
        Json(serde_json::json!({ "extensions": extensions })),
    )
        .into_response()
}

pub async fn add(State(state): State<AppState>, Json(config): Json<ExtensionConfig>) -> Response {
    let name = config.name().to_string();
    match state.extensions.add_extension(config).await {
        Ok(()) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "message": "Extension added successfully",
                "name": name,
            })),
        )
            .into_response(),
        Err(e) => extension_error(e),
    }
}

pub async fn get(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.extensions.get_extension(&name_to_key(&name)).await {
        Some(entry) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "name": entry.config.name(),
                "type": entry.config.type_name(),
                "description": entry.config.description(),
                "enabled": true,
                "serverInfo": entry.server_info,
            })),
        )
            .into_response(),
        None => error_response(StatusCode::NOT_FOUND, "Extension not found"),
    }
}

pub async fn remove(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.extensions.remove_extension(&name_to_key(&name)).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({"message": "Extension removed"})),
        )
            .into_response(),
        Err(e) => extension_error(e),
    }
}

#[derive(Deserialize)]
pub struct ToolsQuery {
    pub extension: Option<String>,
}

pub async fn list_tools(
    State(state): State<AppState>,
    Query(query): Query<ToolsQuery>,
) -> Response {
    match state
        .extensions
        .prefixed_tools(query.extension.as_deref())
        .await
    {
        Ok(tools) => {
            (StatusCode::OK, Json(serde_json::json!({ "tools": tools }))).into_response()
        }
        Err(e) => extension_error(e),
    }
}

#[derive(Deserialize)]
pub struct CallToolRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

pub async fn call_tool(
    State(state): State<AppState>,
    Json(req): Json<CallToolRequest>,
) -> Response {
    if req.name.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Tool name is required");
    }

    match state.extensions.call_tool(&req.name, req.arguments).await {
        Ok(result) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "content": result.content,
                "isError": result.is_error,
            })),
        )
            .into_response(),
        Err(e) => extension_error(e),
    }
}

#[derive(Deserialize)]
pub struct ResourcesQuery {
    pub scheme: Option<String>,
}

pub async fn list_resources(
    State(state): State<AppState>,
    Query(query): Query<ResourcesQuery>,
) -> Response {
    match state.extensions.get_resources(query.scheme.as_deref()).await {
        Ok(resources) => (
            StatusCode::OK,
            Json(serde_json::json!({ "resources": resources })),
        )
            .into_response(),
        Err(e) => extension_error(e),
    }
}

#[derive(Deserialize)]
pub struct ReadResourceRequest {
    #[serde(default)]
    pub uri: String,
}

pub async fn read_resource(
    State(state): State<AppState>,
    Json(req): Json<ReadResourceRequest>,
) -> Response {
    if req.uri.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "URI is required");
    }

    match state.extensions.read_resource(&req.uri).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => error_response(StatusCode::NOT_FOUND, e.to_string()),
    }
}
