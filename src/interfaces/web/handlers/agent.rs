use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use super::{agent_error, error_response, extension_error};
use crate::core::agent::AgentConfig;
use crate::core::extension::ExtensionError;
use crate::core::models::tool::{CallToolRequest, CallToolResponse, ToolInfo};
use crate::core::recipe::{deeplink, Recipe};
use crate::interfaces::web::AppState;

#[derive(Deserialize)]
pub struct StartAgentRequest {
    #[serde(default)]
    pub working_dir: String,
    pub recipe: Option<Recipe>,
    pub recipe_id: Option<String>,
    pub recipe_deeplink: Option<String>,
}

pub async fn start(
    State(state): State<AppState>,
    Json(req): Json<StartAgentRequest>,
) -> Response {
    if req.working_dir.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "working_dir is required");
    }

    let recipe = if let Some(recipe) = req.recipe {
        Some(recipe)
    } else if let Some(id) = &req.recipe_id {
        // Some clients hand the deeplink itself through recipe_id.
        if deeplink::is_deeplink(id) {
            match deeplink::decode(id) {
                Ok(recipe) => Some(recipe),
                Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
            }
        } else {
            match state.recipes.find(id) {
                Ok((_, recipe)) => Some(recipe),
                Err(e) => return error_response(StatusCode::NOT_FOUND, e.to_string()),
            }
        }
    } else if let Some(link) = &req.recipe_deeplink {
        match deeplink::decode(link) {
            Ok(recipe) => Some(recipe),
            Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
        }
    } else {
        None
    };

    let config = AgentConfig {
        working_dir: req.working_dir,
        provider_name: state.config.default_provider.clone(),
        model_name: state.config.default_model.clone(),
        recipe,
        extension_names: Vec::new(),
        system_prompt: String::new(),
    };

    match state.agents.start(config).await {
        Ok(session) => (StatusCode::OK, Json(session)).into_response(),
        Err(e) => agent_error(e),
    }
}

#[derive(Deserialize)]
pub struct ResumeAgentRequest {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub load_model_and_extensions: bool,
}

pub async fn resume(
    State(state): State<AppState>,
    Json(req): Json<ResumeAgentRequest>,
) -> Response {
    if req.session_id.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "session_id is required");
    }

    if let Err(e) = state
        .agents
        .resume(&req.session_id, req.load_model_and_extensions)
        .await
    {
        return agent_error(e);
    }

    match state.sessions.get(&req.session_id, true).await {
        Ok(Some(session)) => (StatusCode::OK, Json(session)).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "Session not found"),
        Err(e) => super::store_error(e),
    }
}

#[derive(Deserialize)]
pub struct UpdateProviderRequest {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub provider: String,
    pub model: Option<String>,
}

pub async fn update_provider(
    State(state): State<AppState>,
    Json(req): Json<UpdateProviderRequest>,
) -> Response {
    if req.session_id.is_empty() || req.provider.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "session_id and provider are required",
        );
    }

    match state
        .agents
        .update_provider(&req.session_id, &req.provider, req.model)
        .await
    {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({"message": "Provider updated"})),
        )
            .into_response(),
        Err(e) => agent_error(e),
    }
}

#[derive(Deserialize)]
pub struct ToolsQuery {
    #[serde(default)]
    pub session_id: String,
    pub extension_name: Option<String>,
}

pub async fn tools(State(state): State<AppState>, Query(query): Query<ToolsQuery>) -> Response {
    if query.session_id.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "session_id is required");
    }
    if state.agents.get(&query.session_id).await.is_none() {
        return error_response(StatusCode::FAILED_DEPENDENCY, "Agent not found or not active");
    }

    let tools = match state
        .extensions
        .prefixed_tools(query.extension_name.as_deref())
        .await
    {
        Ok(tools) => tools,
        Err(e) => return extension_error(e),
    };

    let infos: Vec<ToolInfo> = tools
        .into_iter()
        .map(|tool| {
            let extension_name = tool
                .name
                .split_once("__")
                .map(|(key, _)| key.to_string())
                .unwrap_or_default();
            ToolInfo {
                name: tool.name,
                description: tool.description,
                extension_name,
                input_schema: tool.input_schema,
                requires_action: false,
            }
        })
        .collect();

    state
        .agents
        .set_tools(&query.session_id, infos.clone())
        .await;
    (StatusCode::OK, Json(infos)).into_response()
}

pub async fn call_tool(
    State(state): State<AppState>,
    Json(req): Json<CallToolRequest>,
) -> Response {
    if state.agents.get(&req.session_id).await.is_none() {
        return error_response(StatusCode::FAILED_DEPENDENCY, "Agent not found or not active");
    }

    match state.extensions.call_tool(&req.name, req.arguments).await {
        Ok(result) => (
            StatusCode::OK,
            Json(CallToolResponse {
                content: result.content,
                is_error: result.is_error,
                structured_output: result.structured_content,
            }),
        )
            .into_response(),
        // Execution failures surface inside the result, not as transport
        // errors; routing failures keep their status.
        Err(ExtensionError::Other(e)) => (
            StatusCode::OK,
            Json(CallToolResponse {
                content: vec![crate::core::extension::protocol::ToolContent::text(
                    e.to_string(),
                )],
                is_error: true,
                structured_output: None,
            }),
        )
            .into_response(),
        Err(e) => extension_error(e),
    }
}
