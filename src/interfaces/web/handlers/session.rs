use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use super::{error_response, store_error};
use crate::core::models::session::{Session, SessionListResponse};
use crate::interfaces::web::AppState;

const MAX_NAME_LEN: usize = 200;

pub async fn list(State(state): State<AppState>) -> Response {
    match state.sessions.list().await {
        Ok(sessions) => (StatusCode::OK, Json(SessionListResponse { sessions })).into_response(),
        Err(e) => store_error(e),
    }
}

pub async fn get(State(state): State<AppState>, Path(session_id): Path<String>) -> Response {
    match state.sessions.get(&session_id, true).await {
        Ok(Some(session)) => (StatusCode::OK, Json(session)).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "Session not found"),
        Err(e) => store_error(e),
    }
}

pub async fn delete(State(state): State<AppState>, Path(session_id): Path<String>) -> Response {
    match state.sessions.delete(&session_id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({"message": "Session deleted"})),
        )
            .into_response(),
        Err(e) => store_error(e),
    }
}

pub async fn export(State(state): State<AppState>, Path(session_id): Path<String>) -> Response {
    match state.sessions.export(&session_id).await {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            text,
        )
            .into_response(),
        Err(e) => store_error(e),
    }
}

#[derive(Deserialize)]
pub struct UpdateNameRequest {
    #[serde(default)]
    pub name: String,
}

pub async fn update_name(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<UpdateNameRequest>,
) -> Response {
    if req.name.len() > MAX_NAME_LEN {
        return error_response(StatusCode::BAD_REQUEST, "Name too long (max 200 characters)");
    }

    match state.sessions.update_name(&session_id, &req.name).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({"message": "Name updated"})),
        )
            .into_response(),
        Err(e) => store_error(e),
    }
}

#[derive(Deserialize)]
pub struct EditMessageRequest {
    pub timestamp: i64,
    #[serde(rename = "editType")]
    pub edit_type: Option<String>,
}

/// POST /sessions/:id/edit_message — `edit` truncates the conversation at
/// the referenced message; `fork` (the default) copies the prefix into a new
/// session. Duplicate timestamps resolve to the first match.
pub async fn edit_message(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<EditMessageRequest>,
) -> Response {
    let mut session = match state.sessions.get(&session_id, true).await {
        Ok(Some(session)) => session,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "Session not found"),
        Err(e) => return store_error(e),
    };

    let index = session
        .conversation
        .iter()
        .position(|m| m.created == req.timestamp);
    let Some(index) = index else {
        return error_response(StatusCode::NOT_FOUND, "Message not found");
    };

    let edit_type = req.edit_type.as_deref().unwrap_or("fork");
    let result_session_id = if edit_type == "edit" {
        session.conversation.truncate(index);
        session.message_count = index as u64;
        if let Err(e) = state.sessions.update(&mut session).await {
            return store_error(e);
        }
        session.id
    } else {
        let mut fork = Session::new(&session.working_dir);
        fork.name = format!("{} (fork)", session.name);
        fork.conversation = session.conversation[..index].to_vec();
        fork.message_count = index as u64;
        if let Err(e) = state.sessions.insert(&fork).await {
            return store_error(e);
        }
        fork.id
    };

    (
        StatusCode::OK,
        Json(serde_json::json!({"sessionId": result_session_id})),
    )
        .into_response()
}

#[derive(Deserialize)]
pub struct ImportRequest {
    #[serde(default)]
    pub json: String,
}

pub async fn import(State(state): State<AppState>, Json(req): Json<ImportRequest>) -> Response {
    match state.sessions.import(&req.json).await {
        Ok(session) => (StatusCode::OK, Json(session)).into_response(),
        Err(crate::core::session::StoreError::Json(e)) => {
            error_response(StatusCode::BAD_REQUEST, format!("invalid session JSON: {}", e))
        }
        Err(e) => store_error(e),
    }
}

pub async fn insights(State(state): State<AppState>) -> Response {
    match state.sessions.get_insights().await {
        Ok(insights) => (StatusCode::OK, Json(insights)).into_response(),
        Err(e) => store_error(e),
    }
}
