pub mod agent;
pub mod extension;
pub mod provider;
pub mod recipe;
pub mod reply;
pub mod schedule;
pub mod session;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::core::agent::AgentError;
use crate::core::extension::ExtensionError;
use crate::core::scheduler::SchedulerError;
use crate::core::session::StoreError;

/// The uniform `{"message": ...}` error envelope.
pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "message": message.into() })),
    )
        .into_response()
}

pub fn store_error(err: StoreError) -> Response {
    match err {
        StoreError::NotFound => error_response(StatusCode::NOT_FOUND, "Session not found"),
        other => error_response(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    }
}

pub fn agent_error(err: AgentError) -> Response {
    match err {
        AgentError::NotRunning
        | AgentError::NotFound(_)
        | AgentError::SessionNotFound(_) => {
            error_response(StatusCode::FAILED_DEPENDENCY, err.to_string())
        }
        AgentError::ProviderNotFound(_) => {
            error_response(StatusCode::NOT_FOUND, err.to_string())
        }
        AgentError::Provider(_) => {
            error_response(StatusCode::FAILED_DEPENDENCY, err.to_string())
        }
        AgentError::Store(e) => store_error(e),
    }
}

pub fn scheduler_error(err: SchedulerError) -> Response {
    match &err {
        SchedulerError::JobNotFound(_) => error_response(StatusCode::NOT_FOUND, err.to_string()),
        SchedulerError::JobExists(_) => error_response(StatusCode::CONFLICT, err.to_string()),
        SchedulerError::CronError(_) | SchedulerError::RecipeError(_) => {
            error_response(StatusCode::BAD_REQUEST, err.to_string())
        }
        SchedulerError::StorageError(_) | SchedulerError::Internal(_) => {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

pub fn extension_error(err: ExtensionError) -> Response {
    match &err {
        ExtensionError::EmptyKey | ExtensionError::InvalidToolName(_) => {
            error_response(StatusCode::BAD_REQUEST, err.to_string())
        }
        ExtensionError::AlreadyExists(_) => error_response(StatusCode::CONFLICT, err.to_string()),
        ExtensionError::NotFound(_) | ExtensionError::ToolNotAvailable { .. } => {
            error_response(StatusCode::NOT_FOUND, err.to_string())
        }
        ExtensionError::InitFailed(_, _) => {
            error_response(StatusCode::FAILED_DEPENDENCY, err.to_string())
        }
        ExtensionError::Other(_) => {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}
