use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use super::{error_response, scheduler_error, store_error};
use crate::core::scheduler::ScheduledJob;
use crate::interfaces::web::AppState;

pub async fn list(State(state): State<AppState>) -> Response {
    let jobs = state.scheduler.list_jobs().await;
    (StatusCode::OK, Json(serde_json::json!({ "jobs": jobs }))).into_response()
}

#[derive(Deserialize)]
pub struct CreateScheduleRequest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub recipe_source: String,
    #[serde(default)]
    pub cron: String,
}

pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateScheduleRequest>,
) -> Response {
    if req.id.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Job ID is required");
    }
    if req.recipe_source.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Recipe source is required");
    }
    if req.cron.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Cron expression is required");
    }

    let job = ScheduledJob::new(&req.id, &req.recipe_source, &req.cron);
    if let Err(e) = state.scheduler.add_job(job, true).await {
        return scheduler_error(e);
    }

    match state.scheduler.get_job(&req.id).await {
        Ok(job) => (StatusCode::CREATED, Json(job)).into_response(),
        Err(e) => scheduler_error(e),
    }
}

#[derive(Deserialize)]
pub struct UpdateScheduleRequest {
    #[serde(default)]
    pub cron: String,
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateScheduleRequest>,
) -> Response {
    if req.cron.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Cron expression is required");
    }

    if let Err(e) = state.scheduler.update_cron(&id, &req.cron).await {
        return scheduler_error(e);
    }
    match state.scheduler.get_job(&id).await {
        Ok(job) => (StatusCode::OK, Json(job)).into_response(),
        Err(e) => scheduler_error(e),
    }
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.scheduler.remove_job(&id, true).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => scheduler_error(e),
    }
}

pub async fn pause(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.scheduler.pause_job(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => scheduler_error(e),
    }
}

pub async fn unpause(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.scheduler.unpause_job(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => scheduler_error(e),
    }
}

pub async fn run_now(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.scheduler.run_now(&id).await {
        Ok(session_id) => (
            StatusCode::OK,
            Json(serde_json::json!({ "session_id": session_id })),
        )
            .into_response(),
        Err(e) => scheduler_error(e),
    }
}

pub async fn kill(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.scheduler.kill_running_job(&id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({"message": "Job killed successfully"})),
        )
            .into_response(),
        Err(e) => scheduler_error(e),
    }
}

pub async fn inspect(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.scheduler.get_running_job_info(&id).await {
        Ok((session_id, start_time)) => {
            let mut body = serde_json::Map::new();
            if let Some(session_id) = session_id {
                body.insert("session_id".into(), session_id.into());
            }
            if let Some(start_time) = start_time {
                body.insert("process_start_time".into(), start_time.to_rfc3339().into());
                let duration = (Utc::now() - start_time).num_seconds();
                body.insert("running_duration_seconds".into(), duration.into());
            }
            (StatusCode::OK, Json(serde_json::Value::Object(body))).into_response()
        }
        Err(e) => scheduler_error(e),
    }
}

#[derive(Deserialize)]
pub struct SessionsQuery {
    pub limit: Option<usize>,
}

pub async fn sessions(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<SessionsQuery>,
) -> Response {
    let limit = query.limit.filter(|l| *l > 0).unwrap_or(10);
    match state.sessions.get_by_schedule_id(&id, limit).await {
        Ok(sessions) => (StatusCode::OK, Json(sessions)).into_response(),
        Err(e) => store_error(e),
    }
}
