use axum::extract::DefaultBodyLimit;
use axum::http::Method;
use axum::middleware;
use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;

use super::auth;
use super::handlers::{agent, extension, provider, recipe, reply, schedule, session};
use super::AppState;

fn build_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(tower_http::cors::Any)
}

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/agent/start", post(agent::start))
        .route("/agent/resume", post(agent::resume))
        .route("/agent/update_provider", post(agent::update_provider))
        .route("/agent/tools", get(agent::tools))
        .route("/agent/call_tool", post(agent::call_tool))
        .route(
            "/reply",
            post(reply::reply).layer(DefaultBodyLimit::max(reply::MAX_REQUEST_BODY)),
        )
        .route("/sessions", get(session::list))
        .route("/sessions/insights", get(session::insights))
        .route("/sessions/import", post(session::import))
        .route(
            "/sessions/{session_id}",
            get(session::get).delete(session::delete),
        )
        .route("/sessions/{session_id}/export", get(session::export))
        .route("/sessions/{session_id}/name", put(session::update_name))
        .route(
            "/sessions/{session_id}/edit_message",
            post(session::edit_message),
        )
        .route("/schedule/list", get(schedule::list))
        .route("/schedule/create", post(schedule::create))
        .route("/schedule/delete/{id}", delete(schedule::delete))
        .route("/schedule/{id}", put(schedule::update))
        .route("/schedule/{id}/pause", post(schedule::pause))
        .route("/schedule/{id}/unpause", post(schedule::unpause))
        .route("/schedule/{id}/run_now", post(schedule::run_now))
        .route("/schedule/{id}/kill", post(schedule::kill))
        .route("/schedule/{id}/inspect", get(schedule::inspect))
        .route("/schedule/{id}/sessions", get(schedule::sessions))
        .route(
            "/extensions",
            get(extension::list).post(extension::add),
        )
        .route("/extensions/tools", get(extension::list_tools))
        .route("/extensions/tools/call", post(extension::call_tool))
        .route("/extensions/resources", get(extension::list_resources))
        .route(
            "/extensions/resources/read",
            post(extension::read_resource),
        )
        .route(
            "/extensions/{name}",
            get(extension::get).delete(extension::remove),
        )
        .route("/config/providers", get(provider::list))
        .route("/recipes/list", get(recipe::list))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    Router::new()
        .route("/status", get(status))
        .merge(protected)
        .layer(build_cors())
        .with_state(state)
}

async fn status() -> &'static str {
    "ok"
}
