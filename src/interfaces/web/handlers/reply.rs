use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::warn;

use super::error_response;
use crate::core::models::event::{ChatRequest, MessageEvent};
use crate::core::models::session::Session;
use crate::core::runner::{apply_turn, drive_turn};
use crate::interfaces::web::AppState;

/// Heartbeat cadence on the reply stream.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(500);

/// Maximum `/reply` body: 50 MiB.
pub const MAX_REQUEST_BODY: usize = 50 * 1024 * 1024;

/// POST /reply — the streaming chat endpoint.
///
/// Events go through one bounded channel so heartbeats interleave with, but
/// never reorder, provider events. Dropping the response stream (client
/// disconnect or shutdown) closes the channel; both producer tasks observe
/// the failed send and stop, and the turn's progress is still committed.
pub async fn reply(State(state): State<AppState>, Json(req): Json<ChatRequest>) -> Response {
    if req.session_id.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "session_id is required");
    }

    let session = match state.sessions.get(&req.session_id, true).await {
        Ok(Some(session)) => session,
        Ok(None) => return error_response(StatusCode::FAILED_DEPENDENCY, "Session not found"),
        Err(e) => return super::store_error(e),
    };

    let agent = match state.agents.get(&req.session_id).await {
        Some(agent) => agent,
        None => match state.agents.resume(&req.session_id, true).await {
            Ok(agent) => agent,
            Err(e) => {
                return error_response(
                    StatusCode::FAILED_DEPENDENCY,
                    format!("Agent not active. Please start or resume the agent first: {}", e),
                )
            }
        },
    };

    let (tx, rx) = mpsc::channel::<String>(64);

    // Heartbeat: a Ping every 500ms until the stream closes.
    let heartbeat_tx = tx.clone();
    let heartbeat = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let ping = match serde_json::to_string(&MessageEvent::Ping) {
                Ok(ping) => ping,
                Err(_) => break,
            };
            if heartbeat_tx.send(ping).await.is_err() {
                break;
            }
        }
    });

    // Worker: drives the provider turn, forwards events, commits the session
    // and finally stops the heartbeat so the stream ends deterministically.
    let worker_state = state.clone();
    let incoming = req.messages;
    tokio::spawn(async move {
        stream_turn(worker_state, session, agent, incoming, &tx).await;
        heartbeat.abort();
    });

    let stream =
        ReceiverStream::new(rx).map(|data| Ok::<_, Infallible>(Event::default().data(data)));
    let mut response = Sse::new(stream).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("X-Accel-Buffering", HeaderValue::from_static("no"));
    response
}

async fn stream_turn(
    state: AppState,
    mut session: Session,
    agent: std::sync::Arc<tokio::sync::RwLock<crate::core::agent::Agent>>,
    incoming: Vec<crate::core::models::message::Message>,
    tx: &mpsc::Sender<String>,
) {
    for message in incoming {
        session.conversation.push(message);
    }

    let events = {
        let agent = agent.read().await;
        match agent.chat(session.conversation.clone()).await {
            Ok(events) => events,
            Err(e) => {
                send_event(
                    tx,
                    &MessageEvent::Error {
                        error: format!("Failed to process chat: {}", e),
                    },
                )
                .await;
                return;
            }
        }
    };

    let outcome = drive_turn(&mut session, events, Some(tx)).await;

    // Commit whatever was streamed, even after a mid-turn disconnect. A
    // failed commit becomes one Error event; the connection still closes
    // cleanly.
    apply_turn(&mut session, &outcome.token_state);
    if let Err(e) = state.sessions.update(&mut session).await {
        warn!(session_id = %session.id, "failed to save session: {}", e);
        if !outcome.client_gone {
            send_event(
                tx,
                &MessageEvent::Error {
                    error: format!("Failed to save session: {}", e),
                },
            )
            .await;
        }
    }
}

async fn send_event(tx: &mpsc::Sender<String>, event: &MessageEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(payload) => tx.send(payload).await.is_ok(),
        Err(_) => false,
    }
}
