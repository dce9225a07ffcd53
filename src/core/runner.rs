//! Shared turn-driving logic for the SSE reply pipeline and the scheduler's
//! non-interactive recipe executor.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use crate::core::agent::{self, AgentConfig};
use crate::core::models::event::MessageEvent;
use crate::core::models::message::{Message, TokenState};
use crate::core::models::session::{Session, SessionType};
use crate::core::recipe::load_recipe_file;
use crate::core::scheduler::{JobExecutor, ScheduledJob};
use crate::core::session;

/// Outcome of draining one provider event stream into a session.
pub struct TurnOutcome {
    pub token_state: TokenState,
    /// True when an SSE forward failed, i.e. the client went away mid-turn.
    pub client_gone: bool,
}

/// Drain a provider event stream in order, mutating the session's in-memory
/// conversation and tracking token state.
///
/// Providers report per-turn counts (their accumulated fields mirror the
/// turn); the running totals are rebased here onto the session's committed
/// counters so they only ever grow. Events are forwarded verbatim to
/// `forward`, pre-serialised, when present.
pub async fn drive_turn(
    session: &mut Session,
    mut events: mpsc::Receiver<MessageEvent>,
    forward: Option<&mpsc::Sender<String>>,
) -> TurnOutcome {
    let baseline = TokenState {
        accumulated_input_tokens: session.accumulated_input_tokens.unwrap_or(0),
        accumulated_output_tokens: session.accumulated_output_tokens.unwrap_or(0),
        accumulated_total_tokens: session.accumulated_total_tokens.unwrap_or(0),
        ..TokenState::default()
    };
    let mut token_state = baseline;
    let mut client_gone = false;

    while let Some(event) = events.recv().await {
        if let Some(turn) = event.token_state() {
            token_state = TokenState {
                input_tokens: turn.input_tokens,
                output_tokens: turn.output_tokens,
                total_tokens: turn.total_tokens,
                accumulated_input_tokens: baseline.accumulated_input_tokens
                    + turn.input_tokens,
                accumulated_output_tokens: baseline.accumulated_output_tokens
                    + turn.output_tokens,
                accumulated_total_tokens: baseline.accumulated_total_tokens
                    + turn.total_tokens,
            };
        }

        match &event {
            MessageEvent::Message { message, .. } => {
                session.conversation.push(message.clone());
            }
            MessageEvent::UpdateConversation { conversation } => {
                session.conversation = conversation.clone();
            }
            _ => {}
        }

        if let Some(tx) = forward {
            let payload = match serde_json::to_string(&event) {
                Ok(payload) => payload,
                Err(_) => continue,
            };
            if tx.send(payload).await.is_err() {
                client_gone = true;
                break;
            }
        }
    }

    TurnOutcome {
        token_state,
        client_gone,
    }
}

/// Write the turn's conversation and all six token counters back onto the
/// session record.
pub fn apply_turn(session: &mut Session, token_state: &TokenState) {
    session.message_count = session.conversation.len() as u64;
    session.input_tokens = Some(token_state.input_tokens);
    session.output_tokens = Some(token_state.output_tokens);
    session.total_tokens = Some(token_state.total_tokens);
    session.accumulated_input_tokens = Some(token_state.accumulated_input_tokens);
    session.accumulated_output_tokens = Some(token_state.accumulated_output_tokens);
    session.accumulated_total_tokens = Some(token_state.accumulated_total_tokens);
}

/// The scheduler's injected executor: loads the job's recipe, runs one
/// non-interactive turn in a `scheduled` session, commits it and returns the
/// session id.
pub struct RecipeRunner {
    sessions: Arc<session::Manager>,
    agents: Arc<agent::Manager>,
}

impl RecipeRunner {
    pub fn new(sessions: Arc<session::Manager>, agents: Arc<agent::Manager>) -> Self {
        Self { sessions, agents }
    }
}

#[async_trait]
impl JobExecutor for RecipeRunner {
    async fn execute(&self, job: &ScheduledJob) -> Result<String> {
        let recipe = load_recipe_file(Path::new(&job.source))?;
        info!(job_id = %job.id, recipe = %recipe.title, "running scheduled recipe");

        let working_dir = std::env::current_dir()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| ".".to_string());
        let settings = recipe.settings.clone();

        let mut session = self
            .agents
            .start(AgentConfig {
                working_dir,
                provider_name: settings
                    .as_ref()
                    .and_then(|s| s.goose_provider.clone())
                    .or_else(|| std::env::var("GOOSE_PROVIDER").ok())
                    .unwrap_or_default(),
                model_name: settings
                    .as_ref()
                    .and_then(|s| s.goose_model.clone())
                    .or_else(|| std::env::var("GOOSE_MODEL").ok())
                    .unwrap_or_default(),
                recipe: Some(recipe.clone()),
                extension_names: Vec::new(),
                system_prompt: recipe.instructions.clone().unwrap_or_default(),
            })
            .await
            .context("failed to start agent for scheduled job")?;

        session.name = recipe.title.clone();
        session.session_type = Some(SessionType::Scheduled);
        session.schedule_id = Some(job.id.clone());
        session.conversation.push(Message::user(recipe.run_prompt()));
        self.sessions.update(&mut session).await?;

        let session_id = session.id.clone();
        let result = async {
            let events = self
                .agents
                .chat(&session_id, session.conversation.clone())
                .await
                .context("scheduled chat failed")?;

            let outcome = drive_turn(&mut session, events, None).await;
            apply_turn(&mut session, &outcome.token_state);
            self.sessions.update(&mut session).await?;
            Ok::<_, anyhow::Error>(())
        }
        .await;

        self.agents.stop(&session_id).await;
        result?;
        Ok(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::provider::Registry;

    #[tokio::test]
    async fn drive_turn_rebases_accumulated_tokens() {
        let mut session = Session::new("/tmp/w");
        session.accumulated_input_tokens = Some(10);
        session.accumulated_output_tokens = Some(20);
        session.accumulated_total_tokens = Some(30);

        let (tx, rx) = mpsc::channel(4);
        let turn = TokenState {
            input_tokens: 3,
            output_tokens: 4,
            total_tokens: 7,
            accumulated_input_tokens: 3,
            accumulated_output_tokens: 4,
            accumulated_total_tokens: 7,
        };
        tx.send(MessageEvent::Message {
            message: Message::assistant("hi"),
            token_state: turn,
        })
        .await
        .unwrap();
        tx.send(MessageEvent::Finish {
            reason: "stop".into(),
            token_state: turn,
        })
        .await
        .unwrap();
        drop(tx);

        let outcome = drive_turn(&mut session, rx, None).await;
        assert_eq!(outcome.token_state.total_tokens, 7);
        assert_eq!(outcome.token_state.accumulated_input_tokens, 13);
        assert_eq!(outcome.token_state.accumulated_output_tokens, 24);
        assert_eq!(outcome.token_state.accumulated_total_tokens, 37);
        assert_eq!(session.conversation.len(), 1);

        apply_turn(&mut session, &outcome.token_state);
        assert_eq!(session.message_count, 1);
        assert_eq!(session.accumulated_total_tokens, Some(37));
    }

    #[tokio::test]
    async fn recipe_runner_creates_a_scheduled_session() {
        let dir = tempfile::tempdir().unwrap();
        let recipe_path = dir.path().join("r.yaml");
        std::fs::write(
            &recipe_path,
            "title: nightly\ndescription: d\nprompt: summarise the day\n",
        )
        .unwrap();

        let sessions = Arc::new(session::Manager::in_memory().unwrap());
        let agents = Arc::new(agent::Manager::new(
            sessions.clone(),
            Arc::new(Registry::mock_only()),
        ));
        let runner = RecipeRunner::new(sessions.clone(), agents.clone());

        let job = ScheduledJob::new("job-1", recipe_path.to_string_lossy(), "0 0 1 1 *");
        let session_id = runner.execute(&job).await.unwrap();

        let session = sessions.get(&session_id, true).await.unwrap().unwrap();
        assert_eq!(session.session_type, Some(SessionType::Scheduled));
        assert_eq!(session.schedule_id.as_deref(), Some("job-1"));
        assert_eq!(session.name, "nightly");
        // One user prompt and one mock assistant reply.
        assert_eq!(session.message_count, 2);
        assert!(session.accumulated_total_tokens.unwrap_or(0) > 0);
        // The one-shot agent is gone afterwards.
        assert!(agents.get(&session_id).await.is_none());
    }
}
