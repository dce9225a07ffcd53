use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::info;

use crate::core::models::event::MessageEvent;
use crate::core::models::message::Message;
use crate::core::models::session::Session;
use crate::core::models::tool::ToolInfo;
use crate::core::provider::{ChatOptions, Provider, ProviderError, Registry};
use crate::core::recipe::Recipe;
use crate::core::session::{self, StoreError};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent is not running")]
    NotRunning,
    #[error("agent not found: {0}")]
    NotFound(String),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("provider not found: {0}")]
    ProviderNotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Configuration a live agent was built with.
#[derive(Debug, Clone, Default)]
pub struct AgentConfig {
    pub working_dir: String,
    pub provider_name: String,
    pub model_name: String,
    pub recipe: Option<Recipe>,
    pub extension_names: Vec<String>,
    pub system_prompt: String,
}

/// The live runtime pairing of a session with a provider and tool set.
pub struct Agent {
    pub session_id: String,
    pub provider: Arc<dyn Provider>,
    pub config: AgentConfig,
    pub tools: Vec<ToolInfo>,
    running: bool,
}

impl Agent {
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Delegate a turn to the bound provider; the caller owns event ordering
    /// and the session commit.
    pub async fn chat(
        &self,
        messages: Vec<Message>,
    ) -> Result<mpsc::Receiver<MessageEvent>, AgentError> {
        if !self.running {
            return Err(AgentError::NotRunning);
        }
        let options = ChatOptions {
            model: self.config.model_name.clone(),
            system: self.config.system_prompt.clone(),
            tools: self.tools.clone(),
            max_tokens: None,
            temperature: None,
        };
        Ok(self.provider.chat(messages, options).await?)
    }
}

/// Process-wide mapping of session id to live agent. At most one live agent
/// exists per session; agent fields are guarded by the per-agent lock.
pub struct Manager {
    agents: RwLock<HashMap<String, Arc<RwLock<Agent>>>>,
    sessions: Arc<session::Manager>,
    registry: Arc<Registry>,
}

impl Manager {
    pub fn new(sessions: Arc<session::Manager>, registry: Arc<Registry>) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            sessions,
            registry,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Resolve a provider: the requested one if registered and configured,
    /// else the registry default, else the mock.
    fn resolve_provider(&self, requested: &str) -> (Arc<dyn Provider>, String) {
        if !requested.is_empty() {
            if let Some(provider) = self.registry.get(requested) {
                if provider.is_configured() {
                    return (provider, requested.to_string());
                }
            }
        }
        if let Ok(provider) = self.registry.get_default() {
            let name = provider.name().to_string();
            return (provider, name);
        }
        (self.registry.mock(), "mock".to_string())
    }

    /// Create a fresh session and bind a live agent to it. Returns the
    /// session skeleton with its provider name persisted.
    pub async fn start(&self, mut config: AgentConfig) -> Result<Session, AgentError> {
        let mut session = self.sessions.create(&config.working_dir).await?;

        let (provider, provider_name) = self.resolve_provider(&config.provider_name);
        config.provider_name = provider_name.clone();
        if config.model_name.is_empty() {
            config.model_name = provider.default_model();
        }

        session.provider_name = Some(provider_name);
        if let Some(recipe) = &config.recipe {
            session.recipe = Some(recipe.clone());
        }
        self.sessions.update(&mut session).await?;

        let agent = Agent {
            session_id: session.id.clone(),
            provider,
            config,
            tools: Vec::new(),
            running: true,
        };
        info!(session_id = %session.id, provider = ?session.provider_name, "agent started");
        self.agents
            .write()
            .await
            .insert(session.id.clone(), Arc::new(RwLock::new(agent)));

        Ok(session)
    }

    /// Idempotent: returns the live agent if present, otherwise rebuilds one
    /// from the persisted session through the same provider resolution chain.
    pub async fn resume(
        &self,
        session_id: &str,
        _load_model_and_extensions: bool,
    ) -> Result<Arc<RwLock<Agent>>, AgentError> {
        if let Some(existing) = self.agents.read().await.get(session_id) {
            return Ok(existing.clone());
        }

        let session = self
            .sessions
            .get(session_id, true)
            .await?
            .ok_or_else(|| AgentError::SessionNotFound(session_id.to_string()))?;

        let requested = session.provider_name.clone().unwrap_or_default();
        let (provider, provider_name) = self.resolve_provider(&requested);

        let model_name = session
            .model_config
            .as_ref()
            .map(|mc| mc.model_name.clone())
            .unwrap_or_else(|| provider.default_model());

        let agent = Arc::new(RwLock::new(Agent {
            session_id: session_id.to_string(),
            provider,
            config: AgentConfig {
                working_dir: session.working_dir.clone(),
                provider_name,
                model_name,
                recipe: session.recipe.clone(),
                extension_names: Vec::new(),
                system_prompt: String::new(),
            },
            tools: Vec::new(),
            running: true,
        }));

        let mut agents = self.agents.write().await;
        // Another caller may have resumed concurrently; first one wins.
        let entry = agents
            .entry(session_id.to_string())
            .or_insert_with(|| agent.clone())
            .clone();
        Ok(entry)
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<RwLock<Agent>>> {
        self.agents.read().await.get(session_id).cloned()
    }

    /// Stop and forget the agent for a session. Safe to call for absent ids.
    pub async fn stop(&self, session_id: &str) {
        let removed = self.agents.write().await.remove(session_id);
        if let Some(agent) = removed {
            agent.write().await.running = false;
            info!(session_id = %session_id, "agent stopped");
        }
    }

    /// Atomically rebind the live agent's provider and model.
    pub async fn update_provider(
        &self,
        session_id: &str,
        provider_name: &str,
        model: Option<String>,
    ) -> Result<(), AgentError> {
        let agent = self
            .get(session_id)
            .await
            .ok_or_else(|| AgentError::NotFound(session_id.to_string()))?;

        let provider = self
            .registry
            .get(provider_name)
            .ok_or_else(|| AgentError::ProviderNotFound(provider_name.to_string()))?;

        let mut agent = agent.write().await;
        agent.config.model_name = model.unwrap_or_else(|| provider.default_model());
        agent.config.provider_name = provider_name.to_string();
        agent.provider = provider;
        Ok(())
    }

    /// Replace the agent's tool set (refreshed from the extension manager).
    pub async fn set_tools(&self, session_id: &str, tools: Vec<ToolInfo>) {
        if let Some(agent) = self.get(session_id).await {
            agent.write().await.tools = tools;
        }
    }

    pub async fn chat(
        &self,
        session_id: &str,
        messages: Vec<Message>,
    ) -> Result<mpsc::Receiver<MessageEvent>, AgentError> {
        let agent = self
            .get(session_id)
            .await
            .ok_or_else(|| AgentError::NotFound(session_id.to_string()))?;
        let agent = agent.read().await;
        agent.chat(messages).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> Manager {
        let sessions = Arc::new(session::Manager::in_memory().unwrap());
        let registry = Arc::new(Registry::mock_only());
        Manager::new(sessions, registry)
    }

    #[tokio::test]
    async fn start_falls_back_to_mock_and_persists_provider() {
        let manager = manager();
        let session = manager
            .start(AgentConfig {
                working_dir: "/tmp/w".into(),
                provider_name: "does-not-exist".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(session.provider_name.as_deref(), Some("mock"));
        let agent = manager.get(&session.id).await.unwrap();
        assert!(agent.read().await.is_running());
        assert_eq!(agent.read().await.config.model_name, "mock-model-v1");
    }

    #[tokio::test]
    async fn resume_is_idempotent() {
        let manager = manager();
        let session = manager.start(AgentConfig::default()).await.unwrap();

        let first = manager.resume(&session.id, true).await.unwrap();
        let second = manager.resume(&session.id, true).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn resume_unknown_session_fails() {
        let manager = manager();
        assert!(matches!(
            manager.resume("ghost", true).await,
            Err(AgentError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn stop_then_chat_reports_not_running() {
        let manager = manager();
        let session = manager.start(AgentConfig::default()).await.unwrap();
        let agent = manager.get(&session.id).await.unwrap();

        manager.stop(&session.id).await;
        // Stop twice: safe for absent ids.
        manager.stop(&session.id).await;

        let err = agent.read().await.chat(vec![]).await.err().unwrap();
        assert!(matches!(err, AgentError::NotRunning));
        assert!(manager.get(&session.id).await.is_none());
    }

    #[tokio::test]
    async fn resume_rebuilds_after_stop() {
        let manager = manager();
        let session = manager.start(AgentConfig::default()).await.unwrap();
        manager.stop(&session.id).await;

        let agent = manager.resume(&session.id, false).await.unwrap();
        assert!(agent.read().await.is_running());
        assert_eq!(agent.read().await.config.provider_name, "mock");
    }

    #[tokio::test]
    async fn update_provider_rejects_unknown_provider() {
        let manager = manager();
        let session = manager.start(AgentConfig::default()).await.unwrap();
        let err = manager
            .update_provider(&session.id, "missing", None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AgentError::ProviderNotFound(_)));

        manager
            .update_provider(&session.id, "mock", Some("mock-model-v2".into()))
            .await
            .unwrap();
        let agent = manager.get(&session.id).await.unwrap();
        assert_eq!(agent.read().await.config.model_name, "mock-model-v2");
    }
}
