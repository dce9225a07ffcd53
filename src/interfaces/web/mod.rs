pub(crate) mod auth;
mod handlers;
mod router;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tracing::info;

use crate::core::agent;
use crate::core::config::Config;
use crate::core::extension;
use crate::core::provider::Registry;
use crate::core::recipe::RecipeStorage;
use crate::core::runner::RecipeRunner;
use crate::core::scheduler::Scheduler;
use crate::core::session;

/// Shared handler state. The registries are process-wide singletons created
/// at server construction and torn down in reverse order on shutdown.
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) config: Arc<Config>,
    pub(crate) sessions: Arc<session::Manager>,
    pub(crate) agents: Arc<agent::Manager>,
    pub(crate) extensions: Arc<extension::Manager>,
    pub(crate) scheduler: Arc<Scheduler>,
    pub(crate) recipes: Arc<RecipeStorage>,
}

pub struct ApiServer {
    state: AppState,
}

impl ApiServer {
    pub async fn new(config: Config) -> Result<Self> {
        let config = Arc::new(config);

        let sessions = Arc::new(
            session::Manager::new(&config.sessions_db_path())
                .context("failed to open session store")?,
        );
        let registry = Arc::new(Registry::from_env());
        let agents = Arc::new(agent::Manager::new(sessions.clone(), registry));

        let working_dir = std::env::current_dir()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| ".".to_string());
        let extensions = Arc::new(extension::Manager::new("", &working_dir));

        let recipes = Arc::new(RecipeStorage::new(&config.data_dir));

        let executor = Arc::new(RecipeRunner::new(sessions.clone(), agents.clone()));
        let scheduler = Arc::new(
            Scheduler::new(&config.data_dir, executor)
                .await
                .context("failed to start scheduler")?,
        );

        Ok(Self {
            state: AppState {
                config,
                sessions,
                agents,
                extensions,
                scheduler,
                recipes,
            },
        })
    }

    pub fn router(&self) -> Router {
        router::build_router(self.state.clone())
    }

    pub async fn serve(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.state.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;
        info!("goosed listening on {}", addr);

        let state = self.state.clone();
        let router = self.router();
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("server error");

        // Teardown order: scheduler, then extensions; agents and sessions
        // fall out of scope last.
        state.scheduler.stop().await;
        state.extensions.close_all().await;
        result
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
}
