use std::path::PathBuf;

use anyhow::{Context, Result};

/// Server configuration resolved from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub secret_key: String,
    pub data_dir: PathBuf,
    pub default_provider: String,
    pub default_model: String,
}

impl Config {
    /// Load from the environment. `GOOSE_SERVER__SECRET_KEY` is required;
    /// everything else has a default.
    pub fn load() -> Result<Self> {
        let secret_key = std::env::var("GOOSE_SERVER__SECRET_KEY")
            .ok()
            .filter(|s| !s.is_empty())
            .context("GOOSE_SERVER__SECRET_KEY must be set")?;

        let port = std::env::var("GOOSE_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let data_dir = std::env::var("GOOSE_PATH_ROOT")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;

        Ok(Self {
            port,
            secret_key,
            data_dir,
            default_provider: std::env::var("GOOSE_PROVIDER").unwrap_or_default(),
            default_model: std::env::var("GOOSE_MODEL").unwrap_or_default(),
        })
    }

    pub fn sessions_db_path(&self) -> PathBuf {
        self.data_dir.join("sessions.db")
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("goose")
}
