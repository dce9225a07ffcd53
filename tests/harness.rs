//! Test harness: spawns the compiled daemon on a free port and talks to it
//! over HTTP.

use std::process::{Child, Command, Stdio};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tempfile::TempDir;

pub const TEST_SECRET: &str = "integration-test-secret";

pub struct DaemonHarness {
    child: Child,
    base_url: String,
    client: reqwest::Client,
    data_dir: TempDir,
}

impl DaemonHarness {
    pub async fn spawn() -> Result<Self> {
        let data_dir = tempfile::tempdir().context("failed to create data dir")?;
        let port = free_port()?;

        let child = Command::new(env!("CARGO_BIN_EXE_goosed"))
            .env("GOOSE_SERVER__SECRET_KEY", TEST_SECRET)
            .env("GOOSE_PORT", port.to_string())
            .env("GOOSE_PATH_ROOT", data_dir.path())
            .env_remove("GOOSE_PROVIDER")
            .env_remove("GOOSE_MODEL")
            .env_remove("OPENAI_API_KEY")
            .env_remove("ANTHROPIC_API_KEY")
            .env_remove("AZURE_OPENAI_API_KEY")
            .env_remove("AZURE_OPENAI_ENDPOINT")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .context("failed to spawn goosed")?;

        let base_url = format!("http://127.0.0.1:{}", port);
        let client = reqwest::Client::new();

        let harness = Self {
            child,
            base_url,
            client,
            data_dir,
        };
        harness.wait_until_ready().await?;
        Ok(harness)
    }

    async fn wait_until_ready(&self) -> Result<()> {
        for _ in 0..100 {
            if let Ok(resp) = self
                .client
                .get(format!("{}/status", self.base_url))
                .send()
                .await
            {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        Err(anyhow!("daemon did not become ready"))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn data_dir(&self) -> &std::path::Path {
        self.data_dir.path()
    }

    pub fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .header("X-Secret-Key", TEST_SECRET)
    }

    pub fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .header("X-Secret-Key", TEST_SECRET)
    }

    pub fn put(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .put(format!("{}{}", self.base_url, path))
            .header("X-Secret-Key", TEST_SECRET)
    }

    pub fn delete(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .delete(format!("{}{}", self.base_url, path))
            .header("X-Secret-Key", TEST_SECRET)
    }

    pub fn unauthenticated(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.get(format!("{}{}", self.base_url, path))
    }

    /// Start an agent and return its session id.
    pub async fn start_agent(&self, working_dir: &str) -> Result<String> {
        let resp = self
            .post("/agent/start")
            .json(&serde_json::json!({"working_dir": working_dir}))
            .send()
            .await?;
        anyhow::ensure!(resp.status().is_success(), "start failed: {}", resp.status());
        let body: serde_json::Value = resp.json().await?;
        body.get("id")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("no session id in start response: {}", body))
    }

    /// Run one `/reply` turn and return the raw SSE body.
    pub async fn reply(&self, session_id: &str, text: &str) -> Result<String> {
        let message = serde_json::json!({
            "role": "user",
            "created": chrono_now(),
            "content": [{"type": "text", "text": text}],
            "metadata": {"userVisible": true, "agentVisible": true}
        });
        let resp = self
            .post("/reply")
            .json(&serde_json::json!({
                "session_id": session_id,
                "messages": [message]
            }))
            .send()
            .await?;
        anyhow::ensure!(resp.status().is_success(), "reply failed: {}", resp.status());
        Ok(resp.text().await?)
    }
}

impl Drop for DaemonHarness {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn free_port() -> Result<u16> {
    let listener =
        std::net::TcpListener::bind("127.0.0.1:0").context("failed to bind probe socket")?;
    Ok(listener.local_addr()?.port())
}

fn chrono_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Parse the `data:` payloads out of an SSE body.
pub fn sse_events(body: &str) -> Vec<serde_json::Value> {
    body.split("\n\n")
        .filter_map(|frame| frame.strip_prefix("data: "))
        .filter_map(|payload| serde_json::from_str(payload).ok())
        .collect()
}

/// Skip tests gracefully when the sandbox forbids binding sockets.
pub fn is_permission_error(err: &anyhow::Error) -> bool {
    let msg = format!("{:#}", err);
    msg.contains("Operation not permitted") || msg.contains("Permission denied")
}
