use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use super::protocol::{
    CallToolResult, GetPromptResult, InitializeResult, JsonRpcResponse, ListPromptsResult,
    ListResourcesResult, ListToolsResult, ReadResourceResult, ServerNotification,
    PROTOCOL_VERSION,
};
use super::{McpClient, NOTIFICATION_BUFFER};

/// MCP client speaking JSON-RPC over HTTP POST. Covers both the `sse` and
/// `streamable_http` transports; the latter also carries custom headers.
pub struct HttpClient {
    server_name: String,
    uri: String,
    headers: HashMap<String, String>,
    client: Client,
    next_id: AtomicU64,
    info: std::sync::RwLock<InitializeResult>,
    notifications: std::sync::Mutex<Option<mpsc::Receiver<ServerNotification>>>,
}

impl HttpClient {
    pub async fn connect(
        server_name: &str,
        uri: &str,
        headers: HashMap<String, String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build HTTP client")?;

        // The channel exists so subscribe() has something to hand out; HTTP
        // transports have no push path in this build.
        let (_notif_tx, notif_rx) = mpsc::channel(NOTIFICATION_BUFFER);

        let http = Self {
            server_name: server_name.to_string(),
            uri: uri.to_string(),
            headers,
            client,
            next_id: AtomicU64::new(1),
            info: std::sync::RwLock::new(InitializeResult::default()),
            notifications: std::sync::Mutex::new(Some(notif_rx)),
        };

        let info = http.initialize().await?;
        if let Ok(mut guard) = http.info.write() {
            *guard = info;
        }
        Ok(http)
    }

    async fn initialize(&self) -> Result<InitializeResult> {
        let result = self
            .call(
                "initialize",
                Some(serde_json::json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "goosed",
                        "version": env!("CARGO_PKG_VERSION")
                    }
                })),
            )
            .await?;
        let info = serde_json::from_value(result).context("invalid initialize result")?;

        // Fire-and-forget per protocol; the server does not reply.
        let _ = self
            .post(serde_json::json!({
                "jsonrpc": "2.0",
                "method": "notifications/initialized"
            }))
            .await;

        Ok(info)
    }

    async fn post(&self, body: Value) -> Result<reqwest::Response> {
        let mut request = self
            .client
            .post(&self.uri)
            .header("Content-Type", "application/json");
        for (k, v) in &self.headers {
            request = request.header(k.as_str(), v.as_str());
        }
        request
            .json(&body)
            .send()
            .await
            .with_context(|| format!("request to extension [{}] failed", self.server_name))
    }

    async fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        debug!(extension = %self.server_name, %method, "MCP HTTP call");

        let mut body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
        });
        if let Some(params) = params {
            body["params"] = params;
        }

        let response = self.post(body).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!(
                "extension [{}] returned HTTP {}",
                self.server_name,
                status
            ));
        }

        let parsed: JsonRpcResponse = response
            .json()
            .await
            .with_context(|| format!("invalid JSON-RPC response from [{}]", self.server_name))?;
        if let Some(error) = parsed.error {
            return Err(anyhow!("MCP RPC error: {}", error));
        }
        parsed
            .result
            .ok_or_else(|| anyhow!("MCP RPC missing result"))
    }

    fn cursor_params(cursor: Option<String>) -> Option<Value> {
        cursor.map(|c| serde_json::json!({"cursor": c}))
    }
}

#[async_trait]
impl McpClient for HttpClient {
    async fn list_resources(&self, cursor: Option<String>) -> Result<ListResourcesResult> {
        let result = self
            .call("resources/list", Self::cursor_params(cursor))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult> {
        let result = self
            .call("resources/read", Some(serde_json::json!({"uri": uri})))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn list_tools(&self, cursor: Option<String>) -> Result<ListToolsResult> {
        let result = self.call("tools/list", Self::cursor_params(cursor)).await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        let result = self
            .call(
                "tools/call",
                Some(serde_json::json!({"name": name, "arguments": arguments})),
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn list_prompts(&self, cursor: Option<String>) -> Result<ListPromptsResult> {
        let result = self
            .call("prompts/list", Self::cursor_params(cursor))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> Result<GetPromptResult> {
        let result = self
            .call(
                "prompts/get",
                Some(serde_json::json!({"name": name, "arguments": arguments})),
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    fn subscribe(&self) -> Option<mpsc::Receiver<ServerNotification>> {
        self.notifications.lock().ok().and_then(|mut g| g.take())
    }

    fn get_info(&self) -> InitializeResult {
        self.info.read().map(|g| g.clone()).unwrap_or_default()
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
