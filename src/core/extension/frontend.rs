use std::collections::HashMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use super::protocol::{
    CallToolResult, GetPromptResult, Implementation, InitializeResult, ListPromptsResult,
    ListResourcesResult, ListToolsResult, ReadResourceResult, ServerCapabilities,
    ServerNotification, Tool, ToolsCapability, PROTOCOL_VERSION,
};
use super::{McpClient, NOTIFICATION_BUFFER};

/// Entirely in-process transport for tools the GUI executes itself. The
/// server only advertises them; calling one reports that the frontend must
/// handle it.
pub struct FrontendClient {
    tools: Vec<Tool>,
    info: InitializeResult,
    notifications: std::sync::Mutex<Option<mpsc::Receiver<ServerNotification>>>,
}

impl FrontendClient {
    pub fn new(name: &str, tools: &[Value], instructions: Option<String>) -> Self {
        let tools = tools
            .iter()
            .filter_map(|t| serde_json::from_value(t.clone()).ok())
            .collect();

        let (_tx, rx) = mpsc::channel(NOTIFICATION_BUFFER);
        Self {
            tools,
            info: InitializeResult {
                protocol_version: PROTOCOL_VERSION.into(),
                capabilities: ServerCapabilities {
                    tools: Some(ToolsCapability::default()),
                    resources: None,
                    prompts: None,
                },
                server_info: Implementation {
                    name: name.into(),
                    version: env!("CARGO_PKG_VERSION").into(),
                },
                instructions,
            },
            notifications: std::sync::Mutex::new(Some(rx)),
        }
    }
}

#[async_trait]
impl McpClient for FrontendClient {
    async fn list_resources(&self, _cursor: Option<String>) -> Result<ListResourcesResult> {
        Ok(ListResourcesResult::default())
    }

    async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult> {
        Err(anyhow!("frontend extensions do not serve resources: {}", uri))
    }

    async fn list_tools(&self, _cursor: Option<String>) -> Result<ListToolsResult> {
        Ok(ListToolsResult {
            tools: self.tools.clone(),
            next_cursor: None,
        })
    }

    async fn call_tool(&self, name: &str, _arguments: Value) -> Result<CallToolResult> {
        Ok(CallToolResult::text(format!(
            "Action required: tool {} must be handled by the frontend",
            name
        )))
    }

    async fn list_prompts(&self, _cursor: Option<String>) -> Result<ListPromptsResult> {
        Ok(ListPromptsResult::default())
    }

    async fn get_prompt(
        &self,
        name: &str,
        _arguments: HashMap<String, String>,
    ) -> Result<GetPromptResult> {
        Err(anyhow!("frontend extensions do not serve prompts: {}", name))
    }

    fn subscribe(&self) -> Option<mpsc::Receiver<ServerNotification>> {
        self.notifications.lock().ok().and_then(|mut g| g.take())
    }

    fn get_info(&self) -> InitializeResult {
        self.info.clone()
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
