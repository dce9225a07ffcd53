//! Stdio MCP server mode: `goosed mcp <name>` serves the named platform
//! extension over line-delimited JSON-RPC. This is the process the `builtin`
//! extension transport spawns.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::core::extension::platform::{
    platform_defs, ExtensionCatalog, ExtensionSummary, PlatformContext,
};
use crate::core::extension::{name_to_key, McpClient};

struct EmptyCatalog;

#[async_trait]
impl ExtensionCatalog for EmptyCatalog {
    async fn list_loaded(&self) -> Vec<ExtensionSummary> {
        Vec::new()
    }
    async fn extension_info(&self, _name: &str) -> Option<ExtensionSummary> {
        None
    }
}

pub async fn serve(name: &str) -> Result<()> {
    let key = name_to_key(name);
    let def = platform_defs()
        .into_iter()
        .find(|def| name_to_key(def.name) == key)
        .ok_or_else(|| anyhow!("unknown platform extension: {}", name))?;

    let working_dir = std::env::current_dir()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| ".".to_string());
    let client = (def.factory)(PlatformContext {
        session_id: String::new(),
        working_dir,
        catalog: Arc::new(EmptyCatalog),
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let Ok(request) = serde_json::from_str::<Value>(&line) else {
            continue;
        };
        let Some(method) = request.get("method").and_then(Value::as_str) else {
            continue;
        };
        // Notifications carry no id and get no reply.
        let Some(id) = request.get("id").cloned() else {
            continue;
        };
        let params = request.get("params").cloned().unwrap_or(Value::Null);

        let response = match dispatch(client.as_ref(), method, params).await {
            Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
            Err(e) => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32603, "message": e.to_string()}
            }),
        };

        stdout
            .write_all(format!("{}\n", response).as_bytes())
            .await?;
        stdout.flush().await?;
    }

    Ok(())
}

async fn dispatch(client: &dyn McpClient, method: &str, params: Value) -> Result<Value> {
    let cursor = params
        .get("cursor")
        .and_then(Value::as_str)
        .map(str::to_string);

    match method {
        "initialize" => Ok(serde_json::to_value(client.get_info())?),
        "tools/list" => Ok(serde_json::to_value(client.list_tools(cursor).await?)?),
        "tools/call" => {
            let name = params
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow!("missing tool name"))?;
            let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);
            Ok(serde_json::to_value(
                client.call_tool(name, arguments).await?,
            )?)
        }
        "resources/list" => Ok(serde_json::to_value(
            client.list_resources(cursor).await?,
        )?),
        "resources/read" => {
            let uri = params
                .get("uri")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow!("missing resource uri"))?;
            Ok(serde_json::to_value(client.read_resource(uri).await?)?)
        }
        "prompts/list" => Ok(serde_json::to_value(client.list_prompts(cursor).await?)?),
        "prompts/get" => {
            let name = params
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow!("missing prompt name"))?;
            let arguments = params
                .get("arguments")
                .and_then(Value::as_object)
                .map(|m| {
                    m.iter()
                        .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                        .collect()
                })
                .unwrap_or_default();
            Ok(serde_json::to_value(
                client.get_prompt(name, arguments).await?,
            )?)
        }
        other => Err(anyhow!("method not found: {}", other)),
    }
}
