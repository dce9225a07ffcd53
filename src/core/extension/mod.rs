pub mod config;
pub mod frontend;
pub mod http;
pub mod platform;
pub mod protocol;
pub mod stdio;

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinSet;
use tracing::{info, warn};

pub use config::{
    is_env_key_disallowed, name_to_key, parse_prefixed_tool_name, prefix_tool_name,
    validate_envs, ExtensionConfig,
};
pub use platform::{platform_defs, ExtensionCatalog, ExtensionSummary, PlatformContext};
use protocol::{
    CallToolResult, GetPromptResult, InitializeResult, ListPromptsResult, ListResourcesResult,
    ListToolsResult, ReadResourceResult, Resource, ServerNotification, Tool,
};

/// Bound on buffered server notifications; producers drop on overflow rather
/// than block.
pub const NOTIFICATION_BUFFER: usize = 100;

/// Uniform capability set every transport implements.
#[async_trait]
pub trait McpClient: Send + Sync {
    async fn list_resources(&self, cursor: Option<String>) -> Result<ListResourcesResult>;

    async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult>;

    async fn list_tools(&self, cursor: Option<String>) -> Result<ListToolsResult>;

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult>;

    async fn list_prompts(&self, cursor: Option<String>) -> Result<ListPromptsResult>;

    async fn get_prompt(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> Result<GetPromptResult>;

    /// The client's notification stream. Yields the receiver once; later
    /// calls return `None`.
    fn subscribe(&self) -> Option<mpsc::Receiver<ServerNotification>>;

    fn get_info(&self) -> InitializeResult;

    async fn close(&self) -> Result<()>;
}

#[derive(Debug, Error)]
pub enum ExtensionError {
    #[error("extension name normalises to an empty key")]
    EmptyKey,
    #[error("extension {0} already exists")]
    AlreadyExists(String),
    #[error("extension {0} not found")]
    NotFound(String),
    #[error("invalid tool name: {0}")]
    InvalidToolName(String),
    #[error("tool {tool} is not available in extension {extension}")]
    ToolNotAvailable { extension: String, tool: String },
    #[error("failed to initialize extension {0}: {1}")]
    InitFailed(String, String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A loaded extension: its config, live client and handshake result.
#[derive(Clone)]
pub struct ExtensionEntry {
    pub config: ExtensionConfig,
    pub client: Arc<dyn McpClient>,
    pub server_info: InitializeResult,
}

struct Inner {
    extensions: RwLock<HashMap<String, ExtensionEntry>>,
    notif_tx: mpsc::Sender<ServerNotification>,
    notif_rx: std::sync::Mutex<Option<mpsc::Receiver<ServerNotification>>>,
    session_id: String,
    working_dir: String,
}

/// Owns the extension-key → MCP client map and routes prefixed tool calls.
pub struct Manager {
    inner: Arc<Inner>,
}

impl Manager {
    pub fn new(session_id: &str, working_dir: &str) -> Self {
        let (notif_tx, notif_rx) = mpsc::channel(NOTIFICATION_BUFFER);
        Self {
            inner: Arc::new(Inner {
                extensions: RwLock::new(HashMap::new()),
                notif_tx,
                notif_rx: std::sync::Mutex::new(Some(notif_rx)),
                session_id: session_id.to_string(),
                working_dir: working_dir.to_string(),
            }),
        }
    }

    /// Add and initialize an extension. Fails on duplicate keys, empty keys
    /// and failed MCP handshakes.
    pub async fn add_extension(
        &self,
        mut config: ExtensionConfig,
    ) -> Result<(), ExtensionError> {
        let key = config.key();
        if key.is_empty() {
            return Err(ExtensionError::EmptyKey);
        }

        let mut extensions = self.inner.extensions.write().await;
        if extensions.contains_key(&key) {
            return Err(ExtensionError::AlreadyExists(key));
        }

        // Merge declared envs with values resolved from allowed env keys,
        // dropping the disallowed set either way.
        let mut envs = validate_envs(&config.envs());
        for env_key in config.env_keys() {
            if !is_env_key_disallowed(env_key) {
                if let Ok(value) = std::env::var(env_key) {
                    if !value.is_empty() {
                        envs.insert(env_key.clone(), value);
                    }
                }
            }
        }
        config.substitute_env_vars(&envs);

        let client = self
            .create_client(&config, envs)
            .await
            .map_err(|e| ExtensionError::InitFailed(key.clone(), e.to_string()))?;
        let server_info = client.get_info();

        // Forward this client's notifications into the shared stream,
        // dropping when the buffer is full.
        if let Some(mut rx) = client.subscribe() {
            let tx = self.inner.notif_tx.clone();
            let forward_key = key.clone();
            tokio::spawn(async move {
                while let Some(notification) = rx.recv().await {
                    if tx.try_send(notification).is_err() {
                        warn!("dropping notification from extension [{}]", forward_key);
                    }
                }
            });
        }

        info!(extension = %key, kind = config.type_name(), "extension added");
        extensions.insert(
            key,
            ExtensionEntry {
                config,
                client,
                server_info,
            },
        );
        Ok(())
    }

    async fn create_client(
        &self,
        config: &ExtensionConfig,
        envs: HashMap<String, String>,
    ) -> Result<Arc<dyn McpClient>> {
        let timeout = config.timeout_secs();
        let client: Arc<dyn McpClient> = match config {
            ExtensionConfig::Sse { name, uri, .. } => {
                Arc::new(http::HttpClient::connect(name, uri, HashMap::new(), timeout).await?)
            }
            ExtensionConfig::Stdio {
                name, cmd, args, ..
            } => stdio::StdioClient::spawn(name, cmd, args, envs, timeout).await?,
            ExtensionConfig::Builtin { name, .. } => {
                stdio::StdioClient::builtin(name, timeout).await?
            }
            ExtensionConfig::Platform { name, .. } => {
                let key = name_to_key(name);
                let def = platform_defs()
                    .into_iter()
                    .find(|def| name_to_key(def.name) == key)
                    .ok_or_else(|| {
                        anyhow::anyhow!("unknown platform extension: {}", key)
                    })?;
                (def.factory)(PlatformContext {
                    session_id: self.inner.session_id.clone(),
                    working_dir: self.inner.working_dir.clone(),
                    catalog: Arc::new(CatalogView {
                        inner: Arc::downgrade(&self.inner),
                    }),
                })
            }
            ExtensionConfig::StreamableHttp {
                name, uri, headers, ..
            } => Arc::new(
                http::HttpClient::connect(name, uri, headers.clone(), timeout).await?,
            ),
            ExtensionConfig::Frontend {
                name,
                tools,
                instructions,
                ..
            } => Arc::new(frontend::FrontendClient::new(
                name,
                tools,
                instructions.clone(),
            )),
            ExtensionConfig::InlinePython {
                name,
                code,
                dependencies,
                ..
            } => stdio::StdioClient::inline_python(name, code, dependencies, timeout).await?,
        };
        Ok(client)
    }

    /// Close and remove an extension. Missing keys error.
    pub async fn remove_extension(&self, key: &str) -> Result<(), ExtensionError> {
        let entry = {
            let mut extensions = self.inner.extensions.write().await;
            extensions
                .remove(key)
                .ok_or_else(|| ExtensionError::NotFound(key.to_string()))?
        };
        entry
            .client
            .close()
            .await
            .map_err(ExtensionError::Other)?;
        info!(extension = %key, "extension removed");
        Ok(())
    }

    pub async fn get_extension(&self, key: &str) -> Option<ExtensionEntry> {
        self.inner.extensions.read().await.get(key).cloned()
    }

    pub async fn list_extensions(&self) -> Vec<ExtensionEntry> {
        self.inner.extensions.read().await.values().cloned().collect()
    }

    /// Tools across all (or one) extensions, filtered by each extension's
    /// allow-list and prefixed `<key>__<tool>`. Pages through cursors; fans
    /// out in parallel; the first extension error fails the whole call.
    pub async fn prefixed_tools(
        &self,
        extension_name: Option<&str>,
    ) -> Result<Vec<Tool>, ExtensionError> {
        let filter_key = extension_name.map(name_to_key);
        let entries: Vec<(String, ExtensionEntry)> = {
            let extensions = self.inner.extensions.read().await;
            extensions
                .iter()
                .filter(|(key, _)| {
                    filter_key
                        .as_deref()
                        .map_or(true, |f| f == key.as_str())
                })
                .map(|(key, entry)| (key.clone(), entry.clone()))
                .collect()
        };

        let mut join_set = JoinSet::new();
        for (key, entry) in entries {
            join_set.spawn(async move {
                let tools = collect_extension_tools(&key, &entry).await;
                (key, tools)
            });
        }

        let mut all_tools = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            let (key, result) =
                joined.map_err(|e| ExtensionError::Other(anyhow::anyhow!(e)))?;
            match result {
                Ok(mut tools) => all_tools.append(&mut tools),
                Err(e) => {
                    return Err(ExtensionError::Other(anyhow::anyhow!(
                        "extension {}: {}",
                        key,
                        e
                    )))
                }
            }
        }
        Ok(all_tools)
    }

    /// Route a prefixed tool call: split on the first `__`, look up the key,
    /// verify availability, forward.
    pub async fn call_tool(
        &self,
        prefixed_name: &str,
        arguments: Value,
    ) -> Result<CallToolResult, ExtensionError> {
        let (key, tool_name) = parse_prefixed_tool_name(prefixed_name)
            .ok_or_else(|| ExtensionError::InvalidToolName(prefixed_name.to_string()))?;

        let entry = self
            .get_extension(key)
            .await
            .ok_or_else(|| ExtensionError::NotFound(key.to_string()))?;

        if !entry.config.is_tool_available(tool_name) {
            return Err(ExtensionError::ToolNotAvailable {
                extension: key.to_string(),
                tool: tool_name.to_string(),
            });
        }

        entry
            .client
            .call_tool(tool_name, arguments)
            .await
            .map_err(ExtensionError::Other)
    }

    /// Resources across all extensions, optionally filtered to one URI
    /// scheme. Parallel fan-out; first error wins.
    pub async fn get_resources(
        &self,
        scheme_filter: Option<&str>,
    ) -> Result<Vec<Resource>, ExtensionError> {
        let entries: Vec<(String, ExtensionEntry)> = {
            let extensions = self.inner.extensions.read().await;
            extensions
                .iter()
                .map(|(key, entry)| (key.clone(), entry.clone()))
                .collect()
        };
        let scheme_prefix = scheme_filter.map(|s| format!("{}://", s));

        let mut join_set = JoinSet::new();
        for (key, entry) in entries {
            let scheme_prefix = scheme_prefix.clone();
            join_set.spawn(async move {
                let resources = collect_extension_resources(&entry, scheme_prefix).await;
                (key, resources)
            });
        }

        let mut all_resources = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            let (key, result) =
                joined.map_err(|e| ExtensionError::Other(anyhow::anyhow!(e)))?;
            match result {
                Ok(mut resources) => all_resources.append(&mut resources),
                Err(e) => {
                    return Err(ExtensionError::Other(anyhow::anyhow!(
                        "extension {}: {}",
                        key,
                        e
                    )))
                }
            }
        }
        Ok(all_resources)
    }

    /// Try each extension in iteration order until one returns a non-empty
    /// result.
    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult, ExtensionError> {
        let entries = self.list_extensions().await;
        for entry in entries {
            if let Ok(result) = entry.client.read_resource(uri).await {
                if !result.contents.is_empty() {
                    return Ok(result);
                }
            }
        }
        Err(ExtensionError::Other(anyhow::anyhow!(
            "resource not found: {}",
            uri
        )))
    }

    /// The manager-wide notification stream. Yields the receiver once.
    #[allow(dead_code)]
    pub fn subscribe(&self) -> Option<mpsc::Receiver<ServerNotification>> {
        self.inner.notif_rx.lock().ok().and_then(|mut g| g.take())
    }

    /// Close every extension and clear the map. Used at shutdown.
    pub async fn close_all(&self) {
        let entries: Vec<ExtensionEntry> = {
            let mut extensions = self.inner.extensions.write().await;
            extensions.drain().map(|(_, entry)| entry).collect()
        };
        for entry in entries {
            if let Err(e) = entry.client.close().await {
                warn!("failed to close extension {}: {}", entry.config.name(), e);
            }
        }
    }
}

async fn collect_extension_tools(key: &str, entry: &ExtensionEntry) -> Result<Vec<Tool>> {
    let mut tools = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = entry.client.list_tools(cursor).await?;
        for tool in page.tools {
            if entry.config.is_tool_available(&tool.name) {
                tools.push(Tool {
                    name: prefix_tool_name(key, &tool.name),
                    description: tool.description,
                    input_schema: tool.input_schema,
                });
            }
        }
        cursor = page.next_cursor;
        if cursor.is_none() {
            break;
        }
    }
    Ok(tools)
}

async fn collect_extension_resources(
    entry: &ExtensionEntry,
    scheme_prefix: Option<String>,
) -> Result<Vec<Resource>> {
    let mut resources = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = entry.client.list_resources(cursor).await?;
        for resource in page.resources {
            if scheme_prefix
                .as_deref()
                .map_or(true, |prefix| resource.uri.starts_with(prefix))
            {
                resources.push(resource);
            }
        }
        cursor = page.next_cursor;
        if cursor.is_none() {
            break;
        }
    }
    Ok(resources)
}

struct CatalogView {
    inner: Weak<Inner>,
}

#[async_trait]
impl ExtensionCatalog for CatalogView {
    async fn list_loaded(&self) -> Vec<ExtensionSummary> {
        let Some(inner) = self.inner.upgrade() else {
            return Vec::new();
        };
        let extensions = inner.extensions.read().await;
        extensions
            .values()
            .map(|entry| ExtensionSummary {
                name: entry.config.name().to_string(),
                type_name: entry.config.type_name().to_string(),
                description: entry.config.description().to_string(),
                protocol_version: entry.server_info.protocol_version.clone(),
                instructions: entry.server_info.instructions.clone(),
            })
            .collect()
    }

    async fn extension_info(&self, name: &str) -> Option<ExtensionSummary> {
        let inner = self.inner.upgrade()?;
        let extensions = inner.extensions.read().await;
        let entry = extensions.get(&name_to_key(name))?;
        Some(ExtensionSummary {
            name: entry.config.name().to_string(),
            type_name: entry.config.type_name().to_string(),
            description: entry.config.description().to_string(),
            protocol_version: entry.server_info.protocol_version.clone(),
            instructions: entry.server_info.instructions.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn todo_config() -> ExtensionConfig {
        ExtensionConfig::Platform {
            name: "todo".into(),
            description: "todos".into(),
            available_tools: vec![],
        }
    }

    #[tokio::test]
    async fn add_rejects_duplicates_and_empty_keys() {
        let manager = Manager::new("s1", "/tmp");
        manager.add_extension(todo_config()).await.unwrap();

        let err = manager.add_extension(todo_config()).await.err().unwrap();
        assert!(matches!(err, ExtensionError::AlreadyExists(_)));

        let err = manager
            .add_extension(ExtensionConfig::Platform {
                name: "  \t ".into(),
                description: String::new(),
                available_tools: vec![],
            })
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ExtensionError::EmptyKey));
    }

    #[tokio::test]
    async fn tools_are_prefixed_and_routed() {
        let manager = Manager::new("s1", "/tmp");
        manager.add_extension(todo_config()).await.unwrap();

        let tools = manager.prefixed_tools(None).await.unwrap();
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert!(names.contains(&"todo__add"));
        assert!(names.contains(&"todo__list"));

        let added = manager
            .call_tool("todo__add", serde_json::json!({"content": "x"}))
            .await
            .unwrap();
        assert!(!added.is_error);

        let listed = manager
            .call_tool("todo__list", serde_json::json!({}))
            .await
            .unwrap();
        assert!(listed.text_content().contains("x"));
    }

    #[tokio::test]
    async fn available_tools_filter_applies() {
        let manager = Manager::new("s1", "/tmp");
        manager
            .add_extension(ExtensionConfig::Platform {
                name: "todo".into(),
                description: String::new(),
                available_tools: vec!["list".into()],
            })
            .await
            .unwrap();

        let tools = manager.prefixed_tools(None).await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "todo__list");

        let err = manager
            .call_tool("todo__add", serde_json::json!({"content": "x"}))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ExtensionError::ToolNotAvailable { .. }));
    }

    #[tokio::test]
    async fn call_tool_requires_known_key_and_separator() {
        let manager = Manager::new("s1", "/tmp");
        assert!(matches!(
            manager.call_tool("nounderscore", Value::Null).await,
            Err(ExtensionError::InvalidToolName(_))
        ));
        assert!(matches!(
            manager.call_tool("ghost__tool", Value::Null).await,
            Err(ExtensionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn remove_is_not_idempotent() {
        let manager = Manager::new("s1", "/tmp");
        manager.add_extension(todo_config()).await.unwrap();
        manager.remove_extension("todo").await.unwrap();
        assert!(matches!(
            manager.remove_extension("todo").await,
            Err(ExtensionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn extension_manager_reads_back_through_catalog() {
        let manager = Manager::new("s1", "/tmp");
        manager.add_extension(todo_config()).await.unwrap();
        manager
            .add_extension(ExtensionConfig::Platform {
                name: "extensionmanager".into(),
                description: "manager".into(),
                available_tools: vec![],
            })
            .await
            .unwrap();

        let result = manager
            .call_tool("extensionmanager__list_extensions", serde_json::json!({}))
            .await
            .unwrap();
        let text = result.text_content();
        assert!(text.contains("todo"));
        assert!(text.contains("extensionmanager"));
    }

    #[tokio::test]
    async fn resources_fan_out_with_scheme_filter() {
        let dir = tempfile::tempdir().unwrap();
        let skills_dir = dir.path().join(".goose/skills");
        std::fs::create_dir_all(&skills_dir).unwrap();
        std::fs::write(skills_dir.join("review.md"), "# Review\nReview code.").unwrap();

        let manager = Manager::new("s1", &dir.path().to_string_lossy());
        manager
            .add_extension(ExtensionConfig::Platform {
                name: "skills".into(),
                description: String::new(),
                available_tools: vec![],
            })
            .await
            .unwrap();
        manager.add_extension(todo_config()).await.unwrap();

        let all = manager.get_resources(Some("skill")).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].uri, "skill://review");

        let read = manager.read_resource("skill://review").await.unwrap();
        assert!(!read.contents.is_empty());
        assert!(matches!(
            manager.read_resource("skill://ghost").await,
            Err(ExtensionError::Other(_))
        ));
    }
}
