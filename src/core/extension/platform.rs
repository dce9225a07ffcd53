//! In-process MCP servers registered by name at startup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use super::protocol::{
    CallToolResult, GetPromptResult, Implementation, InitializeResult, ListPromptsResult,
    ListResourcesResult, ListToolsResult, ReadResourceResult, Resource, ResourceContent,
    ResourcesCapability, ServerCapabilities, ServerNotification, Tool, ToolsCapability,
    PROTOCOL_VERSION,
};
use super::{McpClient, NOTIFICATION_BUFFER};

/// Summary of a loaded extension, served back through the catalog.
#[derive(Debug, Clone)]
pub struct ExtensionSummary {
    pub name: String,
    pub type_name: String,
    pub description: String,
    pub protocol_version: String,
    pub instructions: Option<String>,
}

/// Capability object handed to platform extensions that need to read back
/// through the owning manager.
#[async_trait]
pub trait ExtensionCatalog: Send + Sync {
    async fn list_loaded(&self) -> Vec<ExtensionSummary>;
    async fn extension_info(&self, name: &str) -> Option<ExtensionSummary>;
}

/// Context injected at platform-extension construction.
#[derive(Clone)]
pub struct PlatformContext {
    pub session_id: String,
    pub working_dir: String,
    pub catalog: Arc<dyn ExtensionCatalog>,
}

/// A built-in platform extension definition.
pub struct PlatformDef {
    pub name: &'static str,
    pub description: &'static str,
    pub default_enabled: bool,
    pub factory: fn(PlatformContext) -> Arc<dyn McpClient>,
}

pub fn platform_defs() -> Vec<PlatformDef> {
    vec![
        PlatformDef {
            name: "todo",
            description: "Task list management for tracking and organizing todos",
            default_enabled: true,
            factory: |ctx| Arc::new(TodoExtension::new(ctx)),
        },
        PlatformDef {
            name: "chatrecall",
            description: "Search conversations and session summaries",
            default_enabled: false,
            factory: |ctx| Arc::new(ChatRecallExtension::new(ctx)),
        },
        PlatformDef {
            name: "extensionmanager",
            description: "Discover and manage extensions",
            default_enabled: true,
            factory: |ctx| Arc::new(ExtensionManagerExtension::new(ctx)),
        },
        PlatformDef {
            name: "skills",
            description: "Load and execute skills from the .goose/skills directory",
            default_enabled: true,
            factory: |ctx| Arc::new(SkillsExtension::new(ctx)),
        },
    ]
}

fn server_info(name: &str, instructions: &str, resources: bool) -> InitializeResult {
    InitializeResult {
        protocol_version: PROTOCOL_VERSION.into(),
        capabilities: ServerCapabilities {
            tools: Some(ToolsCapability::default()),
            resources: resources.then(ResourcesCapability::default),
            prompts: None,
        },
        server_info: Implementation {
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").into(),
        },
        instructions: Some(instructions.into()),
    }
}

fn empty_notifications() -> Mutex<Option<mpsc::Receiver<ServerNotification>>> {
    let (_tx, rx) = mpsc::channel(NOTIFICATION_BUFFER);
    Mutex::new(Some(rx))
}

fn tool(name: &str, description: &str, schema: Value) -> Tool {
    Tool {
        name: name.into(),
        description: description.into(),
        input_schema: Some(schema),
    }
}

// ── todo ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    pub status: TodoStatus,
    #[serde(rename = "activeForm", skip_serializing_if = "Option::is_none")]
    pub active_form: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "completedAt", skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// CRUD over an in-memory task list, scoped to the owning manager's session.
pub struct TodoExtension {
    items: Mutex<Vec<TodoItem>>,
    info: InitializeResult,
    notifications: Mutex<Option<mpsc::Receiver<ServerNotification>>>,
}

impl TodoExtension {
    const INSTRUCTIONS: &'static str = "# Todo Extension\n\n\
        Task list management for tracking and organizing todos.\n\n\
        Use `add` when starting a task, move it to `in_progress` while working \
        and `completed` when finished.";

    pub fn new(_ctx: PlatformContext) -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            info: server_info("todo", Self::INSTRUCTIONS, false),
            notifications: empty_notifications(),
        }
    }

    fn list_items(&self) -> CallToolResult {
        let items = match self.items.lock() {
            Ok(items) => items,
            Err(_) => return CallToolResult::error("todo list unavailable"),
        };
        if items.is_empty() {
            return CallToolResult::text("No todos found.");
        }
        let mut out = String::new();
        for (i, item) in items.iter().enumerate() {
            let status = match item.status {
                TodoStatus::Pending => "pending",
                TodoStatus::InProgress => "in_progress",
                TodoStatus::Completed => "completed",
            };
            out.push_str(&format!("{}. {} ({})\n   ID: {}\n", i + 1, item.content, status, item.id));
        }
        CallToolResult::text(out)
    }

    fn add_item(&self, content: String, active_form: Option<String>) -> CallToolResult {
        let id = format!(
            "todo-{}",
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        );
        let item = TodoItem {
            id: id.clone(),
            content: content.clone(),
            status: TodoStatus::Pending,
            active_form,
            created_at: Utc::now(),
            completed_at: None,
        };
        match self.items.lock() {
            Ok(mut items) => {
                items.push(item);
                CallToolResult::text(format!("Added todo: {} (ID: {})", content, id))
            }
            Err(_) => CallToolResult::error("todo list unavailable"),
        }
    }

    fn update_item(
        &self,
        id: &str,
        status: Option<TodoStatus>,
        content: Option<String>,
    ) -> CallToolResult {
        let mut items = match self.items.lock() {
            Ok(items) => items,
            Err(_) => return CallToolResult::error("todo list unavailable"),
        };
        for item in items.iter_mut() {
            if item.id == id {
                if let Some(status) = status {
                    item.status = status;
                    if status == TodoStatus::Completed {
                        item.completed_at = Some(Utc::now());
                    }
                }
                if let Some(content) = content {
                    item.content = content;
                }
                return CallToolResult::text(format!("Updated todo: {}", id));
            }
        }
        CallToolResult::error(format!("Todo not found: {}", id))
    }

    fn remove_item(&self, id: &str) -> CallToolResult {
        let mut items = match self.items.lock() {
            Ok(items) => items,
            Err(_) => return CallToolResult::error("todo list unavailable"),
        };
        let before = items.len();
        items.retain(|item| item.id != id);
        if items.len() < before {
            CallToolResult::text(format!("Removed todo: {}", id))
        } else {
            CallToolResult::error(format!("Todo not found: {}", id))
        }
    }
}

#[async_trait]
impl McpClient for TodoExtension {
    async fn list_resources(&self, _cursor: Option<String>) -> Result<ListResourcesResult> {
        Ok(ListResourcesResult::default())
    }

    async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult> {
        Err(anyhow!("todo extension does not serve resources: {}", uri))
    }

    async fn list_tools(&self, _cursor: Option<String>) -> Result<ListToolsResult> {
        Ok(ListToolsResult {
            tools: vec![
                tool(
                    "list",
                    "List all todo items with their current status",
                    serde_json::json!({
                        "type": "object",
                        "properties": {},
                        "additionalProperties": false
                    }),
                ),
                tool(
                    "add",
                    "Add a new todo item",
                    serde_json::json!({
                        "type": "object",
                        "properties": {
                            "content": {"type": "string", "description": "The todo item content"},
                            "activeForm": {"type": "string", "description": "Active form description (e.g. 'Running tests')"}
                        },
                        "required": ["content"],
                        "additionalProperties": false
                    }),
                ),
                tool(
                    "update",
                    "Update an existing todo item's status or content",
                    serde_json::json!({
                        "type": "object",
                        "properties": {
                            "id": {"type": "string", "description": "The todo ID to update"},
                            "status": {"type": "string", "enum": ["pending", "in_progress", "completed"]},
                            "content": {"type": "string", "description": "New content"}
                        },
                        "required": ["id"],
                        "additionalProperties": false
                    }),
                ),
                tool(
                    "remove",
                    "Remove a todo item",
                    serde_json::json!({
                        "type": "object",
                        "properties": {
                            "id": {"type": "string", "description": "The todo ID to remove"}
                        },
                        "required": ["id"],
                        "additionalProperties": false
                    }),
                ),
            ],
            next_cursor: None,
        })
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        match name {
            "list" => Ok(self.list_items()),
            "add" => {
                #[derive(Deserialize)]
                struct Args {
                    content: String,
                    #[serde(rename = "activeForm")]
                    active_form: Option<String>,
                }
                match serde_json::from_value::<Args>(arguments) {
                    Ok(args) => Ok(self.add_item(args.content, args.active_form)),
                    Err(e) => Ok(CallToolResult::error(format!("invalid arguments: {}", e))),
                }
            }
            "update" => {
                #[derive(Deserialize)]
                struct Args {
                    id: String,
                    status: Option<TodoStatus>,
                    content: Option<String>,
                }
                match serde_json::from_value::<Args>(arguments) {
                    Ok(args) => Ok(self.update_item(&args.id, args.status, args.content)),
                    Err(e) => Ok(CallToolResult::error(format!("invalid arguments: {}", e))),
                }
            }
            "remove" => {
                #[derive(Deserialize)]
                struct Args {
                    id: String,
                }
                match serde_json::from_value::<Args>(arguments) {
                    Ok(args) => Ok(self.remove_item(&args.id)),
                    Err(e) => Ok(CallToolResult::error(format!("invalid arguments: {}", e))),
                }
            }
            other => Ok(CallToolResult::error(format!("unknown tool: {}", other))),
        }
    }

    async fn list_prompts(&self, _cursor: Option<String>) -> Result<ListPromptsResult> {
        Ok(ListPromptsResult::default())
    }

    async fn get_prompt(
        &self,
        name: &str,
        _arguments: HashMap<String, String>,
    ) -> Result<GetPromptResult> {
        Err(anyhow!("todo extension does not serve prompts: {}", name))
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

// ── chatrecall ──

/// Structural stub: the tool surface is defined, executions return
/// placeholder text until session search lands.
pub struct ChatRecallExtension {
    info: InitializeResult,
    notifications: Mutex<Option<mpsc::Receiver<ServerNotification>>>,
}

impl ChatRecallExtension {
    pub fn new(_ctx: PlatformContext) -> Self {
        Self {
            info: server_info(
                "chatrecall",
                "Search conversations and session summaries.",
                false,
            ),
            notifications: empty_notifications(),
        }
    }
}

#[async_trait]
impl McpClient for ChatRecallExtension {
    async fn list_resources(&self, _cursor: Option<String>) -> Result<ListResourcesResult> {
        Ok(ListResourcesResult::default())
    }

    async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult> {
        Err(anyhow!("chatrecall does not serve resources: {}", uri))
    }

    async fn list_tools(&self, _cursor: Option<String>) -> Result<ListToolsResult> {
        Ok(ListToolsResult {
            tools: vec![
                tool(
                    "search",
                    "Search conversations for specific terms",
                    serde_json::json!({
                        "type": "object",
                        "properties": {
                            "query": {"type": "string", "description": "Search query"},
                            "limit": {"type": "integer", "description": "Maximum results to return", "default": 10}
                        },
                        "required": ["query"],
                        "additionalProperties": false
                    }),
                ),
                tool(
                    "get_summary",
                    "Get a summary of a specific session",
                    serde_json::json!({
                        "type": "object",
                        "properties": {
                            "session_id": {"type": "string", "description": "Session ID to summarize"}
                        },
                        "required": ["session_id"],
                        "additionalProperties": false
                    }),
                ),
            ],
            next_cursor: None,
        })
    }

    async fn call_tool(&self, _name: &str, _arguments: Value) -> Result<CallToolResult> {
        Ok(CallToolResult::text(
            "Chat recall is not implemented in this build",
        ))
    }

    async fn list_prompts(&self, _cursor: Option<String>) -> Result<ListPromptsResult> {
        Ok(ListPromptsResult::default())
    }

    async fn get_prompt(
        &self,
        name: &str,
        _arguments: HashMap<String, String>,
    ) -> Result<GetPromptResult> {
        Err(anyhow!("chatrecall does not serve prompts: {}", name))
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

// ── extensionmanager ──

/// Reads back through the owning manager via the injected catalog.
pub struct ExtensionManagerExtension {
    catalog: Arc<dyn ExtensionCatalog>,
    info: InitializeResult,
    notifications: Mutex<Option<mpsc::Receiver<ServerNotification>>>,
}

impl ExtensionManagerExtension {
    pub fn new(ctx: PlatformContext) -> Self {
        Self {
            catalog: ctx.catalog,
            info: server_info(
                "extensionmanager",
                "Discover and manage extensions.",
                false,
            ),
            notifications: empty_notifications(),
        }
    }
}

#[async_trait]
impl McpClient for ExtensionManagerExtension {
    async fn list_resources(&self, _cursor: Option<String>) -> Result<ListResourcesResult> {
        Ok(ListResourcesResult::default())
    }

    async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult> {
        Err(anyhow!("extension manager does not serve resources: {}", uri))
    }

    async fn list_tools(&self, _cursor: Option<String>) -> Result<ListToolsResult> {
        let empty = serde_json::json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        });
        Ok(ListToolsResult {
            tools: vec![
                tool("list_extensions", "List all loaded extensions", empty.clone()),
                tool(
                    "get_extension_info",
                    "Get detailed information about an extension",
                    serde_json::json!({
                        "type": "object",
                        "properties": {
                            "name": {"type": "string", "description": "Extension name"}
                        },
                        "required": ["name"],
                        "additionalProperties": false
                    }),
                ),
                tool(
                    "list_available",
                    "List extensions available for installation",
                    empty,
                ),
            ],
            next_cursor: None,
        })
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        match name {
            "list_extensions" => {
                let loaded = self.catalog.list_loaded().await;
                if loaded.is_empty() {
                    return Ok(CallToolResult::text("No extensions loaded"));
                }
                let mut out = String::new();
                for ext in loaded {
                    out.push_str(&format!(
                        "- {} ({}): {}\n",
                        ext.name, ext.type_name, ext.description
                    ));
                }
                Ok(CallToolResult::text(out))
            }
            "get_extension_info" => {
                let name = arguments
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                match self.catalog.extension_info(name).await {
                    Some(ext) => {
                        let mut out = format!(
                            "Name: {}\nType: {}\nDescription: {}\nProtocol Version: {}\n",
                            ext.name, ext.type_name, ext.description, ext.protocol_version
                        );
                        if let Some(instructions) = ext.instructions {
                            out.push_str(&format!("\nInstructions:\n{}\n", instructions));
                        }
                        Ok(CallToolResult::text(out))
                    }
                    None => Ok(CallToolResult::error(format!(
                        "Extension not found: {}",
                        name
                    ))),
                }
            }
            "list_available" => {
                let mut out = String::new();
                for def in platform_defs() {
                    let enabled = if def.default_enabled {
                        "enabled"
                    } else {
                        "disabled"
                    };
                    out.push_str(&format!(
                        "- {}: {} (default: {})\n",
                        def.name, def.description, enabled
                    ));
                }
                Ok(CallToolResult::text(out))
            }
            other => Ok(CallToolResult::error(format!("unknown tool: {}", other))),
        }
    }

    async fn list_prompts(&self, _cursor: Option<String>) -> Result<ListPromptsResult> {
        Ok(ListPromptsResult::default())
    }

    async fn get_prompt(
        &self,
        name: &str,
        _arguments: HashMap<String, String>,
    ) -> Result<GetPromptResult> {
        Err(anyhow!("extension manager does not serve prompts: {}", name))
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

// ── skills ──

#[derive(Debug, Clone)]
pub struct Skill {
    pub name: String,
    pub description: String,
    pub instructions: String,
}

/// Serves skills found under `<working_dir>/.goose/skills` as tools and
/// `skill://` resources. Executions hand the instructions back to the model.
pub struct SkillsExtension {
    skills: HashMap<String, Skill>,
    info: InitializeResult,
    notifications: Mutex<Option<mpsc::Receiver<ServerNotification>>>,
}

impl SkillsExtension {
    pub fn new(ctx: PlatformContext) -> Self {
        Self {
            skills: Self::load_skills(&ctx.working_dir),
            info: server_info(
                "skills",
                "Load and execute skills from the .goose/skills directory.",
                true,
            ),
            notifications: empty_notifications(),
        }
    }

    fn load_skills(working_dir: &str) -> HashMap<String, Skill> {
        let mut skills = HashMap::new();
        let dir = std::path::Path::new(working_dir).join(".goose/skills");
        let Ok(entries) = std::fs::read_dir(dir) else {
            return skills;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            let description = content
                .lines()
                .find(|l| !l.trim().is_empty())
                .unwrap_or_default()
                .trim_start_matches('#')
                .trim()
                .to_string();
            skills.insert(
                name.to_string(),
                Skill {
                    name: name.to_string(),
                    description,
                    instructions: content,
                },
            );
        }
        skills
    }
}

#[async_trait]
impl McpClient for SkillsExtension {
    async fn list_resources(&self, _cursor: Option<String>) -> Result<ListResourcesResult> {
        let mut resources: Vec<Resource> = self
            .skills
            .values()
            .map(|skill| Resource {
                uri: format!("skill://{}", skill.name),
                name: skill.name.clone(),
                description: Some(skill.description.clone()),
                mime_type: Some("text/markdown".into()),
            })
            .collect();
        resources.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(ListResourcesResult {
            resources,
            next_cursor: None,
        })
    }

    async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult> {
        let name = uri
            .strip_prefix("skill://")
            .ok_or_else(|| anyhow!("invalid skill URI: {}", uri))?;
        let skill = self
            .skills
            .get(name)
            .ok_or_else(|| anyhow!("skill not found: {}", name))?;
        Ok(ReadResourceResult {
            contents: vec![ResourceContent {
                uri: uri.to_string(),
                mime_type: "text/markdown".into(),
                text: Some(skill.instructions.clone()),
                blob: None,
            }],
        })
    }

    async fn list_tools(&self, _cursor: Option<String>) -> Result<ListToolsResult> {
        Ok(ListToolsResult {
            tools: vec![
                tool(
                    "list_skills",
                    "List all available skills",
                    serde_json::json!({
                        "type": "object",
                        "properties": {},
                        "additionalProperties": false
                    }),
                ),
                tool(
                    "get_skill",
                    "Get details about a specific skill",
                    serde_json::json!({
                        "type": "object",
                        "properties": {
                            "name": {"type": "string", "description": "Skill name"}
                        },
                        "required": ["name"],
                        "additionalProperties": false
                    }),
                ),
                tool(
                    "run_skill",
                    "Execute a skill with parameters",
                    serde_json::json!({
                        "type": "object",
                        "properties": {
                            "name": {"type": "string", "description": "Skill name"},
                            "parameters": {"type": "object", "description": "Skill parameters"}
                        },
                        "required": ["name"],
                        "additionalProperties": false
                    }),
                ),
            ],
            next_cursor: None,
        })
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        match name {
            "list_skills" => {
                if self.skills.is_empty() {
                    return Ok(CallToolResult::text(
                        "No skills found. Add skills to the .goose/skills directory.",
                    ));
                }
                let mut names: Vec<&Skill> = self.skills.values().collect();
                names.sort_by(|a, b| a.name.cmp(&b.name));
                let mut out = String::new();
                for skill in names {
                    out.push_str(&format!("- {}: {}\n", skill.name, skill.description));
                }
                Ok(CallToolResult::text(out))
            }
            "get_skill" | "run_skill" => {
                let skill_name = arguments
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                match self.skills.get(skill_name) {
                    Some(skill) => Ok(CallToolResult::text(format!(
                        "{}\n\n{}",
                        skill.name, skill.instructions
                    ))),
                    None => Ok(CallToolResult::error(format!(
                        "Skill not found: {}",
                        skill_name
                    ))),
                }
            }
            other => Ok(CallToolResult::error(format!("unknown tool: {}", other))),
        }
    }

    async fn list_prompts(&self, _cursor: Option<String>) -> Result<ListPromptsResult> {
        Ok(ListPromptsResult::default())
    }

    async fn get_prompt(
        &self,
        name: &str,
        _arguments: HashMap<String, String>,
    ) -> Result<GetPromptResult> {
        Err(anyhow!("skills extension does not serve prompts: {}", name))
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

#[cfg(test)]
mod tests {
    use super::*;

    struct EmptyCatalog;

    #[async_trait]
    impl ExtensionCatalog for EmptyCatalog {
        async fn list_loaded(&self) -> Vec<ExtensionSummary> {
            vec![]
        }
        async fn extension_info(&self, _name: &str) -> Option<ExtensionSummary> {
            None
        }
    }

    fn ctx() -> PlatformContext {
        PlatformContext {
            session_id: "s1".into(),
            working_dir: "/tmp".into(),
            catalog: Arc::new(EmptyCatalog),
        }
    }

    #[tokio::test]
    async fn todo_crud_round_trip() {
        let todo = TodoExtension::new(ctx());

        let added = todo
            .call_tool("add", serde_json::json!({"content": "write tests"}))
            .await
            .unwrap();
        assert!(!added.is_error);
        let id = added
            .text_content()
            .rsplit("ID: ")
            .next()
            .unwrap()
            .trim_end_matches(')')
            .to_string();
        assert!(id.starts_with("todo-"));

        let listed = todo
            .call_tool("list", serde_json::json!({}))
            .await
            .unwrap();
        assert!(listed.text_content().contains("write tests"));

        let updated = todo
            .call_tool(
                "update",
                serde_json::json!({"id": id, "status": "completed"}),
            )
            .await
            .unwrap();
        assert!(!updated.is_error);

        let removed = todo
            .call_tool("remove", serde_json::json!({"id": id}))
            .await
            .unwrap();
        assert!(!removed.is_error);

        let empty = todo.call_tool("list", serde_json::json!({})).await.unwrap();
        assert!(empty.text_content().contains("No todos"));
    }

    #[tokio::test]
    async fn todo_update_missing_id_errors() {
        let todo = TodoExtension::new(ctx());
        let result = todo
            .call_tool("update", serde_json::json!({"id": "todo-0"}))
            .await
            .unwrap();
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn extension_manager_lists_available_defs() {
        let ext = ExtensionManagerExtension::new(ctx());
        let result = ext
            .call_tool("list_available", serde_json::json!({}))
            .await
            .unwrap();
        let text = result.text_content();
        for name in ["todo", "chatrecall", "extensionmanager", "skills"] {
            assert!(text.contains(name), "{} missing from {}", name, text);
        }
    }

    #[tokio::test]
    async fn skills_serve_resources_when_populated() {
        let dir = tempfile::tempdir().unwrap();
        let skills_dir = dir.path().join(".goose/skills");
        std::fs::create_dir_all(&skills_dir).unwrap();
        std::fs::write(
            skills_dir.join("deploy.md"),
            "# Deploy\nRun the deploy pipeline.",
        )
        .unwrap();

        let ext = SkillsExtension::new(PlatformContext {
            session_id: "s1".into(),
            working_dir: dir.path().to_string_lossy().into_owned(),
            catalog: Arc::new(EmptyCatalog),
        });

        let resources = ext.list_resources(None).await.unwrap();
        assert_eq!(resources.resources.len(), 1);
        assert_eq!(resources.resources[0].uri, "skill://deploy");

        let read = ext.read_resource("skill://deploy").await.unwrap();
        assert!(read.contents[0].text.as_deref().unwrap().contains("Deploy"));

        assert!(ext.read_resource("skill://absent").await.is_err());
    }
}
