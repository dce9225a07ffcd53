use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool exposed to the LLM, already prefixed with its extension key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    #[serde(rename = "extensionName")]
    pub extension_name: String,
    #[serde(rename = "inputSchema", skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    #[serde(rename = "requiresAction", default)]
    pub requires_action: bool,
}

/// Body of `POST /agent/call_tool`.
#[derive(Debug, Clone, Deserialize)]
pub struct CallToolRequest {
    #[serde(default)]
    pub session_id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Response of `POST /agent/call_tool`.
#[derive(Debug, Clone, Serialize)]
pub struct CallToolResponse {
    pub content: Vec<crate::core::extension::protocol::ToolContent>,
    pub is_error: bool,
    #[serde(
        rename = "structured_content",
        skip_serializing_if = "Option::is_none"
    )]
    pub structured_output: Option<Value>,
}
