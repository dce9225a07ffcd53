use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message sender role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Visibility flags carried on every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(rename = "userVisible")]
    pub user_visible: bool,
    #[serde(rename = "agentVisible")]
    pub agent_visible: bool,
}

impl Default for MessageMetadata {
    fn default() -> Self {
        Self {
            user_visible: true,
            agent_visible: true,
        }
    }
}

/// A message to or from the LLM. `created` is unix seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub created: i64,
    pub content: Vec<MessageContent>,
    #[serde(default)]
    pub metadata: MessageMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            created: Utc::now().timestamp(),
            content: vec![MessageContent::Text(TextContent { text: text.into() })],
            metadata: MessageMetadata::default(),
            id: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            created: Utc::now().timestamp(),
            content: vec![MessageContent::Text(TextContent { text: text.into() })],
            metadata: MessageMetadata::default(),
            id: None,
        }
    }

    /// Concatenated text parts, used for exports and token estimates.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for part in &self.content {
            if let MessageContent::Text(t) = part {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(&t.text);
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageContent {
    pub data: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequestContent {
    pub id: String,
    #[serde(rename = "toolCall")]
    pub tool_call: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponseContent {
    pub id: String,
    #[serde(rename = "toolResult")]
    pub tool_result: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolConfirmationRequestContent {
    pub id: String,
    #[serde(rename = "toolName")]
    pub tool_name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontendToolRequestContent {
    pub id: String,
    #[serde(rename = "toolName")]
    pub tool_name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThinkingContent {
    pub thinking: String,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedactedThinkingContent {
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemNotificationContent {
    #[serde(rename = "notificationType")]
    pub notification_type: String,
    pub msg: String,
}

/// Payload of an `actionRequired` content part, sub-tagged on `actionType`.
/// Unknown action types are preserved as [`ActionRequiredData::Other`].
#[derive(Debug, Clone, PartialEq)]
pub enum ActionRequiredData {
    ToolConfirmation(ToolConfirmationAction),
    Elicitation(ElicitationAction),
    Other(Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolConfirmationAction {
    pub id: String,
    #[serde(rename = "toolName")]
    pub tool_name: String,
    pub arguments: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElicitationAction {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_schema: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<Value>,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "actionType", rename_all = "camelCase")]
enum TaggedAction {
    ToolConfirmation(ToolConfirmationAction),
    Elicitation(ElicitationAction),
}

impl Serialize for ActionRequiredData {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ActionRequiredData::ToolConfirmation(a) => {
                TaggedAction::ToolConfirmation(a.clone()).serialize(serializer)
            }
            ActionRequiredData::Elicitation(a) => {
                TaggedAction::Elicitation(a.clone()).serialize(serializer)
            }
            ActionRequiredData::Other(v) => v.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for ActionRequiredData {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        match value.get("actionType").and_then(Value::as_str) {
            Some("toolConfirmation") | Some("elicitation") => {
                TaggedAction::deserialize(value.clone())
                    .map(|tagged| match tagged {
                        TaggedAction::ToolConfirmation(a) => {
                            ActionRequiredData::ToolConfirmation(a)
                        }
                        TaggedAction::Elicitation(a) => ActionRequiredData::Elicitation(a),
                    })
                    .map_err(serde::de::Error::custom)
            }
            _ => Ok(ActionRequiredData::Other(value)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequiredContent {
    pub data: ActionRequiredData,
}

/// A single content part, discriminated on the wire by its `type` field.
///
/// Tags this build does not know about round-trip untouched through
/// [`MessageContent::Other`]; order within a message's `content` is
/// significant and preserved.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    Text(TextContent),
    Image(ImageContent),
    ToolRequest(ToolRequestContent),
    ToolResponse(ToolResponseContent),
    ToolConfirmationRequest(ToolConfirmationRequestContent),
    ActionRequired(ActionRequiredContent),
    FrontendToolRequest(FrontendToolRequestContent),
    Thinking(ThinkingContent),
    RedactedThinking(RedactedThinkingContent),
    SystemNotification(SystemNotificationContent),
    Other(Value),
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum TaggedContent {
    Text(TextContent),
    Image(ImageContent),
    ToolRequest(ToolRequestContent),
    ToolResponse(ToolResponseContent),
    ToolConfirmationRequest(ToolConfirmationRequestContent),
    ActionRequired(ActionRequiredContent),
    FrontendToolRequest(FrontendToolRequestContent),
    Thinking(ThinkingContent),
    RedactedThinking(RedactedThinkingContent),
    SystemNotification(SystemNotificationContent),
}

const KNOWN_CONTENT_TAGS: &[&str] = &[
    "text",
    "image",
    "toolRequest",
    "toolResponse",
    "toolConfirmationRequest",
    "actionRequired",
    "frontendToolRequest",
    "thinking",
    "redactedThinking",
    "systemNotification",
];

impl From<TaggedContent> for MessageContent {
    fn from(tagged: TaggedContent) -> Self {
        match tagged {
            TaggedContent::Text(c) => MessageContent::Text(c),
            TaggedContent::Image(c) => MessageContent::Image(c),
            TaggedContent::ToolRequest(c) => MessageContent::ToolRequest(c),
            TaggedContent::ToolResponse(c) => MessageContent::ToolResponse(c),
            TaggedContent::ToolConfirmationRequest(c) => {
                MessageContent::ToolConfirmationRequest(c)
            }
            TaggedContent::ActionRequired(c) => MessageContent::ActionRequired(c),
            TaggedContent::FrontendToolRequest(c) => MessageContent::FrontendToolRequest(c),
            TaggedContent::Thinking(c) => MessageContent::Thinking(c),
            TaggedContent::RedactedThinking(c) => MessageContent::RedactedThinking(c),
            TaggedContent::SystemNotification(c) => MessageContent::SystemNotification(c),
        }
    }
}

impl Serialize for MessageContent {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let tagged = match self {
            MessageContent::Text(c) => TaggedContent::Text(c.clone()),
            MessageContent::Image(c) => TaggedContent::Image(c.clone()),
            MessageContent::ToolRequest(c) => TaggedContent::ToolRequest(c.clone()),
            MessageContent::ToolResponse(c) => TaggedContent::ToolResponse(c.clone()),
            MessageContent::ToolConfirmationRequest(c) => {
                TaggedContent::ToolConfirmationRequest(c.clone())
            }
            MessageContent::ActionRequired(c) => TaggedContent::ActionRequired(c.clone()),
            MessageContent::FrontendToolRequest(c) => {
                TaggedContent::FrontendToolRequest(c.clone())
            }
            MessageContent::Thinking(c) => TaggedContent::Thinking(c.clone()),
            MessageContent::RedactedThinking(c) => TaggedContent::RedactedThinking(c.clone()),
            MessageContent::SystemNotification(c) => {
                TaggedContent::SystemNotification(c.clone())
            }
            MessageContent::Other(v) => return v.serialize(serializer),
        };
        tagged.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for MessageContent {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let tag = value.get("type").and_then(Value::as_str);
        match tag {
            Some(tag) if KNOWN_CONTENT_TAGS.contains(&tag) => {
                TaggedContent::deserialize(value.clone())
                    .map(Into::into)
                    .map_err(serde::de::Error::custom)
            }
            _ => Ok(MessageContent::Other(value)),
        }
    }
}

/// Six-tuple of per-turn and session-accumulated token counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenState {
    #[serde(rename = "inputTokens")]
    pub input_tokens: i32,
    #[serde(rename = "outputTokens")]
    pub output_tokens: i32,
    #[serde(rename = "totalTokens")]
    pub total_tokens: i32,
    #[serde(rename = "accumulatedInputTokens")]
    pub accumulated_input_tokens: i32,
    #[serde(rename = "accumulatedOutputTokens")]
    pub accumulated_output_tokens: i32,
    #[serde(rename = "accumulatedTotalTokens")]
    pub accumulated_total_tokens: i32,
}
