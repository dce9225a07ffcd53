mod chat_api;
mod mock;
mod registry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

pub use mock::MockProvider;
pub use registry::Registry;

use crate::core::models::message::{Message, TokenState};
use crate::core::models::event::MessageEvent;
use crate::core::models::tool::ToolInfo;

/// Capacity of the event channel between a provider task and its consumer.
/// Dropping the receiver closes the channel; the producer observes it on its
/// next send and stops within one event.
pub const EVENT_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("AUTHENTICATION: {0}")]
    Authentication(String),
    #[error("RATE_LIMIT_EXCEEDED: {0}")]
    RateLimitExceeded(String),
    #[error("CONTEXT_LENGTH_EXCEEDED: {0}")]
    ContextLengthExceeded(String),
    #[error("SERVER_ERROR: {0}")]
    ServerError(String),
    #[error("REQUEST_FAILED: {0}")]
    RequestFailed(String),
    #[error("NOT_CONFIGURED: {0}")]
    NotConfigured(String),
    #[error("MODEL_NOT_FOUND: {0}")]
    ModelNotFound(String),
}

/// Options applied to a single chat or generate call.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub model: String,
    pub system: String,
    pub tools: Vec<ToolInfo>,
    pub max_tokens: Option<i32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub display_name: String,
    #[serde(skip_serializing_if = "is_zero", default)]
    pub context_length: u32,
    pub supports_tools: bool,
    pub supports_vision: bool,
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigKey {
    pub name: String,
    pub required: bool,
    pub secret: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub description: String,
}

/// Static description of a provider for `GET /config/providers`.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderMetadata {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub default_model: String,
    pub known_models: Vec<ModelInfo>,
    pub config_keys: Vec<ConfigKey>,
    pub is_configured: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub model_doc_link: String,
}

/// A chat backend. `chat` yields a lazy, finite event sequence terminating in
/// exactly one `Finish` or one `Error`; `generate` is the one-shot form.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    fn display_name(&self) -> &str;

    fn models(&self) -> Vec<ModelInfo>;

    fn default_model(&self) -> String;

    fn is_configured(&self) -> bool;

    fn supports_streaming(&self) -> bool {
        true
    }

    fn supports_tools(&self) -> bool {
        true
    }

    async fn chat(
        &self,
        messages: Vec<Message>,
        options: ChatOptions,
    ) -> Result<mpsc::Receiver<MessageEvent>, ProviderError>;

    async fn generate(
        &self,
        messages: Vec<Message>,
        options: ChatOptions,
    ) -> Result<(Message, TokenState), ProviderError>;
}

/// Rough token estimate over the text parts of a conversation, 4 chars per
/// token.
pub fn estimate_tokens(messages: &[Message]) -> i32 {
    let total: usize = messages.iter().map(|m| m.text().len()).sum();
    (total / 4) as i32
}

/// Per-turn token state where the accumulated fields mirror the turn counts;
/// the reply pipeline rebases them onto the session's running totals.
pub fn turn_token_state(input_tokens: i32, output_tokens: i32) -> TokenState {
    let total = input_tokens + output_tokens;
    TokenState {
        input_tokens,
        output_tokens,
        total_tokens: total,
        accumulated_input_tokens: input_tokens,
        accumulated_output_tokens: output_tokens,
        accumulated_total_tokens: total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimates_four_chars_per_token() {
        let messages = vec![Message::user("abcdefgh"), Message::assistant("ijkl")];
        assert_eq!(estimate_tokens(&messages), 3);
    }

    #[test]
    fn error_messages_carry_their_kind() {
        let err = ProviderError::RateLimitExceeded("slow down".into());
        assert!(err.to_string().starts_with("RATE_LIMIT_EXCEEDED"));
    }
}
