use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use super::{
    estimate_tokens, turn_token_state, ChatOptions, ConfigKey, ModelInfo, Provider,
    ProviderError, EVENT_CHANNEL_CAPACITY,
};
use crate::core::models::event::{MessageEvent, FINISH_REASON_STOP};
use crate::core::models::message::{Message, Role, TokenState};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OPENAI_API_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MAX_TOKENS: i32 = 8192;

/// Wire format spoken by a [`ChatApiProvider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiFormat {
    OpenAi,
    Anthropic,
    AzureOpenAi,
}

// ── OpenAI-compatible request/response ──

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<ChatApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ChatApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
}

#[derive(Deserialize)]
struct OpenAiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: i32,
    #[serde(default)]
    completion_tokens: i32,
}

// ── Anthropic Messages API request/response ──

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    messages: Vec<ChatApiMessage>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct AnthropicContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: i32,
    #[serde(default)]
    output_tokens: i32,
}

/// An LLM provider backed by a hosted chat-completion API.
#[derive(Clone)]
pub struct ChatApiProvider {
    name: String,
    display_name: String,
    pub description: String,
    pub model_doc_link: String,
    api_format: ApiFormat,
    base_url: String,
    api_key: Option<String>,
    api_version: Option<String>,
    default_model: String,
    models: Vec<ModelInfo>,
    pub config_keys: Vec<ConfigKey>,
    client: Client,
}

impl ChatApiProvider {
    pub fn openai_from_env() -> Self {
        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| OPENAI_API_URL.to_string());
        let default_model =
            std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
        Self {
            name: "openai".into(),
            display_name: "OpenAI".into(),
            description: "OpenAI GPT models including GPT-4o, o1, and o3".into(),
            model_doc_link: "https://platform.openai.com/docs/models".into(),
            api_format: ApiFormat::OpenAi,
            base_url,
            api_key: non_empty_env("OPENAI_API_KEY"),
            api_version: None,
            default_model,
            models: openai_models(),
            config_keys: vec![
                config_key("OPENAI_API_KEY", true, true, "OpenAI API key"),
                config_key("OPENAI_BASE_URL", false, false, "Custom API base URL"),
                config_key("OPENAI_MODEL", false, false, "Default model to use"),
            ],
            client: Client::new(),
        }
    }

    pub fn anthropic_from_env() -> Self {
        let default_model = std::env::var("ANTHROPIC_MODEL")
            .unwrap_or_else(|_| "claude-sonnet-4-5-20250514".to_string());
        Self {
            name: "anthropic".into(),
            display_name: "Anthropic".into(),
            description: "Claude models from Anthropic".into(),
            model_doc_link: "https://docs.anthropic.com/en/docs/about-claude/models".into(),
            api_format: ApiFormat::Anthropic,
            base_url: ANTHROPIC_API_URL.into(),
            api_key: non_empty_env("ANTHROPIC_API_KEY"),
            api_version: None,
            default_model,
            models: anthropic_models(),
            config_keys: vec![
                config_key("ANTHROPIC_API_KEY", true, true, "Anthropic API key"),
                config_key("ANTHROPIC_MODEL", false, false, "Default model to use"),
            ],
            client: Client::new(),
        }
    }

    pub fn azure_openai_from_env() -> Self {
        let endpoint = non_empty_env("AZURE_OPENAI_ENDPOINT");
        let api_key = non_empty_env("AZURE_OPENAI_API_KEY");
        let default_model =
            std::env::var("AZURE_OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
        let api_version = std::env::var("AZURE_OPENAI_API_VERSION")
            .unwrap_or_else(|_| "2024-06-01".to_string());
        // Only configured when both the key and the endpoint are present.
        let configured = endpoint.is_some() && api_key.is_some();
        Self {
            name: "azure_openai".into(),
            display_name: "Azure OpenAI".into(),
            description: "OpenAI models via Azure".into(),
            model_doc_link: "https://learn.microsoft.com/en-us/azure/ai-services/openai/".into(),
            api_format: ApiFormat::AzureOpenAi,
            base_url: endpoint.unwrap_or_default(),
            api_key: if configured { api_key } else { None },
            api_version: Some(api_version),
            default_model,
            models: azure_models(),
            config_keys: vec![
                config_key("AZURE_OPENAI_API_KEY", true, true, "Azure OpenAI API key"),
                config_key(
                    "AZURE_OPENAI_ENDPOINT",
                    true,
                    false,
                    "Azure OpenAI endpoint URL",
                ),
                config_key("AZURE_OPENAI_MODEL", false, false, "Deployment name"),
                config_key("AZURE_OPENAI_API_VERSION", false, false, "API version"),
            ],
            client: Client::new(),
        }
    }

    fn request_url(&self, model: &str) -> String {
        match self.api_format {
            ApiFormat::OpenAi => format!("{}/chat/completions", self.base_url),
            ApiFormat::Anthropic => self.base_url.clone(),
            ApiFormat::AzureOpenAi => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                self.base_url.trim_end_matches('/'),
                model,
                self.api_version.as_deref().unwrap_or("2024-06-01"),
            ),
        }
    }

    fn chat_messages(messages: &[Message]) -> Vec<ChatApiMessage> {
        messages
            .iter()
            .filter(|m| m.metadata.agent_visible)
            .map(|m| ChatApiMessage {
                role: match m.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: m.text(),
            })
            .collect()
    }

    async fn dispatch(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<(String, Option<(i32, i32)>), ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::NotConfigured(format!("{} has no API key", self.name)))?;

        let model = if options.model.is_empty() {
            self.default_model.as_str()
        } else {
            options.model.as_str()
        };
        let url = self.request_url(model);
        debug!(provider = %self.name, %model, "dispatching chat completion");

        let response = match self.api_format {
            ApiFormat::OpenAi => self
                .client
                .post(&url)
                .bearer_auth(api_key)
                .json(&OpenAiRequest {
                    model,
                    messages: Self::chat_messages(messages),
                    max_tokens: options.max_tokens,
                    temperature: options.temperature,
                })
                .send()
                .await,
            ApiFormat::AzureOpenAi => self
                .client
                .post(&url)
                .header("api-key", api_key)
                .json(&OpenAiRequest {
                    model,
                    messages: Self::chat_messages(messages),
                    max_tokens: options.max_tokens,
                    temperature: options.temperature,
                })
                .send()
                .await,
            ApiFormat::Anthropic => self
                .client
                .post(&url)
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&AnthropicRequest {
                    model,
                    max_tokens: options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
                    system: if options.system.is_empty() {
                        None
                    } else {
                        Some(options.system.as_str())
                    },
                    temperature: options.temperature,
                    messages: Self::chat_messages(messages),
                })
                .send()
                .await,
        };

        let response =
            response.map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_error(status.as_u16(), &body));
        }

        match self.api_format {
            ApiFormat::OpenAi | ApiFormat::AzureOpenAi => {
                let parsed: OpenAiResponse = response
                    .json()
                    .await
                    .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
                let text = parsed
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .unwrap_or_default();
                let usage = parsed
                    .usage
                    .map(|u| (u.prompt_tokens, u.completion_tokens));
                Ok((text, usage))
            }
            ApiFormat::Anthropic => {
                let parsed: AnthropicResponse = response
                    .json()
                    .await
                    .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
                let text = parsed
                    .content
                    .into_iter()
                    .filter_map(|b| b.text)
                    .collect::<Vec<_>>()
                    .join("");
                let usage = parsed.usage.map(|u| (u.input_tokens, u.output_tokens));
                Ok((text, usage))
            }
        }
    }
}

#[async_trait]
impl Provider for ChatApiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn models(&self) -> Vec<ModelInfo> {
        self.models.clone()
    }

    fn default_model(&self) -> String {
        self.default_model.clone()
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn chat(
        &self,
        messages: Vec<Message>,
        options: ChatOptions,
    ) -> Result<mpsc::Receiver<MessageEvent>, ProviderError> {
        if !self.is_configured() {
            return Err(ProviderError::NotConfigured(format!(
                "provider {} is not configured",
                self.name
            )));
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        // The request runs inside the task so that dropping the receiver
        // tears the turn down with it.
        let provider = self.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                result = provider.generate(messages, options) => result,
                _ = tx.closed() => return,
            };
            match result {
                Ok((message, token_state)) => {
                    if tx
                        .send(MessageEvent::Message {
                            message,
                            token_state,
                        })
                        .await
                        .is_err()
                    {
                        return;
                    }
                    let _ = tx
                        .send(MessageEvent::Finish {
                            reason: FINISH_REASON_STOP.into(),
                            token_state,
                        })
                        .await;
                }
                Err(err) => {
                    let _ = tx
                        .send(MessageEvent::Error {
                            error: err.to_string(),
                        })
                        .await;
                }
            }
        });

        Ok(rx)
    }

    async fn generate(
        &self,
        messages: Vec<Message>,
        options: ChatOptions,
    ) -> Result<(Message, TokenState), ProviderError> {
        let (text, usage) = self.dispatch(&messages, &options).await?;

        let (input_tokens, output_tokens) = usage.unwrap_or_else(|| {
            (estimate_tokens(&messages), (text.len() / 4) as i32)
        });

        Ok((
            Message::assistant(text),
            turn_token_state(input_tokens, output_tokens),
        ))
    }
}

fn classify_http_error(status: u16, body: &str) -> ProviderError {
    match status {
        401 | 403 => ProviderError::Authentication(format!("status {}: {}", status, body)),
        404 => ProviderError::ModelNotFound(format!("status 404: {}", body)),
        429 => ProviderError::RateLimitExceeded(format!("status 429: {}", body)),
        400 if body.contains("context_length") || body.contains("maximum context") => {
            ProviderError::ContextLengthExceeded(body.to_string())
        }
        500..=599 => ProviderError::ServerError(format!("status {}: {}", status, body)),
        _ => ProviderError::RequestFailed(format!("status {}: {}", status, body)),
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn config_key(name: &str, required: bool, secret: bool, description: &str) -> ConfigKey {
    ConfigKey {
        name: name.into(),
        required,
        secret,
        default: None,
        description: description.into(),
    }
}

fn model(name: &str, display_name: &str, context_length: u32, vision: bool) -> ModelInfo {
    ModelInfo {
        name: name.into(),
        display_name: display_name.into(),
        context_length,
        supports_tools: true,
        supports_vision: vision,
    }
}

fn openai_models() -> Vec<ModelInfo> {
    vec![
        model("gpt-4o", "GPT-4o", 128_000, true),
        model("gpt-4o-mini", "GPT-4o Mini", 128_000, true),
        model("gpt-4-turbo", "GPT-4 Turbo", 128_000, true),
        model("gpt-4", "GPT-4", 8_192, false),
        model("o1", "o1", 200_000, true),
        model("o3-mini", "o3 Mini", 200_000, true),
    ]
}

fn anthropic_models() -> Vec<ModelInfo> {
    vec![
        model("claude-sonnet-4-5-20250514", "Claude Sonnet 4.5", 200_000, true),
        model("claude-opus-4-5-20250514", "Claude Opus 4.5", 200_000, true),
        model("claude-3-5-sonnet-20241022", "Claude 3.5 Sonnet", 200_000, true),
        model("claude-3-5-haiku-20241022", "Claude 3.5 Haiku", 200_000, true),
    ]
}

fn azure_models() -> Vec<ModelInfo> {
    vec![
        model("gpt-4o", "GPT-4o", 128_000, true),
        model("gpt-4o-mini", "GPT-4o Mini", 128_000, true),
        model("gpt-4-turbo", "GPT-4 Turbo", 128_000, true),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification_by_status() {
        assert!(matches!(
            classify_http_error(401, ""),
            ProviderError::Authentication(_)
        ));
        assert!(matches!(
            classify_http_error(429, ""),
            ProviderError::RateLimitExceeded(_)
        ));
        assert!(matches!(
            classify_http_error(503, ""),
            ProviderError::ServerError(_)
        ));
        assert!(matches!(
            classify_http_error(400, "context_length exceeded"),
            ProviderError::ContextLengthExceeded(_)
        ));
        assert!(matches!(
            classify_http_error(418, ""),
            ProviderError::RequestFailed(_)
        ));
    }

    #[test]
    fn azure_needs_both_key_and_endpoint() {
        // Relies on these not being set in the test environment.
        std::env::remove_var("AZURE_OPENAI_API_KEY");
        std::env::remove_var("AZURE_OPENAI_ENDPOINT");
        let provider = ChatApiProvider::azure_openai_from_env();
        assert!(!provider.is_configured());
    }

    #[tokio::test]
    async fn unconfigured_chat_is_rejected() {
        std::env::remove_var("OPENAI_API_KEY");
        let provider = ChatApiProvider::openai_from_env();
        let err = provider
            .chat(vec![Message::user("hi")], ChatOptions::default())
            .await
            .err()
            .expect("chat should fail");
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }

    #[test]
    fn agent_invisible_messages_are_filtered() {
        let mut hidden = Message::user("secret");
        hidden.metadata.agent_visible = false;
        let msgs =
            ChatApiProvider::chat_messages(&[Message::user("visible"), hidden]);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].content, "visible");
    }
}
