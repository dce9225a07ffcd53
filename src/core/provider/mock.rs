use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{
    estimate_tokens, turn_token_state, ChatOptions, ModelInfo, Provider, ProviderError,
    EVENT_CHANNEL_CAPACITY,
};
use crate::core::models::event::{MessageEvent, FINISH_REASON_STOP};
use crate::core::models::message::{Message, Role, TokenState};

/// Zero-config fallback provider. Always configured; echoes the last user
/// text in a deterministic assistant message.
pub struct MockProvider;

impl MockProvider {
    pub const NAME: &'static str = "mock";

    fn respond(messages: &[Message]) -> String {
        let last_user_text = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.text())
            .unwrap_or_default();

        if last_user_text.is_empty() {
            return "This is a mock response. The mock provider is active because no \
                    real LLM provider is configured. Set ANTHROPIC_API_KEY or \
                    OPENAI_API_KEY to use real providers."
                .to_string();
        }

        let truncated: String = if last_user_text.len() > 100 {
            let mut end = 100;
            while !last_user_text.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...", &last_user_text[..end])
        } else {
            last_user_text
        };
        format!(
            "Mock response to: \"{}\"\n\nTo get real responses, configure an LLM provider:\n\n\
             - Set ANTHROPIC_API_KEY for Claude\n- Set OPENAI_API_KEY for GPT models",
            truncated
        )
    }

    fn run(messages: &[Message]) -> (Message, TokenState) {
        let text = Self::respond(messages);
        let input_tokens = estimate_tokens(messages);
        let output_tokens = (text.len() / 4) as i32;
        (
            Message::assistant(text),
            turn_token_state(input_tokens, output_tokens),
        )
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn display_name(&self) -> &str {
        "Mock Provider"
    }

    fn models(&self) -> Vec<ModelInfo> {
        vec![
            ModelInfo {
                name: "mock-model-v1".into(),
                display_name: "Mock Model v1".into(),
                context_length: 128_000,
                supports_tools: true,
                supports_vision: false,
            },
            ModelInfo {
                name: "mock-model-v2".into(),
                display_name: "Mock Model v2".into(),
                context_length: 128_000,
                supports_tools: true,
                supports_vision: false,
            },
        ]
    }

    fn default_model(&self) -> String {
        "mock-model-v1".into()
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn chat(
        &self,
        messages: Vec<Message>,
        _options: ChatOptions,
    ) -> Result<mpsc::Receiver<MessageEvent>, ProviderError> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;

            let (message, token_state) = MockProvider::run(&messages);
            if tx
                .send(MessageEvent::Message {
                    message,
                    token_state,
                })
                .await
                .is_err()
            {
                // Consumer is gone; stop without emitting Finish.
                return;
            }
            let _ = tx
                .send(MessageEvent::Finish {
                    reason: FINISH_REASON_STOP.into(),
                    token_state,
                })
                .await;
        });

        Ok(rx)
    }

    async fn generate(
        &self,
        messages: Vec<Message>,
        _options: ChatOptions,
    ) -> Result<(Message, TokenState), ProviderError> {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        Ok(Self::run(&messages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn chat_emits_message_then_finish() {
        let provider = MockProvider;
        let mut rx = provider
            .chat(vec![Message::user("hi there")], ChatOptions::default())
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        match &first {
            MessageEvent::Message {
                message,
                token_state,
            } => {
                assert_eq!(message.role, Role::Assistant);
                assert!(message.text().contains("hi there"));
                assert!(token_state.total_tokens > 0);
            }
            other => panic!("expected Message, got {:?}", other),
        }

        let second = rx.recv().await.unwrap();
        match second {
            MessageEvent::Finish { reason, .. } => assert_eq!(reason, "stop"),
            other => panic!("expected Finish, got {:?}", other),
        }

        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropping_receiver_stops_producer() {
        let provider = MockProvider;
        let rx = provider
            .chat(vec![Message::user("hi")], ChatOptions::default())
            .await
            .unwrap();
        drop(rx);
        // Nothing to assert beyond not hanging: the producer's send fails
        // and the task exits.
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    }

    #[tokio::test]
    async fn generate_estimates_tokens() {
        let provider = MockProvider;
        let (message, tokens) = provider
            .generate(vec![Message::user("count me")], ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(
            tokens.total_tokens,
            tokens.input_tokens + tokens.output_tokens
        );
    }
}
