use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::message::{Message, TokenState};

/// Server-sent event payload for the `/reply` stream.
///
/// Internally tagged by `type`; the `Notification` variant's inner field is
/// named `message` on the wire, which the desktop client depends on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MessageEvent {
    Message {
        message: Message,
        token_state: TokenState,
    },
    Error {
        error: String,
    },
    Finish {
        reason: String,
        token_state: TokenState,
    },
    ModelChange {
        model: String,
        mode: String,
    },
    Notification {
        request_id: String,
        message: Value,
    },
    UpdateConversation {
        conversation: Vec<Message>,
    },
    Ping,
}

impl MessageEvent {
    /// Token state carried by this event, if any.
    pub fn token_state(&self) -> Option<&TokenState> {
        match self {
            MessageEvent::Message { token_state, .. }
            | MessageEvent::Finish { token_state, .. } => Some(token_state),
            _ => None,
        }
    }
}

/// Body of `POST /reply`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub recipe_name: Option<String>,
    #[serde(default)]
    pub recipe_version: Option<String>,
}

pub const FINISH_REASON_STOP: &str = "stop";

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ping_carries_only_type() {
        let encoded = serde_json::to_value(MessageEvent::Ping).unwrap();
        assert_eq!(encoded, json!({"type": "Ping"}));
    }

    #[test]
    fn notification_inner_field_is_named_message() {
        let event = MessageEvent::Notification {
            request_id: "r1".into(),
            message: json!({"method": "notifications/progress", "params": {"progress": 0.5}}),
        };
        let encoded = serde_json::to_value(&event).unwrap();
        assert_eq!(encoded["type"], "Notification");
        assert_eq!(encoded["request_id"], "r1");
        assert!(encoded.get("message").is_some());
        assert!(encoded.get("notification").is_none());
    }

    #[test]
    fn finish_round_trips() {
        let event = MessageEvent::Finish {
            reason: FINISH_REASON_STOP.into(),
            token_state: TokenState {
                input_tokens: 3,
                output_tokens: 4,
                total_tokens: 7,
                accumulated_input_tokens: 3,
                accumulated_output_tokens: 4,
                accumulated_total_tokens: 7,
            },
        };
        let encoded = serde_json::to_string(&event).unwrap();
        let decoded: MessageEvent = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, event);
    }
}
