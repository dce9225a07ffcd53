use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::message::Message;
use crate::core::recipe::Recipe;

/// Session classification. `Hidden` sessions stay addressable by id but are
/// excluded from listings and insights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    User,
    Scheduled,
    SubAgent,
    Hidden,
    Terminal,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::User => "user",
            SessionType::Scheduled => "scheduled",
            SessionType::SubAgent => "sub_agent",
            SessionType::Hidden => "hidden",
            SessionType::Terminal => "terminal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(SessionType::User),
            "scheduled" => Some(SessionType::Scheduled),
            "sub_agent" => Some(SessionType::SubAgent),
            "hidden" => Some(SessionType::Hidden),
            "terminal" => Some(SessionType::Terminal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_name: String,
    #[serde(default)]
    pub toolshim: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fast_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub toolshim_model: Option<String>,
}

/// A persisted conversation together with provider binding and token
/// accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub working_dir: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub extension_data: Map<String, Value>,
    pub message_count: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conversation: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accumulated_input_tokens: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accumulated_output_tokens: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accumulated_total_tokens: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_config: Option<ModelConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipe: Option<Recipe>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_type: Option<SessionType>,
    #[serde(default, skip_serializing_if = "std::collections::HashMap::is_empty")]
    pub user_recipe_values: std::collections::HashMap<String, String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub user_set_name: bool,
}

impl Session {
    /// A fresh user session rooted at `working_dir`.
    pub fn new(working_dir: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            working_dir: working_dir.into(),
            name: "New Session".to_string(),
            created_at: now,
            updated_at: now,
            extension_data: Map::new(),
            message_count: 0,
            conversation: Vec::new(),
            input_tokens: None,
            output_tokens: None,
            total_tokens: None,
            accumulated_input_tokens: None,
            accumulated_output_tokens: None,
            accumulated_total_tokens: None,
            provider_name: None,
            model_config: None,
            recipe: None,
            schedule_id: None,
            session_type: Some(SessionType::User),
            user_recipe_values: std::collections::HashMap::new(),
            user_set_name: false,
        }
    }

}

/// Lightweight per-session row for schedule listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDisplayInfo {
    pub id: String,
    pub name: String,
    #[serde(rename = "createdAt")]
    pub created_at: String,
    #[serde(rename = "workingDir")]
    pub working_dir: String,
    #[serde(rename = "messageCount")]
    pub message_count: u64,
    #[serde(rename = "inputTokens", skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<i32>,
    #[serde(rename = "outputTokens", skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<i32>,
    #[serde(rename = "totalTokens", skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<i32>,
    #[serde(
        rename = "accumulatedInputTokens",
        skip_serializing_if = "Option::is_none"
    )]
    pub accumulated_input_tokens: Option<i32>,
    #[serde(
        rename = "accumulatedOutputTokens",
        skip_serializing_if = "Option::is_none"
    )]
    pub accumulated_output_tokens: Option<i32>,
    #[serde(
        rename = "accumulatedTotalTokens",
        skip_serializing_if = "Option::is_none"
    )]
    pub accumulated_total_tokens: Option<i32>,
    #[serde(rename = "scheduleId", skip_serializing_if = "Option::is_none")]
    pub schedule_id: Option<String>,
}

/// Aggregate statistics over non-hidden sessions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SessionInsights {
    #[serde(rename = "totalSessions")]
    pub total_sessions: u64,
    #[serde(rename = "totalTokens")]
    pub total_tokens: i64,
}

#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<Session>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_round_trips() {
        let mut session = Session::new("/tmp/w");
        session.conversation.push(Message::user("hi"));
        session.message_count = 1;
        session.accumulated_total_tokens = Some(42);
        session
            .user_recipe_values
            .insert("region".into(), "eu".into());
        session
            .extension_data
            .insert("todo".into(), serde_json::json!({"count": 2}));

        let encoded = serde_json::to_string(&session).unwrap();
        let decoded: Session = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, session);
    }

    #[test]
    fn session_type_strings() {
        assert_eq!(SessionType::SubAgent.as_str(), "sub_agent");
        assert_eq!(SessionType::parse("hidden"), Some(SessionType::Hidden));
        assert_eq!(SessionType::parse("bogus"), None);
    }
}
