//! Generation parameters and session-creation parameters.

use bon::Builder;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::message::ChatMessage;

/// Parameters controlling text generation, sent with every completion request.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, Default, PartialEq)]
pub struct ChatParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

/// How a stateful backend keeps server-side history.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionMode {
    /// Server keeps the whole dialogue and truncates it per strategy.
    #[default]
    Session,
    /// Server keeps only the initial messages as a reusable prefix.
    CommonPrefix,
}

/// Server-side history truncation policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TruncationStrategy {
    /// Keep the most recent history tokens.
    LastHistoryTokens {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_history_tokens: Option<u32>,
    },
    /// Drop the oldest turns in chunks once the window is full.
    RollingTokens {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rolling_tokens: Option<bool>,
    },
}

/// Parameters used to allocate a stateful backend session.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, Default, PartialEq)]
pub struct SessionParameters {
    #[builder(default)]
    #[serde(default)]
    pub mode: SessionMode,
    #[builder(default)]
    #[serde(default)]
    pub initial_messages: Vec<ChatMessage>,
    /// Session time-to-live in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncation_strategy: Option<TruncationStrategy>,
}

/// Why generation finished.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    FunctionCall,
}
