//! Caller-facing request/response model (spec.md §3, §6 "Adapter interface
//! to callers").

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ContentBlock {
    Thinking {
        text: String,
    },
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        input: Value,
    },
    ToolResult {
        #[serde(rename = "toolUseId")]
        tool_use_id: String,
        #[serde(rename = "isError")]
        is_error: bool,
        result: Vec<ContentFragment>,
        #[serde(skip_serializing_if = "Option::is_none")]
        display: Option<Value>,
        #[serde(rename = "startTime")]
        start_time: u64,
        #[serde(rename = "endTime")]
        end_time: u64,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContentFragment {
    pub text: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SystemPrompt {
    pub text: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub system: Vec<SystemPrompt>,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    EndOfTurn,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(rename = "inputTokens")]
    pub input_tokens: u64,
    #[serde(rename = "outputTokens")]
    pub output_tokens: u64,
    #[serde(rename = "cachedInputTokens")]
    pub cached_input_tokens: u64,
    pub model: Option<String>,
    pub start: u64,
    pub end: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdapterResponse {
    pub role: Role,
    pub content: Vec<ContentBlock>,
    #[serde(rename = "stopReason")]
    pub stop_reason: StopReason,
    pub usage: Usage,
    pub model: Option<String>,
    pub start: u64,
    pub end: u64,
}

/// Per-call context threaded through a `Do` invocation: which conversation
/// to route to, and the cancellation signal the caller controls
/// (spec.md §5 "Cancellation and timeouts").
#[derive(Clone)]
pub struct RequestContext {
    pub conversation_id: String,
    pub cancellation: tokio_util::sync::CancellationToken,
}

impl RequestContext {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            cancellation: tokio_util::sync::CancellationToken::new(),
        }
    }
}
