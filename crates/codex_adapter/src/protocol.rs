//! Wire types and method names for the `codex app-server` JSON-RPC protocol
//! (spec.md §6). No `jsonrpc` version field is required by the child; ids are
//! emitted as JSON numbers and compared by canonical string form on the way
//! back in (spec.md §4.D, §9 "Id comparison").

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_INITIALIZED: &str = "initialized";
pub const METHOD_ACCOUNT_GET: &str = "account/get";
pub const METHOD_THREAD_START: &str = "thread/start";
pub const METHOD_TURN_START: &str = "turn/start";

pub const METHOD_ITEM_COMPLETED: &str = "item/completed";
pub const METHOD_TURN_COMPLETED: &str = "turn/completed";
pub const METHOD_ERROR: &str = "error";
pub const METHOD_TOKEN_USAGE_UPDATED: &str = "thread/tokenUsage/updated";
pub const METHOD_ITEM_TOOL_CALL: &str = "item/tool/call";
pub const METHOD_COMMAND_EXECUTION_APPROVAL: &str = "item/commandExecution/requestApproval";
pub const METHOD_FILE_CHANGE_APPROVAL: &str = "item/fileChange/requestApproval";

/// Unique identifier assigned by this adapter to outbound requests.
///
/// Emitted on the wire as a JSON number; compared on the way back by
/// canonical string form via [`canonical_id`] so integer/float round-tripping
/// through the child's JSON decoder never breaks correlation.
pub type RequestId = u64;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InitializeParams {
    #[serde(rename = "clientInfo")]
    pub client_info: ClientInfo,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ThreadStartParams {
    #[serde(rename = "approvalPolicy")]
    pub approval_policy: String,
    pub sandbox: String,
    #[serde(rename = "dynamicTools")]
    pub dynamic_tools: Vec<DynamicToolSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(rename = "baseInstructions", skip_serializing_if = "Option::is_none")]
    pub base_instructions: Option<String>,
}

impl ThreadStartParams {
    pub fn new(dynamic_tools: Vec<DynamicToolSpec>) -> Self {
        Self {
            approval_policy: "on-request".to_string(),
            sandbox: "danger-full-access".to_string(),
            dynamic_tools,
            model: None,
            cwd: None,
            base_instructions: None,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct DynamicToolSpec {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ThreadStartResult {
    #[serde(rename = "threadId", alias = "thread_id", alias = "id")]
    pub thread_id: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct TurnStartParams {
    #[serde(rename = "threadId")]
    pub thread_id: String,
    pub input: Vec<TurnInput>,
}

#[derive(Clone, Debug, Serialize)]
pub struct TurnInput {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl TurnInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: text.into(),
        }
    }
}

/// A decoded line from the child, classified per spec.md §3 "Message (wire)".
#[derive(Debug)]
pub enum Message {
    /// Has `id`, no `method`.
    Response { id: String, payload: ResponsePayload },
    /// Has `id` and `method`: the child asking the adapter to do something.
    ServerRequest {
        id: Value,
        method: String,
        params: Value,
    },
    /// Has `method`, no `id`.
    Notification { method: String, params: Value },
}

#[derive(Debug)]
pub enum ResponsePayload {
    Ok(Value),
    Err { code: i64, message: String },
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RawRpcError>,
}

#[derive(Debug, Deserialize)]
struct RawRpcError {
    code: i64,
    message: String,
}

/// Classify one decoded JSON line into a [`Message`]. Returns `None` for
/// payloads missing both `id` and `method` (malformed; the caller logs and
/// drops per spec.md §4.C).
pub fn decode_message(value: Value) -> Option<Message> {
    let raw: RawMessage = serde_json::from_value(value).ok()?;

    match (raw.id, raw.method) {
        (Some(id), None) => {
            let id = canonical_id(&id)?;
            let payload = match raw.error {
                Some(err) => ResponsePayload::Err {
                    code: err.code,
                    message: err.message,
                },
                None => ResponsePayload::Ok(raw.result.unwrap_or(Value::Null)),
            };
            Some(Message::Response { id, payload })
        }
        (Some(id), Some(method)) => Some(Message::ServerRequest {
            id,
            method,
            params: raw.params.unwrap_or(Value::Null),
        }),
        (None, Some(method)) => Some(Message::Notification {
            method,
            params: raw.params.unwrap_or(Value::Null),
        }),
        (None, None) => None,
    }
}

/// Canonical string form of a JSON-RPC id, tolerant of the id round-tripping
/// through the child's decoder as an integer, unsigned integer, or float
/// (spec.md §9 "Id comparison").
pub fn canonical_id(value: &Value) -> Option<String> {
    if let Some(s) = value.as_str() {
        return Some(s.to_string());
    }
    if let Some(n) = value.as_u64() {
        return Some(n.to_string());
    }
    if let Some(n) = value.as_i64() {
        return Some(n.to_string());
    }
    if let Some(n) = value.as_f64() {
        if n.fract() == 0.0 {
            return Some((n as i64).to_string());
        }
        return Some(n.to_string());
    }
    None
}

/// Best-effort extraction of `params.threadId` (also accepting `thread_id`),
/// used by the router to find a notification's destination subscription.
pub fn extract_thread_id(params: &Value) -> Option<String> {
    params
        .get("threadId")
        .or_else(|| params.get("thread_id"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[derive(Clone, Debug, Deserialize)]
pub struct ItemToolCallParams {
    #[serde(rename = "threadId")]
    pub thread_id: String,
    #[serde(rename = "turnId", default)]
    pub turn_id: Option<String>,
    #[serde(rename = "callId")]
    pub call_id: String,
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Clone, Debug, Serialize)]
pub struct ToolCallResponse {
    pub output: String,
    pub success: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct ApprovalDecision {
    pub decision: &'static str,
}

impl ApprovalDecision {
    pub const REJECT: Self = Self { decision: "reject" };
}

#[derive(Clone, Debug, Deserialize)]
pub struct ItemCompletedParams {
    #[serde(default)]
    pub item: Value,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TurnCompletedParams {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error: Option<TurnError>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TurnError {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(rename = "codexErrorInfo", default)]
    pub codex_error_info: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ErrorNotificationParams {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(rename = "willRetry", default)]
    pub will_retry: bool,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct TokenUsage {
    #[serde(rename = "inputTokens", default)]
    pub input_tokens: u64,
    #[serde(rename = "outputTokens", default)]
    pub output_tokens: u64,
    #[serde(rename = "cachedInputTokens", default)]
    pub cached_input_tokens: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TokenUsageUpdatedParams {
    pub last: TokenUsage,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AccountGetResult {
    #[serde(rename = "requiresSignIn", default)]
    pub requires_sign_in: bool,
}

/// Arbitrary config map accepted by `thread/start`/`turn/start`, kept as an
/// opaque passthrough bag (mirrors `TurnStartParams::config` in the teacher's
/// `mcp/protocol.rs`) even though this adapter does not populate it today.
pub type ConfigMap = BTreeMap<String, Value>;
