//! Turn driver (spec.md §4.F) — the heart of the adapter. Subscribes to
//! thread events, issues `turn/start`, handles server-initiated tool calls
//! and approval requests, accumulates items, detects terminal states, and
//! synthesizes the final response.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use tracing::warn;

use crate::config::AdapterConfig;
use crate::error::AdapterError;
use crate::protocol::{
    self, ErrorNotificationParams, ItemCompletedParams, ItemToolCallParams, Message,
    ResponsePayload, ThreadStartParams, ThreadStartResult, TokenUsage, TokenUsageUpdatedParams,
    TurnCompletedParams, TurnInput, TurnStartParams, METHOD_COMMAND_EXECUTION_APPROVAL,
    METHOD_ERROR, METHOD_FILE_CHANGE_APPROVAL, METHOD_ITEM_COMPLETED, METHOD_ITEM_TOOL_CALL,
    METHOD_THREAD_START, METHOD_TOKEN_USAGE_UPDATED, METHOD_TURN_COMPLETED, METHOD_TURN_START,
};
use crate::supervisor::Supervisor;
use crate::thread_registry::ThreadRegistry;
use crate::tool::{Tool, ToolOutcome};
use crate::types::{ContentBlock, ContentFragment, RequestContext, Request, Role, StopReason, Usage};

/// A single tool invocation recorded during a turn (spec.md §3 "Tool-call
/// record"), later rendered as paired tool-use/tool-result content blocks.
struct ToolCallRecord {
    call_id: String,
    tool_name: String,
    input: Value,
    output: String,
    is_error: bool,
    display: Option<Value>,
    started_at: u64,
    ended_at: u64,
}

#[derive(Default)]
struct TurnAccumulator {
    agent_text: Vec<String>,
    reasoning: Vec<String>,
    usage: TokenUsage,
    turn_done: bool,
    terminal_error: Option<AdapterError>,
    tool_calls: Vec<ToolCallRecord>,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Walk messages back-to-front and return the first user message with
/// non-empty text content (spec.md §4.F.3 step 1, P7).
fn latest_user_text(request: &Request) -> Option<String> {
    request.messages.iter().rev().find_map(|msg| {
        if msg.role != Role::User {
            return None;
        }
        let text: String = msg
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    })
}

/// Classify a terminal turn/error condition per spec.md §4.F.5.
fn is_unauthorized(message: Option<&str>, codex_error_info: Option<&str>) -> bool {
    if codex_error_info.map(|s| s.eq_ignore_ascii_case("unauthorized")).unwrap_or(false) {
        return true;
    }
    message
        .map(|m| m.to_lowercase().contains("unauthorized"))
        .unwrap_or(false)
}

async fn ensure_thread(
    supervisor: &Supervisor,
    thread_registry: &ThreadRegistry,
    conversation_id: &str,
    request: &Request,
    effective_model: Option<&str>,
) -> Result<String, AdapterError> {
    if let Some(thread_id) = thread_registry.lookup(conversation_id) {
        return Ok(thread_id);
    }

    let dynamic_tools = request
        .tools
        .iter()
        .map(|t| crate::protocol::DynamicToolSpec {
            name: t.name.clone(),
            description: t.description.clone(),
            input_schema: t.input_schema.clone(),
        })
        .collect();

    let mut params = ThreadStartParams::new(dynamic_tools);
    params.model = effective_model.map(str::to_string);
    params.cwd = request.cwd.clone();
    if !request.system.is_empty() {
        params.base_instructions = Some(
            request
                .system
                .iter()
                .map(|s| s.text.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        );
    }

    let value = supervisor
        .call(METHOD_THREAD_START, serde_json::to_value(params).map_err(AdapterError::Serialize)?)
        .await?;
    let result: ThreadStartResult = serde_json::from_value(value).map_err(AdapterError::Deserialize)?;
    let thread_id = result
        .thread_id
        .ok_or_else(|| AdapterError::Protocol("thread/start response missing thread id".into()))?;

    thread_registry.insert(conversation_id, thread_id.clone());
    Ok(thread_id)
}

fn respond_result(supervisor: &Supervisor, id: Value, result: Value) -> Result<(), AdapterError> {
    supervisor.write(json!({"id": id, "result": result}))
}

fn respond_error(supervisor: &Supervisor, id: Value, code: i64, message: &str) -> Result<(), AdapterError> {
    supervisor.write(json!({"id": id, "error": {"code": code, "message": message}}))
}

async fn handle_tool_call(
    supervisor: &Supervisor,
    tools: &HashMap<String, Arc<dyn Tool>>,
    context: &RequestContext,
    id: Value,
    params: Value,
    accumulator: &mut TurnAccumulator,
) -> Result<(), AdapterError> {
    let params: ItemToolCallParams = match serde_json::from_value(params) {
        Ok(p) => p,
        Err(err) => {
            return respond_error(supervisor, id, -32602, &format!("invalid item/tool/call params: {err}"));
        }
    };

    let started_at = now_millis();
    let (output, is_error, display) = match tools.get(&params.tool) {
        None => (format!("unknown tool: {}", params.tool), true, None),
        Some(tool) => {
            let outcome: ToolOutcome = tool.run(context, params.arguments.clone()).await;
            translate_tool_outcome(outcome)
        }
    };
    let ended_at = now_millis();

    respond_result(
        supervisor,
        id,
        serde_json::to_value(crate::protocol::ToolCallResponse {
            output: output.clone(),
            success: !is_error,
        })
        .expect("ToolCallResponse always serializes"),
    )?;

    accumulator.tool_calls.push(ToolCallRecord {
        call_id: params.call_id,
        tool_name: params.tool,
        input: params.arguments,
        output,
        is_error,
        display,
        started_at,
        ended_at,
    });

    Ok(())
}

/// Translate a tool's structured result into a single text output
/// (spec.md §4.F.4 step 3).
fn translate_tool_outcome(outcome: ToolOutcome) -> (String, bool, Option<Value>) {
    match outcome.error {
        Some(message) => (message, true, outcome.display),
        None => {
            let text = outcome
                .content
                .iter()
                .map(|c| c.text.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            (text, false, outcome.display)
        }
    }
}

async fn handle_event(
    message: Message,
    accumulator: &mut TurnAccumulator,
    supervisor: &Supervisor,
    tools: &HashMap<String, Arc<dyn Tool>>,
    context: &RequestContext,
) -> Result<(), AdapterError> {
    match message {
        Message::Notification { method, params } => match method.as_str() {
            m if m == METHOD_ITEM_COMPLETED => {
                let parsed: ItemCompletedParams = serde_json::from_value(params)
                    .map_err(AdapterError::Deserialize)?;
                let item_type = parsed.item.get("type").and_then(Value::as_str).unwrap_or_default();
                match item_type {
                    "agentMessage" => {
                        if let Some(text) = parsed.item.get("text").and_then(Value::as_str) {
                            accumulator.agent_text.push(text.to_string());
                        }
                    }
                    "reasoning" => {
                        if let Some(lines) = parsed.item.get("summary").and_then(Value::as_array) {
                            let joined = lines
                                .iter()
                                .filter_map(Value::as_str)
                                .collect::<Vec<_>>()
                                .join("\n");
                            if !joined.is_empty() {
                                accumulator.reasoning.push(joined);
                            }
                        }
                    }
                    _ => {}
                }
            }
            m if m == METHOD_TOKEN_USAGE_UPDATED => {
                let parsed: TokenUsageUpdatedParams = serde_json::from_value(params)
                    .map_err(AdapterError::Deserialize)?;
                accumulator.usage = parsed.last;
            }
            m if m == METHOD_TURN_COMPLETED => {
                let parsed: TurnCompletedParams = serde_json::from_value(params)
                    .map_err(AdapterError::Deserialize)?;
                accumulator.turn_done = true;
                let status = parsed.status.as_deref().unwrap_or("completed");
                match status {
                    "completed" => {}
                    "failed" => {
                        let message = parsed.error.as_ref().and_then(|e| e.message.clone());
                        let codex_error_info =
                            parsed.error.as_ref().and_then(|e| e.codex_error_info.clone());
                        accumulator.terminal_error = Some(if is_unauthorized(
                            message.as_deref(),
                            codex_error_info.as_deref(),
                        ) {
                            AdapterError::Unauthorized
                        } else {
                            AdapterError::TurnFailed(message.unwrap_or_else(|| "turn failed".into()))
                        });
                    }
                    other => {
                        warn!(status = other, "unknown turn/completed status; treating as completed");
                        if parsed.error.is_some() {
                            accumulator.terminal_error =
                                Some(AdapterError::TurnFailed("turn reported an error".into()));
                        }
                    }
                }
            }
            m if m == METHOD_ERROR => {
                let parsed: ErrorNotificationParams = serde_json::from_value(params)
                    .map_err(AdapterError::Deserialize)?;
                let message = parsed.message.unwrap_or_default();
                if parsed.will_retry {
                    warn!(message, "codex app-server reported a retriable error");
                } else if is_unauthorized(Some(message.as_str()), None) {
                    accumulator.turn_done = true;
                    accumulator.terminal_error = Some(AdapterError::Unauthorized);
                } else {
                    accumulator.turn_done = true;
                    accumulator.terminal_error = Some(AdapterError::TurnFailed(message));
                }
            }
            other => {
                warn!(method = other, "ignoring unrecognized notification");
            }
        },
        Message::ServerRequest { id, method, params } => match method.as_str() {
            m if m == METHOD_ITEM_TOOL_CALL => {
                handle_tool_call(supervisor, tools, context, id, params, accumulator).await?;
            }
            m if m == METHOD_COMMAND_EXECUTION_APPROVAL || m == METHOD_FILE_CHANGE_APPROVAL => {
                respond_result(
                    supervisor,
                    id,
                    serde_json::to_value(crate::protocol::ApprovalDecision::REJECT)
                        .expect("ApprovalDecision always serializes"),
                )?;
            }
            other => {
                respond_error(supervisor, id, -32601, &format!("unhandled method: {other}"))?;
            }
        },
        Message::Response { .. } => {
            warn!("response message unexpectedly routed to a thread subscription");
        }
    }

    Ok(())
}

/// Synthesize the final response from a completed accumulator
/// (spec.md §4.F.6).
fn synthesize_response(
    accumulator: TurnAccumulator,
    model: Option<String>,
    start: u64,
    end: u64,
) -> crate::types::AdapterResponse {
    let mut content = Vec::new();

    if !accumulator.reasoning.is_empty() {
        content.push(ContentBlock::Thinking {
            text: accumulator.reasoning.join("\n"),
        });
    }

    if !accumulator.agent_text.is_empty() {
        content.push(ContentBlock::Text {
            text: accumulator.agent_text.join("\n"),
        });
    } else if accumulator.tool_calls.is_empty() {
        content.push(ContentBlock::Text {
            text: "(no response)".to_string(),
        });
    }

    for call in &accumulator.tool_calls {
        content.push(ContentBlock::ToolUse {
            id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            input: call.input.clone(),
        });
        content.push(ContentBlock::ToolResult {
            tool_use_id: call.call_id.clone(),
            is_error: call.is_error,
            result: vec![ContentFragment {
                text: call.output.clone(),
            }],
            display: call.display.clone(),
            start_time: call.started_at,
            end_time: call.ended_at,
        });
    }

    crate::types::AdapterResponse {
        role: Role::Assistant,
        content,
        stop_reason: StopReason::EndOfTurn,
        usage: Usage {
            input_tokens: accumulator.usage.input_tokens,
            output_tokens: accumulator.usage.output_tokens,
            cached_input_tokens: accumulator.usage.cached_input_tokens,
            model: model.clone(),
            start,
            end,
        },
        model,
        start,
        end,
    }
}

/// Drive one caller `Do(request)` call end to end (spec.md §4.F.3–§4.F.6).
pub async fn run_turn(
    supervisor: &Supervisor,
    thread_registry: &ThreadRegistry,
    tools: &HashMap<String, Arc<dyn Tool>>,
    config: &AdapterConfig,
    context: &RequestContext,
    request: &Request,
) -> Result<crate::types::AdapterResponse, AdapterError> {
    let start = now_millis();

    let effective_model = request.model.clone().or_else(|| config.default_model.clone());

    let text = latest_user_text(request).ok_or(AdapterError::NoUserInput)?;
    let thread_id = ensure_thread(
        supervisor,
        thread_registry,
        &context.conversation_id,
        request,
        effective_model.as_deref(),
    )
    .await?;

    let subscriptions = supervisor.subscriptions().clone();
    let subscription = subscriptions.subscribe(&thread_id);
    let mut done_rx = supervisor.done_signal();

    let result = drive_turn(supervisor, tools, context, &thread_id, text, subscription.as_ref(), &mut done_rx).await;

    subscriptions.unsubscribe(&thread_id);

    let accumulator = result?;
    if let Some(err) = accumulator.terminal_error {
        return Err(err);
    }

    let end = now_millis();
    Ok(synthesize_response(accumulator, effective_model, start, end))
}

async fn drive_turn(
    supervisor: &Supervisor,
    tools: &HashMap<String, Arc<dyn Tool>>,
    context: &RequestContext,
    thread_id: &str,
    text: String,
    subscription: &crate::subscription::Subscription,
    done_rx: &mut tokio::sync::watch::Receiver<bool>,
) -> Result<TurnAccumulator, AdapterError> {
    if *done_rx.borrow_and_update() {
        return Err(AdapterError::Transport("codex app-server subprocess exited before turn could start".into()));
    }

    let (turn_id, turn_rx) = supervisor.pending().register().await;
    let params = TurnStartParams {
        thread_id: thread_id.to_string(),
        input: vec![TurnInput::text(text)],
    };
    if let Err(err) = supervisor.write(json!({"id": turn_id, "method": METHOD_TURN_START, "params": params})) {
        supervisor.pending().forget(turn_id).await;
        return Err(err);
    }

    let mut accumulator = TurnAccumulator::default();
    let mut turn_rx = turn_rx;
    let mut ack_pending = true;

    loop {
        if accumulator.turn_done {
            break;
        }

        tokio::select! {
            biased;

            _ = context.cancellation.cancelled() => {
                supervisor.pending().forget(turn_id).await;
                return Err(AdapterError::Cancelled);
            }

            _ = done_rx.changed() => {
                if *done_rx.borrow() {
                    return Err(AdapterError::Transport("codex app-server subprocess exited mid-turn".into()));
                }
            }

            resp = &mut turn_rx, if ack_pending => {
                ack_pending = false;
                match resp {
                    Ok(Ok(ResponsePayload::Ok(_))) => {}
                    Ok(Ok(ResponsePayload::Err { code, message })) => {
                        return Err(AdapterError::Protocol(format!("turn/start rejected ({code}): {message}")));
                    }
                    Ok(Err(err)) => return Err(err),
                    Err(_) => return Err(AdapterError::ChannelClosed),
                }
            }

            message = subscription.recv() => {
                handle_event(message, &mut accumulator, supervisor, tools, context).await?;
            }
        }
    }

    Ok(accumulator)
}
