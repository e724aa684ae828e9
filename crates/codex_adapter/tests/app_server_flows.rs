//! End-to-end scenarios (spec.md §8) driven against a real fake `codex
//! app-server` subprocess rather than mocked internals, following the
//! teacher's `mcp` integration tests in spirit (spawn a real child, assert
//! on observable adapter behavior). Registry eviction (§8 S7) is covered by
//! `thread_registry::tests::overflow_clears_wholesale_rather_than_evicting_one`
//! instead of repeated here, since it needs no subprocess.

#[path = "support/fake_app_server.rs"]
mod support;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use codex_adapter::{
    AdapterConfig, AdapterError, ChatMessage, ContentBlock, Request, RequestContext, Role,
    Service, Tool, ToolOutcome,
};
use serde_json::{json, Value};

struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "echoes its input back as text"
    }
    fn input_schema(&self) -> Value {
        json!({"type": "string"})
    }
    async fn run(&self, _context: &RequestContext, arguments: Value) -> ToolOutcome {
        ToolOutcome::text(arguments.to_string())
    }
}

fn request(text: &str) -> Request {
    Request {
        system: vec![],
        tools: vec![],
        messages: vec![ChatMessage {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.to_string() }],
        }],
        model: None,
        cwd: None,
    }
}

fn service_for(scenario: &str) -> (tempfile::TempDir, Service) {
    let (dir, script) = support::write_fake_app_server(scenario);
    let config = AdapterConfig {
        binary: script,
        ..AdapterConfig::default()
    };
    let service = Service::new(config, vec![Arc::new(EchoTool)]);
    (dir, service)
}

fn service_with_startup_timeout(scenario: &str, startup_timeout: Duration) -> (tempfile::TempDir, Service) {
    let (dir, script) = support::write_fake_app_server(scenario);
    let config = AdapterConfig {
        binary: script,
        startup_timeout,
        ..AdapterConfig::default()
    };
    let service = Service::new(config, vec![Arc::new(EchoTool)]);
    (dir, service)
}

fn text_of(response: &codex_adapter::AdapterResponse) -> String {
    response
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// S1: a plain turn with no tool calls resolves to the agent's text.
#[tokio::test]
async fn happy_path_resolves_agent_text() {
    let (_dir, service) = service_for("happy");
    let context = RequestContext::new("conv-1");
    let response = service.do_turn(&context, &request("hi")).await.expect("turn succeeds");
    assert!(text_of(&response).starts_with("echo:thread-"));
}

/// S2: a single server-initiated tool call is hosted and paired into the response.
#[tokio::test]
async fn single_tool_call_is_hosted_and_paired() {
    let (_dir, service) = service_for("tool_call");
    let context = RequestContext::new("conv-1");
    let response = service.do_turn(&context, &request("use the tool")).await.expect("turn succeeds");

    let tool_use = response
        .content
        .iter()
        .find(|b| matches!(b, ContentBlock::ToolUse { .. }))
        .expect("a tool-use block");
    let ContentBlock::ToolUse { id, tool_name, .. } = tool_use else { unreachable!() };
    assert_eq!(id, "c1");
    assert_eq!(tool_name, "echo");

    let tool_result = response
        .content
        .iter()
        .find(|b| matches!(b, ContentBlock::ToolResult { .. }))
        .expect("a tool-result block");
    let ContentBlock::ToolResult { tool_use_id, is_error, result, .. } = tool_result else { unreachable!() };
    assert_eq!(tool_use_id, "c1");
    assert!(!is_error);
    assert!(result[0].text.contains("ping"));

    assert!(text_of(&response).contains("tool-said:"));
}

/// S3: an unknown tool name yields an error tool-result but does not fail the turn.
#[tokio::test]
async fn unknown_tool_call_is_reported_without_failing_the_turn() {
    let (_dir, service) = service_for("unknown_tool");
    let context = RequestContext::new("conv-1");
    let response = service.do_turn(&context, &request("use a tool")).await.expect("turn still succeeds");

    let tool_result = response
        .content
        .iter()
        .find(|b| matches!(b, ContentBlock::ToolResult { .. }))
        .expect("a tool-result block");
    let ContentBlock::ToolResult { is_error, result, .. } = tool_result else { unreachable!() };
    assert!(is_error);
    assert!(result[0].text.contains("unknown tool"));
}

/// S4: a turn that fails with an unauthorized error surfaces `AdapterError::Unauthorized`.
#[tokio::test]
async fn unauthorized_turn_failure_is_classified() {
    let (_dir, service) = service_for("unauthorized");
    let context = RequestContext::new("conv-1");
    let err = service.do_turn(&context, &request("hi")).await.unwrap_err();
    assert!(matches!(err, AdapterError::Unauthorized));
}

/// S5: the subprocess dying mid-turn surfaces a transport error to the caller.
#[tokio::test]
async fn subprocess_death_mid_turn_surfaces_transport_error() {
    let (_dir, service) = service_for("dies_mid_turn");
    let context = RequestContext::new("conv-1");
    let err = tokio::time::timeout(Duration::from_secs(5), service.do_turn(&context, &request("hi")))
        .await
        .expect("do_turn does not hang")
        .unwrap_err();
    assert!(matches!(err, AdapterError::Transport(_)));
}

/// A child that accepts the connection but never answers `initialize` makes
/// `ensure()` fail with a timeout rather than hang `do_turn` forever.
#[tokio::test]
async fn silent_initialize_times_out_instead_of_hanging() {
    let (_dir, service) = service_with_startup_timeout("silent_init", Duration::from_millis(200));
    let context = RequestContext::new("conv-1");
    let err = tokio::time::timeout(Duration::from_secs(5), service.do_turn(&context, &request("hi")))
        .await
        .expect("do_turn does not hang")
        .unwrap_err();
    assert!(matches!(err, AdapterError::Handshake(_)));
}

/// S6: two concurrent conversations against the same generation never cross-talk.
#[tokio::test]
async fn concurrent_conversations_do_not_cross_talk() {
    let (_dir, service) = service_for("happy");
    let context_a = RequestContext::new("conv-a");
    let context_b = RequestContext::new("conv-b");

    let request_a = request("from a");
    let request_b = request("from b");
    let (response_a, response_b) = tokio::join!(
        service.do_turn(&context_a, &request_a),
        service.do_turn(&context_b, &request_b),
    );

    let response_a = response_a.expect("conversation a succeeds");
    let response_b = response_b.expect("conversation b succeeds");

    let text_a = text_of(&response_a);
    let text_b = text_of(&response_b);
    assert_ne!(text_a, text_b, "each conversation must see its own thread's reply");
    assert!(text_a.starts_with("echo:thread-"));
    assert!(text_b.starts_with("echo:thread-"));
}
