//! The abstract `Tool` capability the adapter hosts on the child's behalf
//! (spec.md §1 "the adapter consumes an abstract `Tool` capability", §6).
//!
//! Defined with `#[async_trait]` rather than a native `async fn` in the
//! trait: the service façade holds a heterogeneous `Vec<Arc<dyn Tool>>`
//! keyed by name, and native async-fn-in-trait is not dyn-compatible.

use async_trait::async_trait;
use serde_json::Value;

/// One fragment of a tool's structured output (spec.md §6: `llmContent:
/// [{text}]`).
#[derive(Clone, Debug)]
pub struct ToolContent {
    pub text: String,
}

/// Result of running a tool. `error` takes precedence over `content` in
/// §4.F.4's translation to a single text output.
#[derive(Clone, Debug, Default)]
pub struct ToolOutcome {
    pub content: Vec<ToolContent>,
    pub display: Option<Value>,
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent { text: text.into() }],
            display: None,
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            content: Vec::new(),
            display: None,
            error: Some(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> Value;

    async fn run(&self, context: &crate::types::RequestContext, arguments: Value) -> ToolOutcome;
}
