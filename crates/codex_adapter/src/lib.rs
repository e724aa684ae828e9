#![forbid(unsafe_code)]
//! Bidirectional JSON-RPC driver for a long-lived `codex app-server`
//! subprocess, exposed as a synchronous [`Service::do_turn`] call to the
//! rest of a host application.
//!
//! The adapter manages the lifecycle of one child process shared by many
//! concurrent logical conversations, multiplexes requests/responses/
//! notifications over a single stdio stream, hosts server-initiated tool
//! calls on the caller's behalf, maps caller conversation ids to child-side
//! thread ids, and synthesizes one final response per call from the child's
//! asynchronous notification stream.
//!
//! ```rust,no_run
//! use codex_adapter::{AdapterConfig, RequestContext, Request, Service};
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let service = Service::new(AdapterConfig::default(), vec![]);
//! let context = RequestContext::new("conversation-1");
//! let request: Request = serde_json::from_value(serde_json::json!({
//!     "messages": [{"role": "user", "content": [{"type": "text", "text": "hello"}]}]
//! }))?;
//! let response = service.do_turn(&context, &request).await?;
//! println!("{:?}", response.content);
//! # Ok(()) }
//! ```
//!
//! ## Module map
//! - [`framing`] — newline-delimited JSON-RPC line codec (spec §4.A).
//! - [`supervisor`] — subprocess lifecycle, stdio ownership, death signal (§4.B).
//! - [`router`] — dispatch of decoded messages to pending calls or thread subscriptions (§4.C).
//! - [`pending`] — outbound request id correlation (§4.D).
//! - [`thread_registry`] — caller conversation id → child thread id mapping (§4.E).
//! - [`turn`] — the turn driver: event accumulation, tool hosting, response synthesis (§4.F).
//! - [`service`] — the façade callers embed (§4.G).
//! - [`tool`] — the abstract `Tool` capability the adapter hosts on the child's behalf.
//! - [`protocol`] — wire types and method names.
//! - [`types`] — caller-facing request/response model.
//! - [`config`] — [`AdapterConfig`] and TOML loading.
//! - [`error`] — [`error::AdapterError`], the crate's public error currency.

pub mod config;
pub mod error;
pub mod framing;
pub mod pending;
pub mod protocol;
pub mod router;
pub mod service;
pub mod subscription;
pub mod supervisor;
pub mod thread_registry;
pub mod tool;
pub mod turn;
pub mod types;

pub use config::AdapterConfig;
pub use error::AdapterError;
pub use service::Service;
pub use tool::{Tool, ToolContent, ToolOutcome};
pub use types::{
    AdapterResponse, ChatMessage, ContentBlock, ContentFragment, Request, RequestContext, Role,
    StopReason, SystemPrompt, ToolSpec, Usage,
};
