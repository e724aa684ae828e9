//! Service façade (spec.md §4.G): lazily ensures the supervisor, performs
//! the initialization handshake, and serves `Do`.
//!
//! The façade mutex guards only the ensure()/respawn decision and the
//! one-time-per-subprocess handshake (see DESIGN.md, Open Question 1);
//! turn execution never holds it, so concurrent `Do` calls on different
//! conversations make forward progress in parallel (spec.md §4.G
//! "Serialization").

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::AdapterConfig;
use crate::error::AdapterError;
use crate::protocol::{
    AccountGetResult, ClientInfo, InitializeParams, METHOD_ACCOUNT_GET, METHOD_INITIALIZE,
    METHOD_INITIALIZED,
};
use crate::supervisor::Supervisor;
use crate::thread_registry::ThreadRegistry;
use crate::tool::Tool;
use crate::turn;
use crate::types::{AdapterResponse, Request, RequestContext};

const CLIENT_NAME: &str = "codex_adapter";
const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Everything born and torn down together with one child process life.
struct Generation {
    supervisor: Supervisor,
    thread_registry: ThreadRegistry,
    unauthorized: AtomicBool,
}

pub struct Service {
    config: AdapterConfig,
    tools: HashMap<String, Arc<dyn Tool>>,
    current: Mutex<Option<Arc<Generation>>>,
}

impl Service {
    pub fn new(config: AdapterConfig, tools: Vec<Arc<dyn Tool>>) -> Self {
        let tools = tools.into_iter().map(|t| (t.name().to_string(), t)).collect();
        Self {
            config,
            tools,
            current: Mutex::new(None),
        }
    }

    /// Configured constant pending protocol-level discovery (spec.md §4.G).
    pub fn token_context_window(&self) -> u32 {
        self.config.token_context_window
    }

    /// Images are not supported on this path.
    pub fn max_image_dimension(&self) -> u32 {
        0
    }

    /// Run one caller call end to end (spec.md §4.F.3).
    pub async fn do_turn(
        &self,
        context: &RequestContext,
        request: &Request,
    ) -> Result<AdapterResponse, AdapterError> {
        let generation = self.ensure().await?;

        if generation.unauthorized.load(Ordering::SeqCst) {
            return Err(AdapterError::Unauthorized);
        }

        turn::run_turn(
            &generation.supervisor,
            &generation.thread_registry,
            &self.tools,
            &self.config,
            context,
            request,
        )
        .await
    }

    /// Idempotent start: if the prior generation's child has died, discard
    /// it (dropping its pending table, subscription table, and thread
    /// registry along with it) before starting a new one (spec.md §4.B
    /// "ensure()").
    async fn ensure(&self) -> Result<Arc<Generation>, AdapterError> {
        let mut guard = self.current.lock().await;

        if let Some(generation) = guard.as_ref() {
            if !generation.supervisor.is_done() {
                return Ok(generation.clone());
            }
            debug!("prior codex app-server generation is done; respawning");
        }

        let supervisor = Supervisor::spawn(
            &self.config.binary,
            self.config.max_frame_bytes,
            self.config.subscription_queue_depth,
        )
        .await?;

        self.handshake(&supervisor).await?;
        let unauthorized = self.probe_account(&supervisor).await;

        let generation = Arc::new(Generation {
            supervisor,
            thread_registry: ThreadRegistry::new(self.config.registry_capacity),
            unauthorized: AtomicBool::new(unauthorized),
        });
        *guard = Some(generation.clone());
        Ok(generation)
    }

    /// Initialization handshake, once per subprocess life (spec.md §4.F.1
    /// steps 1-2). Bounded by `startup_timeout` so a child that accepts the
    /// connection but never answers `initialize` cannot hang `ensure()`
    /// (and every `do_turn`) forever, mirroring
    /// `crates/codex/src/mcp/jsonrpc.rs::recv_with_timeout`.
    async fn handshake(&self, supervisor: &Supervisor) -> Result<(), AdapterError> {
        let params = InitializeParams {
            client_info: ClientInfo {
                name: CLIENT_NAME.to_string(),
                version: CLIENT_VERSION.to_string(),
            },
        };
        call_with_timeout(
            supervisor,
            METHOD_INITIALIZE,
            serde_json::to_value(params).map_err(AdapterError::Serialize)?,
            self.config.startup_timeout,
        )
        .await
        .map_err(|err| AdapterError::Handshake(err.to_string()))?;

        supervisor.write(json!({"method": METHOD_INITIALIZED, "params": Value::Null}))?;
        info!("codex app-server handshake complete");
        Ok(())
    }

    /// Optional auth probe (spec.md §4.F.1 step 3). A failure to complete
    /// the probe is not fatal — the child may simply not expose
    /// `account/get` — it only short-circuits subsequent calls when the
    /// child explicitly reports that upstream sign-in is required.
    async fn probe_account(&self, supervisor: &Supervisor) -> bool {
        match call_with_timeout(supervisor, METHOD_ACCOUNT_GET, Value::Null, self.config.startup_timeout).await {
            Ok(value) => serde_json::from_value::<AccountGetResult>(value)
                .map(|r| r.requires_sign_in)
                .unwrap_or(false),
            Err(err) => {
                debug!(error = %err, "account/get probe failed; continuing without auth short-circuit");
                false
            }
        }
    }
}

/// Bound a handshake-time RPC by `timeout`, mirroring
/// `crates/codex/src/mcp/jsonrpc.rs::recv_with_timeout`.
async fn call_with_timeout(
    supervisor: &Supervisor,
    method: &str,
    params: Value,
    timeout: std::time::Duration,
) -> Result<Value, AdapterError> {
    match tokio::time::timeout(timeout, supervisor.call(method, params)).await {
        Ok(result) => result,
        Err(_) => Err(AdapterError::Timeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait::async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "string"})
        }
        async fn run(&self, _context: &RequestContext, arguments: Value) -> crate::tool::ToolOutcome {
            crate::tool::ToolOutcome::text(arguments.to_string())
        }
    }

    #[test]
    fn new_indexes_tools_by_name() {
        let service = Service::new(AdapterConfig::default(), vec![Arc::new(EchoTool)]);
        assert!(service.tools.contains_key("echo"));
    }

    #[test]
    fn token_context_window_reflects_config() {
        let mut config = AdapterConfig::default();
        config.token_context_window = 42;
        let service = Service::new(config, vec![]);
        assert_eq!(service.token_context_window(), 42);
    }
}
