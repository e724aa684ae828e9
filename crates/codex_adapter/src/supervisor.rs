//! Subprocess supervisor (spec.md §4.B): spawns the child, owns its stdio,
//! and exposes a write sink, a one-shot death signal, and teardown.
//!
//! Grounded on `crates/codex/src/mcp/jsonrpc.rs::spawn_with_subcommand`
//! (retry-on-busy spawn loop, a dedicated writer task owning `ChildStdin`
//! exclusively, a dedicated reader task) but generalized from "broadcast
//! every notification to every listener" to routing through
//! [`crate::subscription::SubscriptionRegistry`] by thread id.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::AdapterError;
use crate::framing::{FrameReader, FrameWriter};
use crate::pending::PendingCalls;
use crate::protocol::ResponsePayload;
use crate::router;
use crate::subscription::SubscriptionRegistry;

pub struct Supervisor {
    writer_tx: mpsc::UnboundedSender<Value>,
    pending: Arc<PendingCalls>,
    subscriptions: Arc<SubscriptionRegistry>,
    done_rx: watch::Receiver<bool>,
    child: Mutex<Option<Child>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Supervisor {
    /// Spawn `<binary> app-server` and wire its stdio (spec.md §4.B,
    /// §6 "Child process").
    pub async fn spawn(
        binary: &std::path::Path,
        max_frame_bytes: usize,
        subscription_queue_depth: usize,
    ) -> Result<Self, AdapterError> {
        let mut command = Command::new(binary);
        command
            .arg("app-server")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut backoff = Duration::from_millis(2);
        let mut child = None;
        for attempt in 0..5 {
            match command.spawn() {
                Ok(spawned) => {
                    child = Some(spawned);
                    break;
                }
                Err(source) => {
                    let is_busy = matches!(source.kind(), std::io::ErrorKind::ExecutableFileBusy)
                        || source.raw_os_error() == Some(26);
                    if is_busy && attempt < 4 {
                        tokio::time::sleep(backoff).await;
                        backoff = std::cmp::min(backoff * 2, Duration::from_millis(50));
                        continue;
                    }
                    return Err(AdapterError::Spawn {
                        binary: binary.display().to_string(),
                        source,
                    });
                }
            }
        }
        let mut child = child.expect("spawn loop returns or sets child");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AdapterError::Transport("child stdout unavailable".into()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AdapterError::Transport("child stdin unavailable".into()))?;
        let stderr = child.stderr.take();

        let pending = PendingCalls::new();
        let subscriptions = SubscriptionRegistry::new(subscription_queue_depth);
        let (writer_tx, writer_rx) = mpsc::unbounded_channel::<Value>();
        let (done_tx, done_rx) = watch::channel(false);

        let writer_handle = tokio::spawn(writer_task(FrameWriter::new(stdin), writer_rx));
        let reader_handle = tokio::spawn(reader_task(
            FrameReader::new(stdout, max_frame_bytes),
            pending.clone(),
            subscriptions.clone(),
            done_tx,
        ));

        let mut tasks = vec![writer_handle, reader_handle];
        if let Some(stderr) = stderr {
            tasks.push(tokio::spawn(stderr_task(stderr)));
        }

        Ok(Self {
            writer_tx,
            pending,
            subscriptions,
            done_rx,
            child: Mutex::new(Some(child)),
            tasks,
        })
    }

    pub fn pending(&self) -> &Arc<PendingCalls> {
        &self.pending
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionRegistry> {
        &self.subscriptions
    }

    /// A one-shot-style signal, broadcast via `watch`, that fires when the
    /// reader loop observes EOF or an unrecoverable decode failure
    /// (spec.md §4.B "done").
    pub fn done_signal(&self) -> watch::Receiver<bool> {
        self.done_rx.clone()
    }

    pub fn is_done(&self) -> bool {
        *self.done_rx.borrow()
    }

    /// Serialized write to the child's stdin. Concurrent callers never
    /// interleave bytes because only the dedicated writer task ever touches
    /// `ChildStdin` (spec.md §4.B "write(message)").
    pub fn write(&self, message: Value) -> Result<(), AdapterError> {
        self.writer_tx
            .send(message)
            .map_err(|_| AdapterError::Transport("codex app-server writer channel closed".into()))
    }

    /// Issue a request and await its matched response, classifying a
    /// JSON-RPC error result as [`AdapterError::Protocol`]. Used for the
    /// handshake and thread-creation calls, which have no streaming event
    /// component (unlike `turn/start`, driven directly by
    /// [`crate::turn::run_turn`] so it can interleave event draining).
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        let (id, rx) = self.pending.register().await;
        let message = serde_json::json!({"id": id, "method": method, "params": params});
        if let Err(err) = self.write(message) {
            self.pending.forget(id).await;
            return Err(err);
        }
        match rx.await {
            Ok(Ok(ResponsePayload::Ok(value))) => Ok(value),
            Ok(Ok(ResponsePayload::Err { code, message })) => Err(AdapterError::Protocol(format!(
                "codex app-server returned error {code}: {message}"
            ))),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(AdapterError::ChannelClosed),
        }
    }

    /// Close stdin, signal termination, reap the child (spec.md §4.B
    /// "kill()").
    pub async fn kill(&self) {
        for handle in &self.tasks {
            handle.abort();
        }
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.start_kill();
        }
    }
}

async fn writer_task(mut writer: FrameWriter, mut rx: mpsc::UnboundedReceiver<Value>) {
    while let Some(message) = rx.recv().await {
        if let Err(err) = writer.send(&message).await {
            warn!(error = %err, "codex app-server writer task exiting after write failure");
            break;
        }
    }
}

async fn reader_task(
    mut reader: FrameReader,
    pending: Arc<PendingCalls>,
    subscriptions: Arc<SubscriptionRegistry>,
    done_tx: watch::Sender<bool>,
) {
    loop {
        match reader.next_message().await {
            Ok(Some(value)) => router::dispatch(value, &pending, &subscriptions).await,
            Ok(None) => {
                debug!("codex app-server stdout reached EOF");
                break;
            }
            Err(err) => {
                warn!(error = %err, "codex app-server reader task observed an unrecoverable error");
                break;
            }
        }
    }

    let _ = done_tx.send(true);
    pending
        .fail_all(|| AdapterError::Transport("codex app-server subprocess exited".into()))
        .await;
}

async fn stderr_task(stderr: tokio::process::ChildStderr) {
    use tokio::io::{AsyncBufReadExt, BufReader};
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(line, "codex app-server stderr");
    }
}
