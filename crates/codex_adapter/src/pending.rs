//! Pending-call registry (spec.md §4.D): correlates outbound request ids
//! with callers awaiting responses.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};

use crate::error::AdapterError;
use crate::protocol::{RequestId, ResponsePayload};

type Slot = oneshot::Sender<Result<ResponsePayload, AdapterError>>;

/// O(1) insert/remove/lookup under a single mutex, held only for the
/// duration of the HashMap operation — never across I/O (spec.md §5).
pub struct PendingCalls {
    next_id: AtomicU64,
    table: Mutex<HashMap<String, Slot>>,
}

impl PendingCalls {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            table: Mutex::new(HashMap::new()),
        })
    }

    /// Allocate a fresh request id and register a slot for its response.
    pub async fn register(&self) -> (RequestId, oneshot::Receiver<Result<ResponsePayload, AdapterError>>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.table.lock().await.insert(id.to_string(), tx);
        (id, rx)
    }

    /// Deliver a response to its matching pending call, if still registered.
    /// Called from the router (spec.md §4.C step 1); idempotent no-op if the
    /// id is unknown (e.g. the call already timed out/was cancelled).
    pub async fn deliver(&self, id: &str, payload: Result<ResponsePayload, AdapterError>) -> bool {
        let slot = self.table.lock().await.remove(id);
        match slot {
            Some(tx) => {
                let _ = tx.send(payload);
                true
            }
            None => false,
        }
    }

    /// Deregister without delivering — used on cancellation/timeout paths so
    /// a response that later arrives for this id is treated as unmatched
    /// rather than misdelivered (spec.md §4.D: deregistration on every exit
    /// path).
    pub async fn forget(&self, id: RequestId) {
        self.table.lock().await.remove(&id.to_string());
    }

    /// Fail every outstanding pending call. Invoked once the supervisor's
    /// `done` signal fires, so no caller blocks forever (spec.md I4).
    pub async fn fail_all(&self, make_error: impl Fn() -> AdapterError) {
        let mut table = self.table.lock().await;
        for (_, tx) in table.drain() {
            let _ = tx.send(Err(make_error()));
        }
    }
}
