//! Bounded per-thread subscription queues (spec.md §3 "Thread subscription",
//! §5 "Backpressure"): drop-oldest-on-overflow, never blocks the router.
//!
//! `tokio::sync::mpsc::channel` cannot express this — a full bounded mpsc
//! channel blocks the sender, and the router must never block on a slow
//! subscriber (spec.md §4.C: "enqueue M non-blockingly"). A
//! `Mutex<VecDeque<T>>` paired with `Notify` gives non-blocking push with an
//! explicit overflow policy and a cancel-safe async `recv`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tracing::warn;

use crate::protocol::Message;

/// A single thread's bounded event queue.
pub struct Subscription {
    thread_id: String,
    capacity: usize,
    queue: Mutex<VecDeque<Message>>,
    notify: Notify,
}

impl Subscription {
    fn new(thread_id: String, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            thread_id,
            capacity,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        })
    }

    /// Push a message, dropping the oldest undelivered one on overflow.
    /// Never blocks.
    pub fn push(&self, message: Message) {
        let dropped_count = {
            let mut queue = self.queue.lock().expect("subscription queue poisoned");
            let mut dropped = 0u64;
            while queue.len() >= self.capacity {
                queue.pop_front();
                dropped += 1;
            }
            queue.push_back(message);
            dropped
        };
        if dropped_count > 0 {
            warn!(thread_id = %self.thread_id, dropped_count, "subscription queue overflow; dropped oldest undelivered item");
        }
        self.notify.notify_one();
    }

    /// Wait for and remove the next message, FIFO. Cancel-safe: repeated
    /// calls cancelled mid-await lose nothing, since the queue itself (not
    /// the future) is where state lives.
    pub async fn recv(&self) -> Message {
        loop {
            if let Some(msg) = self.queue.lock().expect("subscription queue poisoned").pop_front() {
                return msg;
            }
            self.notify.notified().await;
        }
    }
}

/// Registry of live per-thread subscriptions, keyed by thread id. Guarded by
/// its own mutex, held only for registration/lookup (spec.md §5).
pub struct SubscriptionRegistry {
    capacity: usize,
    subscriptions: Mutex<HashMap<String, Arc<Subscription>>>,
}

impl SubscriptionRegistry {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            subscriptions: Mutex::new(HashMap::new()),
        })
    }

    /// Register a new subscription for a thread, bound to the lifetime of
    /// the `Do` call that created it (spec.md "Lifecycle summary").
    pub fn subscribe(&self, thread_id: impl Into<String>) -> Arc<Subscription> {
        let thread_id = thread_id.into();
        let sub = Subscription::new(thread_id.clone(), self.capacity);
        self.subscriptions
            .lock()
            .expect("subscription registry poisoned")
            .insert(thread_id, sub.clone());
        sub
    }

    /// Tear down a subscription when its owning `Do` call exits.
    pub fn unsubscribe(&self, thread_id: &str) {
        self.subscriptions
            .lock()
            .expect("subscription registry poisoned")
            .remove(thread_id);
    }

    /// Route a message to its thread's subscription (spec.md §4.C steps 2-3).
    /// Logs and drops if there is no live subscriber.
    pub fn route(&self, thread_id: &str, message: Message) {
        if thread_id.is_empty() {
            warn!("dropping message with no resolvable thread id");
            return;
        }
        let sub = self
            .subscriptions
            .lock()
            .expect("subscription registry poisoned")
            .get(thread_id)
            .cloned();
        match sub {
            Some(sub) => sub.push(message),
            None => warn!(thread_id, "no subscriber for thread; dropping message"),
        }
    }
}
