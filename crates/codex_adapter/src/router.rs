//! Message router (spec.md §4.C): the reader task's dispatch logic. Not a
//! task itself — [`crate::supervisor::Supervisor`] owns the task that calls
//! [`dispatch`] in a loop; keeping dispatch as a free function makes the
//! routing rules unit-testable without spawning a subprocess.

use serde_json::Value;
use tracing::warn;

use crate::pending::PendingCalls;
use crate::protocol::{self, Message, ResponsePayload};
use crate::subscription::SubscriptionRegistry;

/// Classify and route one decoded JSON line per spec.md §4.C.
pub async fn dispatch(value: Value, pending: &PendingCalls, subscriptions: &SubscriptionRegistry) {
    let Some(message) = protocol::decode_message(value) else {
        warn!("received malformed app-server message");
        return;
    };

    match message {
        Message::Response { id, payload } => {
            let delivered = pending.deliver(&id, Ok(payload)).await;
            if !delivered {
                warn!(id, "received response for unknown or already-resolved request id");
            }
        }
        Message::Notification { method, params } => {
            let thread_id = protocol::extract_thread_id(&params).unwrap_or_default();
            subscriptions.route(&thread_id, Message::Notification { method, params });
        }
        Message::ServerRequest { id, method, params } => {
            let thread_id = protocol::extract_thread_id(&params).unwrap_or_default();
            subscriptions.route(&thread_id, Message::ServerRequest { id, method, params });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn response_is_delivered_to_pending_not_subscription() {
        let pending = PendingCalls::new();
        let subscriptions = SubscriptionRegistry::new(8);
        let (id, rx) = pending.register().await;

        dispatch(json!({"id": id, "result": {"ok": true}}), &pending, &subscriptions).await;

        let payload = rx.await.unwrap().unwrap();
        assert!(matches!(payload, ResponsePayload::Ok(_)));
    }

    #[tokio::test]
    async fn notification_with_thread_id_reaches_subscriber() {
        let pending = PendingCalls::new();
        let subscriptions = SubscriptionRegistry::new(8);
        let sub = subscriptions.subscribe("thread-1");

        dispatch(
            json!({"method": "item/completed", "params": {"threadId": "thread-1"}}),
            &pending,
            &subscriptions,
        )
        .await;

        let msg = sub.recv().await;
        assert!(matches!(msg, Message::Notification { .. }));
    }

    #[tokio::test]
    async fn notification_with_no_subscriber_is_dropped_without_panic() {
        let pending = PendingCalls::new();
        let subscriptions = SubscriptionRegistry::new(8);
        dispatch(
            json!({"method": "item/completed", "params": {"threadId": "nobody-listens"}}),
            &pending,
            &subscriptions,
        )
        .await;
    }

    #[tokio::test]
    async fn malformed_message_does_not_panic() {
        let pending = PendingCalls::new();
        let subscriptions = SubscriptionRegistry::new(8);
        dispatch(json!({"nonsense": true}), &pending, &subscriptions).await;
    }
}
