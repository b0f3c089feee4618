//! Topic-keyed publish/subscribe relay used between the bridge and the rest
//! of the host (conversation pipeline, layout, logging sinks).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::oneshot;

type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Synchronous fan-out relay. Handlers run in registration order on the
/// emitting thread; they are infallible by construction.
#[derive(Default)]
pub struct EventRelay {
    handlers: Mutex<HashMap<String, Vec<(SubscriptionId, Handler)>>>,
}

impl EventRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// The handler list is snapshotted before invocation, so a handler may
    /// itself emit or (de)register without deadlocking.
    pub fn emit(&self, topic: &str, payload: &Value) {
        let snapshot: Vec<Handler> = {
            let handlers = self.handlers.lock().unwrap();
            match handlers.get(topic) {
                Some(entries) => entries.iter().map(|(_, handler)| Arc::clone(handler)).collect(),
                None => return,
            }
        };
        for handler in snapshot {
            handler(payload);
        }
    }

    pub fn on(&self, topic: &str, handler: impl Fn(&Value) + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .lock()
            .unwrap()
            .entry(topic.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    pub fn off(&self, topic: &str, id: SubscriptionId) {
        let mut handlers = self.handlers.lock().unwrap();
        if let Some(entries) = handlers.get_mut(topic) {
            entries.retain(|(entry_id, _)| *entry_id != id);
            if entries.is_empty() {
                handlers.remove(topic);
            }
        }
    }

    /// One-shot subscription: the first emission on the topic resolves the
    /// receiver. The subscription still counts until `off` is called, so
    /// callers deregister unconditionally after their race settles.
    pub fn once(&self, topic: &str) -> (SubscriptionId, oneshot::Receiver<Value>) {
        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));
        let id = self.on(topic, move |payload| {
            if let Some(tx) = slot.lock().unwrap().take() {
                let _ = tx.send(payload.clone());
            }
        });
        (id, rx)
    }

    /// Total registered handlers across all topics. Observable so leak tests
    /// can assert the count returns to its pre-call baseline.
    pub fn listener_count(&self) -> usize {
        self.handlers
            .lock()
            .unwrap()
            .values()
            .map(|entries| entries.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn emits_to_registered_handlers_in_order() {
        let relay = EventRelay::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&seen);
        relay.on("topic", move |_| first.lock().unwrap().push(1));
        let second = Arc::clone(&seen);
        relay.on("topic", move |_| second.lock().unwrap().push(2));

        relay.emit("topic", &json!({}));
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn off_removes_only_the_target_subscription() {
        let relay = EventRelay::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counted = Arc::clone(&hits);
        let keep = relay.on("topic", move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        });
        let drop_me = relay.on("topic", |_| panic!("removed handler ran"));
        relay.off("topic", drop_me);

        relay.emit("topic", &json!({}));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        relay.off("topic", keep);
        assert_eq!(relay.listener_count(), 0);
    }

    #[tokio::test]
    async fn once_resolves_on_first_emission_only() {
        let relay = EventRelay::new();
        let (id, rx) = relay.once("answer");
        assert_eq!(relay.listener_count(), 1);

        relay.emit("answer", &json!({"n": 1}));
        relay.emit("answer", &json!({"n": 2}));

        let value = rx.await.unwrap();
        assert_eq!(value["n"], 1);

        relay.off("answer", id);
        assert_eq!(relay.listener_count(), 0);
    }
}
