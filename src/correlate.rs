//! Correlated request tracking for guest calls whose answer is computed
//! elsewhere in the host: race the answer against a fixed timeout, resolve
//! exactly once, deregister unconditionally.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::sync::oneshot;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::relay::EventRelay;

/// Fixed window after which an unanswered relayed request degrades to a
/// "could not confirm" result instead of blocking indefinitely.
pub const RELAY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Topic on which relayed request payloads are published to the host.
pub const TOPIC_MESSAGE_REQUEST: &str = "ui/message/request";

fn response_topic(correlation_id: &str) -> String {
    format!("ui/message/response/{correlation_id}")
}

struct PendingRequest {
    created_at: Instant,
    abort_tx: oneshot::Sender<()>,
}

/// Per-instance manager. Owns the pending map; the map never retains an
/// entry after its call resolves, whichever path fired.
pub struct CorrelatedRequests {
    relay: Arc<EventRelay>,
    pending: Mutex<HashMap<String, PendingRequest>>,
    aborted: AtomicBool,
}

impl CorrelatedRequests {
    pub fn new(relay: Arc<EventRelay>) -> Self {
        Self {
            relay,
            pending: Mutex::new(HashMap::new()),
            aborted: AtomicBool::new(false),
        }
    }

    /// Publish `payload` to the host with a fresh correlation id and await
    /// the answer. Resolves with the host's value, or with the degraded
    /// `{"isError": true}` result on timeout or teardown. From the guest's
    /// point of view this call always succeeds.
    pub async fn relay(&self, payload: Value) -> Value {
        if self.aborted.load(Ordering::SeqCst) {
            return degraded_result();
        }

        let correlation_id = Uuid::new_v4().to_string();
        let topic = response_topic(&correlation_id);

        let (subscription, response_rx) = self.relay.once(&topic);
        let (abort_tx, abort_rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(
            correlation_id.clone(),
            PendingRequest {
                created_at: Instant::now(),
                abort_tx,
            },
        );

        // A teardown can race the insert above. Re-checking once the entry
        // exists guarantees either this check or the teardown drain sees it,
        // so no timer ever outlives the instance.
        if self.aborted.load(Ordering::SeqCst) {
            self.pending.lock().unwrap().remove(&correlation_id);
            self.relay.off(&topic, subscription);
            return degraded_result();
        }

        self.relay.emit(
            TOPIC_MESSAGE_REQUEST,
            &json!({ "correlationId": correlation_id, "payload": payload }),
        );

        let outcome = tokio::select! {
            response = response_rx => response.ok(),
            _ = sleep(RELAY_TIMEOUT) => {
                warn!(%correlation_id, "relayed request timed out");
                None
            }
            _ = abort_rx => {
                debug!(%correlation_id, "relayed request aborted by teardown");
                None
            }
        };

        // Unconditional cleanup: whichever path lost the race must become a
        // no-op, never a double resolution or a dangling listener.
        if let Some(entry) = self.pending.lock().unwrap().remove(&correlation_id) {
            debug!(
                %correlation_id,
                elapsed_ms = entry.created_at.elapsed().as_millis() as u64,
                answered = outcome.is_some(),
                "relayed request settled"
            );
        }
        self.relay.off(&topic, subscription);

        outcome.unwrap_or_else(degraded_result)
    }

    /// Feed a host-computed answer back to its waiting call. Returns false
    /// when the id is unknown (already resolved, timed out, or never ours).
    pub fn resolve(&self, correlation_id: &str, value: Value) -> bool {
        if !self.pending.lock().unwrap().contains_key(correlation_id) {
            return false;
        }
        self.relay.emit(&response_topic(correlation_id), &value);
        true
    }

    /// Instance teardown: settle every in-flight call immediately with the
    /// degraded result. Terminal — later calls settle degraded up front, so
    /// no timer stays scheduled past this point.
    pub fn abort_all(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        let drained: Vec<(String, PendingRequest)> =
            self.pending.lock().unwrap().drain().collect();
        for (correlation_id, entry) in drained {
            debug!(%correlation_id, "aborting in-flight relayed request");
            let _ = entry.abort_tx.send(());
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

fn degraded_result() -> Value {
    json!({ "isError": true })
}
