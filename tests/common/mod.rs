//! Test doubles for the host collaborators a bridge session is wired to.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use serde_json::json;
use tokio::time::{sleep, Duration};
use url::Url;

use sandbridge::host::{BackendError, LayoutSink, LinkError, LinkOpener, ToolBackend};
use sandbridge::protocol::{Envelope, EnvelopeId, HostInfo};
use sandbridge::{
    BridgeSession, InMemoryChannel, PermissionGrant, PolicyGrant, SessionConfig, SourceId,
};

/// Echoes every forwarded call back as `{"echo": <method>}`, after a delay
/// that depends on the method so tests can force out-of-order completion.
pub struct EchoBackend {
    pub slow_call_delay: Duration,
}

impl Default for EchoBackend {
    fn default() -> Self {
        Self {
            slow_call_delay: Duration::ZERO,
        }
    }
}

impl ToolBackend for EchoBackend {
    fn forward(
        &self,
        _server_id: &str,
        envelope: Envelope,
    ) -> BoxFuture<'static, Result<Envelope, BackendError>> {
        let method = envelope.method.clone().unwrap_or_default();
        let delay = if method == "ping" {
            Duration::ZERO
        } else {
            self.slow_call_delay
        };
        Box::pin(async move {
            if delay > Duration::ZERO {
                sleep(delay).await;
            }
            Ok(Envelope::success(
                EnvelopeId::Number(0),
                json!({ "echo": method }),
            ))
        })
    }
}

#[derive(Default)]
pub struct RecordingOpener {
    pub opened: Mutex<Vec<String>>,
    pub fail: bool,
}

impl LinkOpener for RecordingOpener {
    fn open_external(&self, url: &Url) -> Result<(), LinkError> {
        if self.fail {
            return Err(LinkError::Refused("external links disabled".to_string()));
        }
        self.opened.lock().unwrap().push(url.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingLayout {
    pub heights: Mutex<Vec<f64>>,
    pub wheels: Mutex<Vec<(f64, f64)>>,
}

impl LayoutSink for RecordingLayout {
    fn notify_height(&self, px: f64) {
        self.heights.lock().unwrap().push(px);
    }

    fn bubble_wheel(&self, delta_x: f64, delta_y: f64) {
        self.wheels.lock().unwrap().push((delta_x, delta_y));
    }
}

pub struct Harness {
    pub session: Arc<BridgeSession>,
    pub channel: Arc<InMemoryChannel>,
    pub opener: Arc<RecordingOpener>,
    pub layout: Arc<RecordingLayout>,
    pub guest: SourceId,
}

/// Route bridge tracing through the test writer; `RUST_LOG` controls
/// verbosity. Safe to call from every test.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn harness() -> Harness {
    harness_with(EchoBackend::default(), RecordingOpener::default())
}

pub fn harness_with(backend: EchoBackend, opener: RecordingOpener) -> Harness {
    init_tracing();
    let channel = Arc::new(InMemoryChannel::new());
    let opener = Arc::new(opener);
    let layout = Arc::new(RecordingLayout::default());
    let guest = SourceId::new("guest-1");

    let session = BridgeSession::new(
        SessionConfig {
            guest: guest.clone(),
            host_info: HostInfo {
                name: "sandbridge-tests".to_string(),
                version: "0.1.0".to_string(),
            },
            policy: PolicyGrant {
                connect: vec!["https://api.example.com".to_string()],
                ..PolicyGrant::default()
            },
            permissions: PermissionGrant::default(),
            server_id: "server-1".to_string(),
            tool_input: json!({ "city": "Lisbon" }),
            tool_result: Some(json!({ "temperature": 19 })),
        },
        Arc::clone(&channel) as Arc<dyn sandbridge::GuestChannel>,
        Arc::new(backend),
        Arc::clone(&opener) as Arc<dyn LinkOpener>,
        Arc::clone(&layout) as Arc<dyn LayoutSink>,
    );

    Harness {
        session,
        channel,
        opener,
        layout,
        guest,
    }
}

/// Let spawned handler tasks run to completion on the current-thread
/// scheduler (auto-advancing the paused clock where needed).
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}
