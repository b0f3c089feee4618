//! One guest instance: the capability handshake and the message router that
//! dispatches every envelope crossing the isolation boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tracing::{debug, trace, warn};
use url::Url;

use crate::channel::{GuestChannel, SourceId};
use crate::correlate::CorrelatedRequests;
use crate::host::{LayoutSink, LinkOpener, ToolBackend};
use crate::policy::{PermissionGrant, PolicyGrant};
use crate::protocol::{
    Envelope, EnvelopeId, EnvelopeKind, HostInfo, InitializeResult, Method, OpenLinkParams,
    RpcError, SandboxEcho, SizeChangedParams, UiCapabilities, METHOD_TOOL_INPUT,
    METHOD_TOOL_RESULT, PROTOCOL_VERSION,
};
use crate::relay::EventRelay;
use crate::scroll::{should_bubble, WheelSample};

/// Handshake progress for one guest instance. Capabilities are negotiated
/// once; there is no renegotiation path — escalation means a new instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Uninitialized,
    Negotiated,
    Active,
}

/// Everything a new session needs up front. The policy and permission
/// grants are the ones already applied to the guest document; they are
/// immutable for the life of the instance.
pub struct SessionConfig {
    pub guest: SourceId,
    pub host_info: HostInfo,
    pub policy: PolicyGrant,
    pub permissions: PermissionGrant,
    /// Provider the triggering tool belongs to; forwarded calls go there.
    pub server_id: String,
    /// The triggering tool's input arguments, pushed right after handshake.
    pub tool_input: Value,
    /// The tool's result, when it is already known at instantiation time.
    pub tool_result: Option<Value>,
}

pub struct BridgeSession {
    channel: Arc<dyn GuestChannel>,
    tools: Arc<dyn ToolBackend>,
    links: Arc<dyn LinkOpener>,
    layout: Arc<dyn LayoutSink>,
    relay: Arc<EventRelay>,
    requests: Arc<CorrelatedRequests>,
    guest: SourceId,
    host_info: HostInfo,
    policy: PolicyGrant,
    permissions: PermissionGrant,
    server_id: String,
    tool_input: Value,
    tool_result: Mutex<Option<Value>>,
    state: Mutex<HandshakeState>,
    detached: AtomicBool,
}

impl BridgeSession {
    pub fn new(
        config: SessionConfig,
        channel: Arc<dyn GuestChannel>,
        tools: Arc<dyn ToolBackend>,
        links: Arc<dyn LinkOpener>,
        layout: Arc<dyn LayoutSink>,
    ) -> Arc<Self> {
        let relay = Arc::new(EventRelay::new());
        let requests = Arc::new(CorrelatedRequests::new(Arc::clone(&relay)));
        Arc::new(Self {
            channel,
            tools,
            links,
            layout,
            relay,
            requests,
            guest: config.guest,
            host_info: config.host_info,
            policy: config.policy,
            permissions: config.permissions,
            server_id: config.server_id,
            tool_input: config.tool_input,
            tool_result: Mutex::new(config.tool_result),
            state: Mutex::new(HandshakeState::Uninitialized),
            detached: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> HandshakeState {
        *self.state.lock().unwrap()
    }

    /// The instance's internal relay; the host wires its conversation
    /// pipeline to the `ui/message` topics here.
    pub fn relay(&self) -> &Arc<EventRelay> {
        &self.relay
    }

    pub fn requests(&self) -> &Arc<CorrelatedRequests> {
        &self.requests
    }

    /// Record a tool result that arrived after instantiation and, once the
    /// guest has negotiated, push it down as a notification.
    pub fn publish_tool_result(&self, result: Value) {
        *self.tool_result.lock().unwrap() = Some(result.clone());
        if self.state() != HandshakeState::Uninitialized {
            self.send(&Envelope::notification(METHOD_TOOL_RESULT, Some(result)));
        }
    }

    /// Instance teardown: in-flight relayed requests settle immediately with
    /// the degraded result, their timers are cancelled, and the inbound path
    /// is detached. Other instances are unaffected.
    pub fn teardown(&self) {
        self.detached.store(true, Ordering::SeqCst);
        self.requests.abort_all();
        debug!(state = ?self.state(), "bridge session torn down");
    }

    /// Inbound path. Envelopes are dispatched in arrival order, but async
    /// handlers are spawned so a slow call never blocks a later envelope;
    /// responses pair with requests by id, not by completion order.
    pub fn accept(self: &Arc<Self>, source: &SourceId, raw: Value) {
        if self.detached.load(Ordering::SeqCst) {
            trace!("dropping message for torn-down session");
            return;
        }
        if source != &self.guest {
            trace!("ignoring message from unpaired source");
            return;
        }

        let envelope: Envelope = match serde_json::from_value(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                debug!(error = %err, "dropping undecodable envelope");
                return;
            }
        };

        match envelope.kind() {
            EnvelopeKind::Request => self.dispatch_request(envelope),
            EnvelopeKind::Notification => self.dispatch_notification(envelope),
            EnvelopeKind::Response => {
                // The host never sends the guest a request, so inbound
                // responses have nothing to pair with.
                debug!("dropping unexpected response envelope");
            }
            EnvelopeKind::Malformed => {
                // Not a protocol error: there is no reliable id to answer.
                debug!("dropping malformed envelope");
            }
        }
    }

    fn dispatch_request(self: &Arc<Self>, envelope: Envelope) {
        let method = envelope.method.clone().unwrap_or_default();
        let id = match envelope.id.clone() {
            Some(id) => id,
            None => return,
        };

        match Method::parse(&method) {
            Some(Method::Initialize) => self.handle_initialize(id),
            Some(Method::OpenLink) => self.handle_open_link(id, envelope.params),
            Some(Method::ToolsCall) | Some(Method::ResourcesRead) | Some(Method::Ping) => {
                let session = Arc::clone(self);
                tokio::spawn(async move { session.forward_to_backend(id, envelope).await });
            }
            Some(Method::Message) => {
                let session = Arc::clone(self);
                tokio::spawn(async move { session.handle_message_relay(id, envelope.params).await });
            }
            Some(Method::Initialized) | Some(Method::SizeChanged) | Some(Method::SandboxWheel) => {
                self.send(&Envelope::failure(
                    id,
                    RpcError::invalid_request(format!("{method} is notification-only")),
                ));
            }
            None => {
                self.send(&Envelope::failure(id, RpcError::method_not_found(&method)));
            }
        }
    }

    fn dispatch_notification(&self, envelope: Envelope) {
        let method = envelope.method.clone().unwrap_or_default();
        match Method::parse(&method) {
            Some(Method::Initialized) => {
                let mut state = self.state.lock().unwrap();
                if *state == HandshakeState::Negotiated {
                    *state = HandshakeState::Active;
                    debug!("guest instance active");
                } else {
                    debug!(state = ?*state, "ignoring initialized notification");
                }
            }
            Some(Method::SizeChanged) => self.handle_size_changed(envelope.params),
            Some(Method::SandboxWheel) => self.handle_sandbox_wheel(envelope.params),
            Some(_) => debug!(method, "dropping request-only method sent as notification"),
            None => debug!(method, "dropping unknown notification"),
        }
    }

    /// The single handshake. Responds with the protocol version, host
    /// identity, and capabilities (including the sandbox echo of the applied
    /// grants), then pushes the triggering tool's input — and result, if one
    /// exists yet — so the guest can render without another round trip.
    ///
    /// A repeated handshake is rejected outright rather than re-answered:
    /// grants are immutable per instance, so a guest probing for changed
    /// capabilities mid-life is out of contract.
    fn handle_initialize(&self, id: EnvelopeId) {
        {
            let mut state = self.state.lock().unwrap();
            if *state != HandshakeState::Uninitialized {
                drop(state);
                warn!("rejecting repeated ui/initialize");
                self.send(&Envelope::failure(
                    id,
                    RpcError::invalid_request("already initialized"),
                ));
                return;
            }
            *state = HandshakeState::Negotiated;
        }

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            host_info: self.host_info.clone(),
            capabilities: UiCapabilities {
                open_links: true,
                tools: true,
                resources: true,
                logging: true,
                model_context: true,
                message_relay: true,
                sandbox: SandboxEcho {
                    csp: self.policy.clone(),
                    permissions: self.permissions,
                },
            },
        };
        match serde_json::to_value(&result) {
            Ok(value) => self.send(&Envelope::success(id, value)),
            Err(err) => {
                self.send(&Envelope::failure(id, RpcError::handler_error(err.to_string())))
            }
        }

        self.send(&Envelope::notification(
            METHOD_TOOL_INPUT,
            Some(self.tool_input.clone()),
        ));
        if let Some(result) = self.tool_result.lock().unwrap().clone() {
            self.send(&Envelope::notification(METHOD_TOOL_RESULT, Some(result)));
        }
    }

    /// Pass-through calls: forwarded verbatim, the backend's response echoed
    /// back unmodified apart from carrying the original request id.
    async fn forward_to_backend(&self, id: EnvelopeId, envelope: Envelope) {
        match self.tools.forward(&self.server_id, envelope).await {
            Ok(mut response) => {
                response.id = Some(id);
                self.send(&response);
            }
            Err(err) => {
                self.send(&Envelope::failure(id, RpcError::handler_error(err.to_string())));
            }
        }
    }

    fn handle_open_link(&self, id: EnvelopeId, params: Option<Value>) {
        let params: OpenLinkParams = match params.map(serde_json::from_value).transpose() {
            Ok(Some(params)) => params,
            _ => {
                self.send(&Envelope::failure(
                    id,
                    RpcError::invalid_params("expected params with a url string"),
                ));
                return;
            }
        };
        let url = match Url::parse(&params.url) {
            Ok(url) => url,
            Err(err) => {
                self.send(&Envelope::failure(
                    id,
                    RpcError::invalid_params(format!("invalid url: {err}")),
                ));
                return;
            }
        };
        match self.links.open_external(&url) {
            Ok(()) => self.send(&Envelope::success(id, json!({}))),
            Err(err) => {
                self.send(&Envelope::failure(id, RpcError::handler_error(err.to_string())))
            }
        }
    }

    /// Guest-authored message routed into the host's conversation pipeline.
    /// The outcome — the pipeline's disposition, or the degraded
    /// `{"isError": true}` on timeout — is a successful result either way.
    async fn handle_message_relay(&self, id: EnvelopeId, params: Option<Value>) {
        let Some(payload) = params else {
            self.send(&Envelope::failure(
                id,
                RpcError::invalid_params("ui/message requires params"),
            ));
            return;
        };
        let outcome = self.requests.relay(payload).await;
        self.send(&Envelope::success(id, outcome));
    }

    fn handle_size_changed(&self, params: Option<Value>) {
        match params.map(serde_json::from_value::<SizeChangedParams>).transpose() {
            Ok(Some(params)) if params.height.is_finite() && params.height >= 0.0 => {
                self.layout.notify_height(params.height);
            }
            _ => debug!("dropping size-changed notification with bad params"),
        }
    }

    fn handle_sandbox_wheel(&self, params: Option<Value>) {
        let sample: WheelSample = match params.map(serde_json::from_value).transpose() {
            Ok(Some(sample)) => sample,
            _ => {
                debug!("dropping sandbox-wheel notification with bad params");
                return;
            }
        };
        if should_bubble(&sample) {
            self.layout.bubble_wheel(sample.delta_x, sample.delta_y);
        }
    }

    fn send(&self, envelope: &Envelope) {
        if let Err(err) = self.channel.send(envelope) {
            warn!(error = %err, "failed to send envelope to guest");
        }
    }
}
