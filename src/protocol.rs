//! JSON-RPC envelope and method definitions for the host↔guest bridge.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::policy::{PermissionGrant, PolicyGrant};

pub const JSONRPC_VERSION: &str = "2.0";

/// Bridge protocol version returned by the handshake. Exact, not a range.
pub const PROTOCOL_VERSION: &str = "2026-01-26";

/// Request/response correlation id. The wire allows numbers or strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvelopeId {
    Number(i64),
    Text(String),
}

impl From<i64> for EnvelopeId {
    fn from(value: i64) -> Self {
        EnvelopeId::Number(value)
    }
}

impl From<i32> for EnvelopeId {
    fn from(value: i32) -> Self {
        EnvelopeId::Number(value.into())
    }
}

impl From<&str> for EnvelopeId {
    fn from(value: &str) -> Self {
        EnvelopeId::Text(value.to_string())
    }
}

/// JSON-RPC error object. Messages crossing the boundary are plain strings;
/// no stack traces or host internals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl RpcError {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    pub const HANDLER_ERROR: i32 = -32000;

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: Self::INVALID_REQUEST,
            message: message.into(),
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: Self::METHOD_NOT_FOUND,
            message: format!("Method not found: {method}"),
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: Self::INVALID_PARAMS,
            message: message.into(),
        }
    }

    pub fn handler_error(message: impl Into<String>) -> Self {
        Self {
            code: Self::HANDLER_ERROR,
            message: message.into(),
        }
    }
}

/// One JSON-RPC message: request, notification, or response, depending on
/// which fields are present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<EnvelopeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnvelopeKind {
    Request,
    Notification,
    Response,
    Malformed,
}

impl Envelope {
    pub fn request(id: impl Into<EnvelopeId>, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id.into()),
            method: Some(method.to_string()),
            params,
            result: None,
            error: None,
        }
    }

    pub fn notification(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: Some(method.to_string()),
            params,
            result: None,
            error: None,
        }
    }

    pub fn success(id: EnvelopeId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: None,
            params: None,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: EnvelopeId, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: None,
            params: None,
            result: None,
            error: Some(error),
        }
    }

    /// Classify per JSON-RPC: a method with an id is a request, a method
    /// without one is a notification, a result/error without a method is a
    /// response. Anything else (including a bad `jsonrpc` tag) is malformed
    /// and gets dropped upstream.
    pub fn kind(&self) -> EnvelopeKind {
        if self.jsonrpc != JSONRPC_VERSION {
            return EnvelopeKind::Malformed;
        }
        match (&self.method, &self.id) {
            (Some(method), _) if method.is_empty() => EnvelopeKind::Malformed,
            (Some(_), Some(_)) => EnvelopeKind::Request,
            (Some(_), None) => EnvelopeKind::Notification,
            (None, Some(_)) if self.result.is_some() || self.error.is_some() => {
                EnvelopeKind::Response
            }
            _ => EnvelopeKind::Malformed,
        }
    }
}

/// Methods the router dispatches. Unknown strings fall through to the
/// `-32601` path uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Initialize,
    Initialized,
    SizeChanged,
    SandboxWheel,
    ToolsCall,
    ResourcesRead,
    Ping,
    OpenLink,
    Message,
}

pub const METHOD_INITIALIZE: &str = "ui/initialize";
pub const METHOD_INITIALIZED: &str = "ui/notifications/initialized";
pub const METHOD_SIZE_CHANGED: &str = "ui/notifications/size-changed";
pub const METHOD_SANDBOX_WHEEL: &str = "ui/notifications/sandbox-wheel";
pub const METHOD_TOOL_INPUT: &str = "ui/notifications/tool-input";
pub const METHOD_TOOL_RESULT: &str = "ui/notifications/tool-result";
pub const METHOD_TOOLS_CALL: &str = "tools/call";
pub const METHOD_RESOURCES_READ: &str = "resources/read";
pub const METHOD_PING: &str = "ping";
pub const METHOD_OPEN_LINK: &str = "ui/open-link";
pub const METHOD_MESSAGE: &str = "ui/message";

impl Method {
    pub fn parse(method: &str) -> Option<Self> {
        match method {
            METHOD_INITIALIZE => Some(Method::Initialize),
            METHOD_INITIALIZED => Some(Method::Initialized),
            METHOD_SIZE_CHANGED => Some(Method::SizeChanged),
            METHOD_SANDBOX_WHEEL => Some(Method::SandboxWheel),
            METHOD_TOOLS_CALL => Some(Method::ToolsCall),
            METHOD_RESOURCES_READ => Some(Method::ResourcesRead),
            METHOD_PING => Some(Method::Ping),
            METHOD_OPEN_LINK => Some(Method::OpenLink),
            METHOD_MESSAGE => Some(Method::Message),
            _ => None,
        }
    }
}

/// Host identity reported during the handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostInfo {
    pub name: String,
    pub version: String,
}

/// Echo of the security policy and permissions applied to this instance, so
/// guest code can introspect what it was granted without a second round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxEcho {
    pub csp: PolicyGrant,
    pub permissions: PermissionGrant,
}

/// Capabilities negotiated once per guest instance; never renegotiated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiCapabilities {
    pub open_links: bool,
    pub tools: bool,
    pub resources: bool,
    pub logging: bool,
    pub model_context: bool,
    pub message_relay: bool,
    pub sandbox: SandboxEcho,
}

/// Result of `ui/initialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub host_info: HostInfo,
    pub capabilities: UiCapabilities,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeChangedParams {
    pub height: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenLinkParams {
    pub url: String,
}
