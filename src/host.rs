//! Traits for the host subsystems the bridge collaborates with. The bridge
//! never talks to backend services or the windowing layer directly.

use futures_util::future::BoxFuture;
use thiserror::Error;
use url::Url;

use crate::protocol::Envelope;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("tool backend unavailable: {0}")]
    Unavailable(String),
    #[error("tool call failed: {0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("link refused: {0}")]
    Refused(String),
    #[error("could not open link: {0}")]
    Failed(String),
}

/// Tool-execution service. Requests from the guest (`tools/call`,
/// `resources/read`, `ping`) are forwarded verbatim and the response is
/// echoed back unmodified.
pub trait ToolBackend: Send + Sync {
    fn forward(
        &self,
        server_id: &str,
        envelope: Envelope,
    ) -> BoxFuture<'static, Result<Envelope, BackendError>>;
}

/// Opens validated external links in the surrounding environment.
pub trait LinkOpener: Send + Sync {
    fn open_external(&self, url: &Url) -> Result<(), LinkError>;
}

/// Layout hooks on the hosting container: guest-driven height updates and
/// re-emitted wheel events that crossed the scroll boundary.
pub trait LayoutSink: Send + Sync {
    fn notify_height(&self, px: f64);
    fn bubble_wheel(&self, delta_x: f64, delta_y: f64);
}
