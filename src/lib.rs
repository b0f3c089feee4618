//! Bridge between a trusted host application and sandboxed third-party UI.
//!
//! One guest instance hosts one resource of provider-supplied markup and
//! script. The crate owns everything protocol-shaped about that arrangement:
//! the deny-by-default policy compiled per resource, the preamble embedded in
//! the guest document, the JSON-RPC handshake and router, correlated relay
//! requests, and scroll continuity across the isolation boundary.

pub mod channel;
pub mod correlate;
pub mod host;
pub mod policy;
pub mod preamble;
pub mod protocol;
pub mod relay;
pub mod resource;
pub mod scroll;
pub mod session;

pub use channel::{GuestChannel, InMemoryChannel, SourceId};
pub use correlate::{CorrelatedRequests, RELAY_TIMEOUT, TOPIC_MESSAGE_REQUEST};
pub use policy::{PermissionGrant, PolicyGrant};
pub use protocol::{Envelope, EnvelopeId, EnvelopeKind, HostInfo, RpcError, PROTOCOL_VERSION};
pub use relay::EventRelay;
pub use resource::{LoadState, ResourceDescriptor, ResourceFetcher, ResourceHost};
pub use scroll::{should_bubble, WheelSample};
pub use session::{BridgeSession, HandshakeState, SessionConfig};
