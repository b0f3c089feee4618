//! Cross-context message channel between the host and one guest instance.
//!
//! The real channel is a window-to-window message port; modelling it as an
//! injected trait keeps the session testable with an in-memory substitute.

use std::sync::Mutex;

use thiserror::Error;

use crate::protocol::Envelope;

/// Identifies the sending context of an inbound delivery. The session only
/// accepts messages whose source matches its paired guest; everything else
/// is ignored, which is the primary confinement check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("guest channel is closed")]
    Closed,
}

/// Host→guest send path, scoped to one instance.
pub trait GuestChannel: Send + Sync {
    fn send(&self, envelope: &Envelope) -> Result<(), ChannelError>;
}

/// Test double: records everything the host sends to the guest.
#[derive(Default)]
pub struct InMemoryChannel {
    sent: Mutex<Vec<Envelope>>,
    closed: Mutex<bool>,
}

impl InMemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Envelope> {
        self.sent.lock().unwrap().clone()
    }

    pub fn drain(&self) -> Vec<Envelope> {
        std::mem::take(&mut self.sent.lock().unwrap())
    }

    pub fn close(&self) {
        *self.closed.lock().unwrap() = true;
    }
}

impl GuestChannel for InMemoryChannel {
    fn send(&self, envelope: &Envelope) -> Result<(), ChannelError> {
        if *self.closed.lock().unwrap() {
            return Err(ChannelError::Closed);
        }
        self.sent.lock().unwrap().push(envelope.clone());
        Ok(())
    }
}
