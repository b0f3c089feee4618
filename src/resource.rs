//! Fetching, policy injection, and lifecycle of one guest resource.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::policy::{PermissionGrant, PolicyGrant};
use crate::preamble;

/// One candidate guest resource. Owned for the lifetime of a guest instance
/// and replaced wholesale when the URI changes; never mutated once ready.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    pub uri: String,
    /// Text or HTML content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Base64-encoded binary content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub policy: PolicyGrant,
    #[serde(default)]
    pub permissions: PermissionGrant,
}

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("resource carries neither text content nor a blob")]
    Empty,
    #[error("blob is not valid base64: {0}")]
    Blob(#[from] base64::DecodeError),
    #[error("blob is not valid UTF-8 markup")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// How resource bytes are obtained (in production, a resources/read round
/// trip to the tool provider).
pub trait ResourceFetcher: Send + Sync {
    fn read(&self, uri: &str) -> BoxFuture<'static, Result<ResourceDescriptor, ResourceError>>;
}

/// A descriptor whose markup has the policy preamble already embedded,
/// ready to instantiate a guest.
#[derive(Debug, Clone)]
pub struct PreparedResource {
    pub descriptor: ResourceDescriptor,
    pub markup: String,
}

#[derive(Debug, Clone, Default)]
pub enum LoadState {
    #[default]
    Idle,
    Loading,
    Ready(PreparedResource),
    /// Host-side UI state only; the message never crosses the boundary.
    Failed(String),
}

impl LoadState {
    pub fn is_ready(&self) -> bool {
        matches!(self, LoadState::Ready(_))
    }
}

/// Drives one resource through `Idle → Loading → Ready | Failed`. A newer
/// load supersedes an older one: the generation counter keeps a stale fetch
/// completion from clobbering the newer state.
pub struct ResourceHost<F: ResourceFetcher> {
    fetcher: F,
    state: Mutex<LoadState>,
    generation: AtomicU64,
}

impl<F: ResourceFetcher> ResourceHost<F> {
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            state: Mutex::new(LoadState::Idle),
            generation: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> LoadState {
        self.state.lock().unwrap().clone()
    }

    /// Fetch the resource, embed the policy preamble, and transition to
    /// Ready. Failures transition this instance to Failed without touching
    /// anything else.
    pub async fn load(&self, uri: &str) -> LoadState {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.mark_loading(generation);
        debug!(uri, generation, "loading guest resource");

        let outcome = self.fetch_and_prepare(uri).await;

        let mut state = self.state.lock().unwrap();
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(uri, generation, "stale load superseded; discarding");
            return state.clone();
        }
        *state = match outcome {
            Ok(prepared) => LoadState::Ready(prepared),
            Err(err) => {
                warn!(uri, error = %err, "guest resource failed to load");
                LoadState::Failed(err.to_string())
            }
        };
        state.clone()
    }

    /// Enter Loading only while this load is still the current one. A load
    /// preempted between taking its generation and getting here must not
    /// clobber the outcome of a newer load.
    fn mark_loading(&self, generation: u64) {
        let mut state = self.state.lock().unwrap();
        if self.generation.load(Ordering::SeqCst) == generation {
            *state = LoadState::Loading;
        }
    }

    /// Drop the current resource outright (hosting element unmounted).
    pub fn reset(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.state.lock().unwrap() = LoadState::Idle;
    }

    async fn fetch_and_prepare(&self, uri: &str) -> Result<PreparedResource, ResourceError> {
        let descriptor = self.fetcher.read(uri).await?;
        let markup = markup_of(&descriptor)?;
        let markup = preamble::inject(&markup, &descriptor.policy);
        Ok(PreparedResource { descriptor, markup })
    }
}

fn markup_of(descriptor: &ResourceDescriptor) -> Result<String, ResourceError> {
    if let Some(content) = &descriptor.content {
        return Ok(content.clone());
    }
    if let Some(blob) = &descriptor.blob {
        let bytes = BASE64.decode(blob)?;
        return Ok(String::from_utf8(bytes)?);
    }
    Err(ResourceError::Empty)
}
