//! Host environment surface
//!
//! The runtime never fetches anything itself. It hands resource and hint
//! descriptors to a [`Host`], and the host reports how a resource ended
//! through the [`ResourceCompletion`] it was given.

use std::sync::Weak;
use std::time::Duration;

use super::{Runtime, RuntimeInner};
use crate::graph::ChunkId;

/// How a loadable resource ended, as observed by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceEvent {
    /// The resource executed
    Load,
    /// Transport or parse error
    Error,
    /// The timeout elapsed first
    Timeout,
}

/// Completion source bound to one load attempt
///
/// Clones refer to the same attempt, so a host can give one to its timer
/// and one to its fetch. Only the first report that finds the attempt still
/// in flight has any effect.
#[derive(Clone)]
pub struct ResourceCompletion {
    runtime: Weak<RuntimeInner>,
    chunk: ChunkId,
    attempt: u64,
    address: String,
}

impl ResourceCompletion {
    pub(crate) fn new(runtime: Weak<RuntimeInner>, chunk: ChunkId, attempt: u64, address: String) -> Self {
        Self {
            runtime,
            chunk,
            attempt,
            address,
        }
    }

    pub fn chunk(&self) -> &ChunkId {
        &self.chunk
    }

    /// Report the end of the resource
    pub fn complete(&self, event: ResourceEvent) {
        if let Some(inner) = self.runtime.upgrade() {
            Runtime { inner }.resource_completed(&self.chunk, self.attempt, &self.address, event);
        }
    }
}

impl std::fmt::Debug for ResourceCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCompletion")
            .field("chunk", &self.chunk)
            .field("attempt", &self.attempt)
            .finish()
    }
}

/// Loadable resource the host should fetch and execute
#[derive(Debug, Clone)]
pub struct ResourceRequest {
    pub chunk: ChunkId,
    pub address: String,
    pub timeout: Duration,
    pub nonce: Option<String>,
    pub cross_origin: Option<String>,
    pub resource_type: Option<String>,
    pub completion: ResourceCompletion,
}

/// Kind of advisory fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HintKind {
    Preload,
    Prefetch,
}

impl HintKind {
    /// Link relation used by browser hosts
    pub fn rel(&self) -> &'static str {
        match self {
            Self::Preload => "preload",
            Self::Prefetch => "prefetch",
        }
    }
}

/// Non-executing fetch directive; no completion is expected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HintRequest {
    pub chunk: ChunkId,
    pub kind: HintKind,
    pub address: String,
    pub nonce: Option<String>,
    pub cross_origin: Option<String>,
}

/// Host environment the runtime delivers directives to
pub trait Host: Send + Sync {
    /// Fetch and execute a resource; report its end through `request.completion`
    fn inject(&self, request: ResourceRequest);

    /// Fetch a resource without executing it
    fn hint(&self, request: HintRequest);
}
