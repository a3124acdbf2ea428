//! Async loader
//!
//! `ensure_chunk` asks every registered [`ChunkHandler`] for its
//! contribution and waits for all of them. The built-in [`ScriptHandler`]
//! drives the chunk state store and the host.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::{self, BoxFuture, FutureExt, TryFutureExt};
use tracing::{debug, trace, warn};

use super::error::{ChunkLoadError, DeliveryCategory};
use super::host::{ResourceCompletion, ResourceEvent, ResourceRequest};
use super::state::{settled, BeginLoad, ChunkFuture, ChunkResult};
use super::{not_on_demand, Runtime};
use crate::graph::ChunkId;

/// A delivery mechanism for chunks
///
/// Each handler decides on its own whether it serves a chunk id.
pub trait ChunkHandler: Send + Sync {
    /// Handler name for logging and debugging
    fn name(&self) -> &str;

    /// Contribute a future for `chunk`, or `None` when not responsible
    fn ensure(&self, runtime: &Runtime, chunk: &ChunkId) -> Option<ChunkFuture>;
}

/// Ordered set of chunk handlers
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn ChunkHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler
    pub fn register(&mut self, handler: Arc<dyn ChunkHandler>) {
        debug!("Registered chunk handler '{}'", handler.name());
        self.handlers.push(handler);
    }

    /// Collect every handler's future for `chunk`, in registration order
    pub fn collect(&self, runtime: &Runtime, chunk: &ChunkId) -> Vec<ChunkFuture> {
        self.handlers
            .iter()
            .filter_map(|handler| handler.ensure(runtime, chunk))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Loads chunks by injecting executable resources into the host
pub struct ScriptHandler {
    chunks: Option<HashSet<ChunkId>>,
}

impl ScriptHandler {
    /// Serve every chunk id
    pub fn all() -> Self {
        Self { chunks: None }
    }

    /// Serve only the given chunk ids
    pub fn only<I: IntoIterator<Item = ChunkId>>(chunks: I) -> Self {
        Self {
            chunks: Some(chunks.into_iter().collect()),
        }
    }

    fn owns(&self, chunk: &ChunkId) -> bool {
        self.chunks.as_ref().map_or(true, |set| set.contains(chunk))
    }
}

impl ChunkHandler for ScriptHandler {
    fn name(&self) -> &str {
        "script"
    }

    fn ensure(&self, runtime: &Runtime, chunk: &ChunkId) -> Option<ChunkFuture> {
        self.owns(chunk).then(|| runtime.load_chunk(chunk))
    }
}

/// Serves every chunk without loading anything
///
/// Used by runtimes whose chunk has no async children of its own while the
/// build still has async blocks elsewhere.
pub struct NoopHandler;

impl ChunkHandler for NoopHandler {
    fn name(&self) -> &str {
        "noop"
    }

    fn ensure(&self, _runtime: &Runtime, chunk: &ChunkId) -> Option<ChunkFuture> {
        trace!("No-op loader resolving chunk {}", chunk);
        Some(settled(Ok(())))
    }
}

impl Runtime {
    /// Make sure `chunk` is loaded
    ///
    /// Concurrent calls for the same chunk share one underlying load. A chunk
    /// no handler serves resolves immediately.
    pub fn ensure_chunk(&self, chunk: &ChunkId) -> BoxFuture<'static, ChunkResult> {
        if !self.inner.on_demand {
            return not_on_demand(chunk);
        }

        let contributions = self.inner.handlers.collect(self, chunk);
        future::try_join_all(contributions).map_ok(|_| ()).boxed()
    }

    /// Start or join the script load of `chunk`
    pub(crate) fn load_chunk(&self, chunk: &ChunkId) -> ChunkFuture {
        let begin = self.inner.store.lock().begin_load(chunk);

        match begin {
            BeginLoad::Ready => settled(Ok(())),
            BeginLoad::Attached(future) => {
                trace!("Chunk {} already loading, attaching", chunk);
                future
            }
            BeginLoad::Started { attempt, future } => {
                let options = &self.inner.options;
                let address = options.address(chunk);
                debug!("Loading chunk {} from {} (attempt {})", chunk, address, attempt);

                let completion = ResourceCompletion::new(
                    Arc::downgrade(&self.inner),
                    chunk.clone(),
                    attempt,
                    address.clone(),
                );

                self.inner.host.inject(ResourceRequest {
                    chunk: chunk.clone(),
                    address,
                    timeout: options.timeout,
                    nonce: options.nonce.clone(),
                    cross_origin: options.cross_origin.clone(),
                    resource_type: options.resource_type.clone(),
                    completion,
                });

                future
            }
        }
    }

    /// Host report for one load attempt
    ///
    /// Rejects only when that attempt is still in flight, so a chunk that was
    /// delivered before its timer or error handler ran is left alone.
    pub(crate) fn resource_completed(
        &self,
        chunk: &ChunkId,
        attempt: u64,
        address: &str,
        event: ResourceEvent,
    ) {
        let Some(handle) = self.inner.store.lock().fail(chunk, attempt) else {
            trace!("Chunk {} attempt {} already settled ({:?})", chunk, attempt, event);
            return;
        };

        let error = match event {
            ResourceEvent::Timeout => ChunkLoadError::Timeout {
                chunk: chunk.clone(),
                address: address.to_string(),
            },
            ResourceEvent::Error => ChunkLoadError::Delivery {
                chunk: chunk.clone(),
                category: DeliveryCategory::Transport,
                address: address.to_string(),
            },
            ResourceEvent::Load => ChunkLoadError::Delivery {
                chunk: chunk.clone(),
                category: DeliveryCategory::Missing,
                address: address.to_string(),
            },
        };

        warn!("{}", error);
        handle.settle(Err(error));
    }
}
