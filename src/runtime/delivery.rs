//! Chunk delivery and the load-completion merger
//!
//! Every chunk artifact announces itself with a [`ChunkDelivery`] sent
//! through a [`DeliveryQueue`]. Producers never know who consumes the queue;
//! deliveries sent before a runtime is installed are kept and replayed in
//! order at install time.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use super::host::HintKind;
use super::scheduler::DeferredEntry;
use super::error::ChunkLoadError;
use super::state::{LoadHandle, Registration};
use super::{ModuleFactory, Runtime};
use crate::graph::{ChunkId, ModuleId};

/// Payload a chunk artifact delivers when it executes
#[derive(Clone, Default)]
pub struct ChunkDelivery {
    /// Chunks this artifact completes
    pub chunk_ids: Vec<ChunkId>,

    /// Module factories carried by the artifact
    pub factories: Vec<(ModuleId, ModuleFactory)>,

    /// Deferred entries to register (entry deferral builds only)
    pub entries: Vec<DeferredEntry>,

    /// Chunks to prefetch (prefetch builds only)
    pub prefetch: Vec<ChunkId>,
}

impl ChunkDelivery {
    pub fn new<I: IntoIterator<Item = ChunkId>>(chunk_ids: I) -> Self {
        Self {
            chunk_ids: chunk_ids.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Add a module factory
    pub fn module<F>(mut self, id: impl Into<ModuleId>, factory: F) -> Self
    where
        F: Fn(&Runtime) + Send + Sync + 'static,
    {
        self.factories.push((id.into(), Arc::new(factory)));
        self
    }

    /// Add a deferred entry
    pub fn entry(mut self, entry: DeferredEntry) -> Self {
        self.entries.push(entry);
        self
    }

    /// Add a prefetch hint
    pub fn prefetch(mut self, chunk: impl Into<ChunkId>) -> Self {
        self.prefetch.push(chunk.into());
        self
    }

    /// Ids of the carried modules
    pub fn module_ids(&self) -> impl Iterator<Item = &ModuleId> {
        self.factories.iter().map(|(id, _)| id)
    }
}

impl fmt::Debug for ChunkDelivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkDelivery")
            .field("chunk_ids", &self.chunk_ids)
            .field("modules", &self.module_ids().collect::<Vec<_>>())
            .field("entries", &self.entries)
            .field("prefetch", &self.prefetch)
            .finish()
    }
}

#[derive(Default)]
struct QueueState {
    /// Every delivery sent so far, in order
    delivered: Vec<ChunkDelivery>,

    /// Installed runtimes, oldest first
    consumers: Vec<Runtime>,
}

/// Channel between chunk artifacts and the runtimes of a page
///
/// The newest installed runtime receives a delivery first and forwards it to
/// the runtime installed before it. A runtime installed late still sees every
/// delivery sent before it.
#[derive(Clone)]
pub struct DeliveryQueue {
    state: Arc<Mutex<QueueState>>,
}

impl DeliveryQueue {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
        }
    }

    /// Send a delivery; merged immediately by every installed runtime
    pub fn push(&self, delivery: ChunkDelivery) {
        let consumers = {
            let mut state = self.state.lock();
            state.delivered.push(delivery.clone());
            if state.consumers.is_empty() {
                debug!("Buffering delivery for chunks {:?}", delivery.chunk_ids);
                return;
            }
            state.consumers.clone()
        };

        for runtime in consumers.iter().rev() {
            runtime.merge(delivery.clone());
        }
    }

    /// Number of deliveries waiting for a first runtime
    pub fn pending(&self) -> usize {
        let state = self.state.lock();
        if state.consumers.is_empty() {
            state.delivered.len()
        } else {
            0
        }
    }

    /// Number of installed runtimes
    pub fn consumers(&self) -> usize {
        self.state.lock().consumers.len()
    }
}

impl Default for DeliveryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// Become the newest consumer of `queue`, replaying everything sent before
    pub fn install(&self, queue: &DeliveryQueue) {
        let replay = {
            let mut state = queue.state.lock();
            if state.consumers.iter().any(|runtime| runtime.same_as(self)) {
                warn!("Runtime is already installed on this delivery queue");
                return;
            }
            state.consumers.push(self.clone());
            state.delivered.clone()
        };

        debug!("Installing runtime, replaying {} earlier deliveries", replay.len());
        for delivery in replay {
            self.merge(delivery);
        }
    }

    /// Merge one delivery
    ///
    /// Order matters: chunk states first, then factories, then the
    /// extension, hints, pending resolves, and finally deferred entries.
    pub(crate) fn merge(&self, delivery: ChunkDelivery) {
        debug!(
            "Merging delivery of chunks {:?} ({} modules)",
            delivery.chunk_ids,
            delivery.factories.len()
        );

        let (handles, collisions): (Vec<LoadHandle>, Vec<&ModuleId>) = {
            let mut store = self.inner.store.lock();
            // Re-delivering loaded chunks is harmless; a new chunk clashing is not
            let redelivery = delivery.chunk_ids.iter().all(|id| store.is_loaded(id));
            let handles = delivery
                .chunk_ids
                .iter()
                .filter_map(|id| store.mark_loaded(id))
                .collect();
            let collisions = delivery
                .factories
                .iter()
                .filter(|(module, factory)| store.register_factory(module, factory) == Registration::Collision)
                .map(|(module, _)| module)
                .filter(|_| !redelivery)
                .collect();
            (handles, collisions)
        };

        let extension = self.inner.extension.read().clone();
        if let Some(extension) = extension {
            extension.on_delivery(&delivery);
        }

        if !delivery.prefetch.is_empty() {
            if self.inner.prefetch {
                for chunk in &delivery.prefetch {
                    self.hint(chunk, HintKind::Prefetch);
                }
            } else {
                debug!("Ignoring prefetch hints, prefetch support is not enabled");
            }
        }

        let result = if collisions.is_empty() {
            Ok(())
        } else {
            let modules: Vec<String> = collisions.iter().map(|m| m.to_string()).collect();
            let err = ChunkLoadError::invariant(format!(
                "chunks {:?} deliver modules already registered by another chunk: {}",
                delivery.chunk_ids,
                modules.join(", ")
            ));
            error!("{}", err);
            Err(err)
        };

        for handle in handles {
            handle.settle(result.clone());
        }

        match &self.inner.scheduler {
            Some(scheduler) => {
                if !delivery.entries.is_empty() {
                    scheduler.lock().extend(delivery.entries);
                }
                self.run_satisfied();
            }
            None if !delivery.entries.is_empty() => {
                warn!("Delivery carries deferred entries but entry deferral is not enabled");
            }
            None => {}
        }
    }
}
