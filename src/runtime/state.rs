//! Chunk state store
//!
//! One tagged state per chunk id plus the module factory table. All state
//! transitions go through [`ChunkStateStore::transition`], which refuses
//! anything outside the allowed lifecycle:
//!
//! ```text
//! NotRequested -> HintOnly -> Loading -> Loaded
//!       |            |          |
//!       |            +----------+-----> Loaded   (delivery is authoritative)
//!       +----------------------------> Loading
//!                               Loading -> Failed -> NotRequested
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures_util::future::{self, BoxFuture, FutureExt, Shared};
use tokio::sync::oneshot;
use tracing::{error, trace};

use super::error::ChunkLoadError;
use super::ModuleFactory;
use crate::graph::{ChunkId, ModuleId};

/// Outcome of one chunk load
pub type ChunkResult = Result<(), ChunkLoadError>;

/// Future shared by every caller waiting on the same chunk
pub type ChunkFuture = Shared<BoxFuture<'static, ChunkResult>>;

pub(crate) fn settled(result: ChunkResult) -> ChunkFuture {
    future::ready(result).boxed().shared()
}

/// Resolve/reject capability of an in-flight load plus its shared future
pub struct LoadHandle {
    attempt: u64,
    resolver: oneshot::Sender<ChunkResult>,
    future: ChunkFuture,
}

impl LoadHandle {
    fn new(chunk: ChunkId, attempt: u64) -> Self {
        let (resolver, receiver) = oneshot::channel();
        let future = receiver
            .map(move |received| received.unwrap_or(Err(ChunkLoadError::Abandoned { chunk })))
            .boxed()
            .shared();

        Self {
            attempt,
            resolver,
            future,
        }
    }

    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn future(&self) -> ChunkFuture {
        self.future.clone()
    }

    /// Settle the future; consuming the handle makes this happen at most once
    pub(crate) fn settle(self, result: ChunkResult) {
        // Nobody listening is fine, the load still happened
        let _ = self.resolver.send(result);
    }
}

impl fmt::Debug for LoadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadHandle").field("attempt", &self.attempt).finish()
    }
}

/// Lifecycle state of one chunk
#[derive(Debug)]
pub enum ChunkState {
    NotRequested,
    HintOnly,
    Loading(LoadHandle),
    Loaded,
    Failed,
}

impl ChunkState {
    pub fn kind(&self) -> ChunkStateKind {
        match self {
            Self::NotRequested => ChunkStateKind::NotRequested,
            Self::HintOnly => ChunkStateKind::HintOnly,
            Self::Loading(_) => ChunkStateKind::Loading,
            Self::Loaded => ChunkStateKind::Loaded,
            Self::Failed => ChunkStateKind::Failed,
        }
    }
}

/// Observable tag of a [`ChunkState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStateKind {
    NotRequested,
    HintOnly,
    Loading,
    Loaded,
    Failed,
}

impl ChunkStateKind {
    fn can_become(self, next: ChunkStateKind) -> bool {
        use ChunkStateKind::*;

        matches!(
            (self, next),
            (NotRequested, HintOnly | Loading | Loaded)
                | (HintOnly, Loading | Loaded)
                | (Loading, Loaded | Failed)
                | (Failed, NotRequested)
        )
    }
}

/// What `begin_load` decided
pub(crate) enum BeginLoad {
    /// Already loaded
    Ready,
    /// A load is in flight; attach to it
    Attached(ChunkFuture),
    /// A new attempt was started; the caller must trigger delivery
    Started { attempt: u64, future: ChunkFuture },
}

/// Per-chunk states and the module factory table
#[derive(Default)]
pub struct ChunkStateStore {
    states: HashMap<ChunkId, ChunkState>,
    factories: HashMap<ModuleId, ModuleFactory>,
    next_attempt: u64,
}

impl ChunkStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state tag; unknown ids are `NotRequested`
    pub fn kind(&self, id: &ChunkId) -> ChunkStateKind {
        self.states
            .get(id)
            .map(ChunkState::kind)
            .unwrap_or(ChunkStateKind::NotRequested)
    }

    pub fn is_loaded(&self, id: &ChunkId) -> bool {
        self.kind(id) == ChunkStateKind::Loaded
    }

    /// Look up a merged module factory
    pub fn factory(&self, id: &ModuleId) -> Option<ModuleFactory> {
        self.factories.get(id).cloned()
    }

    pub fn has_module(&self, id: &ModuleId) -> bool {
        self.factories.contains_key(id)
    }

    /// Move a chunk to `next`, returning the previous state
    ///
    /// Illegal transitions leave the store untouched and hand `next` back.
    fn transition(&mut self, id: &ChunkId, next: ChunkState) -> Result<ChunkState, ChunkState> {
        let from = self.kind(id);
        let to = next.kind();

        if !from.can_become(to) {
            error!("Refusing chunk {} transition {:?} -> {:?}", id, from, to);
            return Err(next);
        }

        trace!("Chunk {}: {:?} -> {:?}", id, from, to);

        let previous = match next {
            ChunkState::NotRequested => self.states.remove(id),
            next => self.states.insert(id.clone(), next),
        };

        Ok(previous.unwrap_or(ChunkState::NotRequested))
    }

    /// Chunks that shipped with the runtime itself
    pub(crate) fn mark_initial(&mut self, id: &ChunkId) {
        if !self.is_loaded(id) {
            let _ = self.transition(id, ChunkState::Loaded);
        }
    }

    /// Start or join a load for `id`
    pub(crate) fn begin_load(&mut self, id: &ChunkId) -> BeginLoad {
        match self.states.get(id) {
            Some(ChunkState::Loaded) => return BeginLoad::Ready,
            Some(ChunkState::Loading(handle)) => return BeginLoad::Attached(handle.future()),
            _ => {}
        }

        self.next_attempt += 1;
        let handle = LoadHandle::new(id.clone(), self.next_attempt);
        let attempt = handle.attempt();
        let future = handle.future();

        match self.transition(id, ChunkState::Loading(handle)) {
            Ok(_) => BeginLoad::Started { attempt, future },
            Err(_) => BeginLoad::Ready,
        }
    }

    /// Record a hint; only `NotRequested` chunks accept one
    pub(crate) fn mark_hinted(&mut self, id: &ChunkId) -> bool {
        self.kind(id) == ChunkStateKind::NotRequested
            && self.transition(id, ChunkState::HintOnly).is_ok()
    }

    /// Mark a delivered chunk loaded, returning the pending handle if one was waiting
    pub(crate) fn mark_loaded(&mut self, id: &ChunkId) -> Option<LoadHandle> {
        if self.is_loaded(id) {
            return None;
        }

        match self.transition(id, ChunkState::Loaded) {
            Ok(ChunkState::Loading(handle)) => Some(handle),
            _ => None,
        }
    }

    /// Fail the given attempt if it is still the one in flight
    ///
    /// The chunk passes through `Failed` and is reset to `NotRequested`, so a
    /// later `ensure_chunk` starts over.
    pub(crate) fn fail(&mut self, id: &ChunkId, attempt: u64) -> Option<LoadHandle> {
        match self.states.get(id) {
            Some(ChunkState::Loading(handle)) if handle.attempt() == attempt => {}
            _ => return None,
        }

        let handle = match self.transition(id, ChunkState::Failed) {
            Ok(ChunkState::Loading(handle)) => handle,
            _ => return None,
        };
        let _ = self.transition(id, ChunkState::NotRequested);

        Some(handle)
    }

    /// Add a module factory; the first writer for an id wins
    pub(crate) fn register_factory(&mut self, id: &ModuleId, factory: &ModuleFactory) -> Registration {
        match self.factories.get(id) {
            Some(existing) if Arc::ptr_eq(existing, factory) => Registration::Duplicate,
            Some(_) => {
                trace!("Module {} already registered by another factory", id);
                Registration::Collision
            }
            None => {
                self.factories.insert(id.clone(), factory.clone());
                Registration::Added
            }
        }
    }
}

/// Outcome of [`ChunkStateStore::register_factory`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Registration {
    Added,
    /// The same factory was registered before (a replayed delivery)
    Duplicate,
    /// Another factory already holds the id; it stays
    Collision,
}
