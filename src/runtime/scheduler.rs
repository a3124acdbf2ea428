//! Deferred entry scheduling
//!
//! Entries whose chunk group spans several chunks wait in a worklist until
//! every required chunk is loaded. The worklist is only re-scanned after a
//! delivery; nothing polls.

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::Runtime;
use crate::graph::{ChunkGraph, ChunkId, ModuleId};

/// Entry module waiting on a set of chunks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredEntry {
    pub entry: ModuleId,
    pub chunks: Vec<ChunkId>,
}

impl DeferredEntry {
    pub fn new<I: IntoIterator<Item = ChunkId>>(entry: impl Into<ModuleId>, chunks: I) -> Self {
        Self {
            entry: entry.into(),
            chunks: chunks.into_iter().collect(),
        }
    }

    /// Startup entries of every entry group containing `chunk`
    pub fn for_chunk(graph: &ChunkGraph, chunk: &ChunkId) -> Vec<Self> {
        graph
            .entry_groups_of(chunk)
            .filter_map(|group| {
                let entry = group.entry_module.clone()?;
                Some(Self {
                    entry,
                    chunks: group.chunks.clone(),
                })
            })
            .collect()
    }
}

/// Ordered worklist of deferred entries
#[derive(Debug, Default)]
pub struct DeferredScheduler {
    worklist: Vec<DeferredEntry>,
}

impl DeferredScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend<I: IntoIterator<Item = DeferredEntry>>(&mut self, entries: I) {
        self.worklist.extend(entries);
    }

    /// Remove and return every satisfied entry, in worklist order
    pub fn take_satisfied<F>(&mut self, is_loaded: F) -> Vec<DeferredEntry>
    where
        F: Fn(&ChunkId) -> bool,
    {
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.worklist)
            .into_iter()
            .partition(|entry| entry.chunks.iter().all(&is_loaded));

        self.worklist = waiting;
        ready
    }

    pub fn len(&self) -> usize {
        self.worklist.len()
    }

    pub fn is_empty(&self) -> bool {
        self.worklist.is_empty()
    }
}

impl Runtime {
    /// Register startup entries
    ///
    /// Without entry deferral the entries run right away.
    pub fn startup(&self, entries: Vec<DeferredEntry>) {
        match &self.inner.scheduler {
            Some(scheduler) => {
                scheduler.lock().extend(entries);
                self.run_satisfied();
            }
            None => {
                for entry in entries {
                    self.run_entry(&entry);
                }
            }
        }
    }

    /// Execute every deferred entry whose chunks are all loaded
    ///
    /// Each entry leaves the worklist before it runs, so it runs once even if
    /// its module delivers further chunks.
    pub fn run_satisfied(&self) -> usize {
        let Some(scheduler) = &self.inner.scheduler else {
            return 0;
        };

        let ready = {
            let mut scheduler = scheduler.lock();
            let store = self.inner.store.lock();
            scheduler.take_satisfied(|chunk| store.is_loaded(chunk))
        };

        for entry in &ready {
            self.run_entry(entry);
        }

        ready.len()
    }

    /// Number of entries still waiting
    pub fn deferred_len(&self) -> usize {
        self.inner
            .scheduler
            .as_ref()
            .map_or(0, |scheduler| scheduler.lock().len())
    }

    fn run_entry(&self, entry: &DeferredEntry) {
        debug!("Running entry {}", entry.entry);
        if let Err(err) = self.execute(&entry.entry) {
            error!("Entry {} failed: {}", entry.entry, err);
            self.report(&err);
        }
    }
}
