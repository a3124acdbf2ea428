//! Requirement analysis
//!
//! Decides, per chunk, which parts of the loading runtime have to be emitted.
//! Everything here is a pure function of the chunk graph.

use serde::Serialize;
use tracing::debug;

use crate::graph::{ChildOrder, ChunkGraph, ChunkId};

/// Runtime capabilities a chunk needs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RuntimeRequirements {
    /// An `ensureChunk` entry point must exist
    pub needs_on_demand_loading: bool,

    /// Entry execution must wait for several chunks
    pub needs_entry_deferral: bool,

    /// Prefetch hints must be supported
    pub needs_prefetch_support: bool,

    /// Gate for the hot update bootstrap
    pub needs_chunk_loading_code: bool,

    /// The chunk itself reaches async chunks, so the loader is not a no-op
    pub has_async_chunks: bool,
}

impl RuntimeRequirements {
    /// True when no runtime feature is needed at all
    pub fn is_empty(&self) -> bool {
        !(self.needs_on_demand_loading
            || self.needs_entry_deferral
            || self.needs_prefetch_support
            || self.needs_chunk_loading_code)
    }

    /// The on-demand entry point exists but never loads anything
    pub fn is_noop_loading(&self) -> bool {
        self.needs_on_demand_loading && !self.has_async_chunks
    }
}

/// Compute the runtime requirements of a chunk
///
/// Returns `None` when the chunk is not part of the graph.
pub fn analyze(graph: &ChunkGraph, chunk: &ChunkId) -> Option<RuntimeRequirements> {
    graph.chunk(chunk)?;

    let has_async_chunks = !graph.async_chunks(chunk).is_empty();

    let requirements = RuntimeRequirements {
        needs_on_demand_loading: has_async_chunks || graph.has_nonempty_async_blocks(),
        needs_entry_deferral: graph.groups_of(chunk).any(|g| g.chunks.len() > 1),
        needs_prefetch_support: !graph
            .child_chunks_by_order(chunk, ChildOrder::Prefetch)
            .is_empty(),
        needs_chunk_loading_code: graph
            .groups_of(chunk)
            .any(|g| g.chunks.len() > 1 || !g.children.is_empty()),
        has_async_chunks,
    };

    debug!("Requirements for chunk {}: {:?}", chunk, requirements);

    Some(requirements)
}

/// Whether any chunk of the build needs entry deferral
pub fn build_needs_entry_deferral(graph: &ChunkGraph) -> bool {
    graph
        .chunks
        .iter()
        .filter_map(|c| analyze(graph, &c.id))
        .any(|r| r.needs_entry_deferral)
}
