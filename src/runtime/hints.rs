//! Preload and prefetch hints

use std::collections::HashMap;

use tracing::{debug, trace};

use super::host::{HintKind, HintRequest};
use super::loader::ChunkHandler;
use super::state::ChunkFuture;
use super::Runtime;
use crate::graph::ChunkId;

impl Runtime {
    /// Ask the host to fetch `chunk` without executing it
    ///
    /// Only a `NotRequested` chunk accepts a hint. A hinted chunk still goes
    /// through the full load when it is ensured.
    pub fn hint(&self, chunk: &ChunkId, kind: HintKind) -> bool {
        if !self.inner.store.lock().mark_hinted(chunk) {
            trace!("Skipping {} hint for chunk {}", kind.rel(), chunk);
            return false;
        }

        let options = &self.inner.options;
        let request = HintRequest {
            chunk: chunk.clone(),
            kind,
            address: options.address(chunk),
            nonce: options.nonce.clone(),
            cross_origin: options.cross_origin.clone(),
        };

        debug!("Issuing {} hint for chunk {}", kind.rel(), chunk);
        self.inner.host.hint(request);
        true
    }
}

/// Preloads a chunk's preload children whenever that chunk is ensured
pub struct PreloadHandler {
    children: HashMap<ChunkId, Vec<ChunkId>>,
}

impl PreloadHandler {
    pub fn new(children: HashMap<ChunkId, Vec<ChunkId>>) -> Self {
        Self { children }
    }
}

impl ChunkHandler for PreloadHandler {
    fn name(&self) -> &str {
        "preload"
    }

    fn ensure(&self, runtime: &Runtime, chunk: &ChunkId) -> Option<ChunkFuture> {
        for child in self.children.get(chunk).into_iter().flatten() {
            runtime.hint(child, HintKind::Preload);
        }
        None
    }
}
