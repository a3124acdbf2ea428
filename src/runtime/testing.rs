//! Host that records directives instead of fetching anything

use parking_lot::Mutex;

use super::host::{HintRequest, Host, ResourceRequest};
use crate::graph::ChunkId;

#[derive(Default)]
pub struct RecordingHost {
    requests: Mutex<Vec<ResourceRequest>>,
    hints: Mutex<Vec<HintRequest>>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of resources injected for `chunk`
    pub fn injected(&self, chunk: &ChunkId) -> usize {
        self.requests.lock().iter().filter(|r| &r.chunk == chunk).count()
    }

    /// Most recent request for `chunk`
    pub fn last_request(&self, chunk: &ChunkId) -> ResourceRequest {
        self.requests
            .lock()
            .iter()
            .rev()
            .find(|r| &r.chunk == chunk)
            .cloned()
            .unwrap_or_else(|| panic!("no resource injected for chunk {}", chunk))
    }

    pub fn hints(&self) -> Vec<HintRequest> {
        self.hints.lock().clone()
    }
}

impl Host for RecordingHost {
    fn inject(&self, request: ResourceRequest) {
        self.requests.lock().push(request);
    }

    fn hint(&self, request: HintRequest) {
        self.hints.lock().push(request);
    }
}
